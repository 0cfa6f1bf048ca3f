use crate::domain::alice::Alice;
use crate::domain::bob::Bob;
use crate::domain::coinjoin_state::{CoinjoinState, ConstructionState};
use crate::domain::params::RoundParameters;
use crate::domain::phase::{EndRoundState, Phase};
use crate::foundation::{CoordinatorError, Result, RoundId, TimeFrame};
use crate::infrastructure::credentials::CredentialIssuer;
use bitcoin::{OutPoint, ScriptBuf};
use log::info;
use std::collections::HashSet;
use std::sync::Arc;

const ROUND_ID_DOMAIN: &[u8] = b"coinjoin:round_id:v1:";

/// Standard rounds admit anyone; blame rounds admit only the whitelisted
/// survivors of a failed predecessor.
#[derive(Clone, Debug)]
pub enum RoundKind {
    Standard,
    Blame { blame_of: RoundId, whitelist: HashSet<OutPoint> },
}

/// One instance of the multi-party transaction-construction protocol.
///
/// Mutation goes through the capability surface below; the Arena never
/// reaches into the collections directly. Every mutation bumps `state_id`,
/// the checkpoint clients use for incremental status polling.
pub struct Round {
    id: RoundId,
    pub parameters: RoundParameters,
    kind: RoundKind,
    phase: Phase,
    /// Every phase entered so far with its start time, in transition order.
    phase_history: Vec<(Phase, u64)>,
    created_at_nanos: u64,
    ended_at_nanos: Option<u64>,
    end_state: Option<EndRoundState>,
    coinjoin: CoinjoinState,
    alices: Vec<Alice>,
    bobs: Vec<Bob>,
    coordinator_script: ScriptBuf,
    state_id: u64,
    amount_issuer: Arc<dyn CredentialIssuer>,
    vsize_issuer: Arc<dyn CredentialIssuer>,
}

impl Round {
    pub fn new(
        parameters: RoundParameters,
        kind: RoundKind,
        coordinator_script: ScriptBuf,
        amount_issuer: Arc<dyn CredentialIssuer>,
        vsize_issuer: Arc<dyn CredentialIssuer>,
        now_nanos: u64,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(ROUND_ID_DOMAIN);
        parameters.fold_into(&mut hasher);
        hasher.update(&amount_issuer.public_parameters());
        hasher.update(&vsize_issuer.public_parameters());
        if let RoundKind::Blame { blame_of, .. } = &kind {
            hasher.update(blame_of.as_hash());
        }
        let id = RoundId::new(*hasher.finalize().as_bytes());

        let coinjoin = CoinjoinState::Construction(ConstructionState::new(parameters.mining_fee_rate));
        Self {
            id,
            parameters,
            kind,
            phase: Phase::InputRegistration,
            phase_history: vec![(Phase::InputRegistration, now_nanos)],
            created_at_nanos: now_nanos,
            ended_at_nanos: None,
            end_state: None,
            coinjoin,
            alices: Vec::new(),
            bobs: Vec::new(),
            coordinator_script,
            state_id: 1,
            amount_issuer,
            vsize_issuer,
        }
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn end_state(&self) -> Option<EndRoundState> {
        self.end_state
    }

    pub fn state_id(&self) -> u64 {
        self.state_id
    }

    pub fn created_at_nanos(&self) -> u64 {
        self.created_at_nanos
    }

    pub fn ended_at_nanos(&self) -> Option<u64> {
        self.ended_at_nanos
    }

    pub fn kind(&self) -> &RoundKind {
        &self.kind
    }

    pub fn is_blame_round(&self) -> bool {
        matches!(self.kind, RoundKind::Blame { .. })
    }

    pub fn blame_of(&self) -> Option<RoundId> {
        match &self.kind {
            RoundKind::Blame { blame_of, .. } => Some(*blame_of),
            RoundKind::Standard => None,
        }
    }

    pub fn is_whitelisted(&self, outpoint: &OutPoint) -> bool {
        match &self.kind {
            RoundKind::Standard => true,
            RoundKind::Blame { whitelist, .. } => whitelist.contains(outpoint),
        }
    }

    pub fn coordinator_script(&self) -> &ScriptBuf {
        &self.coordinator_script
    }

    pub fn amount_issuer(&self) -> Arc<dyn CredentialIssuer> {
        self.amount_issuer.clone()
    }

    pub fn vsize_issuer(&self) -> Arc<dyn CredentialIssuer> {
        self.vsize_issuer.clone()
    }

    fn touch(&mut self) {
        self.state_id += 1;
    }

    pub fn set_phase(&mut self, target: Phase, now_nanos: u64) -> Result<()> {
        if !self.phase.can_transition_to(target) {
            return Err(CoordinatorError::InvalidStateTransition { from: self.phase.to_string(), to: target.to_string() });
        }
        info!("round phase advanced round_id={} from={} to={}", self.id, self.phase, target);
        self.phase = target;
        self.phase_history.push((target, now_nanos));
        self.touch();
        Ok(())
    }

    /// Start timestamps of every phase entered so far, in order.
    pub fn phase_history(&self) -> &[(Phase, u64)] {
        &self.phase_history
    }

    fn phase_started_at_nanos(&self) -> u64 {
        self.phase_history.last().map(|(_, started_at)| *started_at).unwrap_or(self.created_at_nanos)
    }

    pub fn end_with(&mut self, state: EndRoundState, now_nanos: u64) -> Result<()> {
        self.set_phase(Phase::Ended, now_nanos)?;
        info!("round ended round_id={} end_state={}", self.id, state);
        self.end_state = Some(state);
        self.ended_at_nanos = Some(now_nanos);
        Ok(())
    }

    /// Time frame of the current phase. InputRegistration expires exactly at
    /// its timeout; the later phases carry a grace buffer of a quarter of
    /// their timeout so clients racing a phase flip are not cut off.
    pub fn phase_time_frame(&self) -> TimeFrame {
        let params = &self.parameters;
        let started_at = self.phase_started_at_nanos();
        match self.phase {
            Phase::InputRegistration => TimeFrame::new(started_at, params.input_registration_timeout_nanos),
            Phase::ConnectionConfirmation => TimeFrame::new(started_at, params.connection_confirmation_timeout_nanos)
                .with_grace(params.connection_confirmation_timeout_nanos / 4),
            Phase::OutputRegistration => TimeFrame::new(started_at, params.output_registration_timeout_nanos)
                .with_grace(params.output_registration_timeout_nanos / 4),
            Phase::TransactionSigning => TimeFrame::new(started_at, params.transaction_signing_timeout_nanos)
                .with_grace(params.transaction_signing_timeout_nanos / 4),
            Phase::Ended => TimeFrame::new(self.ended_at_nanos.unwrap_or(started_at), params.round_expiry_timeout_nanos),
        }
    }

    /// Input admission target: the global maximum for standard rounds, the
    /// whitelist size for blame rounds.
    pub fn max_input_count(&self) -> usize {
        match &self.kind {
            RoundKind::Standard => self.parameters.max_input_count_by_round,
            RoundKind::Blame { whitelist, .. } => whitelist.len(),
        }
    }

    pub fn is_input_registration_ended(&self, now_nanos: u64) -> bool {
        if self.phase != Phase::InputRegistration {
            return true;
        }
        self.alices.len() >= self.max_input_count() || self.phase_time_frame().has_expired(now_nanos)
    }

    pub fn input_count(&self) -> usize {
        self.alices.len()
    }

    pub fn alices(&self) -> &[Alice] {
        &self.alices
    }

    pub fn alice(&self, outpoint: &OutPoint) -> Option<&Alice> {
        self.alices.iter().find(|alice| alice.outpoint() == *outpoint)
    }

    pub fn alice_mut(&mut self, outpoint: &OutPoint) -> Option<&mut Alice> {
        let position = self.alices.iter().position(|alice| alice.outpoint() == *outpoint)?;
        self.touch();
        self.alices.get_mut(position)
    }

    /// Each admitted alice reserves the full per-alice vsize allocation out
    /// of the round's initial input budget.
    pub fn remaining_input_vsize_allocation(&self) -> u64 {
        self.parameters
            .initial_input_vsize_allocation()
            .saturating_sub(self.alices.len() as u64 * self.parameters.max_vsize_allocation_per_alice)
    }

    pub fn add_alice(&mut self, alice: Alice) -> Result<()> {
        if self.alices.len() >= self.max_input_count() {
            return Err(CoordinatorError::RoundFull);
        }
        if self.alices.iter().any(|existing| existing.outpoint() == alice.outpoint()) {
            return Err(CoordinatorError::AliceAlreadyRegistered);
        }
        if self.remaining_input_vsize_allocation() < self.parameters.max_vsize_allocation_per_alice {
            return Err(CoordinatorError::VsizeQuotaExceeded {
                requested: self.parameters.max_vsize_allocation_per_alice,
                remaining: self.remaining_input_vsize_allocation(),
            });
        }
        self.alices.push(alice);
        self.touch();
        Ok(())
    }

    pub fn evict_alice(&mut self, outpoint: &OutPoint) -> Option<Alice> {
        let position = self.alices.iter().position(|alice| alice.outpoint() == *outpoint)?;
        self.touch();
        Some(self.alices.remove(position))
    }

    pub fn all_alices_confirmed(&self) -> bool {
        self.alices.iter().all(|alice| alice.confirmed_connection)
    }

    pub fn all_alices_ready_to_sign(&self) -> bool {
        self.alices.iter().all(|alice| alice.ready_to_sign)
    }

    pub fn bobs(&self) -> &[Bob] {
        &self.bobs
    }

    pub fn add_bob(&mut self, bob: Bob) {
        self.bobs.push(bob);
        self.touch();
    }

    pub fn is_script_used(&self, script: &ScriptBuf) -> bool {
        self.bobs.iter().any(|bob| bob.script == *script) || self.alices.iter().any(|alice| alice.coin.script_pubkey() == script)
    }

    pub fn coinjoin(&self) -> &CoinjoinState {
        &self.coinjoin
    }

    pub fn set_coinjoin(&mut self, state: CoinjoinState) {
        self.coinjoin = state;
        self.touch();
    }

    pub fn is_fully_signed(&self) -> bool {
        match &self.coinjoin {
            CoinjoinState::Signing(signing) => signing.is_fully_signed(),
            CoinjoinState::Construction(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::coin::{Coin, OwnershipProof};
    use crate::domain::params::{CoordinationFeeRate, RoundParameters};
    use crate::infrastructure::credentials::InMemoryIssuer;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, FeeRate, TxOut, Txid, WPubkeyHash};

    fn params() -> RoundParameters {
        RoundParameters {
            mining_fee_rate: FeeRate::from_sat_per_vb_unchecked(2),
            coordination_fee_rate: CoordinationFeeRate::zero(),
            max_suggested_amount: Amount::from_sat(10_000_000),
            min_input_count_by_round: 2,
            max_input_count_by_round: 3,
            min_registrable_amount: Amount::from_sat(5_000),
            max_registrable_amount: Amount::from_sat(4_300_000_000_000),
            min_output_amount: Amount::from_sat(5_000),
            max_transaction_vsize: 100_000,
            max_vsize_allocation_per_alice: 255,
            input_registration_timeout_nanos: 1_000,
            blame_input_registration_timeout_nanos: 500,
            connection_confirmation_timeout_nanos: 1_000,
            output_registration_timeout_nanos: 1_000,
            transaction_signing_timeout_nanos: 1_000,
            round_expiry_timeout_nanos: 1_000,
        }
    }

    fn round(kind: RoundKind) -> Round {
        Round::new(
            params(),
            kind,
            ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([0xCC; 20])),
            Arc::new(InMemoryIssuer::new([1u8; 32])),
            Arc::new(InMemoryIssuer::new([2u8; 32])),
            100,
        )
    }

    fn alice(tag: u8) -> Alice {
        let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([tag; 20]));
        let coin = Coin::new(
            OutPoint { txid: Txid::from_byte_array([tag; 32]), vout: 0 },
            TxOut { value: Amount::from_sat(100_000), script_pubkey: script },
        );
        Alice::new(coin, OwnershipProof(vec![tag]), false, 100)
    }

    #[test]
    fn round_ids_differ_with_issuer_parameters() {
        let a = round(RoundKind::Standard);
        let b = Round::new(
            params(),
            RoundKind::Standard,
            ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([0xCC; 20])),
            Arc::new(InMemoryIssuer::new([9u8; 32])),
            Arc::new(InMemoryIssuer::new([8u8; 32])),
            100,
        );
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn phase_can_only_move_forward() {
        let mut round = round(RoundKind::Standard);
        round.set_phase(Phase::ConnectionConfirmation, 200).expect("advance");
        let err = round.set_phase(Phase::InputRegistration, 300).expect_err("backward");
        assert!(matches!(err, CoordinatorError::InvalidStateTransition { .. }));
    }

    #[test]
    fn registration_ends_on_count_or_timeout() {
        let mut round = round(RoundKind::Standard);
        assert!(!round.is_input_registration_ended(150));
        assert!(round.is_input_registration_ended(1_100));

        for tag in 1..=3 {
            round.add_alice(alice(tag)).expect("admit");
        }
        assert!(round.is_input_registration_ended(150));
        assert!(matches!(round.add_alice(alice(4)), Err(CoordinatorError::RoundFull)));
    }

    #[test]
    fn duplicate_outpoint_is_rejected() {
        let mut round = round(RoundKind::Standard);
        round.add_alice(alice(1)).expect("admit");
        assert!(matches!(round.add_alice(alice(1)), Err(CoordinatorError::AliceAlreadyRegistered)));
    }

    #[test]
    fn blame_round_caps_at_whitelist_size() {
        let whitelist: HashSet<OutPoint> =
            [OutPoint { txid: Txid::from_byte_array([1u8; 32]), vout: 0 }, OutPoint { txid: Txid::from_byte_array([2u8; 32]), vout: 0 }]
                .into_iter()
                .collect();
        let round = round(RoundKind::Blame { blame_of: RoundId::new([5u8; 32]), whitelist });
        assert_eq!(round.max_input_count(), 2);
        assert!(round.is_whitelisted(&OutPoint { txid: Txid::from_byte_array([1u8; 32]), vout: 0 }));
        assert!(!round.is_whitelisted(&OutPoint { txid: Txid::from_byte_array([7u8; 32]), vout: 0 }));
    }

    #[test]
    fn phase_history_keeps_every_start_timestamp() {
        let mut round = round(RoundKind::Standard);
        assert_eq!(round.phase_history(), &[(Phase::InputRegistration, 100)]);

        round.set_phase(Phase::ConnectionConfirmation, 200).expect("advance");
        round.set_phase(Phase::OutputRegistration, 300).expect("advance");
        round.set_phase(Phase::TransactionSigning, 400).expect("advance");
        round.end_with(EndRoundState::NotAllAlicesSign, 500).expect("end");
        assert_eq!(
            round.phase_history(),
            &[
                (Phase::InputRegistration, 100),
                (Phase::ConnectionConfirmation, 200),
                (Phase::OutputRegistration, 300),
                (Phase::TransactionSigning, 400),
                (Phase::Ended, 500),
            ]
        );
    }

    #[test]
    fn state_id_bumps_on_mutation() {
        let mut round = round(RoundKind::Standard);
        let initial = round.state_id();
        round.add_alice(alice(1)).expect("admit");
        assert!(round.state_id() > initial);
        let after_add = round.state_id();
        round.evict_alice(&OutPoint { txid: Txid::from_byte_array([1u8; 32]), vout: 0 }).expect("evict");
        assert!(round.state_id() > after_add);
    }

    #[test]
    fn vsize_allocation_shrinks_per_admitted_alice() {
        let mut round = round(RoundKind::Standard);
        let initial = round.remaining_input_vsize_allocation();
        round.add_alice(alice(1)).expect("admit");
        assert_eq!(round.remaining_input_vsize_allocation(), initial - 255);
    }
}
