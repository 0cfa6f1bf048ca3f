use super::status::RoundState;
use super::{Arena, ArenaInner};
use crate::service::events::CoinjoinBroadcast;
use bitcoin::{Amount, FeeRate, OutPoint, TxOut};
use coinjoin_core::domain::{CoinjoinState, EndRoundState, Offense, Phase, Round, RoundKind};
use coinjoin_core::foundation::constants::P2WPKH_OUTPUT_VSIZE;
use coinjoin_core::foundation::{CoordinatorError, Result, RoundId};
use coinjoin_core::infrastructure::rpc::spend_statuses;
use log::{debug, info, warn};
use std::collections::HashSet;

/// The periodic driver. All phase transitions happen here, under one coarse
/// lock per tick, in the fixed step order below. A failure in one round ends
/// that round `AbortedWithError` and never aborts the rest of the tick.
impl Arena {
    pub async fn action(&self, now_nanos: u64) {
        let mut inner = self.inner.lock().await;

        self.remove_expired_rounds(&mut inner, now_nanos);
        self.timeout_unconfirmed_alices(&mut inner, now_nanos);

        for round_id in round_ids_in_phase(&inner, Phase::TransactionSigning) {
            if let Err(err) = self.step_signing_round(&mut inner, round_id, now_nanos).await {
                fail_round(&mut inner, round_id, now_nanos, &err);
            }
        }
        for round_id in round_ids_in_phase(&inner, Phase::OutputRegistration) {
            if let Err(err) = self.step_output_registration_round(&mut inner, round_id, now_nanos) {
                fail_round(&mut inner, round_id, now_nanos, &err);
            }
        }
        for round_id in round_ids_in_phase(&inner, Phase::ConnectionConfirmation) {
            if let Err(err) = self.step_connection_confirmation_round(&mut inner, round_id, now_nanos).await {
                fail_round(&mut inner, round_id, now_nanos, &err);
            }
        }
        for round_id in round_ids_in_phase(&inner, Phase::InputRegistration) {
            if let Err(err) = self.step_input_registration_round(&mut inner, round_id, now_nanos) {
                fail_round(&mut inner, round_id, now_nanos, &err);
            }
        }

        self.create_rounds(&mut inner, now_nanos).await;
        self.abort_disrupted_rounds(&mut inner, now_nanos);

        let states: Vec<RoundState> = inner.rounds.values().map(RoundState::from_round).collect();
        drop(inner);
        self.publish_snapshot(states);
    }

    /// Step 1: drop rounds that ended long enough ago, and let expired
    /// convictions age out of the prison.
    fn remove_expired_rounds(&self, inner: &mut ArenaInner, now_nanos: u64) {
        let expired: Vec<RoundId> = inner
            .rounds
            .values()
            .filter(|round| round.phase() == Phase::Ended && round.phase_time_frame().has_expired(now_nanos))
            .map(|round| round.id())
            .collect();
        for round_id in expired {
            inner.rounds.remove(&round_id);
            debug!("expired round removed round_id={}", round_id);
        }
        self.prison.sweep_expired(now_nanos);
    }

    /// Step 2: during input registration, a participant who never came back
    /// after its per-alice deadline is evicted without a ban.
    fn timeout_unconfirmed_alices(&self, inner: &mut ArenaInner, now_nanos: u64) {
        for round_id in round_ids_in_phase(inner, Phase::InputRegistration) {
            let Some(round) = inner.rounds.get_mut(&round_id) else { continue };
            let expired: Vec<OutPoint> = round
                .alices()
                .iter()
                .filter(|alice| !alice.confirmed_connection && alice.deadline_expired(now_nanos))
                .map(|alice| alice.outpoint())
                .collect();
            for outpoint in expired {
                round.evict_alice(&outpoint);
                info!("unresponsive alice evicted round_id={} outpoint={}", round_id, outpoint);
            }
        }
    }

    /// Step 3: broadcast fully-signed rounds; on signing timeout, ban the
    /// culprits and either spawn a blame round or abort.
    async fn step_signing_round(&self, inner: &mut ArenaInner, round_id: RoundId, now_nanos: u64) -> Result<()> {
        let (fully_signed, expired) = {
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            (round.is_fully_signed(), round.phase_time_frame().has_expired(now_nanos))
        };

        if fully_signed {
            let tx = {
                let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
                round.coinjoin().as_signing()?.signed_transaction()?
            };
            match self.bound_by_tick("broadcast", self.rpc.broadcast(&tx)).await {
                Ok(txid) => {
                    inner.coinjoin_txids.insert(txid);
                    for output in &tx.output {
                        inner.coinjoin_scripts.insert(output.script_pubkey.clone());
                    }
                    let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
                    round.end_with(EndRoundState::TransactionBroadcasted, now_nanos)?;
                    info!("coinjoin broadcast round_id={} txid={} inputs={} outputs={}", round_id, txid, tx.input.len(), tx.output.len());
                    let _ = self.broadcasts.send(CoinjoinBroadcast { round_id, txid, transaction: tx });
                }
                Err(err) => {
                    warn!("coinjoin broadcast failed round_id={} error={}", round_id, err);
                    let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
                    round.end_with(EndRoundState::TransactionBroadcastFailed, now_nanos)?;
                }
            }
            return Ok(());
        }

        if !expired {
            return Ok(());
        }

        let (signed, unsigned, min_input_count, predecessor_params) = {
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            let signing = round.coinjoin().as_signing()?;
            let mut signed = Vec::new();
            let mut unsigned = Vec::new();
            for (index, coin) in signing.inputs().iter().enumerate() {
                if signing.is_input_signed(index) {
                    signed.push(coin.outpoint);
                } else {
                    unsigned.push(coin.outpoint);
                }
            }
            (signed, unsigned, round.parameters.min_input_count_by_round, round.parameters.clone())
        };

        // A missing input means someone spent it out from under the round;
        // that is an active double spend, not mere unresponsiveness.
        let all_inputs: Vec<OutPoint> = signed.iter().chain(unsigned.iter()).copied().collect();
        let statuses = self.bound_by_tick("spend status lookup", spend_statuses(self.rpc.as_ref(), &all_inputs)).await?;
        let spent: Vec<OutPoint> = all_inputs
            .iter()
            .zip(statuses.iter())
            .filter(|(_, status)| status.is_none())
            .map(|(outpoint, _)| *outpoint)
            .collect();
        if !spent.is_empty() {
            self.ban_offenders(&spent, Offense::DoubleSpent, round_id, now_nanos);
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            round.end_with(EndRoundState::AbortedDoubleSpendingDetected, now_nanos)?;
            return Ok(());
        }

        self.ban_offenders(&unsigned, Offense::FailedToSign, round_id, now_nanos);
        if signed.len() >= min_input_count {
            let whitelist: HashSet<OutPoint> =
                signed.iter().filter(|outpoint| !self.prison.is_banned(outpoint, now_nanos)).copied().collect();
            let params = self.params_factory.create_blame(&predecessor_params);
            let (amount_issuer, vsize_issuer) = self.issuer_factory.create_issuer_pair();
            let blame = Round::new(
                params,
                RoundKind::Blame { blame_of: round_id, whitelist },
                self.coordinator_script.clone(),
                amount_issuer,
                vsize_issuer,
                now_nanos,
            );
            info!(
                "blame round spawned round_id={} blame_of={} whitelist_size={} non_signers={}",
                blame.id(),
                round_id,
                blame.max_input_count(),
                unsigned.len()
            );
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            round.end_with(EndRoundState::NotAllAlicesSign, now_nanos)?;
            inner.rounds.insert(blame.id(), blame);
        } else {
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            round.end_with(EndRoundState::AbortedNotEnoughAlicesSigned, now_nanos)?;
        }
        Ok(())
    }

    /// Step 4: close output registration, append the coordinator output if it
    /// pays for itself, and finalize into a signing-ready transaction.
    fn step_output_registration_round(&self, inner: &mut ArenaInner, round_id: RoundId, now_nanos: u64) -> Result<()> {
        let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        let all_ready = round.input_count() > 0 && round.all_alices_ready_to_sign();
        if !all_ready && !round.phase_time_frame().has_expired(now_nanos) {
            return Ok(());
        }

        let params = round.parameters.clone();
        let mut construction = round.coinjoin().as_construction()?.clone();
        let balance = construction.balance()?;
        let coordinator_fee = params
            .mining_fee(P2WPKH_OUTPUT_VSIZE)?
            .checked_add(Amount::from_sat(1))
            .ok_or_else(|| CoordinatorError::Message("coordinator fee overflow".to_string()))?;
        match balance.checked_sub(coordinator_fee) {
            Some(value) if value >= params.min_output_amount => {
                construction = construction.add_output(TxOut { value, script_pubkey: round.coordinator_script().clone() });
                info!("coordinator output appended round_id={} amount={}", round_id, value);
            }
            _ => {
                debug!("coordinator output skipped round_id={} balance={}", round_id, balance);
            }
        }
        let signing = construction.finalize()?;

        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        round.set_coinjoin(CoinjoinState::Signing(signing));
        round.set_phase(Phase::TransactionSigning, now_nanos)?;
        Ok(())
    }

    /// Step 5: re-validate spend status, evict and ban the unresponsive, and
    /// apply the quorum gate before admitting the round to output
    /// registration.
    async fn step_connection_confirmation_round(&self, inner: &mut ArenaInner, round_id: RoundId, now_nanos: u64) -> Result<()> {
        let (outpoints, confirmed, min_input_count, expired) = {
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            let outpoints: Vec<OutPoint> = round.alices().iter().map(|alice| alice.outpoint()).collect();
            let confirmed: Vec<bool> = round.alices().iter().map(|alice| alice.confirmed_connection).collect();
            (outpoints, confirmed, round.parameters.min_input_count_by_round, round.phase_time_frame().has_expired(now_nanos))
        };

        let statuses = self.bound_by_tick("spend status lookup", spend_statuses(self.rpc.as_ref(), &outpoints)).await?;
        let mut spent = Vec::new();
        let mut spent_confirmed = false;
        for ((outpoint, was_confirmed), status) in outpoints.iter().zip(confirmed.iter()).zip(statuses.iter()) {
            if status.is_none() {
                spent.push(*outpoint);
                spent_confirmed |= *was_confirmed;
            }
        }
        if !spent.is_empty() {
            self.ban_offenders(&spent, Offense::DoubleSpent, round_id, now_nanos);
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            for outpoint in &spent {
                round.evict_alice(outpoint);
                info!("double-spent input evicted round_id={} outpoint={}", round_id, outpoint);
            }
            // A confirmed input is already folded into the transaction under
            // construction; the round cannot continue without it.
            if spent_confirmed {
                round.end_with(EndRoundState::AbortedDoubleSpendingDetected, now_nanos)?;
                return Ok(());
            }
        }

        let (all_confirmed, input_count, laggards) = {
            let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            let laggards: Vec<OutPoint> =
                round.alices().iter().filter(|alice| !alice.confirmed_connection).map(|alice| alice.outpoint()).collect();
            (round.input_count() > 0 && round.all_alices_confirmed(), round.input_count(), laggards)
        };
        if all_confirmed && input_count >= min_input_count {
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            round.set_phase(Phase::OutputRegistration, now_nanos)?;
            return Ok(());
        }

        if expired {
            self.ban_offenders(&laggards, Offense::FailedToConfirm, round_id, now_nanos);
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            for outpoint in &laggards {
                round.evict_alice(outpoint);
                info!("unconfirmed alice evicted round_id={} outpoint={}", round_id, outpoint);
            }
            if round.input_count() >= min_input_count {
                round.set_phase(Phase::OutputRegistration, now_nanos)?;
            } else {
                round.end_with(EndRoundState::AbortedNotEnoughAlices, now_nanos)?;
            }
            return Ok(());
        }

        // Everyone left has confirmed but evictions dropped the round below
        // quorum; waiting longer cannot help.
        if all_confirmed && input_count < min_input_count {
            let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
            round.end_with(EndRoundState::AbortedNotEnoughAlices, now_nanos)?;
        }
        Ok(())
    }

    /// Step 6: close input registration once the window ends, applying the
    /// quorum gate.
    fn step_input_registration_round(&self, inner: &mut ArenaInner, round_id: RoundId, now_nanos: u64) -> Result<()> {
        let round = inner.rounds.get(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        if !round.is_input_registration_ended(now_nanos) {
            return Ok(());
        }
        let min_input_count = round.parameters.min_input_count_by_round;
        let round = inner.rounds.get_mut(&round_id).ok_or(CoordinatorError::RoundNotFound(round_id))?;
        if round.input_count() >= min_input_count {
            round.set_phase(Phase::ConnectionConfirmation, now_nanos)?;
        } else {
            round.end_with(EndRoundState::AbortedNotEnoughAlices, now_nanos)?;
        }
        Ok(())
    }

    /// Step 7: keep `round_parallelization` standard rounds open for
    /// registration, cycling the suggested-amount ladder, and retire empty
    /// lower-tier rounds when a bigger tier opens.
    async fn create_rounds(&self, inner: &mut ArenaInner, now_nanos: u64) {
        let open = inner
            .rounds
            .values()
            .filter(|round| round.phase() == Phase::InputRegistration && !round.is_blame_round())
            .count();
        let needed = self.config.round_parallelization.saturating_sub(open);
        for _ in 0..needed {
            inner.round_counter += 1;
            let tier = inner.suggested.max_suggested_amount(inner.round_counter);
            let mining_fee_rate = match self
                .bound_by_tick("fee estimation", self.rpc.estimate_fee_rate(self.config.fee_estimation_confirmation_target))
                .await
            {
                Ok(rate) => rate,
                Err(err) => {
                    warn!("fee estimation failed, using fallback error={}", err);
                    FeeRate::from_sat_per_vb_unchecked(self.config.fallback_fee_rate_sats_per_vb)
                }
            };
            let params = self.params_factory.create(tier, mining_fee_rate);
            let (amount_issuer, vsize_issuer) = self.issuer_factory.create_issuer_pair();
            let round = Round::new(params, RoundKind::Standard, self.coordinator_script.clone(), amount_issuer, vsize_issuer, now_nanos);
            info!(
                "round created round_id={} round_counter={} max_suggested_amount={} mining_fee_rate_kwu={}",
                round.id(),
                inner.round_counter,
                tier,
                mining_fee_rate.to_sat_per_kwu()
            );

            let stale: Vec<RoundId> = inner
                .rounds
                .values()
                .filter(|other| {
                    other.phase() == Phase::InputRegistration
                        && !other.is_blame_round()
                        && other.input_count() == 0
                        && other.parameters.max_suggested_amount < tier
                })
                .map(|other| other.id())
                .collect();
            for stale_id in stale {
                if let Some(other) = inner.rounds.get_mut(&stale_id) {
                    info!("empty round retired for load balancing round_id={}", stale_id);
                    let _ = other.end_with(EndRoundState::AbortedLoadBalancing, now_nanos);
                }
            }

            inner.rounds.insert(round.id(), round);
        }
    }

    /// Step 8: abort rounds flagged as disrupted since the last tick.
    fn abort_disrupted_rounds(&self, inner: &mut ArenaInner, now_nanos: u64) {
        let flagged: Vec<RoundId> = inner.disrupted.drain().collect();
        for round_id in flagged {
            if let Some(round) = inner.rounds.get_mut(&round_id) {
                if round.phase() != Phase::Ended {
                    warn!("disrupted round aborted round_id={}", round_id);
                    let _ = round.end_with(EndRoundState::AbortedWithError, now_nanos);
                }
            }
        }
    }
}

fn round_ids_in_phase(inner: &ArenaInner, phase: Phase) -> Vec<RoundId> {
    inner.rounds.values().filter(|round| round.phase() == phase).map(|round| round.id()).collect()
}

fn fail_round(inner: &mut ArenaInner, round_id: RoundId, now_nanos: u64, err: &CoordinatorError) {
    warn!("tick step failed round_id={} error={}", round_id, err);
    if let Some(round) = inner.rounds.get_mut(&round_id) {
        if round.phase() != Phase::Ended {
            let _ = round.end_with(EndRoundState::AbortedWithError, now_nanos);
        }
    }
}
