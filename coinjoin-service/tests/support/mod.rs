#![allow(dead_code)]

use bitcoin::hashes::Hash;
use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, TxOut, Txid, WPubkeyHash, Witness};
use coinjoin_core::domain::{OwnershipProof, Phase, Prison};
use coinjoin_core::foundation::constants::{NANOS_PER_SEC, P2WPKH_INPUT_VSIZE};
use coinjoin_core::foundation::{now_nanos, Result, RoundId};
use coinjoin_core::infrastructure::config::CoordinatorConfig;
use coinjoin_core::infrastructure::credentials::{dummy_request, InMemoryIssuerFactory};
use coinjoin_core::infrastructure::rpc::{InMemoryRpc, SpendStatus};
use coinjoin_service::requests::{
    ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest, InputRegistrationResponse,
    OutputRegistrationRequest, ReadyToSignRequest, TransactionSignatureRequest,
};
use coinjoin_service::{Arena, CoinjoinBroadcast, RoundState};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub const INPUT_SATS: u64 = 1_000_000;
pub const TEST_FEE_RATE_SAT_PER_VB: u64 = 2;

/// Mining fee one P2WPKH input owes at the test fee rate.
pub const INPUT_MINING_FEE: u64 = TEST_FEE_RATE_SAT_PER_VB * P2WPKH_INPUT_VSIZE;

pub struct Harness {
    pub arena: Arc<Arena>,
    pub rpc: Arc<InMemoryRpc>,
    pub prison: Arc<Prison>,
    pub issuers: Arc<InMemoryIssuerFactory>,
    pub broadcasts: UnboundedReceiver<CoinjoinBroadcast>,
    pub config: CoordinatorConfig,
    /// Synthetic tick clock origin; handlers still read the wall clock, so
    /// test timeouts are long enough that only explicit tick times expire
    /// them.
    pub start_nanos: u64,
}

pub fn secs(value: u64) -> u64 {
    value * NANOS_PER_SEC
}

pub fn test_config(min_inputs: usize, max_inputs: usize) -> CoordinatorConfig {
    let mut config = CoordinatorConfig::default();
    config.min_input_count_by_round = min_inputs;
    config.max_input_count_by_round = max_inputs;
    config.coordination_fee_rate = 0.0;
    config.round_parallelization = 1;
    config.standard_input_registration_timeout_secs = 100;
    config.blame_input_registration_timeout_secs = 50;
    config.connection_confirmation_timeout_secs = 10_000;
    config.output_registration_timeout_secs = 10_000;
    config.transaction_signing_timeout_secs = 10_000;
    config.round_expiry_timeout_secs = 100_000;
    config
}

pub fn harness(config: CoordinatorConfig) -> Harness {
    let rpc = Arc::new(InMemoryRpc::new(FeeRate::from_sat_per_vb_unchecked(TEST_FEE_RATE_SAT_PER_VB)));
    let prison = Arc::new(Prison::new(config.punitive_ban_secs, config.backend_stability_ban_secs));
    let issuers = Arc::new(InMemoryIssuerFactory::new());
    let (arena, broadcasts) = Arena::new(config.clone(), rpc.clone(), prison.clone(), issuers.clone()).expect("arena");
    Harness { arena, rpc, prison, issuers, broadcasts, config, start_nanos: now_nanos() }
}

pub fn test_outpoint(tag: u8) -> OutPoint {
    OutPoint { txid: Txid::from_byte_array([tag; 32]), vout: 0 }
}

pub fn p2wpkh_script(tag: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([tag; 20]))
}

/// Inserts a confirmed P2WPKH utxo and returns its outpoint.
pub fn fund(harness: &Harness, tag: u8, sats: u64) -> OutPoint {
    let outpoint = test_outpoint(tag);
    harness.rpc.insert_utxo(
        outpoint,
        SpendStatus { confirmations: 6, is_coinbase: false, tx_out: TxOut { value: Amount::from_sat(sats), script_pubkey: p2wpkh_script(tag) } },
    );
    outpoint
}

pub fn test_witness() -> Witness {
    Witness::from_slice(&[vec![1u8; 71], vec![2u8; 33]])
}

pub fn all_rounds(harness: &Harness) -> Vec<RoundState> {
    harness.arena.get_status(&[])
}

pub fn round_state(harness: &Harness, round_id: RoundId) -> RoundState {
    all_rounds(harness).into_iter().find(|state| state.round_id == round_id).expect("round in snapshot")
}

/// The (single) standard round currently open for registration.
pub fn open_round(harness: &Harness) -> RoundState {
    all_rounds(harness)
        .into_iter()
        .find(|state| state.phase == Phase::InputRegistration && !state.is_blame_round)
        .expect("open standard round")
}

pub fn blame_round(harness: &Harness) -> RoundState {
    all_rounds(harness).into_iter().find(|state| state.is_blame_round).expect("blame round")
}

pub async fn register(harness: &Harness, round_id: RoundId, outpoint: OutPoint) -> Result<InputRegistrationResponse> {
    harness
        .arena
        .register_input(InputRegistrationRequest {
            round_id,
            outpoint,
            ownership_proof: OwnershipProof(vec![0xAB]),
            zero_amount_credentials: dummy_request(0, true),
            zero_vsize_credentials: dummy_request(0, true),
        })
        .await
}

/// Final confirmation with the exact entitlement deltas for a plain input of
/// `sats` (no coordination fee in the test config).
pub async fn confirm(harness: &Harness, round_id: RoundId, outpoint: OutPoint, sats: u64) -> Result<ConnectionConfirmationResponse> {
    confirm_with_delta(harness, round_id, outpoint, sats as i64 - INPUT_MINING_FEE as i64).await
}

pub async fn confirm_with_delta(
    harness: &Harness,
    round_id: RoundId,
    outpoint: OutPoint,
    amount_delta: i64,
) -> Result<ConnectionConfirmationResponse> {
    let vsize_delta = (harness.config.max_vsize_allocation_per_alice - P2WPKH_INPUT_VSIZE) as i64;
    harness
        .arena
        .confirm_connection(ConnectionConfirmationRequest {
            round_id,
            outpoint,
            zero_amount_credentials: dummy_request(0, true),
            zero_vsize_credentials: dummy_request(0, true),
            real_amount_credentials: dummy_request(amount_delta, false),
            real_vsize_credentials: dummy_request(vsize_delta, false),
        })
        .await
}

pub async fn register_output(harness: &Harness, round_id: RoundId, script_tag: u8, sats: u64) -> Result<()> {
    harness
        .arena
        .register_output(OutputRegistrationRequest {
            round_id,
            script: p2wpkh_script(script_tag),
            amount: Amount::from_sat(sats),
            amount_credentials: dummy_request(-(sats as i64), false),
            vsize_credentials: dummy_request(-31, false),
        })
        .await
}

pub async fn ready_to_sign(harness: &Harness, round_id: RoundId, outpoint: OutPoint) -> Result<()> {
    harness.arena.ready_to_sign(ReadyToSignRequest { round_id, outpoint }).await
}

pub async fn sign(harness: &Harness, round_id: RoundId, outpoint: OutPoint) -> Result<()> {
    harness
        .arena
        .sign_transaction(TransactionSignatureRequest { round_id, outpoint, witness: test_witness() })
        .await
}

pub async fn tick(harness: &Harness, now_nanos: u64) {
    harness.arena.action(now_nanos).await;
}

/// Drives one full two-party coinjoin to broadcast and returns the txid plus
/// the time of the broadcasting tick. Requires a config with a quorum of two
/// and input amounts at or below any plebs threshold.
pub async fn run_coinjoin(harness: &mut Harness) -> (Txid, u64) {
    let op1 = fund(harness, 101, INPUT_SATS);
    let op2 = fund(harness, 102, INPUT_SATS);
    let (round_id, t1) = advance_to_connection_confirmation(harness, &[op1, op2]).await;
    confirm(harness, round_id, op1, INPUT_SATS).await.expect("confirm 1");
    confirm(harness, round_id, op2, INPUT_SATS).await.expect("confirm 2");
    let t2 = t1 + secs(1);
    tick(harness, t2).await;
    register_output(harness, round_id, 111, 999_000).await.expect("bob 1");
    register_output(harness, round_id, 112, 999_000).await.expect("bob 2");
    ready_to_sign(harness, round_id, op1).await.expect("ready 1");
    ready_to_sign(harness, round_id, op2).await.expect("ready 2");
    let t3 = t2 + secs(1);
    tick(harness, t3).await;
    sign(harness, round_id, op1).await.expect("sign 1");
    sign(harness, round_id, op2).await.expect("sign 2");
    let t4 = t3 + secs(1);
    tick(harness, t4).await;
    let event = harness.broadcasts.try_recv().expect("broadcast event");
    assert_eq!(event.round_id, round_id);
    (event.txid, t4)
}

/// Drives a fresh harness to an open ConnectionConfirmation round with the
/// given funded inputs registered. Returns the round id and the tick time at
/// which the phase flip happened.
pub async fn advance_to_connection_confirmation(harness: &Harness, outpoints: &[OutPoint]) -> (RoundId, u64) {
    tick(harness, harness.start_nanos).await;
    let round_id = open_round(harness).round_id;
    for outpoint in outpoints {
        register(harness, round_id, *outpoint).await.expect("register input");
    }
    let flip_nanos = harness.start_nanos + secs(101);
    tick(harness, flip_nanos).await;
    assert_eq!(round_state(harness, round_id).phase, Phase::ConnectionConfirmation);
    (round_id, flip_nanos)
}
