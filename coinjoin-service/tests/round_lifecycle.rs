mod support;

use coinjoin_core::domain::{EndRoundState, Phase};
use coinjoin_service::RoundStateCheckpoint;
use support::*;

#[tokio::test]
async fn round_without_quorum_aborts_on_registration_timeout() {
    let harness = harness(test_config(2, 5));
    tick(&harness, harness.start_nanos).await;
    let round_id = open_round(&harness).round_id;

    let outpoint = fund(&harness, 1, INPUT_SATS);
    register(&harness, round_id, outpoint).await.expect("register");

    tick(&harness, harness.start_nanos + secs(101)).await;
    let state = round_state(&harness, round_id);
    assert_eq!(state.phase, Phase::Ended);
    assert_eq!(state.end_state, Some(EndRoundState::AbortedNotEnoughAlices));

    // A replacement round opened in the same tick.
    assert_ne!(open_round(&harness).round_id, round_id);
}

#[tokio::test]
async fn two_party_coinjoin_broadcasts() {
    let mut harness = harness(test_config(2, 2));
    let op1 = fund(&harness, 1, INPUT_SATS);
    let op2 = fund(&harness, 2, INPUT_SATS);
    let (round_id, t1) = advance_to_connection_confirmation(&harness, &[op1, op2]).await;

    let confirmed = confirm(&harness, round_id, op1, INPUT_SATS).await.expect("confirm 1");
    assert!(confirmed.real_amount_credentials.is_some());
    confirm(&harness, round_id, op2, INPUT_SATS).await.expect("confirm 2");

    let t2 = t1 + secs(1);
    tick(&harness, t2).await;
    assert_eq!(round_state(&harness, round_id).phase, Phase::OutputRegistration);

    register_output(&harness, round_id, 11, 999_000).await.expect("bob 1");
    register_output(&harness, round_id, 12, 999_000).await.expect("bob 2");
    ready_to_sign(&harness, round_id, op1).await.expect("ready 1");
    ready_to_sign(&harness, round_id, op2).await.expect("ready 2");

    let t3 = t2 + secs(1);
    tick(&harness, t3).await;
    assert_eq!(round_state(&harness, round_id).phase, Phase::TransactionSigning);

    sign(&harness, round_id, op1).await.expect("sign 1");
    sign(&harness, round_id, op2).await.expect("sign 2");

    let t4 = t3 + secs(1);
    tick(&harness, t4).await;
    let state = round_state(&harness, round_id);
    assert_eq!(state.end_state, Some(EndRoundState::TransactionBroadcasted));

    // The status snapshot carries the full ordered phase history.
    let phases: Vec<Phase> = state.phase_history.iter().map(|(phase, _)| *phase).collect();
    assert_eq!(
        phases,
        vec![
            Phase::InputRegistration,
            Phase::ConnectionConfirmation,
            Phase::OutputRegistration,
            Phase::TransactionSigning,
            Phase::Ended,
        ]
    );
    assert!(state.phase_history.windows(2).all(|pair| pair[0].1 <= pair[1].1));

    let event = harness.broadcasts.try_recv().expect("broadcast event");
    assert_eq!(event.round_id, round_id);
    assert_eq!(event.transaction.input.len(), 2);
    // The leftover balance is below the minimum output, so no coordinator
    // output was appended.
    assert_eq!(event.transaction.output.len(), 2);
    assert_eq!(harness.rpc.broadcast_transactions().len(), 1);

    // Idempotent re-tick: no duplicate broadcast, no further advancement.
    tick(&harness, t4 + secs(1)).await;
    assert_eq!(harness.rpc.broadcast_transactions().len(), 1);
    assert!(harness.broadcasts.try_recv().is_err());
    assert_eq!(round_state(&harness, round_id).end_state, Some(EndRoundState::TransactionBroadcasted));
}

#[tokio::test]
async fn coordinator_output_appended_when_it_pays_for_itself() {
    let mut harness = harness(test_config(2, 3));
    let op1 = fund(&harness, 1, INPUT_SATS);
    let op2 = fund(&harness, 2, INPUT_SATS);
    let op3 = fund(&harness, 3, INPUT_SATS);
    let (round_id, t1) = advance_to_connection_confirmation(&harness, &[op1, op2, op3]).await;

    for op in [op1, op2, op3] {
        confirm(&harness, round_id, op, INPUT_SATS).await.expect("confirm");
    }
    let t2 = t1 + secs(1);
    tick(&harness, t2).await;

    // One small bob output leaves a balance well above the minimum.
    register_output(&harness, round_id, 11, 2_990_000).await.expect("bob");
    for op in [op1, op2, op3] {
        ready_to_sign(&harness, round_id, op).await.expect("ready");
    }
    let t3 = t2 + secs(1);
    tick(&harness, t3).await;

    for op in [op1, op2, op3] {
        sign(&harness, round_id, op).await.expect("sign");
    }
    let t4 = t3 + secs(1);
    tick(&harness, t4).await;

    let event = harness.broadcasts.try_recv().expect("broadcast event");
    let coordinator_script = harness.config.coordinator_script().expect("script");
    let coordinator_output = event
        .transaction
        .output
        .iter()
        .find(|output| output.script_pubkey == coordinator_script)
        .expect("coordinator output");
    // balance 9_508 minus the output's own mining fee (62) minus 1 sat.
    assert_eq!(coordinator_output.value.to_sat(), 9_445);

    // Conservation: inputs minus outputs equals the estimated mining fee
    // (3 inputs, 2 outputs at 2 sat/vb) within the 1 sat remainder.
    let total_out: u64 = event.transaction.output.iter().map(|output| output.value.to_sat()).sum();
    let estimated_fee = TEST_FEE_RATE_SAT_PER_VB * (11 + 3 * 68 + 2 * 31);
    assert_eq!(3_000_000 - total_out, estimated_fee + 1);
}

#[tokio::test]
async fn bigger_tier_retires_empty_base_round() {
    let mut config = test_config(2, 2);
    config.round_parallelization = 2;
    let harness = harness(config);

    tick(&harness, harness.start_nanos).await;
    let states = all_rounds(&harness);
    let retired: Vec<_> = states.iter().filter(|s| s.end_state == Some(EndRoundState::AbortedLoadBalancing)).collect();
    let open: Vec<_> = states.iter().filter(|s| s.phase == Phase::InputRegistration).collect();
    assert_eq!(retired.len(), 1);
    assert_eq!(open.len(), 1);
    assert!(open[0].parameters.max_suggested_amount > retired[0].parameters.max_suggested_amount);

    // The next tick replenishes a base-tier round without touching the
    // higher-tier one.
    tick(&harness, harness.start_nanos + secs(1)).await;
    let open: Vec<_> = all_rounds(&harness).into_iter().filter(|s| s.phase == Phase::InputRegistration).collect();
    assert_eq!(open.len(), 2);
    assert_ne!(open[0].parameters.max_suggested_amount, open[1].parameters.max_suggested_amount);
}

#[tokio::test]
async fn status_returns_only_rounds_past_the_checkpoint() {
    let harness = harness(test_config(2, 5));
    tick(&harness, harness.start_nanos).await;
    let state = open_round(&harness);
    let checkpoint = RoundStateCheckpoint { round_id: state.round_id, state_id: state.state_id };
    assert!(harness.arena.get_status(&[checkpoint]).is_empty());

    let outpoint = fund(&harness, 1, INPUT_SATS);
    register(&harness, state.round_id, outpoint).await.expect("register");
    tick(&harness, harness.start_nanos + secs(1)).await;

    let moved = harness.arena.get_status(&[checkpoint]);
    assert_eq!(moved.len(), 1);
    assert!(moved[0].state_id > checkpoint.state_id);
    assert_eq!(moved[0].input_count, 1);
}
