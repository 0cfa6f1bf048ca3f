use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed forward-only phase sequence of a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    #[default]
    InputRegistration = 0,
    ConnectionConfirmation = 1,
    OutputRegistration = 2,
    TransactionSigning = 3,
    Ended = 4,
}

impl Phase {
    pub fn can_transition_to(self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, target),
            (InputRegistration, ConnectionConfirmation)
                | (InputRegistration, Ended)
                | (ConnectionConfirmation, OutputRegistration)
                | (ConnectionConfirmation, Ended)
                | (OutputRegistration, TransactionSigning)
                | (OutputRegistration, Ended)
                | (TransactionSigning, Ended)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::InputRegistration => "input_registration",
            Phase::ConnectionConfirmation => "connection_confirmation",
            Phase::OutputRegistration => "output_registration",
            Phase::TransactionSigning => "transaction_signing",
            Phase::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Outcome tag recorded when a round reaches `Phase::Ended`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndRoundState {
    TransactionBroadcasted,
    TransactionBroadcastFailed,
    AbortedNotEnoughAlices,
    AbortedNotEnoughAlicesSigned,
    NotAllAlicesSign,
    AbortedWithError,
    AbortedLoadBalancing,
    AbortedDoubleSpendingDetected,
}

impl EndRoundState {
    /// Only a broadcast round contributes to the past-coinjoin history used
    /// for fee exemption and script-reuse rejection.
    pub fn is_success(self) -> bool {
        matches!(self, EndRoundState::TransactionBroadcasted)
    }
}

impl fmt::Display for EndRoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndRoundState::TransactionBroadcasted => "transaction_broadcasted",
            EndRoundState::TransactionBroadcastFailed => "transaction_broadcast_failed",
            EndRoundState::AbortedNotEnoughAlices => "aborted_not_enough_alices",
            EndRoundState::AbortedNotEnoughAlicesSigned => "aborted_not_enough_alices_signed",
            EndRoundState::NotAllAlicesSign => "not_all_alices_sign",
            EndRoundState::AbortedWithError => "aborted_with_error",
            EndRoundState::AbortedLoadBalancing => "aborted_load_balancing",
            EndRoundState::AbortedDoubleSpendingDetected => "aborted_double_spending_detected",
        };
        f.write_str(name)
    }
}
