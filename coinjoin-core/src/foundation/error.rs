use crate::foundation::types::RoundId;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    RoundNotFound,
    WrongPhase,
    InputBanned,
    InputNotWhitelisted,
    AliceNotFound,
    AliceAlreadyRegistered,
    InputSpent,
    InputUnconfirmed,
    InputImmature,
    ScriptNotAllowed,
    UneconomicalInput,
    NotEnoughFunds,
    TooMuchFunds,
    TooMuchVsize,
    VsizeQuotaExceeded,
    IncorrectRequestedAmountCredentials,
    IncorrectRequestedVsizeCredentials,
    CredentialCountMismatch,
    DeltaNotZero,
    AlreadyRegisteredScript,
    InvalidInputIndex,
    WitnessAlreadyProvided,
    OwnershipProofInvalid,
    CredentialVerificationFailed,
    InvalidStateTransition,
    RoundFull,
    RpcError,
    ConfigError,
    Message,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    #[error("operation not allowed in phase {phase} (round {round_id})")]
    WrongPhase { round_id: RoundId, phase: String },

    #[error("input banned until {banned_until_nanos}")]
    InputBanned { banned_until_nanos: u64 },

    #[error("input not in blame round whitelist")]
    InputNotWhitelisted,

    #[error("alice not found in round")]
    AliceNotFound,

    #[error("input already registered in a live round")]
    AliceAlreadyRegistered,

    #[error("input is spent or does not exist")]
    InputSpent,

    #[error("input is unconfirmed")]
    InputUnconfirmed,

    #[error("input is an immature coinbase output")]
    InputImmature,

    #[error("script type not allowed")]
    ScriptNotAllowed,

    #[error("input value does not cover its own fees")]
    UneconomicalInput,

    #[error("amount {amount} below round minimum {min}")]
    NotEnoughFunds { amount: u64, min: u64 },

    #[error("amount {amount} exceeds round maximum {max}")]
    TooMuchFunds { amount: u64, max: u64 },

    #[error("input vsize {vsize} exceeds per-alice allocation {max}")]
    TooMuchVsize { vsize: u64, max: u64 },

    #[error("requested vsize {requested} exceeds remaining round budget {remaining}")]
    VsizeQuotaExceeded { requested: u64, remaining: u64 },

    #[error("requested amount credential delta {actual} does not match entitlement {expected}")]
    IncorrectRequestedAmountCredentials { expected: i64, actual: i64 },

    #[error("requested vsize credential delta {actual} does not match entitlement {expected}")]
    IncorrectRequestedVsizeCredentials { expected: i64, actual: i64 },

    #[error("credential count mismatch: expected {expected}, got {actual}")]
    CredentialCountMismatch { expected: usize, actual: usize },

    #[error("reissuance delta must be zero, got {0}")]
    DeltaNotZero(i64),

    #[error("script already registered in a live round or past coinjoin")]
    AlreadyRegisteredScript,

    #[error("invalid input index {0}")]
    InvalidInputIndex(usize),

    #[error("witness already provided for input {input_index}")]
    WitnessAlreadyProvided { input_index: usize },

    #[error("ownership proof verification failed")]
    OwnershipProofInvalid,

    #[error("credential verification failed: {0}")]
    CredentialVerificationFailed(String),

    #[error("invalid phase transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("round input limit reached")]
    RoundFull,

    #[error("chain RPC error: {0}")]
    RpcError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("{0}")]
    Message(String),
}

impl CoordinatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::RoundNotFound(_) => ErrorCode::RoundNotFound,
            CoordinatorError::WrongPhase { .. } => ErrorCode::WrongPhase,
            CoordinatorError::InputBanned { .. } => ErrorCode::InputBanned,
            CoordinatorError::InputNotWhitelisted => ErrorCode::InputNotWhitelisted,
            CoordinatorError::AliceNotFound => ErrorCode::AliceNotFound,
            CoordinatorError::AliceAlreadyRegistered => ErrorCode::AliceAlreadyRegistered,
            CoordinatorError::InputSpent => ErrorCode::InputSpent,
            CoordinatorError::InputUnconfirmed => ErrorCode::InputUnconfirmed,
            CoordinatorError::InputImmature => ErrorCode::InputImmature,
            CoordinatorError::ScriptNotAllowed => ErrorCode::ScriptNotAllowed,
            CoordinatorError::UneconomicalInput => ErrorCode::UneconomicalInput,
            CoordinatorError::NotEnoughFunds { .. } => ErrorCode::NotEnoughFunds,
            CoordinatorError::TooMuchFunds { .. } => ErrorCode::TooMuchFunds,
            CoordinatorError::TooMuchVsize { .. } => ErrorCode::TooMuchVsize,
            CoordinatorError::VsizeQuotaExceeded { .. } => ErrorCode::VsizeQuotaExceeded,
            CoordinatorError::IncorrectRequestedAmountCredentials { .. } => ErrorCode::IncorrectRequestedAmountCredentials,
            CoordinatorError::IncorrectRequestedVsizeCredentials { .. } => ErrorCode::IncorrectRequestedVsizeCredentials,
            CoordinatorError::CredentialCountMismatch { .. } => ErrorCode::CredentialCountMismatch,
            CoordinatorError::DeltaNotZero(_) => ErrorCode::DeltaNotZero,
            CoordinatorError::AlreadyRegisteredScript => ErrorCode::AlreadyRegisteredScript,
            CoordinatorError::InvalidInputIndex(_) => ErrorCode::InvalidInputIndex,
            CoordinatorError::WitnessAlreadyProvided { .. } => ErrorCode::WitnessAlreadyProvided,
            CoordinatorError::OwnershipProofInvalid => ErrorCode::OwnershipProofInvalid,
            CoordinatorError::CredentialVerificationFailed(_) => ErrorCode::CredentialVerificationFailed,
            CoordinatorError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            CoordinatorError::RoundFull => ErrorCode::RoundFull,
            CoordinatorError::RpcError(_) => ErrorCode::RpcError,
            CoordinatorError::ConfigError(_) => ErrorCode::ConfigError,
            CoordinatorError::Message(_) => ErrorCode::Message,
        }
    }

    pub fn context(&self) -> ErrorContext {
        ErrorContext { code: self.code(), message: self.to_string() }
    }

    /// True for failures that prove the client sent something it could not
    /// have produced honestly. These ban the offending input for the round;
    /// ordinary protocol violations and economic rejections never do.
    pub fn evidences_clear_misbehavior(&self) -> bool {
        matches!(
            self,
            CoordinatorError::OwnershipProofInvalid | CoordinatorError::CredentialVerificationFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misbehavior_classification() {
        assert!(CoordinatorError::OwnershipProofInvalid.evidences_clear_misbehavior());
        assert!(CoordinatorError::CredentialVerificationFailed("mac".to_string()).evidences_clear_misbehavior());
        assert!(!CoordinatorError::NotEnoughFunds { amount: 1, min: 2 }.evidences_clear_misbehavior());
        assert!(!CoordinatorError::IncorrectRequestedAmountCredentials { expected: 5, actual: 6 }.evidences_clear_misbehavior());
    }

    #[test]
    fn context_carries_code_and_message() {
        let ctx = CoordinatorError::DeltaNotZero(-4).context();
        assert_eq!(ctx.code, ErrorCode::DeltaNotZero);
        assert!(ctx.message.contains("-4"));
    }
}
