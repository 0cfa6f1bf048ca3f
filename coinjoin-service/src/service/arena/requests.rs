use bitcoin::{Amount, OutPoint, ScriptBuf, Witness};
use coinjoin_core::domain::OwnershipProof;
use coinjoin_core::foundation::RoundId;
use coinjoin_core::infrastructure::credentials::{CredentialsRequest, CredentialsResponse};
use serde::{Deserialize, Serialize};

/// Typed envelopes for the participant-facing Arena operations. These are the
/// operation contracts, not a wire format; an outer transport layer decides
/// how they travel.

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputRegistrationRequest {
    pub round_id: RoundId,
    pub outpoint: OutPoint,
    pub ownership_proof: OwnershipProof,
    pub zero_amount_credentials: CredentialsRequest,
    pub zero_vsize_credentials: CredentialsRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputRegistrationResponse {
    pub round_id: RoundId,
    pub zero_amount_credentials: CredentialsResponse,
    pub zero_vsize_credentials: CredentialsResponse,
    /// Deadline by which the participant must confirm (or keep-alive) before
    /// the next tick evicts it.
    pub confirm_by_nanos: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationRequest {
    pub round_id: RoundId,
    pub outpoint: OutPoint,
    pub zero_amount_credentials: CredentialsRequest,
    pub zero_vsize_credentials: CredentialsRequest,
    /// Real-value requests; only honored once the round has left input
    /// registration, and only when the deltas equal the computed entitlement.
    pub real_amount_credentials: CredentialsRequest,
    pub real_vsize_credentials: CredentialsRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationResponse {
    pub zero_amount_credentials: CredentialsResponse,
    pub zero_vsize_credentials: CredentialsResponse,
    /// Present exactly when the confirmation was final (round past input
    /// registration); absent for a keep-alive confirmation.
    pub real_amount_credentials: Option<CredentialsResponse>,
    pub real_vsize_credentials: Option<CredentialsResponse>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputRegistrationRequest {
    pub round_id: RoundId,
    pub script: ScriptBuf,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub amount: Amount,
    /// Must spend exactly `amount` (delta = -amount).
    pub amount_credentials: CredentialsRequest,
    /// Must spend exactly the output's vsize cost (delta = -vsize).
    pub vsize_credentials: CredentialsRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadyToSignRequest {
    pub round_id: RoundId,
    pub outpoint: OutPoint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionSignatureRequest {
    pub round_id: RoundId,
    pub outpoint: OutPoint,
    pub witness: Witness,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReissuanceRequest {
    pub round_id: RoundId,
    /// Zero-sum swap: delta must be exactly 0 on both.
    pub amount_credentials: CredentialsRequest,
    pub vsize_credentials: CredentialsRequest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReissuanceResponse {
    pub amount_credentials: CredentialsResponse,
    pub vsize_credentials: CredentialsResponse,
}
