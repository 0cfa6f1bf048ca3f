use crate::foundation::constants::CREDENTIAL_NUMBER;
use crate::foundation::{CoordinatorError, Hash32, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque client-side presentation of a previously issued credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPresentation(pub Vec<u8>);

/// Opaque blinded request for a new credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequestItem(pub Vec<u8>);

/// Opaque issued credential.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential(pub Vec<u8>);

/// Request envelope shared by the amount and vsize issuers. The engine only
/// understands the arithmetic contract: `delta` is the net value the client
/// claims for the issuance, and real requests carry exactly
/// `CREDENTIAL_NUMBER` presented and requested items.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub delta: i64,
    pub presented: Vec<CredentialPresentation>,
    pub requested: Vec<CredentialRequestItem>,
}

impl CredentialsRequest {
    /// Zero requests prove nothing about balance: nothing presented, delta 0.
    pub fn validate_zero(&self) -> Result<()> {
        if self.requested.len() != CREDENTIAL_NUMBER {
            return Err(CoordinatorError::CredentialCountMismatch { expected: CREDENTIAL_NUMBER, actual: self.requested.len() });
        }
        if !self.presented.is_empty() {
            return Err(CoordinatorError::CredentialCountMismatch { expected: 0, actual: self.presented.len() });
        }
        if self.delta != 0 {
            return Err(CoordinatorError::DeltaNotZero(self.delta));
        }
        Ok(())
    }

    pub fn validate_real(&self) -> Result<()> {
        if self.requested.len() != CREDENTIAL_NUMBER {
            return Err(CoordinatorError::CredentialCountMismatch { expected: CREDENTIAL_NUMBER, actual: self.requested.len() });
        }
        if self.presented.len() != CREDENTIAL_NUMBER {
            return Err(CoordinatorError::CredentialCountMismatch { expected: CREDENTIAL_NUMBER, actual: self.presented.len() });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsResponse {
    pub issued: Vec<Credential>,
}

/// External cryptographic collaborator. One instance handles amounts, one
/// handles vsizes; each round gets a fresh pair so its public parameters
/// contribute entropy to the round id.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    fn public_parameters(&self) -> Hash32;
    async fn handle_zero_request(&self, request: &CredentialsRequest) -> Result<CredentialsResponse>;
    async fn handle_real_request(&self, request: &CredentialsRequest) -> Result<CredentialsResponse>;
}

pub trait IssuerFactory: Send + Sync {
    /// Fresh (amount, vsize) issuer pair for a new round.
    fn create_issuer_pair(&self) -> (Arc<dyn CredentialIssuer>, Arc<dyn CredentialIssuer>);
}

/// In-memory issuer double: validates envelopes, hands out deterministic
/// dummy credentials, and can be toggled to fail verification.
pub struct InMemoryIssuer {
    public_parameters: Hash32,
    issued: AtomicU64,
    fail_verification: AtomicBool,
}

impl InMemoryIssuer {
    pub fn new(public_parameters: Hash32) -> Self {
        Self { public_parameters, issued: AtomicU64::new(0), fail_verification: AtomicBool::new(false) }
    }

    pub fn set_fail_verification(&self, fail: bool) {
        self.fail_verification.store(fail, Ordering::Relaxed);
    }

    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    fn issue(&self) -> CredentialsResponse {
        let serial = self.issued.fetch_add(1, Ordering::Relaxed);
        let issued = (0..CREDENTIAL_NUMBER)
            .map(|index| {
                let mut hasher = blake3::Hasher::new();
                hasher.update(&self.public_parameters);
                hasher.update(&serial.to_le_bytes());
                hasher.update(&(index as u64).to_le_bytes());
                Credential(hasher.finalize().as_bytes().to_vec())
            })
            .collect();
        CredentialsResponse { issued }
    }
}

#[async_trait]
impl CredentialIssuer for InMemoryIssuer {
    fn public_parameters(&self) -> Hash32 {
        self.public_parameters
    }

    async fn handle_zero_request(&self, request: &CredentialsRequest) -> Result<CredentialsResponse> {
        request.validate_zero()?;
        Ok(self.issue())
    }

    async fn handle_real_request(&self, request: &CredentialsRequest) -> Result<CredentialsResponse> {
        request.validate_real()?;
        if self.fail_verification.load(Ordering::Relaxed) {
            return Err(CoordinatorError::CredentialVerificationFailed("presentation MAC invalid".to_string()));
        }
        Ok(self.issue())
    }
}

/// Factory producing random-parameter in-memory issuer pairs, with an
/// optional verification-failure toggle inherited by every issued pair.
pub struct InMemoryIssuerFactory {
    fail_verification: AtomicBool,
}

impl InMemoryIssuerFactory {
    pub fn new() -> Self {
        Self { fail_verification: AtomicBool::new(false) }
    }

    pub fn set_fail_verification(&self, fail: bool) {
        self.fail_verification.store(fail, Ordering::Relaxed);
    }
}

impl Default for InMemoryIssuerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuerFactory for InMemoryIssuerFactory {
    fn create_issuer_pair(&self) -> (Arc<dyn CredentialIssuer>, Arc<dyn CredentialIssuer>) {
        let amount = InMemoryIssuer::new(rand::random());
        let vsize = InMemoryIssuer::new(rand::random());
        let fail = self.fail_verification.load(Ordering::Relaxed);
        amount.set_fail_verification(fail);
        vsize.set_fail_verification(fail);
        (Arc::new(amount), Arc::new(vsize))
    }
}

/// Builds a structurally-valid request envelope for the given delta. Clients
/// do this with real cryptography; tests and local runs use this helper.
pub fn dummy_request(delta: i64, zero: bool) -> CredentialsRequest {
    CredentialsRequest {
        delta,
        presented: if zero { Vec::new() } else { vec![CredentialPresentation(vec![1]); CREDENTIAL_NUMBER] },
        requested: vec![CredentialRequestItem(vec![2]); CREDENTIAL_NUMBER],
    }
}
