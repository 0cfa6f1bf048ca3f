use crate::foundation::constants::P2WPKH_INPUT_VSIZE;
use crate::foundation::{CoordinatorError, Result};
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut};
use serde::{Deserialize, Serialize};

/// The unspent output an Alice registers as a coinjoin input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub tx_out: TxOut,
}

impl Coin {
    pub fn new(outpoint: OutPoint, tx_out: TxOut) -> Self {
        Self { outpoint, tx_out }
    }

    pub fn amount(&self) -> Amount {
        self.tx_out.value
    }

    pub fn script_pubkey(&self) -> &ScriptBuf {
        &self.tx_out.script_pubkey
    }

    /// Virtual size of spending this coin. Only P2WPKH is admitted.
    pub fn spend_vsize(&self) -> Result<u64> {
        if self.tx_out.script_pubkey.is_p2wpkh() {
            Ok(P2WPKH_INPUT_VSIZE)
        } else {
            Err(CoordinatorError::ScriptNotAllowed)
        }
    }
}

/// Opaque proof that the registrant controls the coin. Verified by an
/// external collaborator; the engine only rejects structurally-impossible
/// envelopes, which is classified as clear misbehavior.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipProof(pub Vec<u8>);

impl OwnershipProof {
    pub fn validate_envelope(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(CoordinatorError::OwnershipProofInvalid);
        }
        Ok(())
    }
}
