use crate::foundation::constants::P2WPKH_OUTPUT_VSIZE;
use crate::foundation::{CoordinatorError, Result};
use bitcoin::{Amount, ScriptBuf, TxOut};

/// A registered output participant: destination script plus the net
/// credential-derived amount. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bob {
    pub script: ScriptBuf,
    pub amount: Amount,
}

impl Bob {
    pub fn new(script: ScriptBuf, amount: Amount) -> Result<Self> {
        if !script.is_p2wpkh() {
            return Err(CoordinatorError::ScriptNotAllowed);
        }
        Ok(Self { script, amount })
    }

    pub fn output_vsize(&self) -> u64 {
        P2WPKH_OUTPUT_VSIZE
    }

    pub fn to_tx_out(&self) -> TxOut {
        TxOut { value: self.amount, script_pubkey: self.script.clone() }
    }
}
