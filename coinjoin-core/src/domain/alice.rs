use crate::domain::coin::{Coin, OwnershipProof};
use crate::domain::params::RoundParameters;
use crate::foundation::Result;
use bitcoin::{Amount, OutPoint};

/// Mutable state of a registered input participant within one round.
#[derive(Clone, Debug)]
pub struct Alice {
    pub coin: Coin,
    pub ownership_proof: OwnershipProof,
    pub deadline_nanos: u64,
    pub confirmed_connection: bool,
    pub ready_to_sign: bool,
    pub is_coordination_fee_exempted: bool,
    pub registered_at_nanos: u64,
}

impl Alice {
    pub fn new(coin: Coin, ownership_proof: OwnershipProof, is_coordination_fee_exempted: bool, now_nanos: u64) -> Self {
        Self {
            coin,
            ownership_proof,
            deadline_nanos: now_nanos,
            confirmed_connection: false,
            ready_to_sign: false,
            is_coordination_fee_exempted,
            registered_at_nanos: now_nanos,
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        self.coin.outpoint
    }

    pub fn total_input_amount(&self) -> Amount {
        self.coin.amount()
    }

    pub fn total_input_vsize(&self) -> Result<u64> {
        self.coin.spend_vsize()
    }

    /// A participant who stops responding before confirming is evicted by the
    /// next tick after this deadline. Confirmation attempts refresh it.
    pub fn set_deadline(&mut self, now_nanos: u64, connection_confirmation_timeout_nanos: u64) {
        self.deadline_nanos = now_nanos.saturating_add(connection_confirmation_timeout_nanos / 2);
    }

    pub fn deadline_expired(&self, now_nanos: u64) -> bool {
        now_nanos >= self.deadline_nanos
    }

    pub fn coordination_fee(&self, params: &RoundParameters) -> Amount {
        if self.is_coordination_fee_exempted {
            Amount::ZERO
        } else {
            params.coordination_fee_rate.fee(self.total_input_amount())
        }
    }

    /// Amount credential entitlement: input value minus mining fee for the
    /// input's vsize minus the coordination fee. Registration guarantees this
    /// is positive.
    pub fn remaining_amount(&self, params: &RoundParameters) -> Result<Amount> {
        let mining_fee = params.mining_fee(self.total_input_vsize()?)?;
        let after_mining = self.total_input_amount().checked_sub(mining_fee).unwrap_or(Amount::ZERO);
        Ok(after_mining.checked_sub(self.coordination_fee(params)).unwrap_or(Amount::ZERO))
    }

    /// Vsize credential entitlement: per-alice allocation minus the vsize the
    /// input itself consumes.
    pub fn remaining_vsize(&self, params: &RoundParameters) -> Result<u64> {
        Ok(params.max_vsize_allocation_per_alice.saturating_sub(self.total_input_vsize()?))
    }
}
