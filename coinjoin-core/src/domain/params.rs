use crate::foundation::constants::SHARED_TX_OVERHEAD_VSIZE;
use crate::foundation::{CoordinatorError, Result};
use crate::infrastructure::config::CoordinatorConfig;
use bitcoin::{Amount, FeeRate};
use serde::{Deserialize, Serialize};

/// Per-input coordinator fee. Inputs at or below the plebs-don't-pay
/// threshold, and inputs traceable to a past coinjoin, pay nothing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordinationFeeRate {
    pub rate: f64,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub plebs_dont_pay_threshold: Amount,
}

impl CoordinationFeeRate {
    pub const fn zero() -> Self {
        Self { rate: 0.0, plebs_dont_pay_threshold: Amount::ZERO }
    }

    pub fn fee(&self, amount: Amount) -> Amount {
        if amount <= self.plebs_dont_pay_threshold {
            return Amount::ZERO;
        }
        Amount::from_sat((amount.to_sat() as f64 * self.rate).floor() as u64)
    }
}

/// Immutable economic and protocol configuration of a single round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundParameters {
    pub mining_fee_rate: FeeRate,
    pub coordination_fee_rate: CoordinationFeeRate,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub max_suggested_amount: Amount,
    pub min_input_count_by_round: usize,
    pub max_input_count_by_round: usize,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_registrable_amount: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub max_registrable_amount: Amount,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_output_amount: Amount,
    pub max_transaction_vsize: u64,
    pub max_vsize_allocation_per_alice: u64,
    pub input_registration_timeout_nanos: u64,
    pub blame_input_registration_timeout_nanos: u64,
    pub connection_confirmation_timeout_nanos: u64,
    pub output_registration_timeout_nanos: u64,
    pub transaction_signing_timeout_nanos: u64,
    pub round_expiry_timeout_nanos: u64,
}

impl RoundParameters {
    /// Vsize budget available to inputs once the shared transaction overhead
    /// is reserved.
    pub fn initial_input_vsize_allocation(&self) -> u64 {
        self.max_transaction_vsize.saturating_sub(SHARED_TX_OVERHEAD_VSIZE)
    }

    pub fn mining_fee(&self, vsize: u64) -> Result<Amount> {
        self.mining_fee_rate
            .fee_vb(vsize)
            .ok_or_else(|| CoordinatorError::Message(format!("mining fee overflow for vsize {vsize}")))
    }

    /// Folds every economic field into the round-id hash. The issuer public
    /// parameters are folded in separately by the round constructor.
    pub fn fold_into(&self, hasher: &mut blake3::Hasher) {
        hasher.update(&self.mining_fee_rate.to_sat_per_kwu().to_le_bytes());
        hasher.update(&self.coordination_fee_rate.rate.to_le_bytes());
        hasher.update(&self.coordination_fee_rate.plebs_dont_pay_threshold.to_sat().to_le_bytes());
        hasher.update(&self.max_suggested_amount.to_sat().to_le_bytes());
        hasher.update(&(self.min_input_count_by_round as u64).to_le_bytes());
        hasher.update(&(self.max_input_count_by_round as u64).to_le_bytes());
        hasher.update(&self.min_registrable_amount.to_sat().to_le_bytes());
        hasher.update(&self.max_registrable_amount.to_sat().to_le_bytes());
        hasher.update(&self.min_output_amount.to_sat().to_le_bytes());
        hasher.update(&self.max_transaction_vsize.to_le_bytes());
        hasher.update(&self.max_vsize_allocation_per_alice.to_le_bytes());
        hasher.update(&self.input_registration_timeout_nanos.to_le_bytes());
        hasher.update(&self.connection_confirmation_timeout_nanos.to_le_bytes());
        hasher.update(&self.output_registration_timeout_nanos.to_le_bytes());
        hasher.update(&self.transaction_signing_timeout_nanos.to_le_bytes());
    }
}

/// Builds per-round parameters from global config plus the per-round
/// decisions the Arena makes (suggested amount tier, fee-rate estimate).
#[derive(Clone, Debug)]
pub struct RoundParameterFactory {
    config: CoordinatorConfig,
}

impl RoundParameterFactory {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub fn create(&self, max_suggested_amount: Amount, mining_fee_rate: FeeRate) -> RoundParameters {
        let cfg = &self.config;
        RoundParameters {
            mining_fee_rate,
            coordination_fee_rate: CoordinationFeeRate {
                rate: cfg.coordination_fee_rate,
                plebs_dont_pay_threshold: Amount::from_sat(cfg.plebs_dont_pay_threshold_sats),
            },
            max_suggested_amount,
            min_input_count_by_round: cfg.min_input_count_by_round,
            max_input_count_by_round: cfg.max_input_count_by_round,
            min_registrable_amount: Amount::from_sat(cfg.min_registrable_amount_sats),
            max_registrable_amount: Amount::from_sat(cfg.max_registrable_amount_sats),
            min_output_amount: Amount::from_sat(cfg.min_registrable_amount_sats),
            max_transaction_vsize: cfg.max_transaction_vsize,
            max_vsize_allocation_per_alice: cfg.max_vsize_allocation_per_alice,
            input_registration_timeout_nanos: crate::foundation::time::secs_to_nanos(cfg.standard_input_registration_timeout_secs),
            blame_input_registration_timeout_nanos: crate::foundation::time::secs_to_nanos(cfg.blame_input_registration_timeout_secs),
            connection_confirmation_timeout_nanos: crate::foundation::time::secs_to_nanos(cfg.connection_confirmation_timeout_secs),
            output_registration_timeout_nanos: crate::foundation::time::secs_to_nanos(cfg.output_registration_timeout_secs),
            transaction_signing_timeout_nanos: crate::foundation::time::secs_to_nanos(cfg.transaction_signing_timeout_secs),
            round_expiry_timeout_nanos: crate::foundation::time::secs_to_nanos(cfg.round_expiry_timeout_secs),
        }
    }

    /// Blame rounds inherit the predecessor's economic decisions but register
    /// inputs under the shorter blame timeout.
    pub fn create_blame(&self, predecessor: &RoundParameters) -> RoundParameters {
        let mut params = predecessor.clone();
        params.input_registration_timeout_nanos = params.blame_input_registration_timeout_nanos;
        params
    }
}
