use crate::foundation::constants::{
    MAX_AMOUNT_PER_ALICE, MAX_VSIZE_CREDENTIAL_VALUE, P2WPKH_INPUT_VSIZE, P2WPKH_OUTPUT_VSIZE, SHARED_TX_OVERHEAD_VSIZE,
};
use crate::foundation::{CoordinatorError, Result};
use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};

/// Global coordinator configuration. Every field has a serde default so a
/// partial config file (or an empty one) yields a runnable coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Fraction of each non-exempt input's amount taken as coordination fee.
    pub coordination_fee_rate: f64,
    /// Inputs at or below this amount pay no coordination fee.
    pub plebs_dont_pay_threshold_sats: u64,
    pub min_input_count_by_round: usize,
    pub max_input_count_by_round: usize,
    pub min_registrable_amount_sats: u64,
    pub max_registrable_amount_sats: u64,
    pub max_transaction_vsize: u64,
    pub max_vsize_allocation_per_alice: u64,
    pub standard_input_registration_timeout_secs: u64,
    pub blame_input_registration_timeout_secs: u64,
    pub connection_confirmation_timeout_secs: u64,
    pub output_registration_timeout_secs: u64,
    pub transaction_signing_timeout_secs: u64,
    /// How long an ended round stays queryable before removal.
    pub round_expiry_timeout_secs: u64,
    /// How many rounds accept input registrations concurrently.
    pub round_parallelization: usize,
    /// Base of the suggested-amount ladder; doubling round counters unlock
    /// tenfold larger tiers.
    pub max_suggested_amount_base_sats: u64,
    /// Confirmation target handed to the fee estimator when creating rounds.
    pub fee_estimation_confirmation_target: u16,
    /// Used when the chain node declines to estimate.
    pub fallback_fee_rate_sats_per_vb: u64,
    pub punitive_ban_secs: u64,
    pub backend_stability_ban_secs: u64,
    /// Above this many offenders in one round the fault is presumed to be on
    /// the coordinator's side and bans downgrade to backend-stability bans.
    /// Defaults to `min_input_count_by_round` when unset.
    pub reasonable_offender_count: Option<usize>,
    /// Hex of the P2WPKH script collecting coordination fees.
    pub coordinator_script_hex: String,
    pub tick_interval_secs: u64,
    /// Upper bound on any single chain or issuer call made while serving a
    /// participant request. Tick-path calls are bounded by
    /// `tick_interval_secs` instead.
    pub request_deadline_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordination_fee_rate: 0.003,
            plebs_dont_pay_threshold_sats: 1_000_000,
            min_input_count_by_round: 21,
            max_input_count_by_round: 400,
            min_registrable_amount_sats: 5_000,
            max_registrable_amount_sats: MAX_AMOUNT_PER_ALICE.to_sat(),
            max_transaction_vsize: 100_000,
            max_vsize_allocation_per_alice: MAX_VSIZE_CREDENTIAL_VALUE,
            standard_input_registration_timeout_secs: 3_600,
            blame_input_registration_timeout_secs: 180,
            connection_confirmation_timeout_secs: 60,
            output_registration_timeout_secs: 60,
            transaction_signing_timeout_secs: 60,
            round_expiry_timeout_secs: 300,
            round_parallelization: 1,
            max_suggested_amount_base_sats: 10_000_000,
            fee_estimation_confirmation_target: 6,
            fallback_fee_rate_sats_per_vb: 10,
            punitive_ban_secs: 3_600,
            backend_stability_ban_secs: 300,
            reasonable_offender_count: None,
            coordinator_script_hex: "00140000000000000000000000000000000000000000".to_string(),
            tick_interval_secs: 5,
            request_deadline_secs: 30,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| CoordinatorError::ConfigError(format!("config parse failed: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn effective_reasonable_offender_count(&self) -> usize {
        self.reasonable_offender_count.unwrap_or(self.min_input_count_by_round)
    }

    pub fn coordinator_script(&self) -> Result<ScriptBuf> {
        let bytes = hex::decode(&self.coordinator_script_hex)
            .map_err(|err| CoordinatorError::ConfigError(format!("coordinator_script_hex is not hex: {err}")))?;
        let script = ScriptBuf::from_bytes(bytes);
        if !script.is_p2wpkh() {
            return Err(CoordinatorError::ConfigError("coordinator script must be p2wpkh".to_string()));
        }
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.coordination_fee_rate) {
            return Err(CoordinatorError::ConfigError("coordination_fee_rate must be in [0, 1)".to_string()));
        }
        if self.min_input_count_by_round == 0 || self.min_input_count_by_round > self.max_input_count_by_round {
            return Err(CoordinatorError::ConfigError("input count bounds are inconsistent".to_string()));
        }
        if self.min_registrable_amount_sats == 0 || self.min_registrable_amount_sats > self.max_registrable_amount_sats {
            return Err(CoordinatorError::ConfigError("registrable amount bounds are inconsistent".to_string()));
        }
        if self.max_registrable_amount_sats > MAX_AMOUNT_PER_ALICE.to_sat() {
            return Err(CoordinatorError::ConfigError(format!(
                "max_registrable_amount_sats exceeds protocol cap {}",
                MAX_AMOUNT_PER_ALICE.to_sat()
            )));
        }
        if self.max_transaction_vsize <= SHARED_TX_OVERHEAD_VSIZE {
            return Err(CoordinatorError::ConfigError("max_transaction_vsize leaves no room for inputs".to_string()));
        }
        if self.max_vsize_allocation_per_alice < P2WPKH_INPUT_VSIZE + P2WPKH_OUTPUT_VSIZE {
            return Err(CoordinatorError::ConfigError(
                "max_vsize_allocation_per_alice cannot fit one input and one output".to_string(),
            ));
        }
        if self.max_vsize_allocation_per_alice > MAX_VSIZE_CREDENTIAL_VALUE {
            return Err(CoordinatorError::ConfigError(format!(
                "max_vsize_allocation_per_alice exceeds the vsize credential cap {MAX_VSIZE_CREDENTIAL_VALUE}"
            )));
        }
        if self.round_parallelization == 0 {
            return Err(CoordinatorError::ConfigError("round_parallelization must be at least 1".to_string()));
        }
        if self.max_suggested_amount_base_sats == 0 {
            return Err(CoordinatorError::ConfigError("max_suggested_amount_base_sats must be positive".to_string()));
        }
        if self.fallback_fee_rate_sats_per_vb == 0 {
            return Err(CoordinatorError::ConfigError("fallback_fee_rate_sats_per_vb must be positive".to_string()));
        }
        let timeouts = [
            self.standard_input_registration_timeout_secs,
            self.blame_input_registration_timeout_secs,
            self.connection_confirmation_timeout_secs,
            self.output_registration_timeout_secs,
            self.transaction_signing_timeout_secs,
            self.round_expiry_timeout_secs,
            self.tick_interval_secs,
            self.request_deadline_secs,
        ];
        if timeouts.contains(&0) {
            return Err(CoordinatorError::ConfigError("timeouts must be positive".to_string()));
        }
        self.coordinator_script()?;
        Ok(())
    }
}
