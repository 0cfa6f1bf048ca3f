use bitcoin::Amount;

/// Number of credentials presented and requested in every real credential request.
pub const CREDENTIAL_NUMBER: usize = 2;

/// Absolute upper bound on the value a single amount credential may carry.
pub const MAX_AMOUNT_PER_ALICE: Amount = Amount::from_sat(4_300_000_000_000);

/// Upper bound on the value a single vsize credential may carry.
pub const MAX_VSIZE_CREDENTIAL_VALUE: u64 = 255;

/// Virtual size of spending a P2WPKH input (txin + witness, rounded up).
pub const P2WPKH_INPUT_VSIZE: u64 = 68;

/// Virtual size of a P2WPKH output.
pub const P2WPKH_OUTPUT_VSIZE: u64 = 31;

/// Shared per-transaction overhead (version, locktime, counts, segwit marker).
pub const SHARED_TX_OVERHEAD_VSIZE: u64 = 11;

/// Coinbase outputs are spendable after this many confirmations.
pub const COINBASE_MATURITY: u64 = 101;

/// Spend-status lookups are chunked to this many outpoints per RPC batch.
pub const RPC_BATCH_SIZE: usize = 16;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// When set, `now_nanos()` returns this fixed value. Test determinism only.
pub const TEST_NOW_NANOS_ENV_VAR: &str = "COINJOIN_TEST_NOW_NANOS";
