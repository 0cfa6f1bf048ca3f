pub mod alice;
pub mod bob;
pub mod coin;
pub mod coinjoin_state;
pub mod params;
pub mod phase;
pub mod prison;
pub mod round;
pub mod suggested_amount;

pub use alice::Alice;
pub use bob::Bob;
pub use coin::{Coin, OwnershipProof};
pub use coinjoin_state::{CoinjoinState, ConstructionState, SigningState};
pub use params::{CoordinationFeeRate, RoundParameterFactory, RoundParameters};
pub use phase::{EndRoundState, Phase};
pub use prison::{Offense, Prison};
pub use round::{Round, RoundKind};
pub use suggested_amount::MaxSuggestedAmountProvider;
