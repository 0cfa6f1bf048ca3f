pub mod constants;
pub mod error;
pub mod time;
pub mod types;

pub use error::{CoordinatorError, ErrorCode, ErrorContext};
pub use time::{now_nanos, TimeFrame};
pub use types::{Hash32, RoundId};

pub type Result<T> = std::result::Result<T, CoordinatorError>;
