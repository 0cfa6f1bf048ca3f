pub mod service;

pub use service::arena::requests;
pub use service::arena::{Arena, RoundState, RoundStateCheckpoint};
pub use service::events::CoinjoinBroadcast;
pub use service::run::run_arena_loop;
