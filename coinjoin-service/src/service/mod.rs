pub mod arena;
pub mod events;
pub mod run;
