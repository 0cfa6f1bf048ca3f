use crate::service::arena::Arena;
use coinjoin_core::foundation::now_nanos;
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// Drives the Arena's periodic action until the task is dropped. Missed
/// ticks are skipped rather than bursted, so a slow tick never causes a
/// backlog of phase advancement.
pub async fn run_arena_loop(arena: Arc<Arena>, tick_interval: Duration) {
    info!("arena loop started tick_interval_ms={}", tick_interval.as_millis());
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        arena.action(now_nanos()).await;
    }
}
