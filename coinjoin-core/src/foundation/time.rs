use crate::foundation::constants::{NANOS_PER_SEC, TEST_NOW_NANOS_ENV_VAR};
use std::time::{SystemTime, UNIX_EPOCH};

fn wall_clock_nanos() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(now) => now.as_secs().saturating_mul(NANOS_PER_SEC).saturating_add(u64::from(now.subsec_nanos())),
        Err(_) => 0,
    }
}

/// Returns the current wall-clock timestamp in nanoseconds.
///
/// For test determinism, this respects `COINJOIN_TEST_NOW_NANOS` when set.
pub fn now_nanos() -> u64 {
    if let Ok(value) = std::env::var(TEST_NOW_NANOS_ENV_VAR) {
        if let Ok(parsed) = value.parse::<u64>() {
            return parsed;
        }
    }
    wall_clock_nanos()
}

pub const fn secs_to_nanos(secs: u64) -> u64 {
    secs.saturating_mul(NANOS_PER_SEC)
}

/// A start time plus a duration. Phases that should tolerate clients racing a
/// phase flip extend their frame with `with_grace` before checking expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeFrame {
    pub start_nanos: u64,
    pub duration_nanos: u64,
}

impl TimeFrame {
    pub const fn new(start_nanos: u64, duration_nanos: u64) -> Self {
        Self { start_nanos, duration_nanos }
    }

    pub fn end_nanos(&self) -> u64 {
        self.start_nanos.saturating_add(self.duration_nanos)
    }

    pub fn has_expired(&self, now_nanos: u64) -> bool {
        now_nanos >= self.end_nanos()
    }

    pub fn includes(&self, now_nanos: u64) -> bool {
        now_nanos >= self.start_nanos && !self.has_expired(now_nanos)
    }

    pub fn remaining_nanos(&self, now_nanos: u64) -> u64 {
        self.end_nanos().saturating_sub(now_nanos)
    }

    pub fn with_grace(self, grace_nanos: u64) -> Self {
        Self { start_nanos: self.start_nanos, duration_nanos: self.duration_nanos.saturating_add(grace_nanos) }
    }
}
