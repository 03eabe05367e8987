//! Identifier and time generation, injected as collaborators.
//!
//! Per the design note that post timestamps, `elapsed`, the short topic id,
//! and the `#new` replacement id all rely on wall-clock and a random source,
//! both are modeled as swappable collaborators so tests can supply
//! deterministic values instead of real time/randomness.

use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current unix time. The default `SystemClock` reads the real
/// clock; tests substitute a `FixedClock` for determinism.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Real wall-clock implementation.
#[derive(Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_secs()
    }
}

/// Fixed-time clock for deterministic tests.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_unix(&self) -> u64 {
        self.0
    }
}

/// An 8 lowercase-hex-character identifier, matching the scheme the original
/// service used for both topic ids (`str(uuid.uuid4())[:8]`) and `#new`
/// replacement tokens (`uuid.uuid4().hex[:8]`) — both are the first 8 hex
/// digits of a fresh v4 UUID.
pub fn short_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..8].to_string()
}
