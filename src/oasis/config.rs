//! Engine-wide configuration.
//!
//! [`OasisConfig`] is intentionally minimal and constructed manually — no
//! TOML/YAML config-file parsing is introduced here. The schedule a topic
//! runs is itself YAML (see [`crate::oasis::schedule`]), but that is data
//! the engine consumes per-topic, not process configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the engine, registry, and forum persistence.
#[derive(Clone, Debug)]
pub struct OasisConfig {
    /// Directory under which each topic's persisted JSON blob is written.
    pub storage_dir: PathBuf,
    /// Upper bound for a single direct-LLM `participate` call.
    pub direct_call_timeout: Duration,
    /// Upper bound for a session-backed `participate` call (oasis/regular).
    pub session_call_timeout: Duration,
    /// Upper bound for the summarization call.
    pub summarize_timeout: Duration,
    /// Bounded token budget passed to the summarization call.
    pub summarize_max_tokens: u32,
    /// Temperature passed to the summarization call.
    pub summarize_temperature: f32,
    /// Cadence at which the event stream polls the forum for new posts.
    pub poll_interval: Duration,
}

impl Default for OasisConfig {
    /// Create a config pointing at `"oasis_topics"` in the current working
    /// directory, with a minute-scale direct-call timeout and a three-minute
    /// session-call timeout.
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("oasis_topics"),
            direct_call_timeout: Duration::from_secs(60),
            session_call_timeout: Duration::from_secs(180),
            summarize_timeout: Duration::from_secs(60),
            summarize_max_tokens: 512,
            summarize_temperature: 0.2,
            poll_interval: Duration::from_secs(1),
        }
    }
}
