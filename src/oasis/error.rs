//! Error types surfaced by the schedule engine, forum, and agent dispatch.
//!
//! Mirrors the manual `Display`/`std::error::Error` idiom used for
//! `CouncilError`/`OrchestrationError` elsewhere in this crate's lineage,
//! rather than a derive-macro-based error enum.

use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure mode the core engine can surface.
#[derive(Debug)]
pub enum Error {
    /// The schedule YAML was malformed or referenced an unknown step shape.
    /// Surfaced at topic creation; the topic is never created.
    BadSchedule(String),

    /// A schedule step referenced a name the resolver could not place in the
    /// pool. The step is skipped; the topic is not failed.
    UnknownAgent(String),

    /// A single agent's `participate` call failed (network, timeout, parse).
    /// The agent does not publish; execution continues.
    AgentFailure { agent: String, reason: String },

    /// A publish was attempted after the topic reached a terminal status.
    /// Indicates a programming error rather than bad user input.
    ForumClosed,

    /// Cooperative cancellation was observed; the topic transitions to
    /// `cancelled`.
    Cancelled,

    /// An unhandled failure in the engine loop; the topic transitions to
    /// `error` with this message as the conclusion.
    Fatal(String),

    /// The requested topic does not exist.
    NotFound(String),

    /// The caller does not own the requested topic.
    Forbidden,

    /// The LLM collaborator failed.
    Llm(String),

    /// The bot-session collaborator failed.
    Session(String),

    /// Reading or writing a persisted topic blob failed.
    Storage(String),

    /// `wait_conclusion` exceeded its timeout before the topic concluded.
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadSchedule(msg) => write!(f, "bad schedule: {}", msg),
            Error::UnknownAgent(name) => write!(f, "unknown agent: {}", name),
            Error::AgentFailure { agent, reason } => {
                write!(f, "agent '{}' failed: {}", agent, reason)
            }
            Error::ForumClosed => write!(f, "forum is closed for this topic"),
            Error::Cancelled => write!(f, "topic was cancelled"),
            Error::Fatal(msg) => write!(f, "fatal engine error: {}", msg),
            Error::NotFound(id) => write!(f, "topic not found: {}", id),
            Error::Forbidden => write!(f, "caller does not own this topic"),
            Error::Llm(msg) => write!(f, "llm error: {}", msg),
            Error::Session(msg) => write!(f, "session error: {}", msg),
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::Timeout => write!(f, "timed out waiting for conclusion"),
        }
    }
}

impl std::error::Error for Error {}
