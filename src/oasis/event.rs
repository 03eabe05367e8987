//! Structured observability events emitted while a topic runs.
//!
//! A flat enum of what happened, and a trait with no-op defaults so a
//! deployment only overrides the handlers it cares about.

use async_trait::async_trait;

/// Something that happened while a topic's schedule was executing.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TopicStarted {
        topic_id: String,
    },
    RoundStarted {
        topic_id: String,
        round: u32,
    },
    RoundCompleted {
        topic_id: String,
        round: u32,
    },
    StepStarted {
        topic_id: String,
        step_index: usize,
    },
    AgentCallStarted {
        topic_id: String,
        agent: String,
    },
    AgentCallCompleted {
        topic_id: String,
        agent: String,
    },
    AgentCallFailed {
        topic_id: String,
        agent: String,
        reason: String,
    },
    PostPublished {
        topic_id: String,
        post_id: u64,
        author: String,
    },
    VoteCast {
        topic_id: String,
        post_id: u64,
        voter: String,
    },
    ConsensusChecked {
        topic_id: String,
        reached: bool,
    },
    TopicConcluded {
        topic_id: String,
    },
    TopicErrored {
        topic_id: String,
        reason: String,
    },
    TopicCancelled {
        topic_id: String,
    },
}

/// Observer of [`EngineEvent`]s. All methods default to a no-op so callers
/// only implement the ones they need.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, _event: EngineEvent) {}
}

/// An `EventHandler` that drops every event; the default when a deployment
/// supplies no observer.
pub struct NullEventHandler;

#[async_trait]
impl EventHandler for NullEventHandler {
    async fn on_event(&self, _event: EngineEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_handler_accepts_every_variant_without_panicking() {
        let handler = NullEventHandler;
        handler
            .on_event(EngineEvent::TopicStarted {
                topic_id: "t1".to_string(),
            })
            .await;
        handler
            .on_event(EngineEvent::TopicErrored {
                topic_id: "t1".to_string(),
                reason: "boom".to_string(),
            })
            .await;
    }
}
