//! End-to-end engine scenarios: a direct agent answering one round, a
//! parallel fan-out, consensus early-stop, manual injection with `reply_to`
//! validation, and cooperative cancellation.
//!
//! A fixed-response mock client stands in for the real LLM, wrapped in an
//! `Arc<dyn LlmClient>` and handed to a `Registry` built with a short poll
//! interval so `wait_conclusion` settles quickly in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use oasis::oasis::collaborators::{
    ChatMessage, Collaborators, LlmClient, NoPresets, Unconfigured,
};
use oasis::oasis::error::{Error, Result as OasisResult};
use oasis::oasis::forum::TopicStatus;
use oasis::oasis::schedule::Schedule;
use oasis::{OasisConfig, Registry};

/// Always answers with the same fixed discussion-mode JSON payload.
struct FixedClient {
    response: String,
}

#[async_trait]
impl LlmClient for FixedClient {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> OasisResult<String> {
        Ok(self.response.clone())
    }
}

/// Hands out a fixed upvote count's worth of `up` votes on post #1 every
/// turn, so a pool can be driven to consensus deterministically.
struct AlwaysUpvotesPostOne;

#[async_trait]
impl LlmClient for AlwaysUpvotesPostOne {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> OasisResult<String> {
        Ok(r#"{"content": "agreed", "votes": [{"post_id": 1, "vote": "up"}]}"#.to_string())
    }
}

/// Sleeps briefly before answering, so a cancel sent right after topic
/// creation has time to land before the round loop runs to completion.
struct SlowClient;

#[async_trait]
impl LlmClient for SlowClient {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> OasisResult<String> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(r#"{"content": "still going"}"#.to_string())
    }
}

/// Counts how many times `complete` is invoked, to assert fan-out breadth.
struct CountingClient {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl LlmClient for CountingClient {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> OasisResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(r#"{"content": "noted"}"#.to_string())
    }
}

fn test_config(dir: &std::path::Path) -> OasisConfig {
    let mut cfg = OasisConfig::default();
    cfg.storage_dir = dir.to_path_buf();
    cfg.poll_interval = Duration::from_millis(20);
    cfg
}

fn collaborators_with(llm: Arc<dyn LlmClient>) -> Collaborators {
    Collaborators {
        llm,
        sessions: Arc::new(Unconfigured),
        external: Arc::new(Unconfigured),
        presets: Arc::new(NoPresets),
        callback: None,
    }
}

/// Scenario 1: a single direct agent answers a single-round, non-repeating
/// schedule and the topic concludes with a non-empty summary.
#[tokio::test]
async fn single_direct_agent_single_round_concludes() {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(FixedClient {
        response: r#"{"content": "the answer is 42"}"#.to_string(),
    });
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));

    let schedule = Schedule::parse(
        "version: 1\nrepeat: false\ndiscussion: true\nplan:\n  - expert: \"oracle#temp#1\"\n",
    )
    .unwrap();

    let topic_id = registry
        .create_topic("what is the answer?", "alice", 1, schedule, Some(true), false, None)
        .await
        .unwrap();

    let conclusion = registry
        .wait_conclusion(&topic_id, "alice", Duration::from_secs(5))
        .await
        .unwrap();
    assert!(!conclusion.is_empty());

    let topic = registry.get_topic(&topic_id, "alice").await.unwrap();
    assert_eq!(topic.status, TopicStatus::Concluded);
}

/// Scenario 2: a `parallel` step fans out to every named member and waits
/// for all of them before the step is considered complete.
#[tokio::test]
async fn parallel_step_dispatches_to_every_member() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let llm: Arc<dyn LlmClient> = Arc::new(CountingClient {
        calls: Arc::clone(&calls),
    });
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));

    let schedule = Schedule::parse(
        "version: 1\nrepeat: false\ndiscussion: true\nplan:\n  - parallel:\n      - \"a#temp#1\"\n      - \"b#temp#1\"\n      - \"c#temp#1\"\n",
    )
    .unwrap();

    let topic_id = registry
        .create_topic("brainstorm", "alice", 1, schedule, Some(true), false, None)
        .await
        .unwrap();

    registry
        .wait_conclusion(&topic_id, "alice", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let topic = registry.get_topic(&topic_id, "alice").await.unwrap();
    assert_eq!(topic.status, TopicStatus::Concluded);
}

/// Scenario 3: with a pool of 4 repeat-mode agents that all upvote the first
/// post, consensus (ceil(0.7*4) = 3 upvotes) is reached by round 2 and the
/// schedule stops short of its configured 5-round ceiling.
#[tokio::test]
async fn consensus_stops_early_in_repeat_mode() {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(AlwaysUpvotesPostOne);
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));

    // `all_experts` alone resolves an empty pool if no step ever names the
    // four agents, so name them once via `parallel` up front.
    let schedule = Schedule::parse(
        "version: 1\nrepeat: true\ndiscussion: true\nplan:\n  - parallel:\n      - \"a#temp#1\"\n      - \"b#temp#1\"\n      - \"c#temp#1\"\n      - \"d#temp#1\"\n",
    )
    .unwrap();

    let topic_id = registry
        .create_topic("should we ship it?", "alice", 5, schedule, Some(true), true, None)
        .await
        .unwrap();

    registry
        .wait_conclusion(&topic_id, "alice", Duration::from_secs(5))
        .await
        .unwrap();

    let topic = registry.get_topic(&topic_id, "alice").await.unwrap();
    assert_eq!(topic.status, TopicStatus::Concluded);
    assert!(
        topic.current_round < 5,
        "expected early stop before the 5-round ceiling, got round {}",
        topic.current_round
    );
}

/// With `early_stop` left off (the registry's request-layer default), the
/// same consensus-reaching schedule as above runs every configured round
/// instead of short-circuiting.
#[tokio::test]
async fn consensus_is_ignored_when_early_stop_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(AlwaysUpvotesPostOne);
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));

    let schedule = Schedule::parse(
        "version: 1\nrepeat: true\ndiscussion: true\nplan:\n  - parallel:\n      - \"a#temp#1\"\n      - \"b#temp#1\"\n      - \"c#temp#1\"\n      - \"d#temp#1\"\n",
    )
    .unwrap();

    let topic_id = registry
        .create_topic("should we ship it?", "alice", 5, schedule, Some(true), false, None)
        .await
        .unwrap();

    registry
        .wait_conclusion(&topic_id, "alice", Duration::from_secs(5))
        .await
        .unwrap();

    let topic = registry.get_topic(&topic_id, "alice").await.unwrap();
    assert_eq!(topic.status, TopicStatus::Concluded);
    assert_eq!(
        topic.current_round, 5,
        "expected all 5 rounds to run since early_stop was disabled"
    );
}

/// Scenario 4: a manual step injects a host post, and a later manual step
/// with a bogus `reply_to` is rejected (logged, not fatal) while the topic
/// still concludes.
#[tokio::test]
async fn manual_injection_and_reply_to_validation() {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(FixedClient {
        response: r#"{"content": "ack"}"#.to_string(),
    });
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));

    let schedule = Schedule::parse(
        "version: 1\nrepeat: false\ndiscussion: true\nplan:\n  - manual:\n      author: host\n      content: welcome\n  - manual:\n      author: host\n      content: bogus reply\n      reply_to: 99\n",
    )
    .unwrap();

    let topic_id = registry
        .create_topic("intro", "alice", 1, schedule, Some(true), false, None)
        .await
        .unwrap();

    registry
        .wait_conclusion(&topic_id, "alice", Duration::from_secs(5))
        .await
        .unwrap();

    let topic = registry.get_topic(&topic_id, "alice").await.unwrap();
    assert_eq!(topic.status, TopicStatus::Concluded);
}

/// Scenario 5: cancelling mid-run transitions the topic to `cancelled`
/// rather than `concluded`, even though the schedule has many rounds left.
#[tokio::test]
async fn cancel_mid_run_transitions_to_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(SlowClient);
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));

    let schedule = Schedule::parse(
        "version: 1\nrepeat: true\ndiscussion: true\nplan:\n  - expert: \"a#temp#1\"\n",
    )
    .unwrap();

    let topic_id = registry
        .create_topic("long debate", "alice", 50, schedule, Some(true), false, None)
        .await
        .unwrap();

    registry.cancel_topic(&topic_id, "alice").await.unwrap();

    let conclusion = registry
        .wait_conclusion(&topic_id, "alice", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(conclusion, "discussion cancelled");

    let topic = registry.get_topic(&topic_id, "alice").await.unwrap();
    assert_eq!(topic.status, TopicStatus::Cancelled);
}

/// A caller other than the topic's owner gets `Forbidden`, never leaking
/// whether the topic id even exists to the wrong owner.
#[tokio::test]
async fn non_owner_cannot_read_or_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let llm: Arc<dyn LlmClient> = Arc::new(FixedClient {
        response: r#"{"content": "done"}"#.to_string(),
    });
    let registry = Registry::new(test_config(dir.path()), collaborators_with(llm));
    let schedule = Schedule::parse(
        "version: 1\nrepeat: false\ndiscussion: true\nplan:\n  - expert: \"a#temp#1\"\n",
    )
    .unwrap();
    let topic_id = registry
        .create_topic("q", "alice", 1, schedule, Some(true), false, None)
        .await
        .unwrap();

    let err = registry
        .cancel_topic(&topic_id, "mallory")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden));
}
