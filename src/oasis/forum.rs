//! The forum state machine: the append-only post log, vote accounting,
//! timeline, topic lifecycle, and persistence.
//!
//! `Forum` is the single serialization point for a topic — every mutation
//! goes through one of its methods, which enforce the invariants in full:
//! dense post ids, `reply_to` validity, vote-counter monotonicity, and the
//! terminal status DAG. Internally a `tokio::sync::RwLock` makes the forum
//! safe to share across the engine's concurrent agent dispatches (`Parallel`
//! and `All` steps) without ever holding the lock across a suspension point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::oasis::error::{Error, Result};
use crate::oasis::ids::Clock;

/// Topic lifecycle status. Transitions form a DAG:
/// `Pending -> Discussing -> { Concluded | Error | Cancelled }`. No backward
/// transition is ever made once a terminal status is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Pending,
    Discussing,
    Concluded,
    Error,
    Cancelled,
}

impl TopicStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TopicStatus::Concluded | TopicStatus::Error | TopicStatus::Cancelled
        )
    }
}

/// Up or down vote polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotePolarity {
    Up,
    Down,
}

/// Coarse-grained progress markers recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Start,
    Round,
    AgentCall,
    AgentDone,
    Post,
    Vote,
    Conclude,
    Error,
    Cancel,
}

/// One entry in a topic's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub elapsed: u64,
    pub event: TimelineEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub detail: String,
}

/// An append-only post in the forum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub author: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
    pub upvotes: u64,
    pub downvotes: u64,
    pub timestamp: u64,
    pub elapsed: u64,
}

/// The root unit of work: a single discussion session seeded by a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: String,
    pub question: String,
    pub owner: String,
    pub status: TopicStatus,
    pub current_round: u32,
    pub max_rounds: u32,
    #[serde(rename = "discussion")]
    pub discussion_mode: bool,
    #[serde(default)]
    pub conclusion: String,
    pub created_at: u64,
}

/// The persisted, forward-compatible document written to storage.
///
/// Unknown fields present on an older or newer blob are captured in `extra`
/// via `#[serde(flatten)]` and written back unchanged on the next rewrite,
/// so a field this version of the crate doesn't know about survives a
/// load-then-save round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicBlob {
    #[serde(flatten)]
    pub topic: Topic,
    pub posts: Vec<Post>,
    pub timeline: Vec<TimelineEvent>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

struct ForumState {
    topic: Topic,
    posts: Vec<Post>,
    timeline: Vec<TimelineEvent>,
    extra: serde_json::Map<String, serde_json::Value>,
}

/// A topic's forum: posts, votes, timeline, and the persistence contract.
pub struct Forum {
    storage_dir: PathBuf,
    clock: Arc<dyn Clock>,
    state: RwLock<ForumState>,
}

impl Forum {
    /// Create a brand new forum for a freshly created topic, with status
    /// `pending`.
    pub fn new(
        topic_id: String,
        question: String,
        owner: String,
        max_rounds: u32,
        discussion_mode: bool,
        storage_dir: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let created_at = clock.now_unix();
        let topic = Topic {
            topic_id,
            question,
            owner,
            status: TopicStatus::Pending,
            current_round: 0,
            max_rounds,
            discussion_mode,
            conclusion: String::new(),
            created_at,
        };
        Forum {
            storage_dir,
            clock,
            state: RwLock::new(ForumState {
                topic,
                posts: Vec::new(),
                timeline: Vec::new(),
                extra: serde_json::Map::new(),
            }),
        }
    }

    /// Rebuild a forum from a persisted blob. No derived data is
    /// recomputed; the blob is trusted as-is.
    pub fn restore(blob: TopicBlob, storage_dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Forum {
            storage_dir,
            clock,
            state: RwLock::new(ForumState {
                topic: blob.topic,
                posts: blob.posts,
                timeline: blob.timeline,
                extra: blob.extra,
            }),
        }
    }

    /// Load a forum from its on-disk blob path.
    pub async fn load(path: &Path, storage_dir: PathBuf, clock: Arc<dyn Clock>) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Storage(format!("reading {}: {}", path.display(), e)))?;
        let blob: TopicBlob = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("parsing {}: {}", path.display(), e)))?;
        Ok(Forum::restore(blob, storage_dir, clock))
    }

    fn blob_path(&self, topic_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.json", topic_id))
    }

    fn elapsed_since(&self, created_at: u64) -> u64 {
        self.clock.now_unix().saturating_sub(created_at)
    }

    /// Read-only snapshot of everything a reader can see.
    pub async fn snapshot(&self) -> TopicBlob {
        let s = self.state.read().await;
        TopicBlob {
            topic: s.topic.clone(),
            posts: s.posts.clone(),
            timeline: s.timeline.clone(),
            extra: s.extra.clone(),
        }
    }

    pub async fn topic(&self) -> Topic {
        self.state.read().await.topic.clone()
    }

    pub async fn status(&self) -> TopicStatus {
        self.state.read().await.topic.status
    }

    /// Write the current snapshot to a temp file, then rename it over the
    /// real blob path — a torn write can only ever leave the previous,
    /// still-valid blob in place.
    async fn persist(&self) -> Result<()> {
        let blob = self.snapshot().await;
        let path = self.blob_path(&blob.topic.topic_id);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                log::warn!("forum persist: creating {}: {}", parent.display(), e);
                return Ok(());
            }
        }
        let tmp_path = path.with_extension("json.tmp");
        let body = match serde_json::to_vec_pretty(&blob) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("forum persist: serializing {}: {}", blob.topic.topic_id, e);
                return Ok(());
            }
        };
        if let Err(e) = tokio::fs::write(&tmp_path, &body).await {
            log::warn!("forum persist: writing {}: {}", tmp_path.display(), e);
            return Ok(());
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            log::warn!("forum persist: renaming into {}: {}", path.display(), e);
        }
        Ok(())
    }

    /// Append a post. Fails with `ForumClosed` once the topic has reached a
    /// terminal status. `reply_to`, if given, must name an already-existing
    /// post.
    pub async fn publish(
        &self,
        author: &str,
        content: &str,
        reply_to: Option<u64>,
    ) -> Result<Post> {
        {
            let s = self.state.read().await;
            if s.topic.status.is_terminal() {
                return Err(Error::ForumClosed);
            }
            if let Some(r) = reply_to {
                if !s.posts.iter().any(|p| p.id == r) {
                    return Err(Error::Fatal(format!(
                        "reply_to {} does not reference an existing post",
                        r
                    )));
                }
            }
        }

        let post = {
            let mut s = self.state.write().await;
            if s.topic.status.is_terminal() {
                return Err(Error::ForumClosed);
            }
            let next_id = s.posts.last().map(|p| p.id + 1).unwrap_or(1);
            let now = self.clock.now_unix();
            let post = Post {
                id: next_id,
                author: author.to_string(),
                content: content.to_string(),
                reply_to,
                upvotes: 0,
                downvotes: 0,
                timestamp: now,
                elapsed: self.elapsed_since(s.topic.created_at),
            };
            s.posts.push(post.clone());
            let elapsed = post.elapsed;
            s.timeline.push(TimelineEvent {
                elapsed,
                event: TimelineEventKind::Post,
                agent: Some(author.to_string()),
                detail: format!("post #{}", next_id),
            });
            post
        };

        self.persist().await?;
        Ok(post)
    }

    /// Cast a vote. A vote on an unknown post id silently no-ops. Callers
    /// are responsible for de-duplicating `(post_id, polarity)` pairs
    /// within a single agent dispatch before calling this — the forum
    /// itself does not track per-call scope.
    pub async fn vote(&self, post_id: u64, polarity: VotePolarity, voter: &str) -> Result<()> {
        let mut s = self.state.write().await;
        if s.topic.status.is_terminal() {
            return Err(Error::ForumClosed);
        }
        let Some(post) = s.posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(());
        };
        match polarity {
            VotePolarity::Up => post.upvotes += 1,
            VotePolarity::Down => post.downvotes += 1,
        }
        let elapsed = self.elapsed_since(s.topic.created_at);
        s.timeline.push(TimelineEvent {
            elapsed,
            event: TimelineEventKind::Vote,
            agent: Some(voter.to_string()),
            detail: format!("{:?} on post #{}", polarity, post_id),
        });
        drop(s);
        self.persist().await
    }

    /// All posts in append order.
    pub async fn browse(&self) -> Vec<Post> {
        self.state.read().await.posts.clone()
    }

    /// Up to `k` posts, ranked by `upvotes - downvotes` descending, ties
    /// broken by ascending `id`.
    pub async fn get_top_posts(&self, k: usize) -> Vec<Post> {
        let s = self.state.read().await;
        let mut ranked: Vec<Post> = s.posts.clone();
        ranked.sort_by(|a, b| {
            let score_a = a.upvotes as i64 - a.downvotes as i64;
            let score_b = b.upvotes as i64 - b.downvotes as i64;
            score_b.cmp(&score_a).then(a.id.cmp(&b.id))
        });
        ranked.truncate(k);
        ranked
    }

    pub async fn append_timeline(
        &self,
        event: TimelineEventKind,
        agent: Option<&str>,
        detail: &str,
    ) -> Result<()> {
        {
            let mut s = self.state.write().await;
            let elapsed = self.elapsed_since(s.topic.created_at);
            s.timeline.push(TimelineEvent {
                elapsed,
                event,
                agent: agent.map(|a| a.to_string()),
                detail: detail.to_string(),
            });
        }
        self.persist().await
    }

    pub async fn timeline(&self) -> Vec<TimelineEvent> {
        self.state.read().await.timeline.clone()
    }

    /// Move the topic from `pending` to `discussing`.
    pub async fn start_discussing(&self) -> Result<()> {
        {
            let mut s = self.state.write().await;
            s.topic.status = TopicStatus::Discussing;
        }
        self.append_timeline(TimelineEventKind::Start, None, "discussion started")
            .await
    }

    pub async fn set_current_round(&self, round: u32) -> Result<()> {
        {
            let mut s = self.state.write().await;
            s.topic.current_round = round;
        }
        self.persist().await
    }

    pub async fn set_max_rounds(&self, max_rounds: u32) -> Result<()> {
        {
            let mut s = self.state.write().await;
            s.topic.max_rounds = max_rounds;
        }
        self.persist().await
    }

    /// Terminal transition: `concluded`, with a non-empty conclusion.
    pub async fn conclude(&self, conclusion: &str) -> Result<()> {
        {
            let mut s = self.state.write().await;
            if s.topic.status.is_terminal() {
                return Ok(());
            }
            s.topic.status = TopicStatus::Concluded;
            s.topic.conclusion = conclusion.to_string();
        }
        self.append_timeline(TimelineEventKind::Conclude, None, conclusion)
            .await
    }

    /// Terminal transition: `error`, with the failure reason as conclusion.
    pub async fn fail(&self, reason: &str) -> Result<()> {
        {
            let mut s = self.state.write().await;
            if s.topic.status.is_terminal() {
                return Ok(());
            }
            s.topic.status = TopicStatus::Error;
            s.topic.conclusion = reason.to_string();
        }
        self.append_timeline(TimelineEventKind::Error, None, reason)
            .await
    }

    /// Terminal transition: `cancelled`, with the standard cancellation
    /// note as conclusion.
    pub async fn cancel(&self) -> Result<()> {
        {
            let mut s = self.state.write().await;
            if s.topic.status.is_terminal() {
                return Ok(());
            }
            s.topic.status = TopicStatus::Cancelled;
            s.topic.conclusion = "discussion cancelled".to_string();
        }
        self.append_timeline(TimelineEventKind::Cancel, None, "discussion cancelled")
            .await
    }
}

/// Build the alias -> earliest-post lookup used by `get_top_posts`-adjacent
/// reporting (e.g. "who authored post N"); exposed for the event stream and
/// tests that want a quick author index without re-scanning `browse()`.
pub fn index_by_author(posts: &[Post]) -> HashMap<String, Vec<u64>> {
    let mut index: HashMap<String, Vec<u64>> = HashMap::new();
    for post in posts {
        index.entry(post.author.clone()).or_default().push(post.id);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oasis::ids::FixedClock;

    fn forum() -> Forum {
        Forum::new(
            "abcd1234".to_string(),
            "question?".to_string(),
            "owner-1".to_string(),
            3,
            true,
            std::env::temp_dir().join("oasis_forum_tests"),
            Arc::new(FixedClock(1_700_000_000)),
        )
    }

    #[tokio::test]
    async fn publish_assigns_dense_ids() {
        let f = forum();
        f.start_discussing().await.unwrap();
        let p1 = f.publish("a", "one", None).await.unwrap();
        let p2 = f.publish("b", "two", None).await.unwrap();
        let p3 = f.publish("c", "three", Some(p1.id)).await.unwrap();
        assert_eq!((p1.id, p2.id, p3.id), (1, 2, 3));
    }

    #[tokio::test]
    async fn publish_rejects_unknown_reply_to() {
        let f = forum();
        f.start_discussing().await.unwrap();
        let err = f.publish("a", "one", Some(99)).await.unwrap_err();
        assert!(matches!(err, Error::Fatal(_)));
    }

    #[tokio::test]
    async fn publish_fails_after_terminal_status() {
        let f = forum();
        f.start_discussing().await.unwrap();
        f.conclude("done").await.unwrap();
        let err = f.publish("a", "one", None).await.unwrap_err();
        assert!(matches!(err, Error::ForumClosed));
    }

    #[tokio::test]
    async fn vote_on_unknown_post_is_a_no_op() {
        let f = forum();
        f.start_discussing().await.unwrap();
        f.vote(42, VotePolarity::Up, "voter").await.unwrap();
        assert!(f.browse().await.is_empty());
    }

    #[tokio::test]
    async fn votes_only_grow() {
        let f = forum();
        f.start_discussing().await.unwrap();
        let p = f.publish("a", "one", None).await.unwrap();
        f.vote(p.id, VotePolarity::Up, "v1").await.unwrap();
        f.vote(p.id, VotePolarity::Up, "v2").await.unwrap();
        f.vote(p.id, VotePolarity::Down, "v3").await.unwrap();
        let posts = f.browse().await;
        assert_eq!(posts[0].upvotes, 2);
        assert_eq!(posts[0].downvotes, 1);
    }

    #[tokio::test]
    async fn get_top_posts_orders_by_score_then_id() {
        let f = forum();
        f.start_discussing().await.unwrap();
        let p1 = f.publish("a", "one", None).await.unwrap();
        let p2 = f.publish("b", "two", None).await.unwrap();
        let p3 = f.publish("c", "three", None).await.unwrap();
        // p2 and p3 tie at score 1; p1 has score 0.
        f.vote(p2.id, VotePolarity::Up, "v1").await.unwrap();
        f.vote(p3.id, VotePolarity::Up, "v2").await.unwrap();
        f.vote(p1.id, VotePolarity::Down, "v3").await.unwrap();
        let top = f.get_top_posts(2).await;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, p2.id);
        assert_eq!(top[1].id, p3.id);
    }

    #[tokio::test]
    async fn status_dag_is_terminal_once_reached() {
        let f = forum();
        f.start_discussing().await.unwrap();
        f.cancel().await.unwrap();
        assert_eq!(f.status().await, TopicStatus::Cancelled);
        // A second terminal transition is a no-op, not a state change.
        f.fail("should not apply").await.unwrap();
        assert_eq!(f.status().await, TopicStatus::Cancelled);
        let topic = f.topic().await;
        assert_eq!(topic.conclusion, "discussion cancelled");
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_blob() {
        let f = forum();
        f.start_discussing().await.unwrap();
        f.publish("a", "one", None).await.unwrap();
        f.vote(1, VotePolarity::Up, "v").await.unwrap();
        let blob = f.snapshot().await;
        let json = serde_json::to_string(&blob).unwrap();
        let restored: TopicBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.posts.len(), 1);
        assert_eq!(restored.posts[0].upvotes, 1);
        assert_eq!(restored.topic.status, TopicStatus::Discussing);
    }

    #[tokio::test]
    async fn unknown_blob_fields_survive_a_round_trip() {
        let mut json: serde_json::Value = serde_json::to_value(forum().snapshot().await).unwrap();
        json["future_field"] = serde_json::json!("kept as-is");
        let blob: TopicBlob = serde_json::from_value(json).unwrap();
        assert_eq!(
            blob.extra.get("future_field").and_then(|v| v.as_str()),
            Some("kept as-is")
        );
        let rewritten = serde_json::to_value(&blob).unwrap();
        assert_eq!(rewritten["future_field"], serde_json::json!("kept as-is"));
    }
}
