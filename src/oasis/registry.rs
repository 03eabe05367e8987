//! The process-wide map of live topics, their engine tasks, and cancel
//! handles — modeled as an explicit, constructible `Registry` rather than a
//! process-wide singleton, per the design note that global mutable
//! registries must become passed-in handles so tests can instantiate them
//! in isolation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use futures_util::stream::Stream;

use crate::oasis::agent::Agent;
use crate::oasis::collaborators::{Collaborators, CompletionCallback};
use crate::oasis::config::OasisConfig;
use crate::oasis::error::{Error, Result};
use crate::oasis::event::{EventHandler, NullEventHandler};
use crate::oasis::forum::{Forum, Topic, TopicStatus};
use crate::oasis::ids::{short_id, Clock, SystemClock};
use crate::oasis::resolver::build_pool;
use crate::oasis::schedule::Schedule;
use crate::oasis::stream::{self, TopicUpdate};
use crate::oasis::Engine;

/// Summary row returned by `list_topics`.
#[derive(Debug, Clone)]
pub struct TopicSummary {
    pub topic_id: String,
    pub question: String,
    pub status: TopicStatus,
    pub created_at: u64,
}

struct RegistryEntry {
    forum: Arc<Forum>,
    /// `None` once the driver task has finished or the topic was restored
    /// from disk without being resumed.
    handle: Option<JoinHandle<()>>,
    cancel: watch::Sender<bool>,
}

/// A process-wide, explicitly constructed registry of live topics.
pub struct Registry {
    storage_dir: PathBuf,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    config: OasisConfig,
    events: Arc<dyn EventHandler>,
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    pub fn new(config: OasisConfig, collaborators: Collaborators) -> Arc<Self> {
        Self::with_clock_and_events(config, collaborators, Arc::new(SystemClock), Arc::new(NullEventHandler))
    }

    pub fn with_clock_and_events(
        config: OasisConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventHandler>,
    ) -> Arc<Self> {
        Arc::new(Registry {
            storage_dir: config.storage_dir.clone(),
            clock,
            collaborators,
            config,
            events,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Create and start a new topic's engine as a detached `tokio::spawn`
    /// task, returning its id immediately. `discussion_mode`, when given,
    /// forces discussion vs. execution semantics for this topic; when
    /// omitted, the schedule's own `discussion:` default applies (and
    /// discussion mode wins if neither says otherwise). `early_stop` gates
    /// the consensus short-circuit and defaults to `false` at the request
    /// layer. `on_complete`, if given, overrides the registry-wide default
    /// completion callback for this topic only.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_topic(
        self: &Arc<Self>,
        question: &str,
        owner: &str,
        max_rounds: u32,
        schedule: Schedule,
        discussion_mode: Option<bool>,
        early_stop: bool,
        on_complete: Option<Arc<dyn CompletionCallback>>,
    ) -> Result<String> {
        let topic_id = short_id();
        let discussion_mode =
            discussion_mode.unwrap_or(schedule.discussion_mode_default.unwrap_or(true));
        let names = schedule.referenced_agent_names();
        let (pool, lookup) = build_pool(&names, owner, self.collaborators.presets.as_ref()).await;

        let pool: Vec<Agent> = pool.into_iter().map(Agent::new).collect();

        let forum = Arc::new(Forum::new(
            topic_id.clone(),
            question.to_string(),
            owner.to_string(),
            max_rounds,
            discussion_mode,
            self.storage_dir.clone(),
            Arc::clone(&self.clock),
        ));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let callback = on_complete.or_else(|| self.collaborators.callback.clone());

        let engine = Engine::new(
            Arc::clone(&forum),
            schedule,
            pool,
            lookup,
            self.collaborators.clone(),
            self.config.clone(),
            Arc::clone(&self.events),
            owner.to_string(),
            cancel_rx,
            callback,
            early_stop,
        );

        let handle = tokio::spawn(engine.run());

        log::info!("registry: created topic {} for owner {}", topic_id, owner);

        let mut entries = self.entries.write().await;
        entries.insert(
            topic_id.clone(),
            RegistryEntry {
                forum,
                handle: Some(handle),
                cancel: cancel_tx,
            },
        );

        Ok(topic_id)
    }

    async fn get_entry_checked(
        &self,
        topic_id: &str,
        owner: &str,
    ) -> Result<Topic> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(topic_id)
            .ok_or_else(|| Error::NotFound(topic_id.to_string()))?;
        let topic = entry.forum.topic().await;
        if topic.owner != owner {
            log::warn!(
                "registry: owner mismatch for topic {} (requested by {})",
                topic_id,
                owner
            );
            return Err(Error::Forbidden);
        }
        Ok(topic)
    }

    pub async fn get_topic(&self, topic_id: &str, owner: &str) -> Result<Topic> {
        self.get_entry_checked(topic_id, owner).await
    }

    pub async fn list_topics(&self, owner: &str) -> Vec<TopicSummary> {
        let entries = self.entries.read().await;
        let mut out = Vec::new();
        for entry in entries.values() {
            let topic = entry.forum.topic().await;
            if topic.owner == owner {
                out.push(TopicSummary {
                    topic_id: topic.topic_id,
                    question: topic.question,
                    status: topic.status,
                    created_at: topic.created_at,
                });
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Idempotent: cancelling an already-terminal topic is a no-op rather
    /// than an error.
    pub async fn cancel_topic(&self, topic_id: &str, owner: &str) -> Result<()> {
        let topic = self.get_entry_checked(topic_id, owner).await?;
        if topic.status.is_terminal() {
            return Ok(());
        }
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(topic_id) {
            let _ = entry.cancel.send(true);
            log::info!("registry: cancel requested for topic {}", topic_id);
        }
        Ok(())
    }

    /// Cancel (if live), delete the persisted blob, and drop the entry.
    pub async fn purge_topic(&self, topic_id: &str, owner: &str) -> Result<()> {
        self.get_entry_checked(topic_id, owner).await?;
        self.cancel_topic(topic_id, owner).await?;
        let mut entries = self.entries.write().await;
        if let Some(_entry) = entries.remove(topic_id) {
            let path = self.storage_dir.join(format!("{}.json", topic_id));
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("registry: failed to remove blob {}: {}", path.display(), e);
                }
            }
            log::info!("registry: purged topic {}", topic_id);
        }
        Ok(())
    }

    /// Cancel and delete every topic owned by `owner`, returning the count
    /// removed.
    pub async fn purge_all(&self, owner: &str) -> usize {
        let ids: Vec<String> = {
            let entries = self.entries.read().await;
            let mut matching = Vec::new();
            for (id, entry) in entries.iter() {
                if entry.forum.topic().await.owner == owner {
                    matching.push(id.clone());
                }
            }
            matching
        };
        let mut count = 0;
        for id in ids {
            if self.purge_topic(&id, owner).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Wait (polling at the configured cadence) until the topic reaches a
    /// terminal state, or the timeout elapses.
    pub async fn wait_conclusion(
        &self,
        topic_id: &str,
        owner: &str,
        timeout: std::time::Duration,
    ) -> Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let topic = self.get_entry_checked(topic_id, owner).await?;
            if topic.status.is_terminal() {
                return Ok(topic.conclusion);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Build a lazy, owner-checked update stream for a topic, polling at the
    /// configured cadence until it reaches a terminal state.
    pub async fn stream_topic(
        &self,
        topic_id: &str,
        owner: &str,
    ) -> Result<impl Stream<Item = TopicUpdate>> {
        self.get_entry_checked(topic_id, owner).await?;
        let entries = self.entries.read().await;
        let forum = entries
            .get(topic_id)
            .map(|entry| Arc::clone(&entry.forum))
            .ok_or_else(|| Error::NotFound(topic_id.to_string()))?;
        Ok(stream::watch(forum, self.config.poll_interval))
    }

    /// Reload every persisted blob under `storage_dir` into a non-running
    /// entry — no driver task is attached, since resuming in-flight
    /// execution across restarts is explicitly out of scope.
    pub async fn load_all(self: &Arc<Self>) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.storage_dir).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "reading storage dir {}: {}",
                    self.storage_dir.display(),
                    e
                )))
            }
        };

        let mut loaded = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let topic_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            match Forum::load(&path, self.storage_dir.clone(), Arc::clone(&self.clock)).await {
                Ok(forum) => {
                    let (cancel_tx, _rx) = watch::channel(false);
                    let mut entries = self.entries.write().await;
                    entries.insert(
                        topic_id,
                        RegistryEntry {
                            forum: Arc::new(forum),
                            handle: None,
                            cancel: cancel_tx,
                        },
                    );
                    loaded += 1;
                }
                Err(e) => {
                    log::warn!("registry: failed to load {}: {}", path.display(), e);
                }
            }
        }
        log::info!("registry: loaded {} topics from {}", loaded, self.storage_dir.display());
        Ok(loaded)
    }

    /// Mark every still-live topic `error` with reason "service shut down"
    /// and persist all entries, then abort any still-running driver tasks.
    pub async fn shutdown(&self) {
        let entries = self.entries.read().await;
        for entry in entries.values() {
            let status = entry.forum.status().await;
            if !status.is_terminal() {
                if let Err(e) = entry.forum.fail("service shut down").await {
                    log::warn!("registry: shutdown failed to persist a topic: {}", e);
                }
            }
            if let Some(handle) = &entry.handle {
                handle.abort();
            }
        }
        log::info!("registry: shutdown complete, {} topics handled", entries.len());
    }
}
