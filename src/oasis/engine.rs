//! The per-topic orchestrator: round loop, step dispatch, fan-out,
//! cancellation, early-stop, and summarization.
//!
//! Each topic's `Engine` is spawned as its own `tokio::spawn` task by the
//! registry, one task per orchestration run, fanning `Parallel` steps out
//! across further `tokio::spawn`ed member tasks joined before the step
//! completes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::oasis::agent::Agent;
use crate::oasis::collaborators::{Collaborators, CompletionCallback, CompletionNotice};
use crate::oasis::config::OasisConfig;
use crate::oasis::error::Result;
use crate::oasis::event::{EngineEvent, EventHandler};
use crate::oasis::forum::{Forum, TimelineEventKind};
use crate::oasis::schedule::{Schedule, Step};
use crate::oasis::summarize::summarize;

enum LoopOutcome {
    Completed,
    Cancelled,
}

/// Drives one topic's schedule to completion. Holds no mutable state of its
/// own beyond the cancellation receiver — every durable mutation goes
/// through `forum`.
pub struct Engine {
    forum: Arc<Forum>,
    schedule: Schedule,
    pool: Vec<Agent>,
    lookup: HashMap<String, usize>,
    collaborators: Collaborators,
    config: OasisConfig,
    events: Arc<dyn EventHandler>,
    owner: String,
    cancel_rx: watch::Receiver<bool>,
    callback: Option<Arc<dyn CompletionCallback>>,
    /// Whether the consensus predicate may short-circuit the round/step
    /// loop. Defaults to `false` at the registry level; an explicit
    /// per-request opt-in.
    early_stop: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        forum: Arc<Forum>,
        schedule: Schedule,
        pool: Vec<Agent>,
        lookup: HashMap<String, usize>,
        collaborators: Collaborators,
        config: OasisConfig,
        events: Arc<dyn EventHandler>,
        owner: String,
        cancel_rx: watch::Receiver<bool>,
        callback: Option<Arc<dyn CompletionCallback>>,
        early_stop: bool,
    ) -> Self {
        Engine {
            forum,
            schedule,
            pool,
            lookup,
            collaborators,
            config,
            events,
            owner,
            cancel_rx,
            callback,
            early_stop,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Run the topic to a terminal state. Consumes `self` since a topic's
    /// engine never runs twice.
    pub async fn run(self) {
        let topic_id = self.forum.topic().await.topic_id;

        if let Err(e) = self.forum.start_discussing().await {
            log::error!("engine: topic {} failed to start: {}", topic_id, e);
            return;
        }
        self.events
            .on_event(EngineEvent::TopicStarted {
                topic_id: topic_id.clone(),
            })
            .await;

        let discussion_mode = self.forum.topic().await.discussion_mode;

        let outcome = if self.schedule.repeat {
            self.run_repeat(&topic_id, discussion_mode).await
        } else {
            self.run_stepwise(&topic_id, discussion_mode).await
        };

        match outcome {
            Ok(LoopOutcome::Cancelled) => {
                let _ = self.forum.cancel().await;
                log::info!("engine: topic {} cancelled", topic_id);
                self.events
                    .on_event(EngineEvent::TopicCancelled {
                        topic_id: topic_id.clone(),
                    })
                    .await;
            }
            Ok(LoopOutcome::Completed) => {
                let topic = self.forum.topic().await;
                let all_posts = self.forum.browse().await;
                let top_posts = self.forum.get_top_posts(5).await;
                let conclusion = summarize(
                    &topic.question,
                    &all_posts,
                    &top_posts,
                    topic.current_round,
                    self.collaborators.llm.as_ref(),
                    &self.config,
                )
                .await;
                let _ = self.forum.conclude(&conclusion).await;
                log::info!("engine: topic {} concluded", topic_id);
                self.events
                    .on_event(EngineEvent::TopicConcluded {
                        topic_id: topic_id.clone(),
                    })
                    .await;
            }
            Err(e) => {
                log::error!("engine: topic {} failed fatally: {}", topic_id, e);
                let _ = self.forum.fail(&e.to_string()).await;
                self.events
                    .on_event(EngineEvent::TopicErrored {
                        topic_id: topic_id.clone(),
                        reason: e.to_string(),
                    })
                    .await;
            }
        }

        if let Some(callback) = &self.callback {
            let topic = self.forum.topic().await;
            let notice = CompletionNotice {
                topic_id: topic.topic_id.clone(),
                owner: topic.owner.clone(),
                status: format!("{:?}", topic.status).to_lowercase(),
                conclusion: topic.conclusion.clone(),
            };
            if let Err(e) = callback.notify(notice).await {
                log::warn!(
                    "engine: completion callback failed for topic {}: {}",
                    topic_id,
                    e
                );
            }
        }
    }

    async fn run_repeat(&self, topic_id: &str, discussion_mode: bool) -> Result<LoopOutcome> {
        let max_rounds = self.forum.topic().await.max_rounds;
        for round_num in 1..=max_rounds {
            if self.is_cancelled() {
                return Ok(LoopOutcome::Cancelled);
            }
            self.forum.set_current_round(round_num).await?;
            self.forum
                .append_timeline(
                    TimelineEventKind::Round,
                    None,
                    &format!("round {} started", round_num),
                )
                .await?;
            self.events
                .on_event(EngineEvent::RoundStarted {
                    topic_id: topic_id.to_string(),
                    round: round_num,
                })
                .await;

            for (step_index, step) in self.schedule.steps.iter().enumerate() {
                if self.is_cancelled() {
                    return Ok(LoopOutcome::Cancelled);
                }
                self.execute_step(step, step_index, topic_id, discussion_mode).await;
            }

            self.events
                .on_event(EngineEvent::RoundCompleted {
                    topic_id: topic_id.to_string(),
                    round: round_num,
                })
                .await;

            // Consensus is only meaningful once at least two rounds have run;
            // checking after round 1 would compare a post against itself.
            if self.early_stop && discussion_mode && round_num >= 2 {
                let reached = self.consensus_reached().await;
                self.events
                    .on_event(EngineEvent::ConsensusChecked {
                        topic_id: topic_id.to_string(),
                        reached,
                    })
                    .await;
                if reached {
                    break;
                }
            }
        }
        Ok(LoopOutcome::Completed)
    }

    async fn run_stepwise(&self, topic_id: &str, discussion_mode: bool) -> Result<LoopOutcome> {
        self.forum
            .set_max_rounds(self.schedule.steps.len() as u32)
            .await?;

        for (step_index, step) in self.schedule.steps.iter().enumerate() {
            if self.is_cancelled() {
                return Ok(LoopOutcome::Cancelled);
            }
            let round = (step_index + 1) as u32;
            self.forum.set_current_round(round).await?;
            self.forum
                .append_timeline(
                    TimelineEventKind::Round,
                    None,
                    &format!("step {} started", round),
                )
                .await?;
            self.events
                .on_event(EngineEvent::RoundStarted {
                    topic_id: topic_id.to_string(),
                    round,
                })
                .await;

            self.execute_step(step, step_index, topic_id, discussion_mode).await;

            self.events
                .on_event(EngineEvent::RoundCompleted {
                    topic_id: topic_id.to_string(),
                    round,
                })
                .await;

            if self.early_stop && discussion_mode && step_index >= 1 {
                let reached = self.consensus_reached().await;
                self.events
                    .on_event(EngineEvent::ConsensusChecked {
                        topic_id: topic_id.to_string(),
                        reached,
                    })
                    .await;
                if reached {
                    break;
                }
            }
        }
        Ok(LoopOutcome::Completed)
    }

    async fn execute_step(
        &self,
        step: &Step,
        step_index: usize,
        topic_id: &str,
        discussion_mode: bool,
    ) {
        if self.is_cancelled() {
            return;
        }
        self.events
            .on_event(EngineEvent::StepStarted {
                topic_id: topic_id.to_string(),
                step_index,
            })
            .await;

        match step {
            Step::Manual {
                author,
                content,
                reply_to,
            } => {
                if let Err(e) = self.forum.publish(author, content, *reply_to).await {
                    log::warn!(
                        "engine: manual injection rejected in topic {}: {}",
                        topic_id,
                        e
                    );
                }
            }
            Step::Expert { name, instruction } => {
                match lookup_agent(&self.pool, &self.lookup, name) {
                    Some(agent) => {
                        let question = self.forum.topic().await.question;
                        agent
                            .participate(
                                topic_id,
                                &self.forum,
                                &question,
                                instruction.as_deref(),
                                discussion_mode,
                                &self.owner,
                                &self.collaborators,
                                &self.config,
                                self.events.as_ref(),
                            )
                            .await;
                    }
                    None => {
                        log::warn!(
                            "engine: step references unknown agent '{}' in topic {}, skipping",
                            name,
                            topic_id
                        );
                    }
                }
            }
            Step::Parallel { members } => {
                let mut resolved = Vec::new();
                for member in members {
                    match lookup_agent(&self.pool, &self.lookup, &member.name) {
                        Some(agent) => resolved.push((agent, member.instruction.as_deref())),
                        None => log::warn!(
                            "engine: parallel step references unknown agent '{}' in topic {}, skipping",
                            member.name,
                            topic_id
                        ),
                    }
                }
                self.dispatch_concurrently(resolved, topic_id, discussion_mode)
                    .await;
            }
            Step::All { instruction } => {
                let resolved: Vec<(&Agent, Option<&str>)> = self
                    .pool
                    .iter()
                    .map(|a| (a, instruction.as_deref()))
                    .collect();
                self.dispatch_concurrently(resolved, topic_id, discussion_mode)
                    .await;
            }
        }
    }

    /// Run every given agent's `participate` concurrently and wait for all
    /// of them, discarding per-agent errors (already logged inside
    /// `Agent::participate`).
    async fn dispatch_concurrently(
        &self,
        members: Vec<(&Agent, Option<&str>)>,
        topic_id: &str,
        discussion_mode: bool,
    ) {
        if self.is_cancelled() || members.is_empty() {
            return;
        }
        let question = self.forum.topic().await.question;
        let mut tasks = Vec::with_capacity(members.len());

        for (agent, instruction) in members {
            let forum = Arc::clone(&self.forum);
            let collaborators = self.collaborators.clone();
            let config = self.config.clone();
            let events = Arc::clone(&self.events);
            let owner = self.owner.clone();
            let topic_id = topic_id.to_string();
            let question = question.clone();
            let instruction = instruction.map(|s| s.to_string());
            let handle = agent.handle.clone();

            tasks.push(tokio::spawn(async move {
                let agent = Agent::new(handle);
                agent
                    .participate(
                        &topic_id,
                        &forum,
                        &question,
                        instruction.as_deref(),
                        discussion_mode,
                        &owner,
                        &collaborators,
                        &config,
                        events.as_ref(),
                    )
                    .await;
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                log::warn!(
                    "engine: an agent dispatch task panicked in topic {}: {}",
                    topic_id,
                    e
                );
            }
        }
    }

    /// Holds when the single top post carries upvotes from at least 70% of
    /// the pool, rounded up. Evaluated only in discussion mode.
    async fn consensus_reached(&self) -> bool {
        let top = self.forum.get_top_posts(1).await;
        match top.first() {
            Some(post) => {
                let pool_len = self.pool.len() as u64;
                let required = (7 * pool_len + 9) / 10;
                post.upvotes >= required
            }
            None => false,
        }
    }
}

fn lookup_agent<'a>(
    pool: &'a [Agent],
    lookup_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'a Agent> {
    lookup_map.get(name).and_then(|&idx| pool.get(idx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oasis::resolver::{AgentHandle, AgentKind};

    fn handle(name: &str) -> AgentHandle {
        AgentHandle {
            kind: AgentKind::Direct,
            display_name: name.to_string(),
            tag: name.to_string(),
            persona: String::new(),
            session_id: String::new(),
            instance_number: 1,
            external_id: String::new(),
            source_name: format!("{}#temp#1", name),
            temperature: 0.7,
        }
    }

    #[test]
    fn lookup_agent_finds_by_display_name() {
        let pool = vec![Agent::new(handle("a")), Agent::new(handle("b"))];
        let mut map = HashMap::new();
        map.insert("a".to_string(), 0);
        map.insert("b".to_string(), 1);
        assert_eq!(lookup_agent(&pool, &map, "b").unwrap().handle.display_name, "b");
        assert!(lookup_agent(&pool, &map, "missing").is_none());
    }

    #[tokio::test]
    async fn consensus_threshold_rounds_up() {
        // pool of 4 needs ceil(0.7*4) = 3 upvotes; pool of 3 needs ceil(2.1) = 3.
        let pool4 = vec![
            Agent::new(handle("a")),
            Agent::new(handle("b")),
            Agent::new(handle("c")),
            Agent::new(handle("d")),
        ];
        let required = (7 * pool4.len() as u64 + 9) / 10;
        assert_eq!(required, 3);

        let pool3_len = 3u64;
        let required3 = (7 * pool3_len + 9) / 10;
        assert_eq!(required3, 3);
    }
}
