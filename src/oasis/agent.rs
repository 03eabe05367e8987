//! The four agent variants and the shared `participate` contract.
//!
//! Modeled as a closed tagged sum type rather than a trait object: dispatch
//! is exhaustive over a fixed, small variant set, so a `match` on kind reads
//! better here than dynamic polymorphism would.

use std::collections::HashSet;

use serde::Deserialize;

use crate::oasis::collaborators::{ChatMessage, ChatRole, Collaborators};
use crate::oasis::config::OasisConfig;
use crate::oasis::event::{EngineEvent, EventHandler};
use crate::oasis::forum::{Forum, Post, TimelineEventKind, VotePolarity};
use crate::oasis::resolver::{AgentHandle, AgentKind};

/// Recent-posts window included in every constructed prompt.
const RECENT_POSTS_WINDOW: usize = 10;
/// Token budget for a single agent turn; summarization has its own,
/// configurable bound (see `OasisConfig::summarize_max_tokens`).
const AGENT_MAX_TOKENS: u32 = 1024;
const DEFAULT_EXTERNAL_MODEL: &str = "gpt-4o-mini";

/// A resolved, dispatchable agent.
pub struct Agent {
    pub handle: AgentHandle,
}

impl Agent {
    pub fn new(handle: AgentHandle) -> Self {
        Agent { handle }
    }

    fn temperature(&self) -> f32 {
        self.handle.temperature
    }

    /// Read the forum, ask the underlying collaborator for a turn, and
    /// publish at most one post. Never fails outward: any error is logged,
    /// recorded as an `error` timeline event under this agent's display
    /// name, and reported through `events` as `AgentCallFailed` — the step
    /// simply proceeds without this agent's contribution.
    pub async fn participate(
        &self,
        topic_id: &str,
        forum: &Forum,
        question: &str,
        instruction: Option<&str>,
        discussion_mode: bool,
        owner: &str,
        collaborators: &Collaborators,
        config: &OasisConfig,
        events: &dyn EventHandler,
    ) {
        events
            .on_event(EngineEvent::AgentCallStarted {
                topic_id: topic_id.to_string(),
                agent: self.handle.display_name.clone(),
            })
            .await;

        let recent = forum.browse().await;
        let is_first_turn = !recent_has_prior_call(&forum.timeline().await, &self.handle.display_name);
        let prompt = build_prompt(question, &recent, instruction, discussion_mode);

        let _ = forum
            .append_timeline(
                TimelineEventKind::AgentCall,
                Some(&self.handle.display_name),
                "calling",
            )
            .await;

        let raw = match self.call(&prompt, is_first_turn, collaborators, config, owner).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "agent '{}' failed to participate in topic {}: {}",
                    self.handle.display_name,
                    topic_id,
                    e
                );
                let _ = forum
                    .append_timeline(
                        TimelineEventKind::Error,
                        Some(&self.handle.display_name),
                        &e.to_string(),
                    )
                    .await;
                events
                    .on_event(EngineEvent::AgentCallFailed {
                        topic_id: topic_id.to_string(),
                        agent: self.handle.display_name.clone(),
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let _ = forum
            .append_timeline(
                TimelineEventKind::AgentDone,
                Some(&self.handle.display_name),
                "done",
            )
            .await;
        events
            .on_event(EngineEvent::AgentCallCompleted {
                topic_id: topic_id.to_string(),
                agent: self.handle.display_name.clone(),
            })
            .await;

        let parsed = if discussion_mode {
            parse_discussion_response(&raw)
        } else {
            ParsedResponse {
                content: raw,
                reply_to: None,
                votes: Vec::new(),
            }
        };

        let post = match forum
            .publish(&self.handle.display_name, &parsed.content, parsed.reply_to)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                log::warn!(
                    "agent '{}' publish rejected in topic {}: {}",
                    self.handle.display_name,
                    topic_id,
                    e
                );
                let _ = forum
                    .append_timeline(
                        TimelineEventKind::Error,
                        Some(&self.handle.display_name),
                        &e.to_string(),
                    )
                    .await;
                return;
            }
        };

        events
            .on_event(EngineEvent::PostPublished {
                topic_id: topic_id.to_string(),
                post_id: post.id,
                author: self.handle.display_name.clone(),
            })
            .await;

        // An agent that casts the same (post_id, polarity) vote more than
        // once in a single turn contributes at most one unit; re-voting in
        // a later round is a separate dispatch and is allowed to add another.
        let mut seen: HashSet<(u64, bool)> = HashSet::new();
        for vote in parsed.votes {
            let key = (vote.post_id, matches!(vote.polarity, VotePolarity::Up));
            if !seen.insert(key) {
                continue;
            }
            if forum
                .vote(vote.post_id, vote.polarity, &self.handle.display_name)
                .await
                .is_ok()
            {
                events
                    .on_event(EngineEvent::VoteCast {
                        topic_id: topic_id.to_string(),
                        post_id: vote.post_id,
                        voter: self.handle.display_name.clone(),
                    })
                    .await;
            }
        }
    }

    async fn call(
        &self,
        prompt: &str,
        is_first_turn: bool,
        collaborators: &Collaborators,
        config: &OasisConfig,
        owner: &str,
    ) -> crate::oasis::error::Result<String> {
        use crate::oasis::error::Error;
        use tokio::time::timeout;

        match self.handle.kind {
            AgentKind::Direct => {
                let mut messages = Vec::new();
                if !self.handle.persona.is_empty() {
                    messages.push(ChatMessage {
                        role: ChatRole::System,
                        content: self.handle.persona.clone(),
                    });
                }
                messages.push(ChatMessage {
                    role: ChatRole::User,
                    content: prompt.to_string(),
                });
                timeout(
                    config.direct_call_timeout,
                    collaborators
                        .llm
                        .complete(&messages, self.temperature(), AGENT_MAX_TOKENS),
                )
                .await
                .map_err(|_| Error::Llm("direct call timed out".to_string()))?
            }
            AgentKind::OasisSession => {
                let persona = if is_first_turn && !self.handle.persona.is_empty() {
                    Some(self.handle.persona.as_str())
                } else {
                    None
                };
                timeout(
                    config.session_call_timeout,
                    collaborators
                        .sessions
                        .ask(owner, &self.handle.session_id, prompt, persona),
                )
                .await
                .map_err(|_| Error::Session("oasis session call timed out".to_string()))?
            }
            AgentKind::RegularSession => timeout(
                config.session_call_timeout,
                collaborators
                    .sessions
                    .ask(owner, &self.handle.session_id, prompt, None),
            )
            .await
            .map_err(|_| Error::Session("session call timed out".to_string()))?,
            AgentKind::External => {
                let messages = vec![ChatMessage {
                    role: ChatRole::User,
                    content: prompt.to_string(),
                }];
                timeout(
                    config.direct_call_timeout,
                    collaborators.external.complete(
                        &self.handle.external_id,
                        &[],
                        DEFAULT_EXTERNAL_MODEL,
                        &messages,
                    ),
                )
                .await
                .map_err(|_| Error::Llm("external call timed out".to_string()))?
            }
        }
    }
}

fn recent_has_prior_call(timeline: &[crate::oasis::forum::TimelineEvent], agent: &str) -> bool {
    timeline.iter().any(|e| {
        matches!(e.event, TimelineEventKind::AgentCall | TimelineEventKind::Post)
            && e.agent.as_deref() == Some(agent)
    })
}

fn build_prompt(
    question: &str,
    recent: &[Post],
    instruction: Option<&str>,
    discussion_mode: bool,
) -> String {
    let mut out = String::new();
    out.push_str("Question: ");
    out.push_str(question);
    out.push('\n');

    let window_start = recent.len().saturating_sub(RECENT_POSTS_WINDOW);
    if !recent[window_start..].is_empty() {
        out.push_str("\nRecent posts:\n");
        for post in &recent[window_start..] {
            out.push_str(&format!(
                "#{} {}: {} (+{}/-{})\n",
                post.id, post.author, post.content, post.upvotes, post.downvotes
            ));
        }
    }

    if let Some(instr) = instruction {
        out.push_str("\nInstruction: ");
        out.push_str(instr);
        out.push('\n');
    }

    if discussion_mode {
        out.push_str(
            "\nRespond as JSON: {\"content\": string, \"reply_to\": int or null, \
             \"votes\": [{\"post_id\": int, \"vote\": \"up\"|\"down\"}]}\n",
        );
    } else {
        out.push_str("\nRespond with your task output as plain text.\n");
    }

    out
}

struct ParsedResponse {
    content: String,
    reply_to: Option<u64>,
    votes: Vec<ParsedVote>,
}

struct ParsedVote {
    post_id: u64,
    polarity: VotePolarity,
}

#[derive(Deserialize)]
struct DiscussionResponseRaw {
    content: String,
    #[serde(default)]
    reply_to: Option<u64>,
    #[serde(default)]
    votes: Vec<VoteRaw>,
}

#[derive(Deserialize)]
struct VoteRaw {
    post_id: u64,
    vote: String,
}

/// Parse a discussion-mode reply leniently: a well-formed JSON object wins;
/// anything else falls back to treating the whole response as plain content
/// with no reply target and no votes, tolerating free-form LLM output.
fn parse_discussion_response(raw: &str) -> ParsedResponse {
    match serde_json::from_str::<DiscussionResponseRaw>(raw.trim()) {
        Ok(parsed) => ParsedResponse {
            content: parsed.content,
            reply_to: parsed.reply_to,
            votes: parsed
                .votes
                .into_iter()
                .filter_map(|v| {
                    let polarity = match v.vote.to_ascii_lowercase().as_str() {
                        "up" => Some(VotePolarity::Up),
                        "down" => Some(VotePolarity::Down),
                        _ => None,
                    };
                    polarity.map(|polarity| ParsedVote {
                        post_id: v.post_id,
                        polarity,
                    })
                })
                .collect(),
        },
        Err(_) => ParsedResponse {
            content: raw.trim().to_string(),
            reply_to: None,
            votes: Vec::new(),
        },
    }
}
