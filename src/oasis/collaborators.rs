//! Collaborator traits the engine depends on but the crate treats as
//! external: the LLM itself, a sibling bot-session runtime, an external
//! OpenAI-compatible endpoint, the expert-preset store, and an optional
//! completion callback.
//!
//! Each surface is a plain `async_trait`, narrowed to the exact
//! request/response contract this engine needs rather than a general
//! chat-client surface.

use async_trait::async_trait;

use crate::oasis::error::{Error, Result};

/// One message in a prompt sent to an LLM.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A stateless LLM completion call. Implementations fail with
/// [`Error::Llm`] on network, timeout, or parse errors.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// A sibling, stateful "bot session" runtime addressed by `(owner,
/// session_id)`. Sessions are created lazily on first use. Implementations
/// fail with [`Error::Session`].
#[async_trait]
pub trait BotSessionClient: Send + Sync {
    async fn ask(
        &self,
        owner: &str,
        session_id: &str,
        message: &str,
        first_round_persona: Option<&str>,
    ) -> Result<String>;
}

/// An external OpenAI-compatible chat endpoint, assumed stateful on the far
/// side — the engine never passes history to it.
#[async_trait]
pub trait ExternalChatClient: Send + Sync {
    async fn complete(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String>;
}

/// A preset looked up by `(tag, owner)`.
#[derive(Debug, Clone)]
pub struct ExpertPreset {
    pub display_name: String,
    pub persona: String,
    pub temperature: f32,
}

/// Read-only lookup of configured expert presets.
#[async_trait]
pub trait ExpertPresetStore: Send + Sync {
    async fn lookup_by_tag(&self, tag: &str, owner: &str) -> Option<ExpertPreset>;
}

/// Delivered once a topic reaches a terminal state, if a callback was
/// supplied at `create_topic`. Failure is logged only; it never affects
/// topic status.
#[derive(Debug, Clone)]
pub struct CompletionNotice {
    pub topic_id: String,
    pub owner: String,
    pub status: String,
    pub conclusion: String,
}

#[async_trait]
pub trait CompletionCallback: Send + Sync {
    async fn notify(&self, notice: CompletionNotice) -> Result<()>;
}

/// Bundle of every collaborator the engine needs for one topic run. Passed
/// in explicitly rather than resolved from a global registry, per the
/// design note that dependencies should be constructible handles. Cheap to
/// clone: every field is an `Arc`, needed so each `Parallel`/`All` member's
/// spawned task can own its handles independently.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: std::sync::Arc<dyn LlmClient>,
    pub sessions: std::sync::Arc<dyn BotSessionClient>,
    pub external: std::sync::Arc<dyn ExternalChatClient>,
    pub presets: std::sync::Arc<dyn ExpertPresetStore>,
    pub callback: Option<std::sync::Arc<dyn CompletionCallback>>,
}

/// Stub preset store with no presets configured; useful as a default when a
/// deployment has no preset backing store.
pub struct NoPresets;

#[async_trait]
impl ExpertPresetStore for NoPresets {
    async fn lookup_by_tag(&self, _tag: &str, _owner: &str) -> Option<ExpertPreset> {
        None
    }
}

/// A bot-session/external client that always fails; useful when a
/// deployment only wires up the direct-LLM variant.
pub struct Unconfigured;

#[async_trait]
impl BotSessionClient for Unconfigured {
    async fn ask(
        &self,
        _owner: &str,
        _session_id: &str,
        _message: &str,
        _first_round_persona: Option<&str>,
    ) -> Result<String> {
        Err(Error::Session("no bot-session collaborator configured".to_string()))
    }
}

#[async_trait]
impl ExternalChatClient for Unconfigured {
    async fn complete(
        &self,
        _endpoint: &str,
        _headers: &[(String, String)],
        _model: &str,
        _messages: &[ChatMessage],
    ) -> Result<String> {
        Err(Error::Llm("no external chat collaborator configured".to_string()))
    }
}
