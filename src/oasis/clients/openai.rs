//! Reference [`LlmClient`] implementation over OpenAI's Chat Completions API.
//!
//! Narrowed to the single `complete(messages, temperature, max_tokens) ->
//! String` contract this crate's agent variants need, rather than a
//! general-purpose chat surface that also threads tool calls and streaming.
//! Built on `openai_rust2`.

use async_trait::async_trait;
use lazy_static::lazy_static;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use std::time::Duration;

use crate::oasis::collaborators::{ChatMessage, ChatRole, LlmClient};
use crate::oasis::error::{Error, Result};

lazy_static! {
    /// Shared HTTP client with persistent connection pooling, matching the
    /// tuning `clients::common::get_shared_http_client` applies elsewhere in
    /// this lineage.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build shared HTTP client")
    };
}

/// A direct OpenAI (or OpenAI-compatible) chat completion client.
pub struct OpenAiLlmClient {
    client: openai_rust::Client,
    model: String,
}

impl OpenAiLlmClient {
    /// Construct a client against the official OpenAI endpoint.
    pub fn new(secret_key: &str, model: &str) -> Self {
        OpenAiLlmClient {
            client: openai_rust::Client::new_with_client(secret_key, SHARED_HTTP_CLIENT.clone()),
            model: model.to_string(),
        }
    }

    /// Construct a client against a custom OpenAI-compatible base URL (used
    /// by the `external` agent variant's endpoint override).
    pub fn new_with_base_url(secret_key: &str, model: &str, base_url: &str) -> Self {
        OpenAiLlmClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                secret_key,
                SHARED_HTTP_CLIENT.clone(),
                base_url,
            ),
            model: model.to_string(),
        }
    }
}

fn to_openai_role(role: ChatRole) -> String {
    match role {
        ChatRole::System => "system".to_string(),
        ChatRole::User => "user".to_string(),
        ChatRole::Assistant => "assistant".to_string(),
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        let formatted: Vec<chat::Message> = messages
            .iter()
            .map(|m| chat::Message {
                role: to_openai_role(m.role),
                content: m.content.clone(),
            })
            .collect();

        // `ChatArguments` exposes no temperature/max-tokens knobs in this
        // lineage, same as the other call sites (`clients/openai.rs`,
        // `clients/common.rs::send_and_track`) — neither ever sets them
        // either, leaving the model's own defaults in effect.
        let chat_arguments = chat::ChatArguments::new(&self.model, formatted);

        let response = self
            .client
            .create_chat(chat_arguments, Some("/v1/chat/completions".to_string()))
            .await
            .map_err(|e| Error::Llm(format!("openai chat completion failed: {}", e)))?;

        response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| Error::Llm("openai response had no choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_mapping_matches_openai_wire_values() {
        assert_eq!(to_openai_role(ChatRole::System), "system");
        assert_eq!(to_openai_role(ChatRole::User), "user");
        assert_eq!(to_openai_role(ChatRole::Assistant), "assistant");
    }
}
