//! Chat-completion backends and the one-shot chat session.

use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A chat-completion provider.
///
/// `preamble` is the character persona; an empty preamble means the request
/// carries no system message at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, preamble: &str, user_message: &str) -> Result<String>;
}

/// A backend for any OpenAI-compatible chat API.
///
/// Covers both providers this application talks to: OpenAI directly, and
/// Gemini through its OpenAI-compatible endpoint.
pub struct OpenAICompatibleChat {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleChat {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

fn build_messages(
    preamble: &str,
    user_message: &str,
) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
    if !preamble.is_empty() {
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(preamble.to_owned())
                .build()?
                .into(),
        );
    }
    messages.push(
        ChatCompletionRequestUserMessageArgs::default()
            .content(user_message.to_owned())
            .build()?
            .into(),
    );
    Ok(messages)
}

#[async_trait]
impl ChatBackend for OpenAICompatibleChat {
    async fn complete(&self, preamble: &str, user_message: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(build_messages(preamble, user_message)?)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .context("chat completion returned no choices")?;
        choice
            .message
            .content
            .ok_or_else(|| anyhow!("chat completion had no text content"))
    }
}

/// One chat exchange at a time: the fixed preamble plus the newest user
/// message. No multi-turn history is carried between calls.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    preamble: String,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, preamble: String) -> Self {
        Self { backend, preamble }
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Sends one user message and returns the reply text.
    pub async fn ask(&self, message: &str) -> Result<String> {
        debug!(chars = message.len(), "sending user message to chat backend");
        self.backend.complete(&self.preamble, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_include_the_preamble_as_a_system_turn() {
        let messages = build_messages("You are a streamer.", "hello").unwrap();
        let as_json = serde_json::to_value(&messages).unwrap();

        assert_eq!(as_json.as_array().unwrap().len(), 2);
        assert_eq!(as_json[0]["role"], "system");
        assert_eq!(as_json[0]["content"], "You are a streamer.");
        assert_eq!(as_json[1]["role"], "user");
        assert_eq!(as_json[1]["content"], "hello");
    }

    #[test]
    fn empty_preamble_is_omitted_from_the_request() {
        let messages = build_messages("", "hello").unwrap();
        let as_json = serde_json::to_value(&messages).unwrap();

        assert_eq!(as_json.as_array().unwrap().len(), 1);
        assert_eq!(as_json[0]["role"], "user");
    }

    #[tokio::test]
    async fn session_prepends_its_preamble_to_every_ask() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_complete()
            .withf(|preamble, message| preamble == "persona" && message == "hello")
            .times(1)
            .returning(|_, _| Ok("hi there".into()));

        let session = ChatSession::new(Arc::new(backend), "persona".into());
        let reply = session.ask("hello").await.unwrap();
        assert_eq!(reply, "hi there");
    }

    #[tokio::test]
    async fn backend_errors_reach_the_caller() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_complete()
            .returning(|_, _| Err(anyhow!("rate limited")));

        let session = ChatSession::new(Arc::new(backend), String::new());
        let err = session.ask("hello").await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }
}
