//! Grounded-answer LLM client.
//!
//! Builds an `async-openai` client and sends a single non-streaming chat
//! completion per question: a fixed system instruction restricting the
//! model to the supplied sources, followed by the assembled context and
//! question as one user message. The answer comes back as a single string,
//! not a token stream.

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::debug;

use crate::errors::CoreError;

/// The fixed instruction half of the grounded prompt (§4.4 step 7).
const GROUNDING_INSTRUCTION: &str =
    "Answer only from the provided sources. If the sources are insufficient to answer, say so. \
     Cite source indices like [source 1] when you use them.";

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends a grounded prompt (context + question) and returns the answer
    /// text. Fails with `CoreError::BackendUnavailable` on upstream failure.
    async fn answer(&self, context: &str, question: &str) -> Result<String, CoreError>;
}

/// An `LlmClient` that always fails; used when `llm.provider = "disabled"`.
pub struct DisabledLlmClient;

#[async_trait]
impl LlmClient for DisabledLlmClient {
    async fn answer(&self, _context: &str, _question: &str) -> Result<String, CoreError> {
        Err(CoreError::BackendUnavailable("LLM provider is disabled".to_string()))
    }
}

/// `async-openai`-backed client for OpenAI-compatible chat completion
/// endpoints.
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiLlmClient {
    pub fn new(model: impl Into<String>, api_key: Option<String>, api_base: Option<String>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Some(key) = api_key {
            config = config.with_api_key(key);
        }
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        Self { client: Client::with_config(config), model: model.into() }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn answer(&self, context: &str, question: &str) -> Result<String, CoreError> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(GROUNDING_INSTRUCTION)
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build system message: {e}")))?;

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(format!("{context}\n\nQuestion: {question}"))
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build user message: {e}")))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![system_message.into(), user_message.into()])
            .build()
            .map_err(|e| CoreError::Internal(format!("failed to build chat request: {e}")))?;

        debug!(model = %self.model, "sending grounded chat completion request");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CoreError::BackendUnavailable("LLM returned no answer".to_string()))?;

        Ok(answer)
    }
}

/// Builds the configured LLM client. The per-question deadline is enforced
/// by the caller around the whole embed→search→hydrate→LLM sequence (§4.4
/// "Rate and cost"), not around this client alone.
pub fn build_client(
    provider: &str,
    model: &str,
    api_key: Option<String>,
    api_base: Option<String>,
) -> Box<dyn LlmClient> {
    match provider {
        "openai" => Box::new(OpenAiLlmClient::new(model, api_key, api_base)),
        _ => Box::new(DisabledLlmClient),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_is_backend_unavailable() {
        let err = DisabledLlmClient.answer("ctx", "q").await.unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable(_)));
    }
}
