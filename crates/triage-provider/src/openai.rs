//! OpenAI chat-completions shaped provider, modeled on the request/response
//! shape used by `Wandalen-api_llm`'s `api/openai` client, adapted to the
//! single `analyze` contract this crate exposes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use triage_core::Advice;
use triage_retry::http::RetryingHttpClient;
use triage_secrets::SecretsStore;

use crate::registry::ModelLimits;
use crate::Provider;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const PROVIDER_NAME: &str = "openai";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Model-provider adapter for OpenAI-shaped chat-completions APIs.
pub struct OpenAiProvider {
    client: RetryingHttpClient,
    secrets: Arc<SecretsStore>,
    base_url: String,
    model: String,
    limits: ModelLimits,
}

impl OpenAiProvider {
    pub fn new(
        client: RetryingHttpClient,
        secrets: Arc<SecretsStore>,
        model: impl Into<String>,
        limits: ModelLimits,
    ) -> Self {
        Self {
            client,
            secrets,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            limits,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn analyze(&self, prompt: &str) -> Option<Advice> {
        let api_key = match self.secrets.get(PROVIDER_NAME) {
            Ok(Some(key)) => key,
            Ok(None) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(provider = PROVIDER_NAME, "no credentials configured");
                return None;
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(provider = PROVIDER_NAME, error = %err, "failed to read credentials");
                return None;
            }
        };

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.limits.max_tokens,
            temperature: self.limits.temperature,
            top_p: self.limits.top_p,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(_) => return None,
        };

        let auth_header = format!("Bearer {api_key}");
        let headers = [
            ("authorization", auth_header.as_str()),
            ("content-type", "application/json"),
        ];

        let response = match self.client.post(&self.base_url, body, &headers).await {
            Ok(response) => response,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(provider = PROVIDER_NAME, error = %err, "provider call failed");
                return None;
            }
        };

        let parsed: ChatResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(_) => return None,
        };

        let content = parsed.choices.into_iter().next()?.message.content;
        Some(crate::parse_advice(&content))
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
