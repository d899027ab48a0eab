//! Gemini `generateContent` shaped provider, modeled on the request/response
//! shape used by `Wandalen-api_llm`'s `api/gemini` client, adapted to the
//! single `analyze` contract this crate exposes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use triage_core::Advice;
use triage_retry::http::RetryingHttpClient;
use triage_secrets::SecretsStore;

use crate::registry::ModelLimits;
use crate::Provider;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
// Registered as "google" (spec.md §4.D's example provider names are
// "openai" and "google") even though the wire shape is Gemini's.
const PROVIDER_NAME: &str = "google";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: String,
}

/// Model-provider adapter for Gemini-shaped `generateContent` APIs.
pub struct GeminiProvider {
    client: RetryingHttpClient,
    secrets: Arc<SecretsStore>,
    base_url: String,
    model: String,
    limits: ModelLimits,
}

impl GeminiProvider {
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
impl Provider for GeminiProvider {
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

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.limits.max_tokens,
                temperature: self.limits.temperature,
                top_p: self.limits.top_p,
                response_mime_type: "application/json",
            },
        };

        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(_) => return None,
        };

        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, api_key
        );
        let headers = [("content-type", "application/json")];

        let response = match self.client.post(&url, body, &headers).await {
            Ok(response) => response,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(provider = PROVIDER_NAME, error = %err, "provider call failed");
                return None;
            }
        };

        let parsed: GenerateResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(_) => return None,
        };

        let text = parsed
            .candidates
            .into_iter()
            .next()?
            .content
            .parts
            .into_iter()
            .next()?
            .text;
        Some(crate::parse_advice(&text))
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}
