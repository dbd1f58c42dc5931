//! LLM completion adapters.
//!
//! One REST adapter per provider family behind the [`CompletionClient`]
//! trait. Errors come back pre-classified as [`ProviderError`] so the
//! analysis orchestrator's fallback policy can branch on quota vs.
//! missing-model vs. everything else without inspecting HTTP details.
//!
//! `list_models` backs the CLI `models` command; like every async
//! operation here it is cancelled promptly by dropping the future.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::embedding::default_base_url;
use crate::errors::EngineError;
use crate::provider::{detect_provider, ProviderError, ProviderKind};

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant analyzing CVs.";

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Run one completion. `max_tokens` bounds the response length.
    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;

    /// List the model names this provider currently serves.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;
}

/// REST completion adapter, provider selected from the API key's shape.
pub struct HttpCompletionClient {
    provider: ProviderKind,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn from_api_key(api_key: &str) -> Result<Self, EngineError> {
        let provider = detect_provider(api_key)?;
        Ok(Self::with_base_url(provider, api_key, default_base_url(provider)))
    }

    pub fn with_base_url(provider: ProviderKind, api_key: &str, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.to_string(),
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
        }
    }

    async fn send(
        &self,
        url: &str,
        body: serde_json::Value,
        model: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut request = self.client.post(url).json(&body);
        if self.provider == ProviderKind::OpenAi {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::classify(status.as_u16(), &body_text, model));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn complete(
        &self,
        prompt: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        match self.provider {
            ProviderKind::Gemini => {
                let url = format!(
                    "{}/v1beta/models/{}:generateContent?key={}",
                    self.base_url, model, self.api_key
                );
                let body = json!({
                    "contents": [{ "parts": [{ "text": format!("{}\n\n{}", SYSTEM_PROMPT, prompt) }] }],
                    "generationConfig": { "maxOutputTokens": max_tokens, "temperature": 0 }
                });
                let json = self.send(&url, body, model).await?;
                parse_completion_text(self.provider, &json)
            }
            ProviderKind::OpenAi => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                let body = json!({
                    "model": model,
                    "messages": [
                        { "role": "system", "content": SYSTEM_PROMPT },
                        { "role": "user", "content": prompt }
                    ],
                    "max_tokens": max_tokens,
                    "temperature": 0
                });
                let json = self.send(&url, body, model).await?;
                parse_completion_text(self.provider, &json)
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = match self.provider {
            ProviderKind::Gemini => {
                format!("{}/v1beta/models?key={}", self.base_url, self.api_key)
            }
            ProviderKind::OpenAi => format!("{}/v1/models", self.base_url),
        };

        let mut request = self.client.get(&url);
        if self.provider == ProviderKind::OpenAi {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::classify(status.as_u16(), &body_text, ""));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        Ok(parse_model_list(self.provider, &json))
    }
}

fn parse_completion_text(
    provider: ProviderKind,
    json: &serde_json::Value,
) -> Result<String, ProviderError> {
    let text = match provider {
        ProviderKind::Gemini => json
            .pointer("/candidates/0/content/parts")
            .and_then(|parts| parts.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            }),
        ProviderKind::OpenAi => json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string),
    };

    match text {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(ProviderError::Other(format!(
            "{}: no text in completion response",
            provider
        ))),
    }
}

fn parse_model_list(provider: ProviderKind, json: &serde_json::Value) -> Vec<String> {
    let (items, key) = match provider {
        ProviderKind::Gemini => (json.get("models"), "name"),
        ProviderKind::OpenAi => (json.get("data"), "id"),
    };
    items
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|m| m.get(key).and_then(|n| n.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gemini_completion_text() {
        let json = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "part one " }, { "text": "part two" }] } }]
        });
        let text = parse_completion_text(ProviderKind::Gemini, &json).unwrap();
        assert_eq!(text, "part one part two");
    }

    #[test]
    fn parses_openai_completion_text() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "answer" } }]
        });
        assert_eq!(
            parse_completion_text(ProviderKind::OpenAi, &json).unwrap(),
            "answer"
        );
    }

    #[test]
    fn empty_completion_is_an_error() {
        let json = serde_json::json!({ "candidates": [] });
        assert!(parse_completion_text(ProviderKind::Gemini, &json).is_err());
    }

    #[test]
    fn parses_model_lists_for_both_providers() {
        let gemini = serde_json::json!({ "models": [{ "name": "models/gemini-1.5-flash" }] });
        assert_eq!(
            parse_model_list(ProviderKind::Gemini, &gemini),
            vec!["models/gemini-1.5-flash"]
        );
        let openai = serde_json::json!({ "data": [{ "id": "gpt-4o-mini" }] });
        assert_eq!(
            parse_model_list(ProviderKind::OpenAi, &openai),
            vec!["gpt-4o-mini"]
        );
    }
}
