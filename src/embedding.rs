//! Embedding provider abstraction and HTTP implementations.
//!
//! Defines the [`EmbeddingClient`] trait and one REST adapter per
//! provider family (Gemini `embedContent`, OpenAI `/v1/embeddings`).
//! Vector dimensionality is never assumed: the vector-store collection is
//! created lazily with the dimensionality of the first embedding seen.
//!
//! All call sites go through [`embed_gated`], which reserves a rate-gate
//! slot first and feeds any confirmed 429 back into the gate's cooldown.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::errors::EngineError;
use crate::provider::{detect_provider, ProviderError, ProviderKind};
use crate::rate::{CallCost, RateGate};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    /// Embed one text. Returns the raw vector; length is provider-defined.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// Embed through the shared rate gate. A 429 from the provider sets the
/// gate's global cooldown before the error is surfaced, so concurrent
/// siblings fail fast instead of queueing more doomed calls.
pub async fn embed_gated(
    gate: &RateGate,
    client: &dyn EmbeddingClient,
    text: &str,
) -> Result<Vec<f32>, EngineError> {
    gate.acquire(client.provider(), CallCost::for_text(text))
        .await?;
    match client.embed(text).await {
        Err(EngineError::RateLimited { retry_after_secs }) => {
            gate.report_rate_limited(client.provider(), retry_after_secs)
                .await;
            Err(EngineError::RateLimited { retry_after_secs })
        }
        other => other,
    }
}

/// REST embedding adapter, provider selected from the API key's shape.
pub struct HttpEmbeddingClient {
    provider: ProviderKind,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpEmbeddingClient {
    pub fn from_api_key(api_key: &str) -> Result<Self, EngineError> {
        let provider = detect_provider(api_key)?;
        Ok(Self::with_base_url(provider, api_key, default_base_url(provider)))
    }

    /// Used by tests and proxies to point at a different endpoint.
    pub fn with_base_url(provider: ProviderKind, api_key: &str, base_url: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.to_string(),
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }
}

pub(crate) fn default_base_url(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
        ProviderKind::OpenAi => "https://api.openai.com",
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let model = self.provider.embedding_model();
        let (url, body) = match self.provider {
            ProviderKind::Gemini => (
                format!(
                    "{}/v1beta/models/{}:embedContent?key={}",
                    self.base_url, model, self.api_key
                ),
                json!({ "content": { "parts": [{ "text": text }] } }),
            ),
            ProviderKind::OpenAi => (
                format!("{}/v1/embeddings", self.base_url),
                json!({ "model": model, "input": text }),
            ),
        };

        let mut request = self.client.post(&url).json(&body);
        if self.provider == ProviderKind::OpenAi {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return match ProviderError::classify(status.as_u16(), &body_text, model) {
                ProviderError::RateLimited { retry_after_secs } => {
                    Err(EngineError::RateLimited { retry_after_secs })
                }
                other => Err(EngineError::EmbeddingFailed(format!("{:?}", other))),
            };
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingFailed(e.to_string()))?;
        parse_embedding_response(self.provider, &json)
    }
}

fn parse_embedding_response(
    provider: ProviderKind,
    json: &serde_json::Value,
) -> Result<Vec<f32>, EngineError> {
    let values = match provider {
        ProviderKind::Gemini => json.pointer("/embedding/values"),
        ProviderKind::OpenAi => json.pointer("/data/0/embedding"),
    }
    .and_then(|v| v.as_array())
    .ok_or_else(|| {
        EngineError::EmbeddingFailed(format!("{}: malformed embedding response", provider))
    })?;

    let vector: Vec<f32> = values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    if vector.is_empty() {
        return Err(EngineError::EmbeddingFailed(format!(
            "{}: empty embedding",
            provider
        )));
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gemini_embedding_shape() {
        let json = serde_json::json!({ "embedding": { "values": [0.1, 0.2, 0.3] } });
        let v = parse_embedding_response(ProviderKind::Gemini, &json).unwrap();
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn parses_openai_embedding_shape() {
        let json = serde_json::json!({ "data": [ { "embedding": [1.0, -2.5] } ] });
        let v = parse_embedding_response(ProviderKind::OpenAi, &json).unwrap();
        assert_eq!(v, vec![1.0, -2.5]);
    }

    #[test]
    fn malformed_response_is_embedding_failed() {
        let json = serde_json::json!({ "unexpected": true });
        let err = parse_embedding_response(ProviderKind::Gemini, &json).unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingFailed(_)));
    }

    #[test]
    fn client_is_built_from_key_shape() {
        let client = HttpEmbeddingClient::from_api_key("AIzaTestKey").unwrap();
        assert_eq!(client.provider(), ProviderKind::Gemini);
        let client = HttpEmbeddingClient::from_api_key("sk-test").unwrap();
        assert_eq!(client.provider(), ProviderKind::OpenAi);
    }
}
