//! Provider identification and per-provider policy.
//!
//! The provider serving a request is inferred from the structural shape of
//! the API key, never from a user-supplied flag. The heuristic is brittle
//! by nature, so it lives here in one unit-tested function. Fallback model
//! ordering and provider error classification are also policy and live
//! alongside it.

use crate::errors::EngineError;

/// An external AI provider family. One rate-gate scope per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// First-choice completion model when the caller does not override.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-1.5-flash",
            ProviderKind::OpenAi => "gpt-4o-mini",
        }
    }

    /// Ordered fallback models tried when a model has been renamed or
    /// retired. The first entry is the default model itself, so fallback
    /// iteration naturally skips whatever was already attempted.
    pub fn fallback_models(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Gemini => &[
                "gemini-1.5-flash",
                "gemini-1.5-flash-8b",
                "gemini-1.5-pro",
            ],
            ProviderKind::OpenAi => &["gpt-4o-mini", "gpt-4o", "gpt-3.5-turbo"],
        }
    }

    pub fn embedding_model(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "text-embedding-004",
            ProviderKind::OpenAi => "text-embedding-3-small",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the provider from the key's shape: Google API keys start with
/// `AIza`, OpenAI keys with `sk-`.
pub fn detect_provider(api_key: &str) -> Result<ProviderKind, EngineError> {
    let key = api_key.trim();
    if key.is_empty() {
        return Err(EngineError::InvalidInput("API key is required".into()));
    }
    if key.starts_with("AIza") {
        Ok(ProviderKind::Gemini)
    } else if key.starts_with("sk-") {
        Ok(ProviderKind::OpenAi)
    } else {
        Err(EngineError::InvalidInput(
            "unrecognized API key shape (expected a Google 'AIza…' or OpenAI 'sk-…' key)".into(),
        ))
    }
}

/// A classified failure from a provider call. The orchestrator's fallback
/// policy branches on this, not on raw HTTP status codes.
#[derive(Debug)]
pub enum ProviderError {
    /// Confirmed 429/quota exhaustion, with the provider's indicated (or
    /// default 60s) retry delay.
    RateLimited { retry_after_secs: u64 },
    /// The requested model does not exist or is not served anymore.
    ModelMissing { model: String },
    /// Anything else: transport, auth, malformed request.
    Other(String),
}

impl ProviderError {
    /// Classify an HTTP error response body.
    pub fn classify(status: u16, body: &str, model: &str) -> Self {
        if status == 429 {
            return ProviderError::RateLimited {
                retry_after_secs: parse_retry_delay(body).unwrap_or(60),
            };
        }
        let lowered = body.to_ascii_lowercase();
        if status == 404
            || lowered.contains("model_not_found")
            || lowered.contains("is not found for api version")
            || lowered.contains("was not found")
        {
            return ProviderError::ModelMissing {
                model: model.to_string(),
            };
        }
        ProviderError::Other(format!("HTTP {}: {}", status, truncate(body, 300)))
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { retry_after_secs } => {
                EngineError::RateLimited { retry_after_secs }
            }
            ProviderError::ModelMissing { model } => {
                EngineError::AnalysisFailed(format!("model not available: {}", model))
            }
            ProviderError::Other(reason) => EngineError::AnalysisFailed(reason),
        }
    }
}

/// Pull a retry delay out of a quota-error body. Gemini reports
/// `"retryDelay": "21s"`; OpenAI puts `Retry-After` in headers but some
/// proxies echo `"retry_after": 30` in the body.
fn parse_retry_delay(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(n) = find_key(&json, "retry_after").and_then(|v| v.as_u64()) {
        return Some(n);
    }
    let delay = find_key(&json, "retryDelay")?.as_str()?;
    delay.trim_end_matches('s').parse().ok()
}

fn find_key<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(v) = map.get(key) {
                return Some(v);
            }
            map.values().find_map(|v| find_key(v, key))
        }
        serde_json::Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
