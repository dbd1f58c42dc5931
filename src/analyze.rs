//! LLM analysis orchestration: tiers, caching, and model fallback.
//!
//! Analysis sits on top of retrieval: the top chunks for a query are
//! packed into one prompt and judged by an LLM. Three policies live here:
//!
//! - **Tiers** bound how much context and response budget one analysis
//!   may spend.
//! - **Caching** keys results by `(document_id, job_context_hash)`, so a
//!   document already judged for the same job description is served from
//!   SQLite and never re-sent to the LLM.
//! - **Fallback** walks the provider's ordered model list when a model
//!   has been renamed or retired. Quota exhaustion is never retried:
//!   the cooldown is set and the error surfaces immediately.
//!
//! A syntactically broken LLM response is not an error; it degrades to a
//! raw-summary report so the caller still sees what the model said.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::llm::CompletionClient;
use crate::models::{
    job_context_hash, AnalysisCacheEntry, AnalysisCandidate, AnalysisReport, ScoredChunk,
};
use crate::provider::ProviderError;
use crate::rate::{CallCost, RateGate};
use crate::registry::ChecksumRegistry;
use crate::search::RetrievalEngine;

const TRUNCATION_MARKER: &str = "\n[context truncated]";

/// Analysis depth. Bounds are per analysis call, not per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Basic,
    Pro,
}

impl Tier {
    /// Max retrieved chunks packed into the prompt.
    pub fn max_chunks(&self) -> usize {
        match self {
            Tier::Basic => 5,
            Tier::Pro => 15,
        }
    }

    /// Response budget passed to the provider.
    pub fn max_tokens(&self) -> u32 {
        match self {
            Tier::Basic => 2000,
            Tier::Pro => 4000,
        }
    }

    /// Hard cap on prompt context characters.
    pub fn max_chars(&self) -> usize {
        match self {
            Tier::Basic => 10_000,
            Tier::Pro => 30_000,
        }
    }
}

impl FromStr for Tier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Tier::Basic),
            "pro" => Ok(Tier::Pro),
            other => Err(EngineError::InvalidInput(format!(
                "unknown analysis tier: '{}'",
                other
            ))),
        }
    }
}

/// The result of one analysis call.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub report: AnalysisReport,
    /// Model that produced the fresh part, `None` when fully cached.
    pub answered_by: Option<String>,
    /// Sources served from the analysis cache.
    pub cached_sources: usize,
    /// Sources judged by the LLM in this call.
    pub fresh_sources: usize,
}

pub struct AnalysisOrchestrator {
    registry: Arc<ChecksumRegistry>,
    retrieval: Arc<RetrievalEngine>,
    completer: Arc<dyn CompletionClient>,
    gate: Arc<RateGate>,
    tier: Tier,
    model_override: Option<String>,
}

impl AnalysisOrchestrator {
    pub fn new(
        registry: Arc<ChecksumRegistry>,
        retrieval: Arc<RetrievalEngine>,
        completer: Arc<dyn CompletionClient>,
        gate: Arc<RateGate>,
        tier: Tier,
        model_override: Option<String>,
    ) -> Self {
        Self {
            registry,
            retrieval,
            completer,
            gate,
            tier,
            model_override,
        }
    }

    /// Retrieve, check the cache, and judge the remainder with the LLM.
    pub async fn analyze(
        &self,
        query: &str,
        job_context: Option<&str>,
    ) -> Result<AnalysisOutcome, EngineError> {
        let hits = self.retrieval.search(query).await?;
        if hits.is_empty() {
            return Ok(AnalysisOutcome {
                report: AnalysisReport {
                    candidates: Vec::new(),
                    summary: "No matching documents in the index.".to_string(),
                },
                answered_by: None,
                cached_sources: 0,
                fresh_sources: 0,
            });
        }

        let job_hash = job_context_hash(job_context);
        let (cached, fresh_hits) = self.split_cached(&hits, &job_hash).await?;
        let cached_sources = cached.len();

        if fresh_hits.is_empty() {
            info!(cached_sources, "analysis fully served from cache");
            return Ok(AnalysisOutcome {
                report: AnalysisReport {
                    candidates: cached,
                    summary: String::new(),
                },
                answered_by: None,
                cached_sources,
                fresh_sources: 0,
            });
        }

        let prompt = build_prompt(query, job_context, &fresh_hits, self.tier);
        let (raw, model) = self
            .complete_with_fallback(&prompt, self.tier.max_tokens())
            .await?;
        let mut report = parse_structured_response(&raw);

        self.cache_candidates(&report.candidates, &job_hash).await?;

        let fresh_sources = report.candidates.len();
        let mut candidates = cached;
        candidates.append(&mut report.candidates);
        report.candidates = candidates;

        info!(
            model = %model,
            cached_sources,
            fresh_sources,
            "analysis complete"
        );
        Ok(AnalysisOutcome {
            report,
            answered_by: Some(model),
            cached_sources,
            fresh_sources,
        })
    }

    /// Partition hits into cache-served candidates and hits that still
    /// need the LLM. A source with no registry document is always fresh.
    async fn split_cached(
        &self,
        hits: &[ScoredChunk],
        job_hash: &str,
    ) -> Result<(Vec<AnalysisCandidate>, Vec<ScoredChunk>), EngineError> {
        let mut cached: Vec<AnalysisCandidate> = Vec::new();
        let mut cached_sources: Vec<String> = Vec::new();
        let mut fresh_sources: Vec<String> = Vec::new();
        let mut fresh_hits: Vec<ScoredChunk> = Vec::new();

        for hit in hits {
            let source = &hit.payload.source;
            if cached_sources.iter().any(|s| s == source) {
                continue;
            }
            if fresh_sources.iter().any(|s| s == source) {
                fresh_hits.push(hit.clone());
                continue;
            }

            let entry = match self.registry.document_by_location(source).await? {
                Some(doc) => self.registry.analysis_for(&doc.id, job_hash).await?,
                None => None,
            };
            match entry.and_then(|e| candidate_from_cache(&e)) {
                Some(candidate) => {
                    cached.push(candidate);
                    cached_sources.push(source.clone());
                }
                None => {
                    fresh_sources.push(source.clone());
                    fresh_hits.push(hit.clone());
                }
            }
        }

        Ok((cached, fresh_hits))
    }

    async fn cache_candidates(
        &self,
        candidates: &[AnalysisCandidate],
        job_hash: &str,
    ) -> Result<(), EngineError> {
        for candidate in candidates {
            let Some(doc) = self.registry.document_by_location(&candidate.source).await? else {
                warn!(source = %candidate.source, "candidate source unknown, not cached");
                continue;
            };
            let entry = AnalysisCacheEntry {
                id: Uuid::new_v4().to_string(),
                document_id: doc.id,
                job_context_hash: job_hash.to_string(),
                suitability_score: candidate.score,
                suitable: candidate.suitable,
                report: serde_json::to_string(candidate)
                    .map_err(|e| EngineError::AnalysisFailed(e.to_string()))?,
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            self.registry.save_analysis(&entry).await?;
        }
        Ok(())
    }

    /// Run the completion, walking the provider's fallback models when
    /// one is missing. Returns the text and the model that answered.
    ///
    /// Quota exhaustion is terminal: the gate cooldown is set and the
    /// error surfaces without trying further models, since the quota is
    /// provider-wide, not per-model.
    async fn complete_with_fallback(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, String), EngineError> {
        let provider = self.completer.provider();
        let mut models: Vec<&str> = Vec::new();
        if let Some(m) = self.model_override.as_deref() {
            models.push(m);
        }
        for m in provider.fallback_models() {
            if !models.contains(m) {
                models.push(m);
            }
        }

        let mut missing: Vec<String> = Vec::new();
        for model in models {
            self.gate
                .acquire(provider, CallCost::for_text(prompt))
                .await?;
            match self.completer.complete(prompt, model, max_tokens).await {
                Ok(text) => return Ok((text, model.to_string())),
                Err(ProviderError::RateLimited { retry_after_secs }) => {
                    self.gate
                        .report_rate_limited(provider, retry_after_secs)
                        .await;
                    return Err(EngineError::RateLimited { retry_after_secs });
                }
                Err(ProviderError::ModelMissing { model }) => {
                    warn!(model = %model, "model unavailable, trying next fallback");
                    missing.push(model);
                }
                Err(ProviderError::Other(reason)) => {
                    return Err(EngineError::AnalysisFailed(reason));
                }
            }
        }

        Err(EngineError::AnalysisFailed(format!(
            "no usable model for {} (tried: {})",
            provider,
            missing.join(", ")
        )))
    }
}

fn candidate_from_cache(entry: &AnalysisCacheEntry) -> Option<AnalysisCandidate> {
    serde_json::from_str(&entry.report).ok()
}

/// Pack the query, optional job context, and top chunk excerpts into one
/// prompt. Chunks are ordered by relevance, capped per tier, and the
/// whole excerpt block is truncated with a visible marker if oversized.
fn build_prompt(
    query: &str,
    job_context: Option<&str>,
    hits: &[ScoredChunk],
    tier: Tier,
) -> String {
    let mut ordered: Vec<&ScoredChunk> = hits.iter().collect();
    ordered.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ordered.truncate(tier.max_chunks());

    let mut excerpts = String::new();
    for hit in &ordered {
        excerpts.push_str(&format!(
            "--- Source: {} (relevance {:.3}) ---\n{}\n\n",
            hit.payload.source, hit.score, hit.payload.text
        ));
    }
    let excerpts = truncate_chars(&excerpts, tier.max_chars());

    let mut prompt = format!(
        "Evaluate the following CV excerpts against this search query.\n\nQuery: {}\n",
        query
    );
    if let Some(job) = job_context.map(str::trim).filter(|s| !s.is_empty()) {
        prompt.push_str(&format!("\nJob description:\n{}\n", job));
    }
    prompt.push_str(
        "\nRespond with JSON only, in this exact shape:\n\
         {\"candidates\":[{\"source\":\"<source string exactly as given>\",\
         \"score\":<0.0-1.0>,\"suitable\":<true|false>,\
         \"justification\":\"<one sentence>\"}],\"summary\":\"<short overall summary>\"}\n\
         Include one candidates entry per distinct source.\n\nExcerpts:\n\n",
    );
    prompt.push_str(&excerpts);
    prompt
}

/// Char-boundary-safe truncation with a visible marker.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}{}", truncated, TRUNCATION_MARKER)
}

/// Pull a structured report out of an LLM response.
///
/// Models wrap JSON in prose or code fences routinely, so this scans for
/// the first balanced JSON object and tries to parse it. When nothing
/// parses, the raw text becomes the report summary; the caller still
/// gets an answer, just an unstructured one.
pub fn parse_structured_response(raw: &str) -> AnalysisReport {
    if let Some(json) = extract_balanced_json(raw) {
        if let Ok(report) = serde_json::from_str::<AnalysisReport>(json) {
            return report;
        }
    }
    warn!("LLM response was not structured JSON, degrading to raw summary");
    AnalysisReport {
        candidates: Vec::new(),
        summary: raw.trim().to_string(),
    }
}

/// First balanced `{…}` span in the text, string-literal aware.
fn extract_balanced_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
