use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rate: RateConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            collection: default_collection(),
        }
    }
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "cv_embeddings".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    30
}

/// Outbound-call throttling. Defaults are conservative free-tier ceilings.
#[derive(Debug, Deserialize, Clone)]
pub struct RateConfig {
    /// Minimum spacing between consecutive calls to one provider.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Requests per window per provider.
    #[serde(default = "default_rpm_limit")]
    pub rpm_limit: u32,
    /// Estimated tokens per window per provider.
    #[serde(default = "default_tpm_limit")]
    pub tpm_limit: u64,
    /// Quota window length. Fixed at 60s in production; configurable so
    /// tests can roll windows quickly.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Where the rate state snapshot is persisted across restarts.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            rpm_limit: default_rpm_limit(),
            tpm_limit: default_tpm_limit(),
            window_secs: default_window_secs(),
            state_path: default_state_path(),
        }
    }
}

fn default_min_interval_ms() -> u64 {
    250
}
fn default_rpm_limit() -> u32 {
    5
}
fn default_tpm_limit() -> u64 {
    30_000
}
fn default_window_secs() -> u64 {
    60
}
fn default_state_path() -> PathBuf {
    PathBuf::from("data/rate_state.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Analysis depth tier: `basic` or `pro`.
    #[serde(default = "default_tier")]
    pub tier: String,
    /// Optional model override; defaults to the provider's first-choice model.
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tier: default_tier(),
            model: None,
        }
    }
}

fn default_tier() -> String {
    "basic".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.rate.window_secs == 0 {
        anyhow::bail!("rate.window_secs must be > 0");
    }
    match config.analysis.tier.as_str() {
        "basic" | "pro" => {}
        other => anyhow::bail!("Unknown analysis tier: '{}'. Must be basic or pro.", other),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config("[db]\npath = \"data/snaphunt.db\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 512);
        assert_eq!(cfg.chunking.overlap, 50);
        assert_eq!(cfg.retrieval.top_k, 30);
        assert_eq!(cfg.rate.rpm_limit, 5);
        assert_eq!(cfg.rate.tpm_limit, 30_000);
        assert_eq!(cfg.rate.min_interval_ms, 250);
        assert_eq!(cfg.vector.collection, "cv_embeddings");
        assert_eq!(cfg.analysis.tier, "basic");
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let f = write_config(
            "[db]\npath = \"x.db\"\n[chunking]\nchunk_size = 50\noverlap = 50\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn unknown_tier_rejected() {
        let f = write_config("[db]\npath = \"x.db\"\n[analysis]\ntier = \"ultra\"\n");
        assert!(load_config(f.path()).is_err());
    }
}
