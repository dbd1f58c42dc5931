//! Outbound-call throttling: burst spacing, quota windows, cooldowns.
//!
//! Every external AI call funnels through [`RateGate::acquire`], which
//! composes two independent layers per provider:
//!
//! - **Burst spacing**: a minimum wall-clock gap between consecutive calls.
//!   The next slot is *reserved* (the recorded timestamp is advanced to
//!   `now + delay` before sleeping) so two concurrent callers cannot both
//!   sleep into the same slot.
//! - **Quota window**: a sliding window tracking request and estimated
//!   token counts against RPM/TPM limits. Over-budget calls block until
//!   the window rolls, then re-check in a loop since a concurrent caller
//!   may have consumed budget during the wait.
//!
//! After a provider confirms quota exhaustion (HTTP 429), a global
//! cooldown makes every subsequent acquire for that provider fail fast
//! with [`EngineError::RateLimited`] until it elapses.
//!
//! State is persisted to disk after every mutation so a restarted process
//! does not believe it has a full quota budget.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RateConfig;
use crate::errors::EngineError;
use crate::provider::ProviderKind;

/// Small slack added to window waits so the re-check lands after rollover.
const WINDOW_WAIT_BUFFER_MS: u64 = 100;

/// Approximate chars-per-token ratio used for pre-call cost estimation.
const CHARS_PER_TOKEN: usize = 4;

/// The proposed cost of one outbound call.
#[derive(Debug, Clone, Copy)]
pub struct CallCost {
    pub requests: u32,
    pub tokens: u64,
}

impl CallCost {
    pub fn for_text(text: &str) -> Self {
        Self {
            requests: 1,
            tokens: estimate_tokens(text),
        }
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / CHARS_PER_TOKEN).max(1) as u64
}

/// Per-provider throttling state. Persisted verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProviderRate {
    requests_this_window: u32,
    tokens_this_window: u64,
    window_start_ms: i64,
    cooldown_until_ms: i64,
    last_call_ms: i64,
}

pub struct RateGate {
    config: RateConfig,
    state: Mutex<HashMap<String, ProviderRate>>,
}

impl RateGate {
    /// Create a gate, restoring any persisted state from
    /// `config.state_path`. A missing or corrupt snapshot starts fresh.
    pub fn new(config: RateConfig) -> Self {
        let state = load_state(&config.state_path);
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Wait for (or reject) permission to make one call to `provider`.
    ///
    /// Fails fast with [`EngineError::RateLimited`] while the provider's
    /// cooldown is active; otherwise blocks until both the quota window
    /// and burst spacing admit the call. Cancellation-safe: dropping the
    /// future while it sleeps abandons the call promptly.
    pub async fn acquire(
        &self,
        provider: ProviderKind,
        cost: CallCost,
    ) -> Result<(), EngineError> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let entry = state.entry(provider.as_str().to_string()).or_default();
                let now = now_ms();

                if now < entry.cooldown_until_ms {
                    let remaining = ((entry.cooldown_until_ms - now) as u64).div_ceil(1000);
                    return Err(EngineError::RateLimited {
                        retry_after_secs: remaining.max(1),
                    });
                }

                let window_ms = (self.config.window_secs * 1000) as i64;
                if now - entry.window_start_ms >= window_ms {
                    entry.requests_this_window = 0;
                    entry.tokens_this_window = 0;
                    entry.window_start_ms = now;
                }

                let over_rpm =
                    entry.requests_this_window + cost.requests > self.config.rpm_limit;
                let over_tpm = entry.tokens_this_window + cost.tokens > self.config.tpm_limit;

                if over_rpm || over_tpm {
                    let until_rollover =
                        (entry.window_start_ms + window_ms - now).max(0) as u64;
                    warn!(
                        provider = %provider,
                        requests = entry.requests_this_window,
                        rpm_limit = self.config.rpm_limit,
                        tokens = entry.tokens_this_window,
                        tpm_limit = self.config.tpm_limit,
                        wait_ms = until_rollover,
                        "quota window exhausted, waiting for rollover"
                    );
                    Wait::Rollover(until_rollover + WINDOW_WAIT_BUFFER_MS)
                } else {
                    entry.requests_this_window += cost.requests;
                    entry.tokens_this_window += cost.tokens;

                    // Burst spacing with slot reservation.
                    let elapsed = now - entry.last_call_ms;
                    let min_interval = self.config.min_interval_ms as i64;
                    let delay = if elapsed < min_interval {
                        let delay = (min_interval - elapsed) as u64;
                        entry.last_call_ms = now + delay as i64;
                        delay
                    } else {
                        entry.last_call_ms = now;
                        0
                    };

                    persist_state(&self.config.state_path, &state);
                    Wait::Admitted(delay)
                }
            };

            match wait {
                Wait::Admitted(0) => return Ok(()),
                Wait::Admitted(delay_ms) => {
                    debug!(provider = %provider, delay_ms, "burst spacing");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    return Ok(());
                }
                Wait::Rollover(wait_ms) => {
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                    // Loop: re-check, budget may have been consumed meanwhile.
                }
            }
        }
    }

    /// Record a confirmed 429 from the provider: set the global cooldown
    /// so later calls fail fast instead of hammering an exhausted quota.
    pub async fn report_rate_limited(&self, provider: ProviderKind, retry_after_secs: u64) {
        let mut state = self.state.lock().await;
        let entry = state.entry(provider.as_str().to_string()).or_default();
        entry.cooldown_until_ms = now_ms() + (retry_after_secs * 1000) as i64;
        warn!(
            provider = %provider,
            retry_after_secs,
            "provider signaled quota exhaustion, cooldown set"
        );
        persist_state(&self.config.state_path, &state);
    }

    /// Seconds left on the provider's cooldown, if one is active.
    pub async fn cooldown_remaining(&self, provider: ProviderKind) -> Option<u64> {
        let state = self.state.lock().await;
        let entry = state.get(provider.as_str())?;
        let remaining = entry.cooldown_until_ms - now_ms();
        (remaining > 0).then(|| (remaining as u64).div_ceil(1000))
    }
}

enum Wait {
    Admitted(u64),
    Rollover(u64),
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn load_state(path: &PathBuf) -> HashMap<String, ProviderRate> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(state) => {
                debug!(path = %path.display(), "restored rate state");
                state
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt rate state, starting fresh");
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
}

fn persist_state(path: &PathBuf, state: &HashMap<String, ProviderRate>) {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state).unwrap_or_default();
        std::fs::write(path, json)
    };
    if let Err(e) = write() {
        warn!(path = %path.display(), error = %e, "failed to persist rate state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_config(dir: &std::path::Path, min_interval_ms: u64, rpm: u32, window_secs: u64) -> RateConfig {
        RateConfig {
            min_interval_ms,
            rpm_limit: rpm,
            tpm_limit: 1_000_000,
            window_secs,
            state_path: dir.join("rate_state.json"),
        }
    }

    #[tokio::test]
    async fn burst_spacing_enforces_min_gap_per_provider() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = RateGate::new(test_config(tmp.path(), 40, 100, 60));
        let cost = CallCost {
            requests: 1,
            tokens: 1,
        };

        let start = Instant::now();
        for _ in 0..3 {
            gate.acquire(ProviderKind::Gemini, cost).await.unwrap();
        }
        // Three calls to one provider take at least (N-1) * interval.
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn different_providers_do_not_block_each_other() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = RateGate::new(test_config(tmp.path(), 150, 100, 60));
        let cost = CallCost {
            requests: 1,
            tokens: 1,
        };

        gate.acquire(ProviderKind::Gemini, cost).await.unwrap();
        let start = Instant::now();
        gate.acquire(ProviderKind::OpenAi, cost).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn quota_exhaustion_blocks_until_window_rolls() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = RateGate::new(test_config(tmp.path(), 0, 2, 1));
        let cost = CallCost {
            requests: 1,
            tokens: 1,
        };

        gate.acquire(ProviderKind::Gemini, cost).await.unwrap();
        gate.acquire(ProviderKind::Gemini, cost).await.unwrap();

        let start = Instant::now();
        gate.acquire(ProviderKind::Gemini, cost).await.unwrap();
        // Third call must wait for the 1s window to roll over.
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cooldown_fails_fast_with_wait_hint() {
        let tmp = tempfile::tempdir().unwrap();
        let gate = RateGate::new(test_config(tmp.path(), 0, 100, 60));
        gate.report_rate_limited(ProviderKind::Gemini, 60).await;

        let start = Instant::now();
        let err = gate
            .acquire(
                ProviderKind::Gemini,
                CallCost {
                    requests: 1,
                    tokens: 1,
                },
            )
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(50), "must not sleep");
        match err {
            EngineError::RateLimited { retry_after_secs } => {
                assert!(retry_after_secs >= 59 && retry_after_secs <= 60);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // The other provider is unaffected.
        gate.acquire(
            ProviderKind::OpenAi,
            CallCost {
                requests: 1,
                tokens: 1,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn cooldown_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path(), 0, 100, 60);

        {
            let gate = RateGate::new(config.clone());
            gate.report_rate_limited(ProviderKind::OpenAi, 120).await;
        }

        let revived = RateGate::new(config);
        let remaining = revived
            .cooldown_remaining(ProviderKind::OpenAi)
            .await
            .expect("cooldown should persist across restarts");
        assert!(remaining > 100);
    }

    #[test]
    fn token_estimate_floors_at_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
