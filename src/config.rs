//! Timing knobs for the future protocol.
//!
//! Defaults: 5s for the single fast-path read, 250ms between polls, 8s for
//! the push at finalize.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const ENV_FAST_PATH_TIMEOUT_MS: &str = "DTF_FAST_PATH_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "DTF_POLL_INTERVAL_MS";
pub const ENV_PUSH_TIMEOUT_MS: &str = "DTF_PUSH_TIMEOUT_MS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Budget for the single push-store read before falling back to polling.
    pub fast_path_timeout_ms: u64,
    /// Sleep between queries while the future is missing or pending.
    pub poll_interval_ms: u64,
    /// Timeout of the local call that performs the push at finalize time.
    pub push_timeout_ms: u64,
}

impl CoordinationConfig {
    pub const DEFAULT_FAST_PATH_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
    pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 8_000;

    /// Defaults overridden by any `DTF_*` environment variables that parse.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (env, config map, ...).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fields: [(&str, &mut u64); 3] = [
            (ENV_FAST_PATH_TIMEOUT_MS, &mut self.fast_path_timeout_ms),
            (ENV_POLL_INTERVAL_MS, &mut self.poll_interval_ms),
            (ENV_PUSH_TIMEOUT_MS, &mut self.push_timeout_ms),
        ];
        for (name, slot) in fields {
            let Some(raw) = lookup(name) else { continue };
            match raw.trim().parse::<u64>() {
                Ok(v) => *slot = v,
                Err(e) => warn!(variable = name, value = %raw, error = %e, "ignoring unparsable override"),
            }
        }
        self
    }

    pub fn fast_path_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_path_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            fast_path_timeout_ms: Self::DEFAULT_FAST_PATH_TIMEOUT_MS,
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            push_timeout_ms: Self::DEFAULT_PUSH_TIMEOUT_MS,
        }
    }
}
