//! Engine configuration and per-run options.
//!
//! `EngineConfig` is built once at process start (the CLI assembles it from
//! flags and environment) and passed to the engine; the engine itself never
//! reads the environment. `RunOptions` override it for a single run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::RetryPolicy;

/// Tuning knobs for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Timeout for nodes that do not declare one.
    pub default_node_timeout: Duration,
    /// Cap on concurrently running nodes per run. `None` is unbounded.
    pub max_parallelism: Option<usize>,
    /// Abort a run on the first terminal node failure.
    pub fail_fast: bool,
    /// Retry policy for nodes that do not declare one.
    pub retry: RetryPolicy,
    /// How long a cancelled operator may take to return before its node is
    /// marked cancelled and its task aborted.
    pub cancel_grace: Duration,
    /// Wall-clock limit for a whole run. `None` is unlimited.
    pub run_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_node_timeout: Duration::from_secs(60),
            max_parallelism: None,
            fail_fast: false,
            retry: RetryPolicy::default(),
            cancel_grace: Duration::from_secs(5),
            run_timeout: None,
        }
    }
}

/// Per-run overrides of [`EngineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub timeout_ms: Option<u64>,
    pub max_parallelism: Option<usize>,
    pub fail_fast: Option<bool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = Some(limit);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }
}

/// Effective settings for one run.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub default_node_timeout: Duration,
    pub max_parallelism: Option<usize>,
    pub fail_fast: bool,
    pub retry: RetryPolicy,
    pub cancel_grace: Duration,
    pub run_timeout: Option<Duration>,
}

impl EngineConfig {
    pub(crate) fn resolve(&self, options: &RunOptions) -> RunSettings {
        RunSettings {
            default_node_timeout: self.default_node_timeout,
            // A limit of zero would never dispatch anything.
            max_parallelism: options
                .max_parallelism
                .or(self.max_parallelism)
                .map(|n| n.max(1)),
            fail_fast: options.fail_fast.unwrap_or(self.fail_fast),
            retry: self.retry.clone(),
            cancel_grace: self.cancel_grace,
            run_timeout: options
                .timeout_ms
                .map(Duration::from_millis)
                .or(self.run_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_override_config() {
        let config = EngineConfig {
            max_parallelism: Some(8),
            ..EngineConfig::default()
        };
        let settings = config.resolve(&RunOptions::new().fail_fast(true).max_parallelism(0));
        assert!(settings.fail_fast);
        assert_eq!(settings.max_parallelism, Some(1));
        assert_eq!(settings.run_timeout, None);
    }

    #[test]
    fn config_applies_when_options_are_empty() {
        let config = EngineConfig {
            run_timeout: Some(Duration::from_secs(30)),
            ..EngineConfig::default()
        };
        let settings = config.resolve(&RunOptions::default());
        assert!(!settings.fail_fast);
        assert_eq!(settings.max_parallelism, None);
        assert_eq!(settings.run_timeout, Some(Duration::from_secs(30)));
    }
}
