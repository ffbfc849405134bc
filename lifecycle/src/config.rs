//! Pipeline configuration.
//!
//! Policy constants (confidence threshold, attempt budget, sanitizer
//! secret cutoff, stage timeout) are deliberately external knobs, read
//! from the environment with conservative defaults.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Reasoner proposals below this confidence are semantic failures.
    pub confidence_threshold: f64,
    /// Attempt budget for transient failures.
    pub max_attempts: u32,
    /// Automatic re-runs allowed for semantic failures.
    pub max_semantic_retries: u32,
    /// Sanitizer policy gate: more secrets than this halts the pipeline.
    pub sanitizer_max_secrets: u32,
    /// Per-stage wall-clock budget; overrun counts as a transient failure.
    pub stage_timeout: Duration,
    /// Stop after verification instead of opening a pull request.
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: env_parse("MEND_CONFIDENCE_THRESHOLD", 0.7),
            max_attempts: env_parse("MEND_MAX_ATTEMPTS", 3),
            max_semantic_retries: env_parse("MEND_MAX_SEMANTIC_RETRIES", 1),
            sanitizer_max_secrets: env_parse("MEND_SANITIZER_MAX_SECRETS", 100),
            stage_timeout: Duration::from_secs(env_parse("MEND_STAGE_TIMEOUT_SECS", 300)),
            dry_run: std::env::var("MEND_DRY_RUN").map(|v| v == "1" || v == "true") == Ok(true),
        }
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_semantic_retries: self.max_semantic_retries,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
