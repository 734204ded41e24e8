//! Engine configuration.

use std::time::Duration;

use audesc_models::PipelineVariant;

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;

/// Engine configuration.
///
/// Permit pool sizes are per external collaborator (one rate-limit domain
/// each) and bound in-flight calls across all jobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum jobs processed concurrently
    pub max_concurrent_jobs: usize,
    /// Storage permit pool size
    pub storage_permits: usize,
    /// Segmentation permit pool size
    pub segmentation_permits: usize,
    /// Media extraction permit pool size
    pub extraction_permits: usize,
    /// Vision analysis permit pool size
    pub vision_permits: usize,
    /// Speech synthesis permit pool size
    pub speech_permits: usize,
    /// Retry policy threaded into every external call
    pub retry: RetryPolicy,
    /// Graceful shutdown drain timeout
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            storage_permits: 8,
            segmentation_permits: 2,
            extraction_permits: 4,
            vision_permits: 4,
            speech_permits: 4,
            retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_usize("AUDESC_MAX_JOBS", defaults.max_concurrent_jobs),
            storage_permits: env_usize("AUDESC_STORAGE_PERMITS", defaults.storage_permits),
            segmentation_permits: env_usize(
                "AUDESC_SEGMENTATION_PERMITS",
                defaults.segmentation_permits,
            ),
            extraction_permits: env_usize("AUDESC_EXTRACTION_PERMITS", defaults.extraction_permits),
            vision_permits: env_usize("AUDESC_VISION_PERMITS", defaults.vision_permits),
            speech_permits: env_usize("AUDESC_SPEECH_PERMITS", defaults.speech_permits),
            retry: RetryPolicy::from_env(),
            shutdown_timeout: Duration::from_secs(env_u64(
                "AUDESC_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
    }

    /// Validate the configuration and every built-in variant at startup.
    ///
    /// Rejecting here keeps misconfiguration from surfacing mid-job.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(EngineError::config("max_concurrent_jobs must be positive"));
        }
        for (name, permits) in [
            ("storage", self.storage_permits),
            ("segmentation", self.segmentation_permits),
            ("extraction", self.extraction_permits),
            ("vision", self.vision_permits),
            ("speech", self.speech_permits),
        ] {
            if permits == 0 {
                return Err(EngineError::config(format!(
                    "{name} permit pool must be positive"
                )));
            }
        }
        self.retry.validate().map_err(EngineError::Config)?;
        for variant in PipelineVariant::all() {
            variant
                .config()
                .validate(variant)
                .map_err(EngineError::Config)?;
        }
        Ok(())
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
