//! Scene segmentation capability.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// One detected scene, in source time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneSpan {
    /// Scene start, seconds from the start of the source
    pub start_secs: f64,
    /// Scene end, seconds
    pub end_secs: f64,
}

impl SceneSpan {
    pub fn new(start_secs: f64, end_secs: f64) -> Self {
        Self {
            start_secs,
            end_secs,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}

/// Splits a video source into an ordered list of scene spans.
///
/// May fail with `Throttled` (retryable) or `UnsupportedFormat`
/// (non-retryable).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Segmentation: Send + Sync {
    async fn segment(&self, locator: &str) -> ProviderResult<Vec<SceneSpan>>;
}
