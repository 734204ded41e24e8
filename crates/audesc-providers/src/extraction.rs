//! Media extraction (demux/chunk) capability.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::segmentation::SceneSpan;

/// Smallest analyzable piece of media: one scene's extract, or the whole
/// source when the pipeline runs without segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MediaUnit {
    /// Storage locator of the extracted media
    pub locator: String,
    /// The scene span this unit covers, if the source was segmented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<SceneSpan>,
}

impl MediaUnit {
    /// A unit covering the whole, unsegmented source.
    pub fn whole(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            span: None,
        }
    }

    /// A unit covering one scene of the source.
    pub fn scene(locator: impl Into<String>, span: SceneSpan) -> Self {
        Self {
            locator: locator.into(),
            span: Some(span),
        }
    }
}

/// Demuxes one scene span out of a source into its own media unit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtraction: Send + Sync {
    async fn extract(&self, source: &str, span: SceneSpan) -> ProviderResult<MediaUnit>;
}
