//! Vision analysis and narration composition capability.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::extraction::MediaUnit;

/// Prompting configuration passed through to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PromptConfig {
    /// Provider tier to use ("vision-premium", "vision-batch")
    pub provider_label: String,
    /// Task framing for the model
    pub instructions: String,
}

impl PromptConfig {
    pub fn new(provider_label: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            provider_label: provider_label.into(),
            instructions: instructions.into(),
        }
    }
}

/// Describes media units and composes narration text from descriptions.
///
/// Failure kinds: `RateLimited` (retryable), `ContentRejected`
/// (non-retryable).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionAnalysis: Send + Sync {
    /// Produce a raw text description of one media unit.
    async fn analyze(&self, unit: &MediaUnit, prompt: &PromptConfig) -> ProviderResult<String>;

    /// Turn a raw description into a narration fragment.
    async fn compose(&self, description: &str, prompt: &PromptConfig) -> ProviderResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_analyze_receives_provider_tier() {
        let mut vision = MockVisionAnalysis::new();
        vision
            .expect_analyze()
            .withf(|_, prompt| prompt.provider_label == "vision-premium")
            .returning(|unit, _| Ok(format!("described {}", unit.locator)));

        let unit = MediaUnit::whole("uploads/poster.png");
        let prompt = PromptConfig::new("vision-premium", "describe the scene");
        let description = vision.analyze(&unit, &prompt).await.unwrap();
        assert!(description.contains("uploads/poster.png"));
    }
}
