//! Speech synthesis capability.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// Voice configuration passed through to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceConfig {
    /// Voice identifier
    pub voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "narrator-default".to_string(),
        }
    }
}

/// Reference to one synthesized audio segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioArtifact {
    /// Storage locator of the audio
    pub locator: String,
    /// Audio duration in seconds, if the provider reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

/// Voices narration text.
///
/// Failure kinds: `Throttled` (retryable), `TextTooLong` (prevented by
/// engine pre-chunking, not retried).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> ProviderResult<AudioArtifact>;
}
