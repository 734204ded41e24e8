//! Capability interfaces for the external collaborators the narration
//! engine depends on.
//!
//! Each trait is the contract one pipeline stage is implemented against:
//! object storage, scene segmentation, media extraction, vision analysis
//! (description + narration composition) and speech synthesis. The engine
//! only ever sees these traits; provider implementations live elsewhere.

pub mod error;
pub mod extraction;
pub mod segmentation;
pub mod speech;
pub mod storage;
pub mod vision;

pub use error::{ProviderError, ProviderResult};
pub use extraction::{MediaExtraction, MediaUnit};
pub use segmentation::{SceneSpan, Segmentation};
pub use speech::{AudioArtifact, SpeechSynthesis, VoiceConfig};
pub use storage::Storage;
pub use vision::{PromptConfig, VisionAnalysis};
