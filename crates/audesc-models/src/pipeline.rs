//! Pipeline variants and their stage-sequence configuration.
//!
//! A variant is a named, fixed configuration of stage sequence plus
//! concurrency and provider choices. The set is closed; unknown or
//! conflicting configuration is rejected at startup, not at call time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One ordered phase of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Split the source into scene spans
    Segment,
    /// Demux each span into an analyzable media unit
    Extract,
    /// Describe each media unit with a vision model
    Analyze,
    /// Compose narration fragments from raw descriptions
    SynthesizeText,
    /// Voice each narration fragment
    SynthesizeAudio,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Segment => "segment",
            StageKind::Extract => "extract",
            StageKind::Analyze => "analyze",
            StageKind::SynthesizeText => "synthesize_text",
            StageKind::SynthesizeAudio => "synthesize_audio",
        }
    }

    /// Human-readable step name for status responses.
    pub fn step_label(&self) -> &'static str {
        match self {
            StageKind::Segment => "Detecting scenes",
            StageKind::Extract => "Extracting scene media",
            StageKind::Analyze => "Describing content",
            StageKind::SynthesizeText => "Writing narration",
            StageKind::SynthesizeAudio => "Voicing narration",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed set of pipeline variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    /// Full pipeline with the premium vision provider; small/medium content
    #[default]
    Primary,
    /// Full pipeline tuned for large content: bigger chunks, batch provider
    Bulk,
    /// Single-unit pipeline without segmentation; images and short clips
    Blended,
}

impl PipelineVariant {
    /// All variants, in selector evaluation order.
    pub fn all() -> [PipelineVariant; 3] {
        [
            PipelineVariant::Blended,
            PipelineVariant::Primary,
            PipelineVariant::Bulk,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineVariant::Primary => "primary",
            PipelineVariant::Bulk => "bulk",
            PipelineVariant::Blended => "blended",
        }
    }

    /// Static configuration for this variant.
    pub fn config(&self) -> VariantConfig {
        match self {
            PipelineVariant::Primary => VariantConfig {
                stages: vec![
                    StageKind::Segment,
                    StageKind::Extract,
                    StageKind::Analyze,
                    StageKind::SynthesizeText,
                    StageKind::SynthesizeAudio,
                ],
                unit_parallelism: 4,
                max_unit_retries: 3,
                stage_timeout: Duration::from_secs(600),
                provider_label: "vision-premium",
                max_chunk_chars: 1_000,
                tolerate_partial: true,
            },
            PipelineVariant::Bulk => VariantConfig {
                stages: vec![
                    StageKind::Segment,
                    StageKind::Extract,
                    StageKind::Analyze,
                    StageKind::SynthesizeText,
                    StageKind::SynthesizeAudio,
                ],
                unit_parallelism: 2,
                max_unit_retries: 2,
                stage_timeout: Duration::from_secs(1_800),
                provider_label: "vision-batch",
                max_chunk_chars: 4_000,
                tolerate_partial: true,
            },
            PipelineVariant::Blended => VariantConfig {
                stages: vec![
                    StageKind::Analyze,
                    StageKind::SynthesizeText,
                    StageKind::SynthesizeAudio,
                ],
                unit_parallelism: 1,
                max_unit_retries: 3,
                stage_timeout: Duration::from_secs(300),
                provider_label: "vision-premium",
                max_chunk_chars: 1_000,
                tolerate_partial: false,
            },
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage sequence and stage-shared tuning for one variant.
///
/// Immutable once a variant is selected for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantConfig {
    /// Ordered stage sequence
    pub stages: Vec<StageKind>,
    /// Maximum units in flight at once within a stage
    pub unit_parallelism: usize,
    /// Maximum retries per unit (not counting the initial attempt)
    pub max_unit_retries: u32,
    /// Deadline for a whole stage; elapsing with pending units is fatal
    pub stage_timeout: Duration,
    /// Which provider tier the analyze stage should use
    pub provider_label: &'static str,
    /// Upper bound on characters per speech-synthesis chunk
    pub max_chunk_chars: usize,
    /// Whether a stage may succeed with some failed units
    pub tolerate_partial: bool,
}

impl VariantConfig {
    /// Validate the configuration. Called once at engine startup for
    /// every variant in the closed set.
    pub fn validate(&self, variant: PipelineVariant) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err(format!("variant {variant} has an empty stage sequence"));
        }
        if self.unit_parallelism == 0 {
            return Err(format!("variant {variant} has zero unit parallelism"));
        }
        if self.max_chunk_chars == 0 {
            return Err(format!("variant {variant} has zero chunk size"));
        }
        if self.stage_timeout.is_zero() {
            return Err(format!("variant {variant} has zero stage timeout"));
        }
        // Extract requires spans, so Segment must come first.
        if self.stages.contains(&StageKind::Extract)
            && self.stages.first() != Some(&StageKind::Segment)
        {
            return Err(format!(
                "variant {variant} uses extract without leading segmentation"
            ));
        }
        Ok(())
    }
}

/// Outcome of a pipeline selection decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Selection {
    /// The chosen variant
    pub variant: PipelineVariant,
    /// Why it was chosen ("override", a rule name, "fallback-default", "failover")
    pub reason: String,
}

impl Selection {
    pub fn new(variant: PipelineVariant, reason: impl Into<String>) -> Self {
        Self {
            variant,
            reason: reason.into(),
        }
    }
}
