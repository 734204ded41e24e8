//! Job definitions for narration processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::InputError;
use crate::output::CompiledOutput;
use crate::pipeline::PipelineVariant;
use crate::stage::StageResult;

/// Hard cap on declared input size (4 GiB).
pub const MAX_INPUT_SIZE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Hard cap on declared input duration (4 hours).
pub const MAX_INPUT_DURATION_SECS: f64 = 4.0 * 3600.0;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media behind an input descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Video upload (may require segmentation)
    #[default]
    Video,
    /// Still image (single analysis unit)
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

/// Description of an uploaded media item to be narrated.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InputDescriptor {
    /// Storage locator for the uploaded media
    pub source: String,

    /// Media kind
    #[serde(default)]
    pub media_kind: MediaKind,

    /// Declared size in bytes, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// Declared duration in seconds, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl InputDescriptor {
    /// Create a descriptor for a video upload.
    pub fn video(source: impl Into<String>, size_bytes: u64, duration_secs: f64) -> Self {
        Self {
            source: source.into(),
            media_kind: MediaKind::Video,
            size_bytes: Some(size_bytes),
            duration_secs: Some(duration_secs),
        }
    }

    /// Create a descriptor for a still image.
    pub fn image(source: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            source: source.into(),
            media_kind: MediaKind::Image,
            size_bytes: Some(size_bytes),
            duration_secs: None,
        }
    }

    /// Validate the descriptor at submit time.
    ///
    /// Rejections here keep the job from ever reaching `processing`.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.source.trim().is_empty() {
            return Err(InputError::MissingSource);
        }

        if let Some(size) = self.size_bytes {
            if size == 0 {
                return Err(InputError::EmptyInput);
            }
            if size > MAX_INPUT_SIZE_BYTES {
                return Err(InputError::Oversized {
                    size_bytes: size,
                    max_bytes: MAX_INPUT_SIZE_BYTES,
                });
            }
        }

        if let Some(duration) = self.duration_secs {
            if !duration.is_finite() || duration < 0.0 {
                return Err(InputError::InvalidDuration { duration });
            }
            if duration > MAX_INPUT_DURATION_SECS {
                return Err(InputError::TooLong {
                    duration,
                    max_secs: MAX_INPUT_DURATION_SECS,
                });
            }
        }

        if self.media_kind == MediaKind::Image && self.duration_secs.is_some() {
            return Err(InputError::ImageWithDuration);
        }

        Ok(())
    }
}

/// Options accepted alongside a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SubmitOptions {
    /// Explicit pipeline variant choice; always wins when valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_override: Option<PipelineVariant>,
}

/// Externally visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for a scheduler slot
    #[default]
    Queued,
    /// Job is actively being processed
    Processing,
    /// All stages succeeded with zero failed units
    Completed,
    /// All stages succeeded but some units were skipped
    CompletedWithWarnings,
    /// A stage failed fatally
    Failed,
    /// Job was cancelled by the caller
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithWarnings => "completed_with_warnings",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a sink state (no transition leaves it).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithWarnings
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Check if a result can be compiled from this state.
    pub fn has_result(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithWarnings)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One submitted media item's end-to-end processing request.
///
/// Owned exclusively by the job manager; adapters and trackers never
/// mutate a job directly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// What was submitted
    pub input: InputDescriptor,

    /// Selected pipeline variant (fixed for the job's lifetime)
    pub variant: PipelineVariant,

    /// Why this variant was selected ("override", rule name, "fallback-default", "failover")
    pub selection_reason: String,

    /// Ordered per-stage results, same order as the variant's stage sequence
    #[serde(default)]
    pub stages: Vec<StageResult>,

    /// Externally visible status
    #[serde(default)]
    pub status: JobStatus,

    /// Whether cancellation has been requested
    #[serde(default)]
    pub cancel_requested: bool,

    /// Whether the one permitted fallback hop has been consumed
    #[serde(default)]
    pub fallback_used: bool,

    /// Compiled output, present once the job reaches a `completed*` state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CompiledOutput>,

    /// Error message (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job with its selected variant.
    pub fn new(input: InputDescriptor, variant: PipelineVariant, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            input,
            variant,
            selection_reason: reason.into(),
            stages: Vec::new(),
            status: JobStatus::Queued,
            cancel_requested: false,
            fallback_used: false,
            output: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Transition into `processing` when the first stage dispatches.
    pub fn start(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Mark the job completed; warnings when any unit was skipped.
    pub fn complete(&mut self, output: CompiledOutput) {
        self.status = if output.skipped_units.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithWarnings
        };
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Mark the job failed with a caller-safe message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Mark the job cancelled; already-produced unit results are kept.
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        self.updated_at = Utc::now();
    }

    /// Switch to the fallback variant, discarding prior stage output.
    ///
    /// Restart-from-scratch: partial output across differing variants is
    /// not guaranteed compatible.
    pub fn apply_fallback(&mut self, variant: PipelineVariant, reason: impl Into<String>) {
        self.variant = variant;
        self.selection_reason = reason.into();
        self.stages.clear();
        self.fallback_used = true;
        self.error_message = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_validation() {
        let ok = InputDescriptor::video("uploads/a.mp4", 1024, 30.0);
        assert!(ok.validate().is_ok());

        let empty = InputDescriptor::video("   ", 1024, 30.0);
        assert!(matches!(empty.validate(), Err(InputError::MissingSource)));

        let oversized = InputDescriptor::video("uploads/a.mp4", MAX_INPUT_SIZE_BYTES + 1, 30.0);
        assert!(matches!(oversized.validate(), Err(InputError::Oversized { .. })));

        let negative = InputDescriptor {
            duration_secs: Some(-1.0),
            ..InputDescriptor::video("uploads/a.mp4", 1024, 30.0)
        };
        assert!(matches!(
            negative.validate(),
            Err(InputError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_job_lifecycle() {
        let input = InputDescriptor::video("uploads/a.mp4", 1024, 30.0);
        let mut job = Job::new(input, PipelineVariant::Primary, "small-content");
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.status.is_terminal());

        job.start();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());

        job.fail("stage failed");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status.is_terminal());
        assert!(!job.status.has_result());
    }

    #[test]
    fn test_fallback_resets_stages() {
        let input = InputDescriptor::video("uploads/a.mp4", 1024, 30.0);
        let mut job = Job::new(input, PipelineVariant::Primary, "small-content");
        job.start();
        job.stages.push(crate::stage::StageResult::new(
            crate::pipeline::StageKind::Segment,
        ));

        job.apply_fallback(PipelineVariant::Bulk, "failover");
        assert!(job.fallback_used);
        assert!(job.stages.is_empty());
        assert_eq!(job.variant, PipelineVariant::Bulk);
    }
}
