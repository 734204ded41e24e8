//! Shared data models for the AuDesc narration backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, input descriptors and job status
//! - Pipeline variants and their stage sequences
//! - Stage and unit results with partial-failure tracking
//! - Progress snapshots exposed to polling clients
//! - Compiled narration output
//! - The caller-facing error taxonomy

pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stage;

// Re-export common types
pub use error::{ApiError, ErrorCode, InputError};
pub use job::{InputDescriptor, Job, JobId, JobStatus, MediaKind, SubmitOptions};
pub use output::{CompiledOutput, NarrationFragment};
pub use pipeline::{PipelineVariant, Selection, StageKind, VariantConfig};
pub use progress::ProgressSnapshot;
pub use stage::{StageResult, StageStatus, UnitResult, UnitStatus};
