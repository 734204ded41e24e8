//! Progress snapshots exposed to polling clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// Read-mostly view of a job's progress.
///
/// This is the polling contract: `{jobId, status, step, progress, message}`
/// plus enough detail for a progress UI. Snapshots are derived from the
/// single-writer progress state, so repeated reads with no intervening
/// update are identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Job this snapshot describes
    pub job_id: JobId,

    /// Externally visible status
    pub status: JobStatus,

    /// Human-readable name of the current step
    pub step: String,

    /// Percent complete, 0-100
    pub progress: u8,

    /// Latest human-readable message
    pub message: String,

    /// Index of the current stage (0-based)
    pub stage_index: usize,

    /// Total stages in the selected variant
    pub total_stages: usize,

    /// Completed units across all stages
    pub completed_units: usize,

    /// Estimated total units; revised upward as segmentation resolves
    pub estimated_total_units: usize,

    /// Heuristic, non-binding time-remaining estimate in seconds.
    /// Omitted until at least one unit has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,

    /// When this snapshot's state was last updated
    pub updated_at: DateTime<Utc>,
}
