//! Stage and unit results with partial-failure tracking.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::pipeline::StageKind;

/// Status of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started yet
    #[default]
    Pending,
    /// Stage is dispatching units
    Running,
    /// Enough units succeeded for the stage to count as done
    Succeeded,
    /// Stage failed fatally; no downstream stage runs
    Failed,
    /// Stage was never run (upstream failure or cancellation)
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

/// Status of the smallest trackable piece of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Outcome for one scene, chunk, or image within a stage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnitResult {
    /// Original unit index; stage output is recombined in this order
    pub index: usize,

    /// Unit status
    pub status: UnitStatus,

    /// Reference to the produced payload (text fragment or audio locator)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_ref: Option<String>,

    /// Error detail if the unit failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Retries consumed; never exceeds the stage's configured maximum
    #[serde(default)]
    pub retries_consumed: u32,
}

impl UnitResult {
    pub fn succeeded(index: usize, payload_ref: impl Into<String>, retries: u32) -> Self {
        Self {
            index,
            status: UnitStatus::Succeeded,
            payload_ref: Some(payload_ref.into()),
            error: None,
            retries_consumed: retries,
        }
    }

    pub fn failed(index: usize, error: impl Into<String>, retries: u32) -> Self {
        Self {
            index,
            status: UnitStatus::Failed,
            payload_ref: None,
            error: Some(error.into()),
            retries_consumed: retries,
        }
    }

    pub fn cancelled(index: usize) -> Self {
        Self {
            index,
            status: UnitStatus::Cancelled,
            payload_ref: None,
            error: None,
            retries_consumed: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Succeeded
    }
}

/// Per-stage outcome: aggregate status plus one result per unit.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StageResult {
    /// Which stage this is
    pub kind: StageKind,

    /// Aggregate status
    #[serde(default)]
    pub status: StageStatus,

    /// Per-unit results, ordered by unit index
    #[serde(default)]
    pub units: Vec<UnitResult>,

    /// Error detail if the stage failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the stage started running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When all units resolved or the stage timed out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    /// Create a pending stage result.
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            status: StageStatus::Pending,
            units: Vec::new(),
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Create a skipped stage result (upstream failure or cancellation).
    pub fn skipped(kind: StageKind) -> Self {
        Self {
            kind,
            status: StageStatus::Skipped,
            ..Self::new(kind)
        }
    }

    /// Mark the stage running.
    pub fn start(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Finalize with resolved unit results.
    ///
    /// Aggregate rule: `Succeeded` when at least one unit succeeded and
    /// either no unit failed or the variant tolerates partial completion.
    pub fn finalize(&mut self, units: Vec<UnitResult>, tolerate_partial: bool) {
        let succeeded = units.iter().filter(|u| u.is_success()).count();
        let failed = units
            .iter()
            .filter(|u| u.status == UnitStatus::Failed)
            .count();

        self.status = if succeeded > 0 && (failed == 0 || tolerate_partial) {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };
        if self.status == StageStatus::Failed {
            self.error = Some(format!(
                "{} of {} units failed",
                failed,
                units.len()
            ));
        }
        self.units = units;
        self.finished_at = Some(Utc::now());
    }

    /// Finalize as fatally failed with an explicit reason.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StageStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Count of units that succeeded.
    pub fn succeeded_units(&self) -> usize {
        self.units.iter().filter(|u| u.is_success()).count()
    }

    /// Indices of units that failed.
    pub fn failed_unit_indices(&self) -> Vec<usize> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Failed)
            .map(|u| u.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_partial_success_tolerated() {
        let mut stage = StageResult::new(StageKind::Analyze);
        stage.start();
        stage.finalize(
            vec![
                UnitResult::succeeded(0, "desc-0", 0),
                UnitResult::failed(1, "rate limited", 3),
                UnitResult::succeeded(2, "desc-2", 1),
            ],
            true,
        );
        assert_eq!(stage.status, StageStatus::Succeeded);
        assert_eq!(stage.succeeded_units(), 2);
        assert_eq!(stage.failed_unit_indices(), vec![1]);
    }

    #[test]
    fn test_stage_partial_failure_not_tolerated() {
        let mut stage = StageResult::new(StageKind::Analyze);
        stage.start();
        stage.finalize(
            vec![
                UnitResult::succeeded(0, "desc-0", 0),
                UnitResult::failed(1, "content rejected", 0),
            ],
            false,
        );
        assert_eq!(stage.status, StageStatus::Failed);
        assert!(stage.error.is_some());
    }

    #[test]
    fn test_stage_all_units_failed_is_fatal() {
        let mut stage = StageResult::new(StageKind::SynthesizeAudio);
        stage.start();
        stage.finalize(
            vec![
                UnitResult::failed(0, "throttled", 2),
                UnitResult::failed(1, "throttled", 2),
            ],
            true,
        );
        assert_eq!(stage.status, StageStatus::Failed);
    }
}
