//! Per-job progress state, with a polling view and a push channel.
//!
//! Single-writer discipline: only the job manager's stage scheduler calls
//! the mutating methods; every other reader uses [`ProgressTracker::snapshot`].
//! Snapshots are derived purely from stored state, so repeated reads with
//! no intervening update are identical.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use audesc_models::{JobId, JobStatus, ProgressSnapshot, StageKind};

/// Unit accounting for one stage.
#[derive(Debug, Clone)]
struct StageProgress {
    kind: StageKind,
    /// Estimated total units; revised upward once segmentation resolves
    total_units: usize,
    completed_units: usize,
}

/// Mutable progress state for one job.
#[derive(Debug, Clone)]
struct ProgressState {
    job_id: JobId,
    status: JobStatus,
    stage_index: usize,
    stages: Vec<StageProgress>,
    step: String,
    message: String,
    started_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl ProgressState {
    fn new(job_id: JobId, stage_kinds: &[StageKind]) -> Self {
        Self {
            job_id,
            status: JobStatus::Queued,
            stage_index: 0,
            stages: stage_kinds
                .iter()
                .map(|&kind| StageProgress {
                    kind,
                    total_units: 1,
                    completed_units: 0,
                })
                .collect(),
            step: "Queued".to_string(),
            message: "Waiting for a processing slot".to_string(),
            started_at: None,
            updated_at: Utc::now(),
        }
    }

    fn to_snapshot(&self) -> ProgressSnapshot {
        let completed: usize = self.stages.iter().map(|s| s.completed_units).sum();
        let total: usize = self
            .stages
            .iter()
            .map(|s| s.total_units.max(s.completed_units))
            .sum::<usize>()
            .max(1);

        let progress = if self.status.has_result() {
            100
        } else if self.status.is_terminal() {
            ((completed * 100) / total).min(100) as u8
        } else {
            // Hold short of 100 until the job actually completes.
            ((completed * 100) / total).min(99) as u8
        };

        let eta_secs = match (self.status, self.started_at, completed) {
            (JobStatus::Processing, Some(started), done) if done > 0 => {
                let elapsed = (self.updated_at - started).num_milliseconds().max(1) as f64 / 1000.0;
                let rate = done as f64 / elapsed;
                let remaining = total.saturating_sub(done) as f64;
                Some((remaining / rate).ceil() as u64)
            }
            _ => None,
        };

        ProgressSnapshot {
            job_id: self.job_id.clone(),
            status: self.status,
            step: self.step.clone(),
            progress,
            message: self.message.clone(),
            stage_index: self.stage_index,
            total_stages: self.stages.len(),
            completed_units: completed,
            estimated_total_units: total,
            eta_secs,
            updated_at: self.updated_at,
        }
    }
}

/// Holds progress state for every live job.
#[derive(Debug)]
pub struct ProgressTracker {
    states: RwLock<HashMap<JobId, ProgressState>>,
    events: broadcast::Sender<ProgressSnapshot>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            states: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to push progress events. Polling via `snapshot` remains
    /// the compatibility view over the same state.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.events.subscribe()
    }

    /// Register a freshly submitted job.
    pub fn register(&self, job_id: JobId, stage_kinds: &[StageKind]) {
        let state = ProgressState::new(job_id.clone(), stage_kinds);
        if let Ok(mut states) = self.states.write() {
            states.insert(job_id, state);
        }
    }

    /// Reset unit accounting for a fallback restart.
    pub fn reset(&self, job_id: &JobId, stage_kinds: &[StageKind]) {
        self.update(job_id, |state| {
            let started_at = state.started_at;
            *state = ProgressState::new(state.job_id.clone(), stage_kinds);
            state.status = JobStatus::Processing;
            state.started_at = started_at;
            state.message = "Retrying with fallback pipeline".to_string();
        });
    }

    /// Transition the job's externally visible status.
    pub fn set_status(&self, job_id: &JobId, status: JobStatus, message: impl Into<String>) {
        let message = message.into();
        self.update(job_id, |state| {
            state.status = status;
            state.message = message;
            if status == JobStatus::Processing && state.started_at.is_none() {
                state.started_at = Some(Utc::now());
            }
            if status.has_result() {
                state.step = "Complete".to_string();
            }
        });
    }

    /// Enter a stage.
    pub fn begin_stage(&self, job_id: &JobId, stage_index: usize) {
        self.update(job_id, |state| {
            state.stage_index = stage_index;
            if let Some(stage) = state.stages.get(stage_index) {
                state.step = stage.kind.step_label().to_string();
                state.message = format!("{}...", stage.kind.step_label());
            }
        });
    }

    /// Revise a stage's estimated unit count once it is known.
    pub fn set_stage_total(&self, job_id: &JobId, stage_index: usize, total_units: usize) {
        self.update(job_id, |state| {
            if let Some(stage) = state.stages.get_mut(stage_index) {
                stage.total_units = total_units.max(1);
            }
        });
    }

    /// Record one resolved unit of sub-work.
    pub fn unit_completed(&self, job_id: &JobId, stage_index: usize) {
        self.update(job_id, |state| {
            if let Some(stage) = state.stages.get_mut(stage_index) {
                stage.completed_units += 1;
            }
        });
    }

    /// Replace the human-readable message.
    pub fn set_message(&self, job_id: &JobId, message: impl Into<String>) {
        let message = message.into();
        self.update(job_id, |state| {
            state.message = message;
        });
    }

    /// Read-only view; never blocks on external calls.
    pub fn snapshot(&self, job_id: &JobId) -> Option<ProgressSnapshot> {
        let states = self.states.read().ok()?;
        states.get(job_id).map(|s| s.to_snapshot())
    }

    fn update(&self, job_id: &JobId, f: impl FnOnce(&mut ProgressState)) {
        let snapshot = {
            let Ok(mut states) = self.states.write() else {
                return;
            };
            let Some(state) = states.get_mut(job_id) else {
                debug!(job_id = %job_id, "progress update for unknown job");
                return;
            };
            f(state);
            state.updated_at = Utc::now();
            state.to_snapshot()
        };
        // Receivers may lag or be absent; progress is best-effort.
        let _ = self.events.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGES: [StageKind; 3] = [
        StageKind::Analyze,
        StageKind::SynthesizeText,
        StageKind::SynthesizeAudio,
    ];

    fn tracked_job() -> (ProgressTracker, JobId) {
        let tracker = ProgressTracker::new();
        let job_id = JobId::new();
        tracker.register(job_id.clone(), &STAGES);
        (tracker, job_id)
    }

    #[test]
    fn test_snapshot_idempotent_without_updates() {
        let (tracker, job_id) = tracked_job();
        tracker.set_status(&job_id, JobStatus::Processing, "working");

        let a = tracker.snapshot(&job_id).unwrap();
        let b = tracker.snapshot(&job_id).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_progress_revised_as_totals_resolve() {
        let (tracker, job_id) = tracked_job();
        tracker.set_status(&job_id, JobStatus::Processing, "working");
        tracker.begin_stage(&job_id, 0);

        tracker.unit_completed(&job_id, 0);
        let before = tracker.snapshot(&job_id).unwrap().progress;

        // Segmentation resolves a much larger unit count; percent may drop.
        tracker.set_stage_total(&job_id, 1, 10);
        tracker.set_stage_total(&job_id, 2, 10);
        let after = tracker.snapshot(&job_id).unwrap().progress;
        assert!(after < before);

        // Once totals are known, progress is monotonic non-decreasing.
        let mut last = after;
        for _ in 0..10 {
            tracker.unit_completed(&job_id, 1);
            let p = tracker.snapshot(&job_id).unwrap().progress;
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn test_completed_job_reports_100() {
        let (tracker, job_id) = tracked_job();
        tracker.set_status(&job_id, JobStatus::Processing, "working");
        for i in 0..3 {
            tracker.unit_completed(&job_id, i);
        }
        tracker.set_status(&job_id, JobStatus::Completed, "done");

        let snapshot = tracker.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.step, "Complete");
    }

    #[test]
    fn test_eta_appears_after_first_unit() {
        let (tracker, job_id) = tracked_job();
        tracker.set_status(&job_id, JobStatus::Processing, "working");
        tracker.set_stage_total(&job_id, 0, 4);
        assert!(tracker.snapshot(&job_id).unwrap().eta_secs.is_none());

        tracker.unit_completed(&job_id, 0);
        assert!(tracker.snapshot(&job_id).unwrap().eta_secs.is_some());
    }

    #[tokio::test]
    async fn test_push_channel_mirrors_updates() {
        let (tracker, job_id) = tracked_job();
        let mut rx = tracker.subscribe();

        tracker.set_status(&job_id, JobStatus::Processing, "working");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, JobStatus::Processing);
        assert_eq!(event, tracker.snapshot(&job_id).unwrap());
    }
}
