//! In-memory job store.
//!
//! The store is shared mutable state across jobs, but per-job mutation is
//! single-writer: only the owning job's run loop calls `update` for that
//! job. Readers of one job are never blocked by the writer of another
//! beyond the map lock itself.

use std::collections::HashMap;
use std::sync::RwLock;

use audesc_models::{Job, JobId};

/// Concurrent map of live jobs.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created job.
    pub fn insert(&self, job: Job) {
        if let Ok(mut jobs) = self.jobs.write() {
            jobs.insert(job.id.clone(), job);
        }
    }

    /// Clone a job for read-only use.
    pub fn get(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.read().ok()?.get(job_id).cloned()
    }

    /// Whether a job exists.
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs
            .read()
            .map(|jobs| jobs.contains_key(job_id))
            .unwrap_or(false)
    }

    /// Apply a mutation to one job under the write lock.
    ///
    /// Returns the closure's value, or `None` when the job is unknown.
    /// The closure must not block; the lock spans only the call.
    pub fn update<R>(&self, job_id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut jobs = self.jobs.write().ok()?;
        jobs.get_mut(job_id).map(f)
    }

    /// Number of jobs currently stored.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
