//! Orchestration core for the AuDesc narration pipeline.
//!
//! This crate owns the job lifecycle: a submitted media input is mapped to
//! a pipeline variant by the [`selector::PipelineSelector`], then the
//! [`manager::JobManager`] drives the variant's stage sequence against the
//! provider capability traits, with per-unit retries
//! ([`retry`]), per-provider concurrency bounds ([`limiter`]) and
//! single-writer progress tracking ([`tracker`]).
//!
//! Callers interact through four operations on the manager: `submit`,
//! `get_status`, `cancel` and `get_result`.

pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod manager;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod stages;
pub mod store;
pub mod tracker;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use limiter::{ConcurrencyLimiter, ResourceClass};
pub use logging::{init_tracing, JobLogger};
pub use manager::{JobManager, Providers};
pub use retry::{RetryError, RetryPolicy};
pub use selector::PipelineSelector;
pub use tracker::ProgressTracker;
