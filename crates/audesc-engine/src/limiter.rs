//! Per-provider concurrency limiter.
//!
//! One bounded permit pool per external collaborator (rate-limit domain),
//! shared across all jobs. Waiters queue FIFO; a waiter that is cancelled
//! leaves the queue without acquiring.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use audesc_models::StageKind;

use crate::config::EngineConfig;

/// Rate-limit domain of one external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Storage,
    Segmentation,
    Extraction,
    Vision,
    Speech,
}

impl ResourceClass {
    /// The resource class a stage's external calls are charged against.
    pub fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::Segment => ResourceClass::Segmentation,
            StageKind::Extract => ResourceClass::Extraction,
            StageKind::Analyze | StageKind::SynthesizeText => ResourceClass::Vision,
            StageKind::SynthesizeAudio => ResourceClass::Speech,
        }
    }
}

/// Why an acquire did not produce a permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The caller's cancellation token fired while waiting
    Cancelled,
    /// The pool was closed during shutdown
    Closed,
}

/// Bounded permit pools, one per resource class.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    pools: HashMap<ResourceClass, Arc<Semaphore>>,
}

impl ConcurrencyLimiter {
    /// Build pools sized from configuration.
    pub fn new(config: &EngineConfig) -> Self {
        let mut pools = HashMap::new();
        pools.insert(
            ResourceClass::Storage,
            Arc::new(Semaphore::new(config.storage_permits)),
        );
        pools.insert(
            ResourceClass::Segmentation,
            Arc::new(Semaphore::new(config.segmentation_permits)),
        );
        pools.insert(
            ResourceClass::Extraction,
            Arc::new(Semaphore::new(config.extraction_permits)),
        );
        pools.insert(
            ResourceClass::Vision,
            Arc::new(Semaphore::new(config.vision_permits)),
        );
        pools.insert(
            ResourceClass::Speech,
            Arc::new(Semaphore::new(config.speech_permits)),
        );
        Self { pools }
    }

    /// Acquire a permit for the given class, suspending until a slot is
    /// free. Dropping the returned permit releases the slot.
    pub async fn acquire(
        &self,
        class: ResourceClass,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, AcquireError> {
        // Pools cover the full closed set of classes; a miss means a bug
        // in `new`, treated as a closed pool rather than a panic.
        let Some(pool) = self.pools.get(&class) else {
            return Err(AcquireError::Closed);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            permit = pool.clone().acquire_owned() => {
                permit.map_err(|_| AcquireError::Closed)
            }
        }
    }

    /// Free slots currently available for a class. Diagnostics only.
    pub fn available(&self, class: ResourceClass) -> usize {
        self.pools
            .get(&class)
            .map(|p| p.available_permits())
            .unwrap_or(0)
    }
}
