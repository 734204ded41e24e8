//! Job lifecycle management.
//!
//! The manager owns every job from submission to its terminal state. It
//! is the single writer of job records and progress state: stage adapters
//! report through the tracker, but only the manager transitions a job's
//! status or appends stage results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use audesc_models::{
    ApiError, CompiledOutput, ErrorCode, InputDescriptor, Job, JobId, JobStatus, NarrationFragment,
    ProgressSnapshot, StageResult, SubmitOptions,
};
use audesc_providers::VoiceConfig;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::limiter::ConcurrencyLimiter;
use crate::logging::JobLogger;
use crate::selector::PipelineSelector;
use crate::stages::{self, PipelineState, StageContext, StageOutcome};
use crate::store::JobStore;
use crate::tracker::ProgressTracker;

pub use crate::stages::Providers;

/// How one full pipeline pass over a job ended.
enum PipelineRun {
    Completed(CompiledOutput),
    Fatal(String),
    Cancelled,
}

/// Drives jobs through their selected pipeline variant.
///
/// Cheap to share: construct once, wrap in an [`Arc`], and call the four
/// lifecycle operations (`submit`, `get_status`, `cancel`, `get_result`)
/// from any task.
pub struct JobManager {
    config: EngineConfig,
    selector: PipelineSelector,
    providers: Providers,
    limiter: Arc<ConcurrencyLimiter>,
    tracker: Arc<ProgressTracker>,
    store: Arc<JobStore>,
    voice: VoiceConfig,
    /// Bounds jobs in `processing`; queued jobs wait here in FIFO order.
    job_slots: Arc<Semaphore>,
    /// Per-job cancellation tokens, children of `shutdown_cancel`.
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    shutting_down: AtomicBool,
    shutdown_cancel: CancellationToken,
}

impl JobManager {
    /// Build a manager with the default rule set.
    ///
    /// Validates the whole configuration up front so a bad permit pool or
    /// retry policy surfaces at startup rather than mid-job.
    pub fn new(config: EngineConfig, providers: Providers) -> EngineResult<Self> {
        config.validate()?;
        let selector = PipelineSelector::with_default_rules()?;
        let limiter = Arc::new(ConcurrencyLimiter::new(&config));
        let job_slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Ok(Self {
            config,
            selector,
            providers,
            limiter,
            tracker: Arc::new(ProgressTracker::new()),
            store: Arc::new(JobStore::new()),
            voice: VoiceConfig::default(),
            job_slots,
            tokens: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            shutdown_cancel: CancellationToken::new(),
        })
    }

    /// Progress tracker, for subscribing to push events.
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    /// Submit a media input for narration.
    ///
    /// Validates the descriptor, selects a pipeline variant, and enqueues
    /// the job. Returns immediately with the new job's ID; processing
    /// happens on a spawned task once a job slot frees up.
    pub fn submit(
        self: &Arc<Self>,
        input: InputDescriptor,
        options: SubmitOptions,
    ) -> Result<JobId, ApiError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown.into());
        }
        input.validate()?;

        let selection = self.selector.select(&input, options.variant_override);
        let job = Job::new(input, selection.variant, selection.reason);
        let job_id = job.id.clone();
        let stage_kinds = job.variant.config().stages;

        self.tracker.register(job_id.clone(), &stage_kinds);
        self.store.insert(job);

        let token = self.shutdown_cancel.child_token();
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(job_id.clone(), token);
        }

        let manager = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            manager.run_job(id).await;
        });

        Ok(job_id)
    }

    /// Current progress snapshot for a job.
    ///
    /// Pure read: repeated calls with no intervening engine work return
    /// identical snapshots.
    pub fn get_status(&self, job_id: &JobId) -> Result<ProgressSnapshot, ApiError> {
        self.tracker
            .snapshot(job_id)
            .ok_or_else(|| EngineError::NotFound(job_id.clone()).into())
    }

    /// Request cancellation of a job.
    ///
    /// Acknowledged immediately; in-flight units run to their next
    /// suspension point, then the job settles to `cancelled`. Cancelling
    /// an already-terminal job is an error, not a no-op.
    pub fn cancel(&self, job_id: &JobId) -> Result<(), ApiError> {
        let status = self
            .store
            .get(job_id)
            .map(|job| job.status)
            .ok_or_else(|| EngineError::NotFound(job_id.clone()))?;
        if status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(job_id.clone()).into());
        }

        self.store.update(job_id, |job| {
            job.cancel_requested = true;
            job.updated_at = Utc::now();
        });
        if let Ok(tokens) = self.tokens.lock() {
            if let Some(token) = tokens.get(job_id) {
                token.cancel();
            }
        }
        Ok(())
    }

    /// Fetch the compiled output of a `completed*` job.
    pub fn get_result(&self, job_id: &JobId) -> Result<CompiledOutput, ApiError> {
        let job = self
            .store
            .get(job_id)
            .ok_or_else(|| EngineError::NotFound(job_id.clone()))?;

        match job.status {
            status if status.has_result() => job
                .output
                .clone()
                .ok_or_else(|| EngineError::NotReady(job_id.clone()).into()),
            JobStatus::Failed => Err(ApiError::new(
                ErrorCode::Internal,
                job.error_message
                    .unwrap_or_else(|| format!("job {job_id} failed")),
            )),
            JobStatus::Cancelled => Err(EngineError::Cancelled(job_id.clone()).into()),
            _ => Err(EngineError::NotReady(job_id.clone()).into()),
        }
    }

    /// Full job record, including per-stage and per-unit results.
    pub fn get_job(&self, job_id: &JobId) -> Result<Job, ApiError> {
        self.store
            .get(job_id)
            .ok_or_else(|| EngineError::NotFound(job_id.clone()).into())
    }

    /// Stop accepting jobs and drain the ones in flight.
    ///
    /// Running jobs get the configured drain window to finish; whatever
    /// is still running after that is cancelled and given a short grace
    /// period to settle.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if !self.drain(self.config.shutdown_timeout).await {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "drain window elapsed; cancelling remaining jobs"
            );
            self.shutdown_cancel.cancel();
            self.drain(Duration::from_secs(5)).await;
        }
        info!(jobs_recorded = self.store.len(), "engine shut down");
    }

    /// Wait until no job holds a processing slot, up to `window`.
    async fn drain(&self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            if self.job_slots.available_permits() >= self.config.max_concurrent_jobs {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn run_job(self: Arc<Self>, job_id: JobId) {
        let Some(token) = self.token_for(&job_id) else {
            return;
        };
        let logger = JobLogger::new(&job_id, "narration");

        // Wait for a processing slot; a queued job can be cancelled
        // before it ever starts.
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            acquired = Arc::clone(&self.job_slots).acquire_owned() => acquired.ok(),
        };
        let Some(_permit) = permit else {
            self.finalize_cancelled(&job_id, &logger);
            return;
        };
        if self
            .store
            .get(&job_id)
            .map(|job| job.cancel_requested)
            .unwrap_or(true)
        {
            self.finalize_cancelled(&job_id, &logger);
            return;
        }

        let variant = match self.store.get(&job_id) {
            Some(job) => job.variant,
            None => return,
        };
        self.store.update(&job_id, |job| job.start());
        self.tracker
            .set_status(&job_id, JobStatus::Processing, "Processing started");
        logger.log_start(&format!("pipeline variant {variant}"));

        let mut outcome = self.run_pipeline(&job_id, &token, &logger).await;

        // At most one failover hop, and only for stage-fatal failures.
        if let PipelineRun::Fatal(reason) = &outcome {
            if let Some(selection) = self.fallback_selection(&job_id) {
                logger.log_warning(&format!(
                    "pipeline failed ({reason}); failing over to {}",
                    selection.variant
                ));
                let stage_kinds = selection.variant.config().stages;
                self.store.update(&job_id, |job| {
                    job.apply_fallback(selection.variant, selection.reason.clone());
                });
                self.tracker.reset(&job_id, &stage_kinds);
                outcome = self.run_pipeline(&job_id, &token, &logger).await;
            }
        }

        match outcome {
            PipelineRun::Completed(output) => {
                let message = completion_message(&output);
                self.store.update(&job_id, |job| job.complete(output));
                let status = self
                    .store
                    .get(&job_id)
                    .map(|job| job.status)
                    .unwrap_or(JobStatus::Completed);
                self.tracker.set_status(&job_id, status, &message);
                logger.log_completion(&message);
            }
            PipelineRun::Fatal(reason) => {
                self.store.update(&job_id, |job| job.fail(reason.clone()));
                self.tracker.set_status(
                    &job_id,
                    JobStatus::Failed,
                    format!("Processing failed: {reason}"),
                );
                logger.log_error(&reason);
            }
            PipelineRun::Cancelled => {
                self.finalize_cancelled(&job_id, &logger);
                return;
            }
        }
        self.remove_token(&job_id);
    }

    /// Run the job's current variant front to back.
    async fn run_pipeline(
        &self,
        job_id: &JobId,
        token: &CancellationToken,
        logger: &JobLogger,
    ) -> PipelineRun {
        let Some(job) = self.store.get(job_id) else {
            return PipelineRun::Fatal("job record disappeared".to_string());
        };
        let config = job.variant.config();
        let ctx = StageContext {
            job_id: job_id.clone(),
            source: job.input.source.clone(),
            providers: self.providers.clone(),
            limiter: Arc::clone(&self.limiter),
            tracker: Arc::clone(&self.tracker),
            policy: self
                .config
                .retry
                .clone()
                .with_max_retries(config.max_unit_retries),
            config: config.clone(),
            cancel: token.clone(),
            voice: self.voice.clone(),
        };
        let mut state = PipelineState::for_variant(&job.input.source, &config);

        for (stage_index, &kind) in config.stages.iter().enumerate() {
            // A stage never starts unless its predecessor succeeded and
            // the job is still live.
            if token.is_cancelled() {
                self.mark_remaining_skipped(job_id, &config.stages[stage_index..]);
                return PipelineRun::Cancelled;
            }

            self.tracker.begin_stage(job_id, stage_index);
            logger.log_progress(&format!(
                "stage {}/{}: {}",
                stage_index + 1,
                config.stages.len(),
                kind.step_label()
            ));
            let mut stage = StageResult::new(kind);
            stage.start();
            self.store.update(job_id, {
                let stage = stage.clone();
                move |job| job.stages.push(stage)
            });

            let outcome = stages::run_stage(&ctx, stage_index, kind, &mut state, &mut stage).await;

            self.store.update(job_id, move |job| {
                if let Some(last) = job.stages.last_mut() {
                    *last = stage;
                }
                job.updated_at = Utc::now();
            });

            match outcome {
                StageOutcome::Succeeded => {}
                StageOutcome::Fatal(reason) => {
                    self.mark_remaining_skipped(job_id, &config.stages[stage_index + 1..]);
                    return PipelineRun::Fatal(reason);
                }
                StageOutcome::Cancelled => {
                    self.mark_remaining_skipped(job_id, &config.stages[stage_index + 1..]);
                    return PipelineRun::Cancelled;
                }
            }
        }

        PipelineRun::Completed(compile_output(&state))
    }

    /// Decide whether a failed job gets its one failover hop.
    fn fallback_selection(&self, job_id: &JobId) -> Option<audesc_models::Selection> {
        let job = self.store.get(job_id)?;
        if job.fallback_used {
            return None;
        }
        self.selector.select_fallback(&job.input, job.variant)
    }

    fn mark_remaining_skipped(&self, job_id: &JobId, kinds: &[audesc_models::StageKind]) {
        let skipped: Vec<StageResult> = kinds.iter().map(|&kind| StageResult::skipped(kind)).collect();
        self.store.update(job_id, move |job| {
            job.stages.extend(skipped);
        });
    }

    fn finalize_cancelled(&self, job_id: &JobId, logger: &JobLogger) {
        self.store.update(job_id, |job| {
            if !job.status.is_terminal() {
                job.cancel();
            }
        });
        self.tracker
            .set_status(job_id, JobStatus::Cancelled, "Job cancelled");
        logger.log_completion("cancelled");
        self.remove_token(job_id);
    }

    fn token_for(&self, job_id: &JobId) -> Option<CancellationToken> {
        self.tokens.lock().ok()?.get(job_id).cloned()
    }

    fn remove_token(&self, job_id: &JobId) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(job_id);
        }
    }
}

/// Assemble the deliverable from pipeline working state.
///
/// Fragments come out in unit-index order. A unit whose narration text
/// resolved but whose audio did not still contributes its text; its index
/// appears in `skipped_units`.
fn compile_output(state: &PipelineState) -> CompiledOutput {
    let mut fragments = Vec::new();
    for (index, text) in state.fragments.iter().enumerate() {
        let Some(text) = text else { continue };
        let audio_refs = state
            .audio
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|artifacts| artifacts.iter().map(|a| a.locator.clone()).collect())
            .unwrap_or_default();
        fragments.push(NarrationFragment {
            unit_index: index,
            text: text.clone(),
            audio_refs,
        });
    }
    CompiledOutput {
        fragments,
        skipped_units: state.skipped.iter().copied().collect(),
    }
}

fn completion_message(output: &CompiledOutput) -> String {
    if output.skipped_units.is_empty() {
        "Narration complete".to_string()
    } else {
        let units: Vec<String> = output
            .skipped_units
            .iter()
            .map(|index| (index + 1).to_string())
            .collect();
        format!(
            "Narration complete; skipped {} of {} units: {}",
            output.skipped_units.len(),
            output.skipped_units.len() + output.fragments.len(),
            units.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audesc_models::{MediaKind, PipelineVariant};

    use crate::stages::PipelineState;

    #[test]
    fn test_compile_output_orders_fragments_and_reports_skips() {
        let config = PipelineVariant::Primary.config();
        let mut state = PipelineState::for_variant("uploads/a.mp4", &config);
        state.fragments = vec![
            Some("A door opens.".to_string()),
            None,
            Some("The room is empty.".to_string()),
        ];
        state.audio = vec![
            Some(vec![audesc_providers::AudioArtifact {
                locator: "audio/0.ogg".to_string(),
                duration_secs: Some(2.5),
            }]),
            None,
            None,
        ];
        state.skipped.insert(1);
        state.skipped.insert(2);

        let output = compile_output(&state);
        assert_eq!(output.fragments.len(), 2);
        assert_eq!(output.fragments[0].unit_index, 0);
        assert_eq!(output.fragments[0].audio_refs, vec!["audio/0.ogg"]);
        assert_eq!(output.fragments[1].unit_index, 2);
        assert!(output.fragments[1].audio_refs.is_empty());
        assert_eq!(output.skipped_units, vec![1, 2]);
    }

    #[test]
    fn test_completion_message_names_skipped_units() {
        let output = CompiledOutput {
            fragments: vec![NarrationFragment {
                unit_index: 0,
                text: "text".to_string(),
                audio_refs: vec![],
            }],
            skipped_units: vec![2],
        };
        let message = completion_message(&output);
        assert!(message.contains("skipped 1"));
        assert!(message.contains('3'), "unit index reported one-based");
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_input() {
        let manager = Arc::new(
            JobManager::new(EngineConfig::default(), fakes::providers()).unwrap(),
        );
        let result = manager.submit(
            InputDescriptor {
                source: "  ".to_string(),
                media_kind: MediaKind::Video,
                size_bytes: Some(1024),
                duration_secs: Some(10.0),
            },
            SubmitOptions::default(),
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_lookup_of_unknown_job_fails() {
        let manager = JobManager::new(EngineConfig::default(), fakes::providers()).unwrap();
        let id = JobId::new();
        assert_eq!(
            manager.get_status(&id).unwrap_err().code,
            ErrorCode::NotFound
        );
        assert_eq!(manager.cancel(&id).unwrap_err().code, ErrorCode::NotFound);
        assert_eq!(
            manager.get_result(&id).unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    mod fakes {
        use std::sync::Arc;

        use async_trait::async_trait;
        use bytes::Bytes;

        use audesc_providers::{
            AudioArtifact, MediaExtraction, MediaUnit, PromptConfig, ProviderError, SceneSpan,
            Segmentation, SpeechSynthesis, Storage, VisionAnalysis, VoiceConfig,
        };

        use crate::stages::Providers;

        struct Inert;

        #[async_trait]
        impl Storage for Inert {
            async fn put(&self, _data: Bytes) -> Result<String, ProviderError> {
                Ok("mem://fragment".to_string())
            }
            async fn get(&self, _locator: &str) -> Result<Bytes, ProviderError> {
                Ok(Bytes::new())
            }
        }

        #[async_trait]
        impl Segmentation for Inert {
            async fn segment(&self, _source: &str) -> Result<Vec<SceneSpan>, ProviderError> {
                Ok(vec![SceneSpan {
                    start_secs: 0.0,
                    end_secs: 1.0,
                }])
            }
        }

        #[async_trait]
        impl MediaExtraction for Inert {
            async fn extract(
                &self,
                source: &str,
                span: SceneSpan,
            ) -> Result<MediaUnit, ProviderError> {
                Ok(MediaUnit::scene(source, span))
            }
        }

        #[async_trait]
        impl VisionAnalysis for Inert {
            async fn analyze(
                &self,
                _unit: &MediaUnit,
                _prompt: &PromptConfig,
            ) -> Result<String, ProviderError> {
                Ok("a description".to_string())
            }
            async fn compose(
                &self,
                _description: &str,
                _prompt: &PromptConfig,
            ) -> Result<String, ProviderError> {
                Ok("a narration".to_string())
            }
        }

        #[async_trait]
        impl SpeechSynthesis for Inert {
            async fn synthesize(
                &self,
                _text: &str,
                _voice: &VoiceConfig,
            ) -> Result<AudioArtifact, ProviderError> {
                Ok(AudioArtifact {
                    locator: "mem://audio".to_string(),
                    duration_secs: Some(1.0),
                })
            }
        }

        pub fn providers() -> Providers {
            let inert = Arc::new(Inert);
            Providers {
                storage: inert.clone(),
                segmentation: inert.clone(),
                extraction: inert.clone(),
                vision: inert.clone(),
                speech: inert,
            }
        }
    }
}
