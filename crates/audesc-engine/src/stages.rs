//! Stage execution against the provider capability traits.
//!
//! Each stage adapter here is a thin contract over one external
//! collaborator: segmentation, media extraction, vision analysis (twice:
//! describe and compose) and speech synthesis. Narration text fragments
//! are persisted through the storage collaborator as they are composed.
//! Every external call goes through the concurrency limiter and the
//! retry executor.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use audesc_models::{JobId, StageKind, StageResult, StageStatus, UnitResult, VariantConfig};
use audesc_providers::{
    AudioArtifact, MediaExtraction, MediaUnit, PromptConfig, SceneSpan, Segmentation,
    SpeechSynthesis, Storage, VisionAnalysis, VoiceConfig,
};

use crate::limiter::{AcquireError, ConcurrencyLimiter, ResourceClass};
use crate::retry::{self, RetryError, RetryPolicy};
use crate::scheduler::{self, StageRun, UnitFailure, UnitSuccess};
use crate::tracker::ProgressTracker;

const ANALYZE_INSTRUCTIONS: &str =
    "Describe what is visible in this media for a viewer who cannot see it. \
     Be concrete and brief; mention people, actions, setting and on-screen text.";

const COMPOSE_INSTRUCTIONS: &str =
    "Rewrite this raw visual description as one narration fragment: present \
     tense, neutral register, no meta commentary.";

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct Providers {
    pub storage: Arc<dyn Storage>,
    pub segmentation: Arc<dyn Segmentation>,
    pub extraction: Arc<dyn MediaExtraction>,
    pub vision: Arc<dyn VisionAnalysis>,
    pub speech: Arc<dyn SpeechSynthesis>,
}

/// Working data carried between stages of one job.
///
/// Entries are keyed by original unit index; a `None` marks a unit that
/// failed upstream and is skipped downstream.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub spans: Vec<SceneSpan>,
    pub units: Vec<Option<MediaUnit>>,
    pub descriptions: Vec<Option<String>>,
    pub fragments: Vec<Option<String>>,
    pub audio: Vec<Option<Vec<AudioArtifact>>>,
    pub skipped: BTreeSet<usize>,
}

impl PipelineState {
    /// Initial state for a variant. Pipelines without a segmentation
    /// stage treat the whole source as a single unit.
    pub fn for_variant(source: &str, config: &VariantConfig) -> Self {
        let mut state = Self::default();
        if !config.stages.contains(&StageKind::Segment) {
            state.units = vec![Some(MediaUnit::whole(source))];
        }
        state
    }

    /// Total unit count once known (after segmentation, or 1).
    pub fn unit_count(&self) -> usize {
        self.units.len().max(1)
    }
}

/// How a stage run ended, from the job manager's point of view.
#[derive(Debug)]
pub enum StageOutcome {
    Succeeded,
    Fatal(String),
    Cancelled,
}

/// Everything a stage run needs; cheap to clone into worker tasks.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: JobId,
    pub source: String,
    pub providers: Providers,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub tracker: Arc<ProgressTracker>,
    pub policy: RetryPolicy,
    pub config: VariantConfig,
    pub cancel: CancellationToken,
    pub voice: VoiceConfig,
}

impl StageContext {
    fn prompt(&self, instructions: &str) -> PromptConfig {
        PromptConfig::new(self.config.provider_label, instructions)
    }
}

/// Run one stage, mutating `state` with its outputs and recording unit
/// results into `stage`. The caller marks the stage running before
/// dispatch so readers see it in the job record while units resolve.
pub async fn run_stage(
    ctx: &StageContext,
    stage_index: usize,
    kind: StageKind,
    state: &mut PipelineState,
    stage: &mut StageResult,
) -> StageOutcome {
    match kind {
        StageKind::Segment => run_segment(ctx, stage_index, state, stage).await,
        StageKind::Extract => run_extract(ctx, stage_index, state, stage).await,
        StageKind::Analyze => run_analyze(ctx, stage_index, state, stage).await,
        StageKind::SynthesizeText => run_synthesize_text(ctx, stage_index, state, stage).await,
        StageKind::SynthesizeAudio => run_synthesize_audio(ctx, stage_index, state, stage).await,
    }
}

async fn run_segment(
    ctx: &StageContext,
    stage_index: usize,
    state: &mut PipelineState,
    stage: &mut StageResult,
) -> StageOutcome {
    ctx.tracker.set_stage_total(&ctx.job_id, stage_index, 1);

    let worker_ctx = ctx.clone();
    let run: StageRun<Vec<SceneSpan>> = scheduler::run_units(
        ctx.config.unit_parallelism,
        ctx.config.stage_timeout,
        &ctx.cancel,
        vec![(0usize, ctx.source.clone())],
        move |_, source| {
            let ctx = worker_ctx.clone();
            async move {
                let (spans, retries) = call_provider(
                    &ctx.limiter,
                    ResourceClass::for_stage(StageKind::Segment),
                    &ctx.policy,
                    &ctx.cancel,
                    "segment",
                    || ctx.providers.segmentation.segment(&source),
                )
                .await?;
                Ok(UnitSuccess {
                    payload_ref: format!("{} scenes", spans.len()),
                    value: spans,
                    retries,
                })
            }
        },
        unit_observer(ctx, stage_index),
    )
    .await;

    let mut outputs = match settle(ctx, stage, run) {
        Ok(outputs) => outputs,
        Err(outcome) => return outcome,
    };

    let Some((_, spans)) = outputs.pop() else {
        stage.fail("segmentation produced no output");
        return StageOutcome::Fatal("segmentation produced no output".to_string());
    };
    if spans.is_empty() {
        stage.fail("segmentation returned no scenes");
        return StageOutcome::Fatal("segmentation returned no scenes".to_string());
    }

    // The true unit count is now known; revise downstream estimates.
    let count = spans.len();
    state.units = vec![None; count];
    state.spans = spans;
    for later in stage_index + 1..ctx.config.stages.len() {
        ctx.tracker.set_stage_total(&ctx.job_id, later, count);
    }

    StageOutcome::Succeeded
}

async fn run_extract(
    ctx: &StageContext,
    stage_index: usize,
    state: &mut PipelineState,
    stage: &mut StageResult,
) -> StageOutcome {
    let items: Vec<(usize, SceneSpan)> = state.spans.iter().copied().enumerate().collect();
    ctx.tracker
        .set_stage_total(&ctx.job_id, stage_index, items.len());

    let worker_ctx = ctx.clone();
    let run: StageRun<MediaUnit> = scheduler::run_units(
        ctx.config.unit_parallelism,
        ctx.config.stage_timeout,
        &ctx.cancel,
        items,
        move |_, span| {
            let ctx = worker_ctx.clone();
            async move {
                let (unit, retries) = call_provider(
                    &ctx.limiter,
                    ResourceClass::for_stage(StageKind::Extract),
                    &ctx.policy,
                    &ctx.cancel,
                    "extract",
                    || ctx.providers.extraction.extract(&ctx.source, span),
                )
                .await?;
                Ok(UnitSuccess {
                    payload_ref: unit.locator.clone(),
                    value: unit,
                    retries,
                })
            }
        },
        unit_observer(ctx, stage_index),
    )
    .await;

    let outputs = match settle(ctx, stage, run) {
        Ok(outputs) => outputs,
        Err(outcome) => return outcome,
    };

    state.units = vec![None; state.spans.len()];
    for (index, unit) in outputs {
        state.units[index] = Some(unit);
    }
    record_skipped(state, stage);
    StageOutcome::Succeeded
}

async fn run_analyze(
    ctx: &StageContext,
    stage_index: usize,
    state: &mut PipelineState,
    stage: &mut StageResult,
) -> StageOutcome {
    let items: Vec<(usize, MediaUnit)> = state
        .units
        .iter()
        .enumerate()
        .filter_map(|(i, unit)| unit.clone().map(|u| (i, u)))
        .collect();
    ctx.tracker
        .set_stage_total(&ctx.job_id, stage_index, items.len());

    let worker_ctx = ctx.clone();
    let run: StageRun<String> = scheduler::run_units(
        ctx.config.unit_parallelism,
        ctx.config.stage_timeout,
        &ctx.cancel,
        items,
        move |_, unit| {
            let ctx = worker_ctx.clone();
            async move {
                let prompt = ctx.prompt(ANALYZE_INSTRUCTIONS);
                let (description, retries) = call_provider(
                    &ctx.limiter,
                    ResourceClass::for_stage(StageKind::Analyze),
                    &ctx.policy,
                    &ctx.cancel,
                    "analyze",
                    || ctx.providers.vision.analyze(&unit, &prompt),
                )
                .await?;
                Ok(UnitSuccess {
                    payload_ref: preview(&description),
                    value: description,
                    retries,
                })
            }
        },
        unit_observer(ctx, stage_index),
    )
    .await;

    let outputs = match settle(ctx, stage, run) {
        Ok(outputs) => outputs,
        Err(outcome) => return outcome,
    };

    state.descriptions = vec![None; state.unit_count()];
    for (index, description) in outputs {
        state.descriptions[index] = Some(description);
    }
    record_skipped(state, stage);
    StageOutcome::Succeeded
}

async fn run_synthesize_text(
    ctx: &StageContext,
    stage_index: usize,
    state: &mut PipelineState,
    stage: &mut StageResult,
) -> StageOutcome {
    let items: Vec<(usize, String)> = state
        .descriptions
        .iter()
        .enumerate()
        .filter_map(|(i, d)| d.clone().map(|d| (i, d)))
        .collect();
    ctx.tracker
        .set_stage_total(&ctx.job_id, stage_index, items.len());

    let worker_ctx = ctx.clone();
    let run: StageRun<String> = scheduler::run_units(
        ctx.config.unit_parallelism,
        ctx.config.stage_timeout,
        &ctx.cancel,
        items,
        move |_, description| {
            let ctx = worker_ctx.clone();
            async move {
                let prompt = ctx.prompt(COMPOSE_INSTRUCTIONS);
                let (fragment, retries) = call_provider(
                    &ctx.limiter,
                    ResourceClass::for_stage(StageKind::SynthesizeText),
                    &ctx.policy,
                    &ctx.cancel,
                    "compose",
                    || ctx.providers.vision.compose(&description, &prompt),
                )
                .await?;

                // Persist the fragment text; the locator becomes the
                // unit's payload reference.
                let payload = Bytes::from(fragment.clone());
                let (locator, store_retries) = call_provider(
                    &ctx.limiter,
                    ResourceClass::Storage,
                    &ctx.policy,
                    &ctx.cancel,
                    "store_fragment",
                    || ctx.providers.storage.put(payload.clone()),
                )
                .await?;

                Ok(UnitSuccess {
                    payload_ref: locator,
                    value: fragment,
                    retries: retries.max(store_retries),
                })
            }
        },
        unit_observer(ctx, stage_index),
    )
    .await;

    let outputs = match settle(ctx, stage, run) {
        Ok(outputs) => outputs,
        Err(outcome) => return outcome,
    };

    state.fragments = vec![None; state.unit_count()];
    for (index, fragment) in outputs {
        state.fragments[index] = Some(fragment);
    }
    record_skipped(state, stage);
    StageOutcome::Succeeded
}

async fn run_synthesize_audio(
    ctx: &StageContext,
    stage_index: usize,
    state: &mut PipelineState,
    stage: &mut StageResult,
) -> StageOutcome {
    let items: Vec<(usize, String)> = state
        .fragments
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.clone().map(|f| (i, f)))
        .collect();
    ctx.tracker
        .set_stage_total(&ctx.job_id, stage_index, items.len());

    let worker_ctx = ctx.clone();
    let run: StageRun<Vec<AudioArtifact>> = scheduler::run_units(
        ctx.config.unit_parallelism,
        ctx.config.stage_timeout,
        &ctx.cancel,
        items,
        move |_, fragment| {
            let ctx = worker_ctx.clone();
            async move {
                // Pre-chunk so the provider never sees TextTooLong.
                let chunks = chunk_text(&fragment, ctx.config.max_chunk_chars);
                let mut artifacts = Vec::with_capacity(chunks.len());
                let mut retries = 0u32;
                for chunk in &chunks {
                    let (artifact, r) = call_provider(
                        &ctx.limiter,
                        ResourceClass::for_stage(StageKind::SynthesizeAudio),
                        &ctx.policy,
                        &ctx.cancel,
                        "synthesize",
                        || ctx.providers.speech.synthesize(chunk, &ctx.voice),
                    )
                    .await?;
                    // A unit spanning several calls reports the worst
                    // single call, so the count stays within the stage's
                    // per-unit retry maximum.
                    retries = retries.max(r);
                    artifacts.push(artifact);
                }
                Ok(UnitSuccess {
                    payload_ref: artifacts
                        .first()
                        .map(|a| a.locator.clone())
                        .unwrap_or_default(),
                    value: artifacts,
                    retries,
                })
            }
        },
        unit_observer(ctx, stage_index),
    )
    .await;

    let outputs = match settle(ctx, stage, run) {
        Ok(outputs) => outputs,
        Err(outcome) => return outcome,
    };

    state.audio = vec![None; state.unit_count()];
    for (index, artifacts) in outputs {
        state.audio[index] = Some(artifacts);
    }
    record_skipped(state, stage);
    StageOutcome::Succeeded
}

/// Progress callback shared by every stage: successes advance the unit
/// counter, failures surface in the status message.
fn unit_observer(ctx: &StageContext, stage_index: usize) -> impl Fn(&UnitResult) + '_ {
    move |unit| {
        if unit.is_success() {
            ctx.tracker.unit_completed(&ctx.job_id, stage_index);
        } else if unit.status == audesc_models::UnitStatus::Failed {
            ctx.tracker.set_message(
                &ctx.job_id,
                format!("Unit {} was skipped", unit.index + 1),
            );
        }
    }
}

/// Finalize the stage result and translate the run into an outcome.
fn settle<T>(
    ctx: &StageContext,
    stage: &mut StageResult,
    run: StageRun<T>,
) -> Result<Vec<(usize, T)>, StageOutcome> {
    if run.timed_out {
        stage.units = run.units;
        let message = format!(
            "stage timed out after {}s with pending units",
            ctx.config.stage_timeout.as_secs()
        );
        stage.fail(message.clone());
        return Err(StageOutcome::Fatal(message));
    }

    stage.finalize(run.units, ctx.config.tolerate_partial);

    if run.cancelled {
        return Err(StageOutcome::Cancelled);
    }
    if stage.status != StageStatus::Succeeded {
        let message = stage
            .error
            .clone()
            .unwrap_or_else(|| "stage failed".to_string());
        return Err(StageOutcome::Fatal(message));
    }
    Ok(run.outputs)
}

fn record_skipped(state: &mut PipelineState, stage: &StageResult) {
    for index in stage.failed_unit_indices() {
        state.skipped.insert(index);
    }
}

/// Acquire a provider permit, then run the call under the retry policy.
///
/// The permit is held for the unit's whole retry loop so backoff time
/// counts against the provider's budget, not around it.
async fn call_provider<T, F, Fut>(
    limiter: &ConcurrencyLimiter,
    class: ResourceClass,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    name: &str,
    op: F,
) -> Result<(T, u32), UnitFailure>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, audesc_providers::ProviderError>>,
{
    let _permit = match limiter.acquire(class, cancel).await {
        Ok(permit) => permit,
        Err(AcquireError::Cancelled) => return Err(UnitFailure::Cancelled),
        Err(AcquireError::Closed) => {
            return Err(UnitFailure::Failed {
                kind: "internal",
                message: "permit pool closed".to_string(),
                retries: 0,
            })
        }
    };

    retry::execute(policy, cancel, name, op)
        .await
        .map_err(|err| match err {
            RetryError::Cancelled => UnitFailure::Cancelled,
            RetryError::NonRetryable { error, retries }
            | RetryError::Exhausted { error, retries } => UnitFailure::Failed {
                kind: error.kind(),
                message: error.to_string(),
                retries,
            },
        })
}

/// Split narration text into synthesis-sized chunks on word boundaries.
/// Words longer than the bound are hard-split.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max_chars {
            if current_len > 0 {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let mut buf = String::new();
            let mut n = 0;
            for ch in word.chars() {
                buf.push(ch);
                n += 1;
                if n == max_chars {
                    chunks.push(std::mem::take(&mut buf));
                    n = 0;
                }
            }
            if n > 0 {
                chunks.push(buf);
            }
            continue;
        }

        let sep = usize::from(current_len > 0);
        if current_len + sep + word_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Short preview of a text payload for unit results and logs.
fn preview(text: &str) -> String {
    const MAX: usize = 60;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_respects_bound() {
        let text = "one two three four five six seven eight nine ten";
        for max in [5, 10, 20] {
            for chunk in chunk_text(text, max) {
                assert!(chunk.chars().count() <= max, "chunk {chunk:?} over {max}");
            }
        }
    }

    #[test]
    fn test_chunk_text_preserves_content() {
        let text = "the quick brown fox jumps over the lazy dog";
        let rejoined = chunk_text(text, 12).join(" ");
        assert_eq!(rejoined, text);
    }

    #[test]
    fn test_chunk_text_hard_splits_long_words() {
        let chunks = chunk_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_chunk_text_empty_input() {
        assert!(chunk_text("", 10).is_empty());
        assert!(chunk_text("   ", 10).is_empty());
    }

    #[test]
    fn test_state_without_segmentation_has_one_unit() {
        let config = audesc_models::PipelineVariant::Blended.config();
        let state = PipelineState::for_variant("uploads/a.png", &config);
        assert_eq!(state.units.len(), 1);
        assert!(state.units[0].is_some());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(200);
        let p = preview(&long);
        assert!(p.chars().count() <= 61);
        assert!(p.ends_with('…'));
    }
}
