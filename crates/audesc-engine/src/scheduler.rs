//! Bounded-concurrency unit scheduler.
//!
//! A stage is a small scheduler: up to K units in flight at a time, each
//! unit already wrapped in retry + provider limiting by its worker
//! closure. Units resolve in any order; outputs are recombined in
//! original unit index order before anything downstream sees them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use audesc_models::UnitResult;

/// Successful unit outcome produced by a worker closure.
#[derive(Debug)]
pub struct UnitSuccess<T> {
    /// Stage-specific payload carried to the next stage
    pub value: T,
    /// Short reference recorded on the unit result
    pub payload_ref: String,
    /// Retries consumed
    pub retries: u32,
}

/// Failed unit outcome.
#[derive(Debug, Clone)]
pub enum UnitFailure {
    /// The job was cancelled while this unit was pending or retrying
    Cancelled,
    /// The unit failed; `kind` is the provider taxonomy label
    Failed {
        kind: &'static str,
        message: String,
        retries: u32,
    },
}

/// Everything a stage run produced.
#[derive(Debug)]
pub struct StageRun<T> {
    /// Successful payloads in unit index order
    pub outputs: Vec<(usize, T)>,
    /// One result per unit, index order
    pub units: Vec<UnitResult>,
    /// The stage deadline elapsed with units still pending
    pub timed_out: bool,
    /// Cancellation was observed during the run
    pub cancelled: bool,
}

/// Run a stage's units with bounded parallelism.
///
/// Cancellation is checked before every dispatch; the stage deadline
/// bounds both dispatch and the wait for outstanding units. `on_unit` is
/// invoked once per resolved unit, in resolution order.
pub async fn run_units<I, T, F, Fut>(
    parallelism: usize,
    stage_timeout: Duration,
    cancel: &CancellationToken,
    items: Vec<(usize, I)>,
    worker: F,
    on_unit: impl Fn(&UnitResult),
) -> StageRun<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(usize, I) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = Result<UnitSuccess<T>, UnitFailure>> + Send + 'static,
{
    let deadline = tokio::time::Instant::now() + stage_timeout;
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let expected: Vec<usize> = items.iter().map(|(index, _)| *index).collect();

    let mut queue: VecDeque<(usize, I)> = items.into();
    let mut join_set: JoinSet<(usize, Result<UnitSuccess<T>, UnitFailure>)> = JoinSet::new();
    let mut resolved: BTreeMap<usize, UnitResult> = BTreeMap::new();
    let mut outputs: BTreeMap<usize, T> = BTreeMap::new();
    let mut timed_out = false;
    let mut cancelled = false;

    // Dispatch phase.
    while let Some((index, item)) = queue.pop_front() {
        if cancel.is_cancelled() {
            cancelled = true;
            let unit = UnitResult::cancelled(index);
            on_unit(&unit);
            resolved.insert(index, unit);
            continue;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                None
            }
            acquired = tokio::time::timeout_at(deadline, semaphore.clone().acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) => None,
                    Err(_) => {
                        timed_out = true;
                        None
                    }
                }
            }
        };

        let Some(permit) = permit else {
            let make = |i: usize| {
                if timed_out {
                    UnitResult::failed(i, "stage deadline elapsed before dispatch", 0)
                } else {
                    UnitResult::cancelled(i)
                }
            };
            let unit = make(index);
            on_unit(&unit);
            resolved.insert(index, unit);
            for (i, _) in queue.drain(..) {
                let unit = make(i);
                on_unit(&unit);
                resolved.insert(i, unit);
            }
            break;
        };

        let worker = worker.clone();
        join_set.spawn(async move {
            let result = worker(index, item).await;
            drop(permit);
            (index, result)
        });
    }

    // Join phase.
    loop {
        match tokio::time::timeout_at(deadline, join_set.join_next()).await {
            Err(_) => {
                timed_out = true;
                join_set.abort_all();
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok((index, result)))) => {
                let unit = match result {
                    Ok(success) => {
                        let unit =
                            UnitResult::succeeded(index, success.payload_ref, success.retries);
                        outputs.insert(index, success.value);
                        unit
                    }
                    Err(UnitFailure::Cancelled) => {
                        cancelled = true;
                        UnitResult::cancelled(index)
                    }
                    Err(UnitFailure::Failed {
                        kind,
                        message,
                        retries,
                    }) => UnitResult::failed(index, format!("{kind}: {message}"), retries),
                };
                on_unit(&unit);
                resolved.insert(index, unit);
            }
            Ok(Some(Err(join_err))) => {
                warn!(error = %join_err, "unit task did not complete");
            }
        }
    }

    // Account for units lost to a timeout or an aborted task.
    for index in expected {
        if !resolved.contains_key(&index) {
            let unit = if cancelled && !timed_out {
                UnitResult::cancelled(index)
            } else {
                UnitResult::failed(index, "stage deadline elapsed", 0)
            };
            on_unit(&unit);
            resolved.insert(index, unit);
        }
    }

    StageRun {
        outputs: outputs.into_iter().collect(),
        units: resolved.into_values().collect(),
        timed_out,
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_unit(value: u32) -> Result<UnitSuccess<u32>, UnitFailure> {
        Ok(UnitSuccess {
            value,
            payload_ref: format!("unit-{value}"),
            retries: 0,
        })
    }

    #[tokio::test]
    async fn test_outputs_recombined_in_index_order() {
        let cancel = CancellationToken::new();
        let items: Vec<(usize, u64)> = vec![(0, 30), (1, 5), (2, 20), (3, 1)];

        let run = run_units(
            4,
            Duration::from_secs(5),
            &cancel,
            items,
            |index, delay_ms| async move {
                // Later units finish first.
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                ok_unit(index as u32)
            },
            |_| {},
        )
        .await;

        let indices: Vec<usize> = run.outputs.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(!run.timed_out);
        assert!(!run.cancelled);
        assert_eq!(run.units.len(), 4);
        assert!(run.units.iter().all(|u| u.is_success()));
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<(usize, ())> = (0..8).map(|i| (i, ())).collect();
        let in_flight_clone = Arc::clone(&in_flight);
        let peak_clone = Arc::clone(&peak);

        run_units(
            2,
            Duration::from_secs(5),
            &cancel,
            items,
            move |index, _| {
                let in_flight = Arc::clone(&in_flight_clone);
                let peak = Arc::clone(&peak_clone);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ok_unit(index as u32)
                }
            },
            |_| {},
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_units_recorded_alongside_successes() {
        let cancel = CancellationToken::new();
        let items: Vec<(usize, ())> = (0..3).map(|i| (i, ())).collect();

        let run = run_units(
            3,
            Duration::from_secs(5),
            &cancel,
            items,
            |index, _| async move {
                if index == 1 {
                    Err(UnitFailure::Failed {
                        kind: "rate_limited",
                        message: "burst".into(),
                        retries: 2,
                    })
                } else {
                    ok_unit(index as u32)
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(run.outputs.len(), 2);
        assert_eq!(run.units.len(), 3);
        let failed = &run.units[1];
        assert!(!failed.is_success());
        assert_eq!(failed.retries_consumed, 2);
        assert!(failed.error.as_deref().unwrap().contains("rate_limited"));
    }

    #[tokio::test]
    async fn test_deadline_marks_pending_units_failed() {
        let cancel = CancellationToken::new();
        let items: Vec<(usize, ())> = (0..4).map(|i| (i, ())).collect();

        let run = run_units(
            1,
            Duration::from_millis(50),
            &cancel,
            items,
            |index, _| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ok_unit(index as u32)
            },
            |_| {},
        )
        .await;

        assert!(run.timed_out);
        assert!(run.outputs.is_empty());
        assert_eq!(run.units.len(), 4);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let cancel = CancellationToken::new();
        let items: Vec<(usize, ())> = (0..4).map(|i| (i, ())).collect();

        let token = cancel.clone();
        let run = run_units(
            1,
            Duration::from_secs(5),
            &cancel,
            items,
            move |index, _| {
                let token = token.clone();
                async move {
                    if index == 0 {
                        token.cancel();
                    }
                    ok_unit(index as u32)
                }
            },
            |_| {},
        )
        .await;

        assert!(run.cancelled);
        // Unit 0 completed before cancelling; later units never ran.
        assert!(run.outputs.len() <= 2);
        assert_eq!(run.units.len(), 4);
    }
}
