//! The scheduling core: a tiered cooperative polling loop.
//!
//! The orchestrator owns the ordered stage chain and the shared state, and
//! drives the run tick by tick. Each tick scans the priority tiers from
//! highest to lowest and, within a tier, the stages in chain order. Per
//! stage visit, in this order:
//!
//! 1. a recorded stage failure terminates the run (broadcast, then reject);
//! 2. if the last stage's done cascade holds, its output resolves the run;
//! 3. a runnable stage in a strictly higher tier suppresses all remaining
//!    lower tiers for this tick;
//! 4. otherwise the stage's `can_run` is consulted and, if true, the stage
//!    is dispatched.
//!
//! After the scan the loop yields one scheduling quantum so previously
//! dispatched asynchronous runs can settle and populate queues or the
//! error slot before they are next examined. Dispatch never waits for a
//! run to finish: the future is polled once inline, so a run that
//! completes without suspending settles immediately, and a run that
//! suspends is spawned and left to make progress on the runtime while the
//! loop keeps ticking. The loop itself never blocks: all stage access
//! from the loop uses `try_lock`, and a stage whose run is still in
//! flight is simply skipped for the tick.

mod erased;

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, StageError};
use crate::stage::{DoneContext, PollContext, RunContext};

pub(crate) use erased::{Item, StageCell, type_mismatch};

/// A failure reported by a stage's spawned run.
struct Failure {
    index: usize,
    cause: StageError,
}

/// Single-slot cell that spawned stage completions write failures into and
/// the scheduler loop drains once per stage visit.
///
/// Deliberately not a queue: the run terminates on the first failure it
/// observes, so only the most recent report matters (last writer wins).
#[derive(Clone, Default)]
struct ErrorSlot(Arc<Mutex<Option<Failure>>>);

impl ErrorSlot {
    fn record(&self, index: usize, cause: StageError) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Failure { index, cause });
    }

    fn take(&self) -> Option<Failure> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// The set of stage indices sharing one priority value, in chain order.
#[derive(Debug, PartialEq, Eq)]
struct Tier {
    priority: i32,
    members: Vec<usize>,
}

/// Group stage indices by distinct priority, ordered by descending
/// priority. Tier membership is fixed for the run.
fn partition_tiers(priorities: &[i32]) -> Vec<Tier> {
    let mut distinct: Vec<i32> = priorities.to_vec();
    distinct.sort_unstable_by(|a, b| b.cmp(a));
    distinct.dedup();

    distinct
        .into_iter()
        .map(|priority| Tier {
            priority,
            members: (0..priorities.len())
                .filter(|&i| priorities[i] == priority)
                .collect(),
        })
        .collect()
}

/// Outcome of pulling an input item from an upstream stage.
enum Take {
    /// The oldest queued output.
    Item(Item),
    /// The upstream's lock is held by an in-flight run; retry next tick.
    Busy,
}

/// Drives an ordered stage chain to completion.
///
/// Construct one with [`PipelineBuilder`](crate::builder::PipelineBuilder).
/// `S` is the shared state type, `I` the first stage's input, `O` the last
/// stage's output. A single [`run`](Orchestrator::run) resolves to the
/// last stage's output once the whole chain is done, or rejects with a
/// [`PipelineError`].
pub struct Orchestrator<S, I, O> {
    stages: Vec<StageCell<S>>,
    state: Arc<S>,
    started: AtomicBool,
    error_slot: ErrorSlot,
    _io: PhantomData<fn(I) -> O>,
}

impl<S, I, O> Orchestrator<S, I, O>
where
    S: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    /// Assemble an orchestrator from builder output. The builder
    /// guarantees a non-empty, type-compatible chain.
    pub(crate) fn from_parts(stages: Vec<StageCell<S>>, state: S) -> Self {
        debug_assert!(!stages.is_empty());
        Self {
            stages,
            state: Arc::new(state),
            started: AtomicBool::new(false),
            error_slot: ErrorSlot::default(),
            _io: PhantomData,
        }
    }

    /// The shared state value handed to every stage callback.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Number of stages in the chain.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run the pipeline to completion.
    ///
    /// `input` seeds the first stage's initial dispatch; later runs of the
    /// first stage receive `None` and are expected to be self-driving.
    /// Resolves with the last stage's output once every stage is done, or
    /// rejects with a [`PipelineError`]. May only be called once per
    /// instance; a second call rejects with
    /// [`PipelineError::StartedTwice`] regardless of whether the first has
    /// settled.
    ///
    /// Stage runs are spawned on the ambient tokio runtime, so this must
    /// be awaited within one. A pipeline whose stages never become done
    /// and never error polls forever.
    pub async fn run(&self, input: Option<I>) -> Result<O, PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::StartedTwice);
        }

        let tiers = partition_tiers(
            &self
                .stages
                .iter()
                .map(|cell| cell.priority)
                .collect::<Vec<_>>(),
        );
        info!(
            stages = self.stages.len(),
            tiers = tiers.len(),
            "pipeline started"
        );
        for tier in &tiers {
            debug!(priority = tier.priority, members = ?tier.members, "tier");
        }

        // Seed the chain: the first stage always runs once before tiered
        // polling begins, regardless of tier ordering.
        let seed = input.map(|item| Box::new(item) as Item);
        if let Err(err) = self.dispatch(0, seed).await {
            return Err(self.reject(err).await);
        }

        let last = self.stages.len() - 1;
        loop {
            let mut upper_tier_ran = false;

            'tiers: for tier in &tiers {
                let mut tier_ran = false;

                for &idx in &tier.members {
                    // A recorded failure takes precedence over any other
                    // check.
                    if let Some(failure) = self.error_slot.take() {
                        let err = PipelineError::ComponentFailed {
                            index: failure.index,
                            cause: failure.cause,
                        };
                        return Err(self.reject(err).await);
                    }

                    // The sole success exit: the last stage's done
                    // cascade holds and it hands over the final output.
                    if idx == last && self.chain_done(last) {
                        match self.try_finish(last) {
                            Some(Ok(output)) => {
                                info!(stage = %self.stages[last].label, "pipeline resolved");
                                return Ok(output);
                            }
                            Some(Err(err)) => return Err(self.reject(err).await),
                            None => {} // lock contended; next tick
                        }
                    }

                    if upper_tier_ran {
                        break 'tiers;
                    }

                    if self.poll_stage(idx) {
                        tier_ran = true;
                        if let Err(err) = self.dispatch(idx, None).await {
                            return Err(self.reject(err).await);
                        }
                    }
                }

                upper_tier_ran = upper_tier_ran || tier_ran;
            }

            // Give previously dispatched runs a scheduling quantum to
            // settle before the next scan.
            tokio::task::yield_now().await;
        }
    }

    /// Evaluate a stage's `can_run` with its upstream gate.
    ///
    /// A stage whose lock is held by an in-flight run is not runnable
    /// this tick.
    fn poll_stage(&self, idx: usize) -> bool {
        let upstream_can_give = self.upstream_can_give(idx);
        match self.stages[idx].inner.try_lock() {
            Ok(stage) => stage.can_run(&PollContext {
                state: &self.state,
                upstream_can_give,
            }),
            Err(_) => false,
        }
    }

    /// The upstream neighbor's `can_give`, or `true` for the first stage.
    fn upstream_can_give(&self, idx: usize) -> bool {
        if idx == 0 {
            return true;
        }
        self.stages[idx - 1]
            .inner
            .try_lock()
            .map(|stage| stage.can_give())
            .unwrap_or(false)
    }

    /// The done cascade: stage `k` is done only if every stage from index
    /// 0 through `k` independently reports `is_done`, each evaluated with
    /// `upstream_done = true` and its own upstream's `can_give`.
    ///
    /// Recomputed on demand, never cached, since upstream state can change
    /// between ticks. A stage whose run is still in flight counts as not
    /// done.
    fn chain_done(&self, k: usize) -> bool {
        for idx in 0..=k {
            let upstream_can_give = self.upstream_can_give(idx);
            let done = match self.stages[idx].inner.try_lock() {
                Ok(stage) => stage.is_done(&DoneContext {
                    state: &self.state,
                    upstream_done: true,
                    upstream_can_give,
                }),
                Err(_) => false,
            };
            if !done {
                return false;
            }
        }
        true
    }

    /// Pull the next input item from the stage at `idx`.
    ///
    /// An empty queue on an idle stage is the `NothingToGive` contract
    /// violation; a lock held by an in-flight run just defers the pull.
    fn take_from(&self, idx: usize) -> Result<Take, PipelineError> {
        match self.stages[idx].inner.try_lock() {
            Ok(mut stage) => match stage.give() {
                Some(item) => Ok(Take::Item(item)),
                None => Err(PipelineError::NothingToGive { index: idx }),
            },
            Err(_) => Ok(Take::Busy),
        }
    }

    /// Dispatch the stage at `idx`: compute its input and upstream done
    /// flag, then drive its `run` without waiting for completion. The
    /// future is polled once inline, so a run that never suspends settles
    /// here before the loop moves on; a suspended remainder is spawned
    /// onto the runtime. A rejection or caught panic, whether it happens
    /// before or after the first suspension, lands in the error slot.
    ///
    /// `seed` carries the caller's initial input for the very first
    /// dispatch of stage 0 and is `None` everywhere else.
    async fn dispatch(&self, idx: usize, seed: Option<Item>) -> Result<(), PipelineError> {
        let upstream_done = if idx == 0 {
            true
        } else {
            self.chain_done(idx - 1)
        };

        let input = match seed {
            Some(item) => Some(item),
            // After its seed run the first stage is self-driving.
            None if idx == 0 => None,
            None => match self.take_from(idx - 1)? {
                Take::Item(item) => Some(item),
                Take::Busy => {
                    debug!(stage = %self.stages[idx].label, "upstream busy, dispatch deferred");
                    return Ok(());
                }
            },
        };

        let cell = &self.stages[idx];
        debug!(stage = %cell.label, index = idx, upstream_done, "dispatching stage");

        let stage = Arc::clone(&cell.inner);
        let slot = self.error_slot.clone();
        let label = cell.label.clone();
        let ctx = RunContext {
            state: Arc::clone(&self.state),
            upstream_done,
        };

        let mut task = Box::pin(async move {
            let mut stage = stage.lock().await;
            match AssertUnwindSafe(stage.run(input, ctx)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(cause)) => {
                    warn!(stage = %label, error = %cause, "stage run failed");
                    slot.record(idx, cause);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(stage = %label, panic = %message, "stage run panicked");
                    slot.record(idx, format!("stage panicked: {message}").into());
                }
            }
        });

        if futures::poll!(task.as_mut()).is_pending() {
            tokio::spawn(task);
        }

        Ok(())
    }

    /// Take the final output from the last stage.
    ///
    /// Returns `None` if the stage's lock is contended (retry next tick).
    fn try_finish(&self, last: usize) -> Option<Result<O, PipelineError>> {
        let mut stage = match self.stages[last].inner.try_lock() {
            Ok(stage) => stage,
            Err(_) => return None,
        };
        let item = match stage.give() {
            Some(item) => item,
            None => return Some(Err(PipelineError::NothingToGive { index: last })),
        };
        drop(stage);

        Some(match item.downcast::<O>() {
            Ok(output) => Ok(*output),
            // Unreachable through the builder; kept as a defined failure.
            Err(_) => Err(PipelineError::component_failed(
                last,
                type_mismatch(std::any::type_name::<O>()),
            )),
        })
    }

    /// Broadcast the error to every stage's `on_pipeline_error`, then hand
    /// it back for rejection. No further dispatch occurs afterwards.
    async fn reject(&self, error: PipelineError) -> PipelineError {
        warn!(error = %error, code = error.code().as_str(), "pipeline failed");
        for cell in &self.stages {
            let mut stage = cell.inner.lock().await;
            stage.on_pipeline_error(&error, &self.state);
        }
        error
    }
}

/// Best-effort extraction of a panic payload message.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_tiers_descending() {
        let tiers = partition_tiers(&[0, 2, 1, 2]);
        assert_eq!(
            tiers,
            vec![
                Tier {
                    priority: 2,
                    members: vec![1, 3],
                },
                Tier {
                    priority: 1,
                    members: vec![2],
                },
                Tier {
                    priority: 0,
                    members: vec![0],
                },
            ]
        );
    }

    #[test]
    fn test_partition_tiers_single_tier_keeps_chain_order() {
        let tiers = partition_tiers(&[0, 0, 0]);
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].members, vec![0, 1, 2]);
    }

    #[test]
    fn test_error_slot_last_writer_wins() {
        let slot = ErrorSlot::default();
        slot.record(0, "first".into());
        slot.record(1, "second".into());

        let failure = slot.take().expect("slot should hold a failure");
        assert_eq!(failure.index, 1);
        assert_eq!(failure.cause.to_string(), "second");
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_panic_message_payloads() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
