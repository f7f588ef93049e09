//! The capability contract every pipeline element implements.
//!
//! A [`Stage`] is one link in a linear chain: it consumes its upstream
//! neighbor's output and buffers its own results for the downstream
//! neighbor in an [`OutputQueue`](crate::queue::OutputQueue). No base type
//! is required; any type implementing the trait qualifies. The engine
//! calls the methods here with context structs carrying the shared state
//! and the two upstream flags (`upstream_done`, `upstream_can_give`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PipelineError, StageError};

/// Context for [`Stage::can_run`].
pub struct PollContext<'a, S> {
    /// Shared pipeline state.
    pub state: &'a S,
    /// Whether the upstream neighbor currently has output to give.
    /// Always `true` for the first stage, which has no upstream gate.
    pub upstream_can_give: bool,
}

/// Context for [`Stage::run`].
///
/// Owned (rather than borrowed) because it crosses into the spawned run
/// task along with the input.
pub struct RunContext<S> {
    /// Shared pipeline state.
    pub state: Arc<S>,
    /// Whether the entire upstream prefix of the chain is done.
    /// Always `true` for the first stage.
    pub upstream_done: bool,
}

/// Context for [`Stage::is_done`].
pub struct DoneContext<'a, S> {
    /// Shared pipeline state.
    pub state: &'a S,
    /// Whether the entire upstream prefix of the chain is done.
    pub upstream_done: bool,
    /// Whether the upstream neighbor currently has output to give.
    pub upstream_can_give: bool,
}

/// One link in the pipeline chain.
///
/// `S` is the shared state type; every callback can read it, and stages
/// that mutate it use interior mutability (the engine enforces no locking
/// beyond its scheduling discipline: within a tick only one stage is
/// dispatched at a time, though earlier asynchronous runs may still be
/// settling).
#[async_trait]
pub trait Stage<S: Send + Sync + 'static>: Send {
    /// What this stage consumes from its upstream neighbor.
    type Input: Send + 'static;
    /// What this stage buffers for its downstream neighbor.
    type Output: Send + 'static;

    /// Scheduling tier. Higher priorities run preferentially; stages
    /// sharing a priority form one tier. Read once at construction and
    /// fixed for the pipeline's life.
    fn priority(&self) -> i32 {
        0
    }

    /// Optional label used in log records. Unnamed stages are labelled
    /// by chain index.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Whether this stage is eligible to be dispatched this tick.
    ///
    /// Must be a pure predicate: no mutation. Stages that honor
    /// backpressure return `false` while `ctx.upstream_can_give` is
    /// `false`.
    ///
    /// The first stage is dispatched once before tiered polling begins
    /// (the seed run); afterwards its `can_run` alone governs re-dispatch,
    /// so it should return `false` until the stage is ready to run again.
    fn can_run(&self, ctx: &PollContext<'_, S>) -> bool;

    /// Perform one unit of work, appending zero or more results to this
    /// stage's own queue.
    ///
    /// `input` is the item pulled from the upstream neighbor, the
    /// caller-supplied initial input for the first stage's seed run, or
    /// `None` for later runs of the (self-driving) first stage.
    ///
    /// The engine never waits for this future to finish before continuing
    /// its scan; a returned error, whether produced before or after an
    /// await point, is observed identically and fails the whole run.
    async fn run(&mut self, input: Option<Self::Input>, ctx: &RunContext<S>)
        -> Result<(), StageError>;

    /// True iff this stage's queue holds at least one output.
    fn can_give(&self) -> bool;

    /// Remove and return the oldest queued output.
    ///
    /// Returning `None` when the engine requires an item is a
    /// programming-contract violation and terminates the run with
    /// [`PipelineError::NothingToGive`].
    fn give(&mut self) -> Option<Self::Output>;

    /// Whether this stage will never run again nor produce any output
    /// beyond what is already queued.
    ///
    /// Must be a pure predicate. The engine recomputes done-ness on
    /// demand, never caching it, and only treats a stage as done once its
    /// entire upstream prefix is done as well.
    fn is_done(&self, ctx: &DoneContext<'_, S>) -> bool;

    /// Notification hook invoked on every stage when any stage in the
    /// pipeline fails. Best-effort resource release or logging only; must
    /// not panic. Default is a no-op.
    fn on_pipeline_error(&mut self, _error: &PipelineError, _state: &S) {}
}
