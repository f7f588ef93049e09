//! Object-safe erasure layer over typed stages.
//!
//! The builder wires stages together with statically checked input/output
//! types, then erases them so the orchestrator can hold a heterogeneous
//! chain. Items flow between stages as boxed `Any` values; the downcasts
//! are guaranteed by the builder's type constraints, and a mismatch (only
//! reachable through a bug in this crate) is surfaced as a stage failure
//! rather than a panic.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{PipelineError, StageError};
use crate::stage::{DoneContext, PollContext, RunContext, Stage};

/// A type-erased item flowing between adjacent stages.
pub(crate) type Item = Box<dyn Any + Send>;

/// Build the stage error reported when an item fails to downcast.
pub(crate) fn type_mismatch(expected: &'static str) -> StageError {
    format!("received an item of unexpected type (expected {expected})").into()
}

/// Object-safe view of a [`Stage`] with its input/output types erased.
#[async_trait]
pub(crate) trait ErasedStage<S>: Send {
    fn can_run(&self, ctx: &PollContext<'_, S>) -> bool;

    async fn run(&mut self, input: Option<Item>, ctx: RunContext<S>) -> Result<(), StageError>;

    fn can_give(&self) -> bool;

    fn give(&mut self) -> Option<Item>;

    fn is_done(&self, ctx: &DoneContext<'_, S>) -> bool;

    fn on_pipeline_error(&mut self, error: &PipelineError, state: &S);
}

#[async_trait]
impl<S, T> ErasedStage<S> for T
where
    S: Send + Sync + 'static,
    T: Stage<S> + 'static,
{
    fn can_run(&self, ctx: &PollContext<'_, S>) -> bool {
        Stage::can_run(self, ctx)
    }

    async fn run(&mut self, input: Option<Item>, ctx: RunContext<S>) -> Result<(), StageError> {
        let input = match input {
            Some(item) => Some(
                *item
                    .downcast::<T::Input>()
                    .map_err(|_| type_mismatch(std::any::type_name::<T::Input>()))?,
            ),
            None => None,
        };
        Stage::run(self, input, &ctx).await
    }

    fn can_give(&self) -> bool {
        Stage::can_give(self)
    }

    fn give(&mut self) -> Option<Item> {
        Stage::give(self).map(|output| Box::new(output) as Item)
    }

    fn is_done(&self, ctx: &DoneContext<'_, S>) -> bool {
        Stage::is_done(self, ctx)
    }

    fn on_pipeline_error(&mut self, error: &PipelineError, state: &S) {
        Stage::on_pipeline_error(self, error, state);
    }
}

/// One slot in the chain: the erased stage plus metadata cached at
/// construction time so the scheduler can read it without locking.
///
/// The mutex also bounds in-flight work to one `run` per stage: a stage
/// whose run is still settling holds its lock, and the scheduler's
/// `try_lock` failures treat it as not runnable, not done, and unable to
/// give for that tick.
pub(crate) struct StageCell<S> {
    pub(crate) inner: Arc<Mutex<Box<dyn ErasedStage<S>>>>,
    pub(crate) priority: i32,
    pub(crate) label: String,
}

impl<S: Send + Sync + 'static> StageCell<S> {
    /// Wrap a typed stage, caching its priority and log label.
    pub(crate) fn new<T>(stage: T, index: usize) -> Self
    where
        T: Stage<S> + 'static,
    {
        let priority = stage.priority();
        let label = stage
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("stage-{index}"));
        let erased: Box<dyn ErasedStage<S>> = Box::new(stage);

        Self {
            inner: Arc::new(Mutex::new(erased)),
            priority,
            label,
        }
    }
}
