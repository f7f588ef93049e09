//! Typed pipeline construction.
//!
//! [`PipelineBuilder`] replaces the original compile-time chain check: a
//! stage can only be appended if its declared `Input` type equals the
//! previous stage's `Output` type, so an incompatible chain fails to
//! compile instead of misbehaving at run time. Because the builder starts
//! from a first stage, an empty chain is unrepresentable.

use std::marker::PhantomData;

use crate::orchestrator::{Orchestrator, StageCell};
use crate::stage::Stage;

/// Builds an [`Orchestrator`] from an ordered, non-empty stage chain.
///
/// `S` is the shared state type, `I` the pipeline's input (the first
/// stage's `Input`) and `O` the current end of the chain (the most recently
/// appended stage's `Output`).
///
/// ```ignore
/// let orchestrator = PipelineBuilder::new(source)
///     .stage(transform)
///     .stage(sink)
///     .build(state);
/// let result = orchestrator.run(None).await?;
/// ```
pub struct PipelineBuilder<S, I, O> {
    stages: Vec<StageCell<S>>,
    _io: PhantomData<fn(I) -> O>,
}

impl<S, I, O> PipelineBuilder<S, I, O>
where
    S: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start a chain with its first stage.
    ///
    /// The first stage has no upstream: its `can_run` receives
    /// `upstream_can_give = true` and, after the initial seed dispatch, it
    /// is expected to be self-driving.
    pub fn new<T>(first: T) -> Self
    where
        T: Stage<S, Input = I, Output = O> + 'static,
    {
        Self {
            stages: vec![StageCell::new(first, 0)],
            _io: PhantomData,
        }
    }

    /// Append a stage consuming the current chain output.
    pub fn stage<T>(mut self, next: T) -> PipelineBuilder<S, I, T::Output>
    where
        T: Stage<S, Input = O> + 'static,
    {
        let cell = StageCell::new(next, self.stages.len());
        self.stages.push(cell);
        PipelineBuilder {
            stages: self.stages,
            _io: PhantomData,
        }
    }

    /// Finish construction, fixing the chain and adjacency for the
    /// pipeline's lifetime.
    pub fn build(self, state: S) -> Orchestrator<S, I, O> {
        Orchestrator::from_parts(self.stages, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::queue::OutputQueue;
    use crate::stage::{DoneContext, PollContext, RunContext};
    use async_trait::async_trait;

    struct Numbers {
        priority: i32,
        name: Option<&'static str>,
        queue: OutputQueue<u32>,
    }

    #[async_trait]
    impl Stage<()> for Numbers {
        type Input = ();
        type Output = u32;

        fn priority(&self) -> i32 {
            self.priority
        }

        fn name(&self) -> Option<&str> {
            self.name
        }

        fn can_run(&self, _ctx: &PollContext<'_, ()>) -> bool {
            false
        }

        async fn run(
            &mut self,
            _input: Option<()>,
            _ctx: &RunContext<()>,
        ) -> Result<(), StageError> {
            Ok(())
        }

        fn can_give(&self) -> bool {
            self.queue.can_give()
        }

        fn give(&mut self) -> Option<u32> {
            self.queue.give()
        }

        fn is_done(&self, _ctx: &DoneContext<'_, ()>) -> bool {
            true
        }
    }

    struct ToText {
        queue: OutputQueue<String>,
    }

    #[async_trait]
    impl Stage<()> for ToText {
        type Input = u32;
        type Output = String;

        fn can_run(&self, ctx: &PollContext<'_, ()>) -> bool {
            ctx.upstream_can_give
        }

        async fn run(
            &mut self,
            input: Option<u32>,
            _ctx: &RunContext<()>,
        ) -> Result<(), StageError> {
            if let Some(value) = input {
                self.queue.push(value.to_string());
            }
            Ok(())
        }

        fn can_give(&self) -> bool {
            self.queue.can_give()
        }

        fn give(&mut self) -> Option<String> {
            self.queue.give()
        }

        fn is_done(&self, ctx: &DoneContext<'_, ()>) -> bool {
            ctx.upstream_done && !ctx.upstream_can_give
        }
    }

    #[test]
    fn test_builder_fixes_chain_order() {
        let orchestrator = PipelineBuilder::new(Numbers {
            priority: 1,
            name: None,
            queue: OutputQueue::new(),
        })
        .stage(ToText {
            queue: OutputQueue::new(),
        })
        .build(());

        assert_eq!(orchestrator.stage_count(), 2);
    }

    #[test]
    fn test_builder_caches_priority_and_label() {
        let builder = PipelineBuilder::new(Numbers {
            priority: 7,
            name: Some("numbers"),
            queue: OutputQueue::new(),
        })
        .stage(ToText {
            queue: OutputQueue::new(),
        });

        assert_eq!(builder.stages[0].priority, 7);
        assert_eq!(builder.stages[0].label, "numbers");
        assert_eq!(builder.stages[1].priority, 0);
        assert_eq!(builder.stages[1].label, "stage-1");
    }

    #[test]
    fn test_single_stage_chain_is_allowed() {
        let orchestrator = PipelineBuilder::new(Numbers {
            priority: 0,
            name: None,
            queue: OutputQueue::new(),
        })
        .build(());

        assert_eq!(orchestrator.stage_count(), 1);
    }
}
