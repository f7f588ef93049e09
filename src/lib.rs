//! icefall: a tiered cooperative polling orchestrator for linear stage
//! pipelines.
//!
//! A pipeline is an ordered, non-empty chain of stages fixed at
//! construction. Each stage pulls one unit of work at a time from its
//! upstream neighbor, transforms it, and buffers results for its
//! downstream neighbor; the last stage's output, once the whole chain is
//! done, becomes the pipeline's result. The orchestrator drives the chain
//! with a cooperative polling loop: priority tiers scanned highest first,
//! strict left-to-right completion cascade, one-item-at-a-time
//! backpressure, and a single error slot that surfaces any stage failure.
//!
//! - `stage` - the capability contract every pipeline element implements
//! - `queue` - the FIFO output buffer each stage owns
//! - `builder` - typed, compile-time-checked chain construction
//! - `orchestrator` - the tiered polling loop and done/backpressure rules
//! - `error` - the closed pipeline error taxonomy
//! - `tracing` - tracing initialization for embedding binaries

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod stage;
pub mod tracing;

// Re-export commonly used items
pub use builder::PipelineBuilder;
pub use error::{ErrorCode, PipelineError, StageError};
pub use orchestrator::Orchestrator;
pub use queue::OutputQueue;
pub use stage::{DoneContext, PollContext, RunContext, Stage};
pub use tracing::init_tracing;
