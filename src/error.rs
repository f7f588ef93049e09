//! Error types for the pipeline engine.
//!
//! Every failure the engine can surface is a [`PipelineError`]. Callers
//! branch on [`PipelineError::code`] to distinguish causes; the underlying
//! stage error (when there is one) is available through `Error::source`.

use std::fmt;

/// A boxed error produced by a stage's `run`.
///
/// Stages return whatever error type suits them; the engine only needs to
/// carry it to the caller as the cause of a [`PipelineError::ComponentFailed`].
pub type StageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Machine-readable discriminant for [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `run` was invoked more than once on a single orchestrator.
    PipelineStartedTwice,
    /// A stage's `run` returned an error, rejected asynchronously, or panicked.
    ComponentFailed,
    /// `give` was invoked on a stage whose queue was empty.
    ComponentDoneWithNothingToGive,
}

impl ErrorCode {
    /// The wire-style code string for this error.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStartedTwice => "PIPELINE_STARTED_TWICE",
            Self::ComponentFailed => "COMPONENT_FAILED",
            Self::ComponentDoneWithNothingToGive => "COMPONENT_DONE_WITH_NOTHING_TO_GIVE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure conditions raised by the pipeline engine.
///
/// The taxonomy is closed: all failures are terminal for the run. There is
/// no retry or partial recovery; the only local handling is the best-effort
/// `on_pipeline_error` broadcast before the run rejects.
#[derive(Debug)]
pub enum PipelineError {
    /// The pipeline has already been started.
    ///
    /// User misuse; raised immediately, with no stage interaction.
    StartedTwice,

    /// The stage at `index` failed.
    ///
    /// Covers synchronous errors, asynchronous rejections, and caught
    /// panics alike.
    ComponentFailed {
        /// Chain index of the failing stage.
        index: usize,
        /// The stage's own error.
        cause: StageError,
    },

    /// The stage at `index` was asked to give with an empty queue.
    ///
    /// A programming-contract violation (a stage declared itself runnable
    /// or done without honoring its upstream gate), not a normal runtime
    /// state. Fix the offending stage rather than retrying.
    NothingToGive {
        /// Chain index of the stage that had nothing to give.
        index: usize,
    },
}

impl PipelineError {
    /// Create a `ComponentFailed` error from any stage error type.
    pub fn component_failed<E>(index: usize, cause: E) -> Self
    where
        E: Into<StageError>,
    {
        Self::ComponentFailed {
            index,
            cause: cause.into(),
        }
    }

    /// The machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::StartedTwice => ErrorCode::PipelineStartedTwice,
            Self::ComponentFailed { .. } => ErrorCode::ComponentFailed,
            Self::NothingToGive { .. } => ErrorCode::ComponentDoneWithNothingToGive,
        }
    }

    /// Chain index of the stage involved, if the error concerns one.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::StartedTwice => None,
            Self::ComponentFailed { index, .. } | Self::NothingToGive { index } => Some(*index),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartedTwice => write!(f, "pipeline has already been started"),
            Self::ComponentFailed { index, cause } => {
                write!(f, "stage {} failed: {}", index, cause)
            }
            Self::NothingToGive { index } => {
                write!(f, "stage {} is done with nothing to give", index)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ComponentFailed { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PipelineError::StartedTwice.code().as_str(),
            "PIPELINE_STARTED_TWICE"
        );
        assert_eq!(
            PipelineError::component_failed(1, "boom").code().as_str(),
            "COMPONENT_FAILED"
        );
        assert_eq!(
            PipelineError::NothingToGive { index: 0 }.code().as_str(),
            "COMPONENT_DONE_WITH_NOTHING_TO_GIVE"
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", PipelineError::StartedTwice),
            "pipeline has already been started"
        );
        assert_eq!(
            format!("{}", PipelineError::component_failed(2, "boom")),
            "stage 2 failed: boom"
        );
        assert_eq!(
            format!("{}", PipelineError::NothingToGive { index: 1 }),
            "stage 1 is done with nothing to give"
        );
    }

    #[test]
    fn test_stage_index() {
        assert_eq!(PipelineError::StartedTwice.stage_index(), None);
        assert_eq!(
            PipelineError::component_failed(3, "boom").stage_index(),
            Some(3)
        );
        assert_eq!(
            PipelineError::NothingToGive { index: 1 }.stage_index(),
            Some(1)
        );
    }

    #[test]
    fn test_component_failed_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = PipelineError::component_failed(0, io_err);
        let source = err.source().expect("cause should be exposed as source");
        assert!(source.to_string().contains("file not found"));
    }
}
