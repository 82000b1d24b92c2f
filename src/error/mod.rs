use std::fmt;

use thiserror::Error;

use crate::pipeline::cancel::CancelReason;

pub mod aggregate;

pub use aggregate::AggregateError;

pub type Result<T> = std::result::Result<T, Error>;

/// Part of a run that surfaced a cancellation.
///
/// The feeder and the stages wind down quietly when a run is cancelled;
/// only the terminal operation reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Phase {
    Sink,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Sink => f.write_str("sink"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Returned by a callback to drop the current item. Never reported.
    #[error("item skipped")]
    Skip,

    #[error("pipeline error: {context}")]
    Pipeline { context: &'static str },

    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{phase} interrupted: cancelled")]
    Cancelled { phase: Phase },

    #[error("{phase} interrupted: deadline exceeded")]
    DeadlineExceeded { phase: Phase },

    #[error("invalid concurrency for `{stage}`: should be at least 1, got {got}")]
    InvalidConcurrency { stage: &'static str, got: usize },

    #[error("no matching item found")]
    NotFound {
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Aggregate(AggregateError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn pipeline(context: &'static str) -> Self {
        Self::Pipeline { context }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(err))
    }

    pub fn stage(stage: &'static str, source: Error) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    pub(crate) fn interrupted(reason: CancelReason, phase: Phase) -> Self {
        match reason {
            CancelReason::Cancelled => Self::Cancelled { phase },
            CancelReason::DeadlineExceeded => Self::DeadlineExceeded { phase },
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// True for both plain cancellation and an expired deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }
}
