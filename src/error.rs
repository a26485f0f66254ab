use std::fmt;

use thiserror::Error;

use crate::core::execution::{BatchStatus, Checkpoint, ExecutionId};

/// A failure raised by a source, transformer or sink for a single operation.
///
/// `kind` is the label the [`FaultTolerancePolicy`](crate::core::policy::FaultTolerancePolicy)
/// classifies on (for example `"timeout"`, `"parse"` or `"constraint"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub kind: String,
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    #[error("ItemSource from: {0}")]
    Source(ItemFailure),

    #[error("ItemTransformer from: {0}")]
    Transform(ItemFailure),

    #[error("ItemSink from: {0}")]
    Sink(ItemFailure),

    /// A retry or skip limit was exceeded.
    #[error("Policy violation: {message} (limit: {limit})")]
    PolicyViolation { limit: usize, message: String },

    #[error("Job instance already exists and is complete: {job_name} ({job_key})")]
    DuplicateInstance { job_name: String, job_key: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: BatchStatus, to: BatchStatus },

    #[error("Job execution {0} is already running")]
    AlreadyRunning(ExecutionId),

    #[error("Job execution {execution_id} is restartable, use restart instead of launch")]
    RestartRequired { execution_id: ExecutionId },

    #[error("Job parameters do not match execution {execution_id}")]
    ParametersMismatch { execution_id: ExecutionId },

    #[error("No job execution with id {0}")]
    NoSuchExecution(ExecutionId),

    /// Optimistic lock failure: the stored execution changed since it was loaded.
    #[error("Job execution {execution_id} was updated concurrently (expected version {expected}, found {found})")]
    StaleState {
        execution_id: ExecutionId,
        expected: u64,
        found: u64,
    },

    #[error("Execution store: {0}")]
    Store(String),

    #[error("Configuration: {0}")]
    Configuration(String),

    /// A step aborted. `item` is the read ordinal of the offending item when known.
    #[error("Step {step} failed{}: {cause}", .item.map(|i| format!(" at item {i}")).unwrap_or_default())]
    StepFailed {
        step: String,
        item: Option<u64>,
        cause: Box<BatchError>,
    },

    #[error("Job execution {execution_id} failed in step {step} (last checkpoint: {}): {cause}",
        .checkpoint.as_ref().map(ToString::to_string).unwrap_or_else(|| "none".to_string()))]
    JobFailed {
        execution_id: ExecutionId,
        step: String,
        checkpoint: Option<Checkpoint>,
        cause: Box<BatchError>,
    },
}

impl BatchError {
    pub fn source(kind: impl Into<String>, message: impl Into<String>) -> Self {
        BatchError::Source(ItemFailure::new(kind, message))
    }

    pub fn transform(kind: impl Into<String>, message: impl Into<String>) -> Self {
        BatchError::Transform(ItemFailure::new(kind, message))
    }

    pub fn sink(kind: impl Into<String>, message: impl Into<String>) -> Self {
        BatchError::Sink(ItemFailure::new(kind, message))
    }

    /// Kind of an item-level failure, `None` for engine errors which are never
    /// retried or skipped.
    pub fn kind(&self) -> Option<&str> {
        match self {
            BatchError::Source(failure)
            | BatchError::Transform(failure)
            | BatchError::Sink(failure) => Some(failure.kind.as_str()),
            _ => None,
        }
    }

    /// Innermost cause, unwrapping step and job failure envelopes.
    pub fn root_cause(&self) -> &BatchError {
        match self {
            BatchError::StepFailed { cause, .. } | BatchError::JobFailed { cause, .. } => {
                cause.root_cause()
            }
            other => other,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for BatchError {
    fn from(error: std::sync::PoisonError<T>) -> Self {
        BatchError::Store(format!("lock poisoned: {error}"))
    }
}
