//! Retry and skip decisions for item-level failures.
//!
//! The policy is a pure function of its configuration and of the counters the
//! orchestrator passes in; it keeps no state of its own.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Re-run the failed operation in place.
    Retryable,
    /// Drop the offending item and count it.
    Skippable,
    /// Abort the step.
    Fatal,
}

/// Transient bookkeeping for one item while it is being retried.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Read ordinal of the item within the step.
    pub item: u64,
    /// Number of failed attempts so far.
    pub attempt_count: usize,
    pub last_error: Option<BatchError>,
}

impl RetryContext {
    pub fn new(item: u64) -> Self {
        Self {
            item,
            attempt_count: 0,
            last_error: None,
        }
    }

    pub fn record_failure(&mut self, error: BatchError) {
        self.attempt_count += 1;
        self.last_error = Some(error);
    }
}

/// Fault tolerance configuration of a step.
///
/// Error kinds are matched against [`BatchError::kind`]. A kind listed in
/// `fatal` always aborts; otherwise `retryable` is checked before `skippable`.
/// Unlisted kinds and engine errors are fatal.
///
/// ```
/// use chunk_batch::core::policy::{ErrorClass, FaultTolerancePolicy};
/// use chunk_batch::BatchError;
///
/// let policy = FaultTolerancePolicy::new()
///     .retry_limit(3)
///     .skip_limit(10)
///     .retry_on("timeout")
///     .skip_on("parse");
///
/// assert_eq!(policy.classify(&BatchError::transform("timeout", "slow")), ErrorClass::Retryable);
/// assert_eq!(policy.classify(&BatchError::transform("parse", "bad")), ErrorClass::Skippable);
/// assert_eq!(policy.classify(&BatchError::transform("oom", "boom")), ErrorClass::Fatal);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultTolerancePolicy {
    pub max_retries: usize,
    pub max_skips: usize,
    pub retryable: BTreeSet<String>,
    pub skippable: BTreeSet<String>,
    pub fatal: BTreeSet<String>,
}

impl FaultTolerancePolicy {
    /// A policy that neither retries nor skips.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_limit(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn skip_limit(mut self, max_skips: usize) -> Self {
        self.max_skips = max_skips;
        self
    }

    pub fn retry_on(mut self, kind: &str) -> Self {
        self.retryable.insert(kind.to_string());
        self
    }

    pub fn skip_on(mut self, kind: &str) -> Self {
        self.skippable.insert(kind.to_string());
        self
    }

    pub fn fatal_on(mut self, kind: &str) -> Self {
        self.fatal.insert(kind.to_string());
        self
    }

    pub fn classify(&self, error: &BatchError) -> ErrorClass {
        match error.kind() {
            None => ErrorClass::Fatal,
            Some(kind) if self.fatal.contains(kind) => ErrorClass::Fatal,
            Some(kind) if self.retryable.contains(kind) => ErrorClass::Retryable,
            Some(kind) if self.skippable.contains(kind) => ErrorClass::Skippable,
            Some(_) => ErrorClass::Fatal,
        }
    }

    /// Classification once retries are exhausted: skip if the kind is also
    /// skippable, abort otherwise.
    pub fn escalate(&self, error: &BatchError) -> ErrorClass {
        match error.kind() {
            Some(kind) if !self.fatal.contains(kind) && self.skippable.contains(kind) => {
                ErrorClass::Skippable
            }
            _ => ErrorClass::Fatal,
        }
    }

    pub fn should_retry(&self, context: &RetryContext) -> bool {
        context.attempt_count <= self.max_retries
    }

    /// `skips_so_far` is the step's cumulative skip count before this skip.
    pub fn should_skip(&self, skips_so_far: u64) -> bool {
        skips_so_far < self.max_skips as u64
    }
}

/// Serializable step settings, e.g. read from a JSON job description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSettings {
    pub chunk_size: usize,
    #[serde(default)]
    pub policy: FaultTolerancePolicy,
}
