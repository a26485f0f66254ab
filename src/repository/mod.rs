//! Durable storage of [`ExecutionState`] records.
//!
//! [`ExecutionStateStore`] is the only seam between the engine and persistence.
//! Two implementations are bundled: [`in_memory::InMemoryStateStore`] for tests
//! and embedded use, and `json_file::JsonFileStateStore` (feature `json`) which
//! keeps one JSON document per execution on disk.

use crate::{
    BatchError,
    core::execution::{BatchStatus, ExecutionId, ExecutionState, JobParameters},
};

pub mod in_memory;

#[cfg(feature = "json")]
pub mod json_file;

/// Storage contract for job execution state.
///
/// Implementations must be `Send + Sync` and make each call atomic: a reader
/// never observes a partially written state.
pub trait ExecutionStateStore: Send + Sync {
    /// Registers a new execution in status `Starting` for the given job instance.
    ///
    /// # Errors
    ///
    /// Fails when another execution of the same job name and job key is running
    /// ([`BatchError::AlreadyRunning`]), is restartable
    /// ([`BatchError::RestartRequired`]), or is complete or abandoned and a new
    /// run is not allowed ([`BatchError::DuplicateInstance`]).
    fn create(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        allow_start_if_complete: bool,
    ) -> Result<ExecutionState, BatchError>;

    /// # Errors
    ///
    /// [`BatchError::NoSuchExecution`] when the id is unknown.
    fn load(&self, execution_id: &ExecutionId) -> Result<ExecutionState, BatchError>;

    /// Replaces the stored state if its version still equals `state.version`.
    ///
    /// Returns the new version, which the caller must carry into its next save.
    ///
    /// # Errors
    ///
    /// [`BatchError::StaleState`] when the stored version moved on.
    fn save(&self, state: &ExecutionState) -> Result<u64, BatchError>;

    /// All executions of a job, newest first.
    fn find_executions(&self, job_name: &str) -> Result<Vec<ExecutionState>, BatchError>;

    /// Most recent execution of a job instance, if any.
    fn find_last_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<ExecutionState>, BatchError> {
        let job_key = parameters.job_key();
        Ok(self
            .find_executions(job_name)?
            .into_iter()
            .find(|state| state.job_key() == job_key))
    }
}

/// Checks that a new execution of `job_name` / `parameters` may be created next
/// to the `existing` ones.
pub(crate) fn check_new_instance<'s>(
    existing: impl IntoIterator<Item = &'s ExecutionState>,
    job_name: &str,
    parameters: &JobParameters,
    allow_start_if_complete: bool,
) -> Result<(), BatchError> {
    let job_key = parameters.job_key();
    let duplicate = || BatchError::DuplicateInstance {
        job_name: job_name.to_string(),
        job_key: job_key.clone(),
    };

    for state in existing
        .into_iter()
        .filter(|state| state.job_name == job_name && state.job_key() == job_key)
    {
        match state.status {
            BatchStatus::Starting | BatchStatus::Started => {
                return Err(BatchError::AlreadyRunning(state.execution_id));
            }
            BatchStatus::Failed | BatchStatus::Stopped => {
                return Err(BatchError::RestartRequired {
                    execution_id: state.execution_id,
                });
            }
            BatchStatus::Abandoned => return Err(duplicate()),
            BatchStatus::Completed if !allow_start_if_complete => return Err(duplicate()),
            BatchStatus::Completed => {}
        }
    }
    Ok(())
}

/// Newest first, by creation time.
pub(crate) fn sort_newest_first(states: &mut [ExecutionState]) {
    states.sort_by(|a, b| b.create_time.cmp(&a.create_time));
}
