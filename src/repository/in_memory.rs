//! Process-local state store.
//!
//! Uses a single `Mutex<HashMap>` so `create` can check and insert atomically.

use std::{collections::HashMap, sync::Mutex};

use log::debug;

use crate::{
    BatchError,
    core::execution::{ExecutionId, ExecutionState, JobParameters},
};

use super::{ExecutionStateStore, check_new_instance, sort_newest_first};

#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<ExecutionId, ExecutionState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions.
    pub fn len(&self) -> Result<usize, BatchError> {
        Ok(self.states.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, BatchError> {
        Ok(self.len()? == 0)
    }
}

impl ExecutionStateStore for InMemoryStateStore {
    fn create(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        allow_start_if_complete: bool,
    ) -> Result<ExecutionState, BatchError> {
        let mut states = self.states.lock()?;
        check_new_instance(states.values(), job_name, parameters, allow_start_if_complete)?;

        let state = ExecutionState::new(ExecutionId::new(), job_name, parameters.clone());
        debug!("Created execution {} of job {}", state.execution_id, job_name);
        states.insert(state.execution_id, state.clone());
        Ok(state)
    }

    fn load(&self, execution_id: &ExecutionId) -> Result<ExecutionState, BatchError> {
        self.states
            .lock()?
            .get(execution_id)
            .cloned()
            .ok_or(BatchError::NoSuchExecution(*execution_id))
    }

    fn save(&self, state: &ExecutionState) -> Result<u64, BatchError> {
        let mut states = self.states.lock()?;
        let stored = states
            .get_mut(&state.execution_id)
            .ok_or(BatchError::NoSuchExecution(state.execution_id))?;

        if stored.version != state.version {
            return Err(BatchError::StaleState {
                execution_id: state.execution_id,
                expected: state.version,
                found: stored.version,
            });
        }

        let mut next = state.clone();
        next.version += 1;
        *stored = next;
        Ok(stored.version)
    }

    fn find_executions(&self, job_name: &str) -> Result<Vec<ExecutionState>, BatchError> {
        let mut found: Vec<ExecutionState> = self
            .states
            .lock()?
            .values()
            .filter(|state| state.job_name == job_name)
            .cloned()
            .collect();
        sort_newest_first(&mut found);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::{BatchStatus, JobParametersBuilder};

    #[test]
    fn save_bumps_version_and_rejects_stale_writes() {
        let store = InMemoryStateStore::new();
        let parameters = JobParametersBuilder::new().add_long("run", 1).build();
        let mut state = store.create("job", &parameters, false).unwrap();
        assert_eq!(state.version, 0);

        let stale = state.clone();
        state.transition_to(BatchStatus::Started).unwrap();
        state.version = store.save(&state).unwrap();
        assert_eq!(state.version, 1);

        let error = store.save(&stale).unwrap_err();
        assert_eq!(
            error,
            BatchError::StaleState {
                execution_id: state.execution_id,
                expected: 0,
                found: 1
            }
        );

        let loaded = store.load(&state.execution_id).unwrap();
        assert_eq!(loaded.status, BatchStatus::Started);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn create_refuses_a_second_running_instance() {
        let store = InMemoryStateStore::new();
        let parameters = JobParametersBuilder::new().add_string("file", "a.csv").build();
        let first = store.create("job", &parameters, false).unwrap();

        let error = store.create("job", &parameters, false).unwrap_err();
        assert_eq!(error, BatchError::AlreadyRunning(first.execution_id));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn load_unknown_execution_fails() {
        let store = InMemoryStateStore::new();
        let id = ExecutionId::new();
        assert_eq!(store.load(&id).unwrap_err(), BatchError::NoSuchExecution(id));
    }

    #[test]
    fn find_executions_filters_by_job_name() {
        let store = InMemoryStateStore::new();
        let first = JobParametersBuilder::new().add_long("run", 1).build();
        let second = JobParametersBuilder::new().add_long("run", 2).build();
        store.create("job", &first, false).unwrap();
        store.create("job", &second, false).unwrap();
        store.create("other", &first, false).unwrap();

        assert_eq!(store.find_executions("job").unwrap().len(), 2);
        let last = store.find_last_execution("job", &second).unwrap().unwrap();
        assert_eq!(last.parameters, second);
    }
}
