//! File-backed state store: one pretty-printed JSON document per execution.
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash never leaves a half-written state behind. A
//! `Mutex<()>` serialises operations within the process.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::debug;
use tempfile::NamedTempFile;

use crate::{
    BatchError,
    core::execution::{ExecutionId, ExecutionState, JobParameters},
};

use super::{ExecutionStateStore, check_new_instance, sort_newest_first};

const EXTENSION: &str = "json";

pub struct JsonFileStateStore {
    directory: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStateStore {
    /// Opens (and creates if needed) a store rooted at `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, BatchError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|error| {
            BatchError::Store(format!(
                "cannot create directory {}: {error}",
                directory.display()
            ))
        })?;
        Ok(Self {
            directory,
            lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_of(&self, execution_id: &ExecutionId) -> PathBuf {
        self.directory
            .join(format!("{}.{EXTENSION}", execution_id.as_uuid()))
    }

    fn read(&self, path: &Path) -> Result<ExecutionState, BatchError> {
        let file = File::open(path).map_err(|error| {
            BatchError::Store(format!("cannot open {}: {error}", path.display()))
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|error| {
            BatchError::Store(format!("cannot parse {}: {error}", path.display()))
        })
    }

    fn write(&self, state: &ExecutionState) -> Result<(), BatchError> {
        let target = self.path_of(&state.execution_id);
        let store_error = |error: &dyn std::fmt::Display| {
            BatchError::Store(format!("cannot write {}: {error}", target.display()))
        };

        let temp = NamedTempFile::new_in(&self.directory).map_err(|e| store_error(&e))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer_pretty(&mut writer, state).map_err(|e| store_error(&e))?;
            writer.flush().map_err(|e| store_error(&e))?;
        }
        temp.as_file().sync_all().map_err(|e| store_error(&e))?;
        temp.persist(&target).map_err(|e| store_error(&e))?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<ExecutionState>, BatchError> {
        let entries = fs::read_dir(&self.directory).map_err(|error| {
            BatchError::Store(format!(
                "cannot list {}: {error}",
                self.directory.display()
            ))
        })?;

        let mut states = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|error| BatchError::Store(error.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                states.push(self.read(&path)?);
            }
        }
        Ok(states)
    }
}

impl ExecutionStateStore for JsonFileStateStore {
    fn create(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        allow_start_if_complete: bool,
    ) -> Result<ExecutionState, BatchError> {
        let _guard = self.lock.lock()?;
        let existing = self.read_all()?;
        check_new_instance(&existing, job_name, parameters, allow_start_if_complete)?;

        let state = ExecutionState::new(ExecutionId::new(), job_name, parameters.clone());
        self.write(&state)?;
        debug!(
            "Created execution {} of job {} in {}",
            state.execution_id,
            job_name,
            self.directory.display()
        );
        Ok(state)
    }

    fn load(&self, execution_id: &ExecutionId) -> Result<ExecutionState, BatchError> {
        let _guard = self.lock.lock()?;
        let path = self.path_of(execution_id);
        if !path.exists() {
            return Err(BatchError::NoSuchExecution(*execution_id));
        }
        self.read(&path)
    }

    fn save(&self, state: &ExecutionState) -> Result<u64, BatchError> {
        let _guard = self.lock.lock()?;
        let path = self.path_of(&state.execution_id);
        if !path.exists() {
            return Err(BatchError::NoSuchExecution(state.execution_id));
        }

        let stored = self.read(&path)?;
        if stored.version != state.version {
            return Err(BatchError::StaleState {
                execution_id: state.execution_id,
                expected: state.version,
                found: stored.version,
            });
        }

        let mut next = state.clone();
        next.version += 1;
        self.write(&next)?;
        Ok(next.version)
    }

    fn find_executions(&self, job_name: &str) -> Result<Vec<ExecutionState>, BatchError> {
        let _guard = self.lock.lock()?;
        let mut found: Vec<ExecutionState> = self
            .read_all()?
            .into_iter()
            .filter(|state| state.job_name == job_name)
            .collect();
        sort_newest_first(&mut found);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::{BatchStatus, Checkpoint, JobParametersBuilder, StepExecution};

    #[test]
    fn state_survives_reopening_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let parameters = JobParametersBuilder::new().add_long("run", 1).build();

        let id = {
            let store = JsonFileStateStore::open(dir.path()).unwrap();
            let mut state = store.create("job", &parameters, false).unwrap();
            state.transition_to(BatchStatus::Started).unwrap();
            let mut step = StepExecution::new("load");
            step.read_count = 30;
            step.write_count = 30;
            step.checkpoint = Some(Checkpoint::from(30));
            state.apply_step(&step);
            state.version = store.save(&state).unwrap();
            state.execution_id
        };

        let store = JsonFileStateStore::open(dir.path()).unwrap();
        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.status, BatchStatus::Started);
        assert_eq!(loaded.last_checkpoint, Some(Checkpoint::from(30)));
        assert_eq!(loaded.version, 1);
        assert!(matches!(
            store.create("job", &parameters, false),
            Err(BatchError::AlreadyRunning(_))
        ));
    }

    #[test]
    fn stale_save_is_rejected_and_file_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::open(dir.path()).unwrap();
        let mut state = store
            .create("job", &JobParametersBuilder::new().build(), false)
            .unwrap();
        let stale = state.clone();

        state.transition_to(BatchStatus::Started).unwrap();
        store.save(&state).unwrap();

        assert!(matches!(
            store.save(&stale),
            Err(BatchError::StaleState { expected: 0, found: 1, .. })
        ));
        assert_eq!(
            store.load(&state.execution_id).unwrap().status,
            BatchStatus::Started
        );
    }

    #[test]
    fn ignores_foreign_files_and_reports_missing_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a state").unwrap();
        let store = JsonFileStateStore::open(dir.path()).unwrap();

        assert!(store.find_executions("job").unwrap().is_empty());
        let id = ExecutionId::new();
        assert_eq!(store.load(&id).unwrap_err(), BatchError::NoSuchExecution(id));
    }
}
