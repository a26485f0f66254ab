#![allow(dead_code)]

mod mocks;

use std::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

pub use mocks::*;

use chunk_batch::{
    BatchError,
    core::{
        execution::{
            ExecutionId, ExecutionState, JobParameters, JobParametersBuilder, StepExecution,
        },
        item::{ItemTransformer, ItemTransformerResult},
    },
    repository::{ExecutionStateStore, in_memory::InMemoryStateStore},
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn numbers(n: u32) -> Vec<u32> {
    (1..=n).collect()
}

/// Committer that persists nothing.
pub fn discard(_: &StepExecution) -> Result<(), BatchError> {
    Ok(())
}

pub fn run(run: i64) -> JobParameters {
    JobParametersBuilder::new().add_long("run", run).build()
}

/// Transformer failing on selected items with a given error kind.
///
/// `times` bounds how many failures each selected item produces; `None` fails
/// forever.
pub struct FaultyTransformer {
    failing: Vec<u32>,
    kind: &'static str,
    times: Option<usize>,
    failures: Cell<usize>,
    filtered: Vec<u32>,
}

impl FaultyTransformer {
    pub fn new(failing: Vec<u32>, kind: &'static str) -> Self {
        Self {
            failing,
            kind,
            times: None,
            failures: Cell::new(0),
            filtered: Vec::new(),
        }
    }

    pub fn times(mut self, times: usize) -> Self {
        self.times = Some(times);
        self
    }

    pub fn filtering(mut self, filtered: Vec<u32>) -> Self {
        self.filtered = filtered;
        self
    }

    pub fn failures(&self) -> usize {
        self.failures.get()
    }
}

impl ItemTransformer<u32, u32> for FaultyTransformer {
    fn transform(&self, item: &u32) -> ItemTransformerResult<u32> {
        if self.failing.contains(item)
            && self.times.is_none_or(|times| self.failures.get() < times)
        {
            self.failures.set(self.failures.get() + 1);
            return Err(BatchError::transform(self.kind, format!("item {item}")));
        }
        if self.filtered.contains(item) {
            return Ok(None);
        }
        Ok(Some(*item))
    }
}

/// State store that stops persisting after a number of saves, as if the
/// process had died.
pub struct CrashingStore {
    inner: InMemoryStateStore,
    saves_left: AtomicUsize,
}

impl CrashingStore {
    pub fn new(saves: usize) -> Self {
        Self {
            inner: InMemoryStateStore::new(),
            saves_left: AtomicUsize::new(saves),
        }
    }

    pub fn inner(&self) -> &InMemoryStateStore {
        &self.inner
    }
}

impl ExecutionStateStore for CrashingStore {
    fn create(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        allow_start_if_complete: bool,
    ) -> Result<ExecutionState, BatchError> {
        self.inner
            .create(job_name, parameters, allow_start_if_complete)
    }

    fn load(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionState, BatchError> {
        self.inner.load(execution_id)
    }

    fn save(&self, state: &ExecutionState) -> Result<u64, BatchError> {
        let left = self.saves_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(BatchError::Store("process killed".to_string()));
        }
        self.saves_left.store(left - 1, Ordering::SeqCst);
        self.inner.save(state)
    }

    fn find_executions(&self, job_name: &str) -> Result<Vec<ExecutionState>, BatchError> {
        self.inner.find_executions(job_name)
    }
}
