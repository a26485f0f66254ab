use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use log::{error, info, warn};

use crate::{BatchError, repository::ExecutionStateStore};

use super::{
    build_name,
    execution::{BatchStatus, ExecutionId, ExecutionState, JobParameters, StepExecution},
    step::{ChunkCommitter, Step, StopSignal},
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// An ordered sequence of steps sharing one execution state.
///
/// Step names must be unique within a job: they key the per-step progress that a
/// restart resumes from.
pub struct Job<'a> {
    name: String,
    steps: Vec<&'a dyn Step>,
    allow_start_if_complete: bool,
}

impl Job<'_> {
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.get_name())
    }

    pub fn allows_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }
}

/// Builder for creating a [`Job`].
///
/// ```
/// use chunk_batch::core::job::JobBuilder;
/// use chunk_batch::core::step::StepBuilder;
/// use chunk_batch::item::memory::{InMemoryItemSink, VecItemSource};
///
/// let source = VecItemSource::new(vec!["a".to_string(), "b".to_string()]);
/// let sink = InMemoryItemSink::new();
/// let step = StepBuilder::new("copy")
///     .source(&source)
///     .pass_through()
///     .sink(&sink)
///     .build()
///     .unwrap();
///
/// let job = JobBuilder::new().name("import").start(&step).build().unwrap();
/// assert_eq!(job.get_name(), "import");
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    name: Option<String>,
    steps: Vec<&'a dyn Step>,
    allow_start_if_complete: bool,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> JobBuilder<'a> {
        self.name = Some(name.to_string());
        self
    }

    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Lets an instance whose last execution completed be launched again.
    pub fn allow_start_if_complete(mut self, allow: bool) -> JobBuilder<'a> {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn build(self) -> JobResult<Job<'a>> {
        let name = self.name.unwrap_or_else(build_name);

        if self.steps.is_empty() {
            return Err(BatchError::Configuration(format!("job {name} has no step")));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = self
            .steps
            .iter()
            .map(|step| step.get_name())
            .find(|step_name| !seen.insert(*step_name))
        {
            return Err(BatchError::Configuration(format!(
                "job {name} declares step {duplicate} twice"
            )));
        }

        Ok(Job {
            name,
            steps: self.steps,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}

/// Folds committed step views into the execution state and saves it.
struct StateCommitter<'c> {
    store: &'c dyn ExecutionStateStore,
    state: &'c RefCell<ExecutionState>,
}

impl StateCommitter<'_> {
    fn save(&self, update: impl FnOnce(&mut ExecutionState) -> JobResult<()>) -> JobResult<()> {
        let mut next = self.state.borrow().clone();
        update(&mut next)?;
        next.version = self.store.save(&next)?;
        *self.state.borrow_mut() = next;
        Ok(())
    }
}

impl ChunkCommitter for StateCommitter<'_> {
    fn commit_chunk(&self, step: &StepExecution) -> Result<(), BatchError> {
        self.save(|state| {
            state.apply_step(step);
            Ok(())
        })
    }
}

/// Launches, restarts and manages job executions.
///
/// The controller is the only writer of an [`ExecutionState`] while its job
/// runs. It is `Sync`: `stop` may be called from another thread than the one
/// running `launch` or `restart`.
pub struct JobController<'a> {
    store: &'a dyn ExecutionStateStore,
    signals: Mutex<HashMap<ExecutionId, StopSignal>>,
}

impl<'a> JobController<'a> {
    pub fn new(store: &'a dyn ExecutionStateStore) -> Self {
        Self {
            store,
            signals: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &dyn ExecutionStateStore {
        self.store
    }

    /// Starts a new execution of `job`.
    ///
    /// # Returns
    /// - `Ok` with the final state, `Completed` or `Stopped`.
    /// - `Err(BatchError::JobFailed)` when a step failed; the failed state is
    ///   saved and can be restarted.
    /// - The store's error when the instance cannot be launched
    ///   (`DuplicateInstance`, `RestartRequired`, `AlreadyRunning`).
    pub fn launch(&self, job: &Job, parameters: JobParameters) -> JobResult<ExecutionState> {
        let state = self
            .store
            .create(&job.name, &parameters, job.allow_start_if_complete)?;
        info!(
            "Launching job: {}, execution: {}",
            job.name, state.execution_id
        );
        self.run(job, state)
    }

    /// Resumes a `Failed` or `Stopped` execution.
    ///
    /// Completed steps are not run again; the interrupted step continues from its
    /// last checkpoint.
    pub fn restart(
        &self,
        job: &Job,
        execution_id: &ExecutionId,
        parameters: JobParameters,
    ) -> JobResult<ExecutionState> {
        let state = self.store.load(execution_id)?;

        if state.job_name != job.name || state.job_key() != parameters.job_key() {
            return Err(BatchError::ParametersMismatch {
                execution_id: *execution_id,
            });
        }
        if !state.status.is_restartable() {
            return Err(BatchError::InvalidStateTransition {
                from: state.status,
                to: BatchStatus::Started,
            });
        }

        info!(
            "Restarting job: {}, execution: {}, from status {} (last checkpoint: {})",
            job.name,
            execution_id,
            state.status,
            state
                .last_checkpoint
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "none".to_string())
        );
        self.run(job, state)
    }

    /// Requests a cooperative stop.
    ///
    /// An execution running in this controller stops at its next chunk boundary.
    /// An execution left `Starting` or `Started` by another controller is marked
    /// `Stopped` in the store.
    pub fn stop(&self, execution_id: &ExecutionId) -> JobResult<()> {
        if let Some(signal) = self.signals.lock()?.get(execution_id) {
            info!("Stop requested for execution {}", execution_id);
            signal.stop();
            return Ok(());
        }
        self.mark(execution_id, BatchStatus::Stopped)
    }

    /// Marks an execution as never to be restarted.
    pub fn abandon(&self, execution_id: &ExecutionId) -> JobResult<()> {
        if self.signals.lock()?.contains_key(execution_id) {
            return Err(BatchError::AlreadyRunning(*execution_id));
        }
        self.mark(execution_id, BatchStatus::Abandoned)
    }

    /// Marks an execution left running by a dead process as `Failed`, making it
    /// restartable.
    pub fn recover(&self, execution_id: &ExecutionId) -> JobResult<()> {
        if self.signals.lock()?.contains_key(execution_id) {
            return Err(BatchError::AlreadyRunning(*execution_id));
        }
        let state = self.store.load(execution_id)?;
        if !state.status.is_running() {
            return Err(BatchError::InvalidStateTransition {
                from: state.status,
                to: BatchStatus::Failed,
            });
        }
        self.mark(execution_id, BatchStatus::Failed)
    }

    fn mark(&self, execution_id: &ExecutionId, status: BatchStatus) -> JobResult<()> {
        let mut state = self.store.load(execution_id)?;
        state.transition_to(status)?;
        self.store.save(&state)?;
        info!("Execution {} marked {}", execution_id, status);
        Ok(())
    }

    fn run(&self, job: &Job, state: ExecutionState) -> JobResult<ExecutionState> {
        let execution_id = state.execution_id;
        let stop = StopSignal::new();
        self.signals.lock()?.insert(execution_id, stop.clone());

        let result = self.run_steps(job, state, &stop);

        match self.signals.lock() {
            Ok(mut signals) => {
                signals.remove(&execution_id);
            }
            Err(poisoned) => warn!(
                "Unable to unregister execution {}: {}",
                execution_id, poisoned
            ),
        }
        result
    }

    fn run_steps(
        &self,
        job: &Job,
        initial: ExecutionState,
        stop: &StopSignal,
    ) -> JobResult<ExecutionState> {
        let state = RefCell::new(initial);
        let committer = StateCommitter {
            store: self.store,
            state: &state,
        };

        committer.save(|state| state.transition_to(BatchStatus::Started))?;
        info!(
            "Start of job: {}, execution: {}",
            job.name,
            state.borrow().execution_id
        );

        for step in &job.steps {
            let name = step.get_name();

            if stop.is_stopped() {
                break;
            }

            let previous = state.borrow().step(name).cloned();
            let initial = match previous {
                Some(previous) if previous.status == BatchStatus::Completed => {
                    info!("Step {} already completed, not run again", name);
                    continue;
                }
                Some(previous) => previous,
                None => StepExecution::new(name),
            };

            match step.execute(initial, &committer, stop) {
                Ok(view) => {
                    let stopped = view.status == BatchStatus::Stopped;
                    committer.commit_chunk(&view)?;
                    if stopped {
                        break;
                    }
                }
                Err(failure) => {
                    return Err(self.fail(job, &committer, failure.execution, failure.error));
                }
            }
        }

        let final_status = if stop.is_stopped() {
            BatchStatus::Stopped
        } else {
            BatchStatus::Completed
        };
        committer.save(|state| state.transition_to(final_status))?;

        let state = state.into_inner();
        info!(
            "End of job: {}, execution: {}, status: {}, read: {}, written: {}, skipped: {}",
            job.name,
            state.execution_id,
            state.status,
            state.read_count,
            state.write_count,
            state.skip_count
        );
        Ok(state)
    }

    /// Saves the failed step view and the `Failed` job status, then builds the
    /// error returned to the caller.
    fn fail(
        &self,
        job: &Job,
        committer: &StateCommitter,
        step: StepExecution,
        cause: BatchError,
    ) -> BatchError {
        let step_name = step.name.clone();
        let saved = committer.save(|state| {
            state.apply_step(&step);
            state.transition_to(BatchStatus::Failed)?;
            state.exit_message = Some(cause.to_string());
            Ok(())
        });
        if let Err(save_error) = saved {
            error!(
                "Unable to save failed state of job {}: {}",
                job.name, save_error
            );
        }

        let state = committer.state.borrow();
        let error = BatchError::JobFailed {
            execution_id: state.execution_id,
            step: step_name,
            checkpoint: state.last_checkpoint.clone(),
            cause: Box::new(cause),
        };
        error!("{}", error);
        error
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{
        core::{
            execution::{Checkpoint, JobParametersBuilder},
            item::{FnTransformer, ItemTransformerResult},
            step::StepBuilder,
        },
        item::memory::{InMemoryItemSink, VecItemSource},
        repository::in_memory::InMemoryStateStore,
    };

    fn numbers(n: u32) -> Vec<u32> {
        (1..=n).collect()
    }

    fn run_parameters(run: i64) -> JobParameters {
        JobParametersBuilder::new().add_long("run", run).build()
    }

    #[test]
    fn launch_completes_and_persists_each_chunk() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);
        let source = VecItemSource::new(numbers(10));
        let sink = InMemoryItemSink::new();
        let step = StepBuilder::new("copy")
            .source(&source)
            .pass_through()
            .sink(&sink)
            .chunk(3)
            .build()
            .unwrap();
        let job = JobBuilder::new().name("job").start(&step).build().unwrap();

        let state = controller.launch(&job, run_parameters(1)).unwrap();

        assert_eq!(state.status, BatchStatus::Completed);
        assert_eq!(state.read_count, 10);
        assert_eq!(state.write_count, 10);
        assert_eq!(state.last_checkpoint, Some(Checkpoint::from(10)));
        // Started + 4 chunks + step end + Completed.
        assert_eq!(state.version, 7);
        assert_eq!(store.load(&state.execution_id).unwrap(), state);
    }

    #[test]
    fn completed_instance_cannot_be_launched_twice() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);
        let source = VecItemSource::new(numbers(2));
        let sink = InMemoryItemSink::new();
        let step = StepBuilder::new("copy")
            .source(&source)
            .pass_through()
            .sink(&sink)
            .build()
            .unwrap();
        let job = JobBuilder::new().name("job").start(&step).build().unwrap();

        controller.launch(&job, run_parameters(1)).unwrap();
        let error = controller.launch(&job, run_parameters(1)).unwrap_err();
        assert!(matches!(error, BatchError::DuplicateInstance { .. }));

        let relaunch = JobBuilder::new()
            .name("job")
            .start(&step)
            .allow_start_if_complete(true)
            .build()
            .unwrap();
        assert!(controller.launch(&relaunch, run_parameters(1)).is_ok());
    }

    #[test]
    fn failed_execution_restarts_from_checkpoint() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);
        let source = VecItemSource::new(numbers(10));
        let sink = InMemoryItemSink::new();
        let armed = Cell::new(true);
        let fails_once_on_seven = FnTransformer::new(|item: &u32| -> ItemTransformerResult<u32> {
            if *item == 7 && armed.replace(false) {
                return Err(BatchError::transform("crash", "boom"));
            }
            Ok(Some(*item))
        });
        let step = StepBuilder::new("copy")
            .source(&source)
            .transformer(&fails_once_on_seven)
            .sink(&sink)
            .chunk(3)
            .build()
            .unwrap();
        let job = JobBuilder::new().name("job").start(&step).build().unwrap();

        let Err(BatchError::JobFailed {
            execution_id,
            checkpoint,
            ..
        }) = controller.launch(&job, run_parameters(1))
        else {
            panic!("job should fail on item 7");
        };
        assert_eq!(checkpoint, Some(Checkpoint::from(6)));
        let failed = store.load(&execution_id).unwrap();
        assert_eq!(failed.status, BatchStatus::Failed);
        assert_eq!(failed.write_count, 6);

        assert!(matches!(
            controller.launch(&job, run_parameters(1)),
            Err(BatchError::RestartRequired { .. })
        ));
        assert!(matches!(
            controller.restart(&job, &execution_id, run_parameters(2)),
            Err(BatchError::ParametersMismatch { .. })
        ));

        let state = controller
            .restart(&job, &execution_id, run_parameters(1))
            .unwrap();
        assert_eq!(state.status, BatchStatus::Completed);
        assert_eq!(state.write_count, 10);
        assert_eq!(sink.items(), numbers(10));
    }

    #[test]
    fn completed_steps_are_not_rerun_on_restart() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);

        let first_source = VecItemSource::new(numbers(4));
        let first_sink = InMemoryItemSink::new();
        let first = StepBuilder::new("first")
            .source(&first_source)
            .pass_through()
            .sink(&first_sink)
            .build()
            .unwrap();

        let second_source = VecItemSource::new(numbers(4));
        let second_sink = InMemoryItemSink::new();
        let armed = Cell::new(true);
        let fails_once = FnTransformer::new(|item: &u32| -> ItemTransformerResult<u32> {
            if armed.replace(false) {
                return Err(BatchError::transform("crash", "boom"));
            }
            Ok(Some(*item))
        });
        let second = StepBuilder::new("second")
            .source(&second_source)
            .transformer(&fails_once)
            .sink(&second_sink)
            .build()
            .unwrap();

        let job = JobBuilder::new()
            .name("two-steps")
            .start(&first)
            .next(&second)
            .build()
            .unwrap();

        let Err(BatchError::JobFailed { execution_id, step, .. }) =
            controller.launch(&job, JobParameters::new())
        else {
            panic!("second step should fail");
        };
        assert_eq!(step, "second");

        let state = controller
            .restart(&job, &execution_id, JobParameters::new())
            .unwrap();
        assert_eq!(state.status, BatchStatus::Completed);
        assert_eq!(first_sink.items(), numbers(4));
        assert_eq!(second_sink.items(), numbers(4));
        assert_eq!(state.read_count, 8);
    }

    #[test]
    fn stop_ends_the_run_at_a_chunk_boundary() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);
        let source = VecItemSource::new(numbers(10));
        let sink = InMemoryItemSink::new();
        let stop_on_five = FnTransformer::new(|item: &u32| -> ItemTransformerResult<u32> {
            if *item == 5 {
                let running = store.find_executions("job")?;
                controller.stop(&running[0].execution_id)?;
            }
            Ok(Some(*item))
        });
        let step = StepBuilder::new("copy")
            .source(&source)
            .transformer(&stop_on_five)
            .sink(&sink)
            .chunk(3)
            .build()
            .unwrap();
        let job = JobBuilder::new().name("job").start(&step).build().unwrap();

        let state = controller.launch(&job, run_parameters(1)).unwrap();
        assert_eq!(state.status, BatchStatus::Stopped);
        assert_eq!(state.write_count, 6);

        let resumed = controller
            .restart(&job, &state.execution_id, run_parameters(1))
            .unwrap();
        assert_eq!(resumed.status, BatchStatus::Completed);
        assert_eq!(sink.items(), numbers(10));
    }

    #[test]
    fn abandon_and_recover_follow_the_state_machine() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);

        let orphan = store.create("job", &run_parameters(1), false).unwrap();
        let mut started = orphan.clone();
        started.transition_to(BatchStatus::Started).unwrap();
        store.save(&started).unwrap();

        controller.recover(&orphan.execution_id).unwrap();
        assert_eq!(
            store.load(&orphan.execution_id).unwrap().status,
            BatchStatus::Failed
        );
        assert!(matches!(
            controller.recover(&orphan.execution_id),
            Err(BatchError::InvalidStateTransition { .. })
        ));

        controller.abandon(&orphan.execution_id).unwrap();
        assert_eq!(
            store.load(&orphan.execution_id).unwrap().status,
            BatchStatus::Abandoned
        );
        assert!(matches!(
            store.create("job", &run_parameters(1), true),
            Err(BatchError::DuplicateInstance { .. })
        ));
    }

    #[test]
    fn stop_of_a_foreign_execution_is_written_to_the_store() {
        let store = InMemoryStateStore::new();
        let controller = JobController::new(&store);
        let state = store.create("job", &run_parameters(1), false).unwrap();

        controller.stop(&state.execution_id).unwrap();
        assert_eq!(
            store.load(&state.execution_id).unwrap().status,
            BatchStatus::Stopped
        );
        assert!(matches!(
            controller.stop(&state.execution_id),
            Err(BatchError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn job_without_steps_or_with_duplicate_names_is_rejected() {
        assert!(matches!(
            JobBuilder::new().name("empty").build(),
            Err(BatchError::Configuration(_))
        ));

        let source = VecItemSource::new(numbers(1));
        let sink = InMemoryItemSink::new();
        let step = StepBuilder::new("copy")
            .source(&source)
            .pass_through()
            .sink(&sink)
            .build()
            .unwrap();
        assert!(matches!(
            JobBuilder::new().start(&step).next(&step).build(),
            Err(BatchError::Configuration(_))
        ));
    }
}
