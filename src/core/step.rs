use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::BatchError;

use super::{
    build_name,
    chunk::Chunk,
    execution::{BatchStatus, Checkpoint, StepExecution},
    item::{ItemSink, ItemSource, ItemTransformer, PassThroughTransformer},
    policy::{ErrorClass, FaultTolerancePolicy, RetryContext, StepSettings},
};

static PASS_THROUGH: PassThroughTransformer = PassThroughTransformer {};

/// Receives the step view after each chunk and makes it durable.
///
/// Called after the sink accepted the chunk and before the sink commits, so an
/// error here rolls the chunk back.
pub trait ChunkCommitter {
    fn commit_chunk(&self, step: &StepExecution) -> Result<(), BatchError>;
}

impl<F> ChunkCommitter for F
where
    F: Fn(&StepExecution) -> Result<(), BatchError>,
{
    fn commit_chunk(&self, step: &StepExecution) -> Result<(), BatchError> {
        self(step)
    }
}

/// Cooperative cancellation flag, polled between chunks only.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A step that aborted. `execution` reflects the last committed chunk, with
/// status `Failed`.
#[derive(Debug)]
pub struct StepFailure {
    pub execution: StepExecution,
    pub error: BatchError,
}

/// Anything a job can run in sequence.
pub trait Step {
    fn get_name(&self) -> &str;

    /// Runs the step from `execution` (fresh or loaded for a restart) and returns
    /// its final view.
    fn execute(
        &self,
        execution: StepExecution,
        committer: &dyn ChunkCommitter,
        stop: &StopSignal,
    ) -> Result<StepExecution, StepFailure>;
}

/// Why the chunk loop gave up. `item` is the read ordinal of the offending item.
struct Abort {
    error: BatchError,
    item: Option<u64>,
}

impl Abort {
    fn new(error: BatchError) -> Self {
        Self { error, item: None }
    }

    fn at(error: BatchError, item: u64) -> Self {
        Self {
            error,
            item: Some(item),
        }
    }
}

/// Uncommitted counters of the chunk in flight.
#[derive(Default)]
struct ChunkContribution {
    read: u64,
    written: u64,
    skipped: u64,
    filtered: u64,
    rollbacks: u64,
}

enum ItemOutcome<O> {
    Output(O),
    Filtered,
    Skipped,
}

/// Drives the read → transform → write loop of one step in fixed-size chunks.
///
/// Every chunk is a transaction: the sink write and the checkpoint persisted
/// through the [`ChunkCommitter`] either both happen or neither does. The in
/// memory [`StepExecution`] only moves forward once a chunk is committed, so a
/// failed step reports exactly what is durable.
pub struct ChunkOrchestrator<'a, I, O> {
    name: String,
    source: &'a dyn ItemSource<I>,
    transformer: &'a dyn ItemTransformer<I, O>,
    sink: &'a dyn ItemSink<O>,
    chunk_size: usize,
    policy: FaultTolerancePolicy,
}

impl<I, O> Step for ChunkOrchestrator<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        execution: StepExecution,
        committer: &dyn ChunkCommitter,
        stop: &StopSignal,
    ) -> Result<StepExecution, StepFailure> {
        self.run_step(execution, committer, stop)
    }
}

impl<'a, I, O> ChunkOrchestrator<'a, I, O> {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn policy(&self) -> &FaultTolerancePolicy {
        &self.policy
    }

    /// Runs the step to completion, stop or failure.
    ///
    /// When `initial` carries a checkpoint the source is sought to it first and
    /// counts continue from the persisted values.
    pub fn run_step(
        &self,
        initial: StepExecution,
        committer: &dyn ChunkCommitter,
        stop: &StopSignal,
    ) -> Result<StepExecution, StepFailure> {
        let mut execution = initial;
        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        execution.end_time = None;
        execution.exit_message = None;

        info!("Start of step: {}", self.name);

        let outcome = match self.open(&execution) {
            Ok(()) => self.run_chunks(&mut execution, committer, stop),
            Err(error) => Err(Abort::new(error)),
        };

        self.close();

        execution.end_time = Some(Utc::now());

        match outcome {
            Ok(status) => {
                execution.status = status;
                info!(
                    "End of step: {}, status: {}, read: {}, written: {}, skipped: {}, filtered: {}",
                    self.name,
                    status,
                    execution.read_count,
                    execution.write_count,
                    execution.skip_count,
                    execution.filter_count
                );
                Ok(execution)
            }
            Err(abort) => {
                let error = BatchError::StepFailed {
                    step: self.name.clone(),
                    item: abort.item,
                    cause: Box::new(abort.error),
                };
                error!("{}", error);
                execution.status = BatchStatus::Failed;
                execution.exit_message = Some(error.to_string());
                Err(StepFailure { execution, error })
            }
        }
    }

    fn open(&self, execution: &StepExecution) -> Result<(), BatchError> {
        self.source.open()?;
        if let Some(checkpoint) = &execution.checkpoint {
            info!(
                "Resuming step {} from checkpoint {} (read: {}, written: {})",
                self.name, checkpoint, execution.read_count, execution.write_count
            );
            self.source.seek(checkpoint)?;
        }
        self.sink.open()
    }

    fn close(&self) {
        Self::manage_error(self.source.close());
        Self::manage_error(self.sink.close());
    }

    fn run_chunks(
        &self,
        execution: &mut StepExecution,
        committer: &dyn ChunkCommitter,
        stop: &StopSignal,
    ) -> Result<BatchStatus, Abort> {
        loop {
            if stop.is_stopped() {
                info!(
                    "Stop requested, step {} stops after {} committed chunks",
                    self.name, execution.commit_count
                );
                return Ok(BatchStatus::Stopped);
            }

            let chunk = self.read_chunk(execution.read_count)?;
            if chunk.is_empty() {
                debug!("Source exhausted, nothing left to read");
                return Ok(BatchStatus::Completed);
            }
            let finished = chunk.is_finished();
            let position = self.source.position();

            let mut contribution = ChunkContribution::default();
            if let Err(abort) =
                self.process_chunk(execution, chunk, position, committer, &mut contribution)
            {
                execution.rollback_count += contribution.rollbacks;
                return Err(abort);
            }

            if finished {
                return Ok(BatchStatus::Completed);
            }
        }
    }

    /// Reads up to `chunk_size` items.
    ///
    /// # Returns
    /// - A full chunk, or a partial / empty chunk marked finished when the source
    ///   is exhausted.
    /// - `Err` on a non-retryable read error or when read retries run out.
    fn read_chunk(&self, read_before: u64) -> Result<Chunk<I>, Abort> {
        debug!("Start reading chunk");
        let mut chunk = Chunk::new(self.chunk_size, read_before);

        while !chunk.is_full() {
            match self.read_item(chunk.next_ordinal())? {
                Some(item) => chunk.add_item(item),
                None => {
                    chunk.mark_finished();
                    break;
                }
            }
        }

        debug!("End reading chunk: {} items", chunk.len());
        Ok(chunk)
    }

    fn read_item(&self, ordinal: u64) -> Result<Option<I>, Abort> {
        let mut context = RetryContext::new(ordinal);
        loop {
            let error = match self.source.read() {
                Ok(item) => return Ok(item),
                Err(error) => error,
            };

            if self.policy.classify(&error) != ErrorClass::Retryable {
                return Err(Abort::at(error, ordinal));
            }
            context.record_failure(error);
            if !self.policy.should_retry(&context) {
                return Err(Abort::at(self.retry_exhausted(&context), ordinal));
            }
            warn!(
                "Retrying read of item {} (attempt {}): {}",
                ordinal,
                context.attempt_count + 1,
                Self::last_error(&context)
            );
        }
    }

    fn process_chunk(
        &self,
        execution: &mut StepExecution,
        chunk: Chunk<I>,
        position: Checkpoint,
        committer: &dyn ChunkCommitter,
        contribution: &mut ChunkContribution,
    ) -> Result<(), Abort> {
        debug!("Processing chunk of {} items", chunk.len());

        let mut outputs = Vec::with_capacity(chunk.len());
        let mut ordinals = Vec::with_capacity(chunk.len());

        for entry in chunk.into_items() {
            contribution.read += 1;
            let skips_so_far = execution.skip_count + contribution.skipped;
            match self.transform_item(entry.ordinal, &entry.item, skips_so_far)? {
                ItemOutcome::Output(output) => {
                    outputs.push(output);
                    ordinals.push(entry.ordinal);
                }
                ItemOutcome::Filtered => contribution.filtered += 1,
                ItemOutcome::Skipped => contribution.skipped += 1,
            }
        }

        if outputs.is_empty() {
            debug!("No items to write, skipping write call");
        } else {
            contribution.written =
                self.write_chunk(&outputs, &ordinals, execution.skip_count, contribution)?;
        }

        let mut next = execution.clone();
        next.read_count += contribution.read;
        next.write_count += contribution.written;
        next.skip_count += contribution.skipped;
        next.filter_count += contribution.filtered;
        next.rollback_count += contribution.rollbacks;
        next.commit_count += 1;
        next.checkpoint = Some(position);

        if let Err(error) = committer.commit_chunk(&next) {
            if !outputs.is_empty() {
                self.rollback_sink(contribution);
            }
            return Err(Abort::new(error));
        }

        if !outputs.is_empty() {
            if let Err(error) = self.sink.commit() {
                error!(
                    "Sink commit failed, restoring previous checkpoint of step {}",
                    self.name
                );
                if let Err(restore_error) = committer.commit_chunk(execution) {
                    error!("Unable to restore previous checkpoint: {}", restore_error);
                }
                self.rollback_sink(contribution);
                return Err(Abort::new(error));
            }
        }

        *execution = next;
        debug!(
            "Chunk committed: read: {}, written: {}, skipped: {}, filtered: {}",
            contribution.read, contribution.written, contribution.skipped, contribution.filtered
        );
        Ok(())
    }

    fn transform_item(
        &self,
        ordinal: u64,
        item: &I,
        skips_so_far: u64,
    ) -> Result<ItemOutcome<O>, Abort> {
        let mut context = RetryContext::new(ordinal);
        loop {
            let error = match self.transformer.transform(item) {
                Ok(Some(output)) => return Ok(ItemOutcome::Output(output)),
                Ok(None) => {
                    debug!("Item {} filtered", ordinal);
                    return Ok(ItemOutcome::Filtered);
                }
                Err(error) => error,
            };

            let class = match self.policy.classify(&error) {
                ErrorClass::Retryable => {
                    context.record_failure(error.clone());
                    if self.policy.should_retry(&context) {
                        warn!(
                            "Retrying transform of item {} (attempt {}): {}",
                            ordinal,
                            context.attempt_count + 1,
                            error
                        );
                        continue;
                    }
                    match self.policy.escalate(&error) {
                        ErrorClass::Skippable => ErrorClass::Skippable,
                        _ => return Err(Abort::at(self.retry_exhausted(&context), ordinal)),
                    }
                }
                other => other,
            };

            return match class {
                ErrorClass::Skippable => self
                    .skip(ordinal, &error, skips_so_far)
                    .map(|()| ItemOutcome::Skipped),
                _ => Err(Abort::at(error, ordinal)),
            };
        }
    }

    /// Writes the chunk inside a sink transaction, retrying or scanning per policy.
    ///
    /// On `Ok` the transaction is still open and holds the written items; on `Err`
    /// it has been rolled back. Returns the number of items written.
    fn write_chunk(
        &self,
        items: &[O],
        ordinals: &[u64],
        skips_before: u64,
        contribution: &mut ChunkContribution,
    ) -> Result<u64, Abort> {
        debug!("Writing chunk of {} items", items.len());
        let mut context = RetryContext::new(ordinals.first().copied().unwrap_or_default());

        loop {
            self.sink.begin().map_err(Abort::new)?;
            let error = match self.sink.write(items) {
                Ok(()) => return Ok(items.len() as u64),
                Err(error) => error,
            };
            self.rollback_sink(contribution);

            match self.policy.classify(&error) {
                ErrorClass::Retryable => {
                    context.record_failure(error.clone());
                    if self.policy.should_retry(&context) {
                        warn!(
                            "Retrying write of chunk (attempt {}): {}",
                            context.attempt_count + 1,
                            error
                        );
                        continue;
                    }
                    if self.policy.escalate(&error) != ErrorClass::Skippable {
                        return Err(Abort::new(self.retry_exhausted(&context)));
                    }
                }
                ErrorClass::Skippable => {}
                ErrorClass::Fatal => return Err(Abort::new(error)),
            }

            info!(
                "Write of chunk failed with a skippable error, scanning {} items: {}",
                items.len(),
                error
            );
            self.sink.begin().map_err(Abort::new)?;
            let scanned = self.scan_chunk(items, ordinals, skips_before, contribution);
            if scanned.is_err() {
                self.rollback_sink(contribution);
            }
            return scanned;
        }
    }

    /// Rewrites a chunk one item at a time inside the current transaction,
    /// skipping the items that fail with a skippable error.
    fn scan_chunk(
        &self,
        items: &[O],
        ordinals: &[u64],
        skips_before: u64,
        contribution: &mut ChunkContribution,
    ) -> Result<u64, Abort> {
        let mut written = 0;

        for (item, &ordinal) in items.iter().zip(ordinals) {
            let mut context = RetryContext::new(ordinal);
            loop {
                let error = match self.sink.write(std::slice::from_ref(item)) {
                    Ok(()) => {
                        written += 1;
                        break;
                    }
                    Err(error) => error,
                };

                let class = match self.policy.classify(&error) {
                    ErrorClass::Retryable => {
                        context.record_failure(error.clone());
                        if self.policy.should_retry(&context) {
                            warn!("Retrying write of item {}: {}", ordinal, error);
                            continue;
                        }
                        match self.policy.escalate(&error) {
                            ErrorClass::Skippable => ErrorClass::Skippable,
                            _ => return Err(Abort::at(self.retry_exhausted(&context), ordinal)),
                        }
                    }
                    other => other,
                };

                match class {
                    ErrorClass::Skippable => {
                        self.skip(ordinal, &error, skips_before + contribution.skipped)?;
                        contribution.skipped += 1;
                        break;
                    }
                    _ => return Err(Abort::at(error, ordinal)),
                }
            }
        }

        Ok(written)
    }

    fn skip(&self, ordinal: u64, error: &BatchError, skips_so_far: u64) -> Result<(), Abort> {
        if self.policy.should_skip(skips_so_far) {
            warn!("Skipping item {} of step {}: {}", ordinal, self.name, error);
            Ok(())
        } else {
            Err(Abort::at(
                BatchError::PolicyViolation {
                    limit: self.policy.max_skips,
                    message: format!("skip limit exceeded by item {ordinal}: {error}"),
                },
                ordinal,
            ))
        }
    }

    fn rollback_sink(&self, contribution: &mut ChunkContribution) {
        contribution.rollbacks += 1;
        Self::manage_error(self.sink.rollback());
    }

    fn retry_exhausted(&self, context: &RetryContext) -> BatchError {
        BatchError::PolicyViolation {
            limit: self.policy.max_retries,
            message: format!(
                "retry limit exceeded for item {} after {} attempts: {}",
                context.item,
                context.attempt_count,
                Self::last_error(context)
            ),
        }
    }

    fn last_error(context: &RetryContext) -> String {
        context
            .last_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Logs errors from operations that must not change the step outcome.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

/// Fluent construction of a [`ChunkOrchestrator`].
///
/// ```
/// use chunk_batch::core::step::StepBuilder;
/// use chunk_batch::item::memory::{InMemoryItemSink, VecItemSource};
///
/// let source = VecItemSource::new(vec![1, 2, 3]);
/// let sink = InMemoryItemSink::new();
///
/// let step = StepBuilder::new("copy")
///     .source(&source)
///     .pass_through()
///     .sink(&sink)
///     .chunk(2)
///     .skip_limit(1)
///     .build()
///     .unwrap();
/// assert_eq!(step.chunk_size(), 2);
/// ```
pub struct StepBuilder<'a, I, O> {
    name: String,
    source: Option<&'a dyn ItemSource<I>>,
    transformer: Option<&'a dyn ItemTransformer<I, O>>,
    sink: Option<&'a dyn ItemSink<O>>,
    chunk_size: usize,
    policy: FaultTolerancePolicy,
}

impl<'a, I, O> StepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            transformer: None,
            sink: None,
            chunk_size: 10,
            policy: FaultTolerancePolicy::default(),
        }
    }

    /// A builder with a generated name.
    pub fn unnamed() -> Self {
        Self::new(&build_name())
    }

    pub fn source(mut self, source: &'a dyn ItemSource<I>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn transformer(mut self, transformer: &'a dyn ItemTransformer<I, O>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn sink(mut self, sink: &'a dyn ItemSink<O>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn chunk(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn policy(mut self, policy: FaultTolerancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_limit(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn skip_limit(mut self, max_skips: usize) -> Self {
        self.policy.max_skips = max_skips;
        self
    }

    pub fn settings(self, settings: StepSettings) -> Self {
        self.chunk(settings.chunk_size).policy(settings.policy)
    }

    pub fn build(self) -> Result<ChunkOrchestrator<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step {} must be greater than zero",
                self.name
            )));
        }
        let missing = |what: &str| {
            BatchError::Configuration(format!("{what} is required for building step {}", self.name))
        };
        let source = self.source.ok_or_else(|| missing("source"))?;
        let transformer = self.transformer.ok_or_else(|| missing("transformer"))?;
        let sink = self.sink.ok_or_else(|| missing("sink"))?;

        Ok(ChunkOrchestrator {
            name: self.name,
            source,
            transformer,
            sink,
            chunk_size: self.chunk_size,
            policy: self.policy,
        })
    }
}

impl<T: Clone> StepBuilder<'_, T, T> {
    /// Uses the identity transformer.
    pub fn pass_through(mut self) -> Self {
        self.transformer = Some(&PASS_THROUGH);
        self
    }
}
