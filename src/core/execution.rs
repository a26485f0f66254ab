//! Durable execution model: statuses, job parameters, checkpoints and the
//! per-execution state record persisted by an
//! [`ExecutionStateStore`](crate::repository::ExecutionStateStore).

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::BatchError;

/// Unique, immutable identifier of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ExecutionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Created but no step launched yet.
    Starting,
    /// Running.
    Started,
    /// Finished without fatal error.
    Completed,
    /// Aborted by a fatal error. Restartable.
    Failed,
    /// Stopped on request at a chunk boundary. Restartable.
    Stopped,
    /// Manually marked as not restartable.
    Abandoned,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    pub fn is_restartable(&self) -> bool {
        matches!(self, BatchStatus::Failed | BatchStatus::Stopped)
    }

    /// Allowed edges of the job state machine.
    ///
    /// `Failed`/`Stopped` may only go back to `Started` through an explicit
    /// restart; `Completed` and `Abandoned` are final.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, next) {
            (Starting, Started) | (Starting, Stopped) | (Starting, Failed) => true,
            (Started, Completed) | (Started, Failed) | (Started, Stopped) => true,
            (Failed, Started) | (Stopped, Started) => true,
            (Starting | Started | Failed | Stopped, Abandoned) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Abandoned => "ABANDONED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: String,
    /// Only identifying parameters take part in the job key.
    pub identifying: bool,
}

/// Immutable key/value parameters of an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters(BTreeMap<String, JobParameter>);

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|parameter| parameter.value.as_str())
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|value| value.parse().ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.0.iter()
    }

    /// SHA-256 hex digest of the identifying parameters. Two executions with the
    /// same job name and job key belong to the same job instance.
    ///
    /// Names and values are length-prefixed so that no two parameter sets share
    /// an encoding.
    pub fn job_key(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, parameter) in self.0.iter().filter(|(_, p)| p.identifying) {
            for field in [name.as_bytes(), parameter.value.as_bytes()] {
                hasher.update((field.len() as u64).to_le_bytes());
                hasher.update(field);
            }
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(
            name.to_string(),
            JobParameter {
                value: value.to_string(),
                identifying: true,
            },
        );
        self
    }

    pub fn add_long(self, name: &str, value: i64) -> Self {
        self.add_string(name, &value.to_string())
    }

    /// Adds a parameter that is recorded but ignored when comparing job instances.
    pub fn add_non_identifying(mut self, name: &str, value: &str) -> Self {
        self.parameters.insert(
            name.to_string(),
            JobParameter {
                value: value.to_string(),
                identifying: false,
            },
        );
        self
    }

    pub fn build(self) -> JobParameters {
        JobParameters(self.parameters)
    }
}

/// Opaque position token produced by an [`ItemSource`](crate::core::item::ItemSource).
///
/// The engine never looks inside; it only stores the token after a committed
/// chunk and hands it back to `seek` on restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(serde_json::Value);

impl Checkpoint {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.0.as_u64()
    }
}

impl From<u64> for Checkpoint {
    fn from(position: u64) -> Self {
        Self(serde_json::Value::from(position))
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Progress of one step inside a job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub name: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    /// Items the transformer deliberately dropped. Not failures.
    pub filter_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    /// Source position after the last committed chunk.
    pub checkpoint: Option<Checkpoint>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_message: Option<String>,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            checkpoint: None,
            start_time: None,
            end_time: None,
            exit_message: None,
        }
    }
}

/// Durable record of one job execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub job_name: String,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub last_checkpoint: Option<Checkpoint>,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub exit_message: Option<String>,
    pub steps: Vec<StepExecution>,
    /// Optimistic lock counter, maintained by the store.
    pub version: u64,
}

impl ExecutionState {
    pub fn new(execution_id: ExecutionId, job_name: &str, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            job_name: job_name.to_string(),
            parameters,
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            last_checkpoint: None,
            create_time: now,
            start_time: None,
            end_time: None,
            last_updated: now,
            exit_message: None,
            steps: Vec::new(),
            version: 0,
        }
    }

    pub fn job_key(&self) -> String {
        self.parameters.job_key()
    }

    /// Moves to `next`, rejecting edges the state machine does not allow.
    pub fn transition_to(&mut self, next: BatchStatus) -> Result<(), BatchError> {
        if !self.status.can_transition_to(next) {
            return Err(BatchError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        match next {
            BatchStatus::Started => {
                self.start_time.get_or_insert(now);
                self.end_time = None;
                self.exit_message = None;
            }
            BatchStatus::Completed
            | BatchStatus::Failed
            | BatchStatus::Stopped
            | BatchStatus::Abandoned => {
                self.end_time = Some(now);
            }
            BatchStatus::Starting => {}
        }
        self.status = next;
        self.last_updated = now;
        Ok(())
    }

    pub fn step(&self, name: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|step| step.name == name)
    }

    /// Replaces (or appends) the view of one step and refreshes the totals.
    pub fn apply_step(&mut self, step: &StepExecution) {
        match self.steps.iter_mut().find(|s| s.name == step.name) {
            Some(existing) => *existing = step.clone(),
            None => self.steps.push(step.clone()),
        }
        // Steps run in order: the latest step holding a checkpoint is the last commit.
        self.last_checkpoint = self
            .steps
            .iter()
            .rev()
            .find_map(|s| s.checkpoint.clone());
        self.read_count = self.steps.iter().map(|s| s.read_count).sum();
        self.write_count = self.steps.iter().map(|s| s.write_count).sum();
        self.skip_count = self.steps.iter().map(|s| s.skip_count).sum();
        self.last_updated = Utc::now();
    }
}
