//! Mock versions of the sink and state store contracts.
use mockall::mock;

use chunk_batch::{
    BatchError,
    core::{
        execution::{ExecutionId, ExecutionState, JobParameters},
        item::{ItemSink, ItemSinkResult},
    },
    repository::ExecutionStateStore,
};

mock! {
    pub Sink {}
    impl ItemSink<u32> for Sink {
        fn write(&self, items: &[u32]) -> ItemSinkResult;
        fn open(&self) -> Result<(), BatchError>;
        fn close(&self) -> Result<(), BatchError>;
        fn begin(&self) -> Result<(), BatchError>;
        fn commit(&self) -> Result<(), BatchError>;
        fn rollback(&self) -> Result<(), BatchError>;
    }
}

mock! {
    pub Store {}
    impl ExecutionStateStore for Store {
        fn create(
            &self,
            job_name: &str,
            parameters: &JobParameters,
            allow_start_if_complete: bool,
        ) -> Result<ExecutionState, BatchError>;
        fn load(&self, execution_id: &ExecutionId) -> Result<ExecutionState, BatchError>;
        fn save(&self, state: &ExecutionState) -> Result<u64, BatchError>;
        fn find_executions(&self, job_name: &str) -> Result<Vec<ExecutionState>, BatchError>;
    }
}
