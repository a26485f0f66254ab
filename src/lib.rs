#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Chunk Batch

 A toolkit for running restartable, fault-tolerant batch jobs in fixed-size chunks.

 Items are pulled from a source, transformed one by one and written to a sink a chunk at a
 time. Every chunk is a transaction: once the sink has accepted it, the step's progress and
 the source position are persisted, then the sink commits. A job that dies halfway can be
 restarted and resumes right after the last committed chunk.

 ## Core Concepts

- **ItemSource:** pull-based supplier of items, one at a time. It owns its read position
  and can seek back to a position it previously reported.
- **ItemTransformer:** per-item mapping. Returning `Ok(None)` filters the item out.
- **ItemSink:** consumes a chunk of transformed items atomically, with optional
  `begin`/`commit`/`rollback` hooks.
- **ChunkOrchestrator:** the step. Drives the read → transform → write loop and applies the
  retry and skip policy per item.
- **ExecutionState:** the durable record of one job execution (status, counts, last
  checkpoint), kept in an `ExecutionStateStore`.
- **JobController:** launches, restarts, stops, abandons and recovers job executions.

 ## Features

| **Feature**   | **Description**                                                       |
|---------------|-----------------------------------------------------------------------|
| csv           | Enables CSV `ItemSource` and `ItemSink`                               |
| json          | Enables the JSON file `ExecutionStateStore`                           |
| logger        | Enables a logger `ItemSink`, useful for debugging purposes            |
| generator     | Enables a synthetic record source and workload transformer            |
| full          | Enables all available features                                        |

 ## Getting Started

```rust
# use chunk_batch::{
#     BatchError,
#     core::{
#         execution::{BatchStatus, JobParametersBuilder},
#         item::{FnTransformer, ItemTransformerResult},
#         job::{JobBuilder, JobController},
#         policy::FaultTolerancePolicy,
#         step::StepBuilder,
#     },
#     item::memory::{InMemoryItemSink, VecItemSource},
#     repository::in_memory::InMemoryStateStore,
# };
fn main() -> Result<(), BatchError> {
    let source = VecItemSource::new(vec!["1948", "1995", "twenty", "2021"]);
    let parse = FnTransformer::new(|year: &&str| -> ItemTransformerResult<u16> {
        year.parse()
            .map(Some)
            .map_err(|e| BatchError::transform("parse", format!("{year}: {e}")))
    });
    let sink = InMemoryItemSink::new();

    let step = StepBuilder::new("parse-years")
        .source(&source)
        .transformer(&parse)
        .sink(&sink)
        .chunk(2)
        .policy(FaultTolerancePolicy::new().skip_limit(1).skip_on("parse"))
        .build()?;

    let job = JobBuilder::new().name("years").start(&step).build()?;

    let store = InMemoryStateStore::new();
    let controller = JobController::new(&store);
    let state = controller.launch(&job, JobParametersBuilder::new().add_long("run", 1).build())?;

    assert_eq!(state.status, BatchStatus::Completed);
    assert_eq!(state.write_count, 3);
    assert_eq!(state.skip_count, 1);
    assert_eq!(sink.items(), vec![1948, 1995, 2021]);

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module: item contracts, steps, jobs, policies and execution state
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item sources / sinks (for exemple: csv source and sink)
pub mod item;

/// Persistence of execution state
pub mod repository;
