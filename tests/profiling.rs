mod common;

use anyhow::Result;
use common::{init_logger, run};

use chunk_batch::{
    core::{
        execution::BatchStatus,
        item::ItemSource,
        job::{JobBuilder, JobController},
        step::StepBuilder,
    },
    item::{
        blackhole::BlackHoleItemSink,
        csv::csv_reader::CsvItemSourceBuilder,
        generator::{
            data_generator_source::DataGeneratorSourceBuilder,
            record::DataRecord,
            workload_transformer::{WorkloadTransformer, WorkloadType},
        },
        storage::{SinkConfig, StorageType},
    },
    repository::in_memory::InMemoryStateStore,
};

#[test]
fn generated_records_land_in_the_configured_csv_file() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("records.csv");

    let source = DataGeneratorSourceBuilder::new()
        .number_of_items(25)
        .payload_size(64)
        .build();
    let transformer = WorkloadTransformer::new(WorkloadType::Light);
    let sink = SinkConfig::new(StorageType::Csv)
        .path(&path)
        .build::<DataRecord>()?;

    let store = InMemoryStateStore::new();
    let controller = JobController::new(&store);
    let step = StepBuilder::new("generate")
        .source(&source)
        .transformer(&transformer)
        .sink(&sink)
        .chunk(10)
        .build()?;
    let job = JobBuilder::new().name("profile").start(&step).build()?;

    let state = controller.launch(&job, run(1))?;

    assert_eq!(state.status, BatchStatus::Completed);
    assert_eq!(state.write_count, 25);
    assert_eq!(state.steps[0].commit_count, 3);
    assert_eq!(transformer.processed_count(), 25);
    assert_eq!(sink.items_written(), 25);

    let reader = CsvItemSourceBuilder::new()
        .has_headers(true)
        .from_path(&path)?;
    let mut ids = Vec::new();
    while let Some(record) = ItemSource::<DataRecord>::read(&reader)? {
        assert_eq!(record.data, record.data.to_uppercase());
        assert!(record.payload.is_empty());
        ids.push(record.id);
    }
    assert_eq!(ids, (1..=25).collect::<Vec<u64>>());
    Ok(())
}

#[test]
fn heavy_workload_into_a_black_hole_counts_every_chunk() -> Result<()> {
    let source = DataGeneratorSourceBuilder::new().number_of_items(7).build();
    let transformer = WorkloadTransformer::new(WorkloadType::Heavy);
    let sink = BlackHoleItemSink::new();

    let store = InMemoryStateStore::new();
    let controller = JobController::new(&store);
    let step = StepBuilder::new("burn")
        .source(&source)
        .transformer(&transformer)
        .sink(&sink)
        .chunk(3)
        .build()?;
    let job = JobBuilder::new().name("profile").start(&step).build()?;

    let state = controller.launch(&job, run(1))?;

    assert_eq!(state.status, BatchStatus::Completed);
    assert_eq!(sink.items_written(), 7);
    assert_eq!(sink.chunks_written(), 3);
    Ok(())
}
