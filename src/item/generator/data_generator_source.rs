use std::{cell::Cell, thread, time::Duration};

use log::debug;

use crate::{
    BatchError,
    core::{
        execution::Checkpoint,
        item::{ItemSource, ItemSourceResult},
    },
};

use super::record::DataRecord;

/// Generates `number_of_items` [`DataRecord`]s with ids `1..=number_of_items`.
///
/// The checkpoint is the id of the last generated record, so a restarted step
/// continues with the next id.
pub struct DataGeneratorSource {
    number_of_items: u64,
    current_id: Cell<u64>,
    payload_size: usize,
    delay: Option<Duration>,
}

impl ItemSource<DataRecord> for DataGeneratorSource {
    fn read(&self) -> ItemSourceResult<DataRecord> {
        let id = self.current_id.get() + 1;
        if id > self.number_of_items {
            return Ok(None);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.current_id.set(id);

        let record = DataRecord::generate(id, self.payload_size);
        debug!("Generated record: {}", record);
        Ok(Some(record))
    }

    fn position(&self) -> Checkpoint {
        Checkpoint::from(self.current_id.get())
    }

    fn seek(&self, checkpoint: &Checkpoint) -> Result<(), BatchError> {
        match checkpoint.as_u64() {
            Some(id) if id <= self.number_of_items => {
                self.current_id.set(id);
                Ok(())
            }
            _ => Err(BatchError::source(
                "checkpoint",
                format!(
                    "invalid generator position {checkpoint} for {} records",
                    self.number_of_items
                ),
            )),
        }
    }

    fn open(&self) -> Result<(), BatchError> {
        self.current_id.set(0);
        Ok(())
    }
}

pub struct DataGeneratorSourceBuilder {
    number_of_items: u64,
    payload_size: usize,
    delay: Option<Duration>,
}

impl Default for DataGeneratorSourceBuilder {
    fn default() -> Self {
        Self {
            number_of_items: 0,
            payload_size: 1024,
            delay: None,
        }
    }
}

impl DataGeneratorSourceBuilder {
    pub fn new() -> DataGeneratorSourceBuilder {
        Self::default()
    }

    pub fn number_of_items(mut self, number_of_items: u64) -> DataGeneratorSourceBuilder {
        self.number_of_items = number_of_items;
        self
    }

    /// Size in bytes of each record's payload. Defaults to 1 KiB.
    pub fn payload_size(mut self, payload_size: usize) -> DataGeneratorSourceBuilder {
        self.payload_size = payload_size;
        self
    }

    /// Simulates slow input by sleeping before each record.
    pub fn delay(mut self, delay: Duration) -> DataGeneratorSourceBuilder {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> DataGeneratorSource {
        DataGeneratorSource {
            number_of_items: self.number_of_items,
            current_id: Cell::new(0),
            payload_size: self.payload_size,
            delay: self.delay,
        }
    }
}
