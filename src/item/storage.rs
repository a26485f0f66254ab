//! Sink selected from configuration.
//!
//! A [`SinkConfig`] (typically part of a JSON job description) names a
//! [`StorageType`]; [`SinkConfig::build`] turns it into a
//! [`ConfigurableItemSink`] delegating to the matching bundled sink.

use std::{cell::Cell, fmt::Debug, path::PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    BatchError,
    core::item::{ItemSink, ItemSinkResult},
};

use super::{blackhole::BlackHoleItemSink, memory::InMemoryItemSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageType {
    /// Count and discard.
    BlackHole,
    /// Keep committed items in memory.
    Memory,
    /// Log each item (feature `logger`).
    Logger,
    /// Write a CSV file (feature `csv`), `path` required.
    Csv,
}

fn default_has_headers() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub storage: StorageType,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_has_headers")]
    pub has_headers: bool,
}

impl SinkConfig {
    pub fn new(storage: StorageType) -> Self {
        Self {
            storage,
            path: None,
            has_headers: default_has_headers(),
        }
    }

    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn build<T>(&self) -> Result<ConfigurableItemSink<T>, BatchError>
    where
        T: Serialize + Debug + Clone + 'static,
    {
        let delegate = match self.storage {
            StorageType::BlackHole => Delegate::BlackHole(BlackHoleItemSink::new()),
            StorageType::Memory => Delegate::Memory(InMemoryItemSink::new()),
            StorageType::Logger => Delegate::Other(self.logger_sink()?),
            StorageType::Csv => Delegate::Other(self.csv_sink()?),
        };
        debug!("Built {:?} sink", self.storage);

        Ok(ConfigurableItemSink {
            storage: self.storage,
            delegate,
            items_written: Cell::new(0),
        })
    }

    #[cfg(feature = "logger")]
    fn logger_sink<T: Debug + 'static>(&self) -> Result<Box<dyn ItemSink<T>>, BatchError> {
        Ok(Box::new(super::logger::LoggerItemSink::default()))
    }

    #[cfg(not(feature = "logger"))]
    fn logger_sink<T>(&self) -> Result<Box<dyn ItemSink<T>>, BatchError> {
        Err(BatchError::Configuration(
            "LOGGER storage requires the `logger` feature".to_string(),
        ))
    }

    #[cfg(feature = "csv")]
    fn csv_sink<T: Serialize + Clone + 'static>(
        &self,
    ) -> Result<Box<dyn ItemSink<T>>, BatchError> {
        let path = self.path.as_ref().ok_or_else(|| {
            BatchError::Configuration("CSV storage requires a path".to_string())
        })?;
        let sink = super::csv::csv_writer::CsvItemSinkBuilder::new()
            .has_headers(self.has_headers)
            .from_path(path)?;
        Ok(Box::new(sink))
    }

    #[cfg(not(feature = "csv"))]
    fn csv_sink<T>(&self) -> Result<Box<dyn ItemSink<T>>, BatchError> {
        Err(BatchError::Configuration(
            "CSV storage requires the `csv` feature".to_string(),
        ))
    }
}

enum Delegate<T> {
    BlackHole(BlackHoleItemSink),
    Memory(InMemoryItemSink<T>),
    Other(Box<dyn ItemSink<T>>),
}

impl<T: Clone> Delegate<T> {
    fn as_sink(&self) -> &dyn ItemSink<T> {
        match self {
            Delegate::BlackHole(sink) => sink,
            Delegate::Memory(sink) => sink,
            Delegate::Other(sink) => sink.as_ref(),
        }
    }
}

/// Sink built from a [`SinkConfig`], counting the items it accepted.
pub struct ConfigurableItemSink<T> {
    storage: StorageType,
    delegate: Delegate<T>,
    items_written: Cell<u64>,
}

impl<T: Clone> ConfigurableItemSink<T> {
    pub fn storage_type(&self) -> StorageType {
        self.storage
    }

    pub fn items_written(&self) -> u64 {
        self.items_written.get()
    }

    /// Items committed so far, for `MEMORY` storage only.
    pub fn memory_snapshot(&self) -> Option<Vec<T>> {
        match &self.delegate {
            Delegate::Memory(sink) => Some(sink.items()),
            _ => None,
        }
    }
}

impl<T: Clone> ItemSink<T> for ConfigurableItemSink<T> {
    fn write(&self, items: &[T]) -> ItemSinkResult {
        self.delegate.as_sink().write(items)?;
        self.items_written
            .set(self.items_written.get() + items.len() as u64);
        Ok(())
    }

    fn open(&self) -> Result<(), BatchError> {
        self.delegate.as_sink().open()
    }

    fn close(&self) -> Result<(), BatchError> {
        self.delegate.as_sink().close()
    }

    fn begin(&self) -> Result<(), BatchError> {
        self.delegate.as_sink().begin()
    }

    fn commit(&self) -> Result<(), BatchError> {
        self.delegate.as_sink().commit()
    }

    fn rollback(&self) -> Result<(), BatchError> {
        self.delegate.as_sink().rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_keeps_committed_items() {
        let config: SinkConfig = serde_json::from_str(r#"{"storage": "MEMORY"}"#).unwrap();
        assert!(config.has_headers);

        let sink = config.build::<u32>().unwrap();
        sink.begin().unwrap();
        sink.write(&[1, 2]).unwrap();
        sink.commit().unwrap();

        assert_eq!(sink.storage_type(), StorageType::Memory);
        assert_eq!(sink.items_written(), 2);
        assert_eq!(sink.memory_snapshot(), Some(vec![1, 2]));
    }

    #[test]
    fn black_hole_storage_has_no_snapshot() {
        let sink = SinkConfig::new(StorageType::BlackHole)
            .build::<String>()
            .unwrap();
        sink.write(&["a".to_string()]).unwrap();
        assert_eq!(sink.items_written(), 1);
        assert_eq!(sink.memory_snapshot(), None);
    }

    #[test]
    #[cfg(feature = "csv")]
    fn csv_storage_requires_a_path() {
        assert!(matches!(
            SinkConfig::new(StorageType::Csv).build::<u32>(),
            Err(BatchError::Configuration(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let sink = SinkConfig::new(StorageType::Csv)
            .path(&path)
            .build::<(u32, String)>()
            .unwrap();
        sink.begin().unwrap();
        sink.write(&[(1, "one".to_string())]).unwrap();
        sink.commit().unwrap();
        sink.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1,one\n");
    }
}
