use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::{self, Write},
    path::Path,
    result,
};

use csv::{Writer, WriterBuilder};
use log::debug;
use serde::Serialize;

use crate::{
    BatchError,
    core::item::{ItemSink, ItemSinkResult},
};

/// Error kind of items that cannot be represented as a CSV record.
pub const SERIALIZE_ERROR: &str = "serialize";
/// Error kind of failures of the underlying writer.
pub const IO_ERROR: &str = "io";

fn to_sink_error(error: impl ToString, kind: &str) -> BatchError {
    BatchError::sink(kind, error.to_string())
}

/// Writes items as CSV records.
///
/// Inside a transaction items are validated on `write` and kept in memory;
/// they reach the underlying writer on `commit`, so a rolled back chunk leaves
/// no record behind. Without a transaction records are written and flushed
/// immediately.
pub struct CsvItemSink<T, W: Write> {
    wrapper: RefCell<Writer<W>>,
    staged: RefCell<Vec<T>>,
    in_transaction: Cell<bool>,
}

impl<T: Serialize + Clone, W: Write> CsvItemSink<T, W> {
    fn validate(items: &[T]) -> ItemSinkResult {
        let mut scratch = WriterBuilder::new().has_headers(false).from_writer(io::sink());
        for item in items {
            scratch
                .serialize(item)
                .map_err(|error| to_sink_error(error, SERIALIZE_ERROR))?;
        }
        Ok(())
    }

    fn write_through(&self, items: &[T]) -> ItemSinkResult {
        let mut writer = self.wrapper.borrow_mut();
        for item in items {
            writer
                .serialize(item)
                .map_err(|error| to_sink_error(error, IO_ERROR))?;
        }
        writer.flush().map_err(|error| to_sink_error(error, IO_ERROR))
    }
}

impl<T: Serialize + Clone, W: Write> ItemSink<T> for CsvItemSink<T, W> {
    fn write(&self, items: &[T]) -> ItemSinkResult {
        Self::validate(items)?;
        if self.in_transaction.get() {
            self.staged.borrow_mut().extend_from_slice(items);
            Ok(())
        } else {
            self.write_through(items)
        }
    }

    fn begin(&self) -> Result<(), BatchError> {
        self.staged.borrow_mut().clear();
        self.in_transaction.set(true);
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        self.in_transaction.set(false);
        let staged: Vec<T> = self.staged.borrow_mut().drain(..).collect();
        debug!("Writing {} csv records", staged.len());
        self.write_through(&staged)
    }

    fn rollback(&self) -> Result<(), BatchError> {
        self.staged.borrow_mut().clear();
        self.in_transaction.set(false);
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        self.wrapper
            .borrow_mut()
            .flush()
            .map_err(|error| to_sink_error(error, IO_ERROR))
    }
}

impl<T, W: Write> CsvItemSink<T, W> {
    pub fn into_inner(self) -> result::Result<W, BatchError> {
        self.wrapper
            .into_inner()
            .into_inner()
            .map_err(|error| to_sink_error(error, IO_ERROR))
    }
}

#[derive(Default)]
pub struct CsvItemSinkBuilder {
    delimiter: u8,
    has_headers: bool,
}

impl CsvItemSinkBuilder {
    pub fn new() -> CsvItemSinkBuilder {
        CsvItemSinkBuilder {
            delimiter: b',',
            has_headers: false,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> CsvItemSinkBuilder {
        self.delimiter = delimiter;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> CsvItemSinkBuilder {
        self.has_headers = yes;
        self
    }

    fn writer_builder(&self) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder
            .flexible(false)
            .delimiter(self.delimiter)
            .has_headers(self.has_headers);
        builder
    }

    pub fn from_path<T, P: AsRef<Path>>(self, path: P) -> Result<CsvItemSink<T, File>, BatchError> {
        let wtr = self.writer_builder().from_path(path.as_ref()).map_err(|error| {
            BatchError::Configuration(format!(
                "cannot create {}: {error}",
                path.as_ref().display()
            ))
        })?;
        Ok(Self::wrap(wtr))
    }

    pub fn from_writer<T, W: io::Write>(self, wtr: W) -> CsvItemSink<T, W> {
        Self::wrap(self.writer_builder().from_writer(wtr))
    }

    fn wrap<T, W: io::Write>(wtr: Writer<W>) -> CsvItemSink<T, W> {
        CsvItemSink {
            wrapper: RefCell::new(wtr),
            staged: RefCell::new(Vec::new()),
            in_transaction: Cell::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[derive(Clone, serde::Serialize)]
    struct Row {
        city: &'static str,
        country: &'static str,
        #[serde(rename = "popcount")]
        population: u64,
    }

    const BOSTON: Row = Row {
        city: "Boston",
        country: "United States",
        population: 4628910,
    };

    const CONCORD: Row = Row {
        city: "Concord",
        country: "United States",
        population: 42695,
    };

    #[test]
    fn only_committed_chunks_are_written() -> Result<(), Box<dyn Error>> {
        let sink = CsvItemSinkBuilder::new()
            .has_headers(true)
            .from_writer(vec![]);

        sink.begin()?;
        sink.write(&[BOSTON])?;
        sink.rollback()?;

        sink.begin()?;
        sink.write(&[BOSTON, CONCORD])?;
        sink.commit()?;

        let data = String::from_utf8(sink.into_inner()?)?;
        assert_eq!(
            data,
            "city,country,popcount
Boston,United States,4628910
Concord,United States,42695
"
        );

        Ok(())
    }

    #[test]
    fn unserializable_item_is_rejected_before_staging() {
        #[derive(Clone)]
        struct Broken;

        impl serde::Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("broken record"))
            }
        }

        let sink = CsvItemSinkBuilder::new().from_writer(vec![]);
        sink.begin().unwrap();
        let error = sink.write(&[Broken]).unwrap_err();
        assert_eq!(error.kind(), Some(SERIALIZE_ERROR));
        sink.commit().unwrap();
        assert!(sink.into_inner().unwrap().is_empty());
    }

    #[test]
    fn writes_outside_a_transaction_go_straight_to_the_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("cities.csv");
        let sink = CsvItemSinkBuilder::new().from_path(&path)?;
        sink.write(&[CONCORD])?;

        assert_eq!(
            std::fs::read_to_string(&path)?,
            "Concord,United States,42695\n"
        );
        Ok(())
    }
}
