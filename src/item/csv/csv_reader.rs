use csv::{ReaderBuilder, StringRecordsIntoIter, Terminator, Trim};
use log::debug;
use serde::de::DeserializeOwned;
use std::{
    cell::{Cell, RefCell},
    fs::File,
    io::Read,
    path::Path,
};

use crate::{
    core::{
        execution::Checkpoint,
        item::{ItemSource, ItemSourceResult},
    },
    error::BatchError,
};

/// Error kind of records that cannot be deserialized.
pub const PARSE_ERROR: &str = "parse";
/// Error kind of failures of the underlying reader.
pub const IO_ERROR: &str = "io";

fn to_source_error(error: csv::Error) -> BatchError {
    let kind = if error.is_io_error() { IO_ERROR } else { PARSE_ERROR };
    BatchError::source(kind, error.to_string())
}

/// Reads typed items from CSV records.
///
/// The checkpoint is the number of records consumed, headers excluded. A
/// malformed record still counts as consumed, so a restart does not read it
/// again. The underlying reader is forward only: [`seek`](ItemSource::seek)
/// skips records and rejects positions behind the current one.
pub struct CsvItemSource<R> {
    records: RefCell<StringRecordsIntoIter<R>>,
    consumed: Cell<u64>,
}

impl<R: Read, T: DeserializeOwned> ItemSource<T> for CsvItemSource<R> {
    fn read(&self) -> ItemSourceResult<T> {
        let next = self.records.borrow_mut().next();
        match next {
            Some(result) => {
                self.consumed.set(self.consumed.get() + 1);
                let record = result.map_err(to_source_error)?;
                record.deserialize(None).map(Some).map_err(to_source_error)
            }
            None => Ok(None),
        }
    }

    fn position(&self) -> Checkpoint {
        Checkpoint::from(self.consumed.get())
    }

    fn seek(&self, checkpoint: &Checkpoint) -> Result<(), BatchError> {
        let target = checkpoint.as_u64().ok_or_else(|| {
            BatchError::source("checkpoint", format!("invalid csv position {checkpoint}"))
        })?;
        if target < self.consumed.get() {
            return Err(BatchError::source(
                "checkpoint",
                format!(
                    "cannot seek back to record {target}, already at {}",
                    self.consumed.get()
                ),
            ));
        }

        debug!("Skipping csv records up to {}", target);
        let mut records = self.records.borrow_mut();
        while self.consumed.get() < target {
            if records.next().is_none() {
                return Err(BatchError::source(
                    "checkpoint",
                    format!("csv input ended before record {target}"),
                ));
            }
            self.consumed.set(self.consumed.get() + 1);
        }
        Ok(())
    }
}

/// Builder for [`CsvItemSource`].
///
/// ```
/// use chunk_batch::item::csv::csv_reader::CsvItemSourceBuilder;
/// use chunk_batch::core::item::ItemSource;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct City {
///     city: String,
///     country: String,
///     pop: u32,
/// }
///
/// let csv_data = "\
/// city,country,pop
/// Boston,United States,4628910
/// Concord,United States,42695
/// ";
///
/// let source = CsvItemSourceBuilder::new()
///     .has_headers(true)
///     .from_reader(csv_data.as_bytes());
///
/// let mut cities: Vec<City> = Vec::new();
/// while let Some(city) = source.read().unwrap() {
///     cities.push(city);
/// }
///
/// assert_eq!(cities.len(), 2);
/// assert_eq!(cities[1].city, "Concord");
/// ```
#[derive(Default)]
pub struct CsvItemSourceBuilder {
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
}

impl CsvItemSourceBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers)
            .flexible(false);
        builder
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemSource<R> {
        let records = self.reader_builder().from_reader(rdr).into_records();

        CsvItemSource {
            records: RefCell::new(records),
            consumed: Cell::new(0),
        }
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemSource<File>, BatchError> {
        let rdr = self
            .reader_builder()
            .from_path(path.as_ref())
            .map_err(|error| {
                BatchError::Configuration(format!(
                    "cannot open {}: {error}",
                    path.as_ref().display()
                ))
            })?;

        Ok(CsvItemSource {
            records: RefCell::new(rdr.into_records()),
            consumed: Cell::new(0),
        })
    }
}
