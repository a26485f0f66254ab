//! CSV support for reading and writing tabular data.
//!
//! - [`csv_reader::CsvItemSource`] deserializes records into Rust structs and
//!   checkpoints on the number of records consumed.
//! - [`csv_writer::CsvItemSink`] serializes structs, staging each chunk until
//!   the step commits it.
//!
//! Deserialization failures are reported with the error kind `"parse"`,
//! serialization failures with `"serialize"` and I/O failures with `"io"`, so
//! a [`FaultTolerancePolicy`](crate::core::policy::FaultTolerancePolicy) can
//! skip malformed lines while still failing on a broken file.
//!
//! # Examples
//!
//! ```
//! use chunk_batch::core::item::{ItemSink, ItemSource};
//! use chunk_batch::item::csv::{csv_reader::CsvItemSourceBuilder, csv_writer::CsvItemSinkBuilder};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Deserialize, Serialize)]
//! struct Car {
//!     year: u16,
//!     make: String,
//!     model: String,
//! }
//!
//! let csv = "year,make,model
//! 1948,Porsche,356
//! 1967,Ford,Mustang fastback 1967";
//!
//! let source = CsvItemSourceBuilder::new().has_headers(true).from_reader(csv.as_bytes());
//! let sink = CsvItemSinkBuilder::new().delimiter(b';').from_writer(vec![]);
//!
//! let mut cars: Vec<Car> = Vec::new();
//! while let Some(car) = source.read().unwrap() {
//!     cars.push(car);
//! }
//! sink.write(&cars).unwrap();
//!
//! let output = String::from_utf8(sink.into_inner().unwrap()).unwrap();
//! assert_eq!(output, "1948;Porsche;356\n1967;Ford;Mustang fastback 1967\n");
//! ```
pub mod csv_reader;

pub mod csv_writer;
