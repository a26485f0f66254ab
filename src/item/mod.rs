/// In-memory item source and sink.
pub mod memory;

/// A sink that only counts what it receives.
pub mod blackhole;

/// A sink chosen from configuration.
pub mod storage;

#[cfg(feature = "logger")]
/// This module provides a logger item sink implementation.
pub mod logger;

#[cfg(feature = "csv")]
pub mod csv;

#[cfg(feature = "generator")]
/// This module provides a synthetic data source and workload transformer.
pub mod generator;
