//! Synthetic data: a record generator and a transformer simulating CPU, memory
//! or hashing load, for sizing chunk and policy settings before real data is
//! wired in.

pub mod data_generator_source;

pub mod record;

pub mod workload_transformer;
