use std::cell::Cell;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::item::{ItemTransformer, ItemTransformerResult};

use super::record::{DataRecord, round_to};

/// Kind of simulated work applied to each record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadType {
    /// Pass-through.
    #[default]
    None,
    /// Simple field updates.
    Light,
    /// String reversal and some floating point math.
    Moderate,
    /// CPU bound: prime search, repeated string rewriting, nested loops.
    Heavy,
    /// Many short-lived allocations.
    Memory,
    /// SHA-256 digests.
    Crypto,
}

/// Applies a [`WorkloadType`] to every record and counts transformed records.
pub struct WorkloadTransformer {
    workload: WorkloadType,
    processed: Cell<u64>,
}

impl WorkloadTransformer {
    pub fn new(workload: WorkloadType) -> Self {
        Self {
            workload,
            processed: Cell::new(0),
        }
    }

    pub fn workload(&self) -> WorkloadType {
        self.workload
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.get()
    }
}

impl ItemTransformer<DataRecord, DataRecord> for WorkloadTransformer {
    fn transform(&self, item: &DataRecord) -> ItemTransformerResult<DataRecord> {
        self.processed.set(self.processed.get() + 1);

        let mut record = item.clone();
        match self.workload {
            WorkloadType::None => {}
            WorkloadType::Light => light(&mut record),
            WorkloadType::Moderate => moderate(&mut record),
            WorkloadType::Heavy => heavy(&mut record),
            WorkloadType::Memory => memory(&mut record),
            WorkloadType::Crypto => crypto(&mut record),
        }
        Ok(Some(record))
    }
}

fn light(record: &mut DataRecord) {
    record.data = record.data.to_uppercase();
    record.amount *= 1.1;
    record.metric1 *= 2.0;
}

fn moderate(record: &mut DataRecord) {
    record.data = record.data.chars().rev().collect();

    for _ in 0..100 {
        record.metric1 = record.metric1.sin() * record.metric2.cos();
        record.metric2 = record.metric2.abs().sqrt() + (record.metric3 + 1.0).ln();
    }

    for _ in 0..10 {
        record.amount = round_to(record.amount * 1.0001, 4);
    }
}

fn heavy(record: &mut DataRecord) {
    record.metric1 = nth_prime(100) as f64;

    let mut data = record.data.clone();
    for i in 0..50 {
        let digit = i.to_string();
        data = data
            .chars()
            .map(|c| match c {
                'a' | 'e' | 'i' | 'o' | 'u' => digit.clone(),
                other => other.to_string(),
            })
            .collect::<String>()
            .chars()
            .rev()
            .collect();
    }
    record.data = data.chars().take(500).collect();

    let mut result = 0.0;
    for i in 0..100_i32 {
        for j in 0..100_i32 {
            result += f64::from(i).sin() * f64::from(j).cos();
        }
    }
    record.metric2 = result;
}

fn memory(record: &mut DataRecord) {
    let temporaries: Vec<String> = (0..1000)
        .map(|i| format!("Data-{}-{}", record.id, i))
        .collect();
    drop(temporaries);

    let mut result = String::new();
    for i in 0..100 {
        result = format!("{result}{}-{i}", record.data);
    }
    record.data = result.chars().take(500).collect();

    for _ in 0..10 {
        let mut buffer = vec![0u8; 10 * 1024];
        buffer[0] = record.id as u8;
        drop(buffer);
    }
}

fn crypto(record: &mut DataRecord) {
    record.payload = Sha256::digest(record.data.as_bytes()).to_vec();

    let mut data = record.uuid.as_bytes().to_vec();
    for _ in 0..10 {
        data = Sha256::digest(&data).to_vec();
    }
    let hex: String = data.iter().map(|byte| format!("{byte:02x}")).collect();
    record.description = format!("Hash: {hex}");
}

fn nth_prime(n: usize) -> u64 {
    (2u64..).filter(|&candidate| is_prime(candidate)).nth(n - 1).unwrap_or(2)
}

fn is_prime(n: u64) -> bool {
    if n <= 3 {
        return n > 1;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut i = 5;
    while i * i <= n {
        if n % i == 0 || n % (i + 2) == 0 {
            return false;
        }
        i += 6;
    }
    true
}
