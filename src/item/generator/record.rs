use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synthetic record used to exercise steps with realistic item shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: u64,
    pub uuid: String,
    pub data: String,
    pub category: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub status: u8,
    pub description: String,
    /// Opaque bytes, never serialized.
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub metric1: f64,
    pub metric2: f64,
    pub metric3: f64,
}

impl DataRecord {
    /// Builds record `id` with random content and a zeroed payload of
    /// `payload_size` bytes.
    pub fn generate(id: u64, payload_size: usize) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4().to_string(),
            data: generate_data(id),
            category: format!("CAT-{}", id % 100),
            amount: round_to(rand::random::<f64>() * 10_000.0, 2),
            timestamp: Utc::now(),
            status: (id % 5) as u8,
            description: format!(
                "Description for record {id} with various attributes and metadata"
            ),
            payload: vec![0; payload_size],
            metric1: rand::random::<f64>() * 1000.0,
            metric2: rand::random::<f64>() * 1000.0,
            metric3: rand::random::<f64>() * 1000.0,
        }
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{}, category:{}, amount:{:.2}, status:{}",
            self.id, self.category, self.amount, self.status
        )
    }
}

fn generate_data(id: u64) -> String {
    let mut data = format!("DATA-{id}-");
    for _ in 0..10 {
        let simple = Uuid::new_v4().simple().to_string();
        data.push_str(&simple[..8]);
        data.push('-');
    }
    data
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
