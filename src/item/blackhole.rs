use std::{cell::Cell, thread, time::Duration};

use crate::core::item::{ItemSink, ItemSinkResult};

/// Discards every item, counting items and chunks.
///
/// Not transactional: counters move on `write`, whatever happens to the chunk
/// afterwards. Useful to measure the cost of reading and transforming alone.
#[derive(Default)]
pub struct BlackHoleItemSink {
    items_written: Cell<u64>,
    chunks_written: Cell<u64>,
    latency: Option<Duration>,
}

impl BlackHoleItemSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `latency` on each write.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn items_written(&self) -> u64 {
        self.items_written.get()
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written.get()
    }

    pub fn reset(&self) {
        self.items_written.set(0);
        self.chunks_written.set(0);
    }
}

impl<T> ItemSink<T> for BlackHoleItemSink {
    fn write(&self, items: &[T]) -> ItemSinkResult {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        self.chunks_written.set(self.chunks_written.get() + 1);
        self.items_written
            .set(self.items_written.get() + items.len() as u64);
        Ok(())
    }
}
