/// Fill state of a chunk.
#[derive(Debug, PartialEq)]
pub enum ChunkStatus {
    /// More items may be added.
    Continuable,
    /// The chunk reached its configured size.
    Full,
    /// The source is exhausted; no more items will arrive.
    Finished,
}

/// An item together with its 1-based read ordinal within the step.
#[derive(Debug)]
pub struct ChunkItem<I> {
    pub ordinal: u64,
    pub item: I,
}

/// Ordered, bounded buffer filled during the read phase of one chunk.
pub struct Chunk<I> {
    items: Vec<ChunkItem<I>>,
    status: ChunkStatus,
    chunk_size: usize,
    first_ordinal: u64,
}

impl<I> Chunk<I> {
    /// `read_before` is the number of items the step had read before this chunk.
    pub fn new(chunk_size: usize, read_before: u64) -> Chunk<I> {
        Chunk {
            items: Vec::with_capacity(chunk_size),
            status: ChunkStatus::Continuable,
            chunk_size,
            first_ordinal: read_before + 1,
        }
    }

    /// Ordinal the next added item will receive.
    pub fn next_ordinal(&self) -> u64 {
        self.first_ordinal + self.items.len() as u64
    }

    pub fn add_item(&mut self, item: I) {
        let ordinal = self.next_ordinal();
        self.items.push(ChunkItem { ordinal, item });

        if self.items.len() >= self.chunk_size {
            self.status = ChunkStatus::Full;
        }
    }

    pub fn mark_finished(&mut self) {
        self.status = ChunkStatus::Finished;
    }

    pub fn is_full(&self) -> bool {
        self.status == ChunkStatus::Full
    }

    pub fn is_finished(&self) -> bool {
        self.status == ChunkStatus::Finished
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn get_status(&self) -> &ChunkStatus {
        &self.status
    }

    pub fn into_items(self) -> Vec<ChunkItem<I>> {
        self.items
    }
}
