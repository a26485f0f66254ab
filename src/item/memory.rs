//! In-memory source and sink, mostly useful in tests and small embedded jobs.

use std::cell::{Cell, RefCell};

use log::debug;

use crate::{
    BatchError,
    core::{
        execution::Checkpoint,
        item::{ItemSink, ItemSinkResult, ItemSource, ItemSourceResult},
    },
};

/// Reads items from a vector. The checkpoint is the number of items read.
pub struct VecItemSource<T> {
    items: Vec<T>,
    index: Cell<usize>,
}

impl<T: Clone> VecItemSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            index: Cell::new(0),
        }
    }
}

impl<T: Clone> ItemSource<T> for VecItemSource<T> {
    fn read(&self) -> ItemSourceResult<T> {
        let index = self.index.get();
        match self.items.get(index) {
            Some(item) => {
                self.index.set(index + 1);
                Ok(Some(item.clone()))
            }
            None => Ok(None),
        }
    }

    fn position(&self) -> Checkpoint {
        Checkpoint::from(self.index.get() as u64)
    }

    fn seek(&self, checkpoint: &Checkpoint) -> Result<(), BatchError> {
        let position = checkpoint.as_u64().ok_or_else(|| {
            BatchError::source("checkpoint", format!("invalid position {checkpoint}"))
        })? as usize;
        if position > self.items.len() {
            return Err(BatchError::source(
                "checkpoint",
                format!("position {position} is past the {} items", self.items.len()),
            ));
        }
        self.index.set(position);
        Ok(())
    }

    /// Rewinds to the first item.
    fn open(&self) -> Result<(), BatchError> {
        self.index.set(0);
        Ok(())
    }
}

/// Collects written items.
///
/// Writes made between `begin` and `commit` are staged and only become visible
/// in [`items`](InMemoryItemSink::items) on commit; `rollback` discards them.
/// Writes outside a transaction are visible immediately.
pub struct InMemoryItemSink<T> {
    committed: RefCell<Vec<T>>,
    staged: RefCell<Vec<T>>,
    chunk_sizes: RefCell<Vec<usize>>,
    in_transaction: Cell<bool>,
}

impl<T> Default for InMemoryItemSink<T> {
    fn default() -> Self {
        Self {
            committed: RefCell::new(Vec::new()),
            staged: RefCell::new(Vec::new()),
            chunk_sizes: RefCell::new(Vec::new()),
            in_transaction: Cell::new(false),
        }
    }
}

impl<T: Clone> InMemoryItemSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed items, in write order.
    pub fn items(&self) -> Vec<T> {
        self.committed.borrow().clone()
    }

    /// Number of items made visible by each commit.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunk_sizes.borrow().clone()
    }
}

impl<T: Clone> ItemSink<T> for InMemoryItemSink<T> {
    fn write(&self, items: &[T]) -> ItemSinkResult {
        if self.in_transaction.get() {
            self.staged.borrow_mut().extend_from_slice(items);
        } else {
            self.committed.borrow_mut().extend_from_slice(items);
            self.chunk_sizes.borrow_mut().push(items.len());
        }
        Ok(())
    }

    fn begin(&self) -> Result<(), BatchError> {
        self.staged.borrow_mut().clear();
        self.in_transaction.set(true);
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        let staged: Vec<T> = self.staged.borrow_mut().drain(..).collect();
        debug!("Committing {} staged items", staged.len());
        self.chunk_sizes.borrow_mut().push(staged.len());
        self.committed.borrow_mut().extend(staged);
        self.in_transaction.set(false);
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        self.staged.borrow_mut().clear();
        self.in_transaction.set(false);
        Ok(())
    }
}
