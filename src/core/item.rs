use crate::{BatchError, core::execution::Checkpoint};

/// Result of reading one item: `Ok(None)` signals end of data.
pub type ItemSourceResult<I> = Result<Option<I>, BatchError>;

/// Result of transforming one item: `Ok(None)` filters the item out.
pub type ItemTransformerResult<O> = Result<Option<O>, BatchError>;

/// Result of writing a chunk.
pub type ItemSinkResult = Result<(), BatchError>;

/// Pull-based supplier of items.
///
/// A source owns its read position. [`position`](ItemSource::position) returns a
/// token describing "everything read so far"; [`seek`](ItemSource::seek) must
/// accept any token previously returned and be idempotent, so a restarted step can
/// resume after the last committed chunk.
pub trait ItemSource<I> {
    fn read(&self) -> ItemSourceResult<I>;

    fn position(&self) -> Checkpoint;

    fn seek(&self, checkpoint: &Checkpoint) -> Result<(), BatchError>;

    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Per-item mapping. Returning `Ok(None)` filters the item; it is counted as
/// filtered, not skipped.
pub trait ItemTransformer<I, O> {
    fn transform(&self, item: &I) -> ItemTransformerResult<O>;
}

/// Consumer of chunks.
///
/// `write` must be all-or-nothing: a failed call leaves no trace in the sink.
/// Sinks that can defer visibility implement `begin`/`commit`/`rollback`; the
/// orchestrator calls `begin` before the first write of a chunk, `commit` once the
/// checkpoint has been persisted and `rollback` when the chunk is abandoned.
pub trait ItemSink<O> {
    fn write(&self, items: &[O]) -> ItemSinkResult;

    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn begin(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn commit(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn rollback(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

impl<O, S: ItemSink<O> + ?Sized> ItemSink<O> for Box<S> {
    fn write(&self, items: &[O]) -> ItemSinkResult {
        (**self).write(items)
    }

    fn open(&self) -> Result<(), BatchError> {
        (**self).open()
    }

    fn close(&self) -> Result<(), BatchError> {
        (**self).close()
    }

    fn begin(&self) -> Result<(), BatchError> {
        (**self).begin()
    }

    fn commit(&self) -> Result<(), BatchError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), BatchError> {
        (**self).rollback()
    }
}

/// Identity transformer used when a step has none.
#[derive(Default)]
pub struct PassThroughTransformer {}

impl<T: Clone> ItemTransformer<T, T> for PassThroughTransformer {
    fn transform(&self, item: &T) -> ItemTransformerResult<T> {
        Ok(Some(item.clone()))
    }
}

/// Adapts a closure into a transformer.
pub struct FnTransformer<F> {
    function: F,
}

impl<F> FnTransformer<F> {
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<I, O, F> ItemTransformer<I, O> for FnTransformer<F>
where
    F: Fn(&I) -> ItemTransformerResult<O>,
{
    fn transform(&self, item: &I) -> ItemTransformerResult<O> {
        (self.function)(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_returns_a_copy() {
        let transformer = PassThroughTransformer::default();
        assert_eq!(transformer.transform(&42).unwrap(), Some(42));
    }

    #[test]
    fn fn_transformer_can_filter() {
        let transformer = FnTransformer::new(|item: &i32| -> ItemTransformerResult<i32> {
            if item % 2 == 0 {
                Ok(Some(item * 10))
            } else {
                Ok(None)
            }
        });
        assert_eq!(transformer.transform(&2).unwrap(), Some(20));
        assert_eq!(transformer.transform(&3).unwrap(), None);
    }
}
