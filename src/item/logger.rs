use std::fmt::Debug;

use log::info;

use crate::core::item::{ItemSink, ItemSinkResult};

/// Logs every written item at `info` level.
#[derive(Default)]
pub struct LoggerItemSink {}

impl<T> ItemSink<T> for LoggerItemSink
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> ItemSinkResult {
        items.iter().for_each(|item| info!("Record:{:?}", item));
        Ok(())
    }
}
