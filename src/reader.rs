//! Column readers.
//!
//! A `ColumnReader` is the single-value fetch seam of the pipeline: given an
//! absolute entry index it produces one cell. Readers are slot-owned; a reader
//! is never called from two slots. Implementations are free to cache
//! internally, which is why `get` takes `&mut self`.

use std::fmt;
use std::sync::Arc;

use crate::cache::CacheHandle;
use crate::cell::CellValue;
use crate::error::Result;
use crate::{ EntryIndex, Slot };

/// Type-erased single-value fetch by absolute entry index
pub trait ColumnReader: Send + fmt::Debug {
    /// Fetch the value stored at `entry`
    fn get(&mut self, entry: EntryIndex) -> Result<CellValue>;
}

/// A reader that rewrites the entry index through a function before delegating.
///
/// Used to wire a consumer to a cache axis that is not its natural entry axis;
/// the resampler maps grid indices onto cached source rows this way.
pub struct RemappingReader<F> {
    inner: Box<dyn ColumnReader>,
    remap: F,
}

impl<F> fmt::Debug for RemappingReader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemappingReader").field("inner", &self.inner).finish()
    }
}

impl<F> RemappingReader<F>
where
    F: Fn(EntryIndex) -> Result<EntryIndex> + Send,
{
    pub fn new(inner: Box<dyn ColumnReader>, remap: F) -> Self {
        Self { inner, remap }
    }
}

impl<F> ColumnReader for RemappingReader<F>
where
    F: Fn(EntryIndex) -> Result<EntryIndex> + Send,
{
    fn get(&mut self, entry: EntryIndex) -> Result<CellValue> {
        let mapped = (self.remap)(entry)?;
        self.inner.get(mapped)
    }
}

/// A reader view over one slot of a shared column cache.
///
/// Holds the cache alive but does not own it exclusively; the cache is shared
/// with the data source that fills and purges it.
pub struct CacheReader {
    slot: Slot,
    cache: Arc<CacheHandle>,
}

impl fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheReader").field("slot", &self.slot).finish()
    }
}

impl CacheReader {
    pub fn new(slot: Slot, cache: Arc<CacheHandle>) -> Self {
        Self { slot, cache }
    }
}

impl ColumnReader for CacheReader {
    fn get(&mut self, entry: EntryIndex) -> Result<CellValue> {
        self.cache.value(self.slot, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_error;

    #[derive(Debug)]
    struct VecReader(Vec<i64>);

    impl ColumnReader for VecReader {
        fn get(&mut self, entry: EntryIndex) -> Result<CellValue> {
            self.0
                .get(entry as usize)
                .map(|v| CellValue::Int64(*v))
                .ok_or_else(|| range_error!("entry {} outside backing vector", entry))
        }
    }

    #[test]
    fn test_remapping_reader_rewrites_entries() {
        let inner = Box::new(VecReader(vec![10, 20, 30, 40]));
        let mut reader = RemappingReader::new(inner, |entry| Ok(entry * 2));

        assert_eq!(reader.get(0).unwrap(), CellValue::Int64(10));
        assert_eq!(reader.get(1).unwrap(), CellValue::Int64(30));
    }

    #[test]
    fn test_remapping_reader_propagates_remap_failure() {
        let inner = Box::new(VecReader(vec![1]));
        let mut reader = RemappingReader::new(inner, |entry| {
            Err(range_error!("no mapping for grid index {}", entry))
        });

        assert!(reader.get(5).unwrap_err().is_range());
    }
}
