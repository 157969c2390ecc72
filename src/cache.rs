//! Sliding per-slot column caches.
//!
//! A `ColumnCache<T>` keeps, for every processing slot, a bounded FIFO of
//! decoded values together with the absolute entry index of its front element.
//! The cache stores *contiguous* entries: `value(slot, e)` is an O(1) index
//! into the buffer, defined iff `first_entry <= e < first_entry + len`. The
//! owning data source appends at the back (`load` / `load_value`) as the scan
//! advances and drops the stale prefix (`purge_till`) once the window has
//! moved past it.
//!
//! `CacheHandle` erases the cell type so heterogeneous columns can live in one
//! map; the typed cache underneath is selected once at configuration.

use std::collections::VecDeque;

use crate::cell::{ Cell, CellValue, ColumnType };
use crate::constants::{ DEFAULT_LANE_CAPACITY, NO_ENTRY };
use crate::error::Result;
use crate::lane::SlotLanes;
use crate::reader::ColumnReader;
use crate::{ config_error, range_error };
use crate::{ EntryIndex, Slot };

struct CacheLane<T> {
    buffer: VecDeque<T>,
    first_entry: EntryIndex,
    reader: Option<Box<dyn ColumnReader>>,
}

impl<T> CacheLane<T> {
    fn new(reader: Option<Box<dyn ColumnReader>>) -> Self {
        Self {
            buffer: VecDeque::new(),
            first_entry: NO_ENTRY,
            reader,
        }
    }
}

/// Per-slot sliding buffer of decoded values of type `T`
pub struct ColumnCache<T: Cell> {
    lanes: SlotLanes<CacheLane<T>>,
}

impl<T: Cell> ColumnCache<T> {
    /// Create a cache whose values are pushed out-of-band via `load_value`
    pub fn new(n_slots: usize) -> Self {
        Self {
            lanes: SlotLanes::new(n_slots, |_| CacheLane::new(None)),
        }
    }

    /// Create a cache that re-fills itself from one upstream reader per slot
    pub fn with_readers(readers: Vec<Box<dyn ColumnReader>>) -> Self {
        let mut readers = readers.into_iter();

        Self {
            lanes: SlotLanes::new(readers.len(), |_| CacheLane::new(readers.next())),
        }
    }

    pub fn n_slots(&self) -> usize {
        self.lanes.len()
    }

    /// Empty the slot's buffer and set the entry index of the next stored value
    pub fn init_slot(&self, slot: Slot, start_entry: EntryIndex) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;

        lane.buffer.clear();
        lane.buffer.reserve(DEFAULT_LANE_CAPACITY);
        lane.first_entry = start_entry;

        Ok(())
    }

    /// Drop the slot's buffered values at the end of a task
    pub fn finalise_slot(&self, slot: Slot) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;

        lane.buffer.clear();
        lane.first_entry = NO_ENTRY;

        Ok(())
    }

    /// The value stored for `entry`.
    ///
    /// Defined iff `entry` lies in `stored_range(slot)`; anything else is a
    /// range error.
    pub fn value(&self, slot: Slot, entry: EntryIndex) -> Result<T> {
        let lane = self.lanes.lane(slot)?;
        let index = entry - lane.first_entry;

        if index < 0 || index as usize >= lane.buffer.len() {
            return Err(
                range_error!(
                    "entry {} outside cached range [{}, {})",
                    entry,
                    lane.first_entry,
                    lane.first_entry + (lane.buffer.len() as i64)
                )
            );
        }

        Ok(lane.buffer[index as usize].clone())
    }

    /// Append the value the upstream reader yields for `source_entry`.
    ///
    /// Requires a configured reader; appends exactly one element and leaves
    /// `first_entry` untouched.
    pub fn load(&self, slot: Slot, source_entry: EntryIndex) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;
        let lane = &mut *lane;

        let reader = lane.reader
            .as_mut()
            .ok_or_else(|| config_error!("cache has no upstream reader for slot {}", slot))?;

        let value = T::from_value(reader.get(source_entry)?)?;
        lane.buffer.push_back(value);

        Ok(())
    }

    /// Append a value produced out-of-band
    pub fn load_value(&self, slot: Slot, value: T) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;
        lane.buffer.push_back(value);

        Ok(())
    }

    /// Drop the front of the buffer while its entry index is `<= entry`.
    ///
    /// Afterwards `first_entry > entry`; draining the whole buffer without
    /// getting past `entry` is a range error.
    pub fn purge_till(&self, slot: Slot, entry: EntryIndex) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;

        while !lane.buffer.is_empty() && lane.first_entry <= entry {
            lane.buffer.pop_front();
            lane.first_entry += 1;
        }

        if lane.first_entry <= entry {
            return Err(
                range_error!(
                    "cannot purge past entry {}: cache drained at entry {}",
                    entry,
                    lane.first_entry
                )
            );
        }

        Ok(())
    }

    /// The half-open entry interval currently stored for `slot`
    pub fn stored_range(&self, slot: Slot) -> Result<(EntryIndex, EntryIndex)> {
        let lane = self.lanes.lane(slot)?;

        Ok((lane.first_entry, lane.first_entry + (lane.buffer.len() as i64)))
    }
}

/// Dispatch a `CacheHandle` onto the typed cache it wraps
macro_rules! with_cache {
    ($handle:expr, $cache:ident => $body:expr) => {
        match $handle {
            CacheHandle::Bool($cache) => $body,
            CacheHandle::Int64($cache) => $body,
            CacheHandle::Float64($cache) => $body,
            CacheHandle::Text($cache) => $body,
        }
    };
}

/// Type-erased handle over a `ColumnCache<T>`.
///
/// The variant is fixed at configuration time by the column's static type;
/// values cross this seam as tagged `CellValue`s.
pub enum CacheHandle {
    Bool(ColumnCache<bool>),
    Int64(ColumnCache<i64>),
    Float64(ColumnCache<f64>),
    Text(ColumnCache<String>),
}

impl CacheHandle {
    /// Create a reader-less cache of the given column type
    pub fn new(column_type: ColumnType, n_slots: usize) -> Self {
        match column_type {
            ColumnType::Bool => CacheHandle::Bool(ColumnCache::new(n_slots)),
            ColumnType::Int64 => CacheHandle::Int64(ColumnCache::new(n_slots)),
            ColumnType::Float64 => CacheHandle::Float64(ColumnCache::new(n_slots)),
            ColumnType::Text => CacheHandle::Text(ColumnCache::new(n_slots)),
        }
    }

    /// Create a reader-backed cache of the given column type, one reader per slot
    pub fn with_readers(column_type: ColumnType, readers: Vec<Box<dyn ColumnReader>>) -> Self {
        match column_type {
            ColumnType::Bool => CacheHandle::Bool(ColumnCache::with_readers(readers)),
            ColumnType::Int64 => CacheHandle::Int64(ColumnCache::with_readers(readers)),
            ColumnType::Float64 => CacheHandle::Float64(ColumnCache::with_readers(readers)),
            ColumnType::Text => CacheHandle::Text(ColumnCache::with_readers(readers)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            CacheHandle::Bool(_) => ColumnType::Bool,
            CacheHandle::Int64(_) => ColumnType::Int64,
            CacheHandle::Float64(_) => ColumnType::Float64,
            CacheHandle::Text(_) => ColumnType::Text,
        }
    }

    pub fn n_slots(&self) -> usize {
        with_cache!(self, cache => cache.n_slots())
    }

    pub fn init_slot(&self, slot: Slot, start_entry: EntryIndex) -> Result<()> {
        with_cache!(self, cache => cache.init_slot(slot, start_entry))
    }

    pub fn finalise_slot(&self, slot: Slot) -> Result<()> {
        with_cache!(self, cache => cache.finalise_slot(slot))
    }

    pub fn value(&self, slot: Slot, entry: EntryIndex) -> Result<CellValue> {
        with_cache!(self, cache => Ok(cache.value(slot, entry)?.into_value()))
    }

    pub fn load(&self, slot: Slot, source_entry: EntryIndex) -> Result<()> {
        with_cache!(self, cache => cache.load(slot, source_entry))
    }

    pub fn load_value(&self, slot: Slot, value: CellValue) -> Result<()> {
        match self {
            CacheHandle::Bool(cache) => cache.load_value(slot, Cell::from_value(value)?),
            CacheHandle::Int64(cache) => cache.load_value(slot, Cell::from_value(value)?),
            CacheHandle::Float64(cache) => cache.load_value(slot, Cell::from_value(value)?),
            CacheHandle::Text(cache) => cache.load_value(slot, Cell::from_value(value)?),
        }
    }

    pub fn purge_till(&self, slot: Slot, entry: EntryIndex) -> Result<()> {
        with_cache!(self, cache => cache.purge_till(slot, entry))
    }

    pub fn stored_range(&self, slot: Slot) -> Result<(EntryIndex, EntryIndex)> {
        with_cache!(self, cache => cache.stored_range(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

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

    fn reader_cache(values: Vec<i64>) -> ColumnCache<i64> {
        ColumnCache::with_readers(vec![Box::new(VecReader(values)) as Box<dyn ColumnReader>])
    }

    #[test]
    fn test_load_and_get() {
        let cache = reader_cache(vec![10, 20, 30]);
        cache.init_slot(0, 0).unwrap();

        cache.load(0, 0).unwrap();
        cache.load(0, 1).unwrap();
        cache.load(0, 2).unwrap();

        assert_eq!(cache.stored_range(0).unwrap(), (0, 3));
        assert_eq!(cache.value(0, 0).unwrap(), 10);
        assert_eq!(cache.value(0, 2).unwrap(), 30);
    }

    #[test]
    fn test_get_outside_range_fails() {
        let cache = ColumnCache::<i64>::new(1);
        cache.init_slot(0, 5).unwrap();
        cache.load_value(0, 1).unwrap();

        assert!(cache.value(0, 4).unwrap_err().is_range());
        assert!(cache.value(0, 6).unwrap_err().is_range());
        assert_eq!(cache.value(0, 5).unwrap(), 1);
    }

    #[test]
    fn test_purge_advances_first_entry() {
        let cache = ColumnCache::<i64>::new(1);
        cache.init_slot(0, 10).unwrap();
        for v in 0..5 {
            cache.load_value(0, v).unwrap();
        }

        cache.purge_till(0, 11).unwrap();
        assert_eq!(cache.stored_range(0).unwrap(), (12, 15));
        assert!(cache.value(0, 11).unwrap_err().is_range());
        assert_eq!(cache.value(0, 12).unwrap(), 2);
    }

    #[test]
    fn test_purge_before_front_is_noop() {
        let cache = ColumnCache::<i64>::new(1);
        cache.init_slot(0, 0).unwrap();
        cache.load_value(0, 7).unwrap();

        cache.purge_till(0, -1).unwrap();
        assert_eq!(cache.stored_range(0).unwrap(), (0, 1));
    }

    #[test]
    fn test_purge_past_content_fails() {
        let cache = ColumnCache::<i64>::new(1);
        cache.init_slot(0, 0).unwrap();
        cache.load_value(0, 7).unwrap();

        assert!(cache.purge_till(0, 3).unwrap_err().is_range());
    }

    #[test]
    fn test_init_finalise_round_trip() {
        let cache = ColumnCache::<i64>::new(2);

        cache.init_slot(0, 3).unwrap();
        cache.load_value(0, 1).unwrap();
        cache.finalise_slot(0).unwrap();

        // a fresh init observes the same state as a never-used slot
        cache.init_slot(0, 3).unwrap();
        assert_eq!(cache.stored_range(0).unwrap(), (3, 3));
    }

    #[test]
    fn test_slots_are_independent() {
        let cache = ColumnCache::<i64>::new(2);
        cache.init_slot(0, 0).unwrap();
        cache.init_slot(1, 100).unwrap();

        cache.load_value(0, 1).unwrap();
        cache.load_value(1, 2).unwrap();

        assert_eq!(cache.stored_range(0).unwrap(), (0, 1));
        assert_eq!(cache.stored_range(1).unwrap(), (100, 101));
        assert_eq!(cache.value(1, 100).unwrap(), 2);
    }

    #[test]
    fn test_load_without_reader_fails() {
        let cache = ColumnCache::<i64>::new(1);
        cache.init_slot(0, 0).unwrap();

        assert!(cache.load(0, 0).unwrap_err().is_config());
    }

    #[test]
    fn test_bool_cache_addressing() {
        let cache = ColumnCache::<bool>::new(1);
        cache.init_slot(0, 0).unwrap();
        for v in [true, false, true] {
            cache.load_value(0, v).unwrap();
        }

        assert_eq!(cache.value(0, 1).unwrap(), false);
        cache.purge_till(0, 0).unwrap();
        assert_eq!(cache.value(0, 1).unwrap(), false);
        assert_eq!(cache.stored_range(0).unwrap(), (1, 3));
    }

    #[test]
    fn test_handle_dispatch_and_type_check() {
        let handle = CacheHandle::new(ColumnType::Float64, 1);
        handle.init_slot(0, 0).unwrap();
        handle.load_value(0, CellValue::Float64(1.5)).unwrap();

        assert_eq!(handle.column_type(), ColumnType::Float64);
        assert_eq!(handle.value(0, 0).unwrap(), CellValue::Float64(1.5));
        assert!(handle.load_value(0, CellValue::Bool(true)).unwrap_err().is_config());
    }

    proptest! {
        #[test]
        fn prop_loads_extend_stored_range(start in -100i64..100, values in proptest::collection::vec(any::<i64>(), 0..64)) {
            let cache = ColumnCache::<i64>::new(1);
            cache.init_slot(0, start).unwrap();

            for v in &values {
                cache.load_value(0, *v).unwrap();
            }

            prop_assert_eq!(cache.stored_range(0).unwrap(), (start, start + (values.len() as i64)));
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(cache.value(0, start + (i as i64)).unwrap(), *v);
            }
        }

        #[test]
        fn prop_purge_leaves_front_past_target(start in -50i64..50, len in 1usize..48, offset in 0usize..48) {
            let cache = ColumnCache::<i64>::new(1);
            cache.init_slot(0, start).unwrap();
            for v in 0..len {
                cache.load_value(0, v as i64).unwrap();
            }

            let target = start + (offset as i64);

            if offset < len {
                cache.purge_till(0, target).unwrap();
                let (lo, hi) = cache.stored_range(0).unwrap();
                prop_assert!(lo > target);
                prop_assert_eq!(lo, target + 1);
                prop_assert_eq!(hi, start + (len as i64));
            } else {
                prop_assert!(cache.purge_till(0, target).unwrap_err().is_range());
            }
        }
    }
}
