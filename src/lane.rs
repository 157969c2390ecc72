//! Per-slot state lanes.
//!
//! All mutable per-slot state in this crate lives in a `SlotLanes<T>`: one lane
//! per processing slot, each padded to its own cache line so that slots never
//! share a line (false-sharing separation is a correctness-for-performance
//! property here, not a micro-optimisation). A lane is guarded by a `Mutex`
//! that is uncontended by contract: the core is never invoked concurrently for
//! the same slot, so the lock only ever pays its uncontended fast path.

use std::mem;

use crossbeam::utils::CachePadded;
use parking_lot::{ Mutex, MutexGuard };
use static_assertions::const_assert;

use crate::config_error;
use crate::constants::CACHE_LINE_SIZE;
use crate::error::Result;

// A lane must span at least one full cache line of its own.
const_assert!(mem::align_of::<CachePadded<Mutex<i64>>>() >= CACHE_LINE_SIZE);

/// Cache-line separated per-slot lanes
pub struct SlotLanes<T> {
    lanes: Box<[CachePadded<Mutex<T>>]>,
}

impl<T> SlotLanes<T> {
    /// Create one lane per slot, initialised by `init(slot)`
    pub fn new(n_slots: usize, mut init: impl FnMut(usize) -> T) -> Self {
        let lanes = (0..n_slots)
            .map(|slot| CachePadded::new(Mutex::new(init(slot))))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self { lanes }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Lock the lane of `slot`, failing on an out-of-range slot index
    pub fn lane(&self, slot: usize) -> Result<MutexGuard<'_, T>> {
        let lane = self.lanes
            .get(slot)
            .ok_or_else(|| config_error!("slot {} out of range (0..{})", slot, self.lanes.len()))?;

        Ok(lane.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_init_and_access() {
        let lanes = SlotLanes::new(4, |slot| (slot as i64) * 10);

        assert_eq!(lanes.len(), 4);
        assert_eq!(*lanes.lane(2).unwrap(), 20);

        *lanes.lane(2).unwrap() += 1;
        assert_eq!(*lanes.lane(2).unwrap(), 21);
    }

    #[test]
    fn test_slot_out_of_range() {
        let lanes = SlotLanes::new(2, |_| 0u8);
        assert!(lanes.lane(2).unwrap_err().is_config());
    }

    #[test]
    fn test_lanes_do_not_share_cache_lines() {
        assert!(mem::size_of::<CachePadded<Mutex<i64>>>() >= CACHE_LINE_SIZE);
    }

    #[test]
    fn test_parallel_slot_access() {
        let lanes = SlotLanes::new(4, |_| 0i64);

        std::thread::scope(|scope| {
            for slot in 0..4 {
                let lanes = &lanes;
                scope.spawn(move || {
                    for _ in 0..1000 {
                        *lanes.lane(slot).unwrap() += 1;
                    }
                });
            }
        });

        for slot in 0..4 {
            assert_eq!(*lanes.lane(slot).unwrap(), 1000);
        }
    }
}
