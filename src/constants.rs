//! Tuning constants and defaults used throughout the windrow library.

/// Cache line size for alignment checks (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

/// Sentinel entry index meaning "no entry processed yet for this slot"
pub const NO_ENTRY: i64 = -1;

/// Default number of elements a cache lane buffer reserves up front.
///
/// A window of `(L, R)` only ever holds `R - L + 1` live elements once the
/// scan is in steady state, so this covers typical windows without a regrow.
pub const DEFAULT_LANE_CAPACITY: usize = 64;

/// Default number of processing slots: one per available core
pub fn default_slot_count() -> usize {
    num_cpus::get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_slot_count_is_positive() {
        assert!(default_slot_count() >= 1);
    }
}
