//! windrow - sliding per-column caches and grid resampling for slot-parallel
//! columnar scans
//!
//! Computations over a columnar entry stream often need, for each entry `e`,
//! a *window* of neighbouring entries `[e + L, e + R]`, or a projection of an
//! irregular time series onto a fixed grid. Rereading the upstream source per
//! window is prohibitive and holding the whole input in memory impossible, so
//! windrow keeps, per processing slot and per column, a bounded FIFO of
//! decoded values whose contents always cover the window of the current scan
//! position, while the scan itself only ever moves forward.
//!
//! ## Key properties
//!
//! - **Slot-parallel**: every slot owns disjoint iteration state; per-slot
//!   lanes are cache-line separated so slots never share a line
//! - **Forward-monotonic**: backward motion is a checked error at every
//!   public seam, never a silent misread
//! - **Filter-aware**: rows enter the caches only after the external filter
//!   chain accepts them; the published entry axis counts accepted rows
//! - **Bounded**: a window of `(L, R)` holds at most `R - L + 1` live values
//!   per column and slot once the scan is in steady state

pub mod cache;
pub mod cell;
pub mod constants;
pub mod define;
pub mod error;
pub mod lane;
pub mod reader;
pub mod source;
pub mod table;

// Re-export main components
pub use cache::{ CacheHandle, ColumnCache };
pub use cell::{ Cell, CellValue, ColumnType };
pub use define::{ ColumnRegister, Define, DefineReader, PersistentDefine, ReaderProvider };
pub use error::{ Result, WindrowError };
pub use reader::{ CacheReader, ColumnReader, RemappingReader };
pub use source::{
    AcceptAll,
    DataSource,
    EntryRange,
    FilterChain,
    MovingCacheSource,
    ProxySource,
    ResampleGrid,
    ResampleSource,
    TimeCell,
    Upstream,
    Window,
};
pub use table::{ MemTable, MemTableBuilder, TableSource };

/// Absolute row identifier in an entry stream
pub type EntryIndex = i64;

/// Index of an independent parallel worker
pub type Slot = usize;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windowed_scan_end_to_end() {
        let table = MemTable::builder()
            .column_f64("price", vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .build()
            .unwrap();

        let source = MovingCacheSource::builder(Upstream::Table(table))
            .with_n_slots(1)
            .with_column("price", ColumnType::Float64)
            .with_window(-1, 1)
            .unwrap()
            .build()
            .unwrap();

        source.initialise().unwrap();
        let ranges = source.get_entry_ranges().unwrap();
        assert_eq!(ranges, vec![EntryRange::new(1, 4)]);

        source.init_slot(0, 1).unwrap();
        let mut reader = source.get_column_readers(0, "price", ColumnType::Float64).unwrap();

        let mut centered_sums = Vec::new();
        for entry in ranges[0].first..ranges[0].last {
            assert!(source.set_entry(0, entry).unwrap());

            let sum: f64 = (-1..=1)
                .map(|k| reader.get(entry + k).unwrap().as_f64().unwrap())
                .sum();
            centered_sums.push(sum);
        }

        assert_eq!(centered_sums, vec![6.0, 9.0, 12.0]);
    }

    #[test]
    fn test_resampled_scan_end_to_end() {
        let table = MemTable::builder()
            .column_f64("t", vec![0.0, 0.9])
            .column_f64("price", vec![10.0, 20.0])
            .build()
            .unwrap();

        let source = ResampleSource::builder(Upstream::Table(table))
            .with_n_slots(1)
            .with_column("t", ColumnType::Float64)
            .with_column("price", ColumnType::Float64)
            .with_time_column("t")
            .with_grid(0.0, 1.5, 0.5)
            .unwrap()
            .build()
            .unwrap();

        source.initialise().unwrap();
        let ranges = source.get_entry_ranges().unwrap();
        assert_eq!(ranges, vec![EntryRange::new(0, 4)]);

        source.init_slot(0, 0).unwrap();
        let mut prices = source.get_column_readers(0, "price", ColumnType::Float64).unwrap();

        let mut held = Vec::new();
        for entry in 0..4 {
            assert!(source.set_entry(0, entry).unwrap());
            held.push(prices.get(entry).unwrap().as_f64().unwrap());
        }

        assert_eq!(held, vec![10.0, 10.0, 20.0, 20.0]);
    }
}
