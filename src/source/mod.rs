//! Data sources and the contract they present to the event loop.
//!
//! A data source is driven by an external loop manager through a fixed
//! protocol: `set_n_slots`, `initialise`, then per event loop
//! `get_entry_ranges` followed per slot by `init_slot`, a monotonically
//! increasing run of `set_entry` calls, and `finalise_slot`, and finally
//! `finalise`. An empty range list terminates iteration; `set_entry`
//! returning `Ok(false)` reports upstream exhaustion for one slot.
//!
//! ## Module Organization
//!
//! - `proxy` - upstream shapes and the shared iteration core
//! - `moving` - windowed sliding-cache source
//! - `resample` - time-grid resampling source

pub mod moving;
pub mod proxy;
pub mod resample;

pub use moving::{ MovingCacheSource, MovingCacheSourceBuilder };
pub use proxy::{ ProxySource, Upstream };
pub use resample::{ ResampleGrid, ResampleSource, ResampleSourceBuilder, TimeCell };

use serde::{ Deserialize, Serialize };

use crate::cell::ColumnType;
use crate::config_error;
use crate::error::Result;
use crate::reader::ColumnReader;
use crate::{ EntryIndex, Slot };

/// Half-open interval `[first, last)` of entry indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRange {
    pub first: EntryIndex,
    pub last: EntryIndex,
}

impl EntryRange {
    pub fn new(first: EntryIndex, last: EntryIndex) -> Self {
        Self { first, last }
    }

    pub fn len(&self) -> i64 {
        (self.last - self.first).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.last <= self.first
    }

    /// Compress the range by the window's reach at both ends, so that every
    /// remaining entry can see `window.left..=window.right` neighbours inside
    /// the original range. Collapses to an empty range rather than inverting.
    pub fn shrunk(&self, window: Window) -> EntryRange {
        let first = self.first - window.left;
        let last = self.last - window.right;

        EntryRange::new(first, last.max(first))
    }
}

/// Lookbehind/lookahead demand `(left, right)` with `left <= 0 <= right`.
///
/// A consumer registering `Window::new(-2, 3)` asks that every published
/// entry `e` come with cached neighbours at `e - 2 ..= e + 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub left: i64,
    pub right: i64,
}

impl Window {
    pub fn new(left: i64, right: i64) -> Result<Self> {
        if left > 0 || right < 0 {
            return Err(config_error!("window ({}, {}) must satisfy left <= 0 <= right", left, right));
        }

        Ok(Self { left, right })
    }

    /// Widen to cover both demands
    pub fn widen(&mut self, other: Window) {
        self.left = self.left.min(other.left);
        self.right = self.right.max(other.right);
    }

    /// Number of entries a fully populated window spans
    pub fn span(&self) -> i64 {
        self.right - self.left + 1
    }
}

impl Default for Window {
    fn default() -> Self {
        Self { left: 0, right: 0 }
    }
}

/// Per-slot filter chain run by the external loop manager.
///
/// The chain must be lock-free per slot; the proxy calls `run_and_check`
/// whenever it advances the upstream iterator and `accepts` to decide whether
/// the row enters the caches.
pub trait FilterChain: Send + Sync {
    /// Per-slot bootstrap at the start of a task
    fn init_slot(&self, _slot: Slot) {}

    /// Run the upstream node chain for a freshly loaded source entry
    fn run_and_check(&self, _slot: Slot, _entry: EntryIndex) {}

    /// Whether the chain accepts the source entry
    fn accepts(&self, _slot: Slot, _entry: EntryIndex) -> bool {
        true
    }

    /// Per-slot cleanup at the end of a task
    fn finalise_slot(&self, _slot: Slot) {}
}

/// Filter chain that accepts every source row
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl FilterChain for AcceptAll {}

/// The contract a data source presents to the loop manager
pub trait DataSource: Send + Sync {
    /// Short name used in diagnostics
    fn label(&self) -> &str {
        "DataSource"
    }

    /// Agree on the loop manager's slot count; mismatch is a configuration error
    fn set_n_slots(&self, n_slots: usize) -> Result<()>;

    fn initialise(&self) -> Result<()> {
        Ok(())
    }

    /// Per-slot entry ranges for the next round of tasks.
    ///
    /// May be called once (one-shot sources) or repeatedly (delegating
    /// sources); an empty result terminates iteration.
    fn get_entry_ranges(&self) -> Result<Vec<EntryRange>>;

    fn init_slot(&self, slot: Slot, first_entry: EntryIndex) -> Result<()>;

    /// Advance the slot to `entry`; `Ok(false)` reports upstream exhaustion
    fn set_entry(&self, slot: Slot, entry: EntryIndex) -> Result<bool>;

    fn finalise_slot(&self, slot: Slot) -> Result<()>;

    fn finalise(&self) -> Result<()> {
        Ok(())
    }

    /// A fresh reader for `name` bound to `slot`
    fn get_column_readers(
        &self,
        slot: Slot,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>>;

    fn has_column(&self, name: &str) -> bool;

    fn get_type_name(&self, name: &str) -> Result<ColumnType>;

    fn column_names(&self) -> Vec<String>;
}
