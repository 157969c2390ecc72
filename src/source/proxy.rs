//! Upstream shapes and the shared iteration core.
//!
//! `ProxySource` unifies the three shapes a caching source can sit on top of:
//! a (possibly segmented) table, another data source driven through its own
//! contract, and an enumerated empty source. Subsources see the shape through
//! two seams only: the natural per-slot `source_ranges` of the underlying
//! data, and `load_entry`, which advances the shape's iterator for one slot
//! and then runs the external filter chain for the freshly loaded row.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config_error;
use crate::error::Result;
use crate::source::{ DataSource, EntryRange, FilterChain };
use crate::table::MemTable;
use crate::{ EntryIndex, Slot };

/// The shape of the data underneath a proxy source
pub enum Upstream {
    /// A (possibly segmented) in-memory table; one natural range per segment
    Table(Arc<MemTable>),
    /// Another data source; ranges and row validity are delegated to it
    Source(Arc<dyn DataSource>),
    /// An enumerated source of N rows with no columns of its own, split into
    /// slot-equal ranges
    Empty(i64),
}

impl Upstream {
    fn shape_name(&self) -> &'static str {
        match self {
            Upstream::Table(_) => "table",
            Upstream::Source(_) => "source",
            Upstream::Empty(_) => "empty",
        }
    }
}

/// Shared iteration core for proxy data sources
pub struct ProxySource {
    n_slots: usize,
    upstream: Upstream,
    filters: Arc<dyn FilterChain>,
    source_ranges: Vec<EntryRange>,
}

impl fmt::Debug for ProxySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySource").finish()
    }
}

impl ProxySource {
    pub fn new(upstream: Upstream, filters: Arc<dyn FilterChain>, n_slots: usize) -> Result<Self> {
        if n_slots == 0 {
            return Err(config_error!("slot count must be at least 1"));
        }

        let source_ranges = match &upstream {
            Upstream::Table(table) => table.segments().to_vec(),
            Upstream::Source(source) => {
                source.set_n_slots(n_slots)?;
                // the delegating shape publishes its own ranges, possibly
                // several rounds of them
                Vec::new()
            }
            Upstream::Empty(n_entries) => {
                if *n_entries < 0 {
                    return Err(config_error!("empty source cannot have {} entries", n_entries));
                }
                Self::split_evenly(*n_entries, n_slots)
            }
        };

        debug!(
            shape = upstream.shape_name(),
            n_slots,
            n_ranges = source_ranges.len(),
            "proxy source configured"
        );

        Ok(Self {
            n_slots,
            upstream,
            filters,
            source_ranges,
        })
    }

    fn split_evenly(n_entries: i64, n_slots: usize) -> Vec<EntryRange> {
        let n_slots = n_slots as i64;

        (0..n_slots)
            .map(|slot| {
                EntryRange::new((slot * n_entries) / n_slots, ((slot + 1) * n_entries) / n_slots)
            })
            .collect()
    }

    pub fn n_slots(&self) -> usize {
        self.n_slots
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn filters(&self) -> &Arc<dyn FilterChain> {
        &self.filters
    }

    /// The natural per-slot ranges of the underlying source; empty for the
    /// delegating shape
    pub fn source_ranges(&self) -> &[EntryRange] {
        &self.source_ranges
    }

    /// Total number of rows underneath, when the shape knows it statically
    pub fn n_source_entries(&self) -> Option<i64> {
        match &self.upstream {
            Upstream::Table(table) => Some(table.n_entries()),
            Upstream::Source(_) => None,
            Upstream::Empty(n_entries) => Some(*n_entries),
        }
    }

    /// Advance the underlying iterator of `slot` to `source_entry`, then run
    /// the upstream filter chain for it.
    ///
    /// `Ok(false)` reports that the shape has no row at `source_entry`.
    pub(crate) fn load_entry(&self, slot: Slot, source_entry: EntryIndex) -> Result<bool> {
        match &self.upstream {
            Upstream::Table(table) => {
                if source_entry < 0 || source_entry >= table.n_entries() {
                    return Ok(false);
                }
            }
            Upstream::Source(source) => {
                if !source.set_entry(slot, source_entry)? {
                    return Ok(false);
                }
            }
            Upstream::Empty(n_entries) => {
                if source_entry < 0 || source_entry >= *n_entries {
                    return Ok(false);
                }
            }
        }

        self.filters.run_and_check(slot, source_entry);

        Ok(true)
    }

    pub(crate) fn initialise_base(&self) -> Result<()> {
        if let Upstream::Source(source) = &self.upstream {
            source.initialise()?;
        }

        Ok(())
    }

    pub(crate) fn init_slot_base(&self, slot: Slot, first_entry: EntryIndex) -> Result<()> {
        self.filters.init_slot(slot);

        if let Upstream::Source(source) = &self.upstream {
            source.init_slot(slot, first_entry)?;
        }

        Ok(())
    }

    pub(crate) fn finalise_slot_base(&self, slot: Slot) -> Result<()> {
        self.filters.finalise_slot(slot);

        if let Upstream::Source(source) = &self.upstream {
            source.finalise_slot(slot)?;
        }

        Ok(())
    }

    pub(crate) fn finalise_base(&self) -> Result<()> {
        if let Upstream::Source(source) = &self.upstream {
            source.finalise()?;
        }

        Ok(())
    }

    /// One round of ranges from the delegating shape, `None` otherwise
    pub(crate) fn delegated_ranges(&self) -> Option<Result<Vec<EntryRange>>> {
        match &self.upstream {
            Upstream::Source(source) => Some(source.get_entry_ranges()),
            _ => None,
        }
    }
}
