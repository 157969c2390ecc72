//! Time-grid resampling data source.
//!
//! `ResampleSource` projects an irregular time series onto the uniform grid
//! `{t0, t0 + step, ..., t1}` with last-known-value hold: the sample reported
//! at a grid point is the most recent accepted source row whose time is not
//! later than that grid point. Downstream, the entry axis *is* the grid index
//! axis; a per-slot mapping from grid index to cached source row backs the
//! column readers, and a separate cache holds the emitted grid times.
//!
//! The boundary is strict: a row is held *at* its own timestamp, and a grid
//! point between two rows always reports the earlier one, never an
//! interpolation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::cache::CacheHandle;
use crate::cell::{ Cell, ColumnType };
use crate::config_error;
use crate::constants::NO_ENTRY;
use crate::define::ColumnRegister;
use crate::error::{ Result, WindrowError };
use crate::lane::SlotLanes;
use crate::range_error;
use crate::reader::{ CacheReader, ColumnReader, RemappingReader };
use crate::source::moving::{ MovingCacheSource, MovingCacheSourceBuilder };
use crate::source::proxy::Upstream;
use crate::source::{ DataSource, EntryRange, FilterChain, Window };
use crate::{ EntryIndex, Slot };

/// A cell type usable as the time axis of a resample grid
pub trait TimeCell: Cell + Copy + PartialOrd + fmt::Display {
    /// Check that `(from, to, step)` describes a finite, forward grid
    fn validate_grid(from: Self, to: Self, step: Self) -> Result<()>;

    /// Index of the last grid point at or before `self`
    fn snapshot_index(self, from: Self, step: Self) -> EntryIndex;

    /// The time of grid point `index`
    fn grid_time(from: Self, step: Self, index: EntryIndex) -> Self;
}

impl TimeCell for f64 {
    fn validate_grid(from: Self, to: Self, step: Self) -> Result<()> {
        if !from.is_finite() || !to.is_finite() || !step.is_finite() {
            return Err(config_error!("resample grid bounds must be finite"));
        }
        if step <= 0.0 {
            return Err(config_error!("resample step {} must be positive", step));
        }
        if from > to {
            return Err(config_error!("resample grid runs backwards: {} > {}", from, to));
        }

        Ok(())
    }

    fn snapshot_index(self, from: Self, step: Self) -> EntryIndex {
        ((self - from) / step).floor() as EntryIndex
    }

    fn grid_time(from: Self, step: Self, index: EntryIndex) -> Self {
        from + step * (index as f64)
    }
}

impl TimeCell for i64 {
    fn validate_grid(from: Self, to: Self, step: Self) -> Result<()> {
        if step <= 0 {
            return Err(config_error!("resample step {} must be positive", step));
        }
        if from > to {
            return Err(config_error!("resample grid runs backwards: {} > {}", from, to));
        }

        Ok(())
    }

    fn snapshot_index(self, from: Self, step: Self) -> EntryIndex {
        (self - from).div_euclid(step)
    }

    fn grid_time(from: Self, step: Self, index: EntryIndex) -> Self {
        from + step * index
    }
}

/// The uniform output grid `{from, from + step, ..., to}`, bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResampleGrid<T: TimeCell> {
    from: T,
    to: T,
    step: T,
}

impl<T: TimeCell> ResampleGrid<T> {
    pub fn new(from: T, to: T, step: T) -> Result<Self> {
        T::validate_grid(from, to, step)?;

        Ok(Self { from, to, step })
    }

    pub fn from(&self) -> T {
        self.from
    }

    pub fn to(&self) -> T {
        self.to
    }

    pub fn step(&self) -> T {
        self.step
    }

    /// Number of grid points
    pub fn len(&self) -> i64 {
        self.to.snapshot_index(self.from, self.step) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The time of grid point `index`
    pub fn time_at(&self, index: EntryIndex) -> T {
        T::grid_time(self.from, self.step, index)
    }

    /// Index of the last grid point at or before `time`
    pub fn index_of(&self, time: T) -> EntryIndex {
        time.snapshot_index(self.from, self.step)
    }
}

struct ResampleLane {
    /// Grid index -> cached source row holding its value; populated lazily
    /// and monotonically, pruned once the window has moved past a key
    indices: BTreeMap<EntryIndex, EntryIndex>,
    /// Highest grid index with a recorded mapping
    last_stored: EntryIndex,
    /// First entry of the slot's upstream source range
    source_first: EntryIndex,
}

struct ResampleShared {
    lanes: SlotLanes<ResampleLane>,
}

/// Time-grid resampler over a sliding-cache source
pub struct ResampleSource<T: TimeCell> {
    moving: MovingCacheSource,
    time_column: String,
    grid: ResampleGrid<T>,
    snapshot_times: Arc<CacheHandle>,
    shared: Arc<ResampleShared>,
}

impl<T: TimeCell> fmt::Debug for ResampleSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResampleSource").finish()
    }
}

impl<T: TimeCell> ResampleSource<T> {
    pub fn builder(upstream: Upstream) -> ResampleSourceBuilder<T> {
        ResampleSourceBuilder {
            inner: MovingCacheSource::builder(upstream),
            time_column: None,
            grid: None,
        }
    }

    pub fn grid(&self) -> &ResampleGrid<T> {
        &self.grid
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    pub fn n_slots(&self) -> usize {
        self.moving.n_slots()
    }

    /// Widen the window to also cover `window`; offsets apply on the grid axis
    pub fn add_entry_offset_limit(&self, window: Window) {
        self.moving.add_entry_offset_limit(window);
    }

    /// The widest window registered so far
    pub fn entry_offset_limit(&self) -> Window {
        self.moving.entry_offset_limit()
    }

    /// Upstream per-slot ranges for the starting round, depending on shape
    fn upstream_ranges(&self, first_round: bool) -> Result<Vec<EntryRange>> {
        match self.moving.proxy.delegated_ranges() {
            Some(ranges) => ranges,
            None if first_round => Ok(self.moving.proxy.source_ranges().to_vec()),
            None => Ok(Vec::new()),
        }
    }
}

impl<T: TimeCell> DataSource for ResampleSource<T> {
    fn label(&self) -> &str {
        "ResampleSource"
    }

    fn set_n_slots(&self, n_slots: usize) -> Result<()> {
        self.moving.set_n_slots(n_slots)
    }

    fn initialise(&self) -> Result<()> {
        self.moving.initialise()
    }

    fn get_entry_ranges(&self) -> Result<Vec<EntryRange>> {
        let n_slots = self.moving.n_slots();
        let mut state = self.moving.ranges.lock();

        let first_round = state.rounds == 0;
        let source_ranges = self.upstream_ranges(first_round)?;

        let published = if first_round {
            vec![EntryRange::new(0, self.grid.len())]
        } else {
            Vec::new()
        };

        // the loop manager does not hand `init_slot` the grid-axis offsets the
        // caches need, so slot state is initialised here, range-publication time
        if !published.is_empty() {
            if published.len() != n_slots {
                return Err(
                    config_error!(
                        "resampler publishes {} range(s) for {} slots",
                        published.len(),
                        n_slots
                    )
                );
            }

            for slot in 0..n_slots {
                let source_range = source_ranges
                    .get(slot)
                    .copied()
                    .ok_or_else(|| {
                        config_error!("upstream published {} ranges for {} slots", source_ranges.len(), n_slots)
                    })?;

                {
                    let mut lane = self.moving.progress.lane(slot)?;
                    lane.slot_range = source_range;
                    lane.source_loaded = source_range.first - 1;
                    lane.published = source_range.first - 1;
                }

                for cache in self.moving.caches.values() {
                    cache.init_slot(slot, source_range.first)?;
                }

                self.snapshot_times.init_slot(slot, published[slot].first)?;

                let mut lane = self.shared.lanes.lane(slot)?;
                lane.indices.clear();
                lane.last_stored = NO_ENTRY;
                lane.source_first = source_range.first;
            }
        }

        state.published = published.clone();
        state.rounds += 1;

        debug!(
            source = self.label(),
            round = state.rounds,
            grid_len = self.grid.len(),
            n_ranges = published.len(),
            "published resample ranges"
        );

        Ok(published)
    }

    fn init_slot(&self, slot: Slot, first_entry: EntryIndex) -> Result<()> {
        // per-slot state already set up at range-publication time
        self.moving.proxy.init_slot_base(slot, first_entry)
    }

    fn set_entry(&self, slot: Slot, entry: EntryIndex) -> Result<bool> {
        let window = *self.moving.window.lock();
        let mut progress = self.moving.progress.lane(slot)?;
        let mut lane = self.shared.lanes.lane(slot)?;

        while lane.last_stored < entry + window.right {
            progress.source_loaded += 1;

            if !self.moving.proxy.load_entry(slot, progress.source_loaded)? {
                // upstream exhausted before the grid: hold the last accepted
                // row for the remaining grid points
                if progress.published < lane.source_first {
                    return Err(
                        WindrowError::resample_domain(
                            "upstream yielded no accepted rows before exhausting"
                        )
                    );
                }

                lane.last_stored += 1;
                let snapshot_time = self.grid.time_at(lane.last_stored);
                self.snapshot_times.load_value(slot, snapshot_time.into_value())?;
                let last_stored = lane.last_stored;
                lane.indices.insert(last_stored, progress.published);
            } else if self.moving.proxy.filters().accepts(slot, progress.source_loaded) {
                self.moving.load_into_caches(slot, progress.source_loaded)?;
                progress.published += 1;

                let time_value = self.moving
                    .cache(&self.time_column)?
                    .value(slot, progress.published)?;
                let entry_time = T::from_value(time_value)?;

                if progress.published == lane.source_first && self.grid.from() < entry_time {
                    return Err(
                        WindrowError::resample_domain(
                            format!(
                                "first source sample at {} is after the grid start {}",
                                entry_time,
                                self.grid.from()
                            )
                        )
                    );
                }

                // every grid point strictly before this row's time now has
                // its final held value: the previous accepted row
                while
                    lane.last_stored < self.grid.index_of(entry_time) &&
                    self.grid.time_at(lane.last_stored + 1) < entry_time
                {
                    lane.last_stored += 1;
                    let snapshot_time = self.grid.time_at(lane.last_stored);
                    self.snapshot_times.load_value(slot, snapshot_time.into_value())?;
                    let last_stored = lane.last_stored;
                    lane.indices.insert(last_stored, progress.published - 1);
                }
            }
        }

        let purge_key = entry + window.left;
        if purge_key >= 0 {
            let first_used = *lane.indices
                .get(&purge_key)
                .ok_or_else(|| range_error!("no resample mapping for grid index {}", purge_key))?;

            for cache in self.moving.caches.values() {
                cache.purge_till(slot, first_used - 1)?;
            }

            lane.indices = lane.indices.split_off(&purge_key);
        }

        self.snapshot_times.purge_till(slot, entry + window.left - 1)?;

        Ok(true)
    }

    fn finalise_slot(&self, slot: Slot) -> Result<()> {
        self.moving.finalise_slot(slot)?;
        self.snapshot_times.finalise_slot(slot)?;

        let mut lane = self.shared.lanes.lane(slot)?;
        lane.indices.clear();
        lane.last_stored = NO_ENTRY;

        Ok(())
    }

    fn finalise(&self) -> Result<()> {
        self.moving.finalise()
    }

    fn get_column_readers(
        &self,
        slot: Slot,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>> {
        if name == self.time_column {
            if column_type != T::TYPE {
                return Err(
                    config_error!(
                        "time column '{}' has type {}, requested {}",
                        name,
                        T::TYPE,
                        column_type
                    )
                );
            }

            return Ok(Box::new(CacheReader::new(slot, Arc::clone(&self.snapshot_times))));
        }

        let cache = self.moving.cache(name)?;
        if cache.column_type() != column_type {
            return Err(
                config_error!(
                    "column '{}' is cached as {}, requested {}",
                    name,
                    cache.column_type(),
                    column_type
                )
            );
        }

        let direct = Box::new(CacheReader::new(slot, Arc::clone(cache)));
        let shared = Arc::clone(&self.shared);

        Ok(
            Box::new(
                RemappingReader::new(direct, move |grid_index| {
                    let lane = shared.lanes.lane(slot)?;
                    lane.indices
                        .get(&grid_index)
                        .copied()
                        .ok_or_else(|| {
                            range_error!("no resample mapping for grid index {}", grid_index)
                        })
                })
            )
        )
    }

    fn has_column(&self, name: &str) -> bool {
        self.moving.has_column(name)
    }

    fn get_type_name(&self, name: &str) -> Result<ColumnType> {
        self.moving.get_type_name(name)
    }

    fn column_names(&self) -> Vec<String> {
        self.moving.column_names()
    }
}

/// Builder for `ResampleSource`
pub struct ResampleSourceBuilder<T: TimeCell> {
    inner: MovingCacheSourceBuilder,
    time_column: Option<String>,
    grid: Option<ResampleGrid<T>>,
}

impl<T: TimeCell> ResampleSourceBuilder<T> {
    pub fn with_n_slots(mut self, n_slots: usize) -> Self {
        self.inner = self.inner.with_n_slots(n_slots);
        self
    }

    pub fn with_filters(mut self, filters: Arc<dyn FilterChain>) -> Self {
        self.inner = self.inner.with_filters(filters);
        self
    }

    pub fn with_register(mut self, register: ColumnRegister) -> Self {
        self.inner = self.inner.with_register(register);
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.inner = self.inner.with_column(name, column_type);
        self
    }

    pub fn with_window(mut self, left: i64, right: i64) -> Result<Self> {
        self.inner = self.inner.with_window(left, right)?;
        Ok(self)
    }

    /// Name of the column carrying the source timestamps; its static type
    /// must equal the grid type
    pub fn with_time_column(mut self, name: impl Into<String>) -> Self {
        self.time_column = Some(name.into());
        self
    }

    /// The output grid `{from, from + step, ..., to}`, bounds inclusive
    pub fn with_grid(mut self, from: T, to: T, step: T) -> Result<Self> {
        self.grid = Some(ResampleGrid::new(from, to, step)?);
        Ok(self)
    }

    pub fn build(self) -> Result<ResampleSource<T>> {
        let time_column = self.time_column
            .ok_or_else(|| config_error!("resampler needs a time column"))?;
        let grid = self.grid.ok_or_else(|| config_error!("resampler needs a grid"))?;

        let moving = self.inner.build()?;

        let time_cache = moving.cache(&time_column)?;
        if time_cache.column_type() != T::TYPE {
            return Err(
                config_error!(
                    "time column '{}' has type {}, grid is {}",
                    time_column,
                    time_cache.column_type(),
                    T::TYPE
                )
            );
        }

        let n_slots = moving.n_slots();

        Ok(ResampleSource {
            moving,
            time_column,
            grid,
            snapshot_times: Arc::new(CacheHandle::new(T::TYPE, n_slots)),
            shared: Arc::new(ResampleShared {
                lanes: SlotLanes::new(n_slots, |_| ResampleLane {
                    indices: BTreeMap::new(),
                    last_stored: NO_ENTRY,
                    source_first: 0,
                }),
            }),
        })
    }
}
