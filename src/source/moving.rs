//! Windowed sliding-cache data source.
//!
//! `MovingCacheSource` wraps an upstream shape and publishes a *shifted* view
//! of its entry ranges: every range `[first, last)` of the upstream becomes
//! `[first - L, last - R)` downstream, where `(L, R)` is the widest window any
//! consumer registered. In exchange, every published entry `e` is guaranteed
//! to see cached values for `e + L ..= e + R` in every projected column.
//!
//! Rows enter the caches in upstream order, but only after the external
//! filter chain accepts them; the cached sequence is therefore dense over
//! *accepted* rows, and the published entry axis counts accepted rows, not
//! raw source rows.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::CacheHandle;
use crate::cell::ColumnType;
use crate::config_error;
use crate::constants::{ default_slot_count, NO_ENTRY };
use crate::define::{ ColumnRegister, DefineReader };
use crate::error::Result;
use crate::lane::SlotLanes;
use crate::reader::{ CacheReader, ColumnReader };
use crate::source::proxy::{ ProxySource, Upstream };
use crate::source::{ AcceptAll, DataSource, EntryRange, FilterChain, Window };
use crate::{ EntryIndex, Slot };

pub(crate) struct SlotProgress {
    pub(crate) slot_range: EntryRange,
    /// Highest upstream entry pulled so far
    pub(crate) source_loaded: EntryIndex,
    /// Highest entry admitted into the caches after filtering
    pub(crate) published: EntryIndex,
}

pub(crate) struct RangeState {
    pub(crate) published: Vec<EntryRange>,
    pub(crate) rounds: u32,
}

/// Sliding-window cache owner and shifted-range publisher
pub struct MovingCacheSource {
    pub(crate) proxy: ProxySource,
    column_names: Vec<String>,
    column_types: Vec<ColumnType>,
    pub(crate) caches: HashMap<String, Arc<CacheHandle>>,
    pub(crate) window: Mutex<Window>,
    pub(crate) ranges: Mutex<RangeState>,
    pub(crate) progress: SlotLanes<SlotProgress>,
}

impl fmt::Debug for MovingCacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MovingCacheSource").finish()
    }
}

impl MovingCacheSource {
    pub fn builder(upstream: Upstream) -> MovingCacheSourceBuilder {
        MovingCacheSourceBuilder {
            upstream,
            filters: Arc::new(AcceptAll),
            register: ColumnRegister::new(),
            columns: Vec::new(),
            n_slots: default_slot_count(),
            window: Window::default(),
        }
    }

    /// Widen the window to also cover `window`.
    ///
    /// Every downstream consumer must register its demand before the first
    /// `get_entry_ranges` of an event loop.
    pub fn add_entry_offset_limit(&self, window: Window) {
        self.window.lock().widen(window);
    }

    /// The widest window registered so far
    pub fn entry_offset_limit(&self) -> Window {
        *self.window.lock()
    }

    pub fn n_slots(&self) -> usize {
        self.proxy.n_slots()
    }

    pub(crate) fn cache(&self, name: &str) -> Result<&Arc<CacheHandle>> {
        self.caches
            .get(name)
            .ok_or_else(|| config_error!("column '{}' not cached", name))
    }

    /// Append the accepted row at `source_entry` to every cache
    pub(crate) fn load_into_caches(&self, slot: Slot, source_entry: EntryIndex) -> Result<()> {
        for cache in self.caches.values() {
            cache.load(slot, source_entry)?;
        }

        Ok(())
    }
}

impl DataSource for MovingCacheSource {
    fn label(&self) -> &str {
        "MovingCacheSource"
    }

    fn set_n_slots(&self, n_slots: usize) -> Result<()> {
        if n_slots != self.proxy.n_slots() {
            return Err(
                config_error!(
                    "loop manager runs {} slots, source configured for {}",
                    n_slots,
                    self.proxy.n_slots()
                )
            );
        }

        Ok(())
    }

    fn initialise(&self) -> Result<()> {
        self.proxy.initialise_base()?;

        let mut state = self.ranges.lock();
        state.published.clear();
        state.rounds = 0;

        Ok(())
    }

    fn get_entry_ranges(&self) -> Result<Vec<EntryRange>> {
        let window = *self.window.lock();
        let mut state = self.ranges.lock();

        let ranges = if let Some(delegated) = self.proxy.delegated_ranges() {
            let raw = delegated?;

            if !raw.is_empty() && raw.len() != self.proxy.n_slots() {
                return Err(
                    config_error!(
                        "upstream published {} ranges for {} slots",
                        raw.len(),
                        self.proxy.n_slots()
                    )
                );
            }

            raw.iter()
                .map(|range| range.shrunk(window))
                .collect()
        } else if state.rounds == 0 {
            self.proxy
                .source_ranges()
                .iter()
                .map(|range| range.shrunk(window))
                .collect()
        } else {
            Vec::new()
        };

        state.published = ranges.clone();
        state.rounds += 1;

        debug!(
            source = self.label(),
            round = state.rounds,
            n_ranges = ranges.len(),
            left = window.left,
            right = window.right,
            "published entry ranges"
        );

        Ok(ranges)
    }

    fn init_slot(&self, slot: Slot, first_entry: EntryIndex) -> Result<()> {
        self.proxy.init_slot_base(slot, first_entry)?;

        let window = *self.window.lock();
        let range = {
            let state = self.ranges.lock();
            state.published
                .iter()
                .find(|range| range.first == first_entry)
                .copied()
                .ok_or_else(|| config_error!("no published range starts at entry {}", first_entry))?
        };

        {
            let mut lane = self.progress.lane(slot)?;
            lane.slot_range = range;
            lane.source_loaded = range.first + window.left - 1;
            lane.published = range.first + window.left - 1;
        }

        for cache in self.caches.values() {
            cache.init_slot(slot, range.first + window.left)?;
        }

        Ok(())
    }

    fn set_entry(&self, slot: Slot, entry: EntryIndex) -> Result<bool> {
        let window = *self.window.lock();
        let mut lane = self.progress.lane(slot)?;

        // pull upstream rows forward until the lookahead side of the window
        // around `entry` is fully cached
        while lane.published - window.right < entry {
            lane.source_loaded += 1;

            if lane.source_loaded >= lane.slot_range.last + window.right {
                return Ok(false);
            }

            if !self.proxy.load_entry(slot, lane.source_loaded)? {
                return Ok(false);
            }

            if self.proxy.filters().accepts(slot, lane.source_loaded) {
                self.load_into_caches(slot, lane.source_loaded)?;
                lane.published += 1;
            }
        }

        // keep the element at `entry + left` as the new cache front
        for cache in self.caches.values() {
            cache.purge_till(slot, entry + window.left - 1)?;
        }

        Ok(true)
    }

    fn finalise_slot(&self, slot: Slot) -> Result<()> {
        self.proxy.finalise_slot_base(slot)?;

        for cache in self.caches.values() {
            cache.finalise_slot(slot)?;
        }

        Ok(())
    }

    fn finalise(&self) -> Result<()> {
        self.proxy.finalise_base()
    }

    fn get_column_readers(
        &self,
        slot: Slot,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>> {
        let cache = self.cache(name)?;

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

        Ok(Box::new(CacheReader::new(slot, Arc::clone(cache))))
    }

    fn has_column(&self, name: &str) -> bool {
        self.column_names.iter().any(|n| n == name)
    }

    fn get_type_name(&self, name: &str) -> Result<ColumnType> {
        self.column_names
            .iter()
            .position(|n| n == name)
            .map(|index| self.column_types[index])
            .ok_or_else(|| config_error!("column '{}' not projected through this source", name))
    }

    fn column_names(&self) -> Vec<String> {
        self.column_names.clone()
    }
}

/// Builder for `MovingCacheSource`
pub struct MovingCacheSourceBuilder {
    upstream: Upstream,
    filters: Arc<dyn FilterChain>,
    register: ColumnRegister,
    columns: Vec<(String, ColumnType)>,
    n_slots: usize,
    window: Window,
}

impl MovingCacheSourceBuilder {
    pub fn with_n_slots(mut self, n_slots: usize) -> Self {
        self.n_slots = n_slots;
        self
    }

    pub fn with_filters(mut self, filters: Arc<dyn FilterChain>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_register(mut self, register: ColumnRegister) -> Self {
        self.register = register;
        self
    }

    /// Project a column of the given static type through the source
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push((name.into(), column_type));
        self
    }

    /// Initial window; consumers can widen it later via
    /// `add_entry_offset_limit`
    pub fn with_window(mut self, left: i64, right: i64) -> Result<Self> {
        self.window = Window::new(left, right)?;
        Ok(self)
    }

    pub fn build(self) -> Result<MovingCacheSource> {
        if self.columns.is_empty() {
            return Err(config_error!("at least one projected column required"));
        }

        for (i, (name, _)) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|(n, _)| n == name) {
                return Err(config_error!("column '{}' projected twice", name));
            }
        }

        let proxy = ProxySource::new(self.upstream, self.filters, self.n_slots)?;

        let mut caches = HashMap::with_capacity(self.columns.len());
        for (name, column_type) in &self.columns {
            let cache = build_cache(&proxy, &self.register, name, *column_type)?;
            caches.insert(name.clone(), Arc::new(cache));
        }

        let (column_names, column_types): (Vec<String>, Vec<ColumnType>) =
            self.columns.into_iter().unzip();
        let n_slots = proxy.n_slots();

        Ok(MovingCacheSource {
            proxy,
            column_names,
            column_types,
            caches,
            window: Mutex::new(self.window),
            ranges: Mutex::new(RangeState {
                published: Vec::new(),
                rounds: 0,
            }),
            progress: SlotLanes::new(n_slots, |_| SlotProgress {
                slot_range: EntryRange::new(0, 0),
                source_loaded: NO_ENTRY,
                published: NO_ENTRY,
            }),
        })
    }
}

/// Resolve one upstream reader per slot for `name` and wrap them in a cache.
///
/// Resolution order: a registered computed column wins, then a column of the
/// delegated upstream source, then a table column.
fn build_cache(
    proxy: &ProxySource,
    register: &ColumnRegister,
    name: &str,
    column_type: ColumnType
) -> Result<CacheHandle> {
    let n_slots = proxy.n_slots();
    let mut readers: Vec<Box<dyn ColumnReader>> = Vec::with_capacity(n_slots);

    if let Some(define) = register.get(name) {
        if define.column_type() != column_type {
            return Err(
                config_error!(
                    "computed column '{}' has type {}, projected as {}",
                    name,
                    define.column_type(),
                    column_type
                )
            );
        }

        for slot in 0..n_slots {
            readers.push(Box::new(DefineReader::new(slot, Arc::clone(define))));
        }
    } else {
        match proxy.upstream() {
            Upstream::Source(source) => {
                if source.has_column(name) {
                    for slot in 0..n_slots {
                        readers.push(source.get_column_readers(slot, name, column_type)?);
                    }
                }
            }
            Upstream::Table(table) => {
                if table.has_column(name) {
                    for _slot in 0..n_slots {
                        readers.push(table.reader(name, column_type)?);
                    }
                }
            }
            Upstream::Empty(_) => {}
        }
    }

    if readers.len() != n_slots {
        return Err(
            config_error!(
                "column '{}' resolved {} readers, need one per slot ({})",
                name,
                readers.len(),
                n_slots
            )
        );
    }

    Ok(CacheHandle::with_readers(column_type, readers))
}
