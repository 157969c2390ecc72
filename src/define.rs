//! Stateful computed columns.
//!
//! A `PersistentDefine` is a computed column whose expression carries state
//! across entries of the same slot (rolling sums, exponential averages). The
//! state makes the column order-dependent, so the update path enforces the
//! forward-monotonic discipline of the whole pipeline: re-updating the current
//! entry is a no-op, moving backwards is an error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cell::{ Cell, CellValue, ColumnType };
use crate::config_error;
use crate::constants::NO_ENTRY;
use crate::error::{ Result, WindrowError };
use crate::lane::SlotLanes;
use crate::reader::ColumnReader;
use crate::{ EntryIndex, Slot };

/// A computed column evaluated per slot and per entry
pub trait Define: Send + Sync {
    fn name(&self) -> &str;

    fn column_type(&self) -> ColumnType;

    /// Reset the slot's state and build its input readers
    fn init_slot(&self, slot: Slot) -> Result<()>;

    /// Bring the slot's value up to date with `entry`
    fn update(&self, slot: Slot, entry: EntryIndex) -> Result<()>;

    /// The slot's current value
    fn value(&self, slot: Slot) -> Result<CellValue>;

    /// Drop the slot's input readers
    fn finalise_slot(&self, slot: Slot) -> Result<()>;
}

/// Builds per-slot readers for named columns.
///
/// Collaborator seam through which a define resolves its input columns; tables
/// and data sources implement it.
pub trait ReaderProvider: Send + Sync {
    fn column_reader(
        &self,
        slot: Slot,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>>;
}

/// Registry of computed columns, looked up by name during cache setup
#[derive(Default, Clone)]
pub struct ColumnRegister {
    defines: HashMap<String, Arc<dyn Define>>,
}

impl ColumnRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a define under its own name, rejecting duplicates
    pub fn register(&mut self, define: Arc<dyn Define>) -> Result<()> {
        let name = define.name().to_owned();

        if self.defines.contains_key(&name) {
            return Err(config_error!("computed column '{}' already registered", name));
        }

        self.defines.insert(name, define);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Define>> {
        self.defines.get(name)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.defines.keys().cloned().collect()
    }
}

struct DefineLane<S> {
    state: S,
    last_checked: EntryIndex,
    readers: Vec<Box<dyn ColumnReader>>,
}

/// A define whose expression folds every visited entry into per-slot state.
///
/// `F` receives the mutable state followed by the current values of the input
/// columns, in declaration order.
pub struct PersistentDefine<S: Cell, F> {
    name: String,
    inputs: Vec<(String, ColumnType)>,
    provider: Arc<dyn ReaderProvider>,
    initial: S,
    expression: F,
    lanes: SlotLanes<DefineLane<S>>,
}

impl<S, F> PersistentDefine<S, F>
where
    S: Cell,
    F: Fn(&mut S, &[CellValue]) + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<(String, ColumnType)>,
        provider: Arc<dyn ReaderProvider>,
        n_slots: usize,
        initial: S,
        expression: F
    ) -> Self {
        let template = initial.clone();

        Self {
            name: name.into(),
            inputs,
            provider,
            initial,
            expression,
            lanes: SlotLanes::new(n_slots, |_| DefineLane {
                state: template.clone(),
                last_checked: NO_ENTRY,
                readers: Vec::new(),
            }),
        }
    }
}

impl<S, F> Define for PersistentDefine<S, F>
where
    S: Cell,
    F: Fn(&mut S, &[CellValue]) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn column_type(&self) -> ColumnType {
        S::TYPE
    }

    fn init_slot(&self, slot: Slot) -> Result<()> {
        let readers = self.inputs
            .iter()
            .map(|(name, ty)| self.provider.column_reader(slot, name, *ty))
            .collect::<Result<Vec<_>>>()?;

        let mut lane = self.lanes.lane(slot)?;
        lane.state = self.initial.clone();
        lane.last_checked = NO_ENTRY;
        lane.readers = readers;

        Ok(())
    }

    fn update(&self, slot: Slot, entry: EntryIndex) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;

        if entry < lane.last_checked {
            return Err(
                WindrowError::non_monotonic(
                    format!(
                        "computed column '{}' asked for entry {} after entry {}",
                        self.name,
                        entry,
                        lane.last_checked
                    )
                )
            );
        }

        if entry == lane.last_checked {
            return Ok(());
        }

        let lane = &mut *lane;
        let mut arguments = Vec::with_capacity(lane.readers.len());
        for reader in &mut lane.readers {
            arguments.push(reader.get(entry)?);
        }

        (self.expression)(&mut lane.state, &arguments);
        lane.last_checked = entry;

        Ok(())
    }

    fn value(&self, slot: Slot) -> Result<CellValue> {
        let lane = self.lanes.lane(slot)?;

        Ok(lane.state.clone().into_value())
    }

    fn finalise_slot(&self, slot: Slot) -> Result<()> {
        let mut lane = self.lanes.lane(slot)?;
        lane.readers.clear();

        Ok(())
    }
}

/// A reader view over a define at a given slot: each fetch brings the define
/// up to date with the requested entry, then reports its value
pub struct DefineReader {
    slot: Slot,
    define: Arc<dyn Define>,
}

impl fmt::Debug for DefineReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefineReader").field("slot", &self.slot).finish()
    }
}

impl DefineReader {
    pub fn new(slot: Slot, define: Arc<dyn Define>) -> Self {
        Self { slot, define }
    }
}

impl ColumnReader for DefineReader {
    fn get(&mut self, entry: EntryIndex) -> Result<CellValue> {
        self.define.update(self.slot, entry)?;
        self.define.value(self.slot)
    }
}
