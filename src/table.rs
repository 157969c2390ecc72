//! In-memory columnar tables.
//!
//! `MemTable` is the concrete column storage the proxy sources scan: an
//! immutable set of equally long typed columns, optionally split into
//! contiguous *segments*. Segments model a chain of files; an unsegmented
//! table is a single segment. `TableSource` adapts a table to the full
//! `DataSource` contract so it can also sit behind the delegating upstream
//! shape.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::{ CellValue, ColumnType };
use crate::define::ReaderProvider;
use crate::error::Result;
use crate::reader::ColumnReader;
use crate::source::{ DataSource, EntryRange };
use crate::{ config_error, range_error };
use crate::{ EntryIndex, Slot };

enum ColumnData {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Bool(_) => ColumnType::Bool,
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::Text(_) => ColumnType::Text,
        }
    }

    fn value(&self, row: usize) -> CellValue {
        match self {
            ColumnData::Bool(v) => CellValue::Bool(v[row]),
            ColumnData::Int64(v) => CellValue::Int64(v[row]),
            ColumnData::Float64(v) => CellValue::Float64(v[row]),
            ColumnData::Text(v) => CellValue::Text(v[row].clone()),
        }
    }
}

/// Immutable columnar table with segment-aligned entry ranges
pub struct MemTable {
    columns: Vec<(String, ColumnData)>,
    segments: Vec<EntryRange>,
    n_entries: i64,
}

impl fmt::Debug for MemTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTable").field("n_entries", &self.n_entries).finish()
    }
}

impl MemTable {
    pub fn builder() -> MemTableBuilder {
        MemTableBuilder::default()
    }

    pub fn n_entries(&self) -> i64 {
        self.n_entries
    }

    /// The file-aligned entry ranges of this table
    pub fn segments(&self) -> &[EntryRange] {
        &self.segments
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.column_type())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| config_error!("column '{}' not present in table", name))
    }

    /// Build a bounds-checked reader over one column.
    ///
    /// Readers are handed out per slot; they share the immutable table.
    pub fn reader(
        self: &Arc<Self>,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>> {
        let column = self.column_index(name)?;
        let actual = self.columns[column].1.column_type();

        if actual != column_type {
            return Err(
                config_error!("column '{}' has type {}, requested {}", name, actual, column_type)
            );
        }

        Ok(
            Box::new(TableReader {
                table: Arc::clone(self),
                column,
            })
        )
    }
}

impl ReaderProvider for Arc<MemTable> {
    fn column_reader(
        &self,
        _slot: Slot,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>> {
        self.reader(name, column_type)
    }
}

struct TableReader {
    table: Arc<MemTable>,
    column: usize,
}

impl fmt::Debug for TableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableReader").field("column", &self.column).finish()
    }
}

impl ColumnReader for TableReader {
    fn get(&mut self, entry: EntryIndex) -> Result<CellValue> {
        if entry < 0 || entry >= self.table.n_entries {
            return Err(
                range_error!("entry {} outside table range [0, {})", entry, self.table.n_entries)
            );
        }

        Ok(self.table.columns[self.column].1.value(entry as usize))
    }
}

/// Validating builder for `MemTable`
#[derive(Default)]
pub struct MemTableBuilder {
    columns: Vec<(String, ColumnData)>,
    splits: Vec<i64>,
}

impl MemTableBuilder {
    fn column(mut self, name: impl Into<String>, data: ColumnData) -> Self {
        self.columns.push((name.into(), data));
        self
    }

    pub fn column_bool(self, name: impl Into<String>, values: Vec<bool>) -> Self {
        self.column(name, ColumnData::Bool(values))
    }

    pub fn column_i64(self, name: impl Into<String>, values: Vec<i64>) -> Self {
        self.column(name, ColumnData::Int64(values))
    }

    pub fn column_f64(self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.column(name, ColumnData::Float64(values))
    }

    pub fn column_text(self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.column(name, ColumnData::Text(values))
    }

    /// Add a segment boundary before `row`, as a file boundary would
    pub fn split_at(mut self, row: i64) -> Self {
        self.splits.push(row);
        self
    }

    pub fn build(self) -> Result<Arc<MemTable>> {
        let first = self.columns
            .first()
            .ok_or_else(|| config_error!("table needs at least one column"))?;
        let n_entries = first.1.len() as i64;

        for (name, data) in &self.columns {
            if (data.len() as i64) != n_entries {
                return Err(
                    config_error!(
                        "column '{}' has {} entries, expected {}",
                        name,
                        data.len(),
                        n_entries
                    )
                );
            }
        }

        let mut seen = std::collections::HashSet::new();
        for (name, _) in &self.columns {
            if !seen.insert(name.clone()) {
                return Err(config_error!("duplicate column '{}'", name));
            }
        }

        let mut splits = self.splits;
        splits.sort_unstable();
        splits.dedup();

        let mut segments = Vec::with_capacity(splits.len() + 1);
        let mut start = 0;
        for split in splits {
            if split <= start || split >= n_entries {
                return Err(
                    config_error!("segment boundary {} outside (0, {})", split, n_entries)
                );
            }
            segments.push(EntryRange::new(start, split));
            start = split;
        }
        segments.push(EntryRange::new(start, n_entries));

        Ok(
            Arc::new(MemTable {
                columns: self.columns,
                segments,
                n_entries,
            })
        )
    }
}

/// `DataSource` adapter over a `MemTable`.
///
/// Publishes the table's segments as entry ranges exactly once per
/// `initialise`; `set_entry` reports exhaustion past the table end.
pub struct TableSource {
    table: Arc<MemTable>,
    n_slots: Mutex<usize>,
    ranges_published: Mutex<bool>,
}

impl TableSource {
    pub fn new(table: Arc<MemTable>) -> Self {
        Self {
            table,
            n_slots: Mutex::new(1),
            ranges_published: Mutex::new(false),
        }
    }

    /// Slot count agreed with the loop manager
    pub fn n_slots(&self) -> usize {
        *self.n_slots.lock()
    }
}

impl DataSource for TableSource {
    fn label(&self) -> &str {
        "TableSource"
    }

    fn set_n_slots(&self, n_slots: usize) -> Result<()> {
        if n_slots == 0 {
            return Err(config_error!("slot count must be at least 1"));
        }

        *self.n_slots.lock() = n_slots;
        Ok(())
    }

    fn initialise(&self) -> Result<()> {
        *self.ranges_published.lock() = false;
        Ok(())
    }

    fn get_entry_ranges(&self) -> Result<Vec<EntryRange>> {
        let mut published = self.ranges_published.lock();

        if *published {
            return Ok(Vec::new());
        }

        *published = true;
        Ok(self.table.segments().to_vec())
    }

    fn init_slot(&self, _slot: Slot, _first_entry: EntryIndex) -> Result<()> {
        Ok(())
    }

    fn set_entry(&self, _slot: Slot, entry: EntryIndex) -> Result<bool> {
        Ok(entry >= 0 && entry < self.table.n_entries())
    }

    fn finalise_slot(&self, _slot: Slot) -> Result<()> {
        Ok(())
    }

    fn get_column_readers(
        &self,
        _slot: Slot,
        name: &str,
        column_type: ColumnType
    ) -> Result<Box<dyn ColumnReader>> {
        self.table.reader(name, column_type)
    }

    fn has_column(&self, name: &str) -> bool {
        self.table.has_column(name)
    }

    fn get_type_name(&self, name: &str) -> Result<ColumnType> {
        self.table
            .column_type(name)
            .ok_or_else(|| config_error!("column '{}' not present in table", name))
    }

    fn column_names(&self) -> Vec<String> {
        self.table.column_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> Arc<MemTable> {
        MemTable::builder()
            .column_i64("x", vec![10, 20, 30, 40, 50])
            .column_f64("t", vec![0.0, 0.3, 0.7, 1.1, 1.8])
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_rejects_ragged_columns() {
        let err = MemTable::builder()
            .column_i64("a", vec![1, 2, 3])
            .column_i64("b", vec![1])
            .build()
            .unwrap_err();

        assert!(err.is_config());
    }

    #[test]
    fn test_builder_rejects_duplicate_columns() {
        let err = MemTable::builder()
            .column_i64("a", vec![1])
            .column_f64("a", vec![1.0])
            .build()
            .unwrap_err();

        assert!(err.is_config());
    }

    #[test]
    fn test_unsegmented_table_is_one_segment() {
        let table = small_table();
        assert_eq!(table.segments(), &[EntryRange::new(0, 5)]);
    }

    #[test]
    fn test_segment_boundaries() {
        let table = MemTable::builder()
            .column_i64("x", (0..10).collect())
            .split_at(4)
            .split_at(7)
            .build()
            .unwrap();

        assert_eq!(
            table.segments(),
            &[EntryRange::new(0, 4), EntryRange::new(4, 7), EntryRange::new(7, 10)]
        );
    }

    #[test]
    fn test_bad_segment_boundary() {
        let err = MemTable::builder()
            .column_i64("x", vec![1, 2])
            .split_at(2)
            .build()
            .unwrap_err();

        assert!(err.is_config());
    }

    #[test]
    fn test_reader_bounds_and_types() {
        let table = small_table();
        let mut reader = table.reader("x", ColumnType::Int64).unwrap();

        assert_eq!(reader.get(2).unwrap(), CellValue::Int64(30));
        assert!(reader.get(5).unwrap_err().is_range());
        assert!(reader.get(-1).unwrap_err().is_range());

        assert!(table.reader("x", ColumnType::Float64).unwrap_err().is_config());
        assert!(table.reader("missing", ColumnType::Int64).unwrap_err().is_config());
    }

    #[test]
    fn test_table_source_publishes_ranges_once() {
        let source = TableSource::new(small_table());
        source.initialise().unwrap();

        assert_eq!(source.get_entry_ranges().unwrap(), vec![EntryRange::new(0, 5)]);
        assert!(source.get_entry_ranges().unwrap().is_empty());

        source.initialise().unwrap();
        assert_eq!(source.get_entry_ranges().unwrap().len(), 1);
    }

    #[test]
    fn test_table_source_exhaustion() {
        let source = TableSource::new(small_table());

        assert!(source.set_entry(0, 4).unwrap());
        assert!(!source.set_entry(0, 5).unwrap());
    }
}
