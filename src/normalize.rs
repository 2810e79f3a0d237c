//! Turns schema-less user records into a rectangular table.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::record::FieldValue;
use crate::snapshot::CollectionSnapshot;

/// One table cell.
///
/// `Absent` means the record had no such field. A record that stored an
/// explicit null gets `Present(FieldValue::Null)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Absent,
    Present(FieldValue),
}

impl Cell {
    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Cell::Absent => None,
            Cell::Present(value) => Some(value),
        }
    }
}

/// Column-stable view of a snapshot.
///
/// Every row has exactly `columns().len()` cells. Row `i` belongs to the
/// record whose key is `row_keys()[i]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTable {
    columns: Vec<String>,
    row_keys: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl NormalizedTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_keys(&self) -> &[String] {
        &self.row_keys
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Cells of one column in row order, or `None` if no record had the field.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Cell> + '_> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }

    /// Present values of one column in row order. Empty for unknown columns.
    pub fn present_values<'a>(&'a self, name: &str) -> Vec<&'a FieldValue> {
        match self.column(name) {
            Some(cells) => cells.filter_map(Cell::value).collect(),
            None => Vec::new(),
        }
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|cells| &cells[index])
    }
}

/// Build the table for `snapshot`.
///
/// Columns are the union of all field names in first-seen order, walking the
/// records in snapshot order. Values are copied as they are; a column may hold
/// different types in different rows. The same input always yields the same
/// table. If a record repeats a field name, its first value is kept.
pub fn normalize(snapshot: &CollectionSnapshot) -> NormalizedTable {
    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();

    for record in &snapshot.records {
        for name in record.field_names() {
            if !positions.contains_key(name) {
                positions.insert(name, columns.len());
                columns.push(name.to_string());
            }
        }
    }

    let mut row_keys = Vec::with_capacity(snapshot.len());
    let mut rows = Vec::with_capacity(snapshot.len());
    for record in &snapshot.records {
        let mut row = vec![Cell::Absent; columns.len()];
        for (name, value) in &record.fields {
            let index = positions[name.as_str()];
            if row[index].is_absent() {
                row[index] = Cell::Present(value.clone());
            }
        }
        row_keys.push(record.key.clone());
        rows.push(row);
    }

    debug!(
        "normalized {} records into {} columns",
        rows.len(),
        columns.len()
    );

    NormalizedTable {
        columns,
        row_keys,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use chrono::Utc;

    fn snapshot(records: Vec<Record>) -> CollectionSnapshot {
        CollectionSnapshot::new(Utc::now(), records)
    }

    #[test]
    fn ragged_records_become_rectangular() {
        let table = normalize(&snapshot(vec![
            Record::new("u1")
                .with_field("name", "Ann")
                .with_field("age", 30_i64),
            Record::new("u2").with_field("name", "Bo"),
        ]));

        assert_eq!(table.columns(), ["name", "age"]);
        assert_eq!(table.row_keys(), ["u1", "u2"]);
        assert_eq!(
            table.rows()[0],
            vec![
                Cell::Present(FieldValue::Text("Ann".into())),
                Cell::Present(FieldValue::Integer(30)),
            ]
        );
        assert_eq!(
            table.rows()[1],
            vec![Cell::Present(FieldValue::Text("Bo".into())), Cell::Absent]
        );
    }

    #[test]
    fn columns_follow_first_seen_order_across_records() {
        let table = normalize(&snapshot(vec![
            Record::new("a").with_field("xp", 10_i64),
            Record::new("b")
                .with_field("level", 2_i64)
                .with_field("xp", 5_i64),
            Record::new("c")
                .with_field("email", "c@example.com")
                .with_field("level", 1_i64),
        ]));

        assert_eq!(table.columns(), ["xp", "level", "email"]);
        assert!(table.rows().iter().all(|row| row.len() == 3));
        assert_eq!(table.cell(0, "level"), Some(&Cell::Absent));
        assert_eq!(
            table.cell(2, "level"),
            Some(&Cell::Present(FieldValue::Integer(1)))
        );
    }

    #[test]
    fn explicit_null_is_not_absent() {
        let table = normalize(&snapshot(vec![
            Record::new("u1").with_field("bio", FieldValue::Null),
            Record::new("u2"),
        ]));

        assert_eq!(table.cell(0, "bio"), Some(&Cell::Present(FieldValue::Null)));
        assert_eq!(table.cell(1, "bio"), Some(&Cell::Absent));
    }

    #[test]
    fn mixed_types_are_kept() {
        let table = normalize(&snapshot(vec![
            Record::new("u1").with_field("age", 30_i64),
            Record::new("u2").with_field("age", "thirty"),
            Record::new("u3").with_field("age", 30.5),
        ]));

        let types: Vec<_> = table
            .present_values("age")
            .iter()
            .map(|v| v.type_name())
            .collect();
        assert_eq!(types, ["integer", "text", "float"]);
    }

    #[test]
    fn empty_snapshot_gives_empty_table() {
        let table = normalize(&snapshot(Vec::new()));
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.column_count(), 0);
        assert!(table.is_empty());
    }

    #[test]
    fn records_without_fields_still_get_rows() {
        let table = normalize(&snapshot(vec![Record::new("ghost"), Record::new("u1")]));
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_count(), 0);
        assert_eq!(table.row_keys(), ["ghost", "u1"]);
    }

    #[test]
    fn unknown_column_has_no_values() {
        let table = normalize(&snapshot(vec![Record::new("u1").with_field("name", "Ann")]));
        assert!(table.column("age").is_none());
        assert!(table.present_values("age").is_empty());
    }
}
