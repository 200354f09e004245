//! Typed columnar storage shared by catalogs and raw survey results.
//!
//! A [`Table`] is an ordered list of [`Column`]s that all hold the same number
//! of rows. Every mutation validates before it changes anything, so a failed
//! call leaves the table untouched.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Float,
    Int,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float => "float",
            Self::Int => "integer",
            Self::Text => "text",
        };
        f.pad(name)
    }
}

/// Values of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn empty(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Float => Self::Float(Vec::new()),
            ColumnType::Int => Self::Int(Vec::new()),
            ColumnType::Text => Self::Text(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Float(_) => ColumnType::Float,
            Self::Int(_) => ColumnType::Int,
            Self::Text(_) => ColumnType::Text,
        }
    }

    /// Numeric value at `index`; integers are widened, text is `None`.
    pub fn float_at(&self, index: usize) -> Option<f64> {
        match self {
            Self::Float(v) => v.get(index).copied(),
            Self::Int(v) => v.get(index).map(|&i| i as f64),
            Self::Text(_) => None,
        }
    }

    /// True only for float cells holding NaN.
    pub fn is_nan_at(&self, index: usize) -> bool {
        match self {
            Self::Float(v) => v.get(index).is_some_and(|x| x.is_nan()),
            _ => false,
        }
    }

    /// Whole column as floats, or `None` for text.
    pub fn to_floats(&self) -> Option<Vec<f64>> {
        match self {
            Self::Float(v) => Some(v.clone()),
            Self::Int(v) => Some(v.iter().map(|&i| i as f64).collect()),
            Self::Text(_) => None,
        }
    }

    /// Keep the rows whose mask entry is true.
    fn filter(&self, mask: &[bool]) -> Self {
        fn keep<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            Self::Float(v) => Self::Float(keep(v, mask)),
            Self::Int(v) => Self::Int(keep(v, mask)),
            Self::Text(v) => Self::Text(keep(v, mask)),
        }
    }

    /// Gather rows by index, in the order given.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            Self::Float(v) => Self::Float(indices.iter().map(|&i| v[i]).collect()),
            Self::Int(v) => Self::Int(indices.iter().map(|&i| v[i]).collect()),
            Self::Text(v) => Self::Text(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

impl From<Vec<f64>> for ColumnData {
    fn from(values: Vec<f64>) -> Self {
        Self::Float(values)
    }
}

impl From<Vec<i64>> for ColumnData {
    fn from(values: Vec<i64>) -> Self {
        Self::Int(values)
    }
}

impl From<Vec<String>> for ColumnData {
    fn from(values: Vec<String>) -> Self {
        Self::Text(values)
    }
}

/// Physical unit attached to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    Degree,
    Arcsec,
    Milliarcsec,
    Magnitude,
    Day,
    Year,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Degree => "deg",
            Self::Arcsec => "arcsec",
            Self::Milliarcsec => "mas",
            Self::Magnitude => "mag",
            Self::Day => "d",
            Self::Year => "yr",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            "deg" => Some(Self::Degree),
            "arcsec" => Some(Self::Arcsec),
            "mas" => Some(Self::Milliarcsec),
            "mag" => Some(Self::Magnitude),
            "d" | "day" => Some(Self::Day),
            "yr" | "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// Multiplier converting this angular unit to degrees.
    pub fn degrees_per_unit(self) -> Option<f64> {
        match self {
            Self::Degree => Some(1.0),
            Self::Arcsec => Some(1.0 / 3600.0),
            Self::Milliarcsec => Some(1.0 / 3_600_000.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
    pub unit: Option<Unit>,
}

impl Column {
    pub fn new<S: Into<String>>(name: S, data: impl Into<ColumnData>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Rescale an angular column to degrees. Non-angular columns are an error.
    pub fn convert_to_degrees(&mut self) -> Result<()> {
        let factor = match self.unit {
            None => return Ok(()),
            Some(unit) => unit.degrees_per_unit().ok_or_else(|| {
                Error::Schema(format!(
                    "column '{}' in {} cannot be converted to degrees",
                    self.name,
                    unit.symbol()
                ))
            })?,
        };
        match &mut self.data {
            ColumnData::Float(values) => values.iter_mut().for_each(|v| *v *= factor),
            ColumnData::Int(values) => {
                let scaled = values.iter().map(|&v| v as f64 * factor).collect();
                self.data = ColumnData::Float(scaled);
            }
            ColumnData::Text(_) => {
                return Err(Error::Schema(format!(
                    "text column '{}' cannot carry an angular unit",
                    self.name
                )))
            }
        }
        self.unit = Some(Unit::Degree);
        Ok(())
    }
}

/// Read-only view of one row, handed to row predicates.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [Column],
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    fn data(&self, name: &str) -> Option<&'a ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    /// Numeric cell; integer cells are widened.
    pub fn float(&self, name: &str) -> Option<f64> {
        self.data(name)?.float_at(self.index)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.data(name)? {
            ColumnData::Int(v) => v.get(self.index).copied(),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&'a str> {
        match self.data(name)? {
            ColumnData::Text(v) => v.get(self.index).map(String::as_str),
            _ => None,
        }
    }
}

/// Ordered set of equal-length columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from complete columns.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut table = Self::new();
        table.push_columns(columns)?;
        Ok(table)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.rows).then_some(Row {
            columns: &self.columns,
            index,
        })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.rows).map(move |index| Row {
            columns: &self.columns,
            index,
        })
    }

    /// Append columns after checking all of them against the table and each
    /// other. Nothing is committed unless every column passes.
    pub fn push_columns(&mut self, columns: Vec<Column>) -> Result<()> {
        let mut expected = if self.columns.is_empty() {
            None
        } else {
            Some(self.rows)
        };

        for (i, column) in columns.iter().enumerate() {
            if self.contains(&column.name) || columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::Schema(format!(
                    "column '{}' already exists",
                    column.name
                )));
            }
            match expected {
                Some(rows) if rows != column.len() => {
                    return Err(Error::Schema(format!(
                        "column '{}' has {} values, table has {} rows",
                        column.name,
                        column.len(),
                        rows
                    )))
                }
                Some(_) => {}
                None => expected = Some(column.len()),
            }
        }

        if let Some(rows) = expected {
            self.rows = rows;
        }
        self.columns.extend(columns);
        Ok(())
    }

    pub fn push_column(&mut self, column: Column) -> Result<()> {
        self.push_columns(vec![column])
    }

    /// Insert a column at `index` (clamped to the end).
    pub fn insert_column(&mut self, index: usize, column: Column) -> Result<()> {
        self.push_column(column)?;
        if let Some(column) = self.columns.pop() {
            let index = index.min(self.columns.len());
            self.columns.insert(index, column);
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let index = self.position(name)?;
        let column = self.columns.remove(index);
        if self.columns.is_empty() {
            self.rows = 0;
        }
        Some(column)
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        if old == new {
            return if self.contains(old) {
                Ok(())
            } else {
                Err(Error::Schema(format!("column '{}' does not exist", old)))
            };
        }
        if self.contains(new) {
            return Err(Error::Schema(format!("column '{}' already exists", new)));
        }
        let column = self
            .column_mut(old)
            .ok_or_else(|| Error::Schema(format!("column '{}' does not exist", old)))?;
        column.name = new.to_string();
        Ok(())
    }

    /// Move the named columns to the front in the given order; absent names
    /// are ignored and the remaining columns keep their relative order.
    pub fn reorder_front(&mut self, names: &[&str]) {
        let mut front = Vec::new();
        for name in names {
            if let Some(index) = self.position(name) {
                front.push(self.columns.remove(index));
            }
        }
        front.append(&mut self.columns);
        self.columns = front;
    }

    /// Keep rows whose mask entry is true. Returns the number of rows removed.
    pub fn retain_rows(&mut self, mask: &[bool]) -> Result<usize> {
        if mask.len() != self.rows {
            return Err(Error::Schema(format!(
                "row mask has {} entries, table has {} rows",
                mask.len(),
                self.rows
            )));
        }
        for column in &mut self.columns {
            column.data = column.data.filter(mask);
        }
        let before = self.rows;
        self.rows = mask.iter().filter(|&&k| k).count();
        Ok(before - self.rows)
    }

    /// Evaluate a predicate on every row.
    pub fn mask<F>(&self, predicate: F) -> Vec<bool>
    where
        F: Fn(&Row<'_>) -> bool,
    {
        self.iter_rows().map(|row| predicate(&row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns(vec![
            Column::new("ident", vec!["a".to_string(), "b".to_string(), "c".to_string()]),
            Column::new("ra_deg", vec![10.0, 20.0, 30.0]).with_unit(Unit::Degree),
            Column::new("flags", vec![0i64, 4, 1]),
        ])
        .unwrap()
    }

    #[test]
    fn first_column_sets_row_count() {
        let table = sample();
        assert_eq!(table.rows(), 3);
        assert_eq!(table.column_names(), vec!["ident", "ra_deg", "flags"]);
    }

    #[test]
    fn length_mismatch_commits_nothing() {
        let mut table = sample();
        let err = table
            .push_columns(vec![
                Column::new("mag", vec![1.0, 2.0, 3.0]),
                Column::new("e_mag", vec![0.1]),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(!table.contains("mag"));
        assert_eq!(table.columns().len(), 3);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut table = sample();
        assert!(table.push_column(Column::new("flags", vec![1i64, 2, 3])).is_err());
        assert!(table
            .push_columns(vec![
                Column::new("x", vec![1.0, 2.0, 3.0]),
                Column::new("x", vec![1.0, 2.0, 3.0]),
            ])
            .is_err());
    }

    #[test]
    fn retain_rows_filters_every_column() {
        let mut table = sample();
        let removed = table.retain_rows(&[true, false, true]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(table.rows(), 2);
        for column in table.columns() {
            assert_eq!(column.len(), 2);
        }
        assert_eq!(
            table.column("ident").unwrap().data,
            ColumnData::Text(vec!["a".into(), "c".into()])
        );
    }

    #[test]
    fn retain_rows_checks_mask_length() {
        let mut table = sample();
        assert!(table.retain_rows(&[true]).is_err());
        assert_eq!(table.rows(), 3);
    }

    #[test]
    fn row_accessors() {
        let table = sample();
        let row = table.row(1).unwrap();
        assert_eq!(row.text("ident"), Some("b"));
        assert_eq!(row.float("ra_deg"), Some(20.0));
        assert_eq!(row.float("flags"), Some(4.0));
        assert_eq!(row.int("flags"), Some(4));
        assert_eq!(row.int("ra_deg"), None);
        assert!(table.row(3).is_none());
    }

    #[test]
    fn rename_rejects_collision() {
        let mut table = sample();
        assert!(table.rename_column("flags", "ra_deg").is_err());
        table.rename_column("flags", "FLAGS").unwrap();
        assert!(table.contains("FLAGS"));
        assert!(table.rename_column("missing", "other").is_err());
    }

    #[test]
    fn removing_last_column_resets_rows() {
        let mut table = Table::from_columns(vec![Column::new("x", vec![1.0, 2.0])]).unwrap();
        assert!(table.remove_column("x").is_some());
        assert_eq!(table.rows(), 0);
        table.push_column(Column::new("y", vec![1.0])).unwrap();
        assert_eq!(table.rows(), 1);
    }

    #[test]
    fn reorder_front_moves_named_columns() {
        let mut table = sample();
        table.reorder_front(&["flags", "missing", "ident"]);
        assert_eq!(table.column_names(), vec!["flags", "ident", "ra_deg"]);
    }

    #[test]
    fn insert_column_at_position() {
        let mut table = sample();
        table
            .insert_column(1, Column::new("dec_deg", vec![1.0, 2.0, 3.0]))
            .unwrap();
        assert_eq!(table.column_names(), vec!["ident", "dec_deg", "ra_deg", "flags"]);
    }

    #[test]
    fn milliarcsec_to_degrees() {
        let mut column = Column::new("e_ra_deg", vec![3600.0]).with_unit(Unit::Milliarcsec);
        column.convert_to_degrees().unwrap();
        assert!((column.data.float_at(0).unwrap() - 1e-3).abs() < 1e-15);
        assert_eq!(column.unit, Some(Unit::Degree));

        let mut mags = Column::new("mag", vec![1.0]).with_unit(Unit::Magnitude);
        assert!(mags.convert_to_degrees().is_err());
    }

    #[test]
    fn nan_detection_only_for_floats() {
        let data = ColumnData::Float(vec![1.0, f64::NAN]);
        assert!(!data.is_nan_at(0));
        assert!(data.is_nan_at(1));
        assert!(!ColumnData::Int(vec![1]).is_nan_at(0));
    }
}
