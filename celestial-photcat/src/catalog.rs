//! The [`Catalog`] type: a [`Table`] of sources plus provenance metadata.
//!
//! Every structural mutation (adding, removing or renaming fields, rejecting
//! rows) is validated first, then applied, then recorded in the catalog's
//! history and emitted as a `tracing` event.

use crate::error::{Error, Result};
use crate::survey::Survey;
use crate::table::{Column, ColumnData, ColumnType, Row, Table};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Photometric zero-point convention of a catalog's magnitudes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MagnitudeSystem {
    #[default]
    Unknown,
    Ab,
    Vega,
    Instrumental,
    /// Mixed systems, e.g. `AB (ugriz), Vega (B)`.
    Composite(String),
}

impl fmt::Display for MagnitudeSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => Ok(()),
            Self::Ab => f.write_str("AB"),
            Self::Vega => f.write_str("Vega"),
            Self::Instrumental => f.write_str("instrumental"),
            Self::Composite(text) => f.write_str(text),
        }
    }
}

impl From<&str> for MagnitudeSystem {
    fn from(text: &str) -> Self {
        match text.trim() {
            "" => Self::Unknown,
            "AB" => Self::Ab,
            "Vega" => Self::Vega,
            "instrumental" => Self::Instrumental,
            other => Self::Composite(other.to_string()),
        }
    }
}

impl From<String> for MagnitudeSystem {
    fn from(text: String) -> Self {
        Self::from(text.as_str())
    }
}

impl From<MagnitudeSystem> for String {
    fn from(system: MagnitudeSystem) -> Self {
        system.to_string()
    }
}

/// Midpoint Julian date and exposure time (seconds) of the observation a
/// catalog was extracted from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationTime {
    pub mid_jd: f64,
    pub exposure: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Display name; survey catalogs use the survey identifier.
    pub name: String,
    /// Survey the sources came from, when known.
    pub family: Option<Survey>,
    pub origin: String,
    pub magnitude_system: MagnitudeSystem,
    pub observation: Option<ObservationTime>,
    pub object_name: Option<String>,
    history: Vec<String>,
    transformed: bool,
    table: Table,
}

impl Catalog {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn for_survey(survey: Survey) -> Self {
        Self {
            name: survey.name().to_string(),
            family: Some(survey),
            ..Self::default()
        }
    }

    pub fn with_table<S: Into<String>>(name: S, table: Table) -> Self {
        Self {
            name: name.into(),
            table,
            ..Self::default()
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut Table {
        &mut self.table
    }

    /// `(rows, fields)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.table.rows(), self.table.columns().len())
    }

    pub fn len(&self) -> usize {
        self.table.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.table.rows() == 0
    }

    pub fn fields(&self) -> Vec<&str> {
        self.table.column_names()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.table.contains(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.table.column(name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column> {
        self.table
            .column(name)
            .ok_or_else(|| Error::missing_column(&self.name, name))
    }

    /// Numeric values of a column, integers widened to `f64`.
    pub fn float_values(&self, name: &str) -> Result<Vec<f64>> {
        let column = self.require_column(name)?;
        column.data.to_floats().ok_or_else(|| {
            Error::Schema(format!("column '{}' of '{}' is not numeric", name, self.name))
        })
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.table.row(index)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn record_history<S: Into<String>>(&mut self, entry: S) {
        let entry = entry.into();
        debug!(catalog = %self.name, entry = %entry, "history");
        self.history.push(entry);
    }

    pub(crate) fn set_history(&mut self, history: Vec<String>) {
        self.history = history;
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    pub(crate) fn mark_transformed(&mut self) {
        self.transformed = true;
    }

    /// Add one column. Returns the number of columns added.
    pub fn add_field(&mut self, name: &str, values: ColumnData, column_type: ColumnType) -> Result<usize> {
        self.add_fields(&[name], vec![values], &[column_type])
    }

    /// Add several columns at once. All inputs are checked before any column
    /// is committed. Returns the number of columns added.
    pub fn add_fields(
        &mut self,
        names: &[&str],
        values: Vec<ColumnData>,
        types: &[ColumnType],
    ) -> Result<usize> {
        if names.len() != values.len() || names.len() != types.len() {
            return Err(Error::Schema(format!(
                "{} names, {} value arrays and {} types given",
                names.len(),
                values.len(),
                types.len()
            )));
        }

        for ((name, data), &column_type) in names.iter().zip(&values).zip(types) {
            if data.column_type() != column_type {
                return Err(Error::Schema(format!(
                    "field '{}' declared {} but holds {} values",
                    name,
                    column_type,
                    data.column_type()
                )));
            }
        }

        let columns = names
            .iter()
            .zip(values)
            .map(|(name, data)| Column::new(*name, data))
            .collect();
        self.add_columns(columns)
    }

    /// Add prebuilt columns (units included), all or nothing.
    pub fn add_columns(&mut self, columns: Vec<Column>) -> Result<usize> {
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        self.table.push_columns(columns)?;
        info!(catalog = %self.name, fields = ?names, "added fields");
        self.record_history(format!("added {}", names.join(" ")));
        Ok(names.len())
    }

    pub fn remove_field(&mut self, name: &str) -> Result<Column> {
        let column = self
            .table
            .remove_column(name)
            .ok_or_else(|| Error::missing_column(&self.name, name))?;
        info!(catalog = %self.name, field = name, "removed field");
        self.record_history(format!("removed {}", name));
        Ok(column)
    }

    pub fn rename_field(&mut self, old: &str, new: &str) -> Result<()> {
        if !self.table.contains(old) {
            return Err(Error::missing_column(&self.name, old));
        }
        self.table.rename_column(old, new)?;
        debug!(catalog = %self.name, from = old, to = new, "renamed field");
        self.record_history(format!("renamed {} to {}", old, new));
        Ok(())
    }

    /// Remove rows for which `predicate` holds. Returns the number of rows
    /// remaining.
    pub fn reject_sources_matching<F>(&mut self, predicate: F) -> Result<usize>
    where
        F: Fn(&Row<'_>) -> bool,
    {
        let keep: Vec<bool> = self.table.mask(predicate).into_iter().map(|hit| !hit).collect();
        self.apply_mask(&keep)?;
        Ok(self.len())
    }

    /// Remove rows for which `predicate` does not hold. Returns the number of
    /// rows removed.
    pub fn reject_sources_not_matching<F>(&mut self, predicate: F) -> Result<usize>
    where
        F: Fn(&Row<'_>) -> bool,
    {
        let keep = self.table.mask(predicate);
        self.apply_mask(&keep)
    }

    /// Keep rows whose mask entry is true; returns the number removed.
    pub(crate) fn apply_mask(&mut self, keep: &[bool]) -> Result<usize> {
        let rejected = self.table.retain_rows(keep)?;
        info!(catalog = %self.name, rejected, remaining = self.len(), "rejected sources");
        self.record_history(format!("{} sources rejected", rejected));
        Ok(rejected)
    }

    /// Wrap negative values of an angle column into `[0, 360)`.
    /// Returns the number of values changed.
    pub fn wrap_right_ascension(&mut self, name: &str) -> Result<usize> {
        let catalog = self.name.clone();
        let column = self
            .table
            .column_mut(name)
            .ok_or_else(|| Error::missing_column(&catalog, name))?;
        let values = match &mut column.data {
            ColumnData::Float(values) => values,
            _ => {
                return Err(Error::Schema(format!(
                    "right ascension column '{}' is not float",
                    name
                )))
            }
        };

        let mut wrapped = 0;
        for value in values.iter_mut().filter(|v| **v < 0.0) {
            *value += 360.0;
            wrapped += 1;
        }
        if wrapped > 0 {
            debug!(catalog = %catalog, wrapped, "wrapped negative right ascension");
        }
        Ok(wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Unit;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new("test");
        catalog
            .add_fields(
                &["ident", "ra_deg", "mag"],
                vec![
                    ColumnData::Int(vec![1, 2, 3, 4]),
                    ColumnData::Float(vec![-1.0, 10.0, 20.0, 359.0]),
                    ColumnData::Float(vec![12.0, 15.0, 18.0, 21.0]),
                ],
                &[ColumnType::Int, ColumnType::Float, ColumnType::Float],
            )
            .unwrap();
        catalog
    }

    fn assert_row_invariant(catalog: &Catalog) {
        let rows = catalog.shape().0;
        for column in catalog.table().columns() {
            assert_eq!(column.len(), rows, "column {}", column.name);
        }
    }

    #[test]
    fn add_field_initializes_row_count() {
        let mut catalog = Catalog::new("empty");
        assert_eq!(catalog.shape(), (0, 0));
        let added = catalog
            .add_field("mag", ColumnData::Float(vec![1.0, 2.0]), ColumnType::Float)
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(catalog.shape(), (2, 1));
    }

    #[test]
    fn add_field_rejects_wrong_length_and_type() {
        let mut catalog = catalog();
        let err = catalog
            .add_field("e_mag", ColumnData::Float(vec![0.1]), ColumnType::Float)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));

        let err = catalog
            .add_field("e_mag", ColumnData::Float(vec![0.1; 4]), ColumnType::Int)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert_eq!(catalog.shape(), (4, 3));
    }

    #[test]
    fn add_fields_validates_before_commit() {
        let mut catalog = catalog();
        let err = catalog
            .add_fields(
                &["a", "b"],
                vec![ColumnData::Float(vec![0.0; 4]), ColumnData::Float(vec![0.0; 3])],
                &[ColumnType::Float, ColumnType::Float],
            )
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(!catalog.has_field("a"));

        let err = catalog
            .add_fields(&["a"], vec![], &[ColumnType::Float])
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn reject_matching_returns_remaining() {
        let mut catalog = catalog();
        let remaining = catalog
            .reject_sources_matching(|row| row.float("mag").unwrap() > 16.0)
            .unwrap();
        assert_eq!(remaining, 2);
        assert_row_invariant(&catalog);
    }

    #[test]
    fn reject_not_matching_returns_rejected() {
        let mut catalog = catalog();
        let rejected = catalog
            .reject_sources_not_matching(|row| row.float("mag").unwrap() > 16.0)
            .unwrap();
        assert_eq!(rejected, 2);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.float_values("mag").unwrap(), vec![18.0, 21.0]);
        assert_row_invariant(&catalog);
    }

    #[test]
    fn complementary_rejections_partition_rows() {
        let predicate = |row: &Row<'_>| row.int("ident").unwrap() % 2 == 0;

        let mut kept_by_matching = catalog();
        let remaining = kept_by_matching.reject_sources_matching(predicate).unwrap();

        let mut kept_by_not_matching = catalog();
        let rejected = kept_by_not_matching
            .reject_sources_not_matching(predicate)
            .unwrap();

        let a = kept_by_matching.float_values("ident").unwrap();
        let b = kept_by_not_matching.float_values("ident").unwrap();
        assert!(a.iter().all(|x| !b.contains(x)));
        assert_eq!(a.len() + b.len(), 4);
        assert_eq!(remaining + (4 - rejected), 4);
    }

    #[test]
    fn mutations_are_recorded() {
        let mut catalog = catalog();
        catalog.rename_field("mag", "MAG").unwrap();
        catalog.remove_field("MAG").unwrap();
        catalog.reject_sources_matching(|_| false).unwrap();
        let history = catalog.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1], "renamed mag to MAG");
        assert_eq!(history[3], "0 sources rejected");
    }

    #[test]
    fn missing_fields_are_reported() {
        let mut catalog = catalog();
        assert!(matches!(
            catalog.remove_field("nope"),
            Err(Error::MissingColumn { .. })
        ));
        assert!(matches!(
            catalog.rename_field("nope", "x"),
            Err(Error::MissingColumn { .. })
        ));
        assert!(matches!(
            catalog.float_values("nope"),
            Err(Error::MissingColumn { .. })
        ));
    }

    #[test]
    fn wrap_right_ascension_only_touches_negatives() {
        let mut catalog = catalog();
        assert_eq!(catalog.wrap_right_ascension("ra_deg").unwrap(), 1);
        assert_eq!(
            catalog.float_values("ra_deg").unwrap(),
            vec![359.0, 10.0, 20.0, 359.0]
        );
    }

    #[test]
    fn add_columns_keeps_units() {
        let mut catalog = catalog();
        catalog
            .add_columns(vec![Column::new("e_mag", vec![0.1; 4]).with_unit(Unit::Magnitude)])
            .unwrap();
        assert_eq!(catalog.column("e_mag").unwrap().unit, Some(Unit::Magnitude));
    }

    #[test]
    fn magnitude_system_text_form() {
        assert_eq!(MagnitudeSystem::from("AB"), MagnitudeSystem::Ab);
        assert_eq!(MagnitudeSystem::from(""), MagnitudeSystem::Unknown);
        assert_eq!(
            MagnitudeSystem::from("AB (ugriz), Vega (B)"),
            MagnitudeSystem::Composite("AB (ugriz), Vega (B)".into())
        );
        assert_eq!(MagnitudeSystem::Instrumental.to_string(), "instrumental");
    }
}
