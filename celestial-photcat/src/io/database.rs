//! SQLite catalog files.
//!
//! A database holds two tables: `header`, one row of catalog metadata, and
//! `data`, one row per source with a column per catalog field.

use crate::catalog::{Catalog, ObservationTime};
use crate::error::{Error, Result};
use crate::survey::Survey;
use crate::table::{Column, ColumnData, ColumnType, Table};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const HISTORY_SEPARATOR: &str = ", ";

/// Sole column of the `data` table written for a catalog without fields.
const EMPTY_PLACEHOLDER: &str = "ident";

/// How column types are decided when reading `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseReadMode {
    /// Use the storage class of each value in the first row.
    #[default]
    InferFromFirstRow,
    /// Use the types declared in the table schema.
    DeclaredSchema,
}

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Float => "REAL",
        ColumnType::Int => "INTEGER",
        ColumnType::Text => "TEXT",
    }
}

fn declared_type(declared: &str) -> ColumnType {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
        ColumnType::Int
    } else if upper.contains("CHAR") || upper.contains("TEXT") || upper.contains("CLOB") {
        ColumnType::Text
    } else {
        ColumnType::Float
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Write `catalog` to a new database at `path`, replacing any existing
/// file. The database is built under a temporary name and moved into place
/// once committed. Returns the number of rows stored in `data`.
pub fn write_database<P: AsRef<Path>>(catalog: &Catalog, path: P) -> Result<usize> {
    let path = path.as_ref();
    let temp_path = temporary_path(path);
    match fs::remove_file(&temp_path) {
        Ok(()) => debug!(path = %temp_path.display(), "removed stale temporary database"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let stored = match build_database(catalog, &temp_path)
        .and_then(|stored| fs::rename(&temp_path, path).map(|()| stored).map_err(Error::from))
    {
        Ok(stored) => stored,
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "could not remove temporary database");
                }
            }
            return Err(e);
        }
    };
    info!(catalog = %catalog.name, path = %path.display(), rows = stored, "wrote database");
    Ok(stored)
}

fn temporary_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(format!("{}.tmp", ext)),
        None => path.with_extension("tmp"),
    }
}

fn build_database(catalog: &Catalog, path: &Path) -> Result<usize> {
    let mut conn = Connection::open(path)?;
    let tx = conn.transaction()?;

    tx.execute(
        "CREATE TABLE header (name TEXT, origin TEXT, description TEXT, magsys TEXT, \
         obstime REAL, exptime REAL, obj TEXT)",
        [],
    )?;
    tx.execute(
        "INSERT INTO header VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            catalog.name,
            catalog.origin,
            catalog.history().join(HISTORY_SEPARATOR),
            catalog.magnitude_system.to_string(),
            catalog.observation.map(|o| o.mid_jd),
            catalog.observation.map(|o| o.exposure),
            catalog.object_name,
        ],
    )?;

    let columns = catalog.table().columns();
    if !columns.is_empty() {
        let schema: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote(&c.name), sql_type(c.data.column_type())))
            .collect();
        tx.execute(&format!("CREATE TABLE data ({})", schema.join(", ")), [])?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let mut insert = tx.prepare(&format!("INSERT INTO data VALUES ({})", placeholders.join(", ")))?;
        for row in 0..catalog.len() {
            insert.execute(params_from_iter(columns.iter().map(|c| cell(&c.data, row))))?;
        }
    } else {
        tx.execute(&format!("CREATE TABLE data ({} TEXT)", EMPTY_PLACEHOLDER), [])?;
    }
    tx.commit()?;

    let stored: i64 = conn.query_row("SELECT COUNT(*) FROM data", [], |row| row.get(0))?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(stored as usize)
}

fn cell(data: &ColumnData, row: usize) -> Value {
    match data {
        ColumnData::Float(values) if values[row].is_nan() => Value::Null,
        ColumnData::Float(values) => Value::Real(values[row]),
        ColumnData::Int(values) => Value::Integer(values[row]),
        ColumnData::Text(values) => Value::Text(values[row].clone()),
    }
}

/// Read a catalog written by [`write_database`].
pub fn read_database<P: AsRef<Path>>(path: P, mode: DatabaseReadMode) -> Result<Catalog> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::Io(std::io::Error::new(
            ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    let conn = Connection::open(path)?;

    let mut catalog = read_header(&conn, path)?;

    let declared = declared_columns(&conn)?;
    let names: Vec<String> = declared.iter().map(|(name, _)| name.clone()).collect();
    let select = format!(
        "SELECT {} FROM data",
        names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", ")
    );

    let mut stmt = conn.prepare(&select)?;
    let mut rows = stmt.query([])?;
    let mut builders: Option<Vec<ColumnData>> = None;

    while let Some(row) = rows.next()? {
        let data = builders.get_or_insert_with(|| {
            declared
                .iter()
                .enumerate()
                .map(|(i, (_, declared_type))| {
                    let column_type = match mode {
                        DatabaseReadMode::DeclaredSchema => *declared_type,
                        DatabaseReadMode::InferFromFirstRow => match row.get_ref(i) {
                            Ok(ValueRef::Integer(_)) => ColumnType::Int,
                            Ok(ValueRef::Text(_)) => ColumnType::Text,
                            _ => ColumnType::Float,
                        },
                    };
                    ColumnData::empty(column_type)
                })
                .collect()
        });

        for (i, column) in data.iter_mut().enumerate() {
            push_value(column, row.get_ref(i)?, &names[i], mode)?;
        }
    }

    let data = match builders {
        Some(data) => data,
        None if is_empty_placeholder(&declared) => {
            debug!(path = %path.display(), "catalog has no fields");
            Vec::new()
        }
        None => {
            debug!(path = %path.display(), "no rows, using declared schema");
            declared.iter().map(|(_, t)| ColumnData::empty(*t)).collect()
        }
    };

    let columns: Vec<Column> = names.into_iter().zip(data).map(|(n, d)| Column::new(n, d)).collect();
    if columns.iter().any(|c| c.name.starts_with('_')) {
        catalog.mark_transformed();
    }
    *catalog.table_mut() = Table::from_columns(columns)?;

    let (sources, fields) = catalog.shape();
    info!(catalog = %catalog.name, path = %path.display(), sources, fields, "read database");
    Ok(catalog)
}

fn read_header(conn: &Connection, path: &Path) -> Result<Catalog> {
    type HeaderRow = (
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<f64>,
        Option<f64>,
        Option<String>,
    );

    let header: Option<HeaderRow> = conn
        .query_row(
            "SELECT name, origin, description, magsys, obstime, exptime, obj FROM header",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;

    let Some((name, origin, description, magsys, obstime, exptime, object)) = header else {
        warn!(path = %path.display(), "database header table is empty");
        return Ok(Catalog::new(path.display().to_string()));
    };

    let name = name.unwrap_or_else(|| path.display().to_string());
    let mut catalog = Catalog::new(name);
    catalog.family = Survey::detect(&catalog.name);
    catalog.origin = origin.unwrap_or_default();
    catalog.magnitude_system = magsys.unwrap_or_default().into();
    catalog.observation = match (obstime, exptime) {
        (Some(mid_jd), Some(exposure)) => Some(ObservationTime { mid_jd, exposure }),
        _ => None,
    };
    catalog.object_name = object.filter(|o| !o.is_empty());
    catalog.set_history(
        description
            .filter(|d| !d.is_empty())
            .map(|d| d.split(HISTORY_SEPARATOR).map(str::to_string).collect())
            .unwrap_or_default(),
    );
    Ok(catalog)
}

/// A row-less `data` table holding only the placeholder column.
fn is_empty_placeholder(declared: &[(String, ColumnType)]) -> bool {
    matches!(declared, [(name, ColumnType::Text)] if name == EMPTY_PLACEHOLDER)
}

fn declared_columns(conn: &Connection) -> Result<Vec<(String, ColumnType)>> {
    let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info('data') ORDER BY cid")?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            Ok((name, declared_type(&declared)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if columns.is_empty() {
        return Err(Error::Schema("database has no data table".into()));
    }
    Ok(columns)
}

/// Append one stored value. A first-row type is kept for the whole column:
/// reals read into an integer column are truncated. The declared schema only
/// accepts integral reals there.
fn push_value(column: &mut ColumnData, value: ValueRef<'_>, name: &str, mode: DatabaseReadMode) -> Result<()> {
    match (column, value) {
        (ColumnData::Float(values), ValueRef::Real(v)) => values.push(v),
        (ColumnData::Float(values), ValueRef::Integer(v)) => values.push(v as f64),
        (ColumnData::Float(values), ValueRef::Null) => values.push(f64::NAN),
        (ColumnData::Int(values), ValueRef::Integer(v)) => values.push(v),
        (ColumnData::Int(values), ValueRef::Real(v))
            if v.is_finite() && (mode == DatabaseReadMode::InferFromFirstRow || v.fract() == 0.0) =>
        {
            values.push(v.trunc() as i64)
        }
        (ColumnData::Text(values), ValueRef::Text(bytes)) => {
            values.push(String::from_utf8_lossy(bytes).into_owned())
        }
        (ColumnData::Text(values), ValueRef::Null) => values.push(String::new()),
        (ColumnData::Text(values), ValueRef::Integer(v)) => values.push(v.to_string()),
        (ColumnData::Text(values), ValueRef::Real(v)) => values.push(v.to_string()),
        (column, value) => {
            return Err(Error::Schema(format!(
                "column '{}' holds {} values but found {:?}",
                name,
                column.column_type(),
                value.data_type()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MagnitudeSystem;
    use tempfile::TempDir;

    fn sample() -> Catalog {
        let mut catalog = Catalog::new("APASS9");
        catalog
            .add_columns(vec![
                Column::new("ident", vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]),
                Column::new("ra_deg", vec![1.25, 2.5, 359.875]),
                Column::new("dec_deg", vec![-10.0, 0.0, 89.5]),
                Column::new("nobs", vec![3_i64, 7, 12]),
            ])
            .unwrap();
        catalog.origin = "Vizier".to_string();
        catalog.magnitude_system = MagnitudeSystem::Vega;
        catalog.observation = Some(ObservationTime {
            mid_jd: 2458000.25,
            exposure: 30.0,
        });
        catalog
    }

    #[test]
    fn round_trip_preserves_values_and_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cat.db");
        let catalog = sample();
        assert_eq!(write_database(&catalog, &path).unwrap(), 3);
        assert!(!dir.path().join("cat.db.tmp").exists());

        let back = read_database(&path, DatabaseReadMode::default()).unwrap();
        assert_eq!(back.name, "APASS9");
        assert_eq!(back.family, Some(Survey::Apass9));
        assert_eq!(back.origin, "Vizier");
        assert_eq!(back.magnitude_system, MagnitudeSystem::Vega);
        assert_eq!(back.observation, catalog.observation);
        assert_eq!(back.history(), catalog.history());
        assert_eq!(back.fields(), catalog.fields());
        for column in catalog.table().columns() {
            assert_eq!(&back.column(&column.name).unwrap().data, &column.data);
        }
        assert!(!back.is_transformed());
    }

    #[test]
    fn write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cat.db");
        write_database(&sample(), &path).unwrap();

        let mut smaller = sample();
        smaller.reject_sources_matching(|row| row.index() > 0).unwrap();
        assert_eq!(write_database(&smaller, &path).unwrap(), 1);
        assert_eq!(read_database(&path, DatabaseReadMode::default()).unwrap().len(), 1);
    }

    #[test]
    fn first_row_inference_differs_from_declared_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("loose.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE header (name TEXT, origin TEXT, description TEXT, magsys TEXT, \
             obstime REAL, exptime REAL, obj TEXT);
             INSERT INTO header VALUES ('loose', '', '', '', NULL, NULL, NULL);
             CREATE TABLE data (flux, label TEXT);
             INSERT INTO data VALUES (1, 'a');
             INSERT INTO data VALUES (2.5, 'b');",
        )
        .unwrap();
        drop(conn);

        let inferred = read_database(&path, DatabaseReadMode::InferFromFirstRow).unwrap();
        assert_eq!(inferred.column("flux").unwrap().data, ColumnData::Int(vec![1, 2]));

        let declared = read_database(&path, DatabaseReadMode::DeclaredSchema).unwrap();
        assert_eq!(declared.column("flux").unwrap().data, ColumnData::Float(vec![1.0, 2.5]));
        assert!(declared.observation.is_none());
    }

    #[test]
    fn text_in_numeric_column_is_a_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE header (name TEXT, origin TEXT, description TEXT, magsys TEXT, \
             obstime REAL, exptime REAL, obj TEXT);
             INSERT INTO header VALUES ('mixed', '', '', '', NULL, NULL, NULL);
             CREATE TABLE data (flux);
             INSERT INTO data VALUES (1.5);
             INSERT INTO data VALUES ('bright');",
        )
        .unwrap();
        drop(conn);

        for mode in [DatabaseReadMode::InferFromFirstRow, DatabaseReadMode::DeclaredSchema] {
            assert!(matches!(read_database(&path, mode), Err(Error::Schema(_))));
        }
    }

    #[test]
    fn declared_integer_rejects_fractional_real() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strict.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE header (name TEXT, origin TEXT, description TEXT, magsys TEXT, \
             obstime REAL, exptime REAL, obj TEXT);
             INSERT INTO header VALUES ('strict', '', '', '', NULL, NULL, NULL);
             CREATE TABLE data (nobs INTEGER);
             INSERT INTO data VALUES (3);
             INSERT INTO data VALUES (2.5);",
        )
        .unwrap();
        drop(conn);

        assert!(matches!(
            read_database(&path, DatabaseReadMode::DeclaredSchema),
            Err(Error::Schema(_))
        ));
        let loose = read_database(&path, DatabaseReadMode::InferFromFirstRow).unwrap();
        assert_eq!(loose.column("nobs").unwrap().data, ColumnData::Int(vec![3, 2]));
    }

    #[test]
    fn empty_data_uses_declared_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.db");
        let mut catalog = sample();
        catalog.reject_sources_matching(|_| true).unwrap();
        assert_eq!(write_database(&catalog, &path).unwrap(), 0);

        let back = read_database(&path, DatabaseReadMode::InferFromFirstRow).unwrap();
        assert_eq!(back.len(), 0);
        assert_eq!(back.column("nobs").unwrap().data.column_type(), ColumnType::Int);
        assert_eq!(back.column("ident").unwrap().data.column_type(), ColumnType::Text);
    }

    #[test]
    fn catalog_without_fields_reads_back_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bare.db");
        let catalog = Catalog::new("bare");
        assert_eq!(write_database(&catalog, &path).unwrap(), 0);

        let back = read_database(&path, DatabaseReadMode::default()).unwrap();
        assert_eq!(back.shape(), (0, 0));
        assert_eq!(back.name, "bare");
    }

    #[test]
    fn failed_write_leaves_no_temporary_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.db");
        let mut catalog = sample();
        // SQLite column names are case-insensitive, so this schema is rejected.
        catalog
            .add_columns(vec![Column::new("NOBS", vec![1_i64, 2, 3])])
            .unwrap();

        assert!(matches!(write_database(&catalog, &path), Err(Error::Database(_))));
        assert!(!dir.path().join("dup.db.tmp").exists());
        assert!(!path.exists());
    }

    #[test]
    fn derived_columns_mark_catalog_transformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.db");
        let mut catalog = sample();
        catalog
            .add_columns(vec![Column::new("_Rmag", vec![12.0, 13.0, 14.0])])
            .unwrap();
        write_database(&catalog, &path).unwrap();
        assert!(read_database(&path, DatabaseReadMode::default()).unwrap().is_transformed());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = read_database(dir.path().join("none.db"), DatabaseReadMode::default());
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
