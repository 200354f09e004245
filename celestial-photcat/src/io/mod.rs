//! Catalog persistence: FITS_LDAC interchange files and SQLite databases.

pub mod database;
pub mod ldac;

use crate::catalog::Catalog;
use crate::config::PhotcatConfig;
use crate::error::{Error, Result};
use std::path::Path;

pub use database::{read_database, write_database, DatabaseReadMode};
pub use ldac::{read_ldac, write_ldac};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Ldac,
    Database,
}

impl CatalogFormat {
    /// Format implied by a file extension: `.ldac`, `.cat`, `.fits`, `.fit`
    /// are LDAC; `.db`, `.sqlite`, `.sqlite3` are databases.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "ldac" | "cat" | "fits" | "fit" => Ok(Self::Ldac),
            "db" | "sqlite" | "sqlite3" => Ok(Self::Database),
            _ => Err(Error::Config(format!(
                "cannot tell catalog format of {}",
                path.display()
            ))),
        }
    }
}

/// Read a catalog in whichever format its extension names. An LDAC file
/// without a source table is an error here.
pub fn read_catalog<P: AsRef<Path>>(path: P, config: &PhotcatConfig) -> Result<Catalog> {
    let path = path.as_ref();
    match CatalogFormat::from_path(path)? {
        CatalogFormat::Database => read_database(path, DatabaseReadMode::default()),
        CatalogFormat::Ldac => read_ldac(path, None, &config.ldac)?.ok_or_else(|| Error::MalformedSource {
            path: path.display().to_string(),
            reason: "no LDAC_OBJECTS table".to_string(),
        }),
    }
}

/// Write a catalog in whichever format the extension names. Returns the
/// number of sources written.
pub fn write_catalog<P: AsRef<Path>>(catalog: &Catalog, path: P, config: &PhotcatConfig) -> Result<usize> {
    let path = path.as_ref();
    match CatalogFormat::from_path(path)? {
        CatalogFormat::Database => write_database(catalog, path),
        CatalogFormat::Ldac => write_ldac(catalog, path, &config.ldac),
    }
}
