//! Photometric source catalogs for field calibration.
//!
//! A [`Catalog`] is a column store of sources (positions, magnitudes and
//! their uncertainties) together with its provenance. Catalogs come from
//! survey queries, Source Extractor output or earlier runs saved to SQLite,
//! and are cross-matched against each other to tie instrumental photometry
//! to a reference survey.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`table`] | Typed columns ([`ColumnData`]), units, the row-aligned [`Table`] |
//! | [`catalog`] | [`Catalog`]: metadata, history, validated mutations |
//! | [`survey`] | [`Survey`] recipes turning raw provider rows into canonical catalogs |
//! | [`matching`] | k-d tree cross-matching ([`Catalog::match_with`]) |
//! | [`transform`] | Filter transformations ([`Catalog::transform_filters`]) |
//! | [`io`] | FITS_LDAC and SQLite codecs |
//! | [`config`] | [`PhotcatConfig`], loaded from JSON or defaulted |
//!
//! # Canonical layout
//!
//! Survey catalogs start with `ident, ra_deg, dec_deg, e_ra_deg, e_dec_deg,
//! mag, e_mag` followed by the survey's band columns. Positions and their
//! errors are in degrees and right ascension is in `[0, 360)`. Columns
//! derived by a filter transformation start with `_`.
//!
//! # Quick Start
//!
//! ```ignore
//! use celestial_photcat::{io, transform::Band, PhotcatConfig};
//!
//! let config = PhotcatConfig::default();
//! let mut reference = io::read_database("panstarrs.db", Default::default())?;
//! reference.transform_filters(Band::R, &config.transform)?;
//!
//! let field = io::read_ldac("field.ldac", None, &config.ldac)?.expect("sources");
//! let matched = field.match_positions(&reference, config.matching.tolerance_deg)?;
//! ```
//!
//! # Logging
//!
//! Every mutation and codec call emits `tracing` events. The library never
//! installs a subscriber.
//!
//! # Features
//!
//! - **`cli`**: Builds the `photcat` binary for inspecting, converting,
//!   transforming and matching catalog files.

pub mod catalog;
pub mod config;
pub mod error;
pub mod io;
pub mod matching;
pub mod survey;
pub mod table;
pub mod transform;

pub use catalog::{Catalog, MagnitudeSystem, ObservationTime};
pub use config::PhotcatConfig;
pub use error::{Error, Result};
pub use matching::MatchResult;
pub use survey::{CatalogProvider, ConeQuery, Survey};
pub use table::{Column, ColumnData, ColumnType, Table, Unit};
pub use transform::Band;
