//! Minimal FITS container support for source catalogs.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`header`] | 80-character cards, keyword values, header blocks |
//! | [`hdu`] | Header-data units and data sizing |
//! | [`bintable`] | `BINTABLE` extensions with fixed-width columns |
//! | [`io`] | Reading and writing multi-HDU files |
//!
//! Image arrays are carried as raw bytes; nothing here interprets pixels.

pub mod bintable;
pub mod error;
pub mod hdu;
pub mod header;
pub mod io;

pub use bintable::{BinaryTable, ColumnValues, FieldType, TForm, TableColumn};
pub use error::{FitsError, Result};
pub use hdu::Hdu;
pub use header::{Header, Keyword, KeywordValue};
pub use io::{parse_hdus, read_fits, read_primary_header, write_fits};
