//! Filter transformations: deriving magnitudes in bands a survey did not
//! observe.
//!
//! Derived columns are named `_<band>mag` and `_e_<band>mag`. The presence of
//! `_<band>mag` marks the band as done, so applying a transformation twice is
//! a no-op that reports the current row count.

pub mod recipes;
pub mod regression;

use crate::catalog::Catalog;
use crate::config::TransformConfig;
use crate::error::{Error, Result};
use crate::survey::Survey;
use crate::table::{Column, Unit};
use recipes::{Photometry, Recipe};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Target photometric band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// Johnson B.
    B,
    /// Johnson V.
    V,
    /// Cousins R.
    R,
    /// Cousins I.
    I,
    SloanG,
    SloanR,
    SloanI,
    SloanZ,
    UkirtY,
    UkirtZ,
    UkirtJ,
    UkirtH,
    UkirtK,
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Self::B => "B",
            Self::V => "V",
            Self::R => "R",
            Self::I => "I",
            Self::SloanG => "g",
            Self::SloanR => "r",
            Self::SloanI => "i",
            Self::SloanZ => "z",
            Self::UkirtY => "Y",
            Self::UkirtZ => "Z",
            Self::UkirtJ => "J",
            Self::UkirtH => "H",
            Self::UkirtK => "K",
        }
    }

    pub fn magnitude_column(self) -> String {
        format!("_{}mag", self.label())
    }

    pub fn error_column(self) -> String {
        format!("_e_{}mag", self.label())
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Band {
    type Err = Error;

    /// Case matters: `r` is SDSS r, `R` is Cousins R. UKIRT bands also accept
    /// a `_UKIRT` suffix (`Z_UKIRT`).
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let name = name.strip_suffix("_UKIRT").unwrap_or(name);
        match name {
            "B" => Ok(Self::B),
            "V" => Ok(Self::V),
            "R" => Ok(Self::R),
            "I" => Ok(Self::I),
            "g" => Ok(Self::SloanG),
            "r" => Ok(Self::SloanR),
            "i" => Ok(Self::SloanI),
            "z" => Ok(Self::SloanZ),
            "Y" => Ok(Self::UkirtY),
            "Z" => Ok(Self::UkirtZ),
            "J" => Ok(Self::UkirtJ),
            "H" => Ok(Self::UkirtH),
            "K" => Ok(Self::UkirtK),
            _ => Err(Error::Config(format!("unknown band '{}'", s))),
        }
    }
}

impl Catalog {
    /// Derive `band` from the catalog's survey photometry.
    ///
    /// Returns the number of rows carrying the derived band: the current row
    /// count when the band already exists, 0 when no recipe applies or no
    /// row survives. Rows the recipe cannot use are removed.
    pub fn transform_filters(&mut self, band: Band, config: &TransformConfig) -> Result<usize> {
        if self.is_empty() {
            warn!(catalog = %self.name, band = %band, "empty catalog, nothing to transform");
            return Ok(0);
        }
        if self.has_field(&band.magnitude_column()) {
            return Ok(self.len());
        }

        let family = self.family.or_else(|| Survey::detect(&self.name));
        let recipe = match family.and_then(|f| Recipe::select(f, band, &self.magnitude_system)) {
            Some(recipe) => recipe,
            None => {
                let err = Error::UnsupportedTransform {
                    family: family.map_or_else(|| self.name.clone(), |f| f.name().to_string()),
                    band: band.label().to_string(),
                };
                warn!(catalog = %self.name, magsys = %self.magnitude_system, "{}", err);
                return Ok(0);
            }
        };

        let photometry = Photometry::load(self, recipe.inputs())?;
        let derivation = match recipe.derive(band, &photometry, config)? {
            Some(derivation) => derivation,
            None => {
                warn!(catalog = %self.name, band = %band, ?recipe, "no sources survive transformation");
                return Ok(0);
            }
        };

        let mut columns = Vec::new();
        for derived in derivation.bands {
            // Bands added by an earlier multi-band run stay untouched.
            if self.has_field(&derived.band.magnitude_column()) {
                continue;
            }
            columns.push(Column::new(derived.band.magnitude_column(), derived.values).with_unit(Unit::Magnitude));
            columns.push(Column::new(derived.band.error_column(), derived.errors).with_unit(Unit::Magnitude));
        }
        self.add_columns(columns)?;
        self.apply_mask(&derivation.keep)?;

        let count = self.len();
        self.mark_transformed();
        self.magnitude_system = recipe.resulting_system(band, &self.magnitude_system);
        self.record_history(format!(
            "{} transformed to {} ({})",
            count,
            recipe.history_label(band),
            recipe.output_system_tag()
        ));
        info!(
            catalog = %self.name,
            band = %band,
            ?recipe,
            rows = count,
            magsys = %self.magnitude_system,
            "transformed catalog"
        );
        Ok(count)
    }
}
