//! Reference surveys and the ingestion of their raw query results.
//!
//! Remote catalog services are reached through a [`CatalogProvider`], which
//! returns survey rows with their native column names. [`ingest`] turns such a
//! raw table into a [`Catalog`] with the canonical layout
//!
//! ```text
//! ident, ra_deg, dec_deg, e_ra_deg, e_dec_deg, mag, e_mag, [bands...]
//! ```
//!
//! Columns a survey does not provide (`mag` for Pan-STARRS, for instance) are
//! simply absent. Positional uncertainties are always stored in degrees and
//! right ascension is always non-negative.

use crate::catalog::{Catalog, MagnitudeSystem};
use crate::config::{PhotcatConfig, SurveyConfig};
use crate::error::{Error, Result};
use crate::io::ldac;
use crate::table::{Column, ColumnData, Table, Unit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Rows returned by a provider, before canonicalization.
pub type RawTable = Table;

/// Columns placed first, in this order, after ingestion.
pub const CANONICAL_ORDER: [&str; 7] = [
    "ident", "ra_deg", "dec_deg", "e_ra_deg", "e_dec_deg", "mag", "e_mag",
];

/// Julian date of the TGAS reference epoch (J2015.0).
pub const TGAS_EPOCH_JD: f64 = 2457023.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Survey {
    PanStarrs,
    SkyMapper,
    Gaia,
    Tgas,
    TwoMass,
    Urat1,
    Apass9,
    SdssR9,
    SdssR13,
}

impl Survey {
    pub const ALL: [Survey; 9] = [
        Survey::PanStarrs,
        Survey::SkyMapper,
        Survey::Gaia,
        Survey::Tgas,
        Survey::TwoMass,
        Survey::Urat1,
        Survey::Apass9,
        Survey::SdssR9,
        Survey::SdssR13,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::PanStarrs => "PANSTARRS",
            Self::SkyMapper => "SkyMapper",
            Self::Gaia => "GAIA",
            Self::Tgas => "TGAS",
            Self::TwoMass => "2MASS",
            Self::Urat1 => "URAT-1",
            Self::Apass9 => "APASS9",
            Self::SdssR9 => "SDSS-R9",
            Self::SdssR13 => "SDSS-R13",
        }
    }

    /// Guess the survey from a catalog name such as `"SDSS-R13_field3"`.
    pub fn detect(name: &str) -> Option<Survey> {
        let upper = name.to_ascii_uppercase();
        if upper.contains("SDSS-R13") {
            Some(Self::SdssR13)
        } else if upper.contains("SDSS") {
            Some(Self::SdssR9)
        } else if upper.contains("PANSTARRS") {
            Some(Self::PanStarrs)
        } else if upper.contains("SKYMAPPER") {
            Some(Self::SkyMapper)
        } else if upper.contains("TGAS") {
            Some(Self::Tgas)
        } else if upper.contains("GAIA") {
            Some(Self::Gaia)
        } else if upper.contains("2MASS") {
            Some(Self::TwoMass)
        } else if upper.contains("URAT") {
            Some(Self::Urat1)
        } else if upper.contains("APASS") {
            Some(Self::Apass9)
        } else {
            None
        }
    }

    pub fn default_magnitude_system(self) -> MagnitudeSystem {
        match self {
            Self::PanStarrs | Self::SkyMapper | Self::SdssR9 | Self::SdssR13 => MagnitudeSystem::Ab,
            Self::Gaia | Self::Tgas | Self::TwoMass | Self::Urat1 | Self::Apass9 => {
                MagnitudeSystem::Vega
            }
        }
    }

    pub fn is_sdss(self) -> bool {
        matches!(self, Self::SdssR9 | Self::SdssR13)
    }

    /// Unit of the raw positional-error columns when the provider does not
    /// tag them.
    fn raw_error_unit(self) -> Unit {
        match self {
            Self::Gaia | Self::Tgas | Self::TwoMass | Self::Urat1 => Unit::Milliarcsec,
            _ => Unit::Arcsec,
        }
    }

    /// Native-to-canonical column names.
    fn renames(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::PanStarrs => &[
                ("objID", "ident"),
                ("RAJ2000", "ra_deg"),
                ("DEJ2000", "dec_deg"),
                ("e_RAJ2000", "e_ra_deg"),
                ("e_DEJ2000", "e_dec_deg"),
                ("gmag", "gp1mag"),
                ("e_gmag", "e_gp1mag"),
                ("rmag", "rp1mag"),
                ("e_rmag", "e_rp1mag"),
                ("imag", "ip1mag"),
                ("e_imag", "e_ip1mag"),
                ("zmag", "zp1mag"),
                ("e_zmag", "e_zp1mag"),
                ("ymag", "yp1mag"),
                ("e_ymag", "e_yp1mag"),
            ],
            Self::SkyMapper => &[
                ("object_id", "ident"),
                ("raj2000", "ra_deg"),
                ("dej2000", "dec_deg"),
                ("e_raj2000", "e_ra_deg"),
                ("e_dej2000", "e_dec_deg"),
                ("u_psf", "umag"),
                ("e_u_psf", "e_umag"),
                ("v_psf", "vmag"),
                ("e_v_psf", "e_vmag"),
                ("g_psf", "gmag"),
                ("e_g_psf", "e_gmag"),
                ("r_psf", "rmag"),
                ("e_r_psf", "e_rmag"),
                ("i_psf", "imag"),
                ("e_i_psf", "e_imag"),
                ("z_psf", "zmag"),
                ("e_z_psf", "e_zmag"),
            ],
            Self::Gaia => &[
                ("Source", "ident"),
                ("RA_ICRS", "ra_deg"),
                ("DE_ICRS", "dec_deg"),
                ("e_RA_ICRS", "e_ra_deg"),
                ("e_DE_ICRS", "e_dec_deg"),
                ("Epoch", "epoch_yr"),
            ],
            Self::Tgas => &[
                ("Source", "ident"),
                ("RA_ICRS", "ra_deg"),
                ("DE_ICRS", "dec_deg"),
                ("e_RA_ICRS", "e_ra_deg"),
                ("e_DE_ICRS", "e_dec_deg"),
                ("__Gmag_", "mag"),
            ],
            Self::TwoMass => &[
                ("_2MASS", "ident"),
                ("RAJ2000", "ra_deg"),
                ("DEJ2000", "dec_deg"),
                ("Kmag", "Ksmag"),
                ("e_Kmag", "e_Ksmag"),
            ],
            Self::Urat1 => &[
                ("URAT1", "ident"),
                ("RAJ2000", "ra_deg"),
                ("DEJ2000", "dec_deg"),
                ("f.mag", "mag"),
                ("e_f.mag", "e_mag"),
            ],
            Self::Apass9 => &[
                ("recno", "ident"),
                ("RAJ2000", "ra_deg"),
                ("DEJ2000", "dec_deg"),
                ("e_RAJ2000", "e_ra_deg"),
                ("e_DEJ2000", "e_dec_deg"),
                ("g_mag", "gmag"),
                ("e_g_mag", "e_gmag"),
                ("r_mag", "rmag"),
                ("e_r_mag", "e_rmag"),
                ("i_mag", "imag"),
                ("e_i_mag", "e_imag"),
            ],
            Self::SdssR9 => &[
                ("SDSS9", "ident"),
                ("RA_ICRS", "ra_deg"),
                ("DE_ICRS", "dec_deg"),
                ("e_RA_ICRS", "e_ra_deg"),
                ("e_DE_ICRS", "e_dec_deg"),
            ],
            Self::SdssR13 => &[
                ("objID", "ident"),
                ("ra", "ra_deg"),
                ("dec", "dec_deg"),
                ("raErr", "e_ra_deg"),
                ("decErr", "e_dec_deg"),
                ("fiberMag_u", "umag"),
                ("fiberMagErr_u", "e_umag"),
                ("fiberMag_g", "gmag"),
                ("fiberMagErr_g", "e_gmag"),
                ("fiberMag_r", "rmag"),
                ("fiberMagErr_r", "e_rmag"),
                ("fiberMag_i", "imag"),
                ("fiberMagErr_i", "e_imag"),
                ("fiberMag_z", "zmag"),
                ("fiberMagErr_z", "e_zmag"),
            ],
        }
    }
}

impl fmt::Display for Survey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Survey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|survey| survey.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Config(format!("unknown survey '{}'", s)))
    }
}

/// Sky region and limits for one provider query.
#[derive(Debug, Clone, PartialEq)]
pub struct ConeQuery {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub radius_deg: f64,
    pub survey: Survey,
    pub max_rows: usize,
    pub max_mag: f64,
}

impl ConeQuery {
    pub fn new(survey: Survey, ra_deg: f64, dec_deg: f64, radius_deg: f64) -> Self {
        Self {
            ra_deg,
            dec_deg,
            radius_deg,
            survey,
            max_rows: 10_000,
            max_mag: 21.0,
        }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_max_mag(mut self, max_mag: f64) -> Self {
        self.max_mag = max_mag;
        self
    }
}

/// Source of raw survey rows. An empty table is a valid answer.
pub trait CatalogProvider {
    fn query(&self, query: &ConeQuery) -> Result<RawTable>;
}

/// Query a provider and canonicalize the result. When `save_as` is given the
/// catalog is also written there as FITS_LDAC.
pub fn download_catalog<P: CatalogProvider + ?Sized>(
    provider: &P,
    query: &ConeQuery,
    config: &PhotcatConfig,
    save_as: Option<&Path>,
) -> Result<Catalog> {
    info!(
        survey = %query.survey,
        ra = query.ra_deg,
        dec = query.dec_deg,
        radius = query.radius_deg,
        "querying catalog provider"
    );

    let raw = provider.query(query)?;
    let catalog = ingest(query.survey, raw, query.max_mag, &config.survey)?;

    if let Some(path) = save_as {
        ldac::write_ldac(&catalog, path, &config.ldac)?;
    }
    Ok(catalog)
}

/// Canonicalize raw survey rows into a catalog.
pub fn ingest(survey: Survey, raw: RawTable, max_mag: f64, config: &SurveyConfig) -> Result<Catalog> {
    let mut catalog = Catalog::with_table(survey.name(), raw);
    catalog.family = Some(survey);
    catalog.magnitude_system = config
        .magnitude_systems
        .get(survey.name())
        .cloned()
        .unwrap_or_else(|| survey.default_magnitude_system());

    if catalog.table().columns().is_empty() {
        warn!(survey = %survey, "no data available");
        catalog.record_history("0 sources downloaded");
        return Ok(catalog);
    }

    apply_quality_filter(&mut catalog, survey, max_mag, config)?;

    let table = catalog.table_mut();
    for (native, canonical) in survey.renames() {
        if table.contains(native) {
            table.rename_column(native, canonical)?;
        }
    }

    match survey {
        Survey::TwoMass => project_error_ellipse(&mut catalog)?,
        Survey::Urat1 => duplicate_urat_sigma(&mut catalog)?,
        Survey::Tgas => {
            let rows = catalog.len();
            catalog
                .table_mut()
                .push_column(Column::new("epoch_jd", vec![TGAS_EPOCH_JD; rows]).with_unit(Unit::Day))?;
        }
        Survey::Gaia => {
            if let Some(epoch) = catalog.table_mut().column_mut("epoch_yr") {
                epoch.unit = Some(Unit::Year);
            }
        }
        Survey::SdssR9 | Survey::SdssR13 => apply_sdss_ab_offsets(&mut catalog),
        _ => {}
    }

    for name in ["ra_deg", "dec_deg"] {
        catalog.require_column(name)?;
    }
    catalog.wrap_right_ascension("ra_deg")?;

    for name in ["e_ra_deg", "e_dec_deg"] {
        if let Some(column) = catalog.table_mut().column_mut(name) {
            if column.unit.is_none() {
                column.unit = Some(survey.raw_error_unit());
            }
            column.convert_to_degrees()?;
        }
    }

    catalog.table_mut().reorder_front(&CANONICAL_ORDER);

    let rows = catalog.len();
    info!(survey = %survey, sources = rows, "sources retrieved");
    if rows == 0 {
        warn!(survey = %survey, "no sources left after ingestion");
    }
    // A download starts the catalog's history.
    catalog.set_history(Vec::new());
    catalog.record_history(format!("{} sources downloaded", rows));
    Ok(catalog)
}

fn apply_quality_filter(catalog: &mut Catalog, survey: Survey, max_mag: f64, config: &SurveyConfig) -> Result<()> {
    let ceiling = config.error_ceiling;
    let rejected = match survey {
        Survey::PanStarrs => {
            catalog.require_column("e_rmag")?;
            catalog.reject_sources_not_matching(|row| row.float("e_rmag").is_some_and(|e| e <= ceiling))?
        }
        Survey::SkyMapper => {
            catalog.require_column("e_r_psf")?;
            catalog.reject_sources_not_matching(|row| row.float("e_r_psf").is_some_and(|e| e <= ceiling))?
        }
        Survey::TwoMass => {
            catalog.require_column("Qflg")?;
            catalog.reject_sources_not_matching(|row| {
                row.text("Qflg")
                    .is_some_and(|flags| flags.chars().all(|c| matches!(c, 'A' | 'B' | 'C')))
            })?
        }
        Survey::SdssR13 => {
            for name in ["mode", "clean", "type", "fiberMag_g"] {
                catalog.require_column(name)?;
            }
            catalog.reject_sources_not_matching(|row| {
                row.float("mode") == Some(1.0)
                    && row.float("clean") == Some(1.0)
                    && row.float("type") == Some(6.0)
                    && row.float("fiberMag_g").is_some_and(|g| g < max_mag)
            })?
        }
        _ => 0,
    };
    if rejected > 0 {
        info!(survey = %survey, rejected, "quality filter");
    }
    Ok(())
}

/// Project the 2MASS error ellipse (arcsec, position angle in degrees) onto
/// RA and Dec, replacing the ellipse columns with `e_ra_deg`/`e_dec_deg`.
fn project_error_ellipse(catalog: &mut Catalog) -> Result<()> {
    let major = catalog.float_values("errMaj")?;
    let minor = catalog.float_values("errMin")?;
    let angle = catalog.float_values("errPA")?;

    let mut ra_err = Vec::with_capacity(major.len());
    let mut dec_err = Vec::with_capacity(major.len());

    for ((&a, &b), &pa_deg) in major.iter().zip(&minor).zip(&angle) {
        // A zero position angle makes the projection singular.
        let pa_deg = if pa_deg == 0.0 { 1.0 } else { pa_deg };
        let pa = pa_deg.to_radians();
        let (sin_pa, cos_pa) = (libm::sin(pa), libm::cos(pa));

        let x_opt = libm::atan(-b / a * libm::tan(pa));
        ra_err.push((a * libm::cos(x_opt) * cos_pa - b * libm::sin(x_opt) * sin_pa).abs() * 1000.0);

        let y_opt = libm::atan(b / a * cos_pa / sin_pa);
        dec_err.push((a * libm::cos(y_opt) * sin_pa + b * libm::sin(y_opt) * cos_pa).abs() * 1000.0);
    }

    let table = catalog.table_mut();
    table.insert_column(2, Column::new("e_ra_deg", ra_err).with_unit(Unit::Milliarcsec))?;
    table.insert_column(3, Column::new("e_dec_deg", dec_err).with_unit(Unit::Milliarcsec))?;
    for name in ["errMaj", "errMin", "errPA"] {
        table.remove_column(name);
    }

    if !table.contains("mag") {
        if let Some(j) = table.column("Jmag").map(|c| c.data.clone()) {
            table.push_column(Column {
                name: "mag".to_string(),
                data: j,
                unit: Some(Unit::Magnitude),
            })?;
        }
    }
    Ok(())
}

fn duplicate_urat_sigma(catalog: &mut Catalog) -> Result<()> {
    let sigma = catalog.require_column("sigm")?.clone();
    let unit = sigma.unit.or(Some(Unit::Milliarcsec));
    let table = catalog.table_mut();
    table.insert_column(
        3,
        Column {
            name: "e_ra_deg".to_string(),
            data: sigma.data.clone(),
            unit,
        },
    )?;
    table.insert_column(
        4,
        Column {
            name: "e_dec_deg".to_string(),
            data: sigma.data,
            unit,
        },
    )?;
    table.remove_column("sigm");
    Ok(())
}

/// SDSS u and z are offset from true AB by -0.04 and +0.02 mag.
fn apply_sdss_ab_offsets(catalog: &mut Catalog) {
    for (name, offset) in [("umag", -0.04), ("zmag", 0.02)] {
        if let Some(column) = catalog.table_mut().column_mut(name) {
            if let ColumnData::Float(values) = &mut column.data {
                values.iter_mut().for_each(|v| *v += offset);
            }
        }
    }
}
