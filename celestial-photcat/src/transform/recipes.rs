//! Published filter transformations, one [`Recipe`] per (survey, band family).
//!
//! | Recipe | Input | Output | Reference |
//! |--------|-------|--------|-----------|
//! | [`Recipe::SloanToJohnsonCousins`] | SDSS / SkyMapper `gri` | B V R I | Chonis & Gaskell 2008, AJ 135 |
//! | [`Recipe::ApassToCousins`] | APASS `ri` (Vega) | R I | Chonis & Gaskell 2008, AJ 135 |
//! | [`Recipe::TwoMassToUkirt`] | 2MASS `JHKs` (Vega) | UKIRT Y Z J H K | Hodgkin et al. 2009, MNRAS 394 |
//! | [`Recipe::PanStarrsToJohnsonCousins`] | PS1 `gri` | B V R I | Tonry et al. 2012, ApJ 750 |
//! | [`Recipe::PanStarrsToSloan`] | PS1 `griz` | SDSS g r i z | Tonry et al. 2012, ApJ 750 |
//! | [`Recipe::SloanToUkirtZ`] | SDSS `iz` (AB) | UKIRT Z | Hewett et al. 2006, MNRAS 367 |
//! | [`Recipe::GaiaToJohnsonCousins`] | Gaia `G BP RP` | V R I | Gaia DR2 documentation, 5.3.7 |
//! | [`Recipe::GaiaToSloan`] | Gaia `G BP RP` | SDSS g r i | Gaia DR2 documentation, 5.3.7 |

use super::regression::clip_outliers;
use super::Band;
use crate::catalog::{Catalog, MagnitudeSystem};
use crate::config::TransformConfig;
use crate::error::Result;
use crate::survey::Survey;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipe {
    SloanToJohnsonCousins,
    ApassToCousins,
    TwoMassToUkirt,
    PanStarrsToJohnsonCousins,
    PanStarrsToSloan,
    SloanToUkirtZ,
    GaiaToJohnsonCousins,
    GaiaToSloan,
}

impl Recipe {
    /// Recipe for a survey and target band, if one exists. Recipes with a
    /// magnitude-system precondition only apply when it holds.
    pub fn select(family: Survey, band: Band, system: &MagnitudeSystem) -> Option<Recipe> {
        use Band::*;
        match (family, band) {
            (Survey::SdssR9 | Survey::SdssR13 | Survey::SkyMapper, B | V | R | I) => {
                Some(Self::SloanToJohnsonCousins)
            }
            (Survey::Apass9, R | I) if *system == MagnitudeSystem::Vega => Some(Self::ApassToCousins),
            (Survey::TwoMass, UkirtY | UkirtZ | UkirtJ | UkirtH | UkirtK)
                if *system == MagnitudeSystem::Vega =>
            {
                Some(Self::TwoMassToUkirt)
            }
            (Survey::PanStarrs, B | V | R | I) => Some(Self::PanStarrsToJohnsonCousins),
            (Survey::PanStarrs, SloanG | SloanR | SloanI | SloanZ) => Some(Self::PanStarrsToSloan),
            (Survey::SdssR9 | Survey::SdssR13, UkirtZ) if *system == MagnitudeSystem::Ab => {
                Some(Self::SloanToUkirtZ)
            }
            (Survey::Gaia, V | R | I) => Some(Self::GaiaToJohnsonCousins),
            (Survey::Gaia, SloanG | SloanR | SloanI) => Some(Self::GaiaToSloan),
            _ => None,
        }
    }

    /// Catalog columns the recipe reads.
    pub fn inputs(self) -> &'static [&'static str] {
        match self {
            Self::SloanToJohnsonCousins => &["gmag", "e_gmag", "rmag", "e_rmag", "imag", "e_imag"],
            Self::ApassToCousins => &["rmag", "e_rmag", "imag", "e_imag"],
            Self::TwoMassToUkirt => &["Jmag", "e_Jmag", "Hmag", "e_Hmag", "Ksmag", "e_Ksmag"],
            Self::PanStarrsToJohnsonCousins => {
                &["gp1mag", "e_gp1mag", "rp1mag", "e_rp1mag", "ip1mag", "e_ip1mag"]
            }
            Self::PanStarrsToSloan => &[
                "gp1mag", "e_gp1mag", "rp1mag", "e_rp1mag", "ip1mag", "e_ip1mag", "zp1mag",
                "e_zp1mag",
            ],
            Self::SloanToUkirtZ => &["zmag", "e_zmag", "imag"],
            Self::GaiaToJohnsonCousins | Self::GaiaToSloan => &["Gmag", "e_Gmag", "BPmag", "RPmag"],
        }
    }

    /// Bands written by one application for `band`.
    pub fn outputs(self, band: Band) -> Vec<Band> {
        use Band::*;
        match self {
            Self::SloanToJohnsonCousins | Self::ApassToCousins | Self::SloanToUkirtZ => vec![band],
            Self::TwoMassToUkirt => vec![UkirtY, UkirtZ, UkirtJ, UkirtH, UkirtK],
            Self::PanStarrsToJohnsonCousins => vec![B, V, R, I],
            Self::PanStarrsToSloan => vec![SloanG, SloanR, SloanI, SloanZ],
            Self::GaiaToJohnsonCousins => vec![V, R, I],
            Self::GaiaToSloan => vec![SloanG, SloanR, SloanI],
        }
    }

    /// Label used in the catalog history.
    pub(crate) fn history_label(self, band: Band) -> String {
        match self {
            Self::TwoMassToUkirt => "UKIRT YZJHK".to_string(),
            Self::SloanToUkirtZ => "UKIRT Z".to_string(),
            _ => band.label().to_string(),
        }
    }

    /// Zero-point convention of the derived magnitudes.
    pub(crate) fn output_system_tag(self) -> &'static str {
        match self {
            Self::PanStarrsToSloan | Self::GaiaToSloan => "AB",
            _ => "Vega",
        }
    }

    /// Magnitude system of the catalog after the transformation.
    pub(crate) fn resulting_system(self, band: Band, current: &MagnitudeSystem) -> MagnitudeSystem {
        match self {
            Self::SloanToJohnsonCousins => {
                const PREFIX: &str = "AB (ugriz), Vega (";
                let mut bands: Vec<String> = match current {
                    MagnitudeSystem::Composite(text) => text
                        .strip_prefix(PREFIX)
                        .and_then(|rest| rest.strip_suffix(')'))
                        .map(|list| list.split(", ").map(str::to_string).collect())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                if !bands.iter().any(|b| b == band.label()) {
                    bands.push(band.label().to_string());
                }
                MagnitudeSystem::Composite(format!("{}{})", PREFIX, bands.join(", ")))
            }
            Self::SloanToUkirtZ => MagnitudeSystem::Composite("AB (ugriz), Z_UKIRT (Vega)".to_string()),
            Self::PanStarrsToSloan | Self::GaiaToSloan => MagnitudeSystem::Ab,
            _ => MagnitudeSystem::Vega,
        }
    }

    /// Compute the derived bands and the rows to keep. `None` means no row
    /// passed the recipe's selection.
    pub(crate) fn derive(
        self,
        band: Band,
        photometry: &Photometry,
        config: &TransformConfig,
    ) -> Result<Option<Derivation>> {
        let rows = photometry.rows;
        let sentinel = config.sentinel;

        let p = photometry;
        let (valid, bands): (Vec<bool>, Vec<DerivedBand>) = match self {
            Self::SloanToJohnsonCousins => {
                return sloan_self_calibrated(band, p, config.clip_sigma);
            }
            Self::ApassToCousins => {
                let (r, i) = (p.get("rmag"), p.get("imag"));
                let valid = (0..rows).map(|k| open_range(r[k] - i[k], 0.08, 0.5)).collect();
                (valid, vec![cousins_from_ri(band, p)])
            }
            Self::TwoMassToUkirt => {
                let (j, h) = (p.get("Jmag"), p.get("Hmag"));
                let valid = (0..rows)
                    .map(|k| (-0.1..=1.0).contains(&(j[k] - h[k])) && j[k] <= 18.0 && h[k] <= 17.0)
                    .collect();
                (valid, ukirt_from_twomass(p))
            }
            Self::PanStarrsToJohnsonCousins => (vec![true; rows], johnson_cousins_from_ps1(p)),
            Self::PanStarrsToSloan => (vec![true; rows], sloan_from_ps1(p)),
            Self::SloanToUkirtZ => {
                let (z, e_z, i) = (p.get("zmag"), p.get("e_zmag"), p.get("imag"));
                let (values, errors) = (0..rows)
                    .map(|k| (z[k] - 0.01 + 0.06 * (i[k] - z[k]) - 0.528, e_z[k]))
                    .unzip();
                (
                    vec![true; rows],
                    vec![DerivedBand {
                        band: Band::UkirtZ,
                        values,
                        errors,
                    }],
                )
            }
            Self::GaiaToJohnsonCousins => {
                let color = p.gaia_color();
                let valid = color.iter().map(|&c| open_range(c, -0.5, 2.75)).collect();
                (valid, johnson_cousins_from_gaia(p))
            }
            Self::GaiaToSloan => {
                let (lo, hi) = match band {
                    Band::SloanR => (0.2, 2.7),
                    Band::SloanI => (0.0, 4.5),
                    _ => (-0.5, 2.75),
                };
                let color = p.gaia_color();
                let valid = color.iter().map(|&c| open_range(c, lo, hi)).collect();
                (valid, sloan_from_gaia(p))
            }
        };

        let mut bands = bands;
        for derived in &mut bands {
            for (k, ok) in valid.iter().enumerate() {
                if !ok {
                    derived.values[k] = sentinel;
                    derived.errors[k] = sentinel;
                }
            }
        }

        let target = bands
            .iter()
            .find(|d| d.band == band)
            .map(|d| &d.values)
            .unwrap_or(&bands[0].values);
        let keep: Vec<bool> = target.iter().map(|&v| v.is_finite() && v < sentinel).collect();

        if !keep.iter().any(|&k| k) {
            return Ok(None);
        }
        Ok(Some(Derivation { bands, keep }))
    }
}

/// Derived magnitudes and uncertainties for one band, one entry per row.
#[derive(Debug, Clone)]
pub(crate) struct DerivedBand {
    pub band: Band,
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Derivation {
    pub bands: Vec<DerivedBand>,
    pub keep: Vec<bool>,
}

/// Input magnitude columns loaded from a catalog.
pub(crate) struct Photometry {
    columns: HashMap<&'static str, Vec<f64>>,
    rows: usize,
}

impl Photometry {
    pub(crate) fn load(catalog: &Catalog, names: &[&'static str]) -> Result<Self> {
        let mut columns = HashMap::new();
        for &name in names {
            columns.insert(name, catalog.float_values(name)?);
        }
        Ok(Self {
            columns,
            rows: catalog.len(),
        })
    }

    fn get(&self, name: &str) -> &[f64] {
        self.columns.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn gaia_color(&self) -> Vec<f64> {
        let (bp, rp) = (self.get("BPmag"), self.get("RPmag"));
        bp.iter().zip(rp).map(|(b, r)| b - r).collect()
    }
}

fn open_range(value: f64, lo: f64, hi: f64) -> bool {
    value > lo && value < hi
}

fn quadrature(terms: &[f64]) -> f64 {
    libm::sqrt(terms.iter().map(|t| t * t).sum())
}

fn per_row(rows: usize, f: impl Fn(usize) -> (f64, f64)) -> (Vec<f64>, Vec<f64>) {
    (0..rows).map(f).unzip()
}

fn sloan_self_calibrated(band: Band, p: &Photometry, clip_sigma: f64) -> Result<Option<Derivation>> {
    let (g, r, i) = (p.get("gmag"), p.get("rmag"), p.get("imag"));
    let in_range = |m: f64| (14.5..19.5).contains(&m);

    let candidates: Vec<usize> = (0..p.rows)
        .filter(|&k| {
            open_range(r[k] - i[k], 0.08, 0.5)
                && open_range(g[k] - r[k], 0.2, 1.4)
                && in_range(g[k])
                && in_range(r[k])
                && in_range(i[k])
        })
        .collect();
    if candidates.is_empty() {
        return Ok(None);
    }

    let ri: Vec<f64> = candidates.iter().map(|&k| r[k] - i[k]).collect();
    let gr: Vec<f64> = candidates.iter().map(|&k| g[k] - r[k]).collect();
    let (_, inliers) = clip_outliers(&ri, &gr, clip_sigma)?;

    let mut keep = vec![false; p.rows];
    for (&row, &inlier) in candidates.iter().zip(&inliers) {
        keep[row] = inlier;
    }

    let derived = match band {
        Band::R | Band::I => cousins_from_ri(band, p),
        _ => johnson_from_gr(band, p),
    };
    for (k, flag) in keep.iter_mut().enumerate() {
        *flag &= derived.values[k].is_finite();
    }

    Ok(Some(Derivation {
        bands: vec![derived],
        keep,
    }))
}

/// SDSS B and V from g and r.
fn johnson_from_gr(band: Band, p: &Photometry) -> DerivedBand {
    let (g, r, e_g, e_r) = (p.get("gmag"), p.get("rmag"), p.get("e_gmag"), p.get("e_rmag"));
    let (values, errors) = per_row(p.rows, |k| {
        let gr = g[k] - r[k];
        match band {
            Band::B => (
                g[k] + 0.327 * gr + 0.216,
                quadrature(&[(1.0 + 0.327) * e_g[k], 0.327 * e_r[k], gr * 0.047, 0.027]),
            ),
            _ => (
                g[k] - 0.587 * gr - 0.011,
                quadrature(&[(1.0 + 0.587) * e_g[k], 0.587 * e_r[k], gr * 0.022, 0.011]),
            ),
        }
    });
    DerivedBand { band, values, errors }
}

/// Cousins R and I from r and i.
fn cousins_from_ri(band: Band, p: &Photometry) -> DerivedBand {
    let (r, i, e_r, e_i) = (p.get("rmag"), p.get("imag"), p.get("e_rmag"), p.get("e_imag"));
    let (values, errors) = per_row(p.rows, |k| {
        let ri = r[k] - i[k];
        match band {
            Band::R => (
                r[k] - 0.272 * ri - 0.159,
                quadrature(&[(1.0 - 0.272) * e_r[k], 0.272 * e_i[k], ri * 0.092, 0.022]),
            ),
            _ => (
                i[k] - 0.337 * ri - 0.370,
                quadrature(&[(1.0 + 0.337) * e_i[k], 0.337 * e_r[k], ri * 0.191, 0.041]),
            ),
        }
    });
    DerivedBand { band, values, errors }
}

fn ukirt_from_twomass(p: &Photometry) -> Vec<DerivedBand> {
    let (j, h, k) = (p.get("Jmag"), p.get("Hmag"), p.get("Ksmag"));
    let (e_j, e_h, e_k) = (p.get("e_Jmag"), p.get("e_Hmag"), p.get("e_Ksmag"));
    let rows = p.rows;

    let band = |band: Band, f: &dyn Fn(usize) -> (f64, f64)| {
        let (values, errors) = per_row(rows, f);
        DerivedBand { band, values, errors }
    };

    vec![
        band(Band::UkirtY, &|n| (j[n] + 0.5 * (j[n] - h[n]) + 0.08, e_j[n])),
        // 0.064 mag is the systematic offset between UKIRT Z and SDSS z.
        band(Band::UkirtZ, &|n| {
            (j[n] + 0.95 * (j[n] - h[n]) + 0.064, quadrature(&[e_j[n], 0.035]))
        }),
        band(Band::UkirtJ, &|n| (j[n] - 0.065 * (j[n] - h[n]), e_j[n])),
        band(Band::UkirtH, &|n| (h[n] + 0.07 * (j[n] - k[n]) - 0.03, e_h[n])),
        band(Band::UkirtK, &|n| (k[n] + 0.01 * (j[n] - k[n]), e_k[n])),
    ]
}

fn johnson_cousins_from_ps1(p: &Photometry) -> Vec<DerivedBand> {
    let (g, r, i) = (p.get("gp1mag"), p.get("rp1mag"), p.get("ip1mag"));
    let (e_g, e_r, e_i) = (p.get("e_gp1mag"), p.get("e_rp1mag"), p.get("e_ip1mag"));

    let terms: [(Band, &[f64], &[f64], [f64; 3], f64); 4] = [
        (Band::B, g, e_g, [0.212, 0.556, 0.034], 0.032),
        (Band::V, g, e_g, [0.005, -0.536, 0.011], 0.012),
        (Band::R, r, e_r, [-0.137, -0.108, -0.029], 0.015),
        (Band::I, i, e_i, [-0.366, -0.136, -0.018], 0.017),
    ];
    quadratic_in_gr(p.rows, g, r, &terms)
}

fn sloan_from_ps1(p: &Photometry) -> Vec<DerivedBand> {
    let (g, r, i, z) = (p.get("gp1mag"), p.get("rp1mag"), p.get("ip1mag"), p.get("zp1mag"));
    let (e_g, e_r, e_i, e_z) = (
        p.get("e_gp1mag"),
        p.get("e_rp1mag"),
        p.get("e_ip1mag"),
        p.get("e_zp1mag"),
    );

    let terms: [(Band, &[f64], &[f64], [f64; 3], f64); 4] = [
        (Band::SloanG, g, e_g, [0.013, 0.145, 0.019], 0.008),
        (Band::SloanR, r, e_r, [-0.001, 0.004, 0.007], 0.004),
        (Band::SloanI, i, e_i, [-0.005, 0.011, 0.010], 0.004),
        (Band::SloanZ, z, e_z, [0.013, -0.039, -0.012], 0.01),
    ];
    quadratic_in_gr(p.rows, g, r, &terms)
}

/// `m' = m + c0 + c1 (g-r) + c2 (g-r)^2` with the calibration scatter added
/// in quadrature to the error of `m`.
fn quadratic_in_gr(
    rows: usize,
    g: &[f64],
    r: &[f64],
    terms: &[(Band, &[f64], &[f64], [f64; 3], f64)],
) -> Vec<DerivedBand> {
    terms
        .iter()
        .map(|&(band, mag, err, c, scatter)| {
            let (values, errors) = per_row(rows, |k| {
                let gr = g[k] - r[k];
                (
                    mag[k] + c[0] + c[1] * gr + c[2] * gr * gr,
                    quadrature(&[err[k], scatter]),
                )
            });
            DerivedBand { band, values, errors }
        })
        .collect()
}

/// Polynomial in BP-RP added to G.
fn gaia_polynomial(p: &Photometry, terms: &[(Band, [f64; 4], f64)]) -> Vec<DerivedBand> {
    let (g, e_g) = (p.get("Gmag"), p.get("e_Gmag"));
    let color = p.gaia_color();
    terms
        .iter()
        .map(|&(band, c, scatter)| {
            let (values, errors) = per_row(p.rows, |k| {
                let x = color[k];
                (
                    g[k] + c[0] + c[1] * x + c[2] * x * x + c[3] * x * x * x,
                    quadrature(&[e_g[k], scatter]),
                )
            });
            DerivedBand { band, values, errors }
        })
        .collect()
}

fn johnson_cousins_from_gaia(p: &Photometry) -> Vec<DerivedBand> {
    gaia_polynomial(
        p,
        &[
            (Band::V, [-0.0176, -0.00686, -0.1732, 0.0], 0.045858),
            (Band::R, [-0.003226, 0.3833, -0.1345, 0.0], 0.04840),
            (Band::I, [-0.02085, 0.7419, -0.09531, 0.0], 0.04956),
        ],
    )
}

fn sloan_from_gaia(p: &Photometry) -> Vec<DerivedBand> {
    gaia_polynomial(
        p,
        &[
            (Band::SloanG, [0.13518, -0.46245, -0.25171, 0.021349], 0.16497),
            (Band::SloanR, [-0.12879, 0.24662, -0.027464, -0.049465], 0.066739),
            (Band::SloanI, [-0.29676, 0.64728, -0.10141, 0.0], 0.098957),
        ],
    )
}
