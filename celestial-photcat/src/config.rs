//! Runtime configuration shared by ingestion, matching, transformation and
//! the file codecs.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! changes:
//!
//! ```json
//! { "ldac": { "max_flag": 3 }, "matching": { "tolerance_deg": 0.0005 } }
//! ```

use crate::catalog::MagnitudeSystem;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotcatConfig {
    pub ldac: LdacConfig,
    pub matching: MatchingConfig,
    pub transform: TransformConfig,
    pub survey: SurveyConfig,
}

impl PhotcatConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(tolerance) = self.matching.tolerance_deg {
            if !(tolerance > 0.0) {
                return Err(Error::Config(format!(
                    "matching tolerance must be positive, got {}",
                    tolerance
                )));
            }
        }
        if !(self.transform.clip_sigma > 0.0) {
            return Err(Error::Config(format!(
                "clip_sigma must be positive, got {}",
                self.transform.clip_sigma
            )));
        }
        if !(self.survey.error_ceiling > 0.0) {
            return Err(Error::Config(format!(
                "error_ceiling must be positive, got {}",
                self.survey.error_ceiling
            )));
        }
        Ok(())
    }
}

/// FITS_LDAC codec settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdacConfig {
    /// Image header keyword holding the observation midtime (JD).
    pub time_keyword: String,
    pub exptime_keyword: String,
    pub object_keyword: String,
    /// Card in the `LDAC_IMHEAD` block naming the telescope.
    pub telescope_keyword: String,
    /// Telescope written into the header block of new files.
    pub telescope: String,
    /// Reject sources with `FLAGS` above this value on read.
    pub max_flag: Option<i64>,
    pub magerr_placeholder: f64,
    pub obsdate_placeholder: f64,
    pub header_comment: String,
}

impl Default for LdacConfig {
    fn default() -> Self {
        Self {
            time_keyword: "MIDTIMJD".to_string(),
            exptime_keyword: "EXPTIME".to_string(),
            object_keyword: "OBJECT".to_string(),
            telescope_keyword: "TEL_KEYW".to_string(),
            telescope: String::new(),
            max_flag: None,
            magerr_placeholder: 0.01,
            obsdate_placeholder: 2015.0,
            header_comment: "obtained through Vizier".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Radius in key units (degrees for sky positions). `None` selects
    /// nearest-neighbour matching.
    pub tolerance_deg: Option<f64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tolerance_deg: Some(0.5 / 3600.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Marker for rows a direct transform could not handle.
    pub sentinel: f64,
    /// Residual cut, in standard deviations, for self-calibrated transforms.
    pub clip_sigma: f64,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            sentinel: 99.0,
            clip_sigma: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Upper limit on `e_r` for Pan-STARRS and SkyMapper sources.
    pub error_ceiling: f64,
    /// Overrides of the magnitude system recorded per survey name.
    pub magnitude_systems: BTreeMap<String, MagnitudeSystem>,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            error_ceiling: 0.03,
            magnitude_systems: BTreeMap::new(),
        }
    }
}
