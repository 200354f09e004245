//! FITS_LDAC interchange files, as produced by Source Extractor and read by
//! SCAMP.
//!
//! Layout: an empty primary HDU, an `LDAC_IMHEAD` table whose single
//! `1680A` cell holds 80-character header cards, and an `LDAC_OBJECTS` table
//! with one row per source.

use crate::catalog::{Catalog, MagnitudeSystem, ObservationTime};
use crate::config::LdacConfig;
use crate::error::{Error, Result};
use crate::table::{Column, ColumnData, Table, Unit};
use celestial_fits::header::CARD_SIZE;
use celestial_fits::{
    read_fits, read_primary_header, write_fits, BinaryTable, ColumnValues, FieldType, FitsError, Hdu,
    Header, Keyword, TForm, TableColumn,
};
use std::path::Path;
use tracing::{error, info, warn};

pub const IMHEAD_EXTNAME: &str = "LDAC_IMHEAD";
pub const OBJECTS_EXTNAME: &str = "LDAC_OBJECTS";
const HEADER_CARD_COLUMN: &str = "Field Header Card";
const HEADER_CARD_WIDTH: usize = 1680;

struct LdacField {
    canonical: &'static str,
    ldac: &'static str,
    field_type: FieldType,
    display: &'static str,
}

/// Canonical columns carried into `LDAC_OBJECTS`. Other columns are not
/// written.
const FIELDS: [LdacField; 5] = [
    LdacField {
        canonical: "ra_deg",
        ldac: "XWIN_WORLD",
        field_type: FieldType::Double,
        display: "E15",
    },
    LdacField {
        canonical: "dec_deg",
        ldac: "YWIN_WORLD",
        field_type: FieldType::Double,
        display: "E15",
    },
    LdacField {
        canonical: "e_ra_deg",
        ldac: "ERRAWIN_WORLD",
        field_type: FieldType::Float,
        display: "E12",
    },
    LdacField {
        canonical: "e_dec_deg",
        ldac: "ERRBWIN_WORLD",
        field_type: FieldType::Float,
        display: "E12",
    },
    LdacField {
        canonical: "mag",
        ldac: "MAG",
        field_type: FieldType::Float,
        display: "F8.4",
    },
];

fn field_by_canonical(name: &str) -> Option<&'static LdacField> {
    FIELDS.iter().find(|f| f.canonical == name)
}

fn field_by_ldac(name: &str) -> Option<&'static LdacField> {
    FIELDS.iter().find(|f| f.ldac == name)
}

/// Write `catalog` as a FITS_LDAC file, replacing `path`. Returns the number
/// of sources written.
pub fn write_ldac<P: AsRef<Path>>(catalog: &Catalog, path: P, config: &LdacConfig) -> Result<usize> {
    let path = path.as_ref();
    let rows = catalog.len();

    let mut imhead = BinaryTable::new(Some(IMHEAD_EXTNAME));
    imhead.push_column(TableColumn::new(
        HEADER_CARD_COLUMN,
        TForm::new(HEADER_CARD_WIDTH, FieldType::Char),
        ColumnValues::Text(vec![header_cards(config)]),
    ))?;

    let mut objects = BinaryTable::new(Some(OBJECTS_EXTNAME));
    for column in catalog.table().columns() {
        let Some(field) = field_by_canonical(&column.name) else {
            continue;
        };
        let values = catalog.float_values(&column.name)?;
        let unit = if field.canonical == "mag" { "mag" } else { "deg" };
        objects.push_column(
            TableColumn::new(field.ldac, TForm::scalar(field.field_type), ColumnValues::Real(values))
                .with_unit(unit)
                .with_display(field.display),
        )?;
    }
    objects.push_column(
        TableColumn::new(
            "MAGERR",
            TForm::scalar(FieldType::Float),
            ColumnValues::Real(vec![config.magerr_placeholder; rows]),
        )
        .with_unit("mag")
        .with_display("F8.4"),
    )?;
    objects.push_column(
        TableColumn::new(
            "OBSDATE",
            TForm::scalar(FieldType::Double),
            ColumnValues::Real(vec![config.obsdate_placeholder; rows]),
        )
        .with_unit("yr")
        .with_display("F13.8"),
    )?;

    write_fits(path, &[Hdu::empty_primary(), imhead.to_hdu(), objects.to_hdu()])?;
    info!(catalog = %catalog.name, path = %path.display(), sources = rows, "wrote LDAC file");
    Ok(rows)
}

fn header_cards(config: &LdacConfig) -> String {
    let cards = [
        Keyword::string(config.telescope_keyword.as_str(), config.telescope.as_str()),
        Keyword::comment(config.header_comment.as_str()),
        Keyword::new("END"),
    ];
    cards
        .iter()
        .map(|k| String::from_utf8_lossy(&k.to_card()).into_owned())
        .collect()
}

/// Read a FITS_LDAC file.
///
/// Returns `Ok(None)` when the file has fewer than three HDUs, which is what
/// Source Extractor leaves behind after a failed run. `image` names the FITS
/// image the sources were extracted from; its primary header supplies the
/// observation time, exposure and object name.
pub fn read_ldac<P: AsRef<Path>>(
    path: P,
    image: Option<&Path>,
    config: &LdacConfig,
) -> Result<Option<Catalog>> {
    let path = path.as_ref();
    let hdus = match read_fits(path) {
        Ok(hdus) => hdus,
        // Empty or truncated output counts as fewer than three HDUs.
        Err(e @ (FitsError::InvalidFormat(_) | FitsError::UnexpectedEof)) => {
            malformed(path, format!("{}; check that source extraction ran properly", e));
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    if hdus.len() < 3 {
        malformed(
            path,
            format!(
                "{} HDUs, expected 3; check that source extraction ran properly",
                hdus.len()
            ),
        );
        return Ok(None);
    }

    let imhead = BinaryTable::from_hdu(&hdus[1])?;
    let objects = BinaryTable::from_hdu(&hdus[2])?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut catalog = Catalog::with_table(name, objects_table(objects)?);

    let telescope = telescope_name(&imhead, &config.telescope_keyword).unwrap_or_default();
    let image_name = image.map(|p| p.display().to_string()).unwrap_or_default();
    catalog.origin = format!("{};{}", telescope, image_name);
    catalog.magnitude_system = MagnitudeSystem::Instrumental;

    if let Some(max_flag) = config.max_flag {
        catalog.require_column("FLAGS")?;
        catalog.reject_sources_not_matching(|row| row.int("FLAGS").is_some_and(|f| f <= max_flag))?;
    }

    if let Some(image) = image {
        let header = read_primary_header(image)?;
        enrich_from_image_header(&mut catalog, &header, image, config);
    }

    if catalog.has_field("ra_deg") {
        catalog.wrap_right_ascension("ra_deg")?;
    }

    let (sources, fields) = catalog.shape();
    info!(path = %path.display(), sources, fields, "read LDAC file");
    Ok(Some(catalog))
}

fn malformed(path: &Path, reason: String) {
    let err = Error::MalformedSource {
        path: path.display().to_string(),
        reason,
    };
    error!("{}", err);
}

/// Convert `LDAC_OBJECTS` columns. Vector columns become one column per
/// element, `NAME_1`, `NAME_2`, ...
fn objects_table(objects: BinaryTable) -> Result<Table> {
    let rows = objects.rows();
    let mut columns = Vec::new();

    for column in objects.into_columns() {
        let name = field_by_ldac(&column.name)
            .map(|f| f.canonical.to_string())
            .unwrap_or_else(|| column.name.clone());
        let unit = column.unit.as_deref().and_then(Unit::from_symbol);
        let repeat = column.format.repeat;

        let data = match column.values {
            ColumnValues::Real(values) => ColumnData::Float(values),
            ColumnValues::Integer(values) => ColumnData::Int(values),
            ColumnValues::Logical(flags) => ColumnData::Int(flags.into_iter().map(i64::from).collect()),
            ColumnValues::Text(strings) => ColumnData::Text(strings),
        };

        if repeat == 1 || matches!(data, ColumnData::Text(_)) {
            columns.push(tag(Column::new(name, data), unit));
            continue;
        }
        for k in 0..repeat {
            let indices: Vec<usize> = (0..rows).map(|row| row * repeat + k).collect();
            columns.push(tag(Column::new(format!("{}_{}", name, k + 1), data.select(&indices)), unit));
        }
    }

    Table::from_columns(columns)
}

fn tag(column: Column, unit: Option<Unit>) -> Column {
    match unit {
        Some(unit) => column.with_unit(unit),
        None => column,
    }
}

/// Value of the telescope card in the header block, quotes stripped.
fn telescope_name(imhead: &BinaryTable, keyword: &str) -> Option<String> {
    let cards = match &imhead.columns().first()?.values {
        ColumnValues::Text(cells) => cells.first()?.clone(),
        _ => return None,
    };
    cards
        .as_bytes()
        .chunks(CARD_SIZE)
        .map(String::from_utf8_lossy)
        .find(|card| card.contains(keyword))
        .and_then(|card| card.split('\'').nth(1).map(|v| v.trim().to_string()))
}

fn enrich_from_image_header(catalog: &mut Catalog, header: &Header, image: &Path, config: &LdacConfig) {
    let name = catalog.name.clone();
    let missing = |keyword: &str| {
        let err = Error::MissingHeaderKeyword {
            path: image.display().to_string(),
            keyword: keyword.to_string(),
        };
        warn!(catalog = %name, "{}", err);
    };

    match (
        header.real_value(&config.time_keyword),
        header.real_value(&config.exptime_keyword),
    ) {
        (Some(mid_jd), Some(exposure)) => catalog.observation = Some(ObservationTime { mid_jd, exposure }),
        (None, _) => missing(&config.time_keyword),
        (_, None) => missing(&config.exptime_keyword),
    }

    match header.string_value(&config.object_keyword) {
        Some(object) => catalog.object_name = Some(object.trim().to_string()),
        None => missing(&config.object_keyword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Catalog {
        let mut catalog = Catalog::new("SDSS-R9");
        catalog
            .add_columns(vec![
                Column::new("ident", vec!["a".to_string(), "b".to_string()]),
                Column::new("ra_deg", vec![10.5, 359.25]),
                Column::new("dec_deg", vec![-5.0, 42.125]),
                Column::new("e_ra_deg", vec![1e-5, 2e-5]),
                Column::new("e_dec_deg", vec![1e-5, 2e-5]),
                Column::new("mag", vec![15.25, 17.5]),
                Column::new("gmag", vec![15.7, 18.0]),
            ])
            .unwrap();
        catalog
    }

    #[test]
    fn objects_carry_canonical_subset_and_placeholders() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.ldac");
        let config = LdacConfig {
            telescope: "Lowell 42in".to_string(),
            ..LdacConfig::default()
        };
        assert_eq!(write_ldac(&sample(), &path, &config).unwrap(), 2);

        let hdus = read_fits(&path).unwrap();
        assert_eq!(hdus.len(), 3);
        assert_eq!(hdus[1].extname(), Some(IMHEAD_EXTNAME));
        assert_eq!(hdus[1].header.string_value("TFORM1"), Some("1680A"));

        let objects = BinaryTable::from_hdu(&hdus[2]).unwrap();
        let names: Vec<&str> = objects.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["XWIN_WORLD", "YWIN_WORLD", "ERRAWIN_WORLD", "ERRBWIN_WORLD", "MAG", "MAGERR", "OBSDATE"]
        );
        assert_eq!(objects.column("OBSDATE").unwrap().unit.as_deref(), Some("yr"));
        assert_eq!(
            objects.column("OBSDATE").unwrap().values,
            ColumnValues::Real(vec![2015.0, 2015.0])
        );
    }

    #[test]
    fn read_restores_names_and_origin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("field.ldac");
        let config = LdacConfig {
            telescope: "VATT".to_string(),
            ..LdacConfig::default()
        };
        write_ldac(&sample(), &path, &config).unwrap();

        let catalog = read_ldac(&path, None, &config).unwrap().unwrap();
        assert_eq!(catalog.name, "field.ldac");
        assert_eq!(catalog.origin, "VATT;");
        assert_eq!(catalog.magnitude_system, MagnitudeSystem::Instrumental);
        assert_eq!(catalog.len(), 2);
        for name in ["ra_deg", "dec_deg", "e_ra_deg", "e_dec_deg", "mag", "MAGERR", "OBSDATE"] {
            assert!(catalog.has_field(name), "{}", name);
        }
        assert!(!catalog.has_field("gmag"));
        assert_eq!(catalog.column("ra_deg").unwrap().unit, Some(Unit::Degree));
    }

    #[test]
    fn too_few_hdus_gives_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.ldac");
        write_fits(&path, &[Hdu::empty_primary()]).unwrap();
        assert!(read_ldac(&path, None, &LdacConfig::default()).unwrap().is_none());
    }

    #[test]
    fn empty_or_truncated_file_gives_none() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.ldac");
        std::fs::write(&empty, b"").unwrap();
        assert!(read_ldac(&empty, None, &LdacConfig::default()).unwrap().is_none());

        let full = dir.path().join("full.ldac");
        write_ldac(&sample(), &full, &LdacConfig::default()).unwrap();
        let bytes = std::fs::read(&full).unwrap();
        let truncated = dir.path().join("truncated.ldac");
        std::fs::write(&truncated, &bytes[..bytes.len() - 2880]).unwrap();
        assert!(read_ldac(&truncated, None, &LdacConfig::default()).unwrap().is_none());
    }

    #[test]
    fn missing_file_is_still_an_error() {
        let dir = TempDir::new().unwrap();
        let result = read_ldac(dir.path().join("absent.ldac"), None, &LdacConfig::default());
        assert!(matches!(result, Err(Error::Fits(FitsError::Io(_)))));
    }

    #[test]
    fn vector_columns_are_split() {
        let mut table = BinaryTable::new(Some(OBJECTS_EXTNAME));
        table
            .push_column(TableColumn::new(
                "FLUX_APER",
                TForm::new(3, FieldType::Float),
                ColumnValues::Real(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            ))
            .unwrap();
        let converted = objects_table(table).unwrap();
        assert_eq!(converted.column_names(), vec!["FLUX_APER_1", "FLUX_APER_2", "FLUX_APER_3"]);
        assert_eq!(
            converted.column("FLUX_APER_2").unwrap().data,
            ColumnData::Float(vec![2.0, 5.0])
        );
    }

    #[test]
    fn telescope_card_is_found() {
        let config = LdacConfig {
            telescope: "DCT".to_string(),
            ..LdacConfig::default()
        };
        let mut imhead = BinaryTable::new(Some(IMHEAD_EXTNAME));
        imhead
            .push_column(TableColumn::new(
                HEADER_CARD_COLUMN,
                TForm::new(HEADER_CARD_WIDTH, FieldType::Char),
                ColumnValues::Text(vec![header_cards(&config)]),
            ))
            .unwrap();
        assert_eq!(telescope_name(&imhead, "TEL_KEYW").as_deref(), Some("DCT"));
        assert_eq!(telescope_name(&imhead, "INSTRUME"), None);
    }
}
