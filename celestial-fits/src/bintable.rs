//! Binary table (`XTENSION = 'BINTABLE'`) encoding and decoding.
//!
//! Only fixed-width fields are supported: logical (`L`), unsigned byte (`B`),
//! 16/32/64-bit integers (`I`/`J`/`K`), single and double precision reals
//! (`E`/`D`) and character strings (`A`). Columns with other formats are
//! skipped on read with a warning.

use crate::header::{Header, Keyword};
use crate::hdu::Hdu;
use crate::{FitsError, Result};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Logical,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

impl FieldType {
    pub fn code(self) -> char {
        match self {
            Self::Logical => 'L',
            Self::Byte => 'B',
            Self::Short => 'I',
            Self::Int => 'J',
            Self::Long => 'K',
            Self::Float => 'E',
            Self::Double => 'D',
            Self::Char => 'A',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'L' => Some(Self::Logical),
            'B' => Some(Self::Byte),
            'I' => Some(Self::Short),
            'J' => Some(Self::Int),
            'K' => Some(Self::Long),
            'E' => Some(Self::Float),
            'D' => Some(Self::Double),
            'A' => Some(Self::Char),
            _ => None,
        }
    }

    pub fn element_size(self) -> usize {
        match self {
            Self::Logical | Self::Byte | Self::Char => 1,
            Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }
}

/// A parsed `TFORMn` value: repeat count and field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TForm {
    pub repeat: usize,
    pub field_type: FieldType,
}

impl TForm {
    pub fn new(repeat: usize, field_type: FieldType) -> Self {
        Self { repeat, field_type }
    }

    pub fn scalar(field_type: FieldType) -> Self {
        Self::new(1, field_type)
    }

    pub fn parse(format: &str) -> Result<Self> {
        let format = format.trim();
        let digits_end = format
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| {
                FitsError::InvalidFormat(format!(
                    "Invalid FITS format '{}' - missing data type",
                    format
                ))
            })?;

        let repeat = if digits_end == 0 {
            1
        } else {
            format[..digits_end].parse().map_err(|_| {
                FitsError::InvalidFormat(format!("Invalid repeat count in format '{}'", format))
            })?
        };

        let code = format[digits_end..].chars().next().unwrap_or('X');
        let field_type = FieldType::from_code(code)
            .ok_or_else(|| FitsError::UnsupportedFormat(format.to_string()))?;

        if repeat == 0 {
            return Err(FitsError::UnsupportedFormat(format.to_string()));
        }

        Ok(Self { repeat, field_type })
    }

    /// Bytes occupied by one cell of this column.
    pub fn width(&self) -> usize {
        self.repeat * self.field_type.element_size()
    }
}

impl fmt::Display for TForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.repeat, self.field_type.code())
    }
}

/// Cell values of one column.
///
/// Numeric and logical values are flattened row-major: element `k` of row `r`
/// is at `r * repeat + k`. Character columns hold one string per row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Logical(Vec<bool>),
    Integer(Vec<i64>),
    Real(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnValues {
    fn accepts(&self, field_type: FieldType) -> bool {
        matches!(
            (self, field_type),
            (Self::Logical(_), FieldType::Logical)
                | (
                    Self::Integer(_),
                    FieldType::Byte | FieldType::Short | FieldType::Int | FieldType::Long
                )
                | (Self::Real(_), FieldType::Float | FieldType::Double)
                | (Self::Text(_), FieldType::Char)
        )
    }

    fn len(&self) -> usize {
        match self {
            Self::Logical(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::Real(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub format: TForm,
    pub unit: Option<String>,
    pub display: Option<String>,
    pub values: ColumnValues,
}

impl TableColumn {
    pub fn new<S: Into<String>>(name: S, format: TForm, values: ColumnValues) -> Self {
        Self {
            name: name.into(),
            format,
            unit: None,
            display: None,
            values,
        }
    }

    pub fn with_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_display<S: Into<String>>(mut self, display: S) -> Self {
        self.display = Some(display.into());
        self
    }

    fn row_count(&self) -> usize {
        match &self.values {
            ColumnValues::Text(v) => v.len(),
            other => other.len() / self.format.repeat,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.values.accepts(self.format.field_type) {
            return Err(FitsError::UnsupportedFormat(format!(
                "column '{}' values do not fit format {}",
                self.name, self.format
            )));
        }
        if !matches!(self.values, ColumnValues::Text(_))
            && self.values.len() % self.format.repeat != 0
        {
            return Err(FitsError::InvalidFormat(format!(
                "column '{}' has {} values, not a multiple of repeat {}",
                self.name,
                self.values.len(),
                self.format.repeat
            )));
        }
        Ok(())
    }

    fn encode_cell(&self, row: usize, cell: &mut [u8]) {
        let repeat = self.format.repeat;
        let size = self.format.field_type.element_size();

        match &self.values {
            ColumnValues::Text(strings) => {
                cell.fill(b' ');
                let bytes = strings[row].as_bytes();
                let len = bytes.len().min(cell.len());
                cell[..len].copy_from_slice(&bytes[..len]);
            }
            ColumnValues::Logical(flags) => {
                for k in 0..repeat {
                    cell[k] = if flags[row * repeat + k] { b'T' } else { b'F' };
                }
            }
            ColumnValues::Integer(ints) => {
                for k in 0..repeat {
                    let value = ints[row * repeat + k];
                    let slot = &mut cell[k * size..(k + 1) * size];
                    match self.format.field_type {
                        FieldType::Byte => slot[0] = value as u8,
                        FieldType::Short => BigEndian::write_i16(slot, value as i16),
                        FieldType::Int => BigEndian::write_i32(slot, value as i32),
                        _ => BigEndian::write_i64(slot, value),
                    }
                }
            }
            ColumnValues::Real(reals) => {
                for k in 0..repeat {
                    let value = reals[row * repeat + k];
                    let slot = &mut cell[k * size..(k + 1) * size];
                    match self.format.field_type {
                        FieldType::Float => BigEndian::write_f32(slot, value as f32),
                        _ => BigEndian::write_f64(slot, value),
                    }
                }
            }
        }
    }
}

/// Decoded binary table: named columns of equal row count.
#[derive(Debug, Clone, Default)]
pub struct BinaryTable {
    pub extname: Option<String>,
    columns: Vec<TableColumn>,
    rows: usize,
}

impl BinaryTable {
    pub fn new(extname: Option<&str>) -> Self {
        Self {
            extname: extname.map(str::to_string),
            columns: Vec::new(),
            rows: 0,
        }
    }

    /// Append a column. The first column fixes the row count.
    pub fn push_column(&mut self, column: TableColumn) -> Result<()> {
        column.validate()?;
        let rows = column.row_count();
        if !self.columns.is_empty() && rows != self.rows {
            return Err(FitsError::ColumnLength {
                column: column.name,
                expected: self.rows,
                actual: rows,
            });
        }
        self.rows = rows;
        self.columns.push(column);
        Ok(())
    }

    pub fn columns(&self) -> &[TableColumn] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<TableColumn> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&TableColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn row_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.format.width()).sum()
    }

    pub fn to_hdu(&self) -> Hdu {
        let row_bytes = self.row_bytes();
        let mut header = Header::new();

        header.add_keyword(Keyword::string("XTENSION", "BINTABLE").with_comment("binary table extension"));
        header.add_keyword(Keyword::integer("BITPIX", 8));
        header.add_keyword(Keyword::integer("NAXIS", 2));
        header.add_keyword(Keyword::integer("NAXIS1", row_bytes as i64).with_comment("width of table in bytes"));
        header.add_keyword(Keyword::integer("NAXIS2", self.rows as i64).with_comment("number of rows"));
        header.add_keyword(Keyword::integer("PCOUNT", 0));
        header.add_keyword(Keyword::integer("GCOUNT", 1));
        header.add_keyword(Keyword::integer("TFIELDS", self.columns.len() as i64));

        for (i, column) in self.columns.iter().enumerate() {
            let n = i + 1;
            header.add_keyword(Keyword::string(format!("TTYPE{}", n), column.name.clone()));
            header.add_keyword(Keyword::string(format!("TFORM{}", n), column.format.to_string()));
            if let Some(unit) = &column.unit {
                header.add_keyword(Keyword::string(format!("TUNIT{}", n), unit.clone()));
            }
            if let Some(display) = &column.display {
                header.add_keyword(Keyword::string(format!("TDISP{}", n), display.clone()));
            }
        }

        if let Some(extname) = &self.extname {
            header.add_keyword(Keyword::string("EXTNAME", extname.clone()));
        }

        let mut data = vec![0u8; row_bytes * self.rows];
        let mut offset = 0;
        for column in &self.columns {
            let width = column.format.width();
            for row in 0..self.rows {
                let start = row * row_bytes + offset;
                column.encode_cell(row, &mut data[start..start + width]);
            }
            offset += width;
        }

        Hdu { header, data }
    }

    pub fn from_hdu(hdu: &Hdu) -> Result<Self> {
        let header = &hdu.header;
        match header.string_value("XTENSION") {
            Some("BINTABLE") => {}
            other => {
                return Err(FitsError::InvalidFormat(format!(
                    "Expected BINTABLE extension, found {:?}",
                    other
                )))
            }
        }

        let row_bytes = header.required_count("NAXIS1")?;
        let rows = header.required_count("NAXIS2")?;
        let fields = header.required_count("TFIELDS")?;

        let table_bytes = row_bytes
            .checked_mul(rows)
            .ok_or_else(|| FitsError::InvalidFormat("table size overflows".to_string()))?;
        if hdu.data.len() < table_bytes {
            return Err(FitsError::UnexpectedEof);
        }

        let mut table = BinaryTable::new(header.extname());
        table.rows = rows;
        let mut offset = 0;

        for n in 1..=fields {
            let format_key = format!("TFORM{}", n);
            let raw_format = header
                .string_value(&format_key)
                .ok_or(FitsError::KeywordNotFound { keyword: format_key })?;
            let name = header
                .string_value(&format!("TTYPE{}", n))
                .map(str::to_string)
                .unwrap_or_else(|| format!("COL{}", n));

            let format = match TForm::parse(raw_format) {
                Ok(format) => format,
                Err(FitsError::UnsupportedFormat(_)) => {
                    let width = unsupported_width(raw_format)?;
                    warn!(column = %name, format = raw_format, "skipping unsupported column");
                    offset += width;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let width = format.width();
            if offset + width > row_bytes {
                return Err(FitsError::InvalidFormat(format!(
                    "Column '{}' extends past NAXIS1 = {}",
                    name, row_bytes
                )));
            }

            let values = decode_column(&hdu.data, format, offset, row_bytes, rows);
            let mut column = TableColumn::new(name, format, values);
            column.unit = header.string_value(&format!("TUNIT{}", n)).map(str::to_string);
            column.display = header.string_value(&format!("TDISP{}", n)).map(str::to_string);
            table.columns.push(column);
            offset += width;
        }

        Ok(table)
    }
}

/// Width of a column whose type we do not decode, so the following columns
/// can still be located.
fn unsupported_width(format: &str) -> Result<usize> {
    let format = format.trim();
    let digits_end = format.find(|c: char| !c.is_ascii_digit()).unwrap_or(format.len());
    let repeat: usize = if digits_end == 0 {
        1
    } else {
        format[..digits_end]
            .parse()
            .map_err(|_| FitsError::InvalidFormat(format!("Invalid repeat count in format '{}'", format)))?
    };
    let size = match format[digits_end..].chars().next() {
        Some('X') => return Ok(repeat.div_ceil(8)),
        Some('C') | Some('P') => 8,
        Some('M') | Some('Q') => 16,
        _ => return Err(FitsError::UnsupportedFormat(format.to_string())),
    };
    Ok(repeat * size)
}

fn decode_column(data: &[u8], format: TForm, offset: usize, row_bytes: usize, rows: usize) -> ColumnValues {
    let repeat = format.repeat;
    let size = format.field_type.element_size();
    let cell = |row: usize| {
        let start = row * row_bytes + offset;
        &data[start..start + format.width()]
    };

    match format.field_type {
        FieldType::Char => ColumnValues::Text(
            (0..rows)
                .map(|row| {
                    let bytes = cell(row);
                    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
                })
                .collect(),
        ),
        FieldType::Logical => ColumnValues::Logical(
            (0..rows)
                .flat_map(|row| cell(row).iter().map(|&b| b == b'T').collect::<Vec<_>>())
                .collect(),
        ),
        FieldType::Float | FieldType::Double => {
            let mut values = Vec::with_capacity(rows * repeat);
            for row in 0..rows {
                for slot in cell(row).chunks_exact(size) {
                    values.push(match format.field_type {
                        FieldType::Float => BigEndian::read_f32(slot) as f64,
                        _ => BigEndian::read_f64(slot),
                    });
                }
            }
            ColumnValues::Real(values)
        }
        FieldType::Byte | FieldType::Short | FieldType::Int | FieldType::Long => {
            let mut values = Vec::with_capacity(rows * repeat);
            for row in 0..rows {
                for slot in cell(row).chunks_exact(size) {
                    values.push(match format.field_type {
                        FieldType::Byte => slot[0] as i64,
                        FieldType::Short => BigEndian::read_i16(slot) as i64,
                        FieldType::Int => BigEndian::read_i32(slot) as i64,
                        _ => BigEndian::read_i64(slot),
                    });
                }
            }
            ColumnValues::Integer(values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tform_variants() {
        assert_eq!(TForm::parse("1D").unwrap(), TForm::scalar(FieldType::Double));
        assert_eq!(TForm::parse("E").unwrap(), TForm::scalar(FieldType::Float));
        assert_eq!(TForm::parse("1680A").unwrap(), TForm::new(1680, FieldType::Char));
        assert_eq!(TForm::parse("3J").unwrap().width(), 12);
    }

    #[test]
    fn parse_tform_rejects_unknown_type() {
        assert!(matches!(
            TForm::parse("1PE"),
            Err(FitsError::UnsupportedFormat(_))
        ));
        assert!(matches!(TForm::parse("12"), Err(FitsError::InvalidFormat(_))));
    }

    #[test]
    fn tform_display() {
        assert_eq!(TForm::new(1680, FieldType::Char).to_string(), "1680A");
        assert_eq!(TForm::scalar(FieldType::Double).to_string(), "1D");
    }

    #[test]
    fn push_column_checks_row_count() {
        let mut table = BinaryTable::new(Some("TEST"));
        table
            .push_column(TableColumn::new(
                "A",
                TForm::scalar(FieldType::Double),
                ColumnValues::Real(vec![1.0, 2.0]),
            ))
            .unwrap();
        let err = table
            .push_column(TableColumn::new(
                "B",
                TForm::scalar(FieldType::Long),
                ColumnValues::Integer(vec![1, 2, 3]),
            ))
            .unwrap_err();
        assert!(matches!(err, FitsError::ColumnLength { expected: 2, actual: 3, .. }));
    }

    #[test]
    fn push_column_checks_value_type() {
        let mut table = BinaryTable::new(None);
        let err = table
            .push_column(TableColumn::new(
                "A",
                TForm::scalar(FieldType::Double),
                ColumnValues::Integer(vec![1]),
            ))
            .unwrap_err();
        assert!(matches!(err, FitsError::UnsupportedFormat(_)));
    }

    #[test]
    fn encode_decode_mixed_columns() {
        let mut table = BinaryTable::new(Some("LDAC_OBJECTS"));
        table
            .push_column(
                TableColumn::new(
                    "XWIN_WORLD",
                    TForm::scalar(FieldType::Double),
                    ColumnValues::Real(vec![10.5, 359.25]),
                )
                .with_unit("deg")
                .with_display("E15"),
            )
            .unwrap();
        table
            .push_column(TableColumn::new(
                "MAG",
                TForm::scalar(FieldType::Float),
                ColumnValues::Real(vec![12.25, f64::NAN]),
            ))
            .unwrap();
        table
            .push_column(TableColumn::new(
                "FLAGS",
                TForm::scalar(FieldType::Short),
                ColumnValues::Integer(vec![0, 3]),
            ))
            .unwrap();
        table
            .push_column(TableColumn::new(
                "FLUX_APER",
                TForm::new(2, FieldType::Long),
                ColumnValues::Integer(vec![1, 2, 3, 4]),
            ))
            .unwrap();
        table
            .push_column(TableColumn::new(
                "NAME",
                TForm::new(8, FieldType::Char),
                ColumnValues::Text(vec!["alpha".into(), "beta gamma".into()]),
            ))
            .unwrap();

        let hdu = table.to_hdu();
        assert_eq!(hdu.header.required_integer("NAXIS1").unwrap(), 8 + 4 + 2 + 16 + 8);
        assert_eq!(hdu.data.len(), 2 * 38);

        let decoded = BinaryTable::from_hdu(&hdu).unwrap();
        assert_eq!(decoded.rows(), 2);
        assert_eq!(decoded.extname.as_deref(), Some("LDAC_OBJECTS"));

        let x = decoded.column("XWIN_WORLD").unwrap();
        assert_eq!(x.values, ColumnValues::Real(vec![10.5, 359.25]));
        assert_eq!(x.unit.as_deref(), Some("deg"));
        assert_eq!(x.display.as_deref(), Some("E15"));

        match &decoded.column("MAG").unwrap().values {
            ColumnValues::Real(v) => {
                assert_eq!(v[0], 12.25);
                assert!(v[1].is_nan());
            }
            other => panic!("unexpected values {:?}", other),
        }

        assert_eq!(
            decoded.column("FLUX_APER").unwrap().values,
            ColumnValues::Integer(vec![1, 2, 3, 4])
        );
        assert_eq!(
            decoded.column("NAME").unwrap().values,
            ColumnValues::Text(vec!["alpha".into(), "beta gam".into()])
        );
    }

    #[test]
    fn unsupported_column_is_skipped() {
        let mut table = BinaryTable::new(None);
        table
            .push_column(TableColumn::new(
                "A",
                TForm::scalar(FieldType::Double),
                ColumnValues::Real(vec![1.0]),
            ))
            .unwrap();
        table
            .push_column(TableColumn::new(
                "B",
                TForm::scalar(FieldType::Long),
                ColumnValues::Integer(vec![7]),
            ))
            .unwrap();
        let mut hdu = table.to_hdu();

        // Pretend column A is a complex value of the same width.
        let mut header = Header::new();
        for keyword in hdu.header.iter() {
            if keyword.name == "TFORM1" {
                header.add_keyword(Keyword::string("TFORM1", "1C"));
            } else {
                header.add_keyword(keyword.clone());
            }
        }
        hdu.header = header;

        let decoded = BinaryTable::from_hdu(&hdu).unwrap();
        assert_eq!(decoded.columns().len(), 1);
        assert_eq!(
            decoded.column("B").unwrap().values,
            ColumnValues::Integer(vec![7])
        );
    }

    #[test]
    fn from_hdu_rejects_negative_row_count() {
        let mut hdu = BinaryTable::new(None).to_hdu();
        let mut header = Header::new();
        for keyword in hdu.header.iter() {
            if keyword.name == "NAXIS2" {
                header.add_keyword(Keyword::integer("NAXIS2", -3));
            } else {
                header.add_keyword(keyword.clone());
            }
        }
        hdu.header = header;
        assert!(matches!(BinaryTable::from_hdu(&hdu), Err(FitsError::InvalidFormat(_))));
    }

    #[test]
    fn from_hdu_rejects_image_extension() {
        let hdu = Hdu::empty_primary();
        assert!(BinaryTable::from_hdu(&hdu).is_err());
    }
}
