use crate::header::{Header, Keyword};
use crate::{FitsError, Result};

/// One header-data unit: a header and its raw (unpadded) data bytes.
#[derive(Debug, Clone, Default)]
pub struct Hdu {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Hdu {
    pub fn new(header: Header, data: Vec<u8>) -> Self {
        Self { header, data }
    }

    /// Primary HDU with no data array, announcing that extensions follow.
    pub fn empty_primary() -> Self {
        let mut header = Header::new();
        header.add_keyword(Keyword::logical("SIMPLE", true).with_comment("conforms to FITS standard"));
        header.add_keyword(Keyword::integer("BITPIX", 8).with_comment("array data type"));
        header.add_keyword(Keyword::integer("NAXIS", 0).with_comment("number of array dimensions"));
        header.add_keyword(Keyword::logical("EXTEND", true));
        Self {
            header,
            data: Vec::new(),
        }
    }

    pub fn is_binary_table(&self) -> bool {
        self.header.string_value("XTENSION") == Some("BINTABLE")
    }

    pub fn extname(&self) -> Option<&str> {
        self.header.extname()
    }

    /// Number of data bytes described by a header:
    /// `|BITPIX| / 8 * GCOUNT * (PCOUNT + NAXIS1 * ... * NAXISn)`.
    pub fn data_size(header: &Header) -> Result<usize> {
        let bitpix = header.required_integer("BITPIX")?;
        let naxis = header.required_count("NAXIS")?;
        if naxis == 0 {
            return Ok(0);
        }

        let overflow = || FitsError::InvalidFormat("data size overflows".to_string());

        let mut elements: usize = 1;
        for axis in 1..=naxis {
            let length = header.required_count(&format!("NAXIS{}", axis))?;
            elements = elements.checked_mul(length).ok_or_else(overflow)?;
        }

        let pcount = optional_count(header, "PCOUNT", 0)?;
        let gcount = optional_count(header, "GCOUNT", 1)?;
        let bytes_per_value = usize::try_from(bitpix.unsigned_abs() / 8).map_err(|_| overflow())?;

        pcount
            .checked_add(elements)
            .and_then(|n| n.checked_mul(gcount))
            .and_then(|n| n.checked_mul(bytes_per_value))
            .ok_or_else(overflow)
    }
}

fn optional_count(header: &Header, name: &str, default: usize) -> Result<usize> {
    match header.get_keyword_value(name).and_then(|v| v.as_integer()) {
        Some(_) => header.required_count(name),
        None => Ok(default),
    }
}
