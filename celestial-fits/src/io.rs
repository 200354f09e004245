//! Reading and writing whole FITS files as sequences of HDUs.

use crate::hdu::Hdu;
use crate::header::{Header, BLOCK_SIZE, CARD_SIZE};
use crate::{FitsError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Read every HDU in a file.
pub fn read_fits<P: AsRef<Path>>(path: P) -> Result<Vec<Hdu>> {
    let bytes = fs::read(path.as_ref())?;
    let hdus = parse_hdus(&bytes)?;
    debug!(path = %path.as_ref().display(), hdus = hdus.len(), "read FITS file");
    Ok(hdus)
}

/// Split an in-memory FITS file into HDUs.
pub fn parse_hdus(bytes: &[u8]) -> Result<Vec<Hdu>> {
    let mut hdus = Vec::new();
    let mut offset = 0;

    while bytes.len().saturating_sub(offset) >= CARD_SIZE {
        // Some writers leave zero-filled blocks after the last HDU.
        if bytes[offset..].iter().all(|&b| b == 0 || b == b' ') {
            break;
        }

        let (header, header_len) = Header::parse(&bytes[offset..])?;
        if hdus.is_empty() && !header.is_primary() {
            return Err(FitsError::InvalidFormat(
                "File does not start with SIMPLE = T".to_string(),
            ));
        }

        let data_start = offset + header_len;
        let data_len = Hdu::data_size(&header)?;
        if data_start + data_len > bytes.len() {
            return Err(FitsError::UnexpectedEof);
        }

        let data = bytes[data_start..data_start + data_len].to_vec();
        hdus.push(Hdu::new(header, data));
        offset = data_start + padded_len(data_len);
    }

    if hdus.is_empty() {
        return Err(FitsError::InvalidFormat("No HDUs found".to_string()));
    }
    Ok(hdus)
}

/// Read only the primary header, without loading the data that follows.
pub fn read_primary_header<P: AsRef<Path>>(path: P) -> Result<Header> {
    let mut file = File::open(path.as_ref())?;
    let mut buffer = Vec::new();
    let mut block = vec![0u8; BLOCK_SIZE];

    loop {
        file.read_exact(&mut block).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FitsError::UnexpectedEof,
            _ => FitsError::Io(e),
        })?;
        buffer.extend_from_slice(&block);

        if block.chunks_exact(CARD_SIZE).any(|card| is_end_card(card)) {
            let (header, _) = Header::parse(&buffer)?;
            return Ok(header);
        }
    }
}

/// Write HDUs to `path`. The file is assembled under a temporary name and
/// moved into place once complete.
pub fn write_fits<P: AsRef<Path>>(path: P, hdus: &[Hdu]) -> Result<()> {
    let path = path.as_ref();
    let temp_path = temporary_path(path);

    let written = write_hdus(&temp_path, hdus).and_then(|()| fs::rename(&temp_path, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    debug!(path = %path.display(), hdus = hdus.len(), "wrote FITS file");
    Ok(())
}

fn write_hdus(path: &Path, hdus: &[Hdu]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for hdu in hdus {
        writer.write_all(&hdu.header.to_bytes())?;
        writer.write_all(&hdu.data)?;
        let padding = padded_len(hdu.data.len()) - hdu.data.len();
        writer.write_all(&vec![0u8; padding])?;
    }
    writer.flush()
}

fn temporary_path(path: &Path) -> std::path::PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(format!("{}.tmp", ext)),
        None => path.with_extension("tmp"),
    }
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

fn is_end_card(card: &[u8]) -> bool {
    &card[0..3] == b"END" && card[3..8].iter().all(|&b| b == b' ')
}
