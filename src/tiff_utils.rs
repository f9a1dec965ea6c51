//! Low-level TIFF container parsing over a [`RangeReader`]
//!
//! Only classic TIFF (magic 42) is handled. Every read goes through the range
//! reader, so the header, the IFD and any out-of-line tag values each cost one
//! request against a remote file.

use crate::error::{GeoDataError, Result};
use crate::range_reader::RangeReader;

pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_BITS_PER_SAMPLE: u16 = 258;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_SAMPLES_PER_PIXEL: u16 = 277;
pub const TAG_PREDICTOR: u16 = 317;
pub const TAG_TILE_WIDTH: u16 = 322;
pub const TAG_TILE_LENGTH: u16 = 323;
pub const TAG_TILE_OFFSETS: u16 = 324;
pub const TAG_TILE_BYTE_COUNTS: u16 = 325;
pub const TAG_SAMPLE_FORMAT: u16 = 339;
pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;

pub const TYPE_BYTE: u16 = 1;
pub const TYPE_SHORT: u16 = 3;
pub const TYPE_LONG: u16 = 4;
pub const TYPE_DOUBLE: u16 = 12;
pub const TYPE_LONG8: u16 = 16;

const TIFF_MAGIC: u16 = 42;
const IFD_ENTRY_SIZE: usize = 12;

#[derive(Debug, Clone, Copy)]
pub struct TiffHeader {
    pub little_endian: bool,
    pub first_ifd_offset: u32,
}

#[derive(Debug, Clone)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    pub value_offset: u32,
    pub raw_value_bytes: [u8; 4],
}

#[inline]
pub fn read_u16(bytes: &[u8], little_endian: bool) -> u16 {
    let b = [bytes[0], bytes[1]];
    if little_endian {
        u16::from_le_bytes(b)
    } else {
        u16::from_be_bytes(b)
    }
}

#[inline]
pub fn read_u32(bytes: &[u8], little_endian: bool) -> u32 {
    let b = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if little_endian {
        u32::from_le_bytes(b)
    } else {
        u32::from_be_bytes(b)
    }
}

#[inline]
pub fn read_u64(bytes: &[u8], little_endian: bool) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    if little_endian {
        u64::from_le_bytes(b)
    } else {
        u64::from_be_bytes(b)
    }
}

#[inline]
pub fn read_f64(bytes: &[u8], little_endian: bool) -> f64 {
    f64::from_bits(read_u64(bytes, little_endian))
}

pub fn parse_tiff_header(bytes: &[u8]) -> Result<TiffHeader> {
    if bytes.len() < 8 {
        return Err(GeoDataError::TiffFormat("header shorter than 8 bytes".into()));
    }

    let little_endian = match &bytes[0..2] {
        b"II" => true,
        b"MM" => false,
        _ => return Err(GeoDataError::TiffFormat("invalid byte-order marker".into())),
    };

    let magic = read_u16(&bytes[2..4], little_endian);
    if magic != TIFF_MAGIC {
        return Err(GeoDataError::TiffFormat(format!(
            "unsupported TIFF magic {magic}"
        )));
    }

    Ok(TiffHeader {
        little_endian,
        first_ifd_offset: read_u32(&bytes[4..8], little_endian),
    })
}

pub fn read_tiff_header(reader: &dyn RangeReader) -> Result<TiffHeader> {
    parse_tiff_header(&reader.read_range(0, 8)?)
}

/// Reads the entry count, then all entries in a single request.
pub fn read_ifd(reader: &dyn RangeReader, header: &TiffHeader) -> Result<Vec<IfdEntry>> {
    let le = header.little_endian;
    let offset = u64::from(header.first_ifd_offset);
    let count_bytes = reader.read_range(offset, 2)?;
    let entry_count = read_u16(&count_bytes, le) as usize;
    if entry_count == 0 {
        return Err(GeoDataError::TiffFormat("empty image file directory".into()));
    }

    let entry_bytes = reader.read_range(offset + 2, entry_count * IFD_ENTRY_SIZE)?;
    Ok(entry_bytes
        .chunks_exact(IFD_ENTRY_SIZE)
        .map(|chunk| {
            let raw_value_bytes = [chunk[8], chunk[9], chunk[10], chunk[11]];
            IfdEntry {
                tag: read_u16(&chunk[0..2], le),
                field_type: read_u16(&chunk[2..4], le),
                count: read_u32(&chunk[4..8], le),
                value_offset: read_u32(&raw_value_bytes, le),
                raw_value_bytes,
            }
        })
        .collect())
}

fn type_size(field_type: u16) -> Result<usize> {
    match field_type {
        TYPE_BYTE => Ok(1),
        TYPE_SHORT => Ok(2),
        TYPE_LONG => Ok(4),
        TYPE_DOUBLE | TYPE_LONG8 => Ok(8),
        other => Err(GeoDataError::TiffFormat(format!(
            "unsupported field type {other}"
        ))),
    }
}

/// Raw value bytes of an entry: inline (left-justified in the 4-byte value
/// field, whatever the byte order) or fetched from the value offset.
fn entry_bytes(reader: &dyn RangeReader, entry: &IfdEntry) -> Result<Vec<u8>> {
    let total_bytes = entry.count as usize * type_size(entry.field_type)?;
    if total_bytes <= 4 {
        Ok(entry.raw_value_bytes[..total_bytes].to_vec())
    } else {
        reader.read_range(u64::from(entry.value_offset), total_bytes)
    }
}

pub fn read_entry_values_u64(
    reader: &dyn RangeReader,
    entry: &IfdEntry,
    little_endian: bool,
) -> Result<Vec<u64>> {
    let size = type_size(entry.field_type)?;
    if entry.field_type == TYPE_DOUBLE {
        return Err(GeoDataError::TiffFormat(format!(
            "tag {} holds doubles, expected integers",
            entry.tag
        )));
    }
    let raw = entry_bytes(reader, entry)?;
    Ok(raw
        .chunks_exact(size)
        .map(|chunk| match entry.field_type {
            TYPE_BYTE => u64::from(chunk[0]),
            TYPE_SHORT => u64::from(read_u16(chunk, little_endian)),
            TYPE_LONG => u64::from(read_u32(chunk, little_endian)),
            _ => read_u64(chunk, little_endian),
        })
        .collect())
}

pub fn read_entry_values_f64(
    reader: &dyn RangeReader,
    entry: &IfdEntry,
    little_endian: bool,
) -> Result<Vec<f64>> {
    if entry.field_type != TYPE_DOUBLE {
        return Err(GeoDataError::TiffFormat(format!(
            "unsupported field type {} for tag {}, expected DOUBLE",
            entry.field_type, entry.tag
        )));
    }
    let raw = entry_bytes(reader, entry)?;
    Ok(raw
        .chunks_exact(8)
        .map(|chunk| read_f64(chunk, little_endian))
        .collect())
}

#[must_use]
pub fn get_entry(entries: &[IfdEntry], tag: u16) -> Option<&IfdEntry> {
    entries.iter().find(|entry| entry.tag == tag)
}

pub fn read_tag_u64(
    reader: &dyn RangeReader,
    entries: &[IfdEntry],
    tag: u16,
    little_endian: bool,
) -> Result<u64> {
    read_tag_u64_vec(reader, entries, tag, little_endian)?
        .first()
        .copied()
        .ok_or(GeoDataError::MissingTag(tag))
}

pub fn read_tag_u64_optional(
    reader: &dyn RangeReader,
    entries: &[IfdEntry],
    tag: u16,
    little_endian: bool,
) -> Result<Option<u64>> {
    match get_entry(entries, tag) {
        Some(entry) => Ok(read_entry_values_u64(reader, entry, little_endian)?
            .first()
            .copied()),
        None => Ok(None),
    }
}

pub fn read_tag_u64_vec(
    reader: &dyn RangeReader,
    entries: &[IfdEntry],
    tag: u16,
    little_endian: bool,
) -> Result<Vec<u64>> {
    let entry = get_entry(entries, tag).ok_or(GeoDataError::MissingTag(tag))?;
    read_entry_values_u64(reader, entry, little_endian)
}

pub fn read_tag_f64_vec(
    reader: &dyn RangeReader,
    entries: &[IfdEntry],
    tag: u16,
    little_endian: bool,
) -> Result<Vec<f64>> {
    let entry = get_entry(entries, tag).ok_or(GeoDataError::MissingTag(tag))?;
    read_entry_values_f64(reader, entry, little_endian)
}
