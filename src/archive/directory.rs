use crate::error::{GeoDataError, Result};

/// One row of a directory.
///
/// `run_length == 0` marks a pointer to a leaf directory; otherwise the entry
/// covers `run_length` consecutive tile IDs sharing the same tile bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl DirectoryEntry {
    #[inline]
    #[must_use]
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }
}

/// Reads a little-endian base-128 varint at `*pos`, advancing it.
pub fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or_else(|| GeoDataError::ArchiveFormat("truncated varint".into()))?;
        *pos += 1;
        if shift == 63 && byte > 1 {
            return Err(GeoDataError::ArchiveFormat("varint overflows u64".into()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(GeoDataError::ArchiveFormat("varint overflows u64".into()));
        }
    }
}

fn read_u32_varint(bytes: &[u8], pos: &mut usize, what: &str) -> Result<u32> {
    let value = read_varint(bytes, pos)?;
    u32::try_from(value)
        .map_err(|_| GeoDataError::ArchiveFormat(format!("{what} {value} exceeds u32")))
}

/// Decodes an (already decompressed) directory.
///
/// Layout: entry count, then per column for every entry: tile-ID deltas, run
/// lengths, lengths, offsets. An offset of 0 after the first entry means
/// "directly after the previous entry"; any other value is `offset + 1`.
/// Tile IDs must be strictly increasing.
pub fn decode_directory(bytes: &[u8]) -> Result<Vec<DirectoryEntry>> {
    let mut pos = 0;
    let count = read_varint(bytes, &mut pos)?;
    // Every entry takes at least one byte in each of the four columns.
    let count = usize::try_from(count)
        .ok()
        .filter(|&c| c <= bytes.len().saturating_sub(pos) / 4)
        .ok_or_else(|| {
            GeoDataError::ArchiveFormat(format!(
                "directory claims {count} entries in {} bytes",
                bytes.len()
            ))
        })?;

    let mut entries = vec![
        DirectoryEntry {
            tile_id: 0,
            offset: 0,
            length: 0,
            run_length: 0,
        };
        count
    ];

    let mut last_id = 0u64;
    for (i, entry) in entries.iter_mut().enumerate() {
        let delta = read_varint(bytes, &mut pos)?;
        if i > 0 && delta == 0 {
            return Err(GeoDataError::ArchiveFormat(format!(
                "directory tile IDs not increasing at entry {i}"
            )));
        }
        last_id = last_id
            .checked_add(delta)
            .ok_or_else(|| GeoDataError::ArchiveFormat("tile ID overflow".into()))?;
        entry.tile_id = last_id;
    }
    for entry in &mut entries {
        entry.run_length = read_u32_varint(bytes, &mut pos, "run length")?;
    }
    for entry in &mut entries {
        entry.length = read_u32_varint(bytes, &mut pos, "length")?;
    }
    for i in 0..count {
        let stored = read_varint(bytes, &mut pos)?;
        entries[i].offset = if stored == 0 {
            if i == 0 {
                return Err(GeoDataError::ArchiveFormat(
                    "first directory entry has no offset".into(),
                ));
            }
            let prev = entries[i - 1];
            prev.offset
                .checked_add(u64::from(prev.length))
                .ok_or_else(|| {
                    GeoDataError::ArchiveFormat(format!("offset overflow at entry {i}"))
                })?
        } else {
            stored - 1
        };
    }

    Ok(entries)
}

/// Entry covering `tile_id`: an exact match, or the nearest entry below it if
/// that one is a leaf pointer or its run reaches `tile_id`.
#[must_use]
pub fn find_entry(entries: &[DirectoryEntry], tile_id: u64) -> Option<DirectoryEntry> {
    match entries.binary_search_by_key(&tile_id, |e| e.tile_id) {
        Ok(i) => Some(entries[i]),
        Err(0) => None,
        Err(i) => {
            let candidate = entries[i - 1];
            if candidate.run_length == 0
                || tile_id - candidate.tile_id < u64::from(candidate.run_length)
            {
                Some(candidate)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::encode_directory;

    fn entry(tile_id: u64, offset: u64, length: u32, run_length: u32) -> DirectoryEntry {
        DirectoryEntry {
            tile_id,
            offset,
            length,
            run_length,
        }
    }

    #[test]
    fn test_varint() {
        let bytes = [0x00, 0x7f, 0xac, 0x02, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut pos = 0;
        assert_eq!(read_varint(&bytes, &mut pos).unwrap(), 0);
        assert_eq!(read_varint(&bytes, &mut pos).unwrap(), 127);
        assert_eq!(read_varint(&bytes, &mut pos).unwrap(), 300);
        assert_eq!(read_varint(&bytes, &mut pos).unwrap(), u64::MAX);
        assert_eq!(pos, bytes.len());
        assert!(read_varint(&bytes, &mut pos).is_err());
        assert!(read_varint(&[0x80, 0x80], &mut 0).is_err());
    }

    #[test]
    fn test_decode_with_contiguous_offsets() {
        let entries = vec![
            entry(3, 0, 100, 1),
            entry(4, 100, 50, 2),
            entry(9, 150, 20, 1),
            entry(40, 7, 12, 0),
        ];
        let decoded = decode_directory(&encode_directory(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_decoded_ids_strictly_increasing() {
        let entries: Vec<_> = (0..200u64)
            .map(|i| entry(i * i + i, i * 10, 10, 1))
            .collect();
        let decoded = decode_directory(&encode_directory(&entries)).unwrap();
        assert!(decoded.windows(2).all(|w| w[0].tile_id < w[1].tile_id));
    }

    #[test]
    fn test_rejects_repeated_id() {
        // count 2, deltas 5 and 0
        let bytes = [2, 5, 0, 1, 1, 4, 4, 1, 0];
        assert!(matches!(
            decode_directory(&bytes),
            Err(GeoDataError::ArchiveFormat(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_count() {
        let bytes = [0xff, 0xff, 0x03, 1, 1, 1, 1];
        assert!(decode_directory(&bytes).is_err());
        assert!(decode_directory(&[]).is_err());
        assert_eq!(decode_directory(&[0]).unwrap(), Vec::new());
    }

    #[test]
    fn test_rejects_overflowing_contiguous_offset() {
        // count 2, deltas 1 1, runs 1 1, lengths 5 5, offsets u64::MAX - 1 then "contiguous"
        let mut bytes = vec![2, 1, 1, 1, 1, 5, 5];
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        bytes.push(0);
        assert!(matches!(
            decode_directory(&bytes),
            Err(GeoDataError::ArchiveFormat(_))
        ));
    }

    #[test]
    fn test_find_entry() {
        let entries = vec![
            entry(10, 0, 5, 1),
            entry(11, 5, 5, 3),
            entry(20, 0, 30, 0),
        ];
        assert_eq!(find_entry(&entries, 9), None);
        assert_eq!(find_entry(&entries, 10).map(|e| e.offset), Some(0));
        assert_eq!(find_entry(&entries, 13).map(|e| e.tile_id), Some(11));
        assert_eq!(find_entry(&entries, 14), None);
        let leaf = find_entry(&entries, 1_000).unwrap();
        assert!(leaf.is_leaf_pointer());
        assert_eq!(find_entry(&[], 0), None);
    }
}
