//! TIFF-variant LZW decoder.
//!
//! Codes are packed MSB-first, start at 9 bits and grow to at most 12. The code
//! width grows one code early (when the next free code reaches `2^width - 1`),
//! which is what TIFF writers have always produced.

use crate::error::{GeoDataError, Result};

const CLEAR_CODE: u16 = 256;
const END_CODE: u16 = 257;
const FIRST_FREE_CODE: u16 = 258;
const MIN_CODE_WIDTH: u32 = 9;
const MAX_CODE_WIDTH: u32 = 12;
const TABLE_SIZE: usize = 1 << MAX_CODE_WIDTH;

struct BitReader<'a> {
    input: &'a [u8],
    position: usize,
    buffer: u32,
    bits: u32,
}

impl<'a> BitReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            position: 0,
            buffer: 0,
            bits: 0,
        }
    }

    /// Next `width`-bit code, or `None` once the input runs dry.
    fn read(&mut self, width: u32) -> Option<u16> {
        while self.bits < width {
            let byte = *self.input.get(self.position)?;
            self.position += 1;
            self.buffer = (self.buffer << 8) | u32::from(byte);
            self.bits += 8;
        }
        self.bits -= width;
        let code = (self.buffer >> self.bits) & ((1 << width) - 1);
        self.buffer &= (1 << self.bits) - 1;
        Some(code as u16)
    }
}

/// String table. Each entry is its prefix code plus one byte, with the
/// entry's length and first byte memoized.
struct Table {
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    length: Vec<u16>,
    first: Vec<u8>,
}

impl Table {
    fn new() -> Self {
        let mut table = Self {
            prefix: vec![0; TABLE_SIZE],
            suffix: vec![0; TABLE_SIZE],
            length: vec![0; TABLE_SIZE],
            first: vec![0; TABLE_SIZE],
        };
        for byte in 0..=255u8 {
            let i = usize::from(byte);
            table.suffix[i] = byte;
            table.length[i] = 1;
            table.first[i] = byte;
        }
        table
    }

    fn push(&mut self, code: u16, prefix: u16, byte: u8) {
        let (c, p) = (usize::from(code), usize::from(prefix));
        self.prefix[c] = prefix;
        self.suffix[c] = byte;
        self.length[c] = self.length[p] + 1;
        self.first[c] = self.first[p];
    }

    fn emit(&self, code: u16, output: &mut Vec<u8>) {
        let len = usize::from(self.length[usize::from(code)]);
        let start = output.len();
        output.resize(start + len, 0);
        let mut current = code;
        for slot in output[start..].iter_mut().rev() {
            *slot = self.suffix[usize::from(current)];
            current = self.prefix[usize::from(current)];
        }
    }
}

/// Decodes one LZW-compressed TIFF tile.
///
/// Exactly `expected_len` bytes are returned. A stream that ends before
/// producing that many bytes is a decode error, as is any code that refers past
/// the end of the string table.
pub fn decode_lzw(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut table = Table::new();
    let mut reader = BitReader::new(input);
    let mut output = Vec::with_capacity(expected_len);

    let mut width = MIN_CODE_WIDTH;
    let mut next_code = FIRST_FREE_CODE;
    let mut previous: Option<u16> = None;

    while output.len() < expected_len {
        let Some(code) = reader.read(width) else {
            break;
        };

        match code {
            CLEAR_CODE => {
                width = MIN_CODE_WIDTH;
                next_code = FIRST_FREE_CODE;
                previous = None;
                continue;
            }
            END_CODE => break,
            _ => {}
        }

        let Some(prev) = previous else {
            if code > 255 {
                return Err(GeoDataError::Decode(format!(
                    "LZW code {code} with an empty string table"
                )));
            }
            table.emit(code, &mut output);
            previous = Some(code);
            continue;
        };

        let appended = if code < next_code {
            table.first[usize::from(code)]
        } else if code == next_code {
            table.first[usize::from(prev)]
        } else {
            return Err(GeoDataError::Decode(format!(
                "LZW code {code} beyond table end {next_code}"
            )));
        };

        if usize::from(next_code) < TABLE_SIZE {
            table.push(next_code, prev, appended);
            next_code += 1;
            if u32::from(next_code) + 1 >= (1 << width) && width < MAX_CODE_WIDTH {
                width += 1;
            }
        }

        table.emit(code, &mut output);
        previous = Some(code);
    }

    if output.len() < expected_len {
        return Err(GeoDataError::Decode(format!(
            "LZW stream truncated: {} of {} bytes",
            output.len(),
            expected_len
        )));
    }
    output.truncate(expected_len);
    Ok(output)
}
