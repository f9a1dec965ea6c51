//! Builders for in-memory GeoTIFF, archive and PNG fixtures.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::write::{GzEncoder, ZlibEncoder};

use crate::archive::{Compression, DirectoryEntry, HEADER_SIZE, zxy_to_tile_id};
use crate::error::{GeoDataError, Result};
use crate::http::TileFetcher;
use crate::tiff_utils::{
    TAG_BITS_PER_SAMPLE, TAG_COMPRESSION, TAG_IMAGE_LENGTH, TAG_IMAGE_WIDTH,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT, TAG_PREDICTOR, TAG_SAMPLE_FORMAT,
    TAG_SAMPLES_PER_PIXEL, TAG_TILE_BYTE_COUNTS, TAG_TILE_LENGTH, TAG_TILE_OFFSETS,
    TAG_TILE_WIDTH, TYPE_DOUBLE, TYPE_LONG, TYPE_SHORT,
};

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

// ============================================================================
// GeoTIFF
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffCompression {
    None,
    Deflate,
    Lzw,
}

impl TiffCompression {
    fn code(self) -> u16 {
        match self {
            TiffCompression::None => 1,
            TiffCompression::Lzw => 5,
            TiffCompression::Deflate => 8,
        }
    }
}

/// Writes a single-band tiled TIFF. Tile data starts right after the 8-byte
/// header; out-of-line tag values and the IFD follow the tiles.
pub struct TiffBuilder {
    width: usize,
    height: usize,
    tile_width: usize,
    tile_height: usize,
    compression: TiffCompression,
    compression_code: Option<u16>,
    little_endian: bool,
    predictor: bool,
    pixel_scale: [f64; 2],
    tie: [f64; 2],
    omitted: HashSet<u16>,
}

impl TiffBuilder {
    pub fn new(width: usize, height: usize, tile_width: usize, tile_height: usize) -> Self {
        Self {
            width,
            height,
            tile_width,
            tile_height,
            compression: TiffCompression::None,
            compression_code: None,
            little_endian: true,
            predictor: false,
            pixel_scale: [1.0 / 120.0, 1.0 / 120.0],
            tie: [0.0, 1.0],
            omitted: HashSet::new(),
        }
    }

    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Writes `code` into the Compression tag without changing the payload.
    pub fn compression_code(mut self, code: u16) -> Self {
        self.compression_code = Some(code);
        self
    }

    pub fn little_endian(mut self, little_endian: bool) -> Self {
        self.little_endian = little_endian;
        self
    }

    pub fn predictor(mut self, predictor: bool) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn georeference(mut self, scale_x: f64, scale_y: f64, tie_lon: f64, tie_lat: f64) -> Self {
        self.pixel_scale = [scale_x, scale_y];
        self.tie = [tie_lon, tie_lat];
        self
    }

    pub fn omit_tag(mut self, tag: u16) -> Self {
        self.omitted.insert(tag);
        self
    }

    pub fn build_u8(self, pixels: &[u8]) -> Vec<u8> {
        let samples: Vec<u16> = pixels.iter().map(|&p| u16::from(p)).collect();
        self.build(&samples, 1)
    }

    pub fn build_i16(self, pixels: &[i16]) -> Vec<u8> {
        let samples: Vec<u16> = pixels.iter().map(|&p| p as u16).collect();
        self.build(&samples, 2)
    }

    fn u16_bytes(&self, v: u16) -> [u8; 2] {
        if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        }
    }

    fn u32_bytes(&self, v: u32) -> [u8; 4] {
        if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        }
    }

    fn f64_bytes(&self, v: f64) -> [u8; 8] {
        if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        }
    }

    fn encode_tile(&self, pixels: &[u16], tile_x: usize, tile_y: usize, bytes_per_sample: usize) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.tile_width * self.tile_height * bytes_per_sample);
        for row in 0..self.tile_height {
            let mut samples: Vec<u16> = (0..self.tile_width)
                .map(|col| {
                    let (x, y) = (tile_x * self.tile_width + col, tile_y * self.tile_height + row);
                    if x < self.width && y < self.height {
                        pixels[y * self.width + x]
                    } else {
                        0
                    }
                })
                .collect();
            if self.predictor {
                for i in (1..samples.len()).rev() {
                    samples[i] = if bytes_per_sample == 1 {
                        u16::from((samples[i] as u8).wrapping_sub(samples[i - 1] as u8))
                    } else {
                        samples[i].wrapping_sub(samples[i - 1])
                    };
                }
            }
            for s in samples {
                if bytes_per_sample == 1 {
                    raw.push(s as u8);
                } else {
                    raw.extend_from_slice(&self.u16_bytes(s));
                }
            }
        }

        match self.compression {
            TiffCompression::None => raw,
            TiffCompression::Deflate => zlib(&raw),
            TiffCompression::Lzw => {
                weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                    .encode(&raw)
                    .unwrap()
            }
        }
    }

    fn build(self, pixels: &[u16], bytes_per_sample: usize) -> Vec<u8> {
        assert_eq!(pixels.len(), self.width * self.height);
        let tiles_across = self.width.div_ceil(self.tile_width);
        let tiles_down = self.height.div_ceil(self.tile_height);

        let mut out = if self.little_endian {
            vec![b'I', b'I', 42, 0, 0, 0, 0, 0]
        } else {
            vec![b'M', b'M', 0, 42, 0, 0, 0, 0]
        };

        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for ty in 0..tiles_down {
            for tx in 0..tiles_across {
                let tile = self.encode_tile(pixels, tx, ty, bytes_per_sample);
                offsets.push(out.len() as u32);
                counts.push(tile.len() as u32);
                out.extend_from_slice(&tile);
            }
        }

        let short = |v: u16| (TYPE_SHORT, 1u32, self.u16_bytes(v).to_vec());
        let long = |v: u32| (TYPE_LONG, 1u32, self.u32_bytes(v).to_vec());
        let longs = |vs: &[u32]| {
            let bytes: Vec<u8> = vs.iter().flat_map(|&v| self.u32_bytes(v)).collect();
            (TYPE_LONG, vs.len() as u32, bytes)
        };
        let doubles = |vs: &[f64]| {
            let bytes: Vec<u8> = vs.iter().flat_map(|&v| self.f64_bytes(v)).collect();
            (TYPE_DOUBLE, vs.len() as u32, bytes)
        };

        let mut tags: Vec<(u16, (u16, u32, Vec<u8>))> = vec![
            (TAG_IMAGE_WIDTH, long(self.width as u32)),
            (TAG_IMAGE_LENGTH, long(self.height as u32)),
            (TAG_BITS_PER_SAMPLE, short(bytes_per_sample as u16 * 8)),
            (
                TAG_COMPRESSION,
                short(self.compression_code.unwrap_or(self.compression.code())),
            ),
            (TAG_SAMPLES_PER_PIXEL, short(1)),
            (TAG_TILE_WIDTH, short(self.tile_width as u16)),
            (TAG_TILE_LENGTH, long(self.tile_height as u32)),
            (TAG_TILE_OFFSETS, longs(&offsets)),
            (TAG_TILE_BYTE_COUNTS, longs(&counts)),
            (TAG_SAMPLE_FORMAT, short(if bytes_per_sample == 1 { 1 } else { 2 })),
            (
                TAG_MODEL_PIXEL_SCALE,
                doubles(&[self.pixel_scale[0], self.pixel_scale[1], 0.0]),
            ),
            (
                TAG_MODEL_TIEPOINT,
                doubles(&[0.0, 0.0, 0.0, self.tie[0], self.tie[1], 0.0]),
            ),
        ];
        if self.predictor {
            tags.push((TAG_PREDICTOR, short(2)));
        }
        tags.retain(|(tag, _)| !self.omitted.contains(tag));
        tags.sort_by_key(|(tag, _)| *tag);

        let mut entries = Vec::new();
        for (tag, (field_type, count, bytes)) in tags {
            let mut value = [0u8; 4];
            if bytes.len() <= 4 {
                value[..bytes.len()].copy_from_slice(&bytes);
            } else {
                if out.len() % 2 == 1 {
                    out.push(0);
                }
                value = self.u32_bytes(out.len() as u32);
                out.extend_from_slice(&bytes);
            }
            entries.push((tag, field_type, count, value));
        }

        if out.len() % 2 == 1 {
            out.push(0);
        }
        let ifd_offset = out.len() as u32;
        out.extend_from_slice(&self.u16_bytes(entries.len() as u16));
        for (tag, field_type, count, value) in entries {
            out.extend_from_slice(&self.u16_bytes(tag));
            out.extend_from_slice(&self.u16_bytes(field_type));
            out.extend_from_slice(&self.u32_bytes(count));
            out.extend_from_slice(&value);
        }
        out.extend_from_slice(&[0, 0, 0, 0]);
        let ifd = self.u32_bytes(ifd_offset);
        out[4..8].copy_from_slice(&ifd);
        out
    }
}

// ============================================================================
// Tile archive
// ============================================================================

fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Column-wise directory encoding, uncompressed.
pub fn encode_directory(entries: &[DirectoryEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_varint(entries.len() as u64, &mut buf);
    let mut last_id = 0;
    for e in entries {
        encode_varint(e.tile_id - last_id, &mut buf);
        last_id = e.tile_id;
    }
    for e in entries {
        encode_varint(u64::from(e.run_length), &mut buf);
    }
    for e in entries {
        encode_varint(u64::from(e.length), &mut buf);
    }
    for (i, e) in entries.iter().enumerate() {
        let contiguous = i > 0 && {
            let prev = &entries[i - 1];
            e.offset == prev.offset + u64::from(prev.length)
        };
        encode_varint(if contiguous { 0 } else { e.offset + 1 }, &mut buf);
    }
    buf
}

/// Writes a v3 archive: header, root directory, leaf directories, tile data.
pub struct ArchiveBuilder {
    tiles: Vec<(u64, u32, Vec<u8>)>,
    leaf_depth: usize,
    tile_compression: Compression,
    raw_root: Option<Vec<u8>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            tiles: Vec::new(),
            leaf_depth: 0,
            tile_compression: Compression::None,
            raw_root: None,
        }
    }

    pub fn tile(self, z: u8, x: u32, y: u32, data: Vec<u8>) -> Self {
        let id = zxy_to_tile_id(z, x, y).unwrap();
        self.run(id, 1, data)
    }

    /// `run_length` consecutive tile IDs starting at `first_id` sharing `data`.
    pub fn run(mut self, first_id: u64, run_length: u32, data: Vec<u8>) -> Self {
        self.tiles.push((first_id, run_length, data));
        self
    }

    /// Nest the tile entries under this many single-entry leaf directories.
    pub fn leaf_depth(mut self, depth: usize) -> Self {
        self.leaf_depth = depth;
        self
    }

    /// Header tile compression; tile bytes are stored exactly as given.
    pub fn tile_compression(mut self, compression: Compression) -> Self {
        self.tile_compression = compression;
        self
    }

    /// Replace the root directory with these uncompressed directory bytes.
    pub fn raw_root(mut self, directory: Vec<u8>) -> Self {
        self.raw_root = Some(directory);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.tiles.sort_by_key(|(id, _, _)| *id);

        let mut tile_data = Vec::new();
        let mut entries = Vec::new();
        for (id, run_length, data) in &self.tiles {
            entries.push(DirectoryEntry {
                tile_id: *id,
                offset: tile_data.len() as u64,
                length: data.len() as u32,
                run_length: *run_length,
            });
            tile_data.extend_from_slice(data);
        }

        let first_id = entries.first().map_or(0, |e| e.tile_id);
        let mut leaves = Vec::new();
        let mut directory = gzip(&encode_directory(&entries));
        for _ in 0..self.leaf_depth {
            let pointer = DirectoryEntry {
                tile_id: first_id,
                offset: leaves.len() as u64,
                length: directory.len() as u32,
                run_length: 0,
            };
            leaves.extend_from_slice(&directory);
            directory = gzip(&encode_directory(&[pointer]));
        }
        let root = match &self.raw_root {
            Some(raw) => gzip(raw),
            None => directory,
        };

        let zooms: Vec<u8> = self
            .tiles
            .iter()
            .filter_map(|(id, _, _)| crate::archive::tile_id_to_zxy(*id).map(|(z, _, _)| z))
            .collect();
        let min_zoom = zooms.iter().copied().min().unwrap_or(0);
        let max_zoom = zooms.iter().copied().max().unwrap_or(0);

        let root_offset = HEADER_SIZE as u64;
        let leaf_offset = root_offset + root.len() as u64;
        let data_offset = leaf_offset + leaves.len() as u64;

        let mut header = vec![0u8; HEADER_SIZE];
        header[0..7].copy_from_slice(b"PMTiles");
        header[7] = 3;
        let fields = [
            root_offset,
            root.len() as u64,
            0,
            0,
            leaf_offset,
            leaves.len() as u64,
            data_offset,
            tile_data.len() as u64,
            self.tiles.len() as u64,
            self.tiles.len() as u64,
            self.tiles.len() as u64,
        ];
        for (i, value) in fields.iter().enumerate() {
            header[8 + i * 8..16 + i * 8].copy_from_slice(&value.to_le_bytes());
        }
        header[96] = 1;
        header[97] = Compression::Gzip.code();
        header[98] = self.tile_compression.code();
        header[99] = 2;
        header[100] = min_zoom;
        header[101] = max_zoom;
        let e7 = |v: f64| ((v * 10_000_000.0) as i32).to_le_bytes();
        header[102..106].copy_from_slice(&e7(-180.0));
        header[106..110].copy_from_slice(&e7(-85.0));
        header[110..114].copy_from_slice(&e7(180.0));
        header[114..118].copy_from_slice(&e7(85.0));
        header[118] = min_zoom;

        let mut out = header;
        out.extend_from_slice(&root);
        out.extend_from_slice(&leaves);
        out.extend_from_slice(&tile_data);
        out
    }
}

// ============================================================================
// PNG
// ============================================================================

fn encode_png<I>(image: I) -> Vec<u8>
where
    I: Into<image::DynamicImage>,
{
    let mut bytes = Cursor::new(Vec::new());
    image
        .into()
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// Terrarium-encoded elevation tile.
pub fn terrarium_png(size: u32, meters: impl Fn(u32, u32) -> f64) -> Vec<u8> {
    let image = image::RgbImage::from_fn(size, size, |x, y| {
        let v = meters(x, y) + 32768.0;
        let r = (v / 256.0).floor();
        let g = (v - r * 256.0).floor();
        let b = ((v - r * 256.0 - g) * 256.0).round();
        image::Rgb([r as u8, g as u8, b as u8])
    });
    encode_png(image)
}

pub fn gray_png(size: u32, value: impl Fn(u32, u32) -> u8) -> Vec<u8> {
    encode_png(image::GrayImage::from_fn(size, size, |x, y| {
        image::Luma([value(x, y)])
    }))
}

// ============================================================================
// Network
// ============================================================================

/// Serves canned responses by URL; unknown URLs are 404s.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, body: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), body);
        self
    }

    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl TileFetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(GeoDataError::Http { status: 503 });
        }
        Ok(self.responses.get(url).cloned())
    }
}

/// Loopback HTTP server answering each connection with the next canned
/// `(status, body)` pair, then closing it.
pub struct TestServer {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn serve(responses: Vec<(u16, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/archive.pmtiles", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                log.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&request).to_lowercase());
                let head = format!(
                    "HTTP/1.1 {status} {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    reason(status),
                    body.len()
                );
                stream.write_all(head.as_bytes()).ok();
                stream.write_all(&body).ok();
            }
        });
        Self {
            url,
            requests,
            handle: Some(handle),
        }
    }

    /// Raw request heads received so far, lowercased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Waits until every canned response was served.
    pub fn finish(mut self) -> Vec<String> {
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
        self.requests()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Client that ignores proxy settings from the environment.
pub fn loopback_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .no_proxy()
        .build()
        .unwrap()
}
