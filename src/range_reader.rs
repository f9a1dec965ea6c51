//! Range-based reader interface for rasters and tile archives
//!
//! Both the GeoTIFF decoder and the archive reader only ever need "give me
//! these bytes", so they sit on top of this trait and work the same against a
//! local file, an HTTP URL, or an in-memory buffer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::StatusCode;
use tracing::trace;

use crate::config::HttpConfig;
use crate::error::{GeoDataError, Result};
use crate::http::build_client;

/// Trait for reading byte ranges from any source
pub trait RangeReader: Send + Sync {
    /// Read exactly `length` bytes starting at `offset`
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Total size of the source in bytes, when known without a request
    fn size(&self) -> Option<u64>;

    /// Human-readable identifier for logging
    fn identifier(&self) -> &str;
}

/// Local file range reader.
///
/// Owns its file handle for its whole lifetime; the handle is closed when the
/// reader (and with it the raster that owns it) is dropped.
pub struct LocalRangeReader {
    path: PathBuf,
    identifier: String,
    file: Mutex<File>,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            identifier: path.to_string_lossy().into_owned(),
            path,
            file: Mutex::new(file),
            size,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// HTTP range reader using a blocking client.
///
/// A 206 response is used as-is. Servers that ignore the `Range` header answer
/// 200 with the whole object, in which case the leading bytes are skipped here.
pub struct HttpRangeReader {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    pub fn new(url: &str, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: build_client(http)?,
        })
    }

    pub fn with_client(url: &str, client: reqwest::blocking::Client) -> Self {
        Self {
            url: url.to_string(),
            client,
        }
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = u64::try_from(length - 1)
            .ok()
            .and_then(|last| offset.checked_add(last))
            .ok_or_else(|| GeoDataError::Decode(format!("range {offset}+{length} overflows")))?;
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={offset}-{end}"))
            .send()?;

        let status = response.status();
        trace!(url = %self.url, offset, length, status = status.as_u16(), "range request");
        let body = response.bytes()?;
        let skip = match status {
            StatusCode::PARTIAL_CONTENT => 0,
            StatusCode::OK => usize::try_from(offset)
                .map_err(|_| GeoDataError::Decode(format!("offset {offset} exceeds memory")))?,
            other => {
                return Err(GeoDataError::Http {
                    status: other.as_u16(),
                });
            }
        };
        slice_body(&body, skip, length)
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

fn slice_body(body: &[u8], skip: usize, length: usize) -> Result<Vec<u8>> {
    let end = skip
        .checked_add(length)
        .filter(|&end| end <= body.len())
        .ok_or_else(|| {
            GeoDataError::Decode(format!(
                "short range response: wanted {length} bytes at {skip}, got {}",
                body.len()
            ))
        })?;
    Ok(body[skip..end].to_vec())
}

/// In-memory range reader over an owned buffer
pub struct MemoryRangeReader {
    data: Arc<[u8]>,
    identifier: String,
}

impl MemoryRangeReader {
    pub fn new(data: impl Into<Arc<[u8]>>, identifier: &str) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.to_string(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| GeoDataError::Decode(format!("offset {offset} exceeds memory")))?;
        slice_body(&self.data, start, length).map_err(|_| {
            GeoDataError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "range {offset}+{length} past end of {} ({} bytes)",
                    self.identifier,
                    self.data.len()
                ),
            ))
        })
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create a range reader from a path or URL
pub fn create_range_reader(source: &str, http: &HttpConfig) -> Result<Arc<dyn RangeReader>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Arc::new(HttpRangeReader::new(source, http)?))
    } else {
        Ok(Arc::new(LocalRangeReader::new(source)?))
    }
}
