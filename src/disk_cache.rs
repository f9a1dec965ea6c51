//! On-disk mirror of downloaded tiles and rasters.
//!
//! Files land under the source's cache directory at a sanitized relative path.
//! Writes go to a temporary file in the destination directory and are renamed
//! into place, so a concurrent reader sees either nothing or the whole file.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;
use crate::http::TileFetcher;

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a `/`-separated key. Characters outside
    /// `[A-Za-z0-9._-]` become `_`, and `.`/`..` components are dropped.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in key.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                continue;
            }
            let safe: String = component
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            path.push(safe);
        }
        path
    }

    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Deletes a cached file that turned out to be unreadable.
    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                debug!(key, "removed cached file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `bytes` to `key` via temp file and rename.
    pub fn write_atomic(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key);
        let parent = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    }

    /// Disk first, then the network. A successful download is persisted before
    /// it is returned; a failure to persist is logged and the bytes are still
    /// handed back. `Ok(None)` means the object does not exist (or there is no
    /// remote to ask).
    pub fn fetch_through(
        &self,
        key: &str,
        fetcher: &dyn TileFetcher,
        url: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.read(key)? {
            debug!(key, "disk cache hit");
            return Ok(Some(bytes));
        }
        let Some(url) = url else {
            return Ok(None);
        };

        let Some(bytes) = fetcher.fetch(url)? else {
            return Ok(None);
        };
        if let Err(error) = self.write_atomic(key, &bytes) {
            warn!(key, %error, "could not persist download");
        }
        Ok(Some(bytes))
    }

    /// Like [`fetch_through`](Self::fetch_through) but for sources that are
    /// opened from a file. Returns the on-disk path.
    pub fn fetch_to_file(
        &self,
        key: &str,
        fetcher: &dyn TileFetcher,
        url: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        let path = self.path_for(key);
        if path.is_file() {
            return Ok(Some(path));
        }
        let Some(url) = url else {
            return Ok(None);
        };
        match fetcher.fetch(url)? {
            Some(bytes) => Ok(Some(self.write_atomic(key, &bytes)?)),
            None => Ok(None),
        }
    }
}
