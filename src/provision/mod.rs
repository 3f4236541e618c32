//! Tool provisioning: resolve the download for this OS and return a cached
//! executable, downloading it at most once per (tool, version).

pub mod cache;
pub mod checksum;
pub mod client;
pub mod platform;


use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;

use crate::cancel::CancellationToken;
use crate::error::{Result, RunnerError};

pub use cache::{CacheLock, DiskToolCache, ToolCache};
pub use client::{Fetcher, HttpFetcher};
pub use platform::{current_os_type, DownloadTable, ToolSource};

/// Name of the verification tool; also the cache key and the binary's file name.
pub const TOOL_NAME: &str = "container-structure-test";

/// Version the tool is cached under. The download URLs themselves are unversioned.
pub const DEFAULT_TOOL_VERSION: &str = "1.0.0";

/// An executable ready to run, plus its cache identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolHandle {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
}

pub struct ToolProvisioner {
    table: DownloadTable,
    cache: Arc<dyn ToolCache>,
    fetcher: Arc<dyn Fetcher>,
    tool_name: String,
    version: String,
    // Serializes find-or-download within this process; the cache lock covers
    // other processes.
    provisioning: Mutex<()>,
}

impl ToolProvisioner {
    pub fn new(table: DownloadTable, cache: Arc<dyn ToolCache>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            table,
            cache,
            fetcher,
            tool_name: TOOL_NAME.to_string(),
            version: DEFAULT_TOOL_VERSION.to_string(),
            provisioning: Mutex::new(()),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn table(&self) -> &DownloadTable {
        &self.table
    }

    /// Download source for `os_type`, or `UnsupportedPlatform`.
    pub fn resolve(&self, os_type: &str) -> Result<&ToolSource> {
        self.table
            .resolve(os_type)
            .ok_or_else(|| RunnerError::UnsupportedPlatform {
                os: platform::normalize_os_type(os_type),
            })
    }

    /// Return the cached tool for `os_type`, downloading it on a cache miss.
    pub fn provision(&self, os_type: &str, cancel: &CancellationToken) -> Result<ToolHandle> {
        let source = self.resolve(os_type)?.clone();

        if let Some(path) = self.cached(&source) {
            tracing::debug!(path = %path.display(), "Tool is retrieved from cache.");
            return Ok(self.handle(path));
        }

        let _guard = self
            .provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _lock = self.cache.lock(&self.tool_name, &self.version)?;

        // Another thread or process may have finished while we waited.
        if let Some(path) = self.cached(&source) {
            tracing::debug!(path = %path.display(), "Tool was cached by a concurrent provision.");
            return Ok(self.handle(path));
        }

        cancel.check()?;
        let bytes = self.fetcher.fetch(&source.url, cancel)?;

        let sha256 = checksum::compute_sha256_checksum(&bytes);
        if let Some(expected) = &source.sha256 {
            checksum::verify_checksum(&bytes, expected, &source.url)?;
        }

        let mut download = NamedTempFile::new().map_err(|e| {
            RunnerError::provision(format!("Failed to create download file: {e}"))
        })?;
        download
            .write_all(&bytes)
            .and_then(|()| download.flush())
            .map_err(|e| RunnerError::provision(format!("Failed to write download file: {e}")))?;
        tracing::debug!(
            url = %source.url,
            path = %download.path().display(),
            bytes = bytes.len(),
            %sha256,
            "Successfully downloaded"
        );

        let path = self.cache.store(
            download.path(),
            &self.tool_name,
            &self.tool_name,
            &self.version,
        )?;
        tracing::debug!(path = %path.display(), "Successfully added to cache");

        Ok(self.handle(path))
    }

    /// Cached executable for this tool and version, if there is a usable one.
    ///
    /// When `source` pins a digest, the cached bytes must match it. An entry
    /// stored before the pin was added (or altered since) counts as a miss,
    /// so the caller downloads again and the pin is checked on the new bytes.
    fn cached(&self, source: &ToolSource) -> Option<PathBuf> {
        let path = self.cache.find(&self.tool_name, &self.version)?;
        let Some(expected) = &source.sha256 else {
            return Some(path);
        };

        let verified = fs::read(&path)
            .map_err(|e| RunnerError::provision(format!("Failed to read cached tool: {e}")))
            .and_then(|content| checksum::verify_checksum(&content, expected, &source.url));
        match verified {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Cached tool does not match the pinned checksum, downloading again"
                );
                None
            }
        }
    }

    fn handle(&self, path: PathBuf) -> ToolHandle {
        ToolHandle {
            path,
            name: self.tool_name.clone(),
            version: self.version.clone(),
        }
    }
}
