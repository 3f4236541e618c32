//! Disk-backed tool cache keyed by (tool name, version).
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/<name>/<version>/<file_name>   the executable
//! <root>/<name>/<version>.complete      TOML metadata, written last
//! <root>/<name>/<version>.lock          advisory lock for first-time provisioning
//! ```
//!
//! An entry only counts once its `.complete` marker exists, so a crash halfway
//! through `store` leaves a miss rather than a truncated binary.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::checksum::compute_sha256_checksum;
use crate::error::{Result, RunnerError};

/// Store of downloaded executables.
pub trait ToolCache: Send + Sync {
    /// Path of the cached executable, if a complete entry exists.
    fn find(&self, name: &str, version: &str) -> Option<PathBuf>;

    /// Copy `source` into the cache as `file_name` and return the cached path.
    fn store(&self, source: &Path, file_name: &str, name: &str, version: &str) -> Result<PathBuf>;

    /// Cross-process exclusion for the find-or-download sequence.
    /// Caches without a shared backing store don't need one.
    fn lock(&self, _name: &str, _version: &str) -> Result<CacheLock> {
        Ok(CacheLock::none())
    }
}

/// Held while provisioning; the advisory lock is released on drop.
#[derive(Debug)]
pub struct CacheLock {
    file: Option<File>,
}

impl CacheLock {
    pub fn none() -> Self {
        Self { file: None }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

/// Contents of the `.complete` marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub file_name: String,
    pub sha256: String,
    pub cached_at: DateTime<Utc>,
}

/// A complete entry, as reported by [`DiskToolCache::list`]
#[derive(Debug, Clone)]
pub struct CachedTool {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub meta: CacheEntryMeta,
}

/// [`ToolCache`] rooted at a directory on disk.
///
/// Safe to share between processes: `store` only publishes an entry by
/// writing its marker, and `lock` takes an advisory lock on a per-entry
/// lock file.
#[derive(Debug, Clone)]
pub struct DiskToolCache {
    root: PathBuf,
}

impl DiskToolCache {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `<user cache dir>/cst-runner/tools`, falling back to the temp dir.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cst-runner")
            .join("tools")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version)
    }

    fn marker_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(format!("{version}.complete"))
    }

    fn lock_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(format!("{version}.lock"))
    }

    /// Metadata of a complete entry.
    ///
    /// Invalid keys, a missing marker and a marker that doesn't parse all
    /// read as `None`.
    pub fn entry_meta(&self, name: &str, version: &str) -> Option<CacheEntryMeta> {
        if validate_key(name, version).is_err() {
            return None;
        }
        let marker = self.marker_path(name, version);
        let content = fs::read_to_string(&marker).ok()?;
        match toml::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::debug!(marker = %marker.display(), error = %e, "ignoring unreadable cache marker");
                None
            }
        }
    }

    /// All complete entries, sorted by name then semantic version.
    ///
    /// Directories without a readable marker, or whose binary is missing, are
    /// skipped rather than reported as errors. A missing cache root is an
    /// empty cache.
    pub fn list(&self) -> Result<Vec<CachedTool>> {
        let mut tools = Vec::new();
        let names = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(tools),
            Err(e) => return Err(cache_io("Failed to read cache root", &self.root, e)),
        };

        for name_entry in names.flatten() {
            if !name_entry.path().is_dir() {
                continue;
            }
            let name = name_entry.file_name().to_string_lossy().to_string();
            let Ok(versions) = fs::read_dir(name_entry.path()) else {
                continue;
            };
            for version_entry in versions.flatten() {
                if !version_entry.path().is_dir() {
                    continue;
                }
                let version = version_entry.file_name().to_string_lossy().to_string();
                if let (Some(path), Some(meta)) =
                    (self.find(&name, &version), self.entry_meta(&name, &version))
                {
                    tools.push(CachedTool {
                        name: name.clone(),
                        version,
                        path,
                        meta,
                    });
                }
            }
        }

        // Only semver keys get a marker, so every listed version parses.
        tools.sort_by(|a, b| {
            a.name.cmp(&b.name).then_with(|| {
                match (Version::parse(&a.version), Version::parse(&b.version)) {
                    (Ok(left), Ok(right)) => left.cmp(&right),
                    _ => a.version.cmp(&b.version),
                }
            })
        });
        Ok(tools)
    }

    /// Delete one entry. Returns false when there was nothing to delete.
    ///
    /// Takes the entry's lock, so it waits for an in-flight provision of the
    /// same version to finish.
    pub fn remove(&self, name: &str, version: &str) -> Result<bool> {
        validate_key(name, version)?;
        let _lock = self.lock(name, version)?;

        let marker = self.marker_path(name, version);
        let dir = self.version_dir(name, version);
        let existed = marker.exists() || dir.exists();

        // Marker first so a partial removal reads as a miss.
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| cache_io("Failed to remove marker", &marker, e))?;
        }
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| cache_io("Failed to remove entry", &dir, e))?;
        }
        Ok(existed)
    }
}

impl ToolCache for DiskToolCache {
    /// Hit only when the marker parses and names a file that exists.
    fn find(&self, name: &str, version: &str) -> Option<PathBuf> {
        let meta = self.entry_meta(name, version)?;
        let path = self.version_dir(name, version).join(&meta.file_name);
        path.is_file().then_some(path)
    }

    /// Install `source` into the cache and publish it.
    ///
    /// The bytes are staged in the entry directory, synced, made executable
    /// (0o755) and renamed into place. The marker is written after the
    /// rename, so readers never see a partially written binary.
    fn store(&self, source: &Path, file_name: &str, name: &str, version: &str) -> Result<PathBuf> {
        validate_key(name, version)?;
        validate_component(file_name, "file name")?;

        let dir = self.version_dir(name, version);
        fs::create_dir_all(&dir).map_err(|e| cache_io("Failed to create cache directory", &dir, e))?;

        let content = fs::read(source).map_err(|e| cache_io("Failed to read download", source, e))?;

        let mut staging = NamedTempFile::new_in(&dir)
            .map_err(|e| cache_io("Failed to create staging file", &dir, e))?;
        staging
            .write_all(&content)
            .and_then(|()| staging.as_file().sync_all())
            .map_err(|e| cache_io("Failed to write staging file", staging.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staging.path(), fs::Permissions::from_mode(0o755))
                .map_err(|e| cache_io("Failed to set executable permissions", staging.path(), e))?;
        }

        let dest = dir.join(file_name);
        staging
            .persist(&dest)
            .map_err(|e| cache_io("Failed to move binary into cache", &dest, e.error))?;

        let meta = CacheEntryMeta {
            file_name: file_name.to_string(),
            sha256: compute_sha256_checksum(&content),
            cached_at: Utc::now(),
        };
        write_marker(&self.marker_path(name, version), &meta)?;

        tracing::debug!(path = %dest.display(), sha256 = %meta.sha256, "stored tool in cache");
        Ok(dest)
    }

    /// Block until this process holds the exclusive lock on
    /// `<root>/<name>/<version>.lock`. The lock file itself is never removed.
    fn lock(&self, name: &str, version: &str) -> Result<CacheLock> {
        validate_key(name, version)?;
        let path = self.lock_path(name, version);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| cache_io("Failed to create cache directory", parent, e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| cache_io("Failed to open lock file", &path, e))?;
        file.lock_exclusive()
            .map_err(|e| cache_io("Failed to acquire cache lock", &path, e))?;

        Ok(CacheLock { file: Some(file) })
    }
}

/// Write the marker through a staging file and rename, so it is either
/// absent or complete.
fn write_marker(path: &Path, meta: &CacheEntryMeta) -> Result<()> {
    let content = toml::to_string_pretty(meta)
        .map_err(|e| RunnerError::provision(format!("Failed to serialize cache marker: {e}")))?;
    let parent = path
        .parent()
        .ok_or_else(|| RunnerError::provision("Cache marker has no parent directory"))?;

    let mut staging = NamedTempFile::new_in(parent)
        .map_err(|e| cache_io("Failed to create marker staging file", parent, e))?;
    staging
        .write_all(content.as_bytes())
        .map_err(|e| cache_io("Failed to write cache marker", staging.path(), e))?;
    staging
        .persist(path)
        .map_err(|e| cache_io("Failed to write cache marker", path, e.error))?;
    Ok(())
}

/// Tool names must be a single path component and versions must be semver.
fn validate_key(name: &str, version: &str) -> Result<()> {
    validate_component(name, "tool name")?;
    Version::parse(version).map_err(|e| {
        RunnerError::provision(format!("Invalid tool version '{version}': {e}"))
    })?;
    Ok(())
}

/// Keys become path components; reject anything that could escape the root.
fn validate_component(value: &str, what: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0')
    {
        return Err(RunnerError::provision(format!("Invalid {what}: '{value}'")));
    }
    Ok(())
}

fn cache_io(context: &str, path: &Path, err: io::Error) -> RunnerError {
    RunnerError::provision(format!("{context} ({}): {err}", path.display()))
}
