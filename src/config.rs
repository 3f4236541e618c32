//! Runner configuration: TOML file plus environment overrides

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::executor::TestExecutor;
use crate::provision::client::DEFAULT_MAX_DOWNLOAD_BYTES;
use crate::provision::{
    DiskToolCache, DownloadTable, HttpFetcher, ToolProvisioner, ToolSource, DEFAULT_TOOL_VERSION,
};

/// Path of the config file when `--config-file` is not given
pub const CONFIG_PATH_ENV: &str = "CST_RUNNER_CONFIG";
pub const CACHE_DIR_ENV: &str = "CST_RUNNER_CACHE_DIR";
pub const TIMEOUT_ENV: &str = "CST_RUNNER_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Tool cache root; defaults to the user cache directory
    pub cache_dir: Option<PathBuf>,
    /// Version key the tool is cached under
    pub tool_version: String,
    /// Kill the tool after this many seconds. Unset means no limit.
    pub timeout_secs: Option<u64>,
    pub max_download_bytes: u64,
    /// Extra or replacement download table entries, keyed by OS type
    pub platforms: BTreeMap<String, ToolSource>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            tool_version: DEFAULT_TOOL_VERSION.to_string(),
            timeout_secs: None,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            platforms: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Load from `path`, else `$CST_RUNNER_CONFIG`, else defaults; then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(dir) = env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = env::var(TIMEOUT_ENV).ok().filter(|v| !v.trim().is_empty()) {
            let secs = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{TIMEOUT_ENV} must be a number of seconds, got '{value}'"))?;
            self.timeout_secs = Some(secs);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        semver::Version::parse(&self.tool_version)
            .with_context(|| format!("tool_version '{}' is not a semver version", self.tool_version))?;
        if self.timeout_secs == Some(0) {
            bail!("timeout_secs must be greater than zero");
        }
        for (os, source) in &self.platforms {
            if source.url.trim().is_empty() {
                bail!("platforms.{os}.url must not be empty");
            }
        }
        Ok(())
    }

    /// Layer a command-line timeout over the loaded one. Zero is rejected the
    /// same way as `timeout_secs = 0` in the file.
    pub fn with_timeout_override(mut self, secs: Option<u64>) -> Result<Self> {
        if let Some(secs) = secs {
            self.timeout_secs = Some(secs);
            self.validate()?;
        }
        Ok(self)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(DiskToolCache::default_root)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Default table with the configured `platforms` layered on top.
    pub fn download_table(&self) -> DownloadTable {
        DownloadTable::default().merged_with(self.platforms.clone())
    }

    pub fn cache(&self) -> DiskToolCache {
        DiskToolCache::new(self.cache_root())
    }

    pub fn build_provisioner(&self) -> Result<ToolProvisioner> {
        let fetcher = HttpFetcher::with_limit(self.max_download_bytes)
            .context("Failed to set up the tool downloader")?;
        Ok(
            ToolProvisioner::new(self.download_table(), Arc::new(self.cache()), Arc::new(fetcher))
                .with_version(self.tool_version.clone()),
        )
    }

    pub fn build_executor(&self) -> TestExecutor {
        TestExecutor::new().with_timeout(self.timeout())
    }
}
