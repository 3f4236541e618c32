//! OS type to download URL mapping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DARWIN_URL: &str = "https://storage.googleapis.com/container-structure-test/latest/container-structure-test-darwin-amd64";
const LINUX_URL: &str = "https://storage.googleapis.com/container-structure-test/latest/container-structure-test-linux-amd64";

/// Where to fetch the tool for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSource {
    pub url: String,
    /// Expected hex SHA-256 of the payload. Unset means no verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ToolSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// Immutable lookup from lowercase OS type to [`ToolSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTable {
    entries: BTreeMap<String, ToolSource>,
}

impl Default for DownloadTable {
    fn default() -> Self {
        Self::from_entries([
            ("darwin".to_string(), ToolSource::new(DARWIN_URL)),
            ("linux".to_string(), ToolSource::new(LINUX_URL)),
        ])
    }
}

impl DownloadTable {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, ToolSource)>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(os, source)| (normalize_os_type(&os), source))
                .collect(),
        }
    }

    /// Table with `overrides` layered on top, replacing entries with the same key.
    pub fn merged_with<I>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, ToolSource)>,
    {
        let mut entries = self.entries.clone();
        for (os, source) in overrides {
            entries.insert(normalize_os_type(&os), source);
        }
        Self { entries }
    }

    /// Case-insensitive lookup.
    pub fn resolve(&self, os_type: &str) -> Option<&ToolSource> {
        self.entries.get(&normalize_os_type(os_type))
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

pub fn normalize_os_type(os_type: &str) -> String {
    os_type.trim().to_lowercase()
}

/// OS type of the running host, spelled the way the download table keys it.
pub fn current_os_type() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}
