//! Shared test helpers: fake fetchers and fake tool scripts

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cst_runner::error::Result;
use cst_runner::provision::{
    DiskToolCache, DownloadTable, Fetcher, ToolCache, ToolProvisioner, DEFAULT_TOOL_VERSION,
    TOOL_NAME,
};
use cst_runner::CancellationToken;

/// Fetcher that serves a fixed payload and counts requests.
pub struct ScriptFetcher {
    payload: Vec<u8>,
    calls: AtomicUsize,
}

impl ScriptFetcher {
    pub fn new(script_body: &str) -> Self {
        Self {
            payload: script(script_body).into_bytes(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptFetcher {
    fn fetch(&self, _url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payload.clone())
    }
}

pub fn script(body: &str) -> String {
    format!("#!/bin/sh\n{body}\n")
}

/// Script body that prints a summary with the given counts.
pub fn summary_body(total: u64, pass: u64, fail: u64) -> String {
    format!(r#"echo '{{"Total":{total},"Pass":{pass},"Fail":{fail},"Results":[]}}'"#)
}

pub fn provisioner(cache_root: &Path, fetcher: Arc<ScriptFetcher>) -> Arc<ToolProvisioner> {
    Arc::new(ToolProvisioner::new(
        DownloadTable::default(),
        Arc::new(DiskToolCache::new(cache_root)),
        fetcher,
    ))
}

/// Put a fake tool into a disk cache as if it had been downloaded.
pub fn seed_cache(cache_root: &Path, script_body: &str) -> PathBuf {
    let staging = tempfile::NamedTempFile::new().expect("Failed to create staging file");
    fs::write(staging.path(), script(script_body)).expect("Failed to write fake tool");
    DiskToolCache::new(cache_root)
        .store(staging.path(), TOOL_NAME, TOOL_NAME, DEFAULT_TOOL_VERSION)
        .expect("Failed to seed cache")
}
