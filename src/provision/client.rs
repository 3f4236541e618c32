//! HTTP download of the tool binary.
//!
//! Timeouts bound every request and payloads are size-limited while streaming.

use reqwest::blocking::{Client, Response};
use std::io::Read;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::{Result, RunnerError};

pub(crate) const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const HTTP_REQUEST_TIMEOUT_SECS: u64 = 120; // connection + transfer

/// Upper bound on the downloaded binary (200MB)
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// Source of tool payloads. Swapped for a fake in tests.
pub trait Fetcher: Send + Sync {
    /// Fetch the whole payload at `url`.
    ///
    /// Any failure, including a non-2xx status or an oversized body, is
    /// `ProvisionFailed`. A cancelled token yields `Cancelled` instead.
    fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>>;
}

/// [`Fetcher`] backed by a blocking reqwest client.
///
/// Requests are bounded by the connect and total timeouts from
/// [`create_http_client`], and bodies larger than `max_bytes` are rejected.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Fetcher with the default 200MB payload limit.
    pub fn new() -> Result<Self> {
        Self::with_limit(DEFAULT_MAX_DOWNLOAD_BYTES)
    }

    pub fn with_limit(max_bytes: u64) -> Result<Self> {
        Ok(Self {
            client: create_http_client()?,
            max_bytes,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        cancel.check()?;
        tracing::debug!(url, "downloading tool");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| RunnerError::provision(format!("Failed to download {url}: {e}")))?;
        validate_response_status(&response, "Tool download failed")?;

        download_with_limit(response, self.max_bytes, "Tool download", cancel)
    }
}

/// Create an HTTP client with connect and total request timeouts.
///
/// Keeps a slow or unresponsive server from hanging the run:
/// - connect_timeout: maximum time to establish a TCP connection
/// - timeout: maximum time for the whole request, transfer included
pub(crate) fn create_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("cst-runner/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RunnerError::provision(format!("Failed to create HTTP client: {e}")))
}

/// Turn a non-2xx status into `ProvisionFailed`, naming the status code and
/// its canonical reason.
pub(crate) fn validate_response_status(response: &Response, context: &str) -> Result<()> {
    if !response.status().is_success() {
        let status = response.status();
        return Err(RunnerError::provision(format!(
            "{}: HTTP {} - {}",
            context,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        )));
    }
    Ok(())
}

/// Read a response body, enforcing `max_size` and honouring cancellation.
///
/// A declared Content-Length over the limit fails before any body is read.
/// Servers can omit or misreport the header, so the limit is enforced again
/// while streaming.
pub(crate) fn download_with_limit(
    response: Response,
    max_size: u64,
    context: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    if let Some(content_length) = response.content_length() {
        if content_length > max_size {
            return Err(RunnerError::provision(format!(
                "{context}: Content-Length {content_length} bytes exceeds maximum allowed size of {max_size} bytes"
            )));
        }
    }

    read_with_limit(response, max_size, context, cancel)
}

/// Read `reader` to the end in 8KB chunks.
///
/// Fails as soon as more than `max_size` bytes arrive. The token is checked
/// before every chunk, so a cancelled download stops within one read.
pub(crate) fn read_with_limit<R: Read>(
    mut reader: R,
    max_size: u64,
    context: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut total_read: u64 = 0;
    let mut buffer = [0u8; 8192];

    loop {
        cancel.check()?;
        let n = reader
            .read(&mut buffer)
            .map_err(|e| RunnerError::provision(format!("{context}: Failed to read response body: {e}")))?;
        if n == 0 {
            break;
        }
        total_read += n as u64;
        if total_read > max_size {
            return Err(RunnerError::provision(format!(
                "{context}: Download size exceeds maximum allowed size of {max_size} bytes"
            )));
        }
        bytes.extend_from_slice(&buffer[..n]);
    }

    Ok(bytes)
}
