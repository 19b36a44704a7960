//! HTTP downloads with retry and streaming SHA-256 verification.
//!
//! The body is hashed while it is written to disk, in one pass, so archives
//! of several gigabytes are never read twice. Transfers go through the
//! [`Transport`] trait; [`HttpTransport`] is the reqwest implementation and
//! tests substitute in-memory transports.

use crate::error::{InstallError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Large archives may legitimately take tens of minutes.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, TransportError>>;

/// A successful response: optional length and the streaming body.
pub struct Response {
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Fetches a URL. Implementations report HTTP error statuses as
/// [`TransportError`]s.
pub trait Transport: Send + Sync {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("honk-install/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                InstallError::Configuration(format!("failed to create HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, std::result::Result<Response, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| TransportError(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError(format!("HTTP {status} from {url}")));
            }

            let content_length = response.content_length();
            let body = response
                .bytes_stream()
                .map_err(|e| TransportError(format!("failed to read response: {e}")))
                .boxed();
            Ok(Response {
                content_length,
                body,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy / Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay after attempt `n` is `backoff_unit * n`.
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            attempts,
            backoff_unit,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Side-channel transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Total size known up front.
    Percent { downloaded: u64, total: u64 },
    /// Unknown size; running byte count.
    Bytes { downloaded: u64 },
}

impl Progress {
    pub fn percent(&self) -> Option<f64> {
        match *self {
            Progress::Percent { downloaded, total } if total > 0 => {
                Some(downloaded as f64 / total as f64 * 100.0)
            }
            _ => None,
        }
    }
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Lowercase hex SHA-256 of the body.
    pub content_hash: String,
    pub byte_count: u64,
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

enum Failure {
    Transport(TransportError),
    Integrity { expected: String, actual: String },
    Io(std::io::Error),
}

#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    progress: Option<ProgressFn>,
}

impl Downloader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            progress: None,
        }
    }

    /// Downloader over a real HTTP client with the default retry policy.
    pub fn http() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new()?)))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Download `url` to `dest`, returning the body hash.
    ///
    /// Fails with [`InstallError::Integrity`] if `expected_sha256` is given
    /// and never matched, or [`InstallError::Network`] once the retry budget
    /// is spent. No file is left at `dest` on failure.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<DownloadResult> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut last = None;
        for attempt in 1..=self.policy.attempts {
            let failure = match self.fetch_to_file(url, dest).await {
                Ok(result) => match expected_sha256 {
                    Some(expected) if !expected.eq_ignore_ascii_case(&result.content_hash) => {
                        Failure::Integrity {
                            expected: expected.to_ascii_lowercase(),
                            actual: result.content_hash,
                        }
                    }
                    _ => return Ok(result),
                },
                Err(Failure::Io(e)) => {
                    crate::io::remove_file_if_exists(dest)?;
                    return Err(e.into());
                }
                Err(failure) => failure,
            };

            crate::io::remove_file_if_exists(dest)?;
            self.backoff(url, attempt, &failure).await;
            last = Some(failure);
        }

        Err(self.exhausted(url, last))
    }

    /// Fetch a small text payload with the same retry policy, no hashing.
    pub async fn download_string(&self, url: &str) -> Result<String> {
        let mut last = None;
        for attempt in 1..=self.policy.attempts {
            let failure = match self.fetch_to_memory(url).await {
                Ok(bytes) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Err(failure) => failure,
            };
            self.backoff(url, attempt, &failure).await;
            last = Some(failure);
        }
        Err(self.exhausted(url, last))
    }

    async fn backoff(&self, url: &str, attempt: u32, failure: &Failure) {
        if attempt >= self.policy.attempts {
            return;
        }
        let delay = self.policy.delay_after(attempt);
        tracing::warn!(
            url,
            attempt,
            "attempt {attempt} failed: {}; retrying in {}s",
            describe(failure),
            delay.as_secs_f32()
        );
        tokio::time::sleep(delay).await;
    }

    fn exhausted(&self, url: &str, last: Option<Failure>) -> InstallError {
        match last {
            Some(Failure::Integrity { expected, actual }) => InstallError::Integrity {
                url: url.to_string(),
                expected,
                actual,
            },
            Some(Failure::Io(e)) => InstallError::Io(e),
            Some(Failure::Transport(e)) => InstallError::Network {
                url: url.to_string(),
                attempts: self.policy.attempts,
                message: e.0,
            },
            None => InstallError::Network {
                url: url.to_string(),
                attempts: 0,
                message: "retry policy allows no attempts".into(),
            },
        }
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        dest: &Path,
    ) -> std::result::Result<DownloadResult, Failure> {
        let Response {
            content_length,
            mut body,
        } = self.transport.get(url).await.map_err(Failure::Transport)?;

        let mut file = tokio::fs::File::create(dest).await.map_err(Failure::Io)?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(Failure::Transport)?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(Failure::Io)?;
            downloaded += chunk.len() as u64;
            self.report(downloaded, content_length);
        }
        file.flush().await.map_err(Failure::Io)?;

        if let Some(total) = content_length {
            if downloaded < total {
                return Err(Failure::Transport(TransportError(format!(
                    "connection closed after {downloaded} of {total} bytes"
                ))));
            }
        }

        Ok(DownloadResult {
            content_hash: format!("{:x}", hasher.finalize()),
            byte_count: downloaded,
        })
    }

    async fn fetch_to_memory(&self, url: &str) -> std::result::Result<Vec<u8>, Failure> {
        let Response { mut body, .. } = self.transport.get(url).await.map_err(Failure::Transport)?;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(Failure::Transport)?);
        }
        Ok(buf)
    }

    fn report(&self, downloaded: u64, total: Option<u64>) {
        let Some(progress) = &self.progress else {
            return;
        };
        match total {
            Some(total) => progress(Progress::Percent { downloaded, total }),
            None => progress(Progress::Bytes { downloaded }),
        }
    }
}

fn describe(failure: &Failure) -> String {
    match failure {
        Failure::Transport(e) => e.0.clone(),
        Failure::Integrity { expected, actual } => {
            format!("SHA256 mismatch: expected {expected}, got {actual}")
        }
        Failure::Io(e) => e.to_string(),
    }
}

/// First whitespace-separated token of a published checksum file
/// (`<hex>` or `<hex>  <filename>`).
pub fn parse_checksum(text: &str) -> Option<String> {
    let token = text.split_whitespace().next()?.to_ascii_lowercase();
    crate::manifest::is_valid_hash(&token)
        .then_some(token)
        .filter(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
