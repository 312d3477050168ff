use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, HeaderMap};
use tokio::io::AsyncWriteExt as _;
use url::Url;

use crate::sanitize::filename_from_content_disposition;
use crate::session::Session;

/// Every request is tried this many times before the error is returned.
pub const MAX_ATTEMPTS: usize = 3;

/// Write buffer for streamed bodies.
pub const CHUNK_SIZE: usize = 512 * 1024;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} returned {status}")]
    Status { url: Url, status: StatusCode },
    #[error("GET {url} timed out after {timeout:?}")]
    Timeout { url: Url, timeout: Duration },
}

impl FetchError {
    /// Status code of a failed request, looking through added context.
    pub fn status_of(err: &anyhow::Error) -> Option<StatusCode> {
        match err.downcast_ref::<FetchError>()? {
            FetchError::Status { status, .. } => Some(*status),
            FetchError::Timeout { .. } => None,
        }
    }
}

/// Retrieves URLs over an authenticated [`Session`] with a bounded timeout and
/// silent retries.
#[derive(Debug, Clone)]
pub struct Fetcher {
    session: Session,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(session: Session, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// Sends the request and returns once the headers are in; the body is
    /// left on the wire for [`FetchedResponse::write_to`].
    pub async fn fetch(&self, url: &Url) -> anyhow::Result<FetchedResponse> {
        for attempt in 1..MAX_ATTEMPTS {
            match self.send_once(url).await {
                Ok(response) => return Ok(self.wrap(response)),
                Err(err) => tracing::debug!(%url, attempt, ?err, "fetch failed; retrying"),
            }
        }
        let response = self
            .send_once(url)
            .await
            .with_context(|| format!("fetch {url} ({MAX_ATTEMPTS} attempts)"))?;
        Ok(self.wrap(response))
    }

    pub async fn fetch_bytes(&self, url: &Url) -> anyhow::Result<Vec<u8>> {
        for attempt in 1..MAX_ATTEMPTS {
            match self.read_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => tracing::debug!(%url, attempt, ?err, "fetch failed; retrying"),
            }
        }
        self.read_once(url)
            .await
            .with_context(|| format!("fetch {url} ({MAX_ATTEMPTS} attempts)"))
    }

    pub async fn fetch_text(&self, url: &Url) -> anyhow::Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn fetch_json(&self, url: &Url) -> anyhow::Result<serde_json::Value> {
        let bytes = self.fetch_bytes(url).await?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse json from {url}"))
    }

    async fn send_once(&self, url: &Url) -> anyhow::Result<reqwest::Response> {
        let request = self.session.client().get(url.clone()).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.clone(),
                timeout: self.timeout,
            })?
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            }
            .into());
        }
        Ok(response)
    }

    async fn read_once(&self, url: &Url) -> anyhow::Result<Vec<u8>> {
        let response = self.send_once(url).await?;
        let bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.clone(),
                timeout: self.timeout,
            })?
            .with_context(|| format!("read body: {url}"))?;
        Ok(bytes.to_vec())
    }

    fn wrap(&self, response: reqwest::Response) -> FetchedResponse {
        FetchedResponse {
            response,
            read_timeout: self.timeout,
        }
    }
}

#[derive(Debug)]
pub struct FetchedResponse {
    response: reqwest::Response,
    read_timeout: Duration,
}

impl FetchedResponse {
    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// The declared `Content-Length`, which is not always trustworthy.
    pub fn content_length(&self) -> Option<u64> {
        self.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    /// Sanitized attachment name from `Content-Disposition`, if any.
    pub fn header_filename(&self) -> Option<String> {
        self.headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
    }

    /// Streams the body into `path`, replacing whatever was there, and
    /// returns the number of bytes written.
    pub async fn write_to(mut self, path: &Path) -> anyhow::Result<u64> {
        let url = self.response.url().clone();
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("create file: {}", path.display()))?;
        let mut writer = tokio::io::BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut progress = TransferProgress::new(self.content_length());

        loop {
            let chunk = tokio::time::timeout(self.read_timeout, self.response.chunk())
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.clone(),
                    timeout: self.read_timeout,
                })?
                .with_context(|| format!("read body: {url}"))?;
            let Some(chunk) = chunk else {
                break;
            };

            writer
                .write_all(&chunk)
                .await
                .with_context(|| format!("write file: {}", path.display()))?;

            if progress.record(chunk.len() as u64) {
                tracing::debug!(
                    file = %path.display(),
                    percent = ?progress.percent(),
                    rate = %format_rate(progress.bytes_per_sec()),
                    "transfer progress"
                );
            }
        }

        writer
            .flush()
            .await
            .with_context(|| format!("flush file: {}", path.display()))?;
        Ok(progress.transferred())
    }
}

/// Progress of one body transfer. An absent or wrong declared length only
/// makes the percentage indeterminate.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    declared: Option<u64>,
    transferred: u64,
    started: Instant,
    last_report: Instant,
}

impl TransferProgress {
    pub fn new(declared: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            declared: declared.filter(|len| *len > 0),
            transferred: 0,
            started: now,
            last_report: now,
        }
    }

    /// Adds `bytes` and reports whether a progress line is due.
    pub fn record(&mut self, bytes: u64) -> bool {
        self.transferred = self.transferred.saturating_add(bytes);
        let now = Instant::now();
        if now.duration_since(self.last_report) >= PROGRESS_INTERVAL {
            self.last_report = now;
            return true;
        }
        false
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn percent(&self) -> Option<u8> {
        let declared = self.declared?;
        let percent = self.transferred.saturating_mul(100) / declared;
        Some(percent.min(100) as u8)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0.0;
        }
        self.transferred as f64 / elapsed
    }
}

pub fn format_rate(bytes_per_sec: f64) -> String {
    if bytes_per_sec < 1024.0 {
        format!("{bytes_per_sec:.1} B/s")
    } else if bytes_per_sec < 1024.0 * 1024.0 {
        format!("{:.1} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / (1024.0 * 1024.0))
    }
}
