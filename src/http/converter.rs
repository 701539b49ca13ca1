//! Typed conversion of successful responses

use super::{header, Headers, ProgressCallback, RawResponse};
use crate::error::{ClientErrorCode, CosError, CosResult, TransportErrorKind};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Turns a 2xx response into a typed value
///
/// `progress` receives `(completed, total)` relative to this response body.
#[async_trait]
pub trait ResponseConverter: Send + Sync {
    type Output: Send + 'static;

    async fn convert(
        &self,
        response: RawResponse,
        progress: Option<ProgressCallback>,
    ) -> CosResult<Self::Output>;
}

/// Metadata surfaced by a HEAD probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Entity tag, surrounding quotes removed
    pub etag: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub headers: Headers,
}

/// Reads [`ObjectMeta`] from response headers; the body is ignored
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectMetaConverter;

#[async_trait]
impl ResponseConverter for ObjectMetaConverter {
    type Output = ObjectMeta;

    async fn convert(
        &self,
        response: RawResponse,
        _progress: Option<ProgressCallback>,
    ) -> CosResult<ObjectMeta> {
        let headers = response.headers;

        let etag = headers.get(header::ETAG).map(trim_etag).ok_or_else(|| {
            CosError::client(ClientErrorCode::ServerError, "response has no ETag header")
        })?;
        let content_length = headers.get_u64(header::CONTENT_LENGTH).ok_or_else(|| {
            CosError::client(
                ClientErrorCode::ServerError,
                "response has no usable Content-Length header",
            )
        })?;

        Ok(ObjectMeta {
            etag,
            content_length,
            content_type: headers.get(header::CONTENT_TYPE).map(str::to_string),
            last_modified: headers
                .get(header::LAST_MODIFIED)
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            headers,
        })
    }
}

fn trim_etag(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

/// Result of streaming a response body into a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    /// Bytes written by this response
    pub bytes_written: u64,
    pub etag: Option<String>,
}

/// Streams the body into `path` starting at byte `offset`
///
/// The file is created if missing and never truncated, so data before
/// `offset` is preserved.
#[derive(Debug, Clone)]
pub struct FileSinkConverter {
    pub path: PathBuf,
    pub offset: u64,
    /// Length the body must have; falls back to `Content-Length`
    pub expected_length: Option<u64>,
    /// Object offset a ranged request asked for
    pub range_start: Option<u64>,
}

impl FileSinkConverter {
    pub fn new(path: PathBuf, offset: u64) -> Self {
        Self {
            path,
            offset,
            expected_length: None,
            range_start: None,
        }
    }

    pub fn expected_length(mut self, length: u64) -> Self {
        self.expected_length = Some(length);
        self
    }

    /// Require a `206` whose `Content-Range` begins at `start`
    pub fn range_start(mut self, start: u64) -> Self {
        self.range_start = Some(start);
        self
    }

    fn check_partial(&self, response: &RawResponse) -> CosResult<()> {
        let Some(start) = self.range_start else {
            return Ok(());
        };
        let served = response
            .headers
            .get(header::CONTENT_RANGE)
            .and_then(content_range_start);
        if response.status == 206 && served == Some(start) {
            return Ok(());
        }
        Err(CosError::client(
            ClientErrorCode::ServerError,
            format!(
                "asked for bytes from {} but got HTTP {} with content-range {:?}",
                start,
                response.status,
                response.headers.get(header::CONTENT_RANGE)
            ),
        ))
    }
}

/// First byte of a `bytes <first>-<last>/<size>` value
fn content_range_start(value: &str) -> Option<u64> {
    let span = value.trim().strip_prefix("bytes")?.trim_start();
    let (first, _) = span.split_once('-')?;
    first.trim().parse().ok()
}

#[async_trait]
impl ResponseConverter for FileSinkConverter {
    type Output = DownloadedFile;

    async fn convert(
        &self,
        response: RawResponse,
        progress: Option<ProgressCallback>,
    ) -> CosResult<DownloadedFile> {
        let total = self
            .expected_length
            .or_else(|| response.content_length())
            .unwrap_or(0);
        let etag = response.headers.get(header::ETAG).map(trim_etag);
        self.check_partial(&response)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(sink_failure)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await
            .map_err(sink_failure)?;
        file.seek(std::io::SeekFrom::Start(self.offset))
            .await
            .map_err(sink_failure)?;

        let mut written = 0u64;
        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                CosError::transport(
                    TransportErrorKind::Io,
                    format!("response body interrupted: {}", e),
                )
            })?;
            if let Some(limit) = self.expected_length {
                if written + chunk.len() as u64 > limit {
                    file.flush().await.map_err(sink_failure)?;
                    return Err(CosError::client(
                        ClientErrorCode::ServerError,
                        format!("response body runs past the {} bytes requested", limit),
                    ));
                }
            }
            file.write_all(&chunk).await.map_err(sink_failure)?;
            written += chunk.len() as u64;
            if let Some(progress) = &progress {
                progress(written, total.max(written));
            }
        }

        file.flush().await.map_err(sink_failure)?;
        file.sync_data().await.map_err(sink_failure)?;

        if total > 0 && written < total {
            return Err(CosError::transport(
                TransportErrorKind::Io,
                format!("response body ended after {} of {} bytes", written, total),
            ));
        }

        tracing::trace!(path = %self.path.display(), offset = self.offset, written, "body written");

        Ok(DownloadedFile {
            path: self.path.clone(),
            bytes_written: written,
            etag,
        })
    }
}

fn sink_failure(err: std::io::Error) -> CosError {
    CosError::client(
        ClientErrorCode::IoError,
        format!("failed to write download: {}", err),
    )
}

/// Result of a PUT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutObjectConverter;

#[async_trait]
impl ResponseConverter for PutObjectConverter {
    type Output = PutObjectOutput;

    async fn convert(
        &self,
        response: RawResponse,
        _progress: Option<ProgressCallback>,
    ) -> CosResult<PutObjectOutput> {
        Ok(PutObjectOutput {
            etag: response.headers.get(header::ETAG).map(trim_etag),
        })
    }
}

/// Collects a small body into memory
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesConverter;

#[async_trait]
impl ResponseConverter for BytesConverter {
    type Output = Bytes;

    async fn convert(
        &self,
        response: RawResponse,
        _progress: Option<ProgressCallback>,
    ) -> CosResult<Bytes> {
        collect_body(response).await
    }
}

/// Read a whole response body
pub(crate) async fn collect_body(response: RawResponse) -> CosResult<Bytes> {
    let mut buffer = BytesMut::new();
    let mut body = response.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| CosError::transport(TransportErrorKind::Io, e.to_string()))?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}
