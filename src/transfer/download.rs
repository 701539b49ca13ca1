//! Resumable downloads
//!
//! Every run probes the object, fingerprints the transfer with the current
//! ETag and consults the checkpoint store:
//!
//! - no usable checkpoint: write one, truncate the local file to the file
//!   offset and fetch the whole requested range
//! - local file already holds the whole range: complete without a GET
//! - local file holds a prefix: fetch the rest, with progress biased by the
//!   bytes already on disk
//!
//! The GET carries `If-Match` with the probed ETag. A `412` or a changed
//! ETag on the response drops the checkpoint so the next run starts over.

use super::task::{TaskCore, TransferEvents, TransferOutput};
use super::{Transfer, TransferState};
use crate::checkpoint::{fingerprint, CheckpointStore, FingerprintInput};
use crate::client::CosClient;
use crate::error::{ClientErrorCode, CosError, CosResult};
use crate::http::{
    header, ByteRange, FileSinkConverter, Method, ObjectMetaConverter, ProgressCallback,
    TrafficShape,
};
use crate::task::TaskSpec;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to download and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub bucket: String,
    pub key: String,
    /// Overrides the client's default region
    pub region: Option<String>,
    pub local_path: PathBuf,
    pub range_start: u64,
    /// Inclusive; `None` reads to the end of the object
    pub range_end: Option<u64>,
    /// Where in the local file byte `range_start` lands
    pub file_offset: u64,
    pub tag: Option<String>,
}

impl DownloadRequest {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            region: None,
            local_path: local_path.into(),
            range_start: 0,
            range_end: None,
            file_offset: 0,
            tag: None,
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn range(mut self, start: u64, end: Option<u64>) -> Self {
        self.range_start = start;
        self.range_end = end;
        self
    }

    pub fn file_offset(mut self, offset: u64) -> Self {
        self.file_offset = offset;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Bytes of the object the request covers
///
/// The end is clamped to the last byte of the object. A start past the end of
/// a non-empty object is rejected.
pub fn requested_range_length(
    object_size: u64,
    range_start: u64,
    range_end: Option<u64>,
) -> CosResult<u64> {
    if object_size == 0 {
        return if range_start == 0 {
            Ok(0)
        } else {
            Err(range_error(range_start, object_size))
        };
    }

    let last = range_end.map_or(object_size - 1, |end| end.min(object_size - 1));
    if range_start > last {
        return Err(range_error(range_start, object_size));
    }
    Ok(last - range_start + 1)
}

fn range_error(start: u64, size: u64) -> CosError {
    CosError::client(
        ClientErrorCode::InvalidArgument,
        format!("range start {} is outside an object of {} bytes", start, size),
    )
}

/// How a run proceeds once the checkpoint has been consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// Discard local state and fetch the whole range
    Fresh,
    /// The local file already holds the whole range
    Complete,
    /// `written` bytes of the range are on disk
    Resume { written: u64 },
}

/// Decide from the checkpoint and local file length
///
/// The file is complete when its length equals `file_offset + range_length`.
/// A file shorter than `file_offset` or longer than complete is stale.
pub fn plan_resume(
    has_checkpoint: bool,
    local_length: Option<u64>,
    file_offset: u64,
    range_length: u64,
) -> ResumeAction {
    let expected = file_offset + range_length;
    match (has_checkpoint, local_length) {
        (true, Some(len)) if len == expected => ResumeAction::Complete,
        (true, Some(len)) if len >= file_offset && len < expected => ResumeAction::Resume {
            written: len - file_offset,
        },
        _ => ResumeAction::Fresh,
    }
}

struct DownloadShared {
    client: CosClient,
    store: Arc<dyn CheckpointStore>,
    request: DownloadRequest,
    region: String,
    local_path: PathBuf,
    core: TaskCore,
    /// Fingerprint of the latest run, once known
    fingerprint: Mutex<Option<String>>,
}

/// A resumable, cancelable download
///
/// Cheap to clone; clones control the same transfer.
#[derive(Clone)]
pub struct DownloadTask {
    shared: Arc<DownloadShared>,
}

impl DownloadTask {
    pub(crate) fn new(
        client: CosClient,
        store: Arc<dyn CheckpointStore>,
        request: DownloadRequest,
    ) -> CosResult<(Self, TransferEvents)> {
        crate::config::validate_bucket_name(&request.bucket)?;
        if request.key.is_empty() {
            return Err(CosError::client(
                ClientErrorCode::InvalidArgument,
                "object key cannot be empty",
            ));
        }
        if let Some(end) = request.range_end {
            if end < request.range_start {
                return Err(CosError::client(
                    ClientErrorCode::InvalidArgument,
                    format!("range end {} precedes start {}", end, request.range_start),
                ));
            }
        }

        let local_path = absolute(&request.local_path)?;
        let region = request
            .region
            .clone()
            .unwrap_or_else(|| client.config().region.clone());
        let (core, events) = TaskCore::new(format!("download {}/{}", request.bucket, request.key));

        let task = Self {
            shared: Arc::new(DownloadShared {
                client,
                store,
                request,
                region,
                local_path,
                core,
                fingerprint: Mutex::new(None),
            }),
        };
        Ok((task, events))
    }

    pub fn request(&self) -> &DownloadRequest {
        &self.shared.request
    }

    /// Absolute local path the download writes to
    pub fn local_path(&self) -> &Path {
        &self.shared.local_path
    }

    /// Start the transfer; false if it has already been started
    pub fn start(&self) -> bool {
        let Some((generation, token)) = self.shared.core.start() else {
            return false;
        };

        let shared = self.shared.clone();
        self.shared.client.tasks().spawn_detached(async move {
            if let Err(err) = shared.run(generation, &token).await {
                if err.is_cancelled() && !token.is_cancelled() {
                    debug!(key = %shared.request.key, "request canceled through the task registry");
                    shared.core.cancel_run(generation, || shared.forget_checkpoint());
                } else {
                    shared.core.fail(generation, err);
                }
            }
        });
        true
    }

    /// Stop the in-flight request, keeping the checkpoint for a later resume
    pub fn pause(&self) -> bool {
        self.shared.core.pause()
    }

    /// Continue a paused or failed transfer from where the local file ends
    pub fn resume(&self) -> bool {
        if !self.shared.core.resume() {
            return false;
        }
        self.start();
        true
    }

    /// Stop for good and forget the checkpoint; the partial file is left in place
    pub fn cancel(&self) -> bool {
        let shared = &self.shared;
        shared.core.cancel(|| shared.forget_checkpoint())
    }

    pub fn state(&self) -> TransferState {
        self.shared.core.state()
    }

    pub fn last_error(&self) -> Option<CosError> {
        self.shared.core.last_error()
    }
}

impl Transfer for DownloadTask {
    fn tag(&self) -> Option<&str> {
        self.shared.request.tag.as_deref()
    }

    fn state(&self) -> TransferState {
        DownloadTask::state(self)
    }

    fn pause(&self) -> bool {
        DownloadTask::pause(self)
    }

    fn cancel(&self) -> bool {
        DownloadTask::cancel(self)
    }
}

impl DownloadShared {
    fn fingerprint_for(&self, etag: &str) -> String {
        let local_dir = self
            .local_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let local_file_name = self
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        fingerprint(&FingerprintInput {
            kind: "download",
            region: &self.region,
            bucket: &self.request.bucket,
            key: &self.request.key,
            range_start: self.request.range_start,
            range_end: self.request.range_end,
            file_offset: self.request.file_offset,
            local_dir: &local_dir,
            local_file_name: &local_file_name,
            etag,
        })
    }

    fn forget_checkpoint(&self) -> CosResult<()> {
        match self.fingerprint.lock().clone() {
            Some(fp) => self.store.remove(&fp),
            None => Ok(()),
        }
    }

    /// The object no longer matches the fingerprint; start over next run
    fn drop_stale_checkpoint(&self, fp: &str) {
        if let Err(e) = self.store.remove(fp) {
            warn!(key = %self.request.key, error = %e, "failed to drop stale checkpoint");
        }
    }

    fn checkpoint_length(&self, fp: &str) -> CosResult<(bool, Option<u64>)> {
        match self.store.get(fp)? {
            Some(path) => Ok((true, std::fs::metadata(&path).ok().map(|m| m.len()))),
            None => Ok((false, None)),
        }
    }

    /// Record the checkpoint and reset the local file, unless the run was stopped
    fn begin_fresh(&self, generation: u64, fp: &str) -> CosResult<()> {
        let outcome = self.core.guarded(generation, || -> CosResult<()> {
            self.store.put(fp, &self.local_path)?;
            if let Some(parent) = self.local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&self.local_path)?;
            file.set_len(self.request.file_offset)?;
            file.sync_all()?;
            Ok(())
        });
        outcome.unwrap_or_else(|| Err(CosError::cancelled()))
    }

    fn output(&self, etag: &str, total_bytes: u64) -> TransferOutput {
        TransferOutput {
            bucket: self.request.bucket.clone(),
            key: self.request.key.clone(),
            etag: Some(etag.to_string()),
            local_path: Some(self.local_path.clone()),
            total_bytes,
        }
    }

    async fn run(self: &Arc<Self>, generation: u64, token: &CancellationToken) -> CosResult<()> {
        let client = &self.client;

        let head = client
            .object_request(Method::Head, &self.request.bucket, &self.region, &self.request.key)?
            .build();
        let probe = {
            let shared = self.clone();
            let pipeline = client.pipeline().clone();
            client.tasks().schedule(
                TaskSpec::new(format!("HEAD {}", self.request.key), TrafficShape::Command)
                    .tag(self.request.tag.clone())
                    .token(token.child_token()),
                move |token| async move {
                    if !shared.core.execute(generation) {
                        return Err(CosError::cancelled());
                    }
                    pipeline.execute(head, &ObjectMetaConverter, None, &token).await
                },
            )
        };
        let meta = probe.join().await?;

        let range_length = requested_range_length(
            meta.content_length,
            self.request.range_start,
            self.request.range_end,
        )?;
        let fp = self.fingerprint_for(&meta.etag);
        *self.fingerprint.lock() = Some(fp.clone());

        let (has_checkpoint, local_length) = self.checkpoint_length(&fp)?;
        let action = plan_resume(has_checkpoint, local_length, self.request.file_offset, range_length);
        debug!(
            key = %self.request.key,
            etag = %meta.etag,
            size = meta.content_length,
            range_length,
            ?action,
            "resume plan"
        );

        let written = match action {
            ResumeAction::Complete => {
                info!(path = %self.local_path.display(), "local file already complete");
                self.core
                    .succeed(generation, self.output(&meta.etag, range_length), || {
                        self.store.remove(&fp)
                    });
                return Ok(());
            }
            ResumeAction::Fresh => {
                self.begin_fresh(generation, &fp)?;
                0
            }
            ResumeAction::Resume { written } => {
                info!(path = %self.local_path.display(), written, range_length, "resuming download");
                written
            }
        };

        self.core.progress(generation, written, range_length);

        if written < range_length {
            let last = self.request.range_start + range_length - 1;
            let end = (self.request.range_end.is_some() || written > 0).then_some(last);
            let range = ByteRange::new(self.request.range_start + written, end);
            let get = client
                .object_request(Method::Get, &self.request.bucket, &self.region, &self.request.key)?
                .range(range)
                .header(header::IF_MATCH, format!("\"{}\"", meta.etag))
                .shape(TrafficShape::Download)
                .build();

            let mut sink = FileSinkConverter::new(self.local_path.clone(), self.request.file_offset + written)
                .expected_length(range_length - written);
            if range.is_partial() {
                sink = sink.range_start(range.start);
            }

            let progress: ProgressCallback = {
                let shared = self.clone();
                Arc::new(move |completed, _| {
                    shared
                        .core
                        .progress(generation, written + completed, range_length)
                })
            };

            let pipeline = client.pipeline().clone();
            let fetch = client.tasks().schedule(
                TaskSpec::new(format!("GET {}", self.request.key), TrafficShape::Download)
                    .tag(self.request.tag.clone())
                    .token(token.child_token()),
                move |token| async move {
                    pipeline.execute(get, &sink, Some(progress), &token).await
                },
            );
            let fetched = match fetch.join().await {
                Ok(fetched) => fetched,
                Err(err) => {
                    if err.as_service().is_some_and(|s| s.status_code == 412) {
                        info!(key = %self.request.key, etag = %meta.etag, "object changed since HEAD");
                        self.drop_stale_checkpoint(&fp);
                    }
                    return Err(err);
                }
            };
            if let Some(etag) = fetched.etag.filter(|etag| *etag != meta.etag) {
                self.drop_stale_checkpoint(&fp);
                return Err(CosError::client(
                    ClientErrorCode::ServerError,
                    format!("object changed during download: ETag {} became {}", meta.etag, etag),
                ));
            }
        }

        self.core
            .succeed(generation, self.output(&meta.etag, range_length), || {
                self.store.remove(&fp)
            });
        Ok(())
    }
}

fn absolute(path: &Path) -> CosResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(CosError::client(
            ClientErrorCode::InvalidArgument,
            "local path cannot be empty",
        ));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_length() {
        assert_eq!(requested_range_length(10_000_000, 0, None).unwrap(), 10_000_000);
        assert_eq!(requested_range_length(100, 10, Some(19)).unwrap(), 10);
        assert_eq!(requested_range_length(100, 90, Some(500)).unwrap(), 10);
        assert_eq!(requested_range_length(0, 0, None).unwrap(), 0);
        assert!(requested_range_length(100, 100, None).is_err());
        assert!(requested_range_length(0, 1, None).is_err());
    }

    #[test]
    fn test_plan_without_checkpoint_is_fresh() {
        assert_eq!(plan_resume(false, Some(50), 0, 100), ResumeAction::Fresh);
        assert_eq!(plan_resume(true, None, 0, 100), ResumeAction::Fresh);
    }

    #[test]
    fn test_plan_resume_from_partial_file() {
        assert_eq!(
            plan_resume(true, Some(4_000_000), 0, 10_000_000),
            ResumeAction::Resume { written: 4_000_000 }
        );
    }

    #[test]
    fn test_plan_complete_counts_file_offset() {
        // range [100, 199] written into the file at offset 1000
        assert_eq!(plan_resume(true, Some(1100), 1000, 100), ResumeAction::Complete);
        assert_eq!(
            plan_resume(true, Some(1040), 1000, 100),
            ResumeAction::Resume { written: 40 }
        );
        // whole-object length would be wrong for a sub-range
        assert_eq!(plan_resume(true, Some(100), 0, 50), ResumeAction::Fresh);
    }

    #[test]
    fn test_plan_stale_files_start_fresh() {
        assert_eq!(plan_resume(true, Some(500), 1000, 100), ResumeAction::Fresh);
        assert_eq!(plan_resume(true, Some(1200), 1000, 100), ResumeAction::Fresh);
    }

    #[test]
    fn test_plan_offset_only_file_resumes_at_zero() {
        assert_eq!(
            plan_resume(true, Some(1000), 1000, 100),
            ResumeAction::Resume { written: 0 }
        );
    }
}
