//! Single-request uploads

use super::task::{TaskCore, TransferEvents, TransferOutput};
use super::{Transfer, TransferState};
use crate::client::CosClient;
use crate::error::{ClientErrorCode, CosError, CosResult};
use crate::http::{Method, ProgressCallback, PutObjectConverter, RequestBody, TrafficShape};
use crate::task::TaskSpec;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where upload data comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    File(PathBuf),
    Bytes(Bytes),
}

/// What to upload and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub bucket: String,
    pub key: String,
    pub region: Option<String>,
    pub source: UploadSource,
    pub content_type: Option<String>,
    /// Send a Content-MD5 header
    pub content_md5: bool,
    pub tag: Option<String>,
}

impl UploadRequest {
    pub fn from_file(bucket: impl Into<String>, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(bucket, key, UploadSource::File(path.into()))
    }

    pub fn from_bytes(bucket: impl Into<String>, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(bucket, key, UploadSource::Bytes(data.into()))
    }

    fn new(bucket: impl Into<String>, key: impl Into<String>, source: UploadSource) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            region: None,
            source,
            content_type: None,
            content_md5: true,
            tag: None,
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_md5(mut self, enabled: bool) -> Self {
        self.content_md5 = enabled;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

struct UploadShared {
    client: CosClient,
    request: UploadRequest,
    region: String,
    core: TaskCore,
}

/// An upload sent as one PUT; resuming sends the whole body again
#[derive(Clone)]
pub struct UploadTask {
    shared: Arc<UploadShared>,
}

impl UploadTask {
    pub(crate) fn new(client: CosClient, request: UploadRequest) -> CosResult<(Self, TransferEvents)> {
        crate::config::validate_bucket_name(&request.bucket)?;
        if request.key.is_empty() {
            return Err(CosError::client(
                ClientErrorCode::InvalidArgument,
                "object key cannot be empty",
            ));
        }

        let region = request
            .region
            .clone()
            .unwrap_or_else(|| client.config().region.clone());
        let (core, events) = TaskCore::new(format!("upload {}/{}", request.bucket, request.key));
        let task = Self {
            shared: Arc::new(UploadShared {
                client,
                request,
                region,
                core,
            }),
        };
        Ok((task, events))
    }

    pub fn request(&self) -> &UploadRequest {
        &self.shared.request
    }

    pub fn start(&self) -> bool {
        let Some((generation, token)) = self.shared.core.start() else {
            return false;
        };

        let shared = self.shared.clone();
        self.shared.client.tasks().spawn_detached(async move {
            if let Err(err) = shared.run(generation, &token).await {
                if err.is_cancelled() && !token.is_cancelled() {
                    tracing::debug!(key = %shared.request.key, "request canceled through the task registry");
                    shared.core.cancel_run(generation, || Ok(()));
                } else {
                    shared.core.fail(generation, err);
                }
            }
        });
        true
    }

    pub fn pause(&self) -> bool {
        self.shared.core.pause()
    }

    pub fn resume(&self) -> bool {
        if !self.shared.core.resume() {
            return false;
        }
        self.start();
        true
    }

    pub fn cancel(&self) -> bool {
        self.shared.core.cancel(|| Ok(()))
    }

    pub fn state(&self) -> TransferState {
        self.shared.core.state()
    }

    pub fn last_error(&self) -> Option<CosError> {
        self.shared.core.last_error()
    }
}

impl Transfer for UploadTask {
    fn tag(&self) -> Option<&str> {
        self.shared.request.tag.as_deref()
    }

    fn state(&self) -> TransferState {
        UploadTask::state(self)
    }

    fn pause(&self) -> bool {
        UploadTask::pause(self)
    }

    fn cancel(&self) -> bool {
        UploadTask::cancel(self)
    }
}

impl UploadShared {
    async fn run(self: &Arc<Self>, generation: u64, token: &CancellationToken) -> CosResult<()> {
        let body = match &self.request.source {
            UploadSource::File(path) => RequestBody::from_file(path.clone()).await?,
            UploadSource::Bytes(data) => RequestBody::Bytes(data.clone()),
        };
        let total = body.len();

        let mut builder = self
            .client
            .object_request(Method::Put, &self.request.bucket, &self.region, &self.request.key)?
            .body(body)
            .content_md5(self.request.content_md5 && total > 0)
            .shape(TrafficShape::Upload);
        if let Some(content_type) = &self.request.content_type {
            builder = builder.header("content-type", content_type.clone());
        }
        let put = builder.build();

        let progress: ProgressCallback = {
            let shared = self.clone();
            Arc::new(move |completed, _| shared.core.progress(generation, completed, total))
        };

        let shared = self.clone();
        let pipeline = self.client.pipeline().clone();
        let operation = self.client.tasks().schedule(
            TaskSpec::new(format!("PUT {}", self.request.key), TrafficShape::Upload)
                .tag(self.request.tag.clone())
                .token(token.child_token()),
            move |token| async move {
                if !shared.core.execute(generation) {
                    return Err(CosError::cancelled());
                }
                pipeline
                    .execute(put, &PutObjectConverter, Some(progress), &token)
                    .await
            },
        );
        let output = operation.join().await?;

        self.core.succeed(
            generation,
            TransferOutput {
                bucket: self.request.bucket.clone(),
                key: self.request.key.clone(),
                etag: output.etag,
                local_path: None,
                total_bytes: total,
            },
            || Ok(()),
        );
        Ok(())
    }
}
