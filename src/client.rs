//! Client facade
//!
//! [`CosClient`] is constructed explicitly with its transport, credential
//! provider and signer; there is no process-wide instance. Clones share the
//! pipeline and worker pools.

use crate::auth::{CredentialProvider, CredentialScope, Signer};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::config::{validate_bucket_name, ClientConfig};
use crate::error::CosResult;
use crate::http::{
    BytesConverter, HttpPipeline, HttpRequest, HttpRequestBuilder, HttpTransport, Method,
    ObjectMeta, ObjectMetaConverter, ProgressCallback, PutObjectConverter, PutObjectOutput,
    RequestBody, ResponseConverter,
};
use crate::task::{ScheduledTask, TaskManager, TaskSpec};
use crate::transfer::{
    DownloadRequest, DownloadTask, Transfer, TransferEvents, UploadRequest, UploadTask,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

struct ClientInner {
    config: ClientConfig,
    pipeline: HttpPipeline,
    tasks: TaskManager,
}

/// Signed access to one object-storage account
#[derive(Clone)]
pub struct CosClient {
    inner: Arc<ClientInner>,
}

impl CosClient {
    /// Build a client; must be called from within a Tokio runtime
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        provider: Arc<dyn CredentialProvider>,
        signer: Arc<dyn Signer>,
    ) -> CosResult<Self> {
        config.validate()?;
        let pipeline = HttpPipeline::new(transport)
            .with_signing(provider, signer)
            .with_md5_stream_threshold(config.md5_stream_threshold);
        let tasks = TaskManager::new(config.pools)?;

        info!(
            region = %config.region,
            upload_workers = config.pools.upload,
            download_workers = config.pools.download,
            command_workers = config.pools.command,
            "client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                pipeline,
                tasks,
            }),
        })
    }

    /// Client over the `reqwest` transport with key-time signing
    #[cfg(feature = "reqwest-transport")]
    pub fn with_reqwest(
        config: ClientConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> CosResult<Self> {
        let transport = Arc::new(crate::http::ReqwestTransport::new(&config)?);
        let signer = Arc::new(crate::auth::KeyTimeSigner::new(config.sign_duration()));
        Self::new(config, transport, provider, signer)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &HttpPipeline {
        &self.inner.pipeline
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.inner.tasks
    }

    /// Request builder addressing `key` in `bucket`
    ///
    /// Declares a credential scope for the matching `name/cos:<Action>`.
    pub fn object_request(
        &self,
        method: Method,
        bucket: &str,
        region: &str,
        key: &str,
    ) -> CosResult<HttpRequestBuilder> {
        validate_bucket_name(bucket)?;
        let action = match method {
            Method::Get => "GetObject",
            Method::Head => "HeadObject",
            Method::Put => "PutObject",
            Method::Post => "PostObject",
            Method::Delete => "DeleteObject",
        };

        Ok(
            HttpRequest::builder(method, self.inner.config.host(bucket, region))
                .scheme(self.inner.config.scheme.clone())
                .path(key)
                .scope(CredentialScope::new(
                    format!("name/cos:{}", action),
                    region.to_string(),
                    bucket.to_string(),
                    key.to_string(),
                )),
        )
    }

    /// Schedule `request` on the pool matching its traffic shape
    pub fn submit<C>(
        &self,
        request: HttpRequest,
        converter: C,
        progress: Option<ProgressCallback>,
    ) -> ScheduledTask<C::Output>
    where
        C: ResponseConverter + 'static,
    {
        let spec = TaskSpec::new(format!("{} {}", request.method, request.path), request.shape)
            .tag(request.tag.clone());
        let pipeline = self.inner.pipeline.clone();
        self.inner.tasks.schedule(spec, move |token| async move {
            pipeline.execute(request, &converter, progress, &token).await
        })
    }

    /// Run `request` on its pool and wait for the result
    pub async fn send<C>(&self, request: HttpRequest, converter: C) -> CosResult<C::Output>
    where
        C: ResponseConverter + 'static,
    {
        self.submit(request, converter, None).join().await
    }

    fn region(&self) -> String {
        self.inner.config.region.clone()
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> CosResult<ObjectMeta> {
        let request = self.object_request(Method::Head, bucket, &self.region(), key)?.build();
        self.send(request, ObjectMetaConverter).await
    }

    /// Fetch a small object into memory
    pub async fn get_object_bytes(&self, bucket: &str, key: &str) -> CosResult<Bytes> {
        let request = self.object_request(Method::Get, bucket, &self.region(), key)?.build();
        self.send(request, BytesConverter).await
    }

    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> CosResult<PutObjectOutput> {
        let request = self
            .object_request(Method::Put, bucket, &self.region(), key)?
            .body(RequestBody::Bytes(data))
            .content_md5(true)
            .build();
        self.send(request, PutObjectConverter).await
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> CosResult<()> {
        let request = self
            .object_request(Method::Delete, bucket, &self.region(), key)?
            .build();
        self.send(request, BytesConverter).await.map(|_| ())
    }

    /// Cancel in-flight HTTP operations carrying `tag`
    pub fn cancel_requests_by_tag(&self, tag: &str) -> usize {
        self.inner.tasks.cancel_by_tag(tag)
    }
}

/// Creates transfers that share a client and a checkpoint store
///
/// Keeps a handle to every live transfer so they can be paused or canceled
/// in bulk.
pub struct TransferManager {
    client: CosClient,
    store: Arc<dyn CheckpointStore>,
    transfers: Mutex<Vec<Arc<dyn Transfer>>>,
}

impl TransferManager {
    pub fn new(client: CosClient, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            client,
            store,
            transfers: Mutex::new(Vec::new()),
        }
    }

    /// Use the configured checkpoint file, or memory when none is set
    pub fn from_config(client: CosClient) -> CosResult<Self> {
        let store: Arc<dyn CheckpointStore> = match &client.config().checkpoint_file {
            Some(path) => Arc::new(FileCheckpointStore::open(path)?),
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Ok(Self::new(client, store))
    }

    pub fn client(&self) -> &CosClient {
        &self.client
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    fn track(&self, transfer: Arc<dyn Transfer>) {
        let mut transfers = self.transfers.lock();
        transfers.retain(|t| !t.state().is_terminal());
        transfers.push(transfer);
    }

    /// Create a download; call [`DownloadTask::start`] to run it
    pub fn download(&self, request: DownloadRequest) -> CosResult<(DownloadTask, TransferEvents)> {
        let (task, events) = DownloadTask::new(self.client.clone(), self.store.clone(), request)?;
        self.track(Arc::new(task.clone()));
        Ok((task, events))
    }

    /// Create an upload; call [`UploadTask::start`] to run it
    pub fn upload(&self, request: UploadRequest) -> CosResult<(UploadTask, TransferEvents)> {
        let (task, events) = UploadTask::new(self.client.clone(), request)?;
        self.track(Arc::new(task.clone()));
        Ok((task, events))
    }

    /// Live transfers
    pub fn active(&self) -> usize {
        self.transfers
            .lock()
            .iter()
            .filter(|t| !t.state().is_terminal())
            .count()
    }

    /// Cancel every transfer carrying `tag`; returns how many accepted
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let matching: Vec<Arc<dyn Transfer>> = self
            .transfers
            .lock()
            .iter()
            .filter(|t| t.tag() == Some(tag))
            .cloned()
            .collect();
        matching.iter().filter(|t| t.cancel()).count()
    }

    /// Pause every transfer that accepts it; checkpoints are kept
    pub fn pause_all(&self) -> usize {
        let all: Vec<Arc<dyn Transfer>> = self.transfers.lock().clone();
        all.iter().filter(|t| t.pause()).count()
    }

    pub fn cancel_all(&self) -> usize {
        let all: Vec<Arc<dyn Transfer>> = self.transfers.lock().clone();
        all.iter().filter(|t| t.cancel()).count()
    }
}
