/*!
 * Worker pools and the registry of in-flight operations
 *
 * Every operation is scheduled on the pool matching its traffic shape, so a
 * burst of large uploads cannot starve small control-plane calls. Operations
 * stay in the registry, addressable by tag, until they finish.
 */

use crate::config::PoolConfig;
use crate::error::{ClientErrorCode, CosError, CosResult};
use crate::http::TrafficShape;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Where an operation is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Waiting for a worker
    Queued,
    /// Holding a worker
    Executing,
}

/// Snapshot of a registered operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: u64,
    pub name: String,
    pub tag: Option<String>,
    pub shape: TrafficShape,
    pub phase: TaskPhase,
}

/// Scheduling parameters of one operation
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub tag: Option<String>,
    pub shape: TrafficShape,
    /// Token to run under; a fresh one is created when absent
    pub token: Option<CancellationToken>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, shape: TrafficShape) -> Self {
        Self {
            name: name.into(),
            tag: None,
            shape,
            token: None,
        }
    }

    pub fn tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

struct TaskEntry {
    name: String,
    tag: Option<String>,
    shape: TrafficShape,
    phase: TaskPhase,
    token: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<u64, TaskEntry>>>;

/// Removes the registry entry however the operation ends
struct Deregister {
    registry: Registry,
    id: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

/// Handle to a scheduled operation
#[derive(Debug)]
pub struct ScheduledTask<T> {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<CosResult<T>>,
}

impl<T> ScheduledTask<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fire the operation's cancellation token
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the operation's result
    pub async fn join(self) -> CosResult<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(CosError::cancelled()),
            Err(e) => Err(CosError::client(
                ClientErrorCode::InternalError,
                format!("worker task failed: {}", e),
            )),
        }
    }
}

/// Owns the upload, download and command pools
pub struct TaskManager {
    runtime: Handle,
    upload: Arc<Semaphore>,
    download: Arc<Semaphore>,
    command: Arc<Semaphore>,
    registry: Registry,
    next_id: AtomicU64,
}

impl TaskManager {
    /// Create the pools; must be called from within a Tokio runtime
    pub fn new(pools: PoolConfig) -> CosResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            CosError::client(
                ClientErrorCode::InternalError,
                format!("task manager needs a Tokio runtime: {}", e),
            )
        })?;
        Ok(Self::with_runtime(pools, runtime))
    }

    pub fn with_runtime(pools: PoolConfig, runtime: Handle) -> Self {
        Self {
            runtime,
            upload: Arc::new(Semaphore::new(pools.upload.max(1))),
            download: Arc::new(Semaphore::new(pools.download.max(1))),
            command: Arc::new(Semaphore::new(pools.command.max(1))),
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn pool(&self, shape: TrafficShape) -> Arc<Semaphore> {
        match shape {
            TrafficShape::Upload => self.upload.clone(),
            TrafficShape::Download => self.download.clone(),
            TrafficShape::Command => self.command.clone(),
        }
    }

    /// Free workers in the pool for `shape`
    pub fn available_workers(&self, shape: TrafficShape) -> usize {
        self.pool(shape).available_permits()
    }

    /// Queue `work` on the pool for `spec.shape`
    ///
    /// `work` starts only once a worker is free and receives the operation's
    /// cancellation token. Cancelling while still queued resolves to
    /// [`CosError::cancelled`] without running `work`. Safe to call from any
    /// thread.
    pub fn schedule<F, Fut, T>(&self, spec: TaskSpec, work: F) -> ScheduledTask<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = CosResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = spec.token.unwrap_or_default();

        self.registry.lock().insert(
            id,
            TaskEntry {
                name: spec.name.clone(),
                tag: spec.tag,
                shape: spec.shape,
                phase: TaskPhase::Queued,
                token: token.clone(),
            },
        );
        trace!(id, name = %spec.name, shape = %spec.shape, "operation queued");

        let pool = self.pool(spec.shape);
        let registry = self.registry.clone();
        let task_token = token.clone();
        let name = spec.name;

        let handle = self.runtime.spawn(async move {
            let _guard = Deregister {
                registry: registry.clone(),
                id,
            };

            let permit = tokio::select! {
                biased;
                _ = task_token.cancelled() => return Err(CosError::cancelled()),
                permit = pool.acquire_owned() => permit.map_err(|_| {
                    CosError::client(ClientErrorCode::InternalError, "worker pool closed")
                })?,
            };

            if let Some(entry) = registry.lock().get_mut(&id) {
                entry.phase = TaskPhase::Executing;
            }
            debug!(id, name = %name, "operation executing");

            let result = work(task_token).await;
            drop(permit);
            result
        });

        ScheduledTask { id, token, handle }
    }

    /// Run `future` on the manager's runtime without a worker slot
    pub(crate) fn spawn_detached<Fut>(&self, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    /// Every registered operation
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self
            .registry
            .lock()
            .iter()
            .map(|(id, entry)| TaskInfo {
                id: *id,
                name: entry.name.clone(),
                tag: entry.tag.clone(),
                shape: entry.shape,
                phase: entry.phase,
            })
            .collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Registered operations carrying `tag`
    pub fn tasks_by_tag(&self, tag: &str) -> Vec<TaskInfo> {
        self.snapshot()
            .into_iter()
            .filter(|t| t.tag.as_deref() == Some(tag))
            .collect()
    }

    /// Cancel every operation carrying `tag`; returns how many were signalled
    pub fn cancel_by_tag(&self, tag: &str) -> usize {
        let registry = self.registry.lock();
        let mut count = 0;
        for entry in registry.values().filter(|e| e.tag.as_deref() == Some(tag)) {
            entry.token.cancel();
            count += 1;
        }
        debug!(tag, count, "cancelled operations by tag");
        count
    }

    /// Cancel every registered operation
    pub fn cancel_all(&self) -> usize {
        let registry = self.registry.lock();
        for entry in registry.values() {
            entry.token.cancel();
        }
        registry.len()
    }
}
