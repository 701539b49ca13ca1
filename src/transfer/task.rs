//! Per-transfer state shared by downloads and uploads
//!
//! All mutation goes through [`TaskCore`], which holds the state behind one
//! lock. An event is applied only if [`transition`] accepts it, and the side
//! effects of an accepted event run under the same lock, so of two racing
//! events exactly one wins and the loser changes nothing.

use super::state::{transition, StateEvent, TransferState};
use crate::error::{CosError, CosResult};
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Success payload of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutput {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    /// Local file, for downloads
    pub local_path: Option<PathBuf>,
    /// Bytes covered by the transfer
    pub total_bytes: u64,
}

/// Notification delivered to the owner of a transfer
#[derive(Debug, Clone)]
pub enum TransferEvent {
    StateChanged(TransferState),
    /// Absolute bytes over the whole requested range
    Progress { completed: u64, total: u64 },
    Succeeded(TransferOutput),
    Failed(CosError),
}

/// Receiving end of a transfer's events
///
/// Events arrive in the order they were produced. `Succeeded` is sent once,
/// on completion; `Failed` once per failed or canceled run.
#[derive(Debug)]
pub struct TransferEvents {
    rx: UnboundedReceiver<TransferEvent>,
}

impl TransferEvents {
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TransferEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next result, skipping state and progress events
    ///
    /// Returns `None` once the transfer is dropped without a further result.
    pub async fn finished(&mut self) -> Option<CosResult<TransferOutput>> {
        while let Some(event) = self.rx.recv().await {
            match event {
                TransferEvent::Succeeded(output) => return Some(Ok(output)),
                TransferEvent::Failed(err) => return Some(Err(err)),
                _ => {}
            }
        }
        None
    }
}

struct CoreState {
    state: TransferState,
    /// Bumped on every start; outcomes of older runs are dropped
    generation: u64,
    token: Option<CancellationToken>,
    last_error: Option<CosError>,
    last_progress: Option<(u64, u64)>,
}

pub(crate) struct TaskCore {
    label: String,
    inner: Mutex<CoreState>,
    events: UnboundedSender<TransferEvent>,
}

impl TaskCore {
    pub(crate) fn new(label: String) -> (Self, TransferEvents) {
        let (tx, rx) = unbounded_channel();
        let core = Self {
            label,
            inner: Mutex::new(CoreState {
                state: TransferState::Created,
                generation: 0,
                token: None,
                last_error: None,
                last_progress: None,
            }),
            events: tx,
        };
        (core, TransferEvents { rx })
    }

    pub(crate) fn state(&self) -> TransferState {
        self.inner.lock().state
    }

    pub(crate) fn last_error(&self) -> Option<CosError> {
        self.inner.lock().last_error.clone()
    }

    fn emit(&self, event: TransferEvent) {
        // The owner may have dropped the receiver; the transfer keeps going
        let _ = self.events.send(event);
    }

    fn apply(&self, inner: &mut CoreState, event: StateEvent) -> bool {
        match transition(inner.state, event) {
            Ok(next) => {
                debug!(task = %self.label, from = %inner.state, to = %next, %event, "state changed");
                inner.state = next;
                self.emit(TransferEvent::StateChanged(next));
                true
            }
            Err(rejected) => {
                debug!(task = %self.label, %rejected, "event ignored");
                false
            }
        }
    }

    fn is_current(inner: &CoreState, generation: u64) -> bool {
        inner.generation == generation
    }

    /// Begin a new run; returns its generation and cancellation token
    pub(crate) fn start(&self) -> Option<(u64, CancellationToken)> {
        let mut inner = self.inner.lock();
        if !self.apply(&mut inner, StateEvent::Start) {
            return None;
        }
        inner.generation += 1;
        let token = CancellationToken::new();
        inner.token = Some(token.clone());
        Some((inner.generation, token))
    }

    pub(crate) fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        self.apply(&mut inner, StateEvent::Resume)
    }

    /// The run's first request reached a worker
    pub(crate) fn execute(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        Self::is_current(&inner, generation) && self.apply(&mut inner, StateEvent::Execute)
    }

    /// Stop the in-flight request and keep resume state
    pub(crate) fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if !self.apply(&mut inner, StateEvent::Pause) {
            return false;
        }
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        true
    }

    /// Stop the in-flight request for good
    ///
    /// `on_accept` runs under the state lock, only if the cancel wins.
    pub(crate) fn cancel<F>(&self, on_accept: F) -> bool
    where
        F: FnOnce() -> CosResult<()>,
    {
        let mut inner = self.inner.lock();
        self.cancel_locked(&mut inner, on_accept)
    }

    /// Cancel on behalf of run `generation` after one of its operations was
    /// aborted from outside the transfer, e.g. by a tag on the task registry
    pub(crate) fn cancel_run<F>(&self, generation: u64, on_accept: F) -> bool
    where
        F: FnOnce() -> CosResult<()>,
    {
        let mut inner = self.inner.lock();
        if !Self::is_current(&inner, generation) {
            return false;
        }
        self.cancel_locked(&mut inner, on_accept)
    }

    fn cancel_locked<F>(&self, inner: &mut CoreState, on_accept: F) -> bool
    where
        F: FnOnce() -> CosResult<()>,
    {
        if !self.apply(inner, StateEvent::Cancel) {
            return false;
        }
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        if let Err(e) = on_accept() {
            warn!(task = %self.label, error = %e, "cleanup after cancel failed");
        }
        let err = CosError::cancelled();
        inner.last_error = Some(err.clone());
        self.emit(TransferEvent::Failed(err));
        true
    }

    /// Run `f` under the state lock if `generation` is still running
    ///
    /// Used for side effects that must not interleave with pause or cancel.
    pub(crate) fn guarded<R>(&self, generation: u64, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        if Self::is_current(&inner, generation) && inner.state == TransferState::InProgress {
            Some(f())
        } else {
            None
        }
    }

    /// Forward progress if it moves forward and the run is current
    pub(crate) fn progress(&self, generation: u64, completed: u64, total: u64) {
        let mut inner = self.inner.lock();
        if !Self::is_current(&inner, generation) || inner.state != TransferState::InProgress {
            return;
        }
        self.gate_progress(&mut inner, completed, total);
    }

    fn gate_progress(&self, inner: &mut CoreState, completed: u64, total: u64) {
        if let Some((last, _)) = inner.last_progress {
            if completed <= last {
                return;
            }
        }
        inner.last_progress = Some((completed, total));
        self.emit(TransferEvent::Progress { completed, total });
    }

    /// Complete the run
    ///
    /// `on_accept` runs under the state lock, only if the success wins; its
    /// failure is logged and does not undo the completion.
    pub(crate) fn succeed<F>(
        &self,
        generation: u64,
        output: TransferOutput,
        on_accept: F,
    ) -> bool
    where
        F: FnOnce() -> CosResult<()>,
    {
        let mut inner = self.inner.lock();
        if !Self::is_current(&inner, generation) {
            return false;
        }
        if transition(inner.state, StateEvent::Succeed).is_err() {
            debug!(task = %self.label, state = %inner.state, "late success ignored");
            return false;
        }

        if let Err(e) = on_accept() {
            warn!(task = %self.label, error = %e, "cleanup after success failed");
        }
        let total = output.total_bytes;
        // Zero-length transfers still report completion once
        if total == 0 && inner.last_progress.is_none() {
            inner.last_progress = Some((0, 0));
            self.emit(TransferEvent::Progress {
                completed: 0,
                total: 0,
            });
        } else {
            self.gate_progress(&mut inner, total, total);
        }
        inner.token = None;
        inner.last_error = None;
        self.apply(&mut inner, StateEvent::Succeed);
        self.emit(TransferEvent::Succeeded(output));
        true
    }

    /// Fail the run; a cancellation signal is not a failure and is dropped
    pub(crate) fn fail(&self, generation: u64, err: CosError) -> bool {
        if err.is_cancelled() {
            debug!(task = %self.label, "operation aborted, no state change");
            return false;
        }

        let mut inner = self.inner.lock();
        if !Self::is_current(&inner, generation) {
            return false;
        }
        if !self.apply(&mut inner, StateEvent::Fail) {
            return false;
        }
        warn!(task = %self.label, category = %err.category(), error = %err, "transfer failed");
        inner.token = None;
        inner.last_error = Some(err.clone());
        self.emit(TransferEvent::Failed(err));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientErrorCode, TransportErrorKind};

    fn output(total: u64) -> TransferOutput {
        TransferOutput {
            bucket: "b".into(),
            key: "k".into(),
            etag: None,
            local_path: None,
            total_bytes: total,
        }
    }

    fn drain(events: &mut TransferEvents) -> Vec<TransferEvent> {
        let mut all = Vec::new();
        while let Some(event) = events.try_recv() {
            all.push(event);
        }
        all
    }

    fn running() -> (TaskCore, TransferEvents, u64, CancellationToken) {
        crate::logging::init_test_logging();
        let (core, events) = TaskCore::new("test".into());
        let (generation, token) = core.start().unwrap();
        assert!(core.execute(generation));
        (core, events, generation, token)
    }

    #[test]
    fn test_progress_is_monotonic_and_deduplicated() {
        let (core, mut events, generation, _) = running();
        core.progress(generation, 10, 100);
        core.progress(generation, 5, 100);
        core.progress(generation, 10, 100);
        core.progress(generation, 100, 100);
        core.succeed(generation, output(100), || Ok(()));

        let progress: Vec<(u64, u64)> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { completed, total } => Some((completed, total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(10, 100), (100, 100)]);
    }

    #[test]
    fn test_cancel_then_success_only_one_terminal() {
        let (core, mut events, generation, token) = running();
        assert!(core.cancel(|| Ok(())));
        assert!(token.is_cancelled());
        assert!(!core.succeed(generation, output(1), || Ok(())));
        assert_eq!(core.state(), TransferState::Canceled);

        let results: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, TransferEvent::Succeeded(_) | TransferEvent::Failed(_)))
            .collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], TransferEvent::Failed(e) if e.is_cancelled()));
    }

    #[test]
    fn test_success_then_cancel_rejected() {
        let (core, _events, generation, _) = running();
        let mut cleaned = false;
        assert!(core.succeed(generation, output(1), || {
            cleaned = true;
            Ok(())
        }));
        assert!(cleaned);
        assert!(!core.cancel(|| panic!("cleanup must not run")));
        assert!(!core.pause());
        assert!(!core.resume());
        assert!(core.start().is_none());
        assert_eq!(core.state(), TransferState::Completed);
    }

    #[test]
    fn test_cancelled_error_is_not_failure() {
        let (core, _events, generation, _) = running();
        assert!(core.pause());
        assert!(!core.fail(generation, CosError::cancelled()));
        assert_eq!(core.state(), TransferState::Paused);
        assert!(core.last_error().is_none());
    }

    #[test]
    fn test_cancel_run_checks_generation() {
        let (core, mut events, generation, token) = running();

        assert!(!core.cancel_run(generation + 1, || Ok(())));
        assert_eq!(core.state(), TransferState::InProgress);

        let mut cleaned = false;
        assert!(core.cancel_run(generation, || {
            cleaned = true;
            Ok(())
        }));
        assert!(cleaned);
        assert!(token.is_cancelled());
        assert_eq!(core.state(), TransferState::Canceled);
        assert!(!core.cancel_run(generation, || Ok(())), "only once");

        let failures: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, TransferEvent::Failed(_)))
            .collect();
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_stale_generation_dropped() {
        let (core, _events, old, _) = running();
        assert!(core.pause());
        assert!(core.resume());
        let (new, _) = core.start().unwrap();
        assert_ne!(old, new);

        let err = CosError::transport(TransportErrorKind::Io, "reset");
        assert!(!core.fail(old, err.clone()));
        assert!(!core.execute(old));
        assert!(core.execute(new));
        assert!(core.fail(new, err));
        assert_eq!(core.state(), TransferState::Failed);
    }

    #[test]
    fn test_guarded_refuses_after_pause() {
        let (core, _events, generation, _) = running();
        assert_eq!(core.guarded(generation, || 1), Some(1));
        core.pause();
        assert_eq!(core.guarded(generation, || 1), None);
    }

    #[test]
    fn test_failure_recorded() {
        let (core, mut events, generation, _) = running();
        let err = CosError::client(ClientErrorCode::IoError, "disk full");
        assert!(core.fail(generation, err));
        assert!(matches!(
            core.last_error(),
            Some(CosError::Client {
                code: ClientErrorCode::IoError,
                ..
            })
        ));
        let last = drain(&mut events).pop().unwrap();
        assert!(matches!(last, TransferEvent::Failed(_)));
    }

    #[tokio::test]
    async fn test_finished_skips_progress() {
        let (core, mut events, generation, _) = running();
        core.progress(generation, 1, 2);
        core.succeed(generation, output(2), || Ok(()));
        let result = events.finished().await.unwrap().unwrap();
        assert_eq!(result.total_bytes, 2);
    }
}
