//! Transfer lifecycle states and the transition table

use std::fmt;

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Constructed, never started
    Created,
    /// Started, waiting for a worker
    Waiting,
    InProgress,
    Paused,
    /// Resumed, about to re-enter `Waiting`
    ResumedWaiting,
    Canceled,
    Failed,
    Completed,
}

impl TransferState {
    /// Completed and Canceled accept no further events
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Canceled)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Created => "CREATED",
            TransferState::Waiting => "WAITING",
            TransferState::InProgress => "IN_PROGRESS",
            TransferState::Paused => "PAUSED",
            TransferState::ResumedWaiting => "RESUMED_WAITING",
            TransferState::Canceled => "CANCELED",
            TransferState::Failed => "FAILED",
            TransferState::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Something that happened to a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateEvent {
    Start,
    /// The first request of a run was dispatched on a worker
    Execute,
    Succeed,
    Fail,
    Pause,
    Resume,
    Cancel,
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An event that is not legal from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{event} is not allowed in state {from}")]
pub struct TransitionRejected {
    pub from: TransferState,
    pub event: StateEvent,
}

/// The only way a transfer changes state
pub fn transition(
    from: TransferState,
    event: StateEvent,
) -> Result<TransferState, TransitionRejected> {
    use StateEvent::*;
    use TransferState::*;

    let to = match (from, event) {
        (Created | ResumedWaiting, Start) => Waiting,
        (Waiting, Execute) => InProgress,
        (InProgress, Succeed) => Completed,
        (Waiting | InProgress, Fail) => Failed,
        (Waiting | InProgress | ResumedWaiting, Pause) => Paused,
        (Paused | Failed, Resume) => ResumedWaiting,
        (state, Cancel) if !state.is_terminal() => Canceled,
        _ => return Err(TransitionRejected { from, event }),
    };
    Ok(to)
}
