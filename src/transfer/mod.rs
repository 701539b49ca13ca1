//! Upload and download lifecycles
//!
//! ```text
//! CREATED ─start─► WAITING ─execute─► IN_PROGRESS ─succeed─► COMPLETED
//!                                          └────fail────► FAILED
//! WAITING | IN_PROGRESS | RESUMED_WAITING ─pause─► PAUSED
//! PAUSED | FAILED ─resume─► RESUMED_WAITING ─start─► WAITING
//! anything but COMPLETED | CANCELED ─cancel─► CANCELED
//! ```

mod download;
mod state;
mod task;
mod upload;

pub use download::{
    plan_resume, requested_range_length, DownloadRequest, DownloadTask, ResumeAction,
};
pub use state::{transition, StateEvent, TransferState, TransitionRejected};
pub use task::{TransferEvent, TransferEvents, TransferOutput};
pub use upload::{UploadRequest, UploadSource, UploadTask};

/// Control surface shared by every transfer kind
pub trait Transfer: Send + Sync {
    fn tag(&self) -> Option<&str>;
    fn state(&self) -> TransferState;
    fn pause(&self) -> bool;
    fn cancel(&self) -> bool;
}
