/*!
 * cos-transfer - object-storage client with resumable transfers
 *
 * - Signed REST requests with a single re-signed retry on clock skew
 * - Content-MD5 integrity headers, streamed for large bodies
 * - Resumable downloads driven by a durable checkpoint store
 * - Pause, resume and cancel from any thread, with exactly one terminal result
 * - Separate worker pools for uploads, downloads and control-plane calls
 *
 * Version: 0.3.0
 */

pub mod auth;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod task;
pub mod testing;
pub mod transfer;

// Re-export commonly used types
pub use auth::{Credentials, StaticCredentialProvider};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use client::{CosClient, TransferManager};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ClientErrorCode, CosError, CosResult, ServiceError};
pub use transfer::{
    DownloadRequest, DownloadTask, TransferEvent, TransferEvents, TransferOutput, TransferState,
    UploadRequest, UploadTask,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
