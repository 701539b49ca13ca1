#![allow(dead_code)]

use cos_transfer::auth::{Credentials, KeyTimeSigner, StaticCredentialProvider};
use cos_transfer::checkpoint::{fingerprint, FingerprintInput};
use cos_transfer::testing::MockTransport;
use cos_transfer::{
    ClientConfigBuilder, CosClient, TransferEvent, TransferEvents, TransferManager,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const REGION: &str = "ap-guangzhou";
pub const BUCKET: &str = "examplebucket-1250000000";

pub fn client(mock: &Arc<MockTransport>) -> CosClient {
    let config = ClientConfigBuilder::new(REGION).http().build().unwrap();
    CosClient::new(
        config,
        mock.clone(),
        Arc::new(StaticCredentialProvider::new(Credentials::new(
            "AKIDexample",
            "secret",
        ))),
        Arc::new(KeyTimeSigner::default()),
    )
    .unwrap()
}

pub fn object_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Fingerprint the engine computes for a download with these parameters
pub fn download_fingerprint(
    key: &str,
    local_path: &Path,
    range_start: u64,
    range_end: Option<u64>,
    file_offset: u64,
    etag: &str,
) -> String {
    let local_dir = local_path.parent().unwrap().to_string_lossy().into_owned();
    let local_file_name = local_path.file_name().unwrap().to_string_lossy().into_owned();
    fingerprint(&FingerprintInput {
        kind: "download",
        region: REGION,
        bucket: BUCKET,
        key,
        range_start,
        range_end,
        file_offset,
        local_dir: &local_dir,
        local_file_name: &local_file_name,
        etag,
    })
}

/// Receive events up to and including the next result
pub async fn until_result(events: &mut TransferEvents) -> Vec<TransferEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(20), events.recv())
            .await
            .expect("transfer stalled")
            .expect("event channel closed");
        let done = matches!(
            event,
            TransferEvent::Succeeded(_) | TransferEvent::Failed(_)
        );
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub fn progress_of(events: &[TransferEvent]) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Progress { completed, total } => Some((*completed, *total)),
            _ => None,
        })
        .collect()
}

pub fn results_of(events: &[TransferEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TransferEvent::Succeeded(_) | TransferEvent::Failed(_)))
        .count()
}

/// Everything still queued without waiting
pub fn drain(events: &mut TransferEvents) -> Vec<TransferEvent> {
    let mut rest = Vec::new();
    while let Some(event) = events.try_recv() {
        rest.push(event);
    }
    rest
}

pub fn manager_with_memory_store(mock: &Arc<MockTransport>) -> TransferManager {
    TransferManager::new(
        client(mock),
        Arc::new(cos_transfer::MemoryCheckpointStore::new()),
    )
}
