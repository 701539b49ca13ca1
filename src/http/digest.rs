//! Content-MD5 computation

use super::RequestBody;
use crate::error::{ClientErrorCode, CosError, CosResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use md5::{Digest, Md5};

/// Base64 MD5 of the request body
///
/// In-memory bodies are hashed in one pass. File bodies below `stream_threshold`
/// are read whole; larger ones are hashed chunk by chunk.
pub async fn content_md5(body: &RequestBody, stream_threshold: u64) -> CosResult<String> {
    if body.is_empty() {
        return Err(CosError::client(
            ClientErrorCode::InvalidArgument,
            "Content-MD5 requested for a request without a body",
        ));
    }

    let digest = match body {
        RequestBody::Empty => Vec::new(),
        RequestBody::Bytes(bytes) => Md5::digest(bytes).to_vec(),
        RequestBody::File { length, .. } if *length < stream_threshold => {
            let mut stream = body.open().await?;
            let mut buffer = Vec::with_capacity(*length as usize);
            while let Some(chunk) = stream.next().await {
                buffer.extend_from_slice(&chunk.map_err(hash_failure)?);
            }
            Md5::digest(&buffer).to_vec()
        }
        RequestBody::File { .. } => {
            let mut stream = body.open().await?;
            let mut hasher = Md5::new();
            while let Some(chunk) = stream.next().await {
                hasher.update(chunk.map_err(hash_failure)?);
            }
            hasher.finalize().to_vec()
        }
    };
    Ok(STANDARD.encode(digest))
}

fn hash_failure(err: std::io::Error) -> CosError {
    CosError::client(
        ClientErrorCode::IoError,
        format!("failed to hash request body: {}", err),
    )
}
