use super::{header, BodyStream, Headers};
use futures::StreamExt;

/// Response as it came off the wire, body not yet consumed
pub struct RawResponse {
    pub status: u16,
    /// Reason phrase of the status line, may be empty
    pub reason: String,
    pub headers: Headers,
    pub body: BodyStream,
}

impl RawResponse {
    pub fn new(status: u16, reason: impl Into<String>, headers: Headers, body: BodyStream) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
            body,
        }
    }

    /// Response with an in-memory body
    pub fn with_bytes(status: u16, headers: Headers, body: impl Into<bytes::Bytes>) -> Self {
        let body = body.into();
        Self::new(
            status,
            canonical_reason(status),
            headers,
            futures::stream::once(async move { Ok(body) }).boxed(),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers.get_u64(header::CONTENT_LENGTH)
    }

    /// Request id echoed by the service in a header
    pub fn request_id(&self) -> Option<&str> {
        self.headers
            .get(header::REQUEST_ID)
            .or_else(|| self.headers.get(header::AMZ_REQUEST_ID))
    }
}

impl std::fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Reason phrase for the statuses the service commonly returns
pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        206 => "Partial Content",
        304 => "Not Modified",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        412 => "Precondition Failed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}
