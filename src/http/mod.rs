//! HTTP execution pipeline
//!
//! One operation runs through: content hash, signing, dispatch, a single
//! re-signed retry on clock skew, and response conversion. Every step after
//! dispatch is driven by the caller-supplied [`ResponseConverter`].
//!
//! ```text
//! HttpRequest ──► Content-MD5 ──► sign ──► transport ──┬─► 2xx ──► converter ──► T
//!                                  ▲                    │
//!                                  └── clock skew (once)┴─► XML error ──► ServiceError
//! ```

pub mod converter;
pub mod digest;
mod headers;
pub mod metrics;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod transport;
pub mod xml;

pub use converter::{
    BytesConverter, DownloadedFile, FileSinkConverter, ObjectMeta, ObjectMetaConverter,
    PutObjectConverter, PutObjectOutput, ResponseConverter,
};
pub use headers::Headers;
pub use metrics::HttpMetrics;
pub use pipeline::HttpPipeline;
pub use request::{ByteRange, HttpRequest, HttpRequestBuilder, Method, RequestBody, TrafficShape};
pub use response::RawResponse;
pub use transport::{HttpTransport, TransportRequest};

#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;

use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Streamed body, in either direction
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Byte-level progress: `(completed, total)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Header names the pipeline reads or writes
pub mod header {
    pub const AUTHORIZATION: &str = "authorization";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_MD5: &str = "content-md5";
    pub const CONTENT_RANGE: &str = "content-range";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const ETAG: &str = "etag";
    pub const HOST: &str = "host";
    pub const IF_MATCH: &str = "if-match";
    pub const LAST_MODIFIED: &str = "last-modified";
    pub const RANGE: &str = "range";
    pub const REQUEST_ID: &str = "x-cos-request-id";
    pub const AMZ_REQUEST_ID: &str = "x-amz-request-id";
}
