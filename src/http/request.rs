//! Request description handed to the pipeline

use super::{header, BodyStream, Headers};
use crate::auth::CredentialScope;
use crate::error::{ClientErrorCode, CosError, CosResult};
use bytes::Bytes;
use futures::StreamExt;
use std::fmt;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which worker pool a request runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficShape {
    /// Request body carries streamed data
    Upload,
    /// Response body is streamed to disk
    Download,
    /// Everything else
    Command,
}

impl fmt::Display for TrafficShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficShape::Upload => write!(f, "upload"),
            TrafficShape::Download => write!(f, "download"),
            TrafficShape::Command => write!(f, "command"),
        }
    }
}

/// Inclusive byte range; `end = None` reads to the end of the object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Range from `start` to the end of the object
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    /// `bytes=<start>-` or `bytes=<start>-<end>`
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Whether the range has to go on the wire at all
    pub fn is_partial(&self) -> bool {
        self.start > 0 || self.end.is_some()
    }
}

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// `length` bytes of a local file starting at `offset`
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl RequestBody {
    /// Whole local file as the body
    pub async fn from_file(path: PathBuf) -> CosResult<Self> {
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            CosError::client(
                ClientErrorCode::SinkSourceNotFound,
                format!("cannot read {}: {}", path.display(), e),
            )
        })?;
        Ok(RequestBody::File {
            path,
            offset: 0,
            length: metadata.len(),
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(bytes) => bytes.len() as u64,
            RequestBody::File { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open the body as a stream of chunks; may be called once per attempt
    pub async fn open(&self) -> CosResult<BodyStream> {
        match self {
            RequestBody::Empty => Ok(futures::stream::empty().boxed()),
            RequestBody::Bytes(bytes) => {
                let bytes = bytes.clone();
                Ok(futures::stream::once(async move { Ok(bytes) }).boxed())
            }
            RequestBody::File {
                path,
                offset,
                length,
            } => {
                let mut file = tokio::fs::File::open(path).await.map_err(|e| {
                    CosError::client(
                        ClientErrorCode::SinkSourceNotFound,
                        format!("cannot open {}: {}", path.display(), e),
                    )
                })?;
                if *offset > 0 {
                    file.seek(std::io::SeekFrom::Start(*offset)).await?;
                }
                Ok(ReaderStream::new(file.take(*length)).boxed())
            }
        }
    }
}

/// Fully described request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    /// Absolute path, always starting with `/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: RequestBody,
    pub range: Option<ByteRange>,
    pub shape: TrafficShape,
    /// Caller tag for bulk lookup/cancellation in the task manager
    pub tag: Option<String>,
    /// Compute and send `Content-MD5`
    pub content_md5: bool,
    /// Restrictions passed to the credential provider
    pub scopes: Vec<CredentialScope>,
}

impl HttpRequest {
    pub fn builder(method: Method, host: impl Into<String>) -> HttpRequestBuilder {
        HttpRequestBuilder::new(method, host)
    }

    /// `scheme://host/path?query`, with query values percent-encoded
    pub fn url(&self) -> String {
        let mut url = format!("{}://{}{}", self.scheme, self.host, self.path);
        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.query.iter())
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    /// Header set actually sent, with `host` and `range` filled in
    pub fn wire_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        if !headers.contains(header::HOST) {
            headers.insert(header::HOST, self.host.clone());
        }
        if let Some(range) = self.range.filter(ByteRange::is_partial) {
            headers.insert(header::RANGE, range.header_value());
        }
        headers
    }
}

pub struct HttpRequestBuilder {
    request: HttpRequest,
}

impl HttpRequestBuilder {
    pub fn new(method: Method, host: impl Into<String>) -> Self {
        Self {
            request: HttpRequest {
                method,
                scheme: "https".to_string(),
                host: host.into(),
                path: "/".to_string(),
                query: Vec::new(),
                headers: Headers::new(),
                body: RequestBody::Empty,
                range: None,
                shape: TrafficShape::Command,
                tag: None,
                content_md5: false,
                scopes: Vec::new(),
            },
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.request.scheme = scheme.into();
        self
    }

    /// Object path; a leading `/` is added when missing
    pub fn path(mut self, path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        self.request.path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.request.body = body;
        self
    }

    pub fn range(mut self, range: ByteRange) -> Self {
        self.request.range = Some(range);
        self
    }

    pub fn shape(mut self, shape: TrafficShape) -> Self {
        self.request.shape = shape;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.request.tag = Some(tag.into());
        self
    }

    pub fn content_md5(mut self, enabled: bool) -> Self {
        self.request.content_md5 = enabled;
        self
    }

    pub fn scope(mut self, scope: CredentialScope) -> Self {
        self.request.scopes.push(scope);
        self
    }

    pub fn build(self) -> HttpRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;

    #[test]
    fn test_range_header_forms() {
        assert_eq!(ByteRange::from(4_000_000).header_value(), "bytes=4000000-");
        assert_eq!(
            ByteRange::new(4_000_000, Some(9_999_999)).header_value(),
            "bytes=4000000-9999999"
        );
    }

    #[test]
    fn test_full_range_not_sent() {
        let request = HttpRequest::builder(Method::Get, "b.cos.ap-guangzhou.myqcloud.com")
            .path("reports/q1.csv")
            .range(ByteRange::from(0))
            .build();
        assert!(request.wire_headers().get("range").is_none());

        let request = HttpRequest::builder(Method::Get, "h")
            .range(ByteRange::from(10))
            .build();
        assert_eq!(request.wire_headers().get("range"), Some("bytes=10-"));
    }

    #[test]
    fn test_url_rendering() {
        let request = HttpRequest::builder(Method::Get, "b.cos.ap-guangzhou.myqcloud.com")
            .path("reports/q1.csv")
            .query("versionId", "a b")
            .build();
        assert_eq!(
            request.url(),
            "https://b.cos.ap-guangzhou.myqcloud.com/reports/q1.csv?versionId=a+b"
        );
        assert_eq!(request.wire_headers().get("host"), Some(request.host.as_str()));
    }

    #[tokio::test]
    async fn test_file_body_slice() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let body = RequestBody::File {
            path: file.path().to_path_buf(),
            offset: 3,
            length: 4,
        };
        let chunks: Vec<Bytes> = body.open().await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"3456");
        assert_eq!(body.len(), 4);
    }

    #[tokio::test]
    async fn test_missing_file_body() {
        let body = RequestBody::from_file(PathBuf::from("/nonexistent/cos-transfer")).await;
        match body {
            Err(CosError::Client { code, .. }) => {
                assert_eq!(code, ClientErrorCode::SinkSourceNotFound)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
