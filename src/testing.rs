//! In-memory transport for tests
//!
//! Serves objects by path with HEAD, ranged GET and PUT, records every request
//! it receives, and can be scripted to fail the next requests with service or
//! transport errors. `If-Match` on GET is honoured with `412`.

use crate::error::{CosError, CosResult, TransportErrorKind};
use crate::http::{header, Headers, HttpTransport, Method, RawResponse, TransportRequest};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// A request as the mock received it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    /// URL path, e.g. `/reports/q1.csv`
    pub path: String,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
}

#[derive(Debug, Clone)]
enum Scripted {
    Service { status: u16, code: String },
    Transport(TransportErrorKind),
}

#[derive(Debug)]
struct MockState {
    objects: HashMap<String, StoredObject>,
    scripted: VecDeque<Scripted>,
    requests: Vec<RecordedRequest>,
    latency: Option<Duration>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    ignore_range: bool,
    ignore_preconditions: bool,
    /// Swapped in when the next GET arrives
    staged: Option<(String, StoredObject)>,
}

/// Scripted in-memory object store
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                objects: HashMap::new(),
                scripted: VecDeque::new(),
                requests: Vec::new(),
                latency: None,
                chunk_size: 64 * 1024,
                chunk_delay: None,
                ignore_range: false,
                ignore_preconditions: false,
                staged: None,
            }),
        }
    }

    /// Store an object under a URL path such as `/reports/q1.csv`
    pub fn put_object(&self, path: &str, data: impl Into<Bytes>, etag: &str) {
        self.state.lock().objects.insert(
            path.to_string(),
            StoredObject {
                data: data.into(),
                etag: etag.to_string(),
            },
        );
    }

    /// Replace an object just before the next GET is served
    pub fn replace_before_next_get(&self, path: &str, data: impl Into<Bytes>, etag: &str) {
        self.state.lock().staged = Some((
            path.to_string(),
            StoredObject {
                data: data.into(),
                etag: etag.to_string(),
            },
        ));
    }

    /// Answer ranged GETs with the whole object and a `200`
    pub fn set_ignore_range(&self, ignore: bool) {
        self.state.lock().ignore_range = ignore;
    }

    /// Serve GETs regardless of `If-Match`
    pub fn set_ignore_preconditions(&self, ignore: bool) {
        self.state.lock().ignore_preconditions = ignore;
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.state.lock().objects.get(path).map(|o| o.data.clone())
    }

    /// Fail the next unscripted request with a service error
    pub fn push_service_error(&self, status: u16, code: &str) {
        self.state.lock().scripted.push_back(Scripted::Service {
            status,
            code: code.to_string(),
        });
    }

    /// Fail the next unscripted request without a response
    pub fn push_transport_error(&self, kind: TransportErrorKind) {
        self.state.lock().scripted.push_back(Scripted::Transport(kind));
    }

    /// Delay before every response
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Split GET bodies into chunks of `size` bytes, sleeping `delay` before each
    pub fn set_chunking(&self, size: usize, delay: Option<Duration>) {
        let mut state = self.state.lock();
        state.chunk_size = size.max(1);
        state.chunk_delay = delay;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Recorded requests with the given method
    pub fn requests_with(&self, method: Method) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == method)
            .cloned()
            .collect()
    }

    fn respond(&self, recorded: &RecordedRequest) -> CosResult<RawResponse> {
        let mut state = self.state.lock();
        if let Some(scripted) = state.scripted.pop_front() {
            return match scripted {
                Scripted::Service { status, code } => Ok(error_response(status, &code, &recorded.path)),
                Scripted::Transport(kind) => Err(CosError::transport(kind, "scripted failure")),
            };
        }

        match recorded.method {
            Method::Head => Ok(match state.objects.get(&recorded.path) {
                Some(object) => {
                    let mut headers = object_headers(object);
                    headers.insert(header::CONTENT_LENGTH, object.data.len().to_string());
                    RawResponse::with_bytes(200, headers, Bytes::new())
                }
                None => error_response(404, "NoSuchKey", &recorded.path),
            }),
            Method::Get => {
                if let Some((path, object)) = state.staged.take() {
                    state.objects.insert(path, object);
                }
                let Some(object) = state.objects.get(&recorded.path) else {
                    return Ok(error_response(404, "NoSuchKey", &recorded.path));
                };
                if let Some(expected) = recorded.headers.get(header::IF_MATCH) {
                    if !state.ignore_preconditions && expected.trim_matches('"') != object.etag {
                        return Ok(error_response(412, "PreconditionFailed", &recorded.path));
                    }
                }
                let ranged = recorded.headers.contains(header::RANGE) && !state.ignore_range;
                let len = object.data.len() as u64;
                let requested = if ranged {
                    recorded.headers.get(header::RANGE)
                } else {
                    None
                };
                let (start, end) = match requested.map(parse_range) {
                    Some(Some((start, end))) => (start, end.unwrap_or(u64::MAX).min(len.saturating_sub(1))),
                    Some(None) => return Ok(error_response(400, "InvalidArgument", &recorded.path)),
                    None => (0, len.saturating_sub(1)),
                };
                if len > 0 && start >= len {
                    return Ok(error_response(416, "InvalidRange", &recorded.path));
                }

                let slice = if len == 0 {
                    Bytes::new()
                } else {
                    object.data.slice(start as usize..=end as usize)
                };
                let mut headers = object_headers(object);
                headers.insert(header::CONTENT_LENGTH, slice.len().to_string());
                if ranged {
                    headers.insert(header::CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, len));
                }

                let body = chunked(slice, state.chunk_size, state.chunk_delay);
                Ok(RawResponse::new(
                    if ranged { 206 } else { 200 },
                    if ranged { "Partial Content" } else { "OK" },
                    headers,
                    body,
                ))
            }
            Method::Put => {
                let etag = hex::encode(Md5::digest(&recorded.body));
                state.objects.insert(
                    recorded.path.clone(),
                    StoredObject {
                        data: recorded.body.clone(),
                        etag: etag.clone(),
                    },
                );
                let mut headers = Headers::new();
                headers.insert(header::ETAG, format!("\"{}\"", etag));
                Ok(RawResponse::with_bytes(200, headers, Bytes::new()))
            }
            Method::Delete => {
                state.objects.remove(&recorded.path);
                Ok(RawResponse::with_bytes(204, Headers::new(), Bytes::new()))
            }
            Method::Post => Ok(error_response(405, "MethodNotAllowed", &recorded.path)),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> CosResult<RawResponse> {
        let mut body = BytesMut::new();
        let mut stream = request.body;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CosError::transport(TransportErrorKind::Io, e.to_string()))?;
            body.extend_from_slice(&chunk);
        }

        let path = url::Url::parse(&request.url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        let recorded = RecordedRequest {
            method: request.method,
            url: request.url,
            path,
            headers: request.headers,
            body: body.freeze(),
        };

        let latency = {
            let mut state = self.state.lock();
            state.requests.push(recorded.clone());
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.respond(&recorded)
    }
}

fn object_headers(object: &StoredObject) -> Headers {
    let mut headers = Headers::new();
    headers.insert(header::ETAG, format!("\"{}\"", object.etag));
    headers.insert(header::CONTENT_TYPE, "application/octet-stream");
    headers.insert(header::REQUEST_ID, "mock-request-id");
    headers
}

fn error_response(status: u16, code: &str, resource: &str) -> RawResponse {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource><RequestId>mock-request-id</RequestId></Error>",
        code, code, resource
    );
    RawResponse::with_bytes(status, Headers::new(), body)
}

/// `bytes=s-` or `bytes=s-e`
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

fn chunked(data: Bytes, chunk_size: usize, delay: Option<Duration>) -> crate::http::BodyStream {
    futures::stream::unfold(data, move |mut rest| async move {
        if rest.is_empty() {
            return None;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let chunk = rest.split_to(chunk_size.min(rest.len()));
        Some((Ok(chunk), rest))
    })
    .boxed()
}
