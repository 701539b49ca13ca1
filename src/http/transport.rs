//! Transport seam: moves one request onto the wire

use super::{BodyStream, Headers, Method, RawResponse};
use crate::error::CosResult;
use async_trait::async_trait;

/// Signed request ready for dispatch
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: BodyStream,
    pub content_length: u64,
}

impl std::fmt::Debug for TransportRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// HTTP client the pipeline dispatches through
///
/// Any non-2xx status is still `Ok`; only failures without a response
/// (connect, timeout, I/O) are errors, and they must be
/// [`crate::CosError::Transport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> CosResult<RawResponse>;
}

#[cfg(feature = "reqwest-transport")]
pub use reqwest_impl::ReqwestTransport;

#[cfg(feature = "reqwest-transport")]
mod reqwest_impl {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::{ClientErrorCode, CosError, TransportErrorKind};
    use futures::TryStreamExt;

    /// Production transport backed by `reqwest`
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(config: &ClientConfig) -> CosResult<Self> {
            let client = reqwest::Client::builder()
                .connect_timeout(config.connect_timeout())
                .read_timeout(config.socket_timeout())
                .build()
                .map_err(|e| {
                    CosError::client(
                        ClientErrorCode::InternalError,
                        format!("failed to build HTTP client: {}", e),
                    )
                })?;
            Ok(Self { client })
        }
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn classify(err: &reqwest::Error) -> TransportErrorKind {
        if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_request() {
            TransportErrorKind::Io
        } else {
            TransportErrorKind::Other
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: TransportRequest) -> CosResult<RawResponse> {
            let mut builder = self.client.request(method(request.method), &request.url);
            for (name, value) in request.headers.iter() {
                // reqwest derives host from the URL
                if name != "host" {
                    builder = builder.header(name, value);
                }
            }
            if request.content_length > 0 {
                builder = builder
                    .header("content-length", request.content_length.to_string())
                    .body(reqwest::Body::wrap_stream(request.body));
            }

            let response = builder
                .send()
                .await
                .map_err(|e| CosError::transport(classify(&e), e.to_string()))?;

            let status = response.status();
            let mut headers = Headers::new();
            for (name, value) in response.headers() {
                if let Ok(value) = value.to_str() {
                    headers.append(name.as_str(), value);
                }
            }

            let body = response
                .bytes_stream()
                .map_err(|e| std::io::Error::other(e.to_string()));

            Ok(RawResponse::new(
                status.as_u16(),
                status.canonical_reason().unwrap_or(""),
                headers,
                Box::pin(body),
            ))
        }
    }
}
