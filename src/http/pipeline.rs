//! Execution of one HTTP operation

use super::converter::collect_body;
use super::metrics::ByteCounter;
use super::{
    digest, header, xml, BodyStream, HttpMetrics, HttpRequest, HttpTransport, ProgressCallback,
    RawResponse, ResponseConverter, TransportRequest,
};
use crate::auth::{CredentialProvider, Signer};
use crate::config::DEFAULT_MD5_STREAM_THRESHOLD;
use crate::error::{CosError, CosResult};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hashes, signs, dispatches and converts requests
///
/// Holds no per-request state; one pipeline is shared by every task of a
/// client.
#[derive(Clone)]
pub struct HttpPipeline {
    transport: Arc<dyn HttpTransport>,
    provider: Option<Arc<dyn CredentialProvider>>,
    signer: Option<Arc<dyn Signer>>,
    md5_stream_threshold: u64,
}

impl HttpPipeline {
    /// Unsigned pipeline over `transport`
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            provider: None,
            signer: None,
            md5_stream_threshold: DEFAULT_MD5_STREAM_THRESHOLD,
        }
    }

    /// Sign every attempt with credentials from `provider`
    pub fn with_signing(
        mut self,
        provider: Arc<dyn CredentialProvider>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        self.provider = Some(provider);
        self.signer = Some(signer);
        self
    }

    pub fn with_md5_stream_threshold(mut self, threshold: u64) -> Self {
        self.md5_stream_threshold = threshold;
        self
    }

    /// Run `request` to completion or until `cancel` fires
    ///
    /// Cancellation resolves to [`CosError::cancelled`] regardless of how far
    /// the exchange got. Upload progress is reported while the body is sent;
    /// the converter reports download progress.
    pub async fn execute<C: ResponseConverter>(
        &self,
        request: HttpRequest,
        converter: &C,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> CosResult<C::Output> {
        self.execute_with_metrics(request, converter, progress, cancel)
            .await
            .map(|(output, _)| output)
    }

    /// [`execute`](Self::execute), also returning where the time went
    pub async fn execute_with_metrics<C: ResponseConverter>(
        &self,
        request: HttpRequest,
        converter: &C,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> CosResult<(C::Output, HttpMetrics)> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CosError::cancelled()),
            result = self.run(request, converter, progress) => result,
        }
    }

    async fn run<C: ResponseConverter>(
        &self,
        mut request: HttpRequest,
        converter: &C,
        progress: Option<ProgressCallback>,
    ) -> CosResult<(C::Output, HttpMetrics)> {
        let started = Instant::now();
        let mut metrics = HttpMetrics::default();
        let sent = ByteCounter::default();
        let received = ByteCounter::default();

        if request.content_md5 {
            let hashing = Instant::now();
            let md5 = digest::content_md5(&request.body, self.md5_stream_threshold).await?;
            metrics.md5 = Some(hashing.elapsed());
            request.headers.insert(header::CONTENT_MD5, md5);
        }

        let response = self
            .dispatch(&mut request, progress.clone(), &mut metrics, &sent)
            .await?;
        let response = match into_success(response).await {
            Ok(response) => response,
            Err(err) if err.is_clock_skew() => {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %err,
                    "clock skew reported, re-signing once"
                );
                let retry = self
                    .dispatch(&mut request, progress.clone(), &mut metrics, &sent)
                    .await?;
                into_success(retry).await?
            }
            Err(err) => return Err(err),
        };

        let converting = Instant::now();
        let response = count_received(response, received.clone());
        let output = converter.convert(response, progress).await?;
        metrics.convert = converting.elapsed();
        metrics.total = started.elapsed();
        metrics.bytes_sent = sent.get();
        metrics.bytes_received = received.get();

        debug!(
            method = %request.method,
            path = %request.path,
            attempts = metrics.attempts,
            total_ms = metrics.total.as_millis() as u64,
            "{}",
            metrics.format_summary()
        );
        Ok((output, metrics))
    }

    async fn dispatch(
        &self,
        request: &mut HttpRequest,
        progress: Option<ProgressCallback>,
        metrics: &mut HttpMetrics,
        sent: &ByteCounter,
    ) -> CosResult<RawResponse> {
        if let (Some(provider), Some(signer)) = (&self.provider, &self.signer) {
            let signing = Instant::now();
            let credentials = provider.credentials(&request.scopes).await?;
            signer.sign(request, &credentials)?;
            metrics.sign += signing.elapsed();
        }

        let content_length = request.body.len();
        let mut body = count_bytes(request.body.open().await?, sent.clone());
        if let Some(progress) = progress.filter(|_| content_length > 0) {
            body = track_upload(body, content_length, progress);
        }

        let url = request.url();
        debug!(method = %request.method, url = %url, shape = %request.shape, "dispatching request");

        metrics.attempts += 1;
        let sending = Instant::now();
        let response = self
            .transport
            .send(TransportRequest {
                method: request.method,
                url,
                headers: request.wire_headers(),
                body,
                content_length,
            })
            .await?;
        metrics.dispatch += sending.elapsed();

        debug!(status = response.status, request_id = ?response.request_id(), "response received");
        Ok(response)
    }
}

/// Pass 2xx responses through; turn anything else into a service error
async fn into_success(response: RawResponse) -> CosResult<RawResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let status = response.status;
    let reason = response.reason.clone();
    let request_id = response.request_id().map(str::to_string);
    // A body that cannot be read still yields an error from the status line
    let body = collect_body(response).await.unwrap_or_default();

    Err(CosError::Service(xml::parse_service_error(
        status,
        &reason,
        &body,
        request_id.as_deref(),
    )))
}

fn count_bytes(body: BodyStream, counter: ByteCounter) -> BodyStream {
    body.inspect_ok(move |chunk| counter.add(chunk.len() as u64))
        .boxed()
}

fn count_received(mut response: RawResponse, counter: ByteCounter) -> RawResponse {
    response.body = count_bytes(response.body, counter);
    response
}

fn track_upload(body: BodyStream, total: u64, progress: ProgressCallback) -> BodyStream {
    let mut sent = 0u64;
    body.inspect_ok(move |chunk| {
        sent += chunk.len() as u64;
        progress(sent, total);
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialScope, Credentials, KeyTimeSigner};
    use crate::error::{ClientErrorCode, TransportErrorKind};
    use crate::http::{BytesConverter, Method, PutObjectConverter, RequestBody};
    use crate::testing::MockTransport;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        async fn credentials(&self, _scopes: &[CredentialScope]) -> CosResult<Credentials> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials::new("id", "key"))
        }
    }

    fn signed(mock: &Arc<MockTransport>) -> (HttpPipeline, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider::default());
        let pipeline = HttpPipeline::new(mock.clone())
            .with_signing(provider.clone(), Arc::new(KeyTimeSigner::default()));
        (pipeline, provider)
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::builder(Method::Get, "bucket.cos.ap-guangzhou.myqcloud.com")
            .path(path)
            .build()
    }

    #[tokio::test]
    async fn test_signed_get() {
        crate::logging::init_test_logging();
        let mock = Arc::new(MockTransport::new());
        mock.put_object("/a.txt", Bytes::from_static(b"hello"), "e1");
        let (pipeline, provider) = signed(&mock);

        let body = pipeline
            .execute(get("a.txt"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let recorded = mock.requests();
        assert!(recorded[0].headers.get("authorization").is_some());
    }

    #[tokio::test]
    async fn test_clock_skew_retried_once() {
        crate::logging::init_test_logging();
        let mock = Arc::new(MockTransport::new());
        mock.put_object("/a.txt", Bytes::from_static(b"hello"), "e1");
        mock.push_service_error(403, "RequestIsExpired");
        let (pipeline, provider) = signed(&mock);

        let body = pipeline
            .execute(get("a.txt"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");
        assert_eq!(mock.requests().len(), 2);
        // fresh credentials for the retry
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_clock_skew_surfaces() {
        let mock = Arc::new(MockTransport::new());
        mock.put_object("/a.txt", Bytes::from_static(b"hello"), "e1");
        mock.push_service_error(403, "RequestTimeTooSkewed");
        mock.push_service_error(403, "RequestIsExpired");
        let (pipeline, _) = signed(&mock);

        let err = pipeline
            .execute(get("a.txt"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.as_service().unwrap().code, "RequestIsExpired");
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_other_service_errors_not_retried() {
        let mock = Arc::new(MockTransport::new());
        let (pipeline, _) = signed(&mock);

        let err = pipeline
            .execute(get("missing"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap_err();
        let service = err.as_service().unwrap();
        assert_eq!(service.status_code, 404);
        assert_eq!(service.code, "NoSuchKey");
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_service_error() {
        let mock = Arc::new(MockTransport::new());
        mock.push_transport_error(TransportErrorKind::Connect);
        let pipeline = HttpPipeline::new(mock.clone());

        let err = pipeline
            .execute(get("a"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CosError::Transport {
                kind: TransportErrorKind::Connect,
                ..
            }
        ));
        assert!(err.as_service().is_none());
    }

    #[tokio::test]
    async fn test_content_md5_sent() {
        let mock = Arc::new(MockTransport::new());
        let pipeline = HttpPipeline::new(mock.clone());

        let request = HttpRequest::builder(Method::Put, "h")
            .path("k")
            .body(RequestBody::Bytes(Bytes::from_static(b"hello world")))
            .content_md5(true)
            .build();
        pipeline
            .execute(request, &PutObjectConverter, None, &CancellationToken::new())
            .await
            .unwrap();

        let recorded = mock.requests();
        assert_eq!(
            recorded[0].headers.get("content-md5"),
            Some("XrY7u+Ae7tCTyyK7j1rNww==")
        );
        assert_eq!(&recorded[0].body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_upload_progress() {
        let mock = Arc::new(MockTransport::new());
        let pipeline = HttpPipeline::new(mock.clone());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressCallback = Arc::new(move |c, t| sink.lock().push((c, t)));

        let request = HttpRequest::builder(Method::Put, "h")
            .path("k")
            .body(RequestBody::Bytes(Bytes::from_static(b"0123456789")))
            .build();
        pipeline
            .execute(request, &PutObjectConverter, Some(progress), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(seen.lock().last(), Some(&(10, 10)));
    }

    #[tokio::test]
    async fn test_metrics_cover_each_phase() {
        crate::logging::init_test_logging();
        let mock = Arc::new(MockTransport::new());
        let (pipeline, _) = signed(&mock);

        let request = HttpRequest::builder(Method::Put, "h")
            .path("k")
            .body(RequestBody::Bytes(Bytes::from_static(b"hello world")))
            .content_md5(true)
            .build();
        let (_, metrics) = pipeline
            .execute_with_metrics(request, &PutObjectConverter, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(metrics.attempts, 1);
        assert!(metrics.md5.is_some());
        assert_eq!(metrics.bytes_sent, 11);
        assert_eq!(metrics.bytes_received, 0);
        assert!(metrics.total >= metrics.dispatch + metrics.convert);

        let (body, metrics) = pipeline
            .execute_with_metrics(get("k"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello world");
        assert!(metrics.md5.is_none());
        assert_eq!(metrics.bytes_sent, 0);
        assert_eq!(metrics.bytes_received, 11);
    }

    #[tokio::test]
    async fn test_metrics_count_skew_retry() {
        let mock = Arc::new(MockTransport::new());
        mock.put_object("/a.txt", Bytes::from_static(b"hello"), "e1");
        mock.push_service_error(403, "RequestTimeTooSkewed");
        mock.set_latency(Duration::from_millis(10));
        let (pipeline, _) = signed(&mock);

        let (_, metrics) = pipeline
            .execute_with_metrics(get("a.txt"), &BytesConverter, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(metrics.attempts, 2);
        assert!(metrics.dispatch >= Duration::from_millis(20));
        assert_eq!(metrics.bytes_received, 5, "only the successful body");
    }

    #[tokio::test]
    async fn test_cancel_resolves_to_user_cancelled() {
        let mock = Arc::new(MockTransport::new());
        mock.put_object("/a.txt", Bytes::from_static(b"hello"), "e1");
        mock.set_latency(Duration::from_secs(30));
        let pipeline = HttpPipeline::new(mock.clone());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = pipeline
            .execute(get("a.txt"), &BytesConverter, None, &token)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CosError::Client {
                code: ClientErrorCode::UserCancelled,
                ..
            }
        ));
    }
}
