mod common;

use common::*;
use cos_transfer::error::{ClientErrorCode, REQUEST_TIME_TOO_SKEWED};
use cos_transfer::http::{header, BytesConverter, Method, TrafficShape};
use cos_transfer::testing::MockTransport;
use cos_transfer::CosError;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_head_object() {
    let mock = Arc::new(MockTransport::new());
    mock.put_object("/a/b.txt", "twelve bytes", "etag-ab");
    let client = client(&mock);

    let meta = client.head_object(BUCKET, "a/b.txt").await.unwrap();
    assert_eq!(meta.etag, "etag-ab");
    assert_eq!(meta.content_length, 12);

    let head = &mock.requests()[0];
    assert_eq!(
        head.url,
        format!("http://{}.cos.{}.myqcloud.com/a/b.txt", BUCKET, REGION)
    );
    let auth = head.headers.get(header::AUTHORIZATION).unwrap();
    assert!(auth.starts_with("q-sign-algorithm=sha256&q-ak=AKIDexample&"));
}

#[tokio::test]
async fn test_clock_skew_is_resigned_once() {
    let mock = Arc::new(MockTransport::new());
    mock.put_object("/skew.txt", "ok", "etag-skew");
    mock.push_service_error(403, REQUEST_TIME_TOO_SKEWED);
    let client = client(&mock);

    let meta = client.head_object(BUCKET, "skew.txt").await.unwrap();
    assert_eq!(meta.etag, "etag-skew");

    let heads = mock.requests_with(Method::Head);
    assert_eq!(heads.len(), 2, "one retry after a skew error");
    assert!(heads
        .iter()
        .all(|r| r.headers.contains(header::AUTHORIZATION)));
}

#[tokio::test]
async fn test_repeated_clock_skew_surfaces() {
    let mock = Arc::new(MockTransport::new());
    mock.put_object("/skew.txt", "ok", "etag-skew");
    mock.push_service_error(403, REQUEST_TIME_TOO_SKEWED);
    mock.push_service_error(403, REQUEST_TIME_TOO_SKEWED);
    let client = client(&mock);

    let err = client.head_object(BUCKET, "skew.txt").await.unwrap_err();
    assert!(err.is_clock_skew());
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn test_put_get_delete_roundtrip() {
    let mock = Arc::new(MockTransport::new());
    let client = client(&mock);

    let put = client
        .put_object_bytes(BUCKET, "notes/today.md", bytes::Bytes::from_static(b"# notes"))
        .await
        .unwrap();
    assert!(put.etag.is_some());

    let body = client.get_object_bytes(BUCKET, "notes/today.md").await.unwrap();
    assert_eq!(&body[..], b"# notes");

    client.delete_object(BUCKET, "notes/today.md").await.unwrap();
    let err = client
        .get_object_bytes(BUCKET, "notes/today.md")
        .await
        .unwrap_err();
    assert_eq!(err.as_service().map(|s| s.code.as_str()), Some("NoSuchKey"));
}

#[tokio::test]
async fn test_empty_body_with_md5_rejected() {
    let mock = Arc::new(MockTransport::new());
    let client = client(&mock);

    let err = client
        .put_object_bytes(BUCKET, "empty.txt", bytes::Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CosError::Client {
            code: ClientErrorCode::InvalidArgument,
            ..
        }
    ));
    assert!(mock.requests().is_empty(), "nothing is sent");
}

#[tokio::test]
async fn test_invalid_bucket_rejected() {
    let mock = Arc::new(MockTransport::new());
    let client = client(&mock);
    assert!(client.head_object("UPPER", "k").await.is_err());
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_cancel_requests_by_tag() {
    let mock = Arc::new(MockTransport::new());
    mock.put_object("/slow.bin", object_data(1_048_576), "etag-slow");
    mock.set_chunking(65_536, Some(Duration::from_millis(50)));
    let client = client(&mock);

    let request = client
        .object_request(Method::Get, BUCKET, REGION, "slow.bin")
        .unwrap()
        .shape(TrafficShape::Download)
        .tag("ops")
        .build();
    let op = client.submit(request, BytesConverter, None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.tasks().tasks_by_tag("ops").len(), 1);
    assert_eq!(client.cancel_requests_by_tag("ops"), 1);

    let err = op.join().await.unwrap_err();
    assert!(err.is_cancelled());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(client.tasks().tasks_by_tag("ops").is_empty());
}

#[tokio::test]
async fn test_pools_separate_traffic() {
    let mock = Arc::new(MockTransport::new());
    let client = client(&mock);

    assert_eq!(client.tasks().available_workers(TrafficShape::Upload), 2);
    assert_eq!(client.tasks().available_workers(TrafficShape::Download), 3);
    assert_eq!(client.tasks().available_workers(TrafficShape::Command), 5);
}
