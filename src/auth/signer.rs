//! Key-time HMAC-SHA256 request signing

use super::Credentials;
use crate::error::{ClientErrorCode, CosError, CosResult};
use crate::http::{header, HttpRequest};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the session token of temporary credentials
pub const SECURITY_TOKEN_HEADER: &str = "x-cos-security-token";

/// Writes authorization metadata onto a request
///
/// Implementations may only touch the authorization and security-token
/// headers; body, path, query and every other header stay as they are.
pub trait Signer: Send + Sync {
    fn sign(&self, request: &mut HttpRequest, credentials: &Credentials) -> CosResult<()>;
}

/// Signer producing `q-sign-algorithm=sha256` authorization headers
#[derive(Debug, Clone)]
pub struct KeyTimeSigner {
    duration: Duration,
}

impl KeyTimeSigner {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Sign as if the current time were `now`
    pub fn sign_at(
        &self,
        request: &mut HttpRequest,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> CosResult<()> {
        credentials.validate()?;
        if credentials.is_expired_at(now) {
            return Err(CosError::client(
                ClientErrorCode::InvalidCredentials,
                "credentials expired before signing",
            ));
        }

        let start = now.timestamp();
        let mut end = start + self.duration.as_secs() as i64;
        if let Some(expiry) = credentials.expires_at() {
            end = end.min(expiry.timestamp());
        }
        let key_time = format!("{};{}", start, end);

        request.headers.remove(header::AUTHORIZATION);
        request.headers.remove(SECURITY_TOKEN_HEADER);

        let headers = request.wire_headers();
        let signed_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| is_signed_header(name))
            .map(|(name, value)| (name.to_string(), uri_encode(value.trim())))
            .collect();

        let mut params: Vec<(String, String)> = request
            .query
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), uri_encode(v)))
            .collect();
        params.sort();

        let http_string = format!(
            "{}\n{}\n{}\n{}\n",
            request.method.as_str().to_ascii_lowercase(),
            request.path,
            join_pairs(&params),
            join_pairs(&signed_headers),
        );
        let string_to_sign = format!(
            "sha256\n{}\n{}\n",
            key_time,
            hex::encode(Sha256::digest(http_string.as_bytes()))
        );

        let sign_key = hex::encode(hmac_sha256(
            credentials.secret_key().as_bytes(),
            key_time.as_bytes(),
        )?);
        let signature = hex::encode(hmac_sha256(sign_key.as_bytes(), string_to_sign.as_bytes())?);

        let authorization = format!(
            "q-sign-algorithm=sha256&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list={}&q-url-param-list={}&q-signature={}",
            credentials.secret_id(),
            key_time,
            key_time,
            join_names(&signed_headers),
            join_names(&params),
            signature
        );

        request.headers.insert(header::AUTHORIZATION, authorization);
        if let Some(token) = credentials.session_token() {
            request.headers.insert(SECURITY_TOKEN_HEADER, token);
        }

        tracing::trace!(
            method = %request.method,
            path = %request.path,
            key_time = %key_time,
            "signed request"
        );
        Ok(())
    }
}

impl Default for KeyTimeSigner {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl Signer for KeyTimeSigner {
    fn sign(&self, request: &mut HttpRequest, credentials: &Credentials) -> CosResult<()> {
        self.sign_at(request, credentials, Utc::now())
    }
}

fn is_signed_header(name: &str) -> bool {
    matches!(
        name,
        header::HOST | header::CONTENT_MD5 | header::CONTENT_TYPE | header::RANGE
    ) || (name.starts_with("x-cos-") && name != SECURITY_TOKEN_HEADER)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> CosResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CosError::client(ClientErrorCode::InternalError, e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn uri_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn join_names(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ByteRange, Method, RequestBody};
    use chrono::TimeZone;

    fn request() -> HttpRequest {
        HttpRequest::builder(Method::Get, "examplebucket-1250000000.cos.ap-beijing.myqcloud.com")
            .path("exampleobject")
            .header("Content-Type", "text/plain")
            .header("x-cos-meta-author", "a b")
            .header("x-custom", "ignored")
            .range(ByteRange::new(10, Some(20)))
            .query("versionId", "v1")
            .build()
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_authorization_layout() {
        let mut req = request();
        let signer = KeyTimeSigner::new(Duration::from_secs(600));
        signer
            .sign_at(&mut req, &Credentials::new("AKID", "secret"), now())
            .unwrap();

        let auth = req.headers.get("authorization").unwrap().to_string();
        assert!(auth.starts_with("q-sign-algorithm=sha256&q-ak=AKID&"));
        assert!(auth.contains("q-sign-time=1700000000;1700000600"));
        assert!(auth.contains("q-header-list=content-type;host;range;x-cos-meta-author&"));
        assert!(auth.contains("q-url-param-list=versionid&"));

        let signature = auth.rsplit("q-signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signing_is_deterministic_and_key_dependent() {
        let signer = KeyTimeSigner::default();
        let mut a = request();
        let mut b = request();
        let mut c = request();
        signer.sign_at(&mut a, &Credentials::new("id", "k1"), now()).unwrap();
        signer.sign_at(&mut b, &Credentials::new("id", "k1"), now()).unwrap();
        signer.sign_at(&mut c, &Credentials::new("id", "k2"), now()).unwrap();
        assert_eq!(a.headers.get("authorization"), b.headers.get("authorization"));
        assert_ne!(a.headers.get("authorization"), c.headers.get("authorization"));
    }

    #[test]
    fn test_only_auth_headers_mutated() {
        let mut req = HttpRequest::builder(Method::Put, "h")
            .path("k")
            .body(RequestBody::Bytes(bytes::Bytes::from_static(b"payload")))
            .header("content-md5", "abc==")
            .build();
        let before = req.headers.clone();

        let expiry = now() + chrono::Duration::seconds(60);
        let creds = Credentials::temporary("id", "key", "tok", expiry);
        KeyTimeSigner::default().sign_at(&mut req, &creds, now()).unwrap();

        assert_eq!(req.headers.get(SECURITY_TOKEN_HEADER), Some("tok"));
        assert!(req.headers.get("authorization").unwrap().contains("q-key-time=1700000000;1700000060"));
        req.headers.remove("authorization");
        req.headers.remove(SECURITY_TOKEN_HEADER);
        assert_eq!(req.headers, before);
        assert_eq!(req.body.len(), 7);
    }

    #[test]
    fn test_resigning_replaces_authorization() {
        let signer = KeyTimeSigner::default();
        let mut req = request();
        signer.sign_at(&mut req, &Credentials::new("id", "key"), now()).unwrap();
        let later = now() + chrono::Duration::seconds(30);
        signer.sign_at(&mut req, &Credentials::new("id", "key"), later).unwrap();
        let auth = req.headers.get("authorization").unwrap();
        assert!(auth.contains("q-sign-time=1700000030;"));
        assert!(!auth.contains("q-header-list=authorization"));
    }

    #[test]
    fn test_expired_credentials_rejected() {
        let creds = Credentials::temporary("id", "key", "tok", now() - chrono::Duration::seconds(1));
        let err = KeyTimeSigner::default()
            .sign_at(&mut request(), &creds, now())
            .unwrap_err();
        assert!(matches!(
            err,
            CosError::Client {
                code: ClientErrorCode::InvalidCredentials,
                ..
            }
        ));
    }

    #[test]
    fn test_uri_encode_spaces() {
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
    }
}
