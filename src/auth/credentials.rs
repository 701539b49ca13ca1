//! Credential material and the provider contract

use crate::error::{ClientErrorCode, CosError, CosResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Secret material used to sign requests
///
/// Immutable once issued. `Debug` output never contains the secret key or
/// session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    secret_id: String,
    secret_key: String,
    session_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Long-lived credentials
    pub fn new<S: Into<String>>(secret_id: S, secret_key: S) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    /// Temporary credentials with a session token and expiry
    pub fn temporary<S: Into<String>>(
        secret_id: S,
        secret_key: S,
        session_token: S,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            session_token: Some(session_token.into()),
            expires_at: Some(expires_at),
        }
    }

    pub fn secret_id(&self) -> &str {
        &self.secret_id
    }

    pub(crate) fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credentials are past their expiry at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Reject empty secrets
    pub fn validate(&self) -> CosResult<()> {
        if self.secret_id.is_empty() || self.secret_key.is_empty() {
            return Err(CosError::client(
                ClientErrorCode::InvalidCredentials,
                "secret id and secret key must both be set",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Restriction a request declares on the credentials used to sign it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialScope {
    /// Action name, e.g. `name/cos:GetObject`
    pub action: String,
    pub region: String,
    pub bucket: String,
    /// Object key or prefix the action touches
    pub prefix: String,
}

impl CredentialScope {
    pub fn new<S: Into<String>>(action: S, region: S, bucket: S, prefix: S) -> Self {
        Self {
            action: action.into(),
            region: region.into(),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

/// Supplies credentials for signing
///
/// Called once per signing attempt, so an implementation that caches must
/// decide on its own when to refresh. `scopes` is empty when the request
/// declares no restriction.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, scopes: &[CredentialScope]) -> CosResult<Credentials>;
}

/// Provider that always hands out the same credentials
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: Credentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Read `COS_SECRET_ID`, `COS_SECRET_KEY` and optionally `COS_SESSION_TOKEN`
    pub fn from_env() -> CosResult<Self> {
        let secret_id = std::env::var("COS_SECRET_ID").map_err(|_| missing_env("COS_SECRET_ID"))?;
        let secret_key =
            std::env::var("COS_SECRET_KEY").map_err(|_| missing_env("COS_SECRET_KEY"))?;

        let credentials = Credentials {
            secret_id,
            secret_key,
            session_token: std::env::var("COS_SESSION_TOKEN").ok(),
            expires_at: None,
        };
        credentials.validate()?;
        Ok(Self::new(credentials))
    }
}

fn missing_env(name: &str) -> CosError {
    CosError::client(
        ClientErrorCode::InvalidCredentials,
        format!("{} environment variable not set", name),
    )
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self, _scopes: &[CredentialScope]) -> CosResult<Credentials> {
        Ok(self.credentials.clone())
    }
}
