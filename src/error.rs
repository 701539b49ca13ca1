//! Error types for object-storage operations
//!
//! Every failure surfaces as exactly one of three kinds:
//!
//! - [`CosError::Client`]: a local failure with no server response
//!   (bad input, local I/O, hashing, user cancellation)
//! - [`CosError::Service`]: the server answered with a non-success status
//! - [`CosError::Transport`]: the request never got a response
//!   (connect, timeout, broken stream)

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for SDK operations
pub type CosResult<T> = Result<T, CosError>;

/// Process exit codes used by the CLI
pub const EXIT_SUCCESS: i32 = 0;
/// Transfer stopped but resumable (paused, canceled, network trouble)
pub const EXIT_PARTIAL: i32 = 1;
/// Failed in a way a retry will not fix
pub const EXIT_FATAL: i32 = 2;

/// Error code signalling that the request signature window has expired
pub const REQUEST_IS_EXPIRED: &str = "RequestIsExpired";

/// Error code signalling that the client clock is too far from server time
pub const REQUEST_TIME_TOO_SKEWED: &str = "RequestTimeTooSkewed";

/// Errors that can occur while talking to the object-storage service
#[derive(Error, Debug, Clone)]
pub enum CosError {
    /// Local failure before or without a server response
    #[error("Client error [{code}]: {message}")]
    Client {
        code: ClientErrorCode,
        message: String,
    },

    /// Parsed (or partially parsed) error response from the service
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No response was received
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl CosError {
    /// Build a client error
    pub fn client<S: Into<String>>(code: ClientErrorCode, message: S) -> Self {
        CosError::Client {
            code,
            message: message.into(),
        }
    }

    /// Build a transport error
    pub fn transport<S: Into<String>>(kind: TransportErrorKind, message: S) -> Self {
        CosError::Transport {
            kind,
            message: message.into(),
        }
    }

    /// The error raised when an operation is aborted by its owner
    pub fn cancelled() -> Self {
        Self::client(ClientErrorCode::UserCancelled, "canceled by user")
    }

    /// Whether this is the cancellation signal of an aborted operation
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CosError::Client {
                code: ClientErrorCode::UserCancelled,
                ..
            }
        )
    }

    /// Whether the service rejected the request timestamp
    pub fn is_clock_skew(&self) -> bool {
        match self {
            CosError::Service(service) => service.is_clock_skew(),
            _ => false,
        }
    }

    /// Service error details, if the server produced this error
    pub fn as_service(&self) -> Option<&ServiceError> {
        match self {
            CosError::Service(service) => Some(service),
            _ => None,
        }
    }

    /// Exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            CosError::Client {
                code: ClientErrorCode::UserCancelled | ClientErrorCode::PoorNetwork,
                ..
            } => EXIT_PARTIAL,
            CosError::Transport { .. } => EXIT_PARTIAL,
            CosError::Service(service) if service.status_code >= 500 => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }

    /// Coarse classification for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            CosError::Client { .. } => ErrorCategory::Client,
            CosError::Service(_) => ErrorCategory::Service,
            CosError::Transport { .. } => ErrorCategory::Transport,
        }
    }
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Client,
    Service,
    Transport,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Client => write!(f, "client"),
            ErrorCategory::Service => write!(f, "service"),
            ErrorCategory::Transport => write!(f, "transport"),
        }
    }
}

/// Client-side error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorCode {
    InvalidArgument,
    InvalidCredentials,
    BadRequest,
    SinkSourceNotFound,
    InternalError,
    ServerError,
    IoError,
    PoorNetwork,
    UserCancelled,
    AlreadyFinished,
}

impl ClientErrorCode {
    /// Stable numeric code
    pub fn code(&self) -> u32 {
        match self {
            ClientErrorCode::InvalidArgument => 10000,
            ClientErrorCode::InvalidCredentials => 10001,
            ClientErrorCode::BadRequest => 10002,
            ClientErrorCode::SinkSourceNotFound => 10003,
            ClientErrorCode::InternalError => 20000,
            ClientErrorCode::ServerError => 20001,
            ClientErrorCode::IoError => 20002,
            ClientErrorCode::PoorNetwork => 20003,
            ClientErrorCode::UserCancelled => 30000,
            ClientErrorCode::AlreadyFinished => 30001,
        }
    }

    /// Short symbolic name
    pub fn name(&self) -> &'static str {
        match self {
            ClientErrorCode::InvalidArgument => "InvalidArgument",
            ClientErrorCode::InvalidCredentials => "InvalidCredentials",
            ClientErrorCode::BadRequest => "BadRequest",
            ClientErrorCode::SinkSourceNotFound => "SinkSourceNotFound",
            ClientErrorCode::InternalError => "InternalError",
            ClientErrorCode::ServerError => "ServerError",
            ClientErrorCode::IoError => "IOError",
            ClientErrorCode::PoorNetwork => "NetworkError",
            ClientErrorCode::UserCancelled => "UserCancelled",
            ClientErrorCode::AlreadyFinished => "AlreadyFinished",
        }
    }
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

/// Why a request produced no response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Io,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => write!(f, "connect"),
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Io => write!(f, "io"),
            TransportErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Structured error returned by the service
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("Service error (HTTP {status_code}, {code}): {message}")]
pub struct ServiceError {
    /// HTTP status code
    pub status_code: u16,
    /// Service error code (e.g. `NoSuchKey`); the reason phrase when the body was unusable
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Request id from the body, or from the response header
    pub request_id: Option<String>,
    /// Offending resource name
    pub resource: Option<String>,
}

impl ServiceError {
    /// Whether this error is one of the clock-skew codes
    pub fn is_clock_skew(&self) -> bool {
        self.code == REQUEST_IS_EXPIRED || self.code == REQUEST_TIME_TOO_SKEWED
    }
}

impl From<io::Error> for CosError {
    fn from(err: io::Error) -> Self {
        CosError::client(ClientErrorCode::IoError, err.to_string())
    }
}

impl From<serde_json::Error> for CosError {
    fn from(err: serde_json::Error) -> Self {
        CosError::client(
            ClientErrorCode::InvalidArgument,
            format!("JSON parse error: {}", err),
        )
    }
}

impl From<toml::de::Error> for CosError {
    fn from(err: toml::de::Error) -> Self {
        CosError::client(
            ClientErrorCode::InvalidArgument,
            format!("TOML parse error: {}", err),
        )
    }
}
