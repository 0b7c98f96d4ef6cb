//! Centralized error types for content-ops.
//!
//! Every failure carries a stable [`ErrorCode`] so callers and the workflow
//! host can branch on the machine code while showing the human message.
//! Messages and diagnostic detail attached here are always redacted.

use std::error::Error as _;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::redaction::redact_error_message;
use crate::validation::ValidationError;

/// Machine-readable error codes shared by every adapter.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The server could not be reached or answered with a 5xx.
    ConnectionFailed,
    /// The request did not complete within its timeout.
    Timeout,
    /// TLS negotiation or certificate verification failed.
    TlsError,
    /// The server rejected the credentials (401).
    AuthenticationFailed,
    /// An anti-forgery token could not be obtained.
    AntiForgeryTokenFailed,
    /// The credentials lack permission (403).
    Forbidden,
    /// The resource does not exist (404).
    NotFound,
    /// Any other HTTP failure.
    RequestFailed,
    /// One or more replication requests failed.
    ReplicationFailed,
    /// Uploading a package failed.
    PackageUploadFailed,
    /// Installing an uploaded package failed.
    PackageInstallFailed,
    /// The health check did not pass.
    HealthCheckFailed,
    /// One or more cache purge requests failed.
    PurgeFailed,
    /// A repository path failed validation.
    InvalidPath,
    /// A URL failed validation.
    InvalidUrl,
    /// A URL did not match the configured allowlist.
    AllowlistViolation,
    /// Configuration could not be loaded or applied.
    InvalidConfig,
    /// The requested operation is not supported.
    NotImplemented,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::TlsError => "TLS_ERROR",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::AntiForgeryTokenFailed => "ANTI_FORGERY_TOKEN_FAILED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::ReplicationFailed => "REPLICATION_FAILED",
            Self::PackageUploadFailed => "PACKAGE_UPLOAD_FAILED",
            Self::PackageInstallFailed => "PACKAGE_INSTALL_FAILED",
            Self::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            Self::PurgeFailed => "PURGE_FAILED",
            Self::InvalidPath => "INVALID_PATH",
            Self::InvalidUrl => "INVALID_URL",
            Self::AllowlistViolation => "ALLOWLIST_VIOLATION",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::NotImplemented => "NOT_IMPLEMENTED",
        }
    }

    /// Classify an HTTP status code (>= 400) into an error code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 => Self::AuthenticationFailed,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            500..=599 => Self::ConnectionFailed,
            _ => Self::RequestFailed,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Low-level transport failure classes, named after their POSIX codes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransportErrorKind {
    /// `ECONNRESET`
    ConnectionReset,
    /// `ECONNREFUSED`
    ConnectionRefused,
    /// `ETIMEDOUT`
    TimedOut,
    /// `ENOTFOUND`
    DnsFailure,
    /// `EAI_AGAIN`
    DnsTemporaryFailure,
    /// `EPIPE`
    BrokenPipe,
    /// `EHOSTUNREACH`
    HostUnreachable,
    /// `ENETUNREACH`
    NetworkUnreachable,
    /// TLS handshake or certificate failure.
    Tls,
    /// Anything else.
    Other,
}

impl TransportErrorKind {
    /// POSIX-style name of the failure class.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionReset => "ECONNRESET",
            Self::ConnectionRefused => "ECONNREFUSED",
            Self::TimedOut => "ETIMEDOUT",
            Self::DnsFailure => "ENOTFOUND",
            Self::DnsTemporaryFailure => "EAI_AGAIN",
            Self::BrokenPipe => "EPIPE",
            Self::HostUnreachable => "EHOSTUNREACH",
            Self::NetworkUnreachable => "ENETUNREACH",
            Self::Tls => "TLS",
            Self::Other => "EOTHER",
        }
    }

    /// Classify a reqwest error by walking its source chain.
    #[must_use]
    pub fn classify(error: &reqwest::Error) -> Self {
        let mut source = error.source();
        while let Some(inner) = source {
            if let Some(io) = inner.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => return Self::ConnectionRefused,
                    std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted => return Self::ConnectionReset,
                    std::io::ErrorKind::BrokenPipe => return Self::BrokenPipe,
                    std::io::ErrorKind::TimedOut => return Self::TimedOut,
                    std::io::ErrorKind::HostUnreachable => return Self::HostUnreachable,
                    std::io::ErrorKind::NetworkUnreachable => return Self::NetworkUnreachable,
                    _ => {}
                }
            }
            source = inner.source();
        }

        if error.is_timeout() {
            return Self::TimedOut;
        }

        Self::classify_message(&error_chain_text(error))
    }

    /// Classify from rendered error text when no io error is available.
    #[must_use]
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("temporary failure in name resolution") {
            Self::DnsTemporaryFailure
        } else if lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
        {
            Self::DnsFailure
        } else if lower.contains("certificate")
            || lower.contains("tls")
            || lower.contains("handshake")
        {
            Self::Tls
        } else if lower.contains("connection refused") {
            Self::ConnectionRefused
        } else if lower.contains("connection reset") {
            Self::ConnectionReset
        } else if lower.contains("timed out") {
            Self::TimedOut
        } else {
            Self::Other
        }
    }

    /// Error code surfaced for this transport failure.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::TimedOut => ErrorCode::Timeout,
            Self::Tls => ErrorCode::TlsError,
            _ => ErrorCode::ConnectionFailed,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failing item inside an aggregate error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Path or URL of the item.
    pub id: String,
    /// Redacted failure message.
    pub message: String,
}

/// Common error type for content-ops operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OpsError {
    /// The server answered with a status >= 400.
    #[error("{message}")]
    Http {
        /// Classified error code
        code: ErrorCode,
        /// HTTP status code
        status: u16,
        /// Human readable message
        message: String,
        /// Redacted response body
        detail: Option<String>,
        /// Raw `retry-after` header value, if any
        retry_after: Option<String>,
    },

    /// The request never produced a response.
    #[error("{message}")]
    Transport {
        /// Classified error code
        code: ErrorCode,
        /// Low-level failure class
        kind: TransportErrorKind,
        /// Redacted message
        message: String,
    },

    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An adapter-level failure.
    #[error("{message}")]
    Operation {
        /// Error code
        code: ErrorCode,
        /// Redacted message
        message: String,
    },

    /// A batch run where at least one item failed and the caller asked
    /// for failures to be fatal.
    #[error("{} item(s) failed: {}", failures.len(), format_failures(failures))]
    Aggregate {
        /// Error code of the batch operation
        code: ErrorCode,
        /// Every failing item, in input order
        failures: Vec<ItemFailure>,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for content-ops operations.
pub type OpsResult<T> = Result<T, OpsError>;

impl OpsError {
    /// Build an HTTP error, classifying the status and redacting the body.
    #[must_use]
    pub fn http(status: u16, body: &str, retry_after: Option<String>) -> Self {
        let code = ErrorCode::from_status(status);
        let detail = (!body.trim().is_empty()).then(|| redact_error_message(body));
        Self::Http {
            code,
            status,
            message: format!("Request failed with status {status} ({code})"),
            detail,
            retry_after,
        }
    }

    /// Build a transport error from a reqwest failure.
    #[must_use]
    pub fn transport(error: &reqwest::Error) -> Self {
        let kind = TransportErrorKind::classify(error);
        Self::Transport {
            code: kind.error_code(),
            kind,
            message: redact_error_message(&error_chain_text(error)),
        }
    }

    /// Build an operation error with a redacted message.
    #[must_use]
    pub fn operation(code: ErrorCode, message: impl AsRef<str>) -> Self {
        Self::Operation {
            code,
            message: redact_error_message(message.as_ref()),
        }
    }

    /// Build an aggregate error.
    #[must_use]
    pub const fn aggregate(code: ErrorCode, failures: Vec<ItemFailure>) -> Self {
        Self::Aggregate { code, failures }
    }

    /// Get the machine error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Http { code, .. }
            | Self::Transport { code, .. }
            | Self::Operation { code, .. }
            | Self::Aggregate { code, .. } => *code,
            Self::Validation(err) => err.code,
            Self::Serialization(_) => ErrorCode::RequestFailed,
            Self::Config(_) => ErrorCode::InvalidConfig,
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Validation(_) => Some(400),
            _ => None,
        }
    }

    /// Transport failure class, if the request never got a response.
    #[must_use]
    pub const fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Raw `retry-after` header value from the failed response.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::Http { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }

    /// Redacted response body attached to an HTTP error.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Http { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

fn format_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.id, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn error_chain_text(error: &reqwest::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
