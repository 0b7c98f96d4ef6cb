//! Shared building blocks for content-ops.
//!
//! This crate provides:
//! - Error types with stable machine codes
//! - HTTP client configuration and building
//! - Retry decisions with exponential backoff and jitter
//! - Validation of repository paths, URLs and allowlists
//! - Redaction of credentials from headers, URLs, JSON and free text
//! - Tracing setup and the process-scoped runtime context

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod http;
pub mod redaction;
pub mod retry;
pub mod tracing_config;
pub mod validation;

pub use context::OpsContext;
pub use error::{ErrorCode, ItemFailure, OpsError, OpsResult, TransportErrorKind};
pub use http::{HttpConfig, build_http_client};
pub use retry::{RetryAttempt, RetryConfig, RetryDecision, RetryPolicy, parse_retry_after_header};
pub use tracing_config::{TracingConfig, init_tracing};
pub use validation::{PathScope, UrlPolicy, ValidationError, ValidationResult};
