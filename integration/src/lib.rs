//! Shared setup for the end-to-end tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use ops_common::{OpsContext, TracingConfig};

/// Context with debug-level tracing installed.
///
/// Tracing is initialized at most once per process; later calls only build
/// a fresh context.
#[must_use]
pub fn test_context() -> OpsContext {
    OpsContext::initialize(&TracingConfig::default().with_log_level("debug"))
}
