//! Process-scoped runtime context.
//!
//! The host builds one [`OpsContext`] at initialization and passes it to
//! every adapter call. It owns state that must outlive a single invocation,
//! such as whether the licensing notice has been logged yet.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::tracing_config::{TracingConfig, init_tracing};

/// Licensing notice logged once per context.
pub const LICENSE_NOTICE: &str =
    "content-ops is proprietary software; use is subject to the content platform license terms";

/// Shared context for a host process.
#[derive(Debug, Default)]
pub struct OpsContext {
    notice_logged: AtomicBool,
}

impl OpsContext {
    /// Create a context without touching the global subscriber.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            notice_logged: AtomicBool::new(false),
        }
    }

    /// Initialize tracing and create a context.
    #[must_use]
    pub fn initialize(tracing: &TracingConfig) -> Self {
        init_tracing(tracing);
        Self::new()
    }

    /// Log the licensing notice the first time this is called.
    ///
    /// Returns `true` when this call emitted the notice.
    pub fn log_notice_once(&self) -> bool {
        let first = !self.notice_logged.swap(true, Ordering::AcqRel);
        if first {
            info!(notice = LICENSE_NOTICE, "content-ops initialized");
        }
        first
    }

    /// Whether the notice has been logged.
    #[must_use]
    pub fn notice_logged(&self) -> bool {
        self.notice_logged.load(Ordering::Acquire)
    }
}
