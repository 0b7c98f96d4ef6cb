//! Server health check.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ops_common::redaction::{redact_error_message, redact_url};
use ops_common::{ErrorCode, OpsContext, OpsError, OpsResult};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::batch::FailurePolicy;
use crate::client::{ContentClient, RequestOptions};

/// Default health endpoint.
pub const HEALTH_PATH: &str = "/";

/// Login page used as an unauthenticated readiness probe.
pub const LOGIN_PATH: &str = "/libs/granite/core/content/login.html";

/// Health check parameters.
#[derive(Debug, Clone)]
pub struct HealthCheckOptions {
    /// Path to check
    pub path: String,
    /// Also probe the login page
    pub probe_login: bool,
    /// Timeout override
    pub timeout: Option<Duration>,
    /// What a failed check produces
    pub failure_policy: FailurePolicy,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            path: HEALTH_PATH.to_string(),
            probe_login: true,
            timeout: None,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl HealthCheckOptions {
    /// Check a different path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Skip the login page probe.
    #[must_use]
    pub const fn without_login_probe(mut self) -> Self {
        self.probe_login = false;
        self
    }

    /// Override the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckOutput {
    /// Whether the server answered with a success status
    pub ok: bool,
    /// Response status, 0 when no response arrived
    pub status_code: u16,
    /// Round-trip time in milliseconds
    pub latency_ms: u64,
    /// The URL checked, redacted
    pub checked_url: String,
    /// When the check finished
    pub timestamp: DateTime<Utc>,
    /// Diagnostic notes
    pub notes: Vec<String>,
}

/// Check that the server answers on the health path.
///
/// # Errors
///
/// Returns `HealthCheckFailed` when the check fails under
/// [`FailurePolicy::Fail`]. An unresolvable path counts as a failed check.
#[instrument(skip_all, fields(path = %redact_url(&options.path)))]
pub async fn check_health(
    ctx: &OpsContext,
    client: &ContentClient,
    options: &HealthCheckOptions,
) -> OpsResult<HealthCheckOutput> {
    ctx.log_notice_once();

    let mut request = RequestOptions::get(&options.path);
    if let Some(timeout) = options.timeout {
        request = request.with_timeout(timeout);
    }

    let started = Instant::now();
    let (checked_url, result) = match client.resolve_url(&options.path) {
        Ok(url) => (redact_url(url.as_str()), client.request(request).await),
        Err(error) => (redact_url(&options.path), Err(error)),
    };

    match result {
        Ok(response) => {
            let mut notes = vec![format!("Server responded with status {}", response.status)];
            if options.probe_login {
                notes.push(probe_login(client).await);
            }
            let latency_ms = millis(response.latency);
            info!(status = response.status, latency_ms, url = %checked_url, "Health check passed");

            Ok(HealthCheckOutput {
                ok: true,
                status_code: response.status,
                latency_ms,
                checked_url,
                timestamp: Utc::now(),
                notes,
            })
        }
        Err(error) => {
            let latency_ms = millis(started.elapsed());
            warn!(code = %error.code(), error = %error, url = %checked_url, "Health check failed");

            match options.failure_policy {
                FailurePolicy::Fail => Err(OpsError::operation(
                    ErrorCode::HealthCheckFailed,
                    format!("Health check of {checked_url} failed: {error}"),
                )),
                FailurePolicy::Continue => Ok(HealthCheckOutput {
                    ok: false,
                    status_code: error.status_code().unwrap_or(0),
                    latency_ms,
                    checked_url,
                    timestamp: Utc::now(),
                    notes: vec![redact_error_message(&error.to_string())],
                }),
            }
        }
    }
}

async fn probe_login(client: &ContentClient) -> String {
    let probe = RequestOptions::get(LOGIN_PATH).without_auth().without_retry();
    match client.request(probe).await {
        Ok(response) => format!("Login page ready (status {})", response.status),
        Err(error) => format!("Login page not ready: {}", redact_error_message(&error.to_string())),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
