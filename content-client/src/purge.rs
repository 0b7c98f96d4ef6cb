//! Cache purge against public dispatcher/CDN endpoints.
//!
//! Purge targets are not the content server, so requests go through a plain
//! HTTP client: no credentials, no anti-forgery token and no retry.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::redaction::redact_headers;
use ops_common::validation::validate_url_against_allowlist;
use ops_common::{
    ErrorCode, HttpConfig, OpsContext, OpsError, OpsResult, UrlPolicy, ValidationResult,
    build_http_client,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::batch::{
    ActionOutcome, BatchAction, BatchOptions, BatchOutput, FailurePolicy, run_batched,
};

/// HTTP method used to purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PurgeMethod {
    /// The custom `PURGE` verb
    #[default]
    Purge,
    /// Plain `POST`
    Post,
}

impl PurgeMethod {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purge => "PURGE",
            Self::Post => "POST",
        }
    }

    fn http_method(self) -> OpsResult<Method> {
        match self {
            Self::Post => Ok(Method::POST),
            Self::Purge => Method::from_bytes(b"PURGE")
                .map_err(|e| OpsError::Config(format!("invalid purge method: {e}"))),
        }
    }
}

impl fmt::Display for PurgeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache purge parameters.
#[derive(Debug, Clone)]
pub struct PurgeOptions {
    /// Target URLs
    pub urls: Vec<String>,
    /// Method sent to each URL
    pub method: PurgeMethod,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Regular expression every URL must fully match; empty allows all
    pub allowlist: String,
    /// URL validation policy
    pub url_policy: UrlPolicy,
    /// Per-request timeout
    pub timeout: Duration,
    /// Skip TLS certificate verification
    pub insecure_tls: bool,
    /// Batching parameters
    pub batch: BatchOptions,
    /// What failed URLs produce
    pub failure_policy: FailurePolicy,
}

impl PurgeOptions {
    /// Create options for a list of URLs.
    #[must_use]
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            method: PurgeMethod::default(),
            headers: BTreeMap::new(),
            allowlist: String::new(),
            url_policy: UrlPolicy::default(),
            timeout: Duration::from_secs(30),
            insecure_tls: false,
            batch: BatchOptions::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Set the method.
    #[must_use]
    pub const fn with_method(mut self, method: PurgeMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Restrict URLs to a pattern.
    #[must_use]
    pub fn with_allowlist(mut self, pattern: impl Into<String>) -> Self {
        self.allowlist = pattern.into();
        self
    }

    /// Set the URL validation policy.
    #[must_use]
    pub const fn with_url_policy(mut self, policy: UrlPolicy) -> Self {
        self.url_policy = policy;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set batching parameters.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Outcome for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeUrlResult {
    /// Target URL
    pub url: String,
    /// Method sent
    pub method: PurgeMethod,
    /// Whether a live call was attempted
    pub requested: bool,
    /// Whether the URL succeeded
    pub ok: bool,
    /// Response status
    pub status_code: u16,
    /// Human readable message
    pub message: String,
    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a purge run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePurgeOutput {
    /// True iff no URL failed
    pub ok: bool,
    /// Number of results
    pub total_urls: usize,
    /// Successful URLs
    pub success_count: usize,
    /// Failed URLs
    pub failure_count: usize,
    /// Whether the run was simulated
    pub dry_run: bool,
    /// Results in input order
    pub results: Vec<PurgeUrlResult>,
    /// When the run finished
    pub timestamp: DateTime<Utc>,
}

impl CachePurgeOutput {
    fn from_batch(batch: BatchOutput, method: PurgeMethod) -> Self {
        Self {
            ok: batch.ok,
            total_urls: batch.total_items,
            success_count: batch.success_count,
            failure_count: batch.failure_count,
            dry_run: batch.dry_run,
            results: batch
                .results
                .into_iter()
                .map(|r| PurgeUrlResult {
                    url: r.id,
                    method,
                    requested: r.requested,
                    ok: r.ok,
                    status_code: r.status_code,
                    message: r.message,
                    timestamp: r.timestamp,
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

struct Purger {
    http: Client,
    kind: PurgeMethod,
    method: Method,
    headers: HeaderMap,
    allowlist: String,
    url_policy: UrlPolicy,
}

#[async_trait]
impl BatchAction for Purger {
    fn validate(&self, item: &str) -> ValidationResult {
        validate_url_against_allowlist(item, &self.allowlist, &self.url_policy).map(|_| ())
    }

    fn describe(&self, item: &str) -> String {
        format!("would send {} to {item}", self.kind)
    }

    async fn execute(&self, item: &str) -> OpsResult<ActionOutcome> {
        let response = self
            .http
            .request(self.method.clone(), item)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| OpsError::transport(&e))?;

        let status = response.status();
        let message = if status.is_success() {
            format!("{} accepted", self.kind)
        } else {
            format!("{} returned status {}", self.kind, status.as_u16())
        };
        Ok(ActionOutcome {
            status: status.as_u16(),
            message,
        })
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> OpsResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| OpsError::Config(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| OpsError::Config(format!("invalid value for header {name}")))?;
        map.insert(header, value);
    }
    Ok(map)
}

/// Purge every URL.
///
/// # Errors
///
/// Returns `InvalidUrl` for an empty URL list, a configuration error for
/// unusable headers, and `PurgeFailed` when any URL fails under
/// [`FailurePolicy::Fail`].
#[instrument(
    skip_all,
    fields(method = %options.method, urls = options.urls.len(), dry_run = options.batch.dry_run)
)]
pub async fn purge_cache(ctx: &OpsContext, options: &PurgeOptions) -> OpsResult<CachePurgeOutput> {
    ctx.log_notice_once();

    if options.urls.is_empty() {
        return Err(OpsError::operation(ErrorCode::InvalidUrl, "At least one URL is required"));
    }

    let config = HttpConfig::default()
        .with_timeout(options.timeout)
        .with_invalid_certs_accepted(options.insecure_tls);
    let purger = Purger {
        http: build_http_client(&config).map_err(|e| OpsError::Config(e.to_string()))?,
        kind: options.method,
        method: options.method.http_method()?,
        headers: header_map(&options.headers)?,
        allowlist: options.allowlist.clone(),
        url_policy: options.url_policy,
    };

    info!(
        headers = ?redact_headers(&options.headers),
        allowlist = %options.allowlist,
        "Purging cache"
    );

    let batch = run_batched(&options.urls, &options.batch, &purger)
        .await
        .into_result(options.failure_policy, ErrorCode::PurgeFailed)?;

    Ok(CachePurgeOutput::from_batch(batch, options.method))
}
