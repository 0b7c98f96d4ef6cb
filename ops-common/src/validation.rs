//! Input validation for repository paths and target URLs.
//!
//! All validators are total: they never panic and always return a
//! [`ValidationResult`]. Callers turn negative results into per-item failures.

use std::net::IpAddr;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::error::ErrorCode;

/// Roots accepted without an informational warning.
const RECOGNIZED_ROOTS: &[&str] = &[
    "/content", "/apps", "/etc", "/conf", "/libs", "/var", "/home", "/tmp", "/oak:index",
];

/// A failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct ValidationError {
    /// Error code (`InvalidPath`, `InvalidUrl`, `AllowlistViolation`)
    pub code: ErrorCode,
    /// Human readable message
    pub message: String,
    /// The offending value
    pub value: String,
}

impl ValidationError {
    fn new(code: ErrorCode, message: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            value: value.into(),
        }
    }
}

/// Outcome of a validation.
pub type ValidationResult<T = ()> = Result<T, ValidationError>;

/// Whether a valid path sits under a recognized repository root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScope {
    /// Under one of the well-known roots.
    Recognized,
    /// Valid, but outside the well-known roots.
    Unrecognized,
}

/// Policy applied to URL validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlPolicy {
    /// Reject plain `http` URLs
    pub require_https: bool,
    /// Accept loopback hosts such as `localhost` or `127.0.0.1`
    pub allow_loopback: bool,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            require_https: false,
            allow_loopback: true,
        }
    }
}

impl UrlPolicy {
    /// Require `https` URLs.
    #[must_use]
    pub const fn with_https_required(mut self) -> Self {
        self.require_https = true;
        self
    }

    /// Reject loopback hosts.
    #[must_use]
    pub const fn without_loopback(mut self) -> Self {
        self.allow_loopback = false;
        self
    }
}

/// Validate a repository path.
///
/// # Errors
///
/// Returns `InvalidPath` for empty paths, relative paths, paths containing
/// `..`, or paths containing control characters.
pub fn validate_path(path: &str) -> ValidationResult<PathScope> {
    if path.is_empty() {
        return Err(ValidationError::new(ErrorCode::InvalidPath, "Path must not be empty", path));
    }
    if !path.starts_with('/') {
        return Err(ValidationError::new(
            ErrorCode::InvalidPath,
            format!("Path must be absolute: {path}"),
            path,
        ));
    }
    if path.contains("..") {
        return Err(ValidationError::new(
            ErrorCode::InvalidPath,
            format!("Path traversal is not allowed: {path}"),
            path,
        ));
    }
    if path.chars().any(|c| c.is_ascii_control()) {
        return Err(ValidationError::new(
            ErrorCode::InvalidPath,
            "Path contains control characters",
            path,
        ));
    }

    let recognized = RECOGNIZED_ROOTS
        .iter()
        .any(|root| {
            path == *root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
        });

    if recognized {
        Ok(PathScope::Recognized)
    } else {
        debug!(path, "Path is outside the recognized repository roots");
        Ok(PathScope::Unrecognized)
    }
}

/// Validate an absolute http(s) URL against a policy.
///
/// # Errors
///
/// Returns `InvalidUrl` when the URL cannot be parsed, uses another scheme,
/// is plain http while https is required, or targets loopback when the
/// policy forbids it.
pub fn validate_url(raw: &str, policy: &UrlPolicy) -> ValidationResult<Url> {
    let url = Url::parse(raw).map_err(|e| {
        ValidationError::new(ErrorCode::InvalidUrl, format!("Invalid URL: {e}"), raw)
    })?;

    match url.scheme() {
        "https" => {}
        "http" if !policy.require_https => {}
        "http" => {
            return Err(ValidationError::new(ErrorCode::InvalidUrl, "HTTPS is required", raw));
        }
        other => {
            return Err(ValidationError::new(
                ErrorCode::InvalidUrl,
                format!("Unsupported protocol: {other}"),
                raw,
            ));
        }
    }

    if url.host().is_none() {
        return Err(ValidationError::new(ErrorCode::InvalidUrl, "URL has no host", raw));
    }

    if !policy.allow_loopback && is_loopback(&url) {
        return Err(ValidationError::new(
            ErrorCode::InvalidUrl,
            "Loopback hosts are not allowed",
            raw,
        ));
    }

    Ok(url)
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}

/// Validate a URL and require it to fully match an allowlist pattern.
///
/// An empty pattern allows every valid URL.
///
/// # Errors
///
/// Returns `InvalidUrl` for invalid URLs or an uncompilable pattern and
/// `AllowlistViolation` when the URL does not match.
pub fn validate_url_against_allowlist(
    raw: &str,
    pattern: &str,
    policy: &UrlPolicy,
) -> ValidationResult<Url> {
    let url = validate_url(raw, policy)?;

    if pattern.trim().is_empty() {
        return Ok(url);
    }

    let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
        ValidationError::new(
            ErrorCode::InvalidUrl,
            format!("Invalid allowlist pattern: {e}"),
            pattern,
        )
    })?;

    if regex.is_match(raw) {
        Ok(url)
    } else {
        Err(ValidationError::new(
            ErrorCode::AllowlistViolation,
            format!("URL does not match the allowlist: {raw}"),
            raw,
        ))
    }
}

/// Validate every path, stopping at the first invalid one.
///
/// # Errors
///
/// Returns `InvalidPath` for an empty list or the first invalid path.
pub fn validate_paths<S: AsRef<str>>(paths: &[S]) -> ValidationResult {
    if paths.is_empty() {
        return Err(ValidationError::new(
            ErrorCode::InvalidPath,
            "At least one path is required",
            "",
        ));
    }
    for path in paths {
        validate_path(path.as_ref())?;
    }
    Ok(())
}

/// Validate every URL against the allowlist, stopping at the first failure.
///
/// # Errors
///
/// Returns `InvalidUrl` for an empty list, otherwise the first failure.
pub fn validate_urls<S: AsRef<str>>(
    urls: &[S],
    pattern: &str,
    policy: &UrlPolicy,
) -> ValidationResult {
    if urls.is_empty() {
        return Err(ValidationError::new(
            ErrorCode::InvalidUrl,
            "At least one URL is required",
            "",
        ));
    }
    for url in urls {
        validate_url_against_allowlist(url.as_ref(), pattern, policy)?;
    }
    Ok(())
}

/// Split free-form input on newlines, commas or semicolons.
#[must_use]
pub fn parse_path_list(input: &str) -> Vec<String> {
    input
        .split(['\n', '\r', ',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
