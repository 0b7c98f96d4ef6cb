//! Package upload, install and listing through the package manager.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use ops_common::redaction::redact_error_message;
use ops_common::{ErrorCode, OpsContext, OpsError, OpsResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::batch::{DRY_RUN_PREFIX, FailurePolicy};
use crate::client::{ContentClient, RequestOptions, UploadOptions};

/// Package service endpoint; install appends the package id.
pub const SERVICE_PATH: &str = "/crx/packmgr/service/.json";

/// Upload endpoint.
pub const UPLOAD_PATH: &str = "/crx/packmgr/service/.json/?cmd=upload";

/// Package listing endpoint.
pub const LIST_PATH: &str = "/crx/packmgr/list.jsp";

/// Log lines kept from one response.
pub const MAX_LOG_LINES: usize = 100;

const SUCCESS_MARKERS: &[&str] = &["success", "uploaded", "installed", "import done"];
const ERROR_MARKERS: &[&str] = &["error", "failed", "exception"];

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static PACKAGE_ID: LazyLock<Regex> = LazyLock::new(|| compile(r#"/etc/packages/[^\s"'<>]+\.zip"#));
static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<[^>]*>"));

/// Name under which a package is uploaded.
///
/// An explicit name is trimmed and gets a `.zip` suffix when missing;
/// otherwise a name is generated from `now`.
#[must_use]
pub fn effective_package_name(name: Option<&str>, now: DateTime<Utc>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) if name.to_lowercase().ends_with(".zip") => name.to_string(),
        Some(name) => format!("{name}.zip"),
        None => format!("package-{}.zip", now.format("%Y%m%d-%H%M%S")),
    }
}

/// JSON answer of the package service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PackageServiceResponse {
    /// Success flag
    #[serde(default)]
    pub success: bool,
    /// Status message
    #[serde(default)]
    pub msg: Option<String>,
    /// Package id
    #[serde(default)]
    pub path: Option<String>,
    /// Log as an array of lines or one string
    #[serde(default)]
    pub log: Option<Value>,
}

/// A package service response, resolved once into JSON or markup.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPackageResponse {
    /// Well-formed JSON
    Structured(PackageServiceResponse),
    /// Anything else, usually HTML
    Markup(String),
}

impl ParsedPackageResponse {
    /// Parse a response body.
    #[must_use]
    pub fn parse(body: &str) -> Self {
        if body.trim_start().starts_with('{') {
            if let Ok(response) = serde_json::from_str::<PackageServiceResponse>(body) {
                return Self::Structured(response);
            }
        }
        Self::Markup(body.to_string())
    }

    /// Whether the response reports success.
    #[must_use]
    pub fn success_indicated(&self) -> bool {
        match self {
            Self::Structured(response) => response.success,
            Self::Markup(text) => {
                let lower = text.to_lowercase();
                SUCCESS_MARKERS.iter().any(|m| lower.contains(m))
                    && !ERROR_MARKERS.iter().any(|m| lower.contains(m))
            }
        }
    }

    /// Package id assigned by the server, if any.
    #[must_use]
    pub fn extract_id(&self) -> Option<String> {
        match self {
            Self::Structured(response) => response.path.clone().filter(|p| !p.trim().is_empty()),
            Self::Markup(text) => PACKAGE_ID.find(text).map(|m| m.as_str().to_string()),
        }
    }

    /// Log lines, at most [`MAX_LOG_LINES`].
    #[must_use]
    pub fn extract_logs(&self) -> Vec<String> {
        let lines: Vec<String> = match self {
            Self::Structured(response) => match &response.log {
                Some(Value::Array(entries)) => entries
                    .iter()
                    .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
                    .collect(),
                Some(Value::String(text)) => non_empty_lines(text),
                _ => response.msg.iter().cloned().collect(),
            },
            Self::Markup(text) => non_empty_lines(&MARKUP_TAG.replace_all(text, "\n")),
        };
        lines.into_iter().take(MAX_LOG_LINES).collect()
    }

    /// Short status message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Structured(response) => response.msg.clone().unwrap_or_default(),
            Self::Markup(_) => self.extract_logs().last().cloned().unwrap_or_default(),
        }
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Package deployment parameters.
#[derive(Debug, Clone, Default)]
pub struct PackageOptions {
    /// Package binary
    pub content: Vec<u8>,
    /// Explicit package name
    pub package_name: Option<String>,
    /// Install after upload
    pub install: bool,
    /// Simulate without uploading
    pub dry_run: bool,
    /// What a failed deployment produces
    pub failure_policy: FailurePolicy,
}

impl PackageOptions {
    /// Create options for a package binary, installing after upload.
    #[must_use]
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            install: true,
            ..Self::default()
        }
    }

    /// Set the package name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.package_name = Some(name.into());
        self
    }

    /// Upload only.
    #[must_use]
    pub const fn without_install(mut self) -> Self {
        self.install = false;
        self
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Outcome of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOutput {
    /// Uploaded, and installed when requested
    pub ok: bool,
    /// Status of the last call, 0 when none was made
    pub status_code: u16,
    /// Whether the upload succeeded
    pub uploaded: bool,
    /// Whether the install succeeded
    pub installed: bool,
    /// Package id assigned by the server
    pub package_id: Option<String>,
    /// Name the package was uploaded under
    pub package_name: String,
    /// Server and adapter log lines
    pub logs: Vec<String>,
    /// Whether the run was simulated
    pub dry_run: bool,
    /// When the deployment finished
    pub timestamp: DateTime<Utc>,
}

impl PackageOutput {
    fn new(package_name: String, dry_run: bool) -> Self {
        Self {
            ok: false,
            status_code: 0,
            uploaded: false,
            installed: false,
            package_id: None,
            package_name,
            logs: Vec::new(),
            dry_run,
            timestamp: Utc::now(),
        }
    }
}

/// Upload a package and optionally install it.
///
/// # Errors
///
/// Under [`FailurePolicy::Fail`], returns `PackageUploadFailed` when the
/// upload fails and `PackageInstallFailed` when the install fails.
#[instrument(skip_all, fields(install = options.install, dry_run = options.dry_run))]
pub async fn deploy_package(
    ctx: &OpsContext,
    client: &ContentClient,
    options: PackageOptions,
) -> OpsResult<PackageOutput> {
    ctx.log_notice_once();

    let package_name = effective_package_name(options.package_name.as_deref(), Utc::now());
    let mut output = PackageOutput::new(package_name.clone(), options.dry_run);

    if options.dry_run {
        let action = if options.install { "upload and install" } else { "upload" };
        info!(package = %package_name, "Dry run, package not uploaded");
        output.ok = true;
        output.logs.push(format!("{DRY_RUN_PREFIX} would {action} {package_name}"));
        return Ok(output);
    }

    let upload = UploadOptions {
        path: UPLOAD_PATH.to_string(),
        file_name: package_name.clone(),
        content: options.content,
        fields: vec![("force".to_string(), "true".to_string())],
        timeout: None,
    };

    let response = match client.upload(upload).await {
        Ok(response) => response,
        Err(error) => {
            output.status_code = error.status_code().unwrap_or(0);
            output.logs.push(redact_error_message(&error.to_string()));
            return settle(output, options.failure_policy, ErrorCode::PackageUploadFailed);
        }
    };

    let parsed = ParsedPackageResponse::parse(&response.body);
    output.status_code = response.status;
    output.logs.extend(parsed.extract_logs());
    output.package_id = parsed.extract_id();

    if !parsed.success_indicated() {
        let message = parsed.message();
        output.logs.push(format!("Upload rejected: {}", redact_error_message(&message)));
        return settle(output, options.failure_policy, ErrorCode::PackageUploadFailed);
    }
    output.uploaded = true;
    info!(package = %package_name, package_id = ?output.package_id, "Package uploaded");

    if options.install {
        match output.package_id.clone() {
            Some(id) => install(client, &id, &mut output).await,
            None => output
                .logs
                .push("Package id not found in upload response, install skipped".to_string()),
        }
    }

    output.ok = output.uploaded && (output.installed || !options.install);
    output.timestamp = Utc::now();
    settle(output, options.failure_policy, ErrorCode::PackageInstallFailed)
}

async fn install(client: &ContentClient, id: &str, output: &mut PackageOutput) {
    let request = RequestOptions::post(format!("{SERVICE_PATH}{id}?cmd=install"));
    match client.request(request).await {
        Ok(response) => {
            let parsed = ParsedPackageResponse::parse(&response.body);
            output.status_code = response.status;
            output.logs.extend(parsed.extract_logs());
            output.installed = parsed.success_indicated();
            if output.installed {
                info!(package_id = %id, "Package installed");
            } else {
                warn!(package_id = %id, "Install did not report success");
            }
        }
        Err(error) => {
            warn!(package_id = %id, code = %error.code(), error = %error, "Install failed");
            output.status_code = error.status_code().unwrap_or(0);
            output.logs.push(redact_error_message(&error.to_string()));
        }
    }
}

fn settle(
    mut output: PackageOutput,
    policy: FailurePolicy,
    code: ErrorCode,
) -> OpsResult<PackageOutput> {
    output.timestamp = Utc::now();
    if output.ok || policy == FailurePolicy::Continue {
        return Ok(output);
    }
    let reason = output.logs.last().cloned().unwrap_or_else(|| "no details".to_string());
    Err(OpsError::operation(
        code,
        format!("Deployment of {} failed: {reason}", output.package_name),
    ))
}

/// One entry of the package listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    /// Package id
    pub path: String,
    /// Package name
    pub name: String,
    /// Group
    pub group: Option<String>,
    /// Version
    pub version: Option<String>,
    /// Size in bytes
    pub size: Option<u64>,
    /// Last install time in epoch milliseconds
    pub last_unpacked: Option<i64>,
}

impl PackageInfo {
    /// Whether the package has been installed.
    #[must_use]
    pub const fn installed(&self) -> bool {
        self.last_unpacked.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct PackageList {
    #[serde(default)]
    results: Vec<PackageInfo>,
}

/// List packages known to the package manager.
///
/// # Errors
///
/// Returns an HTTP or transport error from the request, or a serialization
/// error when the listing is not valid JSON.
#[instrument(skip_all)]
pub async fn list_packages(client: &ContentClient) -> OpsResult<Vec<PackageInfo>> {
    let response = client.request(RequestOptions::get(LIST_PATH)).await?;
    let list: PackageList = response.json()?;
    info!(count = list.results.len(), "Listed packages");
    Ok(list.results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_effective_package_name() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(effective_package_name(None, now), "package-20240309-140507.zip");
        assert_eq!(effective_package_name(Some("  "), now), "package-20240309-140507.zip");
        assert_eq!(effective_package_name(Some("site"), now), "site.zip");
        assert_eq!(effective_package_name(Some("site.ZIP"), now), "site.ZIP");
    }

    #[test]
    fn test_structured_response() {
        let parsed = ParsedPackageResponse::parse(
            r#"{"success":true,"msg":"Package uploaded","path":"/etc/packages/my/site.zip"}"#,
        );
        assert!(matches!(parsed, ParsedPackageResponse::Structured(_)));
        assert!(parsed.success_indicated());
        assert_eq!(parsed.extract_id().as_deref(), Some("/etc/packages/my/site.zip"));
        assert_eq!(parsed.extract_logs(), vec!["Package uploaded"]);
    }

    #[test]
    fn test_structured_log_array() {
        let body = r#"{"success":false,"msg":"boom","log":["a","b"]}"#;
        let parsed = ParsedPackageResponse::parse(body);
        assert!(!parsed.success_indicated());
        assert_eq!(parsed.extract_logs(), vec!["a", "b"]);
        assert_eq!(parsed.message(), "boom");
    }

    #[test]
    fn test_markup_response() {
        let body = concat!(
            "<html><body><pre>Installing content\nA /content/site\n</pre>",
            "<p>Package installed in 42ms.</p>",
            "<a href=\"/etc/packages/my/site.zip\">x</a></body></html>",
        );
        let parsed = ParsedPackageResponse::parse(body);
        assert!(matches!(parsed, ParsedPackageResponse::Markup(_)));
        assert!(parsed.success_indicated());
        assert_eq!(parsed.extract_id().as_deref(), Some("/etc/packages/my/site.zip"));
        let logs = parsed.extract_logs();
        assert!(logs.contains(&"A /content/site".to_string()));
        assert!(logs.iter().all(|l| !l.contains('<')));
    }

    #[test]
    fn test_markup_with_error_is_not_success() {
        let parsed =
            ParsedPackageResponse::parse("<p>Package installed with errors: Exception</p>");
        assert!(!parsed.success_indicated());
    }

    #[test]
    fn test_invalid_json_falls_back_to_markup() {
        let parsed = ParsedPackageResponse::parse("{not json success");
        assert!(matches!(parsed, ParsedPackageResponse::Markup(_)));
    }

    #[test]
    fn test_logs_are_capped() {
        let body = (0..250).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let parsed = ParsedPackageResponse::parse(&body);
        let logs = parsed.extract_logs();
        assert_eq!(logs.len(), MAX_LOG_LINES);
        assert_eq!(logs[0], "line 0");
    }

    #[test]
    fn test_package_list_deserializes() {
        let body = serde_json::json!({
            "results": [{
                "path": "/etc/packages/my/site.zip",
                "name": "site",
                "group": "my",
                "version": "1.0",
                "size": 1024,
                "lastUnpacked": 1_700_000_000_000_i64
            }],
            "total": 1
        });
        let list: PackageList = serde_json::from_value(body).unwrap();
        assert_eq!(list.results.len(), 1);
        assert!(list.results[0].installed());
        assert_eq!(list.results[0].group.as_deref(), Some("my"));
    }
}
