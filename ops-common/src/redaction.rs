//! Redaction of sensitive values before they reach logs or error messages.
//!
//! Every function returns a new value and leaves its input untouched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use reqwest::header::HeaderMap;
use serde_json::Value;
use url::Url;

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Replacement for values nested deeper than [`MAX_REDACTION_DEPTH`].
pub const TRUNCATED: &str = "[TRUNCATED]";

/// Maximum nesting depth walked by [`redact_value`].
pub const MAX_REDACTION_DEPTH: usize = 10;

/// Header names whose values are always redacted (compared lowercased).
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "x-access-token",
    "csrf-token",
    "x-csrf-token",
    "x-xsrf-token",
    "bearer",
];

/// Field name fragments marking a value as sensitive (compared lowercased).
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "apikey",
    "api_key",
    "clientsecret",
    "client_secret",
    "privatekey",
    "private_key",
    "credential",
    "auth",
];

static BASIC_AUTH: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\bbasic\s+([A-Za-z0-9+/]+=*)"));
static BEARER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)\bbearer\s+([A-Za-z0-9\-._~+/]+=*)"));

/// Shortest run treated as a credential after `Basic`/`Bearer`.
const MIN_CREDENTIAL_LEN: usize = 8;
/// Letter-only runs at least this long are treated as credentials too.
const MIN_ALPHA_CREDENTIAL_LEN: usize = 20;
static JSON_SECRET_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    compile(
        r#"(?i)"([a-z0-9_\-]*(?:password|passwd|secret|token|apikey|api_key|credential|private_?key)[a-z0-9_\-]*)"\s*:\s*"[^"]*""#,
    )
});
static QUERY_SECRET: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)(password|token|apikey|api_key)=([^&\s#]+)"));
static USERINFO: LazyLock<Regex> = LazyLock::new(|| compile(r"://([^:/@\s]+):([^@/\s]+)@"));

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("redaction pattern should compile - this is a bug")
}

/// Whether a header or field name holds sensitive data.
#[must_use]
pub fn is_sensitive_key(name: &str) -> bool {
    let lower = name.to_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str())
        || SENSITIVE_FIELDS.iter().any(|f| lower.contains(f))
}

/// Redact the values of sensitive headers.
#[must_use]
pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_key(name) { REDACTED.to_string() } else { value.clone() };
            (name.clone(), value)
        })
        .collect()
}

/// Redact a reqwest header map into a printable map.
#[must_use]
pub fn redact_header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_key(name.as_str()) {
                REDACTED.to_string()
            } else {
                value.to_str().map_or_else(|_| "[BINARY]".to_string(), str::to_string)
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Deep-redact a JSON value.
///
/// Values under sensitive keys are replaced at any depth up to
/// [`MAX_REDACTION_DEPTH`]; deeper containers are replaced wholesale.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    redact_value_at(value, 0)
}

fn redact_value_at(value: &Value, depth: usize) -> Value {
    if depth > MAX_REDACTION_DEPTH {
        return Value::String(TRUNCATED.to_string());
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let redacted = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value_at(inner, depth + 1)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| redact_value_at(v, depth + 1)).collect())
        }
        other => other.clone(),
    }
}

/// Redact an embedded password and sensitive query parameters from a URL.
///
/// Unparseable input goes through pattern substitution instead.
#[must_use]
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return redact_url_text(raw);
    };

    if url.password().is_some() && url.set_password(Some(REDACTED)).is_err() {
        return redact_url_text(raw);
    }

    if let Some(query) = url.query() {
        let redacted = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if is_sensitive_key(key) => format!("{key}={REDACTED}"),
                _ => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&redacted));
    }

    // The userinfo encode set escapes brackets; show the placeholder as-is.
    url.to_string().replace("%5BREDACTED%5D", REDACTED)
}

fn redact_url_text(raw: &str) -> String {
    let text = QUERY_SECRET.replace_all(raw, format!("${{1}}={REDACTED}"));
    USERINFO.replace_all(&text, format!("://${{1}}:{REDACTED}@")).into_owned()
}

/// Whether the word following `Basic`/`Bearer` looks like an encoded
/// credential rather than prose.
fn is_credential_shaped(candidate: &str) -> bool {
    candidate.len() >= MIN_CREDENTIAL_LEN
        && (candidate.len() >= MIN_ALPHA_CREDENTIAL_LEN
            || candidate
                .chars()
                .any(|c| c.is_ascii_digit() || "+/=-._~".contains(c)))
}

fn redact_scheme(pattern: &Regex, text: &str, scheme: &str) -> String {
    pattern
        .replace_all(text, |caps: &Captures<'_>| {
            if is_credential_shaped(&caps[1]) {
                format!("{scheme} {REDACTED}")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Redact credentials that leak into free-form error text.
#[must_use]
pub fn redact_error_message(message: &str) -> String {
    let text = redact_scheme(&BASIC_AUTH, message, "Basic");
    let text = redact_scheme(&BEARER_TOKEN, &text, "Bearer");
    let text = JSON_SECRET_FIELD.replace_all(&text, format!(r#""${{1}}":"{REDACTED}""#));
    redact_url_text(&text)
}
