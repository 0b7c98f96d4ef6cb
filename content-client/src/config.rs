//! Credentials and connection configuration for the content server.

use std::env;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl {
        /// Configuration field
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Unknown authentication method
    #[error("Unsupported auth method: {0} (expected basic or bearer)")]
    UnsupportedAuthMethod(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

/// How requests authenticate against the server.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// HTTP basic authentication.
    Basic {
        /// User name
        username: String,
        /// Password
        password: SecretString,
    },
    /// Bearer token authentication.
    Bearer {
        /// Access token
        token: SecretString,
    },
}

impl AuthScheme {
    /// Value of the `Authorization` header for this scheme.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self {
            Self::Basic { username, password } => {
                let raw = format!("{username}:{}", password.expose_secret());
                format!("Basic {}", STANDARD.encode(raw))
            }
            Self::Bearer { token } => format!("Bearer {}", token.expose_secret()),
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn method_name(&self) -> &'static str {
        match self {
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
        }
    }
}

/// Credentials for one content server. Immutable once built.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Server base URL
    pub base_url: Url,
    /// Authentication scheme
    pub auth: AuthScheme,
    /// Skip TLS verification (non-production targets only)
    pub insecure_tls: bool,
    /// Negotiate an anti-forgery token before write requests
    pub csrf_enabled: bool,
}

impl Credentials {
    /// Create credentials using basic authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL.
    pub fn basic(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            parse_base_url(base_url)?,
            AuthScheme::Basic {
                username: username.into(),
                password: SecretString::from(password.into()),
            },
        ))
    }

    /// Create credentials using a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL.
    pub fn bearer(base_url: &str, token: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self::new(
            parse_base_url(base_url)?,
            AuthScheme::Bearer {
                token: SecretString::from(token.into()),
            },
        ))
    }

    const fn new(base_url: Url, auth: AuthScheme) -> Self {
        Self {
            base_url,
            auth,
            insecure_tls: false,
            csrf_enabled: true,
        }
    }

    /// Skip TLS certificate verification.
    #[must_use]
    pub const fn with_insecure_tls(mut self, insecure: bool) -> Self {
        self.insecure_tls = insecure;
        self
    }

    /// Enable or disable anti-forgery token negotiation.
    #[must_use]
    pub const fn with_csrf(mut self, enabled: bool) -> Self {
        self.csrf_enabled = enabled;
        self
    }

    /// Load credentials from `CONTENT_*` environment variables, reading a
    /// `.env` file first when present.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load credentials through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingRequired(name.to_string()))
        };

        let base_url = required("CONTENT_BASE_URL")?;
        let method = lookup("CONTENT_AUTH_METHOD").unwrap_or_else(|| "basic".to_string());

        let credentials = match method.trim().to_lowercase().as_str() {
            "basic" => Self::basic(
                &base_url,
                required("CONTENT_USERNAME")?,
                required("CONTENT_PASSWORD")?,
            )?,
            "bearer" => Self::bearer(&base_url, required("CONTENT_TOKEN")?)?,
            other => return Err(ConfigError::UnsupportedAuthMethod(other.to_string())),
        };

        Ok(credentials
            .with_insecure_tls(parse_bool(&lookup, "CONTENT_INSECURE_TLS", false)?)
            .with_csrf(parse_bool(&lookup, "CONTENT_CSRF", true)?))
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field: "base_url".to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::ParseError {
                name: name.to_string(),
                reason: format!("expected a boolean, got {other}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_basic_header_value() {
        let creds = Credentials::basic("http://localhost:4502", "admin", "admin").unwrap();
        assert_eq!(creds.auth.header_value(), "Basic YWRtaW46YWRtaW4=");
        assert!(creds.csrf_enabled);
        assert!(!creds.insecure_tls);
    }

    #[test]
    fn test_bearer_header_value() {
        let creds = Credentials::bearer("https://author.example.com", "tok-123").unwrap();
        assert_eq!(creds.auth.header_value(), "Bearer tok-123");
        assert_eq!(creds.auth.method_name(), "bearer");
    }

    #[test]
    fn test_debug_does_not_expose_secrets() {
        let creds = Credentials::basic("http://localhost:4502", "admin", "s3cr3t-pass").unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("s3cr3t-pass"));
        assert!(debug.contains("admin"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            Credentials::basic("localhost:4502/x", "a", "b"),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(Credentials::bearer("ftp://host", "t").is_err());
    }

    #[test]
    fn test_from_lookup_basic() {
        let creds = Credentials::from_lookup(lookup(&[
            ("CONTENT_BASE_URL", "https://author.example.com"),
            ("CONTENT_USERNAME", "deployer"),
            ("CONTENT_PASSWORD", "pw"),
            ("CONTENT_INSECURE_TLS", "true"),
            ("CONTENT_CSRF", "off"),
        ]))
        .unwrap();
        assert_eq!(creds.base_url.as_str(), "https://author.example.com/");
        assert!(creds.insecure_tls);
        assert!(!creds.csrf_enabled);
        assert_eq!(creds.auth.method_name(), "basic");
    }

    #[test]
    fn test_from_lookup_bearer_requires_token() {
        let result = Credentials::from_lookup(lookup(&[
            ("CONTENT_BASE_URL", "https://author.example.com"),
            ("CONTENT_AUTH_METHOD", "Bearer"),
        ]));
        assert_eq!(result.unwrap_err(), ConfigError::MissingRequired("CONTENT_TOKEN".to_string()));
    }

    #[test]
    fn test_from_lookup_rejects_unknown_method_and_bad_bool() {
        let result = Credentials::from_lookup(lookup(&[
            ("CONTENT_BASE_URL", "https://author.example.com"),
            ("CONTENT_AUTH_METHOD", "ntlm"),
        ]));
        assert!(matches!(result, Err(ConfigError::UnsupportedAuthMethod(_))));

        let result = Credentials::from_lookup(lookup(&[
            ("CONTENT_BASE_URL", "https://author.example.com"),
            ("CONTENT_USERNAME", "u"),
            ("CONTENT_PASSWORD", "p"),
            ("CONTENT_CSRF", "maybe"),
        ]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_missing_base_url() {
        let result = Credentials::from_lookup(lookup(&[]));
        assert_eq!(
            result.unwrap_err(),
            ConfigError::MissingRequired("CONTENT_BASE_URL".to_string())
        );
    }
}
