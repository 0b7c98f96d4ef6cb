//! Content server HTTP client with retry, anti-forgery tokens and redaction.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ops_common::redaction::{redact_headers, redact_url};
use ops_common::{
    ErrorCode, HttpConfig, OpsError, OpsResult, RetryConfig, RetryPolicy, build_http_client,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::Credentials;

/// Endpoint issuing anti-forgery tokens.
pub const CSRF_TOKEN_PATH: &str = "/libs/granite/csrf/token.json";

/// Header carrying the anti-forgery token.
pub const CSRF_HEADER: &str = "csrf-token";

/// Multipart field holding uploaded binaries.
pub const UPLOAD_FIELD: &str = "package";

/// Lifetime of a fetched anti-forgery token.
pub const CSRF_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON document
    Json(Value),
    /// URL-encoded form fields
    Form(Vec<(String, String)>),
    /// Raw text
    Text(String),
}

/// A single request against the content server.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL
    pub path: String,
    /// Extra headers; these win over generated ones
    pub headers: BTreeMap<String, String>,
    /// Optional body
    pub body: Option<RequestBody>,
    /// Per-request timeout override
    pub timeout: Option<Duration>,
    /// Wrap the call in the retry policy
    pub retry: bool,
    /// Per-request retry configuration override
    pub retry_config: Option<RetryConfig>,
    /// Send the `Authorization` header
    pub authenticate: bool,
}

impl RequestOptions {
    /// Create request options.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            retry: true,
            retry_config: None,
            authenticate: true,
        }
    }

    /// GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Send URL-encoded form fields.
    #[must_use]
    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    /// Send a JSON body.
    #[must_use]
    pub fn with_json(mut self, value: Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    /// Send a text body.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(text.into()));
        self
    }

    /// Override the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Skip the retry wrapper.
    #[must_use]
    pub const fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    /// Override the retry configuration for this call.
    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    /// Do not send credentials.
    #[must_use]
    pub const fn without_auth(mut self) -> Self {
        self.authenticate = false;
        self
    }
}

/// A multipart upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Path relative to the base URL
    pub path: String,
    /// File name reported for the binary part
    pub file_name: String,
    /// Binary payload
    pub content: Vec<u8>,
    /// Additional string fields
    pub fields: Vec<(String, String)>,
    /// Per-request timeout override
    pub timeout: Option<Duration>,
}

/// A successful response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body as text
    pub body: String,
    /// Time from sending to reading the full body
    pub latency: Duration,
}

impl HttpResponse {
    /// Deserialize the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> OpsResult<T> {
        serde_json::from_str(&self.body).map_err(OpsError::from)
    }
}

#[derive(Debug, Clone)]
struct CsrfToken {
    value: String,
    expires_at: Instant,
}

/// Client for the content server's administrative APIs.
///
/// The anti-forgery token cache is the only mutable state; it is held under
/// a lock across check, fetch and store.
pub struct ContentClient {
    credentials: Credentials,
    http: Client,
    retry: RetryPolicy,
    timeout: Duration,
    csrf: Mutex<Option<CsrfToken>>,
}

impl ContentClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(credentials: Credentials) -> OpsResult<Self> {
        let config = HttpConfig::default()
            .with_timeout(DEFAULT_TIMEOUT)
            .with_invalid_certs_accepted(credentials.insecure_tls);
        Self::with_http_config(credentials, &config)
    }

    /// Create a new client with custom HTTP settings. TLS verification
    /// follows the credentials and `config.timeout` becomes the default
    /// per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn with_http_config(credentials: Credentials, config: &HttpConfig) -> OpsResult<Self> {
        let config = config.clone().with_invalid_certs_accepted(credentials.insecure_tls);
        if credentials.insecure_tls {
            warn!(base_url = %credentials.base_url, "TLS certificate verification is disabled");
        }
        let http = build_http_client(&config).map_err(|e| OpsError::Config(e.to_string()))?;

        Ok(Self {
            credentials,
            http,
            retry: RetryPolicy::with_defaults(),
            timeout: config.timeout,
            csrf: Mutex::new(None),
        })
    }

    /// Replace the retry configuration.
    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = RetryPolicy::new(config);
        self
    }

    /// Replace the default request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Credentials this client was built with.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Resolve a relative path against the base URL; absolute URLs pass
    /// through unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` when the result is not a valid URL.
    pub fn resolve_url(&self, path: &str) -> OpsResult<Url> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            let base = self.credentials.base_url.as_str().trim_end_matches('/');
            if path.starts_with('/') {
                format!("{base}{path}")
            } else {
                format!("{base}/{path}")
            }
        };
        Url::parse(&raw).map_err(|e| {
            let message = format!("Invalid request URL {}: {e}", redact_url(&raw));
            OpsError::operation(ErrorCode::InvalidUrl, message)
        })
    }

    /// Issue a request.
    ///
    /// # Errors
    ///
    /// Returns a transport error when no response arrives, or an HTTP error
    /// classified by status when the server answers with 400 or above, after
    /// retries are exhausted.
    #[instrument(
        skip(self, options),
        fields(method = %options.method, path = %redact_url(&options.path))
    )]
    pub async fn request(&self, options: RequestOptions) -> OpsResult<HttpResponse> {
        if !options.retry {
            return self.send_once(&options).await;
        }

        let policy = options
            .retry_config
            .clone()
            .map_or_else(|| self.retry.clone(), RetryPolicy::new);
        let options = &options;

        policy
            .execute_with_observer(
                || self.send_once(options),
                |attempt| {
                    warn!(
                        attempt = attempt.attempt + 1,
                        delay_ms = u64::try_from(attempt.delay.as_millis()).unwrap_or(u64::MAX),
                        code = %attempt.error.code(),
                        error = %attempt.error,
                        "Request failed, retrying"
                    );
                },
            )
            .await
    }

    /// Upload a binary as multipart form data. Uploads are not retried.
    ///
    /// # Errors
    ///
    /// Returns a transport or HTTP error like [`ContentClient::request`].
    #[instrument(
        skip(self, options),
        fields(path = %redact_url(&options.path), file_name = %options.file_name)
    )]
    pub async fn upload(&self, options: UploadOptions) -> OpsResult<HttpResponse> {
        let url = self.resolve_url(&options.path)?;

        let part = Part::bytes(options.content).file_name(options.file_name);
        let form = options
            .fields
            .into_iter()
            .fold(Form::new().part(UPLOAD_FIELD, part), |form, (name, value)| {
                form.text(name, value)
            });

        let mut builder = self
            .http
            .post(url.clone())
            .header(AUTHORIZATION, self.credentials.auth.header_value())
            .timeout(options.timeout.unwrap_or(self.timeout))
            .multipart(form);

        if let Some(token) = self.csrf_token().await {
            builder = builder.header(CSRF_HEADER, token);
        }

        debug!(url = %redact_url(url.as_str()), "Uploading");
        Self::dispatch(builder).await
    }

    async fn send_once(&self, options: &RequestOptions) -> OpsResult<HttpResponse> {
        let url = self.resolve_url(&options.path)?;

        let mut headers = HeaderMap::new();
        if options.authenticate {
            headers.insert(AUTHORIZATION, header_value(&self.credentials.auth.header_value())?);
        }
        if is_write(&options.method) {
            if let Some(token) = self.csrf_token().await {
                headers.insert(HeaderName::from_static(CSRF_HEADER), header_value(&token)?);
            }
        }
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                let message = format!("Invalid header name: {name}");
                OpsError::operation(ErrorCode::RequestFailed, message)
            })?;
            headers.insert(name, header_value(value)?);
        }

        let mut builder = self
            .http
            .request(options.method.clone(), url.clone())
            .timeout(options.timeout.unwrap_or(self.timeout))
            .headers(headers);

        builder = match &options.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            None => builder,
        };

        debug!(
            method = %options.method,
            url = %redact_url(url.as_str()),
            headers = ?redact_headers(&options.headers),
            "Sending request"
        );
        Self::dispatch(builder).await
    }

    async fn dispatch(builder: RequestBuilder) -> OpsResult<HttpResponse> {
        let started = Instant::now();
        let response = builder.send().await.map_err(|e| OpsError::transport(&e))?;
        Self::read_response(response, started).await
    }

    async fn read_response(response: Response, started: Instant) -> OpsResult<HttpResponse> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| OpsError::transport(&e))?;
        let latency = started.elapsed();

        if status >= 400 {
            let error = OpsError::http(status, &body, retry_after);
            warn!(
                status,
                code = %error.code(),
                detail = error.detail().unwrap_or_default(),
                "Request rejected"
            );
            return Err(error);
        }

        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        debug!(status, latency_ms, "Request succeeded");
        Ok(HttpResponse {
            status,
            headers,
            body,
            latency,
        })
    }

    /// Current anti-forgery token, fetching a fresh one when the cached
    /// token is missing or expired. Fetch failures are swallowed and the
    /// caller proceeds without a token.
    // TODO: write endpoints then fail with a bare 403; surface the token
    // failure in that error once product agrees on fail-fast behavior.
    async fn csrf_token(&self) -> Option<String> {
        if !self.credentials.csrf_enabled {
            return None;
        }

        let mut cache = self.csrf.lock().await;
        if let Some(token) = cache.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Some(token.value.clone());
        }

        match self.fetch_csrf_token().await {
            Ok(value) => {
                debug!("Fetched anti-forgery token");
                *cache = Some(CsrfToken {
                    value: value.clone(),
                    expires_at: Instant::now() + CSRF_TOKEN_TTL,
                });
                Some(value)
            }
            Err(error) => {
                warn!(
                    code = %error.code(),
                    error = %error,
                    "Anti-forgery token unavailable, continuing without it"
                );
                None
            }
        }
    }

    async fn fetch_csrf_token(&self) -> OpsResult<String> {
        let fetch = async {
            let url = self.resolve_url(CSRF_TOKEN_PATH)?;
            let builder = self
                .http
                .get(url)
                .header(AUTHORIZATION, self.credentials.auth.header_value())
                .timeout(self.timeout);
            let response = Self::dispatch(builder).await?;
            let body: Value = response.json()?;
            body.get("token")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    OpsError::operation(
                        ErrorCode::AntiForgeryTokenFailed,
                        "Response has no token field",
                    )
                })
        };

        fetch.await.map_err(|e| match e {
            OpsError::Operation {
                code: ErrorCode::AntiForgeryTokenFailed,
                ..
            } => e,
            other => OpsError::operation(
                ErrorCode::AntiForgeryTokenFailed,
                format!("Anti-forgery token request failed: {other}"),
            ),
        })
    }
}

fn is_write(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE)
}

fn header_value(value: &str) -> OpsResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| {
            OpsError::operation(
                ErrorCode::RequestFailed,
                "Header value contains invalid characters",
            )
        })
}
