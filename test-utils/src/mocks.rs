//! Mock content server built on wiremock.
//!
//! Each `with_*` helper mounts one endpoint; request inspection helpers read
//! back what the server received.

use std::collections::BTreeMap;

use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::fixtures::{csrf_token_body, package_list_json};

/// Anti-forgery token endpoint.
pub const CSRF_PATH: &str = "/libs/granite/csrf/token.json";

/// Login page probe.
pub const LOGIN_PATH: &str = "/libs/granite/core/content/login.html";

/// Replication endpoint.
pub const REPLICATE_PATH: &str = "/bin/replicate.json";

/// Package service endpoint.
pub const PACKAGE_SERVICE_PATH: &str = "/crx/packmgr/service/.json";

/// Package listing endpoint.
pub const PACKAGE_LIST_PATH: &str = "/crx/packmgr/list.jsp";

/// A mock content server.
pub struct MockContentServer {
    server: MockServer,
}

impl MockContentServer {
    /// Start a server with nothing mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL of the server.
    #[must_use]
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The underlying wiremock server.
    #[must_use]
    pub const fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `token` from the anti-forgery endpoint.
    pub async fn with_csrf_token(&self, token: &str) -> &Self {
        Mock::given(method("GET"))
            .and(path(CSRF_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(csrf_token_body(token)))
            .mount(&self.server)
            .await;
        self
    }

    /// Answer the health root with `status`.
    pub async fn with_health(&self, status: u16) -> &Self {
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(status).set_body_string("OK"))
            .mount(&self.server)
            .await;
        self
    }

    /// Answer the login page with `status`.
    pub async fn with_login(&self, status: u16) -> &Self {
        Mock::given(method("GET"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string("<html>login</html>"))
            .mount(&self.server)
            .await;
        self
    }

    /// Answer replication with `status`.
    pub async fn with_replication(&self, status: u16) -> &Self {
        Mock::given(method("POST"))
            .and(path(REPLICATE_PATH))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(serde_json::json!({ "status": status })),
            )
            .mount(&self.server)
            .await;
        self
    }

    /// Answer package uploads with `response`.
    pub async fn with_package_upload(&self, response: ResponseTemplate) -> &Self {
        Mock::given(method("POST"))
            .and(path(format!("{PACKAGE_SERVICE_PATH}/")))
            .and(query_param("cmd", "upload"))
            .respond_with(response)
            .mount(&self.server)
            .await;
        self
    }

    /// Answer the install of `package_id` with `response`.
    pub async fn with_package_install(
        &self,
        package_id: &str,
        response: ResponseTemplate,
    ) -> &Self {
        Mock::given(method("POST"))
            .and(path(format!("{PACKAGE_SERVICE_PATH}{package_id}")))
            .and(query_param("cmd", "install"))
            .respond_with(response)
            .mount(&self.server)
            .await;
        self
    }

    /// Serve the sample package listing.
    pub async fn with_package_list(&self) -> &Self {
        Mock::given(method("GET"))
            .and(path(PACKAGE_LIST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(package_list_json()))
            .mount(&self.server)
            .await;
        self
    }

    /// Every received request matching `http_method` and `url_path`.
    pub async fn requests_to(&self, http_method: &str, url_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == url_path)
            .collect()
    }

    /// Number of received requests matching `http_method` and `url_path`.
    pub async fn count(&self, http_method: &str, url_path: &str) -> usize {
        self.requests_to(http_method, url_path).await.len()
    }
}

/// Decode a URL-encoded request body.
#[must_use]
pub fn form_fields(request: &Request) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(&request.body).into_owned().collect()
}

/// Value of a request header, if present and UTF-8.
#[must_use]
pub fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Decode a JSON request body.
#[must_use]
pub fn json_body(request: &Request) -> Option<Value> {
    serde_json::from_slice(&request.body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mounted_health_answers() {
        let server = MockContentServer::start().await;
        server.with_health(200).await;

        let count_before = server.count("GET", "/").await;
        assert_eq!(count_before, 0);
        assert!(server.uri().starts_with("http://"));
    }
}
