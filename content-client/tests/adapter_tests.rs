//! Adapter flows against a mock content server.

use std::time::Duration;

use content_client::batch::ALREADY_PROCESSED;
use content_client::{
    BatchOptions, ContentClient, Credentials, FailurePolicy, HealthCheckOptions, PackageOptions,
    PurgeMethod, PurgeOptions, ReplicationAction, ReplicationOptions, check_health, deploy_package,
    list_packages, purge_cache, replicate,
};
use ops_common::{ErrorCode, OpsContext, OpsError, RetryConfig};
use test_utils::fixtures::{
    SAMPLE_PACKAGE_BYTES, SAMPLE_PACKAGE_ID, package_failure_json, package_install_html,
    package_install_json, package_upload_html, package_upload_json,
};
use test_utils::mocks::{
    LOGIN_PATH, MockContentServer, PACKAGE_SERVICE_PATH, REPLICATE_PATH, form_fields, header,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn client_for(server: &MockContentServer) -> ContentClient {
    let credentials = Credentials::basic(&server.uri(), "admin", "admin")
        .unwrap()
        .with_csrf(false);
    ContentClient::new(credentials)
        .unwrap()
        .with_retry_config(RetryConfig::default().with_max_retries(0))
}

fn paths(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

// Health

#[tokio::test]
async fn test_health_check_with_login_probe() {
    let server = MockContentServer::start().await;
    server.with_health(200).await.with_login(200).await;
    let ctx = OpsContext::new();

    let output = check_health(&ctx, &client_for(&server), &HealthCheckOptions::default())
        .await
        .unwrap();

    assert!(output.ok);
    assert_eq!(output.status_code, 200);
    assert_eq!(output.checked_url, format!("{}/", server.uri()));
    assert_eq!(output.notes.len(), 2);
    assert!(output.notes[1].contains("ready (status 200)"));
    assert!(ctx.notice_logged());

    let probes = server.requests_to("GET", LOGIN_PATH).await;
    assert!(header(&probes[0], "authorization").is_none());
}

#[tokio::test]
async fn test_health_check_failure_is_reported() {
    let server = MockContentServer::start().await;
    server.with_health(503).await;
    let ctx = OpsContext::new();
    let client = client_for(&server);

    let output = check_health(&ctx, &client, &HealthCheckOptions::default())
        .await
        .unwrap();
    assert!(!output.ok);
    assert_eq!(output.status_code, 503);
    assert_eq!(output.notes.len(), 1);

    let error = check_health(
        &ctx,
        &client,
        &HealthCheckOptions::default().with_failure_policy(FailurePolicy::Fail),
    )
    .await
    .unwrap_err();
    assert_eq!(error.code(), ErrorCode::HealthCheckFailed);
}

#[tokio::test]
async fn test_health_check_unresolvable_path_is_reported() {
    let server = MockContentServer::start().await;
    let ctx = OpsContext::new();
    let client = client_for(&server);
    let options = HealthCheckOptions::default().with_path("http://");

    let output = check_health(&ctx, &client, &options).await.unwrap();
    assert!(!output.ok);
    assert_eq!(output.status_code, 0);
    assert_eq!(output.checked_url, "http://");
    assert_eq!(output.notes.len(), 1);
    assert_eq!(server.count("GET", "/").await, 0);

    let error = check_health(&ctx, &client, &options.with_failure_policy(FailurePolicy::Fail))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::HealthCheckFailed);
}

#[tokio::test]
async fn test_health_check_without_probe() {
    let server = MockContentServer::start().await;
    server.with_health(200).await;

    let output = check_health(
        &OpsContext::new(),
        &client_for(&server),
        &HealthCheckOptions::default().without_login_probe(),
    )
    .await
    .unwrap();

    assert_eq!(output.notes.len(), 1);
    assert_eq!(server.count("GET", LOGIN_PATH).await, 0);
}

// Replication

#[tokio::test]
async fn test_replication_posts_form_per_path() {
    let server = MockContentServer::start().await;
    server.with_replication(200).await;

    let options = ReplicationOptions::new(
        ReplicationAction::Deactivate,
        paths(&["/content/site/a", "/content/site/b"]),
    );
    let output = replicate(&OpsContext::new(), &client_for(&server), &options)
        .await
        .unwrap();

    assert!(output.ok);
    assert_eq!(output.total_paths, 2);
    let posts = server.requests_to("POST", REPLICATE_PATH).await;
    assert_eq!(posts.len(), 2);
    let fields = form_fields(&posts[1]);
    assert_eq!(fields["cmd"], "Deactivate");
    assert_eq!(fields["path"], "/content/site/b");
    assert!(output.results.iter().all(|r| r.requested && r.status_code == 200));
}

#[tokio::test]
async fn test_replication_invalid_path_skips_call() {
    let server = MockContentServer::start().await;
    server.with_replication(200).await;
    let client = client_for(&server);
    let input = paths(&["/content/../etc/passwd", "/content/site"]);

    let output = replicate(
        &OpsContext::new(),
        &client,
        &ReplicationOptions::new(ReplicationAction::Activate, input.clone()),
    )
    .await
    .unwrap();

    assert!(!output.ok);
    assert_eq!(output.failure_count, 1);
    assert_eq!(output.results[0].status_code, 400);
    assert!(!output.results[0].requested);
    assert_eq!(server.count("POST", REPLICATE_PATH).await, 1);

    let error = replicate(
        &OpsContext::new(),
        &client,
        &ReplicationOptions::new(ReplicationAction::Activate, input)
            .with_failure_policy(FailurePolicy::Fail),
    )
    .await
    .unwrap_err();
    assert_eq!(error.code(), ErrorCode::ReplicationFailed);
    match error {
        OpsError::Aggregate { failures, .. } => {
            assert_eq!(failures[0].id, "/content/../etc/passwd");
        }
        other => panic!("expected aggregate error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_replication_server_error_is_captured() {
    let server = MockContentServer::start().await;
    server.with_replication(500).await;

    let output = replicate(
        &OpsContext::new(),
        &client_for(&server),
        &ReplicationOptions::new(ReplicationAction::Activate, paths(&["/content/a"])),
    )
    .await
    .unwrap();

    assert!(!output.ok);
    assert_eq!(output.results[0].status_code, 500);
    assert!(output.results[0].requested);
}

#[tokio::test]
async fn test_replication_requires_paths() {
    let server = MockContentServer::start().await;
    let error = replicate(
        &OpsContext::new(),
        &client_for(&server),
        &ReplicationOptions::new(ReplicationAction::Activate, vec![]),
    )
    .await
    .unwrap_err();
    assert_eq!(error.code(), ErrorCode::InvalidPath);
}

// Package

#[tokio::test]
async fn test_package_json_upload_and_install() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(
            ResponseTemplate::new(200).set_body_json(package_upload_json(SAMPLE_PACKAGE_ID)),
        )
        .await
        .with_package_install(
            SAMPLE_PACKAGE_ID,
            ResponseTemplate::new(200).set_body_json(package_install_json()),
        )
        .await;

    let output = deploy_package(
        &OpsContext::new(),
        &client_for(&server),
        PackageOptions::new(SAMPLE_PACKAGE_BYTES.to_vec()).with_name("site-content"),
    )
    .await
    .unwrap();

    assert!(output.ok);
    assert!(output.uploaded);
    assert!(output.installed);
    assert_eq!(output.package_name, "site-content.zip");
    assert_eq!(output.package_id.as_deref(), Some(SAMPLE_PACKAGE_ID));
    assert!(output.logs.contains(&"A /content/site".to_string()));
    assert_eq!(
        server
            .count("POST", &format!("{PACKAGE_SERVICE_PATH}{SAMPLE_PACKAGE_ID}"))
            .await,
        1
    );
}

#[tokio::test]
async fn test_package_markup_upload_and_install() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(
            ResponseTemplate::new(200).set_body_string(package_upload_html(SAMPLE_PACKAGE_ID)),
        )
        .await
        .with_package_install(
            SAMPLE_PACKAGE_ID,
            ResponseTemplate::new(200).set_body_string(package_install_html()),
        )
        .await;

    let output = deploy_package(
        &OpsContext::new(),
        &client_for(&server),
        PackageOptions::new(SAMPLE_PACKAGE_BYTES.to_vec()),
    )
    .await
    .unwrap();

    assert!(output.ok);
    assert_eq!(output.package_id.as_deref(), Some(SAMPLE_PACKAGE_ID));
    assert!(output.package_name.starts_with("package-"));
    assert!(output.logs.iter().any(|l| l.contains("Package installed")));
    assert!(output.logs.iter().all(|l| !l.contains('<')));
}

#[tokio::test]
async fn test_package_upload_failure_stops_before_install() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(
            ResponseTemplate::new(200).set_body_json(package_failure_json("Invalid package")),
        )
        .await;
    let client = client_for(&server);

    let output = deploy_package(&OpsContext::new(), &client, PackageOptions::new(vec![1, 2, 3]))
        .await
        .unwrap();
    assert!(!output.ok);
    assert!(!output.uploaded);
    assert!(output.logs.iter().any(|l| l.contains("Invalid package")));

    let error = deploy_package(
        &OpsContext::new(),
        &client,
        PackageOptions::new(vec![1, 2, 3]).with_failure_policy(FailurePolicy::Fail),
    )
    .await
    .unwrap_err();
    assert_eq!(error.code(), ErrorCode::PackageUploadFailed);
}

#[tokio::test]
async fn test_package_upload_http_error() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(ResponseTemplate::new(403).set_body_string("forbidden"))
        .await;

    let output = deploy_package(
        &OpsContext::new(),
        &client_for(&server),
        PackageOptions::new(vec![1]),
    )
    .await
    .unwrap();

    assert!(!output.ok);
    assert_eq!(output.status_code, 403);
}

#[tokio::test]
async fn test_package_install_failure() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(
            ResponseTemplate::new(200).set_body_json(package_upload_json(SAMPLE_PACKAGE_ID)),
        )
        .await
        .with_package_install(
            SAMPLE_PACKAGE_ID,
            ResponseTemplate::new(200).set_body_json(package_failure_json("Dependency missing")),
        )
        .await;
    let client = client_for(&server);

    let output = deploy_package(&OpsContext::new(), &client, PackageOptions::new(vec![1]))
        .await
        .unwrap();
    assert!(!output.ok);
    assert!(output.uploaded);
    assert!(!output.installed);

    let error = deploy_package(
        &OpsContext::new(),
        &client,
        PackageOptions::new(vec![1]).with_failure_policy(FailurePolicy::Fail),
    )
    .await
    .unwrap_err();
    assert_eq!(error.code(), ErrorCode::PackageInstallFailed);
}

#[tokio::test]
async fn test_package_upload_only() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(
            ResponseTemplate::new(200).set_body_json(package_upload_json(SAMPLE_PACKAGE_ID)),
        )
        .await;

    let output = deploy_package(
        &OpsContext::new(),
        &client_for(&server),
        PackageOptions::new(vec![1]).without_install(),
    )
    .await
    .unwrap();

    assert!(output.ok);
    assert!(!output.installed);
    assert_eq!(
        server
            .count("POST", &format!("{PACKAGE_SERVICE_PATH}{SAMPLE_PACKAGE_ID}"))
            .await,
        0
    );
}

#[tokio::test]
async fn test_package_install_skipped_without_id() {
    let server = MockContentServer::start().await;
    server
        .with_package_upload(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })),
        )
        .await;

    let output = deploy_package(
        &OpsContext::new(),
        &client_for(&server),
        PackageOptions::new(vec![1]),
    )
    .await
    .unwrap();

    assert!(!output.ok);
    assert!(output.uploaded);
    assert!(output.logs.iter().any(|l| l.contains("install skipped")));
}

#[tokio::test]
async fn test_package_dry_run_makes_no_calls() {
    let server = MockContentServer::start().await;

    let output = deploy_package(
        &OpsContext::new(),
        &client_for(&server),
        PackageOptions::new(vec![1]).with_name("site").with_dry_run(true),
    )
    .await
    .unwrap();

    assert!(output.ok);
    assert!(output.dry_run);
    assert!(!output.uploaded);
    assert!(output.package_id.is_none());
    assert_eq!(output.status_code, 0);
    assert!(server.server().received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_packages() {
    let server = MockContentServer::start().await;
    server.with_package_list().await;

    let packages = list_packages(&client_for(&server)).await.unwrap();

    assert_eq!(packages.len(), 2);
    assert!(packages[0].installed());
    assert!(!packages[1].installed());
}

// Purge

async fn mount_purge(server: &MockContentServer, verb: &str, url_path: &str, status: u16) {
    Mock::given(method(verb))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status))
        .mount(server.server())
        .await;
}

#[tokio::test]
async fn test_purge_sends_custom_method_and_headers() {
    let server = MockContentServer::start().await;
    mount_purge(&server, "PURGE", "/page.html", 200).await;
    mount_purge(&server, "PURGE", "/gone.html", 404).await;

    let options = PurgeOptions::new(vec![
        format!("{}/page.html", server.uri()),
        format!("{}/gone.html", server.uri()),
    ])
    .with_header("X-Purge-Key", "k-123")
    .with_allowlist(r"^http://127\.0\.0\.1:\d+/.*$");
    let output = purge_cache(&OpsContext::new(), &options).await.unwrap();

    assert_eq!(output.total_urls, 2);
    assert_eq!(output.success_count, 1);
    assert_eq!(output.results[1].status_code, 404);
    assert!(!output.results[1].ok);

    let purges = server.requests_to("PURGE", "/page.html").await;
    assert_eq!(header(&purges[0], "x-purge-key").as_deref(), Some("k-123"));
    assert!(header(&purges[0], "authorization").is_none());
}

#[tokio::test]
async fn test_purge_with_post_and_allowlist_violation() {
    let server = MockContentServer::start().await;
    mount_purge(&server, "POST", "/page.html", 200).await;

    let options = PurgeOptions::new(vec![
        format!("{}/page.html", server.uri()),
        "https://evil.com/x".to_string(),
    ])
    .with_method(PurgeMethod::Post)
    .with_allowlist(r"^http://127\.0\.0\.1:\d+/.*$");
    let output = purge_cache(&OpsContext::new(), &options).await.unwrap();

    assert!(!output.ok);
    assert!(output.results[0].ok);
    assert_eq!(output.results[1].status_code, 400);
    assert!(!output.results[1].requested);
    assert_eq!(server.count("POST", "/page.html").await, 1);

    let error = purge_cache(&OpsContext::new(), &options.with_failure_policy(FailurePolicy::Fail))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::PurgeFailed);
}

#[tokio::test]
async fn test_purge_duplicates_and_throttle() {
    let server = MockContentServer::start().await;
    mount_purge(&server, "PURGE", "/a", 200).await;
    let url = format!("{}/a", server.uri());

    let options = PurgeOptions::new(vec![url.clone(), url]).with_batch(
        BatchOptions::default()
            .with_batch_size(1)
            .with_throttle(Duration::from_millis(5)),
    );
    let output = purge_cache(&OpsContext::new(), &options).await.unwrap();

    assert!(output.ok);
    assert_eq!(output.results[1].message, ALREADY_PROCESSED);
    assert_eq!(server.count("PURGE", "/a").await, 1);
}
