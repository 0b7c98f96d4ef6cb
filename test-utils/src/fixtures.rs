//! Canned content server responses.

use serde_json::{Value, json};

/// `Authorization` header for `admin:admin`.
pub const ADMIN_BASIC_AUTH: &str = "Basic YWRtaW46YWRtaW4=";

/// Package id used across fixtures.
pub const SAMPLE_PACKAGE_ID: &str = "/etc/packages/my_packages/site-content.zip";

/// Smallest byte sequence that starts like a zip archive.
pub const SAMPLE_PACKAGE_BYTES: &[u8] = b"PK\x03\x04sample-package";

/// Anti-forgery token endpoint body.
#[must_use]
pub fn csrf_token_body(token: &str) -> Value {
    json!({ "token": token })
}

/// Successful JSON upload response.
#[must_use]
pub fn package_upload_json(package_id: &str) -> Value {
    json!({
        "success": true,
        "msg": "Package uploaded",
        "path": package_id,
    })
}

/// Successful JSON install response.
#[must_use]
pub fn package_install_json() -> Value {
    json!({
        "success": true,
        "msg": "Package installed",
        "log": ["Installing content", "A /content/site", "Package imported."],
    })
}

/// Failed JSON response.
#[must_use]
pub fn package_failure_json(message: &str) -> Value {
    json!({ "success": false, "msg": message })
}

/// Successful markup upload response naming `package_id`.
#[must_use]
pub fn package_upload_html(package_id: &str) -> String {
    format!(
        "<html><body><div id=\"Status\">200</div><div id=\"Message\">Package uploaded</div>\
         <div id=\"Path\">{package_id}</div></body></html>"
    )
}

/// Successful markup install response.
#[must_use]
pub fn package_install_html() -> String {
    "<html><body><pre>\nInstalling content\nA /content/site\nA /content/site/en\n</pre>\
     <p>Package installed in 87ms.</p></body></html>"
        .to_string()
}

/// Package listing with one installed and one uploaded package.
#[must_use]
pub fn package_list_json() -> Value {
    json!({
        "results": [
            {
                "pid": "my_packages:site-content:1.0",
                "path": SAMPLE_PACKAGE_ID,
                "name": "site-content",
                "group": "my_packages",
                "version": "1.0",
                "size": 2048,
                "lastUnpacked": 1_700_000_000_000_i64,
            },
            {
                "pid": "my_packages:apps:2.1",
                "path": "/etc/packages/my_packages/apps-2.1.zip",
                "name": "apps",
                "group": "my_packages",
                "version": "2.1",
                "size": 512,
            }
        ],
        "total": 2,
    })
}
