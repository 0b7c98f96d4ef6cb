//! Shared proptest generators for content-ops crates.

use std::collections::BTreeMap;

use proptest::prelude::*;

/// Repository roots accepted without a warning.
pub const RECOGNIZED_ROOTS: &[&str] = &[
    "/content", "/apps", "/etc", "/conf", "/libs", "/var", "/home", "/tmp", "/oak:index",
];

/// Generate a recognized repository root.
pub fn recognized_root_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(RECOGNIZED_ROOTS).prop_map(str::to_string)
}

/// Generate valid paths under a recognized root.
pub fn content_path_strategy() -> impl Strategy<Value = String> {
    (recognized_root_strategy(), prop::collection::vec("[a-z][a-z0-9-]{0,12}", 0..4))
        .prop_map(|(root, segments)| {
            segments
                .iter()
                .fold(root, |path, segment| format!("{path}/{segment}"))
        })
}

/// Generate paths containing a parent-directory sequence.
pub fn traversal_path_strategy() -> impl Strategy<Value = String> {
    (content_path_strategy(), "[a-z]{1,10}").prop_map(|(base, tail)| format!("{base}/../{tail}"))
}

/// Generate https URLs under `example.com`.
pub fn example_url_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{1,8}", prop::collection::vec("[a-z0-9-]{1,10}", 0..3)).prop_map(|(host, segments)| {
        format!("https://{host}.example.com/{}", segments.join("/"))
    })
}

/// Generate a list that repeats some of its entries.
pub fn list_with_duplicates_strategy<S>(
    item: S,
    max_len: usize,
) -> impl Strategy<Value = Vec<String>>
where
    S: Strategy<Value = String>,
{
    prop::collection::vec(item, 1..=max_len.max(1)).prop_flat_map(|unique| {
        let len = unique.len();
        prop::collection::vec(0..len, len..len * 2).prop_map(move |picks| {
            picks.into_iter().map(|i| unique[i].clone()).collect()
        })
    })
}

const SENSITIVE_FRAGMENTS: &[&str] = &["token", "auth", "secret", "key", "pass", "credential"];

/// Generate header maps with non-sensitive names.
pub fn plain_headers_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("x-[a-z]{3,10}", "[a-zA-Z0-9]{1,16}", 0..6)
        .prop_filter("header name must not look sensitive", |headers| {
            headers.keys().all(|k| !SENSITIVE_FRAGMENTS.iter().any(|s| k.contains(s)))
        })
}

/// Generate HTTP status codes seen from the content server.
pub fn http_status_code_strategy() -> impl Strategy<Value = u16> {
    prop::sample::select(vec![200u16, 201, 204, 400, 401, 403, 404, 408, 429, 500, 502, 503, 504])
}

/// Generate batch sizes.
pub fn batch_size_strategy() -> impl Strategy<Value = usize> {
    1usize..12
}
