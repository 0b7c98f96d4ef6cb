//! Content server administrative API client.
//!
//! A [`ContentClient`] wraps authentication, anti-forgery tokens, retry and
//! redaction around single requests. The adapters build on it:
//! [`check_health`], [`replicate`], [`deploy_package`] and, with its own
//! unauthenticated client, [`purge_cache`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod client;
pub mod config;
pub mod health;
pub mod package;
pub mod purge;
pub mod replication;

pub use batch::{
    BatchOptions, BatchOutput, FailurePolicy, OperationResult, dedupe_preserving_order, run_batched,
};
pub use client::{ContentClient, HttpResponse, RequestBody, RequestOptions, UploadOptions};
pub use config::{AuthScheme, ConfigError, Credentials};
pub use health::{HealthCheckOptions, HealthCheckOutput, check_health};
pub use package::{
    PackageInfo, PackageOptions, PackageOutput, ParsedPackageResponse, deploy_package,
    effective_package_name, list_packages,
};
pub use purge::{CachePurgeOutput, PurgeMethod, PurgeOptions, PurgeUrlResult, purge_cache};
pub use replication::{
    ReplicationAction, ReplicationOptions, ReplicationOutput, ReplicationPathResult, replicate,
};
