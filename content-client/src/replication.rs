//! Content replication (activate / deactivate).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::validation::{parse_path_list, validate_path};
use ops_common::{ErrorCode, OpsContext, OpsError, OpsResult, PathScope, ValidationResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::batch::{
    ActionOutcome, BatchAction, BatchOptions, BatchOutput, FailurePolicy, run_batched,
};
use crate::client::{ContentClient, RequestOptions};

/// Replication endpoint.
pub const REPLICATE_PATH: &str = "/bin/replicate.json";

/// Replication action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationAction {
    /// Publish
    Activate,
    /// Unpublish
    Deactivate,
}

impl ReplicationAction {
    /// Command name sent to the server.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        match self {
            Self::Activate => "Activate",
            Self::Deactivate => "Deactivate",
        }
    }

    /// Lowercase name used in outputs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
        }
    }
}

impl fmt::Display for ReplicationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationAction {
    type Err = OpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "activate" => Ok(Self::Activate),
            "deactivate" => Ok(Self::Deactivate),
            other => Err(OpsError::Config(format!("unknown replication action: {other}"))),
        }
    }
}

/// Replication parameters.
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Repository paths
    pub paths: Vec<String>,
    /// Action applied to every path
    pub action: ReplicationAction,
    /// Batching parameters
    pub batch: BatchOptions,
    /// What failed paths produce
    pub failure_policy: FailurePolicy,
}

impl ReplicationOptions {
    /// Create options for a list of paths.
    #[must_use]
    pub fn new(action: ReplicationAction, paths: Vec<String>) -> Self {
        Self {
            paths,
            action,
            batch: BatchOptions::default(),
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Create options from free text, one path per line or separated by
    /// commas or semicolons.
    #[must_use]
    pub fn from_text(action: ReplicationAction, text: &str) -> Self {
        Self::new(action, parse_path_list(text))
    }

    /// Set batching parameters.
    #[must_use]
    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = batch;
        self
    }

    /// Set the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Outcome for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationPathResult {
    /// Repository path
    pub path: String,
    /// Action applied
    pub action: ReplicationAction,
    /// Whether a live call was attempted
    pub requested: bool,
    /// Whether the path succeeded
    pub ok: bool,
    /// Response status
    pub status_code: u16,
    /// Human readable message
    pub message: String,
    /// Call duration in milliseconds
    pub duration_ms: u64,
    /// When the result was produced
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a replication run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationOutput {
    /// True iff no path failed
    pub ok: bool,
    /// Number of results
    pub total_paths: usize,
    /// Successful paths
    pub success_count: usize,
    /// Failed paths
    pub failure_count: usize,
    /// Whether the run was simulated
    pub dry_run: bool,
    /// Results in input order
    pub results: Vec<ReplicationPathResult>,
    /// When the run finished
    pub timestamp: DateTime<Utc>,
}

impl ReplicationOutput {
    fn from_batch(batch: BatchOutput, action: ReplicationAction) -> Self {
        Self {
            ok: batch.ok,
            total_paths: batch.total_items,
            success_count: batch.success_count,
            failure_count: batch.failure_count,
            dry_run: batch.dry_run,
            results: batch
                .results
                .into_iter()
                .map(|r| ReplicationPathResult {
                    duration_ms: r.duration_ms(),
                    path: r.id,
                    action,
                    requested: r.requested,
                    ok: r.ok,
                    status_code: r.status_code,
                    message: r.message,
                    timestamp: r.timestamp,
                })
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

struct Replicator<'a> {
    client: &'a ContentClient,
    action: ReplicationAction,
}

#[async_trait]
impl<'a> BatchAction for Replicator<'a> {
    fn validate(&self, item: &str) -> ValidationResult {
        if validate_path(item)? == PathScope::Unrecognized {
            debug!(path = %item, "Path is outside the well-known roots");
        }
        Ok(())
    }

    fn describe(&self, item: &str) -> String {
        format!("would {} {item}", self.action)
    }

    async fn execute(&self, item: &str) -> OpsResult<ActionOutcome> {
        let request = RequestOptions::post(REPLICATE_PATH).with_form(vec![
            ("cmd".to_string(), self.action.command().to_string()),
            ("path".to_string(), item.to_string()),
        ]);
        let response = self.client.request(request).await?;
        Ok(ActionOutcome {
            status: response.status,
            message: format!("{} succeeded", self.action.command()),
        })
    }
}

/// Activate or deactivate every path.
///
/// # Errors
///
/// Returns `InvalidPath` for an empty path list, and `ReplicationFailed`
/// when any path fails under [`FailurePolicy::Fail`].
#[instrument(
    skip_all,
    fields(action = %options.action, paths = options.paths.len(), dry_run = options.batch.dry_run)
)]
pub async fn replicate(
    ctx: &OpsContext,
    client: &ContentClient,
    options: &ReplicationOptions,
) -> OpsResult<ReplicationOutput> {
    ctx.log_notice_once();

    if options.paths.is_empty() {
        return Err(OpsError::operation(ErrorCode::InvalidPath, "At least one path is required"));
    }

    let replicator = Replicator {
        client,
        action: options.action,
    };
    let batch = run_batched(&options.paths, &options.batch, &replicator)
        .await
        .into_result(options.failure_policy, ErrorCode::ReplicationFailed)?;

    Ok(ReplicationOutput::from_batch(batch, options.action))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(ReplicationAction::Activate.command(), "Activate");
        assert_eq!(ReplicationAction::Deactivate.command(), "Deactivate");
        assert_eq!(ReplicationAction::Deactivate.to_string(), "deactivate");
        assert_eq!(" Activate ".parse::<ReplicationAction>().unwrap(), ReplicationAction::Activate);
        assert!("publish".parse::<ReplicationAction>().is_err());
    }

    #[test]
    fn test_from_text_splits_paths() {
        let options = ReplicationOptions::from_text(
            ReplicationAction::Activate,
            "/content/a\n/content/b; /content/c,",
        );
        assert_eq!(options.paths, vec!["/content/a", "/content/b", "/content/c"]);
    }

    #[test]
    fn test_result_serialization() {
        let result = ReplicationPathResult {
            path: "/content/a".to_string(),
            action: ReplicationAction::Activate,
            requested: true,
            ok: true,
            status_code: 200,
            message: "Activate succeeded".to_string(),
            duration_ms: 5,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["action"], "activate");
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["durationMs"], 5);
    }
}
