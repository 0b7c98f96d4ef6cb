//! Sequential batched execution shared by replication and cache purge.
//!
//! Items are processed strictly in order, batch by batch, with an optional
//! throttle between batches. A repeated item is answered from the seen-set
//! instead of issuing a second call. Per-item failures never abort the run;
//! they are captured in the item's [`OperationResult`].

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ops_common::redaction::redact_error_message;
use ops_common::{ErrorCode, ItemFailure, OpsError, OpsResult, ValidationResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default number of items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Message recorded for a repeated item.
pub const ALREADY_PROCESSED: &str = "Already processed in this run";

/// Prefix of every simulated result message.
pub const DRY_RUN_PREFIX: &str = "[dry run]";

/// Batching parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Items per batch (at least 1)
    pub batch_size: usize,
    /// Pause between consecutive batches
    pub throttle: Duration,
    /// Validate and batch without issuing any call
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            throttle: Duration::ZERO,
            dry_run: false,
        }
    }
}

impl BatchOptions {
    /// Set the batch size; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the pause between batches.
    #[must_use]
    pub const fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// What to do when at least one item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Report failures in the output and return it.
    #[default]
    Continue,
    /// Turn any failure into an error.
    Fail,
}

/// Status and message reported by a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Response status
    pub status: u16,
    /// Human readable message
    pub message: String,
}

/// Outcome of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    /// Path or URL
    pub id: String,
    /// Whether a live call was attempted
    pub requested: bool,
    /// Whether the item succeeded
    pub ok: bool,
    /// Response status, 400 for validation failures, 0 when no response
    pub status_code: u16,
    /// Human readable, redacted message
    pub message: String,
    /// When the result was produced
    pub timestamp: DateTime<Utc>,
    /// Call duration, when one was timed
    pub duration: Option<Duration>,
}

impl OperationResult {
    fn new(
        id: &str,
        requested: bool,
        ok: bool,
        status_code: u16,
        message: String,
        duration: Option<Duration>,
    ) -> Self {
        Self {
            id: id.to_string(),
            requested,
            ok,
            status_code,
            message,
            timestamp: Utc::now(),
            duration,
        }
    }

    /// Duration in whole milliseconds, zero when untimed.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.duration
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Aggregate over every item of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutput {
    /// Number of results
    pub total_items: usize,
    /// Successful results
    pub success_count: usize,
    /// Failed results
    pub failure_count: usize,
    /// Whether the run was simulated
    pub dry_run: bool,
    /// True iff nothing failed
    pub ok: bool,
    /// Results in input order
    pub results: Vec<OperationResult>,
}

impl BatchOutput {
    /// Build totals from results.
    #[must_use]
    pub fn from_results(results: Vec<OperationResult>, dry_run: bool) -> Self {
        let success_count = results.iter().filter(|r| r.ok).count();
        let failure_count = results.len() - success_count;
        Self {
            total_items: results.len(),
            success_count,
            failure_count,
            dry_run,
            ok: failure_count == 0,
            results,
        }
    }

    /// Every failed item with its message, in input order.
    #[must_use]
    pub fn failures(&self) -> Vec<ItemFailure> {
        self.results
            .iter()
            .filter(|r| !r.ok)
            .map(|r| ItemFailure {
                id: r.id.clone(),
                message: r.message.clone(),
            })
            .collect()
    }

    /// Apply a failure policy.
    ///
    /// # Errors
    ///
    /// With [`FailurePolicy::Fail`], returns an aggregate error carrying
    /// `code` when any item failed.
    pub fn into_result(self, policy: FailurePolicy, code: ErrorCode) -> OpsResult<Self> {
        if self.ok || policy == FailurePolicy::Continue {
            return Ok(self);
        }
        Err(OpsError::aggregate(code, self.failures()))
    }
}

/// The per-item behavior plugged into [`run_batched`].
#[async_trait]
pub trait BatchAction: Send + Sync {
    /// Check an item before any call is made.
    ///
    /// # Errors
    ///
    /// Returns the validation failure for an unusable item.
    fn validate(&self, item: &str) -> ValidationResult;

    /// Describe what the action would do, for dry-run messages.
    fn describe(&self, item: &str) -> String;

    /// Perform the call.
    async fn execute(&self, item: &str) -> OpsResult<ActionOutcome>;
}

/// Remove repeated items, keeping the first occurrence of each.
#[must_use]
pub fn dedupe_preserving_order(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

/// Run `action` over `items` sequentially in batches.
pub async fn run_batched<A>(items: &[String], options: &BatchOptions, action: &A) -> BatchOutput
where
    A: BatchAction + ?Sized,
{
    let batch_size = options.batch_size.max(1);
    let batch_count = items.len().div_ceil(batch_size);
    debug!(
        total = items.len(),
        unique = dedupe_preserving_order(items).len(),
        batch_size,
        batches = batch_count,
        dry_run = options.dry_run,
        "Starting batched run"
    );

    let mut seen: HashSet<&str> = HashSet::new();
    let mut results = Vec::with_capacity(items.len());

    for (index, batch) in items.chunks(batch_size).enumerate() {
        debug!(batch = index + 1, of = batch_count, size = batch.len(), "Processing batch");

        for item in batch {
            let result = if seen.insert(item.as_str()) {
                process_item(item, options.dry_run, action).await
            } else {
                debug!(item = %item, "Skipping repeated item");
                let message = ALREADY_PROCESSED.to_string();
                OperationResult::new(item, false, true, 0, message, Some(Duration::ZERO))
            };

            if !result.ok {
                warn!(
                    item = %result.id,
                    status = result.status_code,
                    message = %result.message,
                    "Item failed"
                );
            }
            results.push(result);
        }

        if index + 1 < batch_count && !options.throttle.is_zero() {
            tokio::time::sleep(options.throttle).await;
        }
    }

    let output = BatchOutput::from_results(results, options.dry_run);
    info!(
        total = output.total_items,
        succeeded = output.success_count,
        failed = output.failure_count,
        dry_run = output.dry_run,
        "Batched run finished"
    );
    output
}

async fn process_item<A>(item: &str, dry_run: bool, action: &A) -> OperationResult
where
    A: BatchAction + ?Sized,
{
    if let Err(error) = action.validate(item) {
        let message = redact_error_message(&error.message);
        return OperationResult::new(item, false, false, 400, message, None);
    }

    if dry_run {
        let message = format!("{DRY_RUN_PREFIX} {}", action.describe(item));
        return OperationResult::new(item, false, true, 0, message, None);
    }

    let started = Instant::now();
    match action.execute(item).await {
        Ok(outcome) => {
            let ok = (200..300).contains(&outcome.status);
            let duration = Some(started.elapsed());
            OperationResult::new(item, true, ok, outcome.status, outcome.message, duration)
        }
        Err(error) => OperationResult::new(
            item,
            true,
            false,
            error.status_code().unwrap_or(0),
            redact_error_message(&error.to_string()),
            Some(started.elapsed()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ops_common::validation::validate_path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl BatchAction for Recorder {
        fn validate(&self, item: &str) -> ValidationResult {
            validate_path(item).map(|_| ())
        }

        fn describe(&self, item: &str) -> String {
            format!("would touch {item}")
        }

        async fn execute(&self, item: &str) -> OpsResult<ActionOutcome> {
            self.calls.lock().unwrap().push(item.to_string());
            if self.failing.iter().any(|f| f == item) {
                return Err(OpsError::http(503, "busy", None));
            }
            Ok(ActionOutcome {
                status: 200,
                message: "done".to_string(),
            })
        }
    }

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_dedupe_preserving_order() {
        let input = items(&["/b", "/a", "/b", "/c", "/a"]);
        assert_eq!(dedupe_preserving_order(&input), items(&["/b", "/a", "/c"]));
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        assert_eq!(BatchOptions::default().with_batch_size(0).batch_size, 1);
    }

    #[tokio::test]
    async fn test_all_items_succeed_in_order() {
        let action = Recorder::default();
        let input = items(&["/content/a", "/content/b", "/content/c"]);
        let options = BatchOptions::default().with_batch_size(2);
        let output = run_batched(&input, &options, &action).await;

        assert!(output.ok);
        assert_eq!(output.success_count, 3);
        assert_eq!(*action.calls.lock().unwrap(), input);
        assert!(output.results.iter().all(|r| r.requested && r.duration.is_some()));
    }

    #[tokio::test]
    async fn test_duplicate_is_skipped_after_first_attempt() {
        let action = Recorder::default();
        let input = items(&["/content/a", "/content/a"]);
        let output = run_batched(&input, &BatchOptions::default(), &action).await;

        assert_eq!(output.total_items, 2);
        assert_eq!(action.calls.lock().unwrap().len(), 1);
        assert!(output.results[0].requested);
        assert!(!output.results[1].requested);
        assert_eq!(output.results[1].message, ALREADY_PROCESSED);
        assert_eq!(output.results[1].duration_ms(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_skips_call() {
        let action = Recorder::default();
        let input = items(&["/content/../etc", "/content/ok"]);
        let output = run_batched(&input, &BatchOptions::default(), &action).await;

        assert!(!output.ok);
        assert_eq!(output.results[0].status_code, 400);
        assert!(!output.results[0].requested);
        assert_eq!(*action.calls.lock().unwrap(), items(&["/content/ok"]));
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_calls() {
        let action = Recorder::default();
        let input = items(&["/content/a", "/content/b"]);
        let options = BatchOptions::default().with_dry_run(true);
        let output = run_batched(&input, &options, &action).await;

        assert!(output.ok);
        assert!(output.dry_run);
        assert!(action.calls.lock().unwrap().is_empty());
        assert!(output.results.iter().all(|r| !r.requested));
        assert_eq!(output.results[0].message, "[dry run] would touch /content/a");
    }

    #[tokio::test]
    async fn test_errors_are_captured_per_item() {
        let action = Recorder {
            failing: items(&["/content/b"]),
            ..Recorder::default()
        };
        let input = items(&["/content/a", "/content/b", "/content/c"]);
        let output = run_batched(&input, &BatchOptions::default(), &action).await;

        assert_eq!(output.success_count, 2);
        assert_eq!(output.failure_count, 1);
        assert_eq!(output.results[1].status_code, 503);
        assert_eq!(action.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fail_policy_aggregates_failures() {
        let action = Recorder {
            failing: items(&["/content/b"]),
            ..Recorder::default()
        };
        let input = items(&["/content/a", "/content/b"]);
        let output = run_batched(&input, &BatchOptions::default(), &action).await;

        let error = output
            .clone()
            .into_result(FailurePolicy::Fail, ErrorCode::ReplicationFailed)
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::ReplicationFailed);
        assert!(error.to_string().starts_with("1 item(s) failed: /content/b"));

        assert!(output.into_result(FailurePolicy::Continue, ErrorCode::ReplicationFailed).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_between_batches_only() {
        let action = Recorder::default();
        let input = items(&["/content/a", "/content/b", "/content/c"]);
        let options = BatchOptions::default()
            .with_batch_size(1)
            .with_throttle(Duration::from_secs(10));

        let started = tokio::time::Instant::now();
        run_batched(&input, &options, &action).await;
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }
}
