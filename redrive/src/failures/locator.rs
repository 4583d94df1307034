//! Discovery of failed map sub-tasks.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{group_failures, FailureIndex, FailureRecord};
use crate::core::Module;
use crate::errors::{CorruptArtifactError, RedriveError, Result};
use crate::ports::ObjectStore;
use crate::retry::CallPolicy;

const FAILED_STATUS: &str = "FAILED";

#[derive(Debug, Deserialize)]
struct MarkerEntry {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Input")]
    input: String,
}

/// Extracts the failed `context_index` values from one failure marker.
///
/// The marker is a JSON array of `{Status, Input}` entries where `Input`
/// is itself a JSON document. Only entries whose status is `FAILED`
/// contribute an index.
pub fn parse_failure_marker(key: &str, body: &[u8]) -> Result<Vec<u64>> {
    let entries: Vec<MarkerEntry> = serde_json::from_slice(body)
        .map_err(|e| CorruptArtifactError::new(key, format!("not a failure marker: {e}")))?;

    let mut indexes = Vec::new();
    for entry in entries.iter().filter(|e| e.status == FAILED_STATUS) {
        let input: serde_json::Value = serde_json::from_str(&entry.input)
            .map_err(|e| CorruptArtifactError::new(key, format!("Input is not JSON: {e}")))?;

        let index = match input.get("context_index") {
            Some(value) => value.as_u64().ok_or_else(|| {
                CorruptArtifactError::new(
                    key,
                    format!("context_index must be a non-negative integer, got {value}"),
                )
            })?,
            None => return Err(CorruptArtifactError::new(key, "Input has no context_index").into()),
        };
        indexes.push(index);
    }

    Ok(indexes)
}

/// Finds every failed sub-task recorded in the map-result bucket.
pub struct FailureLocator {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    failure_term: String,
    worker_limit: usize,
    policy: CallPolicy,
}

impl FailureLocator {
    /// Creates a locator for `bucket`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, policy: CallPolicy) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            failure_term: "FAILED".to_string(),
            worker_limit: 8,
            policy,
        }
    }

    /// Sets the term identifying failure marker keys.
    #[must_use]
    pub fn with_failure_term(mut self, term: impl Into<String>) -> Self {
        self.failure_term = term.into();
        self
    }

    /// Sets the number of markers downloaded concurrently.
    #[must_use]
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit.max(1);
        self
    }

    /// Lists, downloads and parses every failure marker.
    ///
    /// Indexes are grouped by the module named in the first key segment,
    /// in listing order and then entry order.
    pub async fn locate_failures(&self) -> Result<FailureIndex> {
        let keys = self
            .policy
            .run("list_map_results", || self.store.list(&self.bucket, None))
            .await?;

        let marker_keys: Vec<String> = keys
            .into_iter()
            .filter(|key| key.contains(&self.failure_term))
            .collect();
        debug!(
            bucket = %self.bucket,
            markers = marker_keys.len(),
            "Found failure markers"
        );

        let per_marker: Vec<Vec<FailureRecord>> = stream::iter(marker_keys)
            .map(|key| async move { self.read_marker(&key).await })
            .buffered(self.worker_limit)
            .try_collect()
            .await?;

        let index = group_failures(per_marker.into_iter().flatten());
        let total: usize = index.values().map(Vec::len).sum();
        info!(bucket = %self.bucket, failures = total, modules = index.len(), "Located failures");
        Ok(index)
    }

    async fn read_marker(&self, key: &str) -> Result<Vec<FailureRecord>> {
        let module = Module::from_key(key).map_err(|e| match e {
            RedriveError::UnknownModule(name) => {
                CorruptArtifactError::new(key, format!("unknown module '{name}'")).into()
            }
            other => other,
        });
        let module = match module {
            Ok(module) => module,
            Err(e) => {
                error!(bucket = %self.bucket, key, error = %e, "Failure marker has no known module");
                return Err(e);
            }
        };

        let body = self
            .policy
            .run("get_failure_marker", || self.store.get(&self.bucket, key))
            .await?;

        let indexes = parse_failure_marker(key, &body).map_err(|e| {
            error!(bucket = %self.bucket, key, module = %module, error = %e, "Unreadable failure marker");
            e
        })?;

        Ok(indexes
            .into_iter()
            .map(|index| FailureRecord { module, index })
            .collect())
    }
}
