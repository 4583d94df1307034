//! Finding the single execution that produced the current map results.

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::dispatch::ExecutionArn;
use crate::errors::{CorruptArtifactError, RedriveError, Result};
use crate::ports::{ObjectStore, Orchestrator};
use crate::retry::CallPolicy;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "MapRunArn")]
    map_run_arn: String,
}

/// Reads the map run ARN out of a manifest marker.
pub fn parse_manifest(key: &str, body: &[u8]) -> Result<String> {
    let manifest: Manifest = serde_json::from_slice(body)
        .map_err(|e| CorruptArtifactError::new(key, format!("not a manifest: {e}")))?;
    Ok(manifest.map_run_arn)
}

/// Resolves manifest markers to their owning execution.
pub struct ExecutionCorrelator {
    store: Arc<dyn ObjectStore>,
    orchestrator: Arc<dyn Orchestrator>,
    bucket: String,
    manifest_term: String,
    worker_limit: usize,
    policy: CallPolicy,
}

impl ExecutionCorrelator {
    /// Creates a correlator for the map-result `bucket`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        orchestrator: Arc<dyn Orchestrator>,
        bucket: impl Into<String>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            store,
            orchestrator,
            bucket: bucket.into(),
            manifest_term: "manifest".to_string(),
            worker_limit: 8,
            policy,
        }
    }

    /// Sets the term identifying manifest keys.
    #[must_use]
    pub fn with_manifest_term(mut self, term: impl Into<String>) -> Self {
        self.manifest_term = term.into();
        self
    }

    /// Sets the number of manifests processed concurrently.
    #[must_use]
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit.max(1);
        self
    }

    /// Returns the one execution every manifest belongs to.
    ///
    /// Fails with [`RedriveError::AmbiguousExecution`] when manifests from
    /// several executions are present, and [`RedriveError::NoExecution`]
    /// when there are none.
    pub async fn locate_execution(&self) -> Result<ExecutionArn> {
        let keys = self
            .policy
            .run("list_map_results", || self.store.list(&self.bucket, None))
            .await?;

        let manifest_keys: Vec<String> = keys
            .into_iter()
            .filter(|key| key.contains(&self.manifest_term))
            .collect();
        debug!(bucket = %self.bucket, manifests = manifest_keys.len(), "Found manifests");

        let owners: Vec<String> = stream::iter(manifest_keys)
            .map(|key| async move { self.owning_execution(&key).await })
            .buffered(self.worker_limit)
            .try_collect()
            .await?;

        let distinct: BTreeSet<String> = owners.into_iter().collect();
        match distinct.len() {
            0 => {
                error!(bucket = %self.bucket, "No manifest points at an execution");
                Err(RedriveError::NoExecution {
                    bucket: self.bucket.clone(),
                })
            }
            1 => {
                let arn = distinct.into_iter().next().unwrap_or_default();
                info!(execution_arn = %arn, "Located execution");
                ExecutionArn::parse(&arn)
            }
            _ => {
                let arns: Vec<String> = distinct.into_iter().collect();
                error!(
                    bucket = %self.bucket,
                    arns = ?arns,
                    "More than one execution ARN has been detected"
                );
                Err(RedriveError::AmbiguousExecution {
                    arns,
                    bucket: self.bucket.clone(),
                })
            }
        }
    }

    async fn owning_execution(&self, key: &str) -> Result<String> {
        let body = self
            .policy
            .run("get_manifest", || self.store.get(&self.bucket, key))
            .await?;
        let map_run_arn = parse_manifest(key, &body).map_err(|e| {
            error!(bucket = %self.bucket, key, error = %e, "Unreadable manifest");
            e
        })?;

        let description = self
            .policy
            .run("describe_map_run", || {
                self.orchestrator.describe_map_run(&map_run_arn)
            })
            .await?;
        debug!(
            key,
            map_run_arn = %map_run_arn,
            execution_arn = %description.execution_arn,
            "Resolved map run"
        );
        Ok(description.execution_arn)
    }
}
