//! Starting the next execution and clearing the exhausted one's results.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{DispatchParams, RunType};
use crate::core::RunContext;
use crate::errors::{RedriveError, Result};
use crate::ports::{ObjectStore, Orchestrator, StartedExecution};
use crate::reconcile::WorkingSubset;
use crate::retry::CallPolicy;

/// Most keys removed by a single delete request.
pub const DELETE_BATCH_SIZE: usize = 1000;

const EXECUTION_RESOURCE: &str = "execution";
const STATE_MACHINE_RESOURCE: &str = "stateMachine";

/// A parsed execution ARN.
///
/// Layout: `arn:<partition>:states:<region>:<account>:execution:<state machine>:<execution>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionArn {
    raw: String,
    state_machine_name: String,
}

impl ExecutionArn {
    /// Parses and validates an execution ARN.
    pub fn parse(arn: &str) -> Result<Self> {
        let parts: Vec<&str> = arn.split(':').collect();
        if parts.len() != 8 || parts[0] != "arn" {
            return Err(RedriveError::invalid_arn(
                arn,
                "expected arn:<partition>:states:<region>:<account>:execution:<state machine>:<name>",
            ));
        }
        if parts[2] != "states" {
            return Err(RedriveError::invalid_arn(arn, "service is not states"));
        }
        if parts[5] != EXECUTION_RESOURCE {
            return Err(RedriveError::invalid_arn(
                arn,
                format!("resource type is '{}', not '{EXECUTION_RESOURCE}'", parts[5]),
            ));
        }
        if parts[6].is_empty() || parts[7].is_empty() {
            return Err(RedriveError::invalid_arn(arn, "empty state machine or execution name"));
        }

        Ok(Self {
            raw: arn.to_string(),
            state_machine_name: parts[6].to_string(),
        })
    }

    /// The ARN as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Name of the state machine that ran the execution.
    #[must_use]
    pub fn state_machine_name(&self) -> &str {
        &self.state_machine_name
    }

    /// ARN of the state machine, with the execution name dropped.
    #[must_use]
    pub fn state_machine_arn(&self) -> String {
        let parts: Vec<&str> = self.raw.split(':').collect();
        let mut machine: Vec<&str> = parts[..7].to_vec();
        machine[5] = STATE_MACHINE_RESOURCE;
        machine.join(":")
    }
}

impl fmt::Display for ExecutionArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Input document the workflow is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionInput<'a> {
    /// Four-digit run version.
    pub version: &'a str,
    /// Constraint mode.
    pub run_type: RunType,
    /// Working subset file the workflow reads.
    pub reach_subset_file: &'a str,
    /// Percentage of sub-tasks allowed to fail.
    pub tolerated_failure_percentage: u8,
}

/// What happened to the exhausted execution's map results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// Every listed artifact was deleted.
    Deleted {
        /// Number of keys removed.
        keys: usize,
    },
    /// Deletion failed; the artifacts must be removed by hand.
    Failed {
        /// Why the deletion failed.
        reason: String,
    },
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// The execution that was started.
    pub execution: StartedExecution,
    /// Map result cleanup after the start.
    pub cleanup: CleanupOutcome,
}

/// Starts a fresh execution over a working subset.
pub struct RedriveDispatcher {
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<dyn ObjectStore>,
    map_bucket: String,
    policy: CallPolicy,
}

impl RedriveDispatcher {
    /// Creates a dispatcher that cleans up `map_bucket` after starting.
    #[must_use]
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn ObjectStore>,
        map_bucket: impl Into<String>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            orchestrator,
            store,
            map_bucket: map_bucket.into(),
            policy,
        }
    }

    /// Run name for the next execution.
    #[must_use]
    pub fn run_name(execution: &ExecutionArn, run: &RunContext) -> String {
        format!("{}-{}", execution.state_machine_name(), run.token)
    }

    /// Starts the next execution, then deletes the exhausted map results.
    ///
    /// An empty subset is refused before the service is contacted. A
    /// rejected start surfaces the service's message unchanged; a failed
    /// cleanup does not undo the start and is reported in the outcome.
    /// The bucket is listed before the start, so results written by the
    /// new execution are never deleted.
    pub async fn dispatch(
        &self,
        execution: &ExecutionArn,
        subset: &WorkingSubset,
        params: &DispatchParams,
        run: &RunContext,
    ) -> Result<Dispatched> {
        if subset.is_empty() {
            error!(subset = %subset.file_name(), "Refusing to start an execution over an empty subset");
            return Err(RedriveError::EmptyWorkingSet {
                report_key: subset.report_key().to_string(),
            });
        }

        let state_machine_arn = execution.state_machine_arn();
        let run_name = Self::run_name(execution, run);
        let input = serde_json::to_string(&ExecutionInput {
            version: &params.version,
            run_type: params.run_type,
            reach_subset_file: subset.file_name(),
            tolerated_failure_percentage: params.tolerated_failure_percentage,
        })?;
        debug!(state_machine_arn = %state_machine_arn, run_name = %run_name, input = %input, "Starting execution");

        let exhausted = self.snapshot().await;
        let started = self
            .policy
            .run("start_execution", || {
                self.orchestrator
                    .start_execution(&state_machine_arn, &run_name, &input)
            })
            .await
            .map_err(|e| {
                error!(
                    state_machine_arn = %state_machine_arn,
                    run_name = %run_name,
                    error = %e,
                    "Execution start failed"
                );
                e
            })?;
        info!(
            run_name = %started.run_name,
            start_time = %started.start_time.format("%Y-%m-%dT%H:%M:%S"),
            "Execution was restarted"
        );

        let deleted = match exhausted {
            Ok(keys) => self.cleanup(&keys).await,
            Err(e) => Err(e),
        };
        let cleanup = match deleted {
            Ok(keys) => CleanupOutcome::Deleted { keys },
            Err(e) => {
                warn!(bucket = %self.map_bucket, error = %e, "Map result cleanup failed");
                CleanupOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        Ok(Dispatched {
            execution: started,
            cleanup,
        })
    }

    /// Lists the keys currently in the map-result bucket.
    pub async fn snapshot(&self) -> Result<Vec<String>> {
        self.policy
            .run("list_map_results", || self.store.list(&self.map_bucket, None))
            .await
    }

    /// Deletes `keys` from the map-result bucket, returning the count.
    pub async fn cleanup(&self, keys: &[String]) -> Result<usize> {
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            self.policy
                .run("delete_map_results", || {
                    self.store.delete_many(&self.map_bucket, batch)
                })
                .await?;
            for key in batch {
                debug!(bucket = %self.map_bucket, key = %key, "Deleted map result");
            }
        }

        info!(bucket = %self.map_bucket, keys = keys.len(), "Deleted map results");
        Ok(keys.len())
    }
}
