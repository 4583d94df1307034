//! Capabilities the engine needs from the outside world.
//!
//! The object store and the orchestration service are injected behind
//! traits; components only receive the ports they use.

mod fs;
#[cfg(feature = "http")]
mod http;
mod memory;

pub use fs::FsObjectStore;
#[cfg(feature = "http")]
pub use http::StatesHttpClient;
pub use memory::{InMemoryObjectStore, InMemoryOrchestrator, StartRequest};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Blob storage keyed by bucket and `/`-delimited key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists every key in `bucket`, optionally restricted to a prefix, in
    /// lexicographic order.
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    /// Reads an object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Writes an object, replacing any previous version.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, encrypted: bool) -> Result<()>;

    /// Writes an object that must not exist yet.
    ///
    /// Fails with [`RedriveError::AlreadyExists`](crate::errors::RedriveError::AlreadyExists)
    /// when the key is taken.
    async fn put_new(&self, bucket: &str, key: &str, body: Vec<u8>, encrypted: bool)
        -> Result<()>;

    /// Deletes every listed key. Missing keys are ignored.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<()>;
}

/// A started workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedExecution {
    /// ARN of the new execution.
    pub execution_arn: String,
    /// Name the execution was started under.
    pub run_name: String,
    /// When the service accepted the start.
    pub start_time: DateTime<Utc>,
}

/// The part of a map run description the engine uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapRunDescription {
    /// The map run that was described.
    pub map_run_arn: String,
    /// Execution that owns the map run.
    pub execution_arn: String,
}

/// The workflow orchestration service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Starts an execution of a state machine.
    async fn start_execution(
        &self,
        state_machine_arn: &str,
        run_name: &str,
        input: &str,
    ) -> Result<StartedExecution>;

    /// Describes a map run, returning its owning execution.
    async fn describe_map_run(&self, map_run_arn: &str) -> Result<MapRunDescription>;
}
