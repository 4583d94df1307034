//! In-memory ports for tests and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{MapRunDescription, ObjectStore, Orchestrator, StartedExecution};
use crate::errors::{RedriveError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    encrypted: bool,
}

/// An object store held in memory.
///
/// Transient failures can be injected to exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    pending_failures: Mutex<usize>,
    call_count: Mutex<usize>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object without going through the trait.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.into(),
                encrypted: false,
            },
        );
    }

    /// Stores a JSON value.
    pub fn insert_json(&self, bucket: &str, key: &str, value: &serde_json::Value) {
        self.insert(bucket, key, value.to_string());
    }

    /// Makes the next `count` calls fail with a transient store error.
    pub fn fail_next(&self, count: usize) {
        *self.pending_failures.lock() = count;
    }

    /// Number of trait calls received, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }

    /// Returns an object's body if present.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    /// Parses an object as JSON.
    #[must_use]
    pub fn object_json(&self, bucket: &str, key: &str) -> Option<serde_json::Value> {
        self.object(bucket, key)
            .and_then(|body| serde_json::from_slice(&body).ok())
    }

    /// Whether the object was written with encryption requested.
    #[must_use]
    pub fn is_encrypted(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .is_some_and(|o| o.encrypted)
    }

    /// All keys of a bucket in order.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn begin_call(&self, bucket: &str, key: &str) -> Result<()> {
        *self.call_count.lock() += 1;
        let mut pending = self.pending_failures.lock();
        if *pending > 0 {
            *pending -= 1;
            return Err(RedriveError::store(bucket, key, "injected transient failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        self.begin_call(bucket, prefix.unwrap_or(""))?;
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.begin_call(bucket, key)?;
        self.object(bucket, key)
            .ok_or_else(|| RedriveError::not_found(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, encrypted: bool) -> Result<()> {
        self.begin_call(bucket, key)?;
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject { body, encrypted },
        );
        Ok(())
    }

    async fn put_new(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        encrypted: bool,
    ) -> Result<()> {
        self.begin_call(bucket, key)?;
        let mut objects = self.objects.lock();
        let location = (bucket.to_string(), key.to_string());
        if objects.contains_key(&location) {
            return Err(RedriveError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        objects.insert(location, StoredObject { body, encrypted });
        Ok(())
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<()> {
        self.begin_call(bucket, "")?;
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(())
    }
}

/// A start request recorded by [`InMemoryOrchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// State machine that was started.
    pub state_machine_arn: String,
    /// Requested run name.
    pub run_name: String,
    /// Raw input JSON.
    pub input: String,
}

impl StartRequest {
    /// Parses the recorded input.
    #[must_use]
    pub fn input_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.input).unwrap_or(serde_json::Value::Null)
    }
}

/// An orchestration service held in memory.
#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    map_runs: Mutex<HashMap<String, String>>,
    started: Mutex<Vec<StartRequest>>,
    start_rejection: Mutex<Option<String>>,
    describe_calls: Mutex<usize>,
}

impl InMemoryOrchestrator {
    /// Creates an orchestrator with no known map runs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the execution that owns a map run.
    #[must_use]
    pub fn with_map_run(self, map_run_arn: impl Into<String>, execution_arn: impl Into<String>) -> Self {
        self.map_runs
            .lock()
            .insert(map_run_arn.into(), execution_arn.into());
        self
    }

    /// Makes every start request fail with the given service message.
    #[must_use]
    pub fn rejecting_starts(self, message: impl Into<String>) -> Self {
        *self.start_rejection.lock() = Some(message.into());
        self
    }

    /// Start requests received so far.
    #[must_use]
    pub fn started(&self) -> Vec<StartRequest> {
        self.started.lock().clone()
    }

    /// Number of map run descriptions requested.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        *self.describe_calls.lock()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn start_execution(
        &self,
        state_machine_arn: &str,
        run_name: &str,
        input: &str,
    ) -> Result<StartedExecution> {
        if let Some(message) = self.start_rejection.lock().clone() {
            return Err(RedriveError::Dispatch(message));
        }

        self.started.lock().push(StartRequest {
            state_machine_arn: state_machine_arn.to_string(),
            run_name: run_name.to_string(),
            input: input.to_string(),
        });

        let execution_arn = format!(
            "{}:{run_name}",
            state_machine_arn.replacen(":stateMachine:", ":execution:", 1)
        );
        Ok(StartedExecution {
            execution_arn,
            run_name: run_name.to_string(),
            start_time: Utc::now(),
        })
    }

    async fn describe_map_run(&self, map_run_arn: &str) -> Result<MapRunDescription> {
        *self.describe_calls.lock() += 1;
        let execution_arn = self
            .map_runs
            .lock()
            .get(map_run_arn)
            .cloned()
            .ok_or_else(|| RedriveError::rejected("DescribeMapRun", format!("map run does not exist: {map_run_arn}")))?;

        Ok(MapRunDescription {
            map_run_arn: map_run_arn.to_string(),
            execution_arn,
        })
    }
}
