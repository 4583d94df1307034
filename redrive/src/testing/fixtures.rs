//! Fixtures for exercising a redrive attempt without real services.

use std::sync::Arc;

use crate::config::{BASIN_FILE, EXPANDED_REACHES_FILE, REACHES_FILE};
use crate::core::{Module, ReachId};
use crate::dataset::{BasinRecord, Dataset, DatasetStore, ReachRecord};
use crate::ports::InMemoryObjectStore;

/// Venue prefix used by fixtures.
pub const TEST_PREFIX: &str = "confluence-test";

/// Execution that produced the fixture's map results.
pub const TEST_EXECUTION_ARN: &str =
    "arn:aws:states:us-west-2:123456789012:execution:confluence-test-workflow:run-1";

/// A failure marker with one `FAILED` entry per index.
#[must_use]
pub fn failure_marker(indexes: &[u64]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = indexes
        .iter()
        .map(|index| {
            serde_json::json!({
                "Status": "FAILED",
                "Input": serde_json::json!({"context_index": index}).to_string(),
            })
        })
        .collect();
    serde_json::Value::Array(entries)
}

/// A manifest marker naming a map run.
#[must_use]
pub fn manifest_marker(map_run_arn: &str) -> serde_json::Value {
    serde_json::json!({
        "DestinationBucket": "map-results",
        "MapRunArn": map_run_arn,
        "ResultFiles": {},
    })
}

fn ids(values: &[i64]) -> Vec<ReachId> {
    values.iter().copied().map(ReachId::from).collect()
}

/// Datasets pinned in memory, keyed by file name.
#[derive(Debug, Default)]
pub struct DatasetFixture {
    datasets: Vec<(String, Dataset)>,
}

impl DatasetFixture {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an arbitrary dataset.
    #[must_use]
    pub fn with_dataset(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.datasets.push((name.into(), dataset));
        self
    }

    /// Adds `reaches.json` with one record per identifier.
    #[must_use]
    pub fn with_reaches(self, reach_ids: &[i64]) -> Self {
        self.with_flat(REACHES_FILE, reach_ids)
    }

    /// Adds the expanded reaches file.
    #[must_use]
    pub fn with_expanded_reaches(self, reach_ids: &[i64]) -> Self {
        self.with_flat(EXPANDED_REACHES_FILE, reach_ids)
    }

    /// Adds a flat dataset.
    #[must_use]
    pub fn with_flat(self, name: &str, reach_ids: &[i64]) -> Self {
        let records = ids(reach_ids).into_iter().map(ReachRecord::new).collect();
        self.with_dataset(name, Dataset::Flat(records))
    }

    /// Adds `basin.json` with one record per slice.
    #[must_use]
    pub fn with_basins(self, basins: &[&[i64]]) -> Self {
        let records = basins.iter().map(|b| BasinRecord::new(ids(b))).collect();
        self.with_dataset(BASIN_FILE, Dataset::Basin(records))
    }

    /// Adds a sets dataset with one group per slice.
    #[must_use]
    pub fn with_sets(self, name: &str, groups: &[&[i64]]) -> Self {
        let groups = groups
            .iter()
            .map(|g| ids(g).into_iter().map(ReachRecord::new).collect::<Vec<_>>())
            .collect();
        self.with_dataset(name, Dataset::Sets(groups))
    }

    /// Builds a store with every dataset pinned.
    ///
    /// Files not added here are read from a directory that does not exist.
    #[must_use]
    pub fn store(&self) -> Arc<DatasetStore> {
        let store = DatasetStore::new("/nonexistent/redrive-fixture");
        for (name, dataset) in &self.datasets {
            store.pin(name.clone(), dataset.clone());
        }
        Arc::new(store)
    }
}

/// Seeds a map-result bucket with markers.
pub struct MapResultsFixture {
    store: Arc<InMemoryObjectStore>,
    bucket: String,
    markers: usize,
}

impl MapResultsFixture {
    /// Seeds `bucket` inside `store`.
    #[must_use]
    pub fn new(store: Arc<InMemoryObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            markers: 0,
        }
    }

    /// Adds a failure marker for `module`.
    #[must_use]
    pub fn failure(mut self, module: Module, indexes: &[u64]) -> Self {
        let key = format!("{module}/run-1/FAILED_{}.json", self.markers);
        self.store.insert_json(&self.bucket, &key, &failure_marker(indexes));
        self.markers += 1;
        self
    }

    /// Adds a success marker for `module`.
    #[must_use]
    pub fn success(mut self, module: Module) -> Self {
        let key = format!("{module}/run-1/SUCCEEDED_{}.json", self.markers);
        self.store.insert_json(&self.bucket, &key, &serde_json::json!([]));
        self.markers += 1;
        self
    }

    /// Adds a manifest for `module` naming `map_run_arn`.
    #[must_use]
    pub fn manifest(self, module: Module, map_run_arn: &str) -> Self {
        let key = format!("{module}/run-1/manifest.json");
        self.store.insert_json(&self.bucket, &key, &manifest_marker(map_run_arn));
        self
    }

    /// The store being seeded.
    #[must_use]
    pub fn store(&self) -> Arc<InMemoryObjectStore> {
        Arc::clone(&self.store)
    }
}
