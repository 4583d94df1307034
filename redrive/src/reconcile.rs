//! Building the reduced working subset for the next execution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{DatasetFamily, ModuleTable, AUXILIARY_FILES, FAILURE_REPORT_FILE};
use crate::core::{ReachId, RunContext};
use crate::dataset::{Dataset, DatasetStore};
use crate::errors::{RedriveError, Result};
use crate::failures::FailureReport;
use crate::ports::ObjectStore;
use crate::retry::CallPolicy;

/// The identifiers the next execution runs over.
///
/// Persisted as the reduced primary dataset, records and all, under a
/// run-unique name and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSubset {
    file_name: String,
    report_key: String,
    identifiers: Vec<ReachId>,
}

impl WorkingSubset {
    /// Creates a subset named `file_name`, tied to the report at `report_key`.
    #[must_use]
    pub fn new(
        file_name: impl Into<String>,
        report_key: impl Into<String>,
        identifiers: Vec<ReachId>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            report_key: report_key.into(),
            identifiers,
        }
    }

    /// Key of the subset at the root of the JSON bucket.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Key of the failure report the subset was derived with.
    #[must_use]
    pub fn report_key(&self) -> &str {
        &self.report_key
    }

    /// Surviving identifiers in source order.
    #[must_use]
    pub fn identifiers(&self) -> &[ReachId] {
        &self.identifiers
    }

    /// Number of identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// True when there is nothing left to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

/// Where the working subset starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetSource<'a> {
    /// The full primary dataset from the input directory.
    Fresh,
    /// A subset produced by an earlier attempt, by key in the JSON bucket.
    Refine(&'a str),
}

impl<'a> From<Option<&'a str>> for SubsetSource<'a> {
    fn from(existing: Option<&'a str>) -> Self {
        existing.map_or(Self::Fresh, Self::Refine)
    }
}

/// Everything one reconciliation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The subset the next execution reads.
    pub subset: WorkingSubset,
    /// Identifiers removed from the source.
    pub removed: BTreeSet<ReachId>,
    /// Digest of the report's excluded identifiers.
    pub fingerprint: String,
    /// Keys of reduced dataset copies, when rewriting is enabled.
    pub rewritten: Vec<String>,
}

/// Persists the failure report and derives the working subset.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    datasets: Arc<DatasetStore>,
    json_bucket: String,
    table: ModuleTable,
    family: DatasetFamily,
    subset_file: String,
    rewrite_datasets: bool,
    policy: CallPolicy,
}

impl Reconciler {
    /// Creates a reconciler writing into `json_bucket`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        datasets: Arc<DatasetStore>,
        json_bucket: impl Into<String>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            store,
            datasets,
            json_bucket: json_bucket.into(),
            table: ModuleTable::default(),
            family: DatasetFamily::default(),
            subset_file: crate::config::DEFAULT_SUBSET_FILE.to_string(),
            rewrite_datasets: false,
            policy,
        }
    }

    /// Sets the module table and dataset family.
    #[must_use]
    pub fn with_datasets(mut self, table: ModuleTable, family: DatasetFamily) -> Self {
        self.table = table;
        self.family = family;
        self
    }

    /// Sets the subset file name; the run token is appended to it.
    #[must_use]
    pub fn with_subset_file(mut self, name: impl Into<String>) -> Self {
        self.subset_file = name.into();
        self
    }

    /// Enables uploading reduced copies of every family dataset.
    #[must_use]
    pub fn with_rewrite_datasets(mut self, rewrite: bool) -> Self {
        self.rewrite_datasets = rewrite;
        self
    }

    /// Key the failure report is written under for `run`.
    #[must_use]
    pub fn report_key(run: &RunContext) -> String {
        format!("{}/{FAILURE_REPORT_FILE}", run.artifact_prefix())
    }

    /// Uploads the failure report without deriving a subset.
    pub async fn persist_report(&self, report: &FailureReport, run: &RunContext) -> Result<String> {
        let key = Self::report_key(run);
        let body = report.to_json_pretty()?;
        self.policy
            .run("put_failure_report", || {
                self.store.put_new(&self.json_bucket, &key, body.clone(), true)
            })
            .await?;
        info!(bucket = %self.json_bucket, key = %key, modules = report.len(), "Saved failure report");
        Ok(key)
    }

    /// Removes every failed identifier from the source and writes the result.
    ///
    /// The report is persisted first, so it exists even when the subset
    /// turns out empty or the source cannot be read.
    pub async fn reconcile(
        &self,
        report: &FailureReport,
        source: SubsetSource<'_>,
        run: &RunContext,
    ) -> Result<Reconciliation> {
        let report_key = self.persist_report(report, run).await?;

        let original = match source {
            SubsetSource::Fresh => self.datasets.load(self.table.primary()).await?,
            SubsetSource::Refine(key) => Arc::new(self.read_subset(key).await?),
        };

        let excluded = report.excluded();
        let reduced = original.filter(&excluded);
        let kept = reduced.identifiers();
        let removed: BTreeSet<ReachId> = original
            .identifiers()
            .into_iter()
            .filter(|id| excluded.contains(id))
            .collect();
        let fingerprint = report.fingerprint();
        info!(
            source = ?source,
            kept = kept.len(),
            removed = removed.len(),
            fingerprint = %fingerprint,
            "Reconciled working subset"
        );

        if kept.is_empty() {
            error!(
                bucket = %self.json_bucket,
                report_key = %report_key,
                "There are not enough reach data to continue execution"
            );
            return Err(RedriveError::EmptyWorkingSet { report_key });
        }

        let subset = WorkingSubset::new(run.unique_name(&self.subset_file), report_key, kept);
        let body = reduced.to_json_pretty()?;
        self.policy
            .run("put_working_subset", || {
                self.store
                    .put_new(&self.json_bucket, subset.file_name(), body.clone(), true)
            })
            .await?;
        info!(bucket = %self.json_bucket, key = %subset.file_name(), reaches = subset.len(), "Saved working subset");

        let rewritten = if self.rewrite_datasets {
            self.rewrite_family(&subset, &excluded, run).await?
        } else {
            Vec::new()
        };

        Ok(Reconciliation {
            subset,
            removed,
            fingerprint,
            rewritten,
        })
    }

    /// Reads a subset written by an earlier attempt, in the primary's shape.
    async fn read_subset(&self, key: &str) -> Result<Dataset> {
        let body = self
            .policy
            .run("get_existing_subset", || self.store.get(&self.json_bucket, key))
            .await?;
        Dataset::parse(self.table.primary().shape, &body, key).map_err(|e| {
            error!(bucket = %self.json_bucket, key, error = %e, "Existing subset is unreadable");
            e
        })
    }

    /// Uploads reduced copies of the family under the run prefix.
    ///
    /// Everything outside the subset is excluded, so copies made while
    /// refining also drop identifiers removed by earlier attempts.
    async fn rewrite_family(
        &self,
        subset: &WorkingSubset,
        excluded: &BTreeSet<ReachId>,
        run: &RunContext,
    ) -> Result<Vec<String>> {
        let prefix = run.artifact_prefix();
        let kept: BTreeSet<&ReachId> = subset.identifiers().iter().collect();
        let primary = self.datasets.load(self.table.primary()).await?;
        let mut family_excluded = excluded.clone();
        family_excluded.extend(primary.identifiers().into_iter().filter(|id| !kept.contains(id)));

        let mut written = Vec::new();
        for file in &self.family.files {
            let dataset = match self.datasets.load(file).await {
                Ok(dataset) => dataset,
                Err(RedriveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(file = %file.name, "Dataset missing from input directory, not rewritten");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let reduced = dataset.filter(&family_excluded);
            if reduced.has_no_identifiers() {
                warn!(file = %file.name, "Every reach was removed from dataset");
            }
            let key = format!("{prefix}/{}", file.name);
            let body = reduced.to_json_pretty()?;
            self.policy
                .run("put_reduced_dataset", || {
                    self.store.put_new(&self.json_bucket, &key, body.clone(), true)
                })
                .await?;
            debug!(
                key = %key,
                before = dataset.len(),
                after = reduced.len(),
                "Uploaded reduced dataset"
            );
            written.push(key);
        }

        for name in AUXILIARY_FILES {
            let Some(body) = self.datasets.read_raw(name).await? else {
                debug!(file = name, "Auxiliary file not present");
                continue;
            };
            let key = format!("{prefix}/{name}");
            self.policy
                .run("put_auxiliary_file", || {
                    self.store.put_new(&self.json_bucket, &key, body.clone(), true)
                })
                .await?;
            written.push(key);
        }

        info!(bucket = %self.json_bucket, prefix = %prefix, files = written.len(), "Uploaded reduced datasets");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Module, RunToken};
    use crate::failures::ResolvedFailure;
    use crate::ports::InMemoryObjectStore;
    use crate::testing::DatasetFixture;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn id_list(values: &[i64]) -> Vec<ReachId> {
        values.iter().copied().map(ReachId::from).collect()
    }

    fn run(token: u32) -> RunContext {
        RunContext::with_parts(
            RunToken::from_value(token),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    fn report(module: Module, file: &str, ids: &[i64]) -> FailureReport {
        [ResolvedFailure {
            module,
            json_file: file.to_string(),
            indexes: vec![0],
            identifiers: ids.iter().copied().map(ReachId::from).collect(),
        }]
        .into_iter()
        .collect()
    }

    fn reconciler(store: &Arc<InMemoryObjectStore>, fixture: &DatasetFixture) -> Reconciler {
        Reconciler::new(
            Arc::clone(store) as Arc<dyn ObjectStore>,
            fixture.store(),
            "dev-json",
            CallPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_fresh_subset_removes_failures_in_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3]);

        let result = reconciler(&store, &fixture)
            .reconcile(&report(Module::Sad, "reaches.json", &[2]), SubsetSource::Fresh, &run(111_111))
            .await
            .unwrap();

        assert_eq!(result.subset.identifiers(), id_list(&[1, 3]).as_slice());
        assert_eq!(result.subset.file_name(), "reaches_of_interest_111111.json");
        assert_eq!(
            store.object_json("dev-json", "reaches_of_interest_111111.json").unwrap(),
            serde_json::json!([{"reach_id": 1}, {"reach_id": 3}])
        );
        assert!(store.is_encrypted("dev-json", "reaches_of_interest_111111.json"));
    }

    #[tokio::test]
    async fn test_subset_keeps_record_fields() {
        let store = Arc::new(InMemoryObjectStore::new());
        let reaches = Dataset::parse(
            crate::dataset::DatasetShape::Flat,
            br#"[{"reach_id": 1, "sword": "na_sword_v16.nc"}, {"reach_id": 2, "sword": "eu_sword_v16.nc"}]"#,
            "reaches.json",
        )
        .unwrap();
        let fixture = DatasetFixture::new().with_dataset("reaches.json", reaches);

        reconciler(&store, &fixture)
            .reconcile(&report(Module::Sad, "reaches.json", &[2]), SubsetSource::Fresh, &run(111_112))
            .await
            .unwrap();

        assert_eq!(
            store.object_json("dev-json", "reaches_of_interest_111112.json").unwrap(),
            serde_json::json!([{"reach_id": 1, "sword": "na_sword_v16.nc"}])
        );
    }

    #[tokio::test]
    async fn test_report_written_before_empty_check() {
        let store = Arc::new(InMemoryObjectStore::new());
        let fixture = DatasetFixture::new().with_reaches(&[1]);

        let err = reconciler(&store, &fixture)
            .reconcile(&report(Module::Sad, "reaches.json", &[1]), SubsetSource::Fresh, &run(222_222))
            .await
            .unwrap_err();

        let RedriveError::EmptyWorkingSet { report_key } = err else {
            panic!("expected empty working set");
        };
        assert_eq!(report_key, "20240301T120000_redrive_222222/failures.json");
        assert!(store.object("dev-json", &report_key).is_some());
        assert_eq!(store.keys("dev-json").len(), 1);
    }

    #[tokio::test]
    async fn test_refine_reads_existing_subset() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert_json(
            "dev-json",
            "reaches_of_interest_111111.json",
            &serde_json::json!([{"reach_id": 1}, {"reach_id": 3}, {"reach_id": 5}]),
        );
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3, 4, 5]);

        let result = reconciler(&store, &fixture)
            .reconcile(
                &report(Module::Sad, "reaches.json", &[3, 4]),
                SubsetSource::Refine("reaches_of_interest_111111.json"),
                &run(333_333),
            )
            .await
            .unwrap();

        assert_eq!(result.subset.identifiers(), id_list(&[1, 5]).as_slice());
        // 4 was not in the source, so only 3 counts as removed.
        assert_eq!(result.removed, id_list(&[3]).into_iter().collect::<BTreeSet<_>>());
        assert_eq!(
            store.object_json("dev-json", "reaches_of_interest_333333.json").unwrap(),
            serde_json::json!([{"reach_id": 1}, {"reach_id": 5}])
        );
    }

    #[tokio::test]
    async fn test_refine_rejects_subset_of_bare_identifiers() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert_json("dev-json", "reaches_of_interest_111111.json", &serde_json::json!([1, 3]));
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3]);

        let err = reconciler(&store, &fixture)
            .reconcile(
                &report(Module::Sad, "reaches.json", &[3]),
                SubsetSource::Refine("reaches_of_interest_111111.json"),
                &run(333_334),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RedriveError::CorruptArtifact(_)));
    }

    #[tokio::test]
    async fn test_reruns_produce_same_membership_under_new_names() {
        let store = Arc::new(InMemoryObjectStore::new());
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3, 4]);
        let failures = report(Module::Momma, "reaches.json", &[2, 4]);

        let first = reconciler(&store, &fixture)
            .reconcile(&failures, SubsetSource::Fresh, &run(400_001))
            .await
            .unwrap();
        let second = reconciler(&store, &fixture)
            .reconcile(&failures, SubsetSource::Fresh, &run(400_002))
            .await
            .unwrap();

        assert_eq!(first.subset.identifiers(), second.subset.identifiers());
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.subset.file_name(), second.subset.file_name());
    }

    #[tokio::test]
    async fn test_subset_is_never_overwritten() {
        let store = Arc::new(InMemoryObjectStore::new());
        let fixture = DatasetFixture::new().with_reaches(&[1, 2]);
        let failures = report(Module::Sad, "reaches.json", &[1]);
        let rec = reconciler(&store, &fixture);

        rec.reconcile(&failures, SubsetSource::Fresh, &run(500_000)).await.unwrap();
        let err = rec
            .reconcile(&failures, SubsetSource::Fresh, &run(500_000))
            .await
            .unwrap_err();
        assert!(matches!(err, RedriveError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_rewrite_filters_every_family_dataset() {
        let store = Arc::new(InMemoryObjectStore::new());
        let fixture = DatasetFixture::new()
            .with_basins(&[&[10, 11], &[12]])
            .with_reaches(&[10, 11, 12])
            .with_sets("hivdisets.json", &[&[10, 12], &[11]])
            .with_sets("sicsets.json", &[&[11]]);

        let result = reconciler(&store, &fixture)
            .with_rewrite_datasets(true)
            .reconcile(&report(Module::Moi, "basin.json", &[10, 11]), SubsetSource::Fresh, &run(600_000))
            .await
            .unwrap();

        let prefix = "20240301T120000_redrive_600000";
        assert_eq!(result.rewritten.len(), 4);
        assert_eq!(
            store.object_json("dev-json", &format!("{prefix}/basin.json")).unwrap(),
            serde_json::json!([{"reach_id": [12]}])
        );
        assert_eq!(
            store.object_json("dev-json", &format!("{prefix}/reaches.json")).unwrap(),
            serde_json::json!([{"reach_id": 12}])
        );
        assert_eq!(
            store.object_json("dev-json", &format!("{prefix}/hivdisets.json")).unwrap(),
            serde_json::json!([[{"reach_id": 12}]])
        );
        assert_eq!(
            store.object_json("dev-json", &format!("{prefix}/sicsets.json")).unwrap(),
            serde_json::json!([])
        );
    }
}
