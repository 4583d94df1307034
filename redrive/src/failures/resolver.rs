//! Mapping failed indexes back to reach identifiers.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{FailureIndex, FailureReport, ResolvedFailure};
use crate::config::ModuleTable;
use crate::core::{Module, ReachId};
use crate::dataset::DatasetStore;
use crate::errors::{CorruptArtifactError, Result};

/// Resolves failed indexes against the datasets the execution launched with.
pub struct IdentifierResolver {
    datasets: Arc<DatasetStore>,
    table: ModuleTable,
}

impl IdentifierResolver {
    /// Creates a resolver reading through `datasets`.
    #[must_use]
    pub fn new(datasets: Arc<DatasetStore>, table: ModuleTable) -> Self {
        Self { datasets, table }
    }

    /// Resolves one module's failed indexes.
    ///
    /// An index beyond the end of the module's dataset means the dataset
    /// changed since launch, which is reported as a corrupt artifact.
    pub async fn resolve(&self, module: Module, indexes: &[u64]) -> Result<ResolvedFailure> {
        let file = self.table.dataset_for(module);
        let dataset = self.datasets.load(file).await?;

        let mut identifiers = BTreeSet::<ReachId>::new();
        for &index in indexes {
            let resolved = usize::try_from(index)
                .ok()
                .and_then(|position| dataset.resolve(position));
            match resolved {
                Some(ids) => identifiers.extend(ids),
                None => {
                    error!(
                        module = %module,
                        json_file = %file.name,
                        index,
                        len = dataset.len(),
                        "Failed index is outside the dataset"
                    );
                    return Err(CorruptArtifactError::new(
                        file.name.clone(),
                        format!(
                            "{module} index {index} is out of range for {} records",
                            dataset.len()
                        ),
                    )
                    .into());
                }
            }
        }

        debug!(
            module = %module,
            json_file = %file.name,
            indexes = indexes.len(),
            reach_ids = identifiers.len(),
            "Resolved failed indexes"
        );

        Ok(ResolvedFailure {
            module,
            json_file: file.name.clone(),
            indexes: indexes.to_vec(),
            identifiers,
        })
    }

    /// Resolves every module of a failure index into a report.
    ///
    /// Modules without failed indexes get no entry.
    pub async fn resolve_all(&self, failures: &FailureIndex) -> Result<FailureReport> {
        let mut report = FailureReport::new();
        for (module, indexes) in failures {
            if indexes.is_empty() {
                continue;
            }
            let resolved = self.resolve(*module, indexes).await?;
            info!(
                module = %module,
                failures = resolved.indexes.len(),
                reach_ids = ?resolved.identifiers,
                "Failed reach identifiers"
            );
            report.insert(resolved);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RedriveError;
    use crate::testing::DatasetFixture;
    use pretty_assertions::assert_eq;

    fn ids(values: &[i64]) -> BTreeSet<ReachId> {
        values.iter().copied().map(ReachId::from).collect()
    }

    #[tokio::test]
    async fn test_flat_index_resolves_single_identifier() {
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3]);
        let resolver = IdentifierResolver::new(fixture.store(), ModuleTable::default());

        let resolved = resolver.resolve(Module::Sad, &[1]).await.unwrap();
        assert_eq!(resolved.identifiers, ids(&[2]));
        assert_eq!(resolved.json_file, "reaches.json");
    }

    #[tokio::test]
    async fn test_basin_indexes_resolve_to_union() {
        let fixture = DatasetFixture::new().with_basins(&[&[10, 11], &[12], &[11, 13]]);
        let resolver = IdentifierResolver::new(fixture.store(), ModuleTable::default());

        let resolved = resolver.resolve(Module::Moi, &[0, 2, 0]).await.unwrap();
        assert_eq!(resolved.identifiers, ids(&[10, 11, 13]));
        assert_eq!(resolved.indexes, vec![0, 2, 0]);
    }

    #[tokio::test]
    async fn test_sets_index_resolves_whole_group() {
        let fixture = DatasetFixture::new().with_sets("hivdisets.json", &[&[1, 2], &[3]]);
        let resolver = IdentifierResolver::new(fixture.store(), ModuleTable::default());

        let resolved = resolver.resolve(Module::Hivdi, &[0]).await.unwrap();
        assert_eq!(resolved.identifiers, ids(&[1, 2]));
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_corrupt() {
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3]);
        let resolver = IdentifierResolver::new(fixture.store(), ModuleTable::default());

        let err = resolver.resolve(Module::Sad, &[3]).await.unwrap_err();
        assert!(matches!(err, RedriveError::CorruptArtifact(_)));
    }

    #[tokio::test]
    async fn test_resolve_all_skips_empty_modules() {
        let fixture = DatasetFixture::new().with_reaches(&[1, 2, 3]);
        let resolver = IdentifierResolver::new(fixture.store(), ModuleTable::default());

        let mut failures = FailureIndex::new();
        failures.insert(Module::Sad, vec![0]);
        failures.insert(Module::Momma, Vec::new());

        let report = resolver.resolve_all(&failures).await.unwrap();
        assert_eq!(report.len(), 1);
        assert!(report.get(Module::Momma).is_none());
        assert_eq!(report.excluded(), ids(&[1]));
    }
}
