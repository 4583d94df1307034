//! Resolved failures and the report persisted for each attempt.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::{Module, ReachId};
use crate::errors::Result;

/// Identifiers attributed to one module's failed sub-tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFailure {
    /// Module the failures belong to.
    pub module: Module,
    /// Dataset file the indexes point into.
    pub json_file: String,
    /// Failed indexes as discovered.
    pub indexes: Vec<u64>,
    /// Deduplicated identifiers at those indexes.
    pub identifiers: BTreeSet<ReachId>,
}

#[derive(Serialize)]
struct ReportEntry<'a> {
    json_file: &'a str,
    indexes: &'a [u64],
    reach_ids: &'a BTreeSet<ReachId>,
}

/// Every resolved failure of one attempt, keyed by module.
///
/// Serialized as `{module: {json_file, indexes, reach_ids}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureReport {
    entries: BTreeMap<Module, ResolvedFailure>,
}

impl FailureReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module's resolved failures, replacing an earlier entry.
    pub fn insert(&mut self, failure: ResolvedFailure) {
        self.entries.insert(failure.module, failure);
    }

    /// Entry for a module.
    #[must_use]
    pub fn get(&self, module: Module) -> Option<&ResolvedFailure> {
        self.entries.get(&module)
    }

    /// Entries in module order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedFailure> {
        self.entries.values()
    }

    /// Number of modules with failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no module failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total failed sub-tasks across modules.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.entries.values().map(|f| f.indexes.len()).sum()
    }

    /// Union of every module's identifiers.
    #[must_use]
    pub fn excluded(&self) -> BTreeSet<ReachId> {
        self.entries
            .values()
            .flat_map(|f| f.identifiers.iter().cloned())
            .collect()
    }

    /// Stable digest of the excluded identifiers.
    ///
    /// Two attempts over the same failures produce the same fingerprint
    /// even though their artifact names differ.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for id in self.excluded() {
            hasher.update(id.to_string().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Serializes the persisted form.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        let entries: BTreeMap<&str, ReportEntry<'_>> = self
            .entries
            .values()
            .map(|f| {
                (
                    f.module.as_str(),
                    ReportEntry {
                        json_file: &f.json_file,
                        indexes: &f.indexes,
                        reach_ids: &f.identifiers,
                    },
                )
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&entries)?)
    }

    /// Diagnostic summary for logging.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        let modules: serde_json::Map<String, serde_json::Value> = self
            .entries
            .values()
            .map(|f| {
                (
                    f.module.to_string(),
                    serde_json::json!({
                        "failures": f.indexes.len(),
                        "reach_ids": f.identifiers.len(),
                    }),
                )
            })
            .collect();

        serde_json::json!({
            "modules": modules,
            "failure_count": self.failure_count(),
            "excluded_count": self.excluded().len(),
            "fingerprint": self.fingerprint(),
        })
    }
}

impl FromIterator<ResolvedFailure> for FailureReport {
    fn from_iter<I: IntoIterator<Item = ResolvedFailure>>(iter: I) -> Self {
        let mut report = Self::new();
        for failure in iter {
            report.insert(failure);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn failure(module: Module, file: &str, indexes: &[u64], ids: &[i64]) -> ResolvedFailure {
        ResolvedFailure {
            module,
            json_file: file.to_string(),
            indexes: indexes.to_vec(),
            identifiers: ids.iter().copied().map(ReachId::from).collect(),
        }
    }

    #[test]
    fn test_excluded_is_union_across_modules() {
        let report: FailureReport = [
            failure(Module::Sad, "reaches.json", &[1], &[2]),
            failure(Module::Moi, "basin.json", &[0], &[2, 10, 11]),
        ]
        .into_iter()
        .collect();

        let expected: BTreeSet<ReachId> = [2_i64, 10, 11].into_iter().map(ReachId::from).collect();
        assert_eq!(report.excluded(), expected);
        assert_eq!(report.failure_count(), 2);
    }

    #[test]
    fn test_persisted_layout() {
        let report: FailureReport = [failure(Module::Sad, "reaches.json", &[1, 4], &[2, 5])]
            .into_iter()
            .collect();

        let value: serde_json::Value = serde_json::from_slice(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "sad": {"json_file": "reaches.json", "indexes": [1, 4], "reach_ids": [2, 5]}
            })
        );
    }

    #[test]
    fn test_fingerprint_ignores_module_attribution() {
        let a: FailureReport = [failure(Module::Sad, "reaches.json", &[1], &[2, 3])]
            .into_iter()
            .collect();
        let b: FailureReport = [
            failure(Module::Momma, "reaches.json", &[2], &[3]),
            failure(Module::Neobam, "reaches.json", &[1], &[2]),
        ]
        .into_iter()
        .collect();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), FailureReport::new().fingerprint());
    }
}
