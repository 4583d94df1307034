//! Structural variants of the datasets that share the reach identifier space.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::core::ReachId;
use crate::errors::{CorruptArtifactError, Result};

/// Declared layout of a dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetShape {
    /// Records each holding a list of reach identifiers.
    Basin,
    /// Records each holding one reach identifier.
    Flat,
    /// Groups of records, each record holding one reach identifier.
    Sets,
}

impl fmt::Display for DatasetShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basin => write!(f, "basin"),
            Self::Flat => write!(f, "flat"),
            Self::Sets => write!(f, "sets"),
        }
    }
}

/// A basin record: one map task covering several reaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinRecord {
    /// Reaches in the basin.
    pub reach_id: Vec<ReachId>,
    /// Any other fields, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BasinRecord {
    /// Creates a basin record with no extra fields.
    #[must_use]
    pub fn new(reach_ids: impl IntoIterator<Item = ReachId>) -> Self {
        Self {
            reach_id: reach_ids.into_iter().collect(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A record naming a single reach, used by flat datasets and inside sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachRecord {
    /// The reach.
    pub reach_id: ReachId,
    /// Any other fields, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReachRecord {
    /// Creates a reach record with no extra fields.
    #[must_use]
    pub fn new(reach_id: impl Into<ReachId>) -> Self {
        Self {
            reach_id: reach_id.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A parsed dataset, tagged by shape.
///
/// Position `i` of the outer sequence is the element the workflow's map
/// state handed to sub-task `i`.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    /// Basin-shaped dataset.
    Basin(Vec<BasinRecord>),
    /// Flat reaches dataset.
    Flat(Vec<ReachRecord>),
    /// Grouped sets dataset.
    Sets(Vec<Vec<ReachRecord>>),
}

impl Dataset {
    /// Parses raw JSON as the given shape.
    ///
    /// `name` is only used to label the error when the bytes do not match.
    pub fn parse(shape: DatasetShape, bytes: &[u8], name: &str) -> Result<Self> {
        let corrupt = |e: serde_json::Error| {
            CorruptArtifactError::new(name, format!("not a valid {shape} dataset: {e}"))
        };

        let dataset = match shape {
            DatasetShape::Basin => Self::Basin(serde_json::from_slice(bytes).map_err(corrupt)?),
            DatasetShape::Flat => Self::Flat(serde_json::from_slice(bytes).map_err(corrupt)?),
            DatasetShape::Sets => Self::Sets(serde_json::from_slice(bytes).map_err(corrupt)?),
        };
        Ok(dataset)
    }

    /// Returns the shape tag.
    #[must_use]
    pub fn shape(&self) -> DatasetShape {
        match self {
            Self::Basin(_) => DatasetShape::Basin,
            Self::Flat(_) => DatasetShape::Flat,
            Self::Sets(_) => DatasetShape::Sets,
        }
    }

    /// Number of top-level elements (map sub-tasks).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Basin(records) => records.len(),
            Self::Flat(records) => records.len(),
            Self::Sets(groups) => groups.len(),
        }
    }

    /// Returns true if there are no top-level elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers held by the element at `index`, or `None` past the end.
    #[must_use]
    pub fn resolve(&self, index: usize) -> Option<BTreeSet<ReachId>> {
        match self {
            Self::Basin(records) => records
                .get(index)
                .map(|record| record.reach_id.iter().cloned().collect()),
            Self::Flat(records) => records
                .get(index)
                .map(|record| BTreeSet::from([record.reach_id.clone()])),
            Self::Sets(groups) => groups
                .get(index)
                .map(|group| group.iter().map(|record| record.reach_id.clone()).collect()),
        }
    }

    /// Every identifier in dataset order, first occurrence kept.
    #[must_use]
    pub fn identifiers(&self) -> Vec<ReachId> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let mut push = |id: &ReachId| {
            if seen.insert(id.clone()) {
                ordered.push(id.clone());
            }
        };

        match self {
            Self::Basin(records) => records.iter().flat_map(|r| &r.reach_id).for_each(&mut push),
            Self::Flat(records) => records.iter().map(|r| &r.reach_id).for_each(&mut push),
            Self::Sets(groups) => groups
                .iter()
                .flatten()
                .map(|r| &r.reach_id)
                .for_each(&mut push),
        }

        ordered
    }

    /// Returns true if no identifier is left in any element.
    #[must_use]
    pub fn has_no_identifiers(&self) -> bool {
        match self {
            Self::Basin(records) => records.iter().all(|r| r.reach_id.is_empty()),
            Self::Flat(records) => records.is_empty(),
            Self::Sets(groups) => groups.iter().all(Vec::is_empty),
        }
    }

    /// Returns a copy with every excluded identifier removed.
    ///
    /// Basin records and set groups lose only their excluded members and are
    /// dropped once nothing is left in them; flat records are dropped when
    /// their identifier is excluded. Relative order is preserved.
    #[must_use]
    pub fn filter(&self, excluded: &BTreeSet<ReachId>) -> Self {
        match self {
            Self::Basin(records) => Self::Basin(
                records
                    .iter()
                    .filter_map(|record| {
                        let kept: Vec<ReachId> = record
                            .reach_id
                            .iter()
                            .filter(|id| !excluded.contains(*id))
                            .cloned()
                            .collect();
                        (!kept.is_empty()).then(|| BasinRecord {
                            reach_id: kept,
                            extra: record.extra.clone(),
                        })
                    })
                    .collect(),
            ),
            Self::Flat(records) => Self::Flat(
                records
                    .iter()
                    .filter(|record| !excluded.contains(&record.reach_id))
                    .cloned()
                    .collect(),
            ),
            Self::Sets(groups) => Self::Sets(
                groups
                    .iter()
                    .map(|group| {
                        group
                            .iter()
                            .filter(|record| !excluded.contains(&record.reach_id))
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .filter(|group| !group.is_empty())
                    .collect(),
            ),
        }
    }

    /// Serializes back to the file layout, indented like the workflow's inputs.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Basin(records) => serde_json::to_vec_pretty(records)?,
            Self::Flat(records) => serde_json::to_vec_pretty(records)?,
            Self::Sets(groups) => serde_json::to_vec_pretty(groups)?,
        };
        Ok(bytes)
    }
}
