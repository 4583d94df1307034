//! Reach identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain key shared by every dataset of a run.
///
/// Reach identifiers are normally 11-digit integers, but some datasets carry
/// them as strings; both forms are accepted and serialized back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReachId {
    /// Numeric identifier.
    Int(i64),
    /// Textual identifier.
    Text(String),
}

impl fmt::Display for ReachId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ReachId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for ReachId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<String> for ReachId {
    fn from(id: String) -> Self {
        Self::Text(id)
    }
}
