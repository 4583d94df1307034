//! Locating failed map sub-tasks and attributing them to reach identifiers.
//!
//! This module provides:
//! - [`FailureLocator`] scanning map results for failure markers
//! - [`IdentifierResolver`] mapping failed indexes to identifiers
//! - [`FailureReport`] the persisted outcome of both

mod locator;
mod report;
mod resolver;

pub use locator::{parse_failure_marker, FailureLocator};
pub use report::{FailureReport, ResolvedFailure};
pub use resolver::IdentifierResolver;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::Module;

/// Failed sub-task indexes grouped by module, in discovery order.
pub type FailureIndex = BTreeMap<Module, Vec<u64>>;

/// One failed map sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Module whose map state ran the sub-task.
    pub module: Module,
    /// Position of the sub-task in the module's dataset.
    pub index: u64,
}

/// Groups records by module, keeping their relative order.
#[must_use]
pub fn group_failures(records: impl IntoIterator<Item = FailureRecord>) -> FailureIndex {
    let mut index = FailureIndex::new();
    for record in records {
        index.entry(record.module).or_default().push(record.index);
    }
    index
}
