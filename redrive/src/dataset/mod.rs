//! Typed access to the family of JSON datasets a workflow run launched with.
//!
//! This module provides:
//! - The three dataset shapes and their resolve/filter operations
//! - Dataset file descriptors and the family they form
//! - A store reading the launch-time files from the input directory

mod shape;
mod store;

pub use shape::{BasinRecord, Dataset, DatasetShape, ReachRecord};
pub use store::DatasetStore;

use serde::{Deserialize, Serialize};

/// A dataset file name paired with its declared shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetFile {
    /// File name relative to the input directory.
    pub name: String,
    /// Declared shape.
    pub shape: DatasetShape,
}

impl DatasetFile {
    /// Creates a dataset file descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, shape: DatasetShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Basin-shaped file.
    #[must_use]
    pub fn basin(name: impl Into<String>) -> Self {
        Self::new(name, DatasetShape::Basin)
    }

    /// Flat reaches file.
    #[must_use]
    pub fn flat(name: impl Into<String>) -> Self {
        Self::new(name, DatasetShape::Flat)
    }

    /// Sets-shaped file.
    #[must_use]
    pub fn sets(name: impl Into<String>) -> Self {
        Self::new(name, DatasetShape::Sets)
    }
}
