//! Testing utilities for redrive runs.
//!
//! This module provides:
//! - Builders for failure and manifest markers
//! - Pinned in-memory datasets
//! - A map-result bucket seeded with markers

mod fixtures;

pub use fixtures::{
    failure_marker, manifest_marker, DatasetFixture, MapResultsFixture, TEST_EXECUTION_ARN,
    TEST_PREFIX,
};
