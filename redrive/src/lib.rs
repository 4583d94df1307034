//! # Redrive
//!
//! Failure reconciliation and redrive engine for distributed map-state
//! workflows.
//!
//! After a fan-out workflow partially fails, redrive:
//!
//! - **Locates failures**: scans map results for failed sub-tasks per module
//! - **Resolves identifiers**: maps failed indexes to the reaches they covered
//! - **Reconciles**: removes every failed reach from the working subset and
//!   persists a failure report
//! - **Redrives**: starts a fresh execution of the same state machine over
//!   the reduced subset and clears the exhausted map results
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use redrive::prelude::*;
//!
//! let config = RedriveConfig::new("/mnt/data/input", "confluence-dev1")
//!     .with_dispatch(DispatchParams::new("0001", RunType::Constrained, 10));
//!
//! let pipeline = RedrivePipeline::new(config, store, orchestrator)?;
//! let outcome = pipeline.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod correlate;
pub mod dataset;
pub mod dispatch;
pub mod errors;
pub mod failures;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod reconcile;
pub mod retry;
pub mod testing;

mod integration_tests;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DispatchParams, ModuleTable, RedriveConfig, RunType};
    pub use crate::core::{Module, ReachId, RunContext, RunToken};
    pub use crate::correlate::ExecutionCorrelator;
    pub use crate::dataset::{Dataset, DatasetFile, DatasetShape, DatasetStore};
    pub use crate::dispatch::{ExecutionArn, RedriveDispatcher};
    pub use crate::errors::{RedriveError, Result};
    pub use crate::failures::{FailureLocator, FailureReport, IdentifierResolver};
    pub use crate::observability::{init_tracing, LogFormat, TracingConfig};
    pub use crate::pipeline::{RedriveOutcome, RedrivePipeline};
    #[cfg(feature = "http")]
    pub use crate::ports::StatesHttpClient;
    pub use crate::ports::{FsObjectStore, ObjectStore, Orchestrator};
    pub use crate::reconcile::{Reconciler, SubsetSource, WorkingSubset};
    pub use crate::retry::{CallPolicy, RetryConfig};
}
