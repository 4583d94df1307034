//! Run configuration.
//!
//! A [`RedriveConfig`] is built once per attempt (from CLI flags or code) and
//! handed by reference to every component. Nothing in it is mutated after
//! construction; expanded mode selects a different [`ModuleTable`] instead
//! of patching a shared one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::Module;
use crate::dataset::DatasetFile;
use crate::errors::{RedriveError, Result};
use crate::retry::{CallPolicy, RetryConfig};

/// Reaches file used by a regular run.
pub const REACHES_FILE: &str = "reaches.json";
/// Reaches file used by an expanded run.
pub const EXPANDED_REACHES_FILE: &str = "expanded_reaches_of_interest.json";
/// Basin file.
pub const BASIN_FILE: &str = "basin.json";
/// Default stem of the working subset file the next execution reads.
pub const DEFAULT_SUBSET_FILE: &str = "reaches_of_interest.json";
/// Name of the failure report inside the run prefix.
pub const FAILURE_REPORT_FILE: &str = "failures.json";
/// Files copied unchanged next to rewritten datasets.
pub const AUXILIARY_FILES: [&str; 2] = ["continent.json", "continent-setfinder.json"];

/// Which constraint mode the workflow runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Constrained run.
    #[default]
    Constrained,
    /// Unconstrained run.
    Unconstrained,
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constrained => write!(f, "constrained"),
            Self::Unconstrained => write!(f, "unconstrained"),
        }
    }
}

impl FromStr for RunType {
    type Err = RedriveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constrained" => Ok(Self::Constrained),
            "unconstrained" => Ok(Self::Unconstrained),
            other => Err(RedriveError::Config(format!(
                "run type must be 'constrained' or 'unconstrained', got '{other}'"
            ))),
        }
    }
}

/// Static mapping from each module to the dataset file its map state reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleTable {
    entries: BTreeMap<Module, DatasetFile>,
}

impl ModuleTable {
    /// Builds the table for a regular or expanded run.
    #[must_use]
    pub fn new(expanded: bool) -> Self {
        let entries = Module::ALL
            .iter()
            .map(|module| {
                let file = match module {
                    Module::Input => DatasetFile::flat(Self::reaches_file(expanded)),
                    Module::Hivdi => DatasetFile::sets("hivdisets.json"),
                    Module::Metroman => DatasetFile::sets("metrosets.json"),
                    Module::Sic4dvar => DatasetFile::sets("sicsets.json"),
                    Module::Moi => DatasetFile::basin(BASIN_FILE),
                    _ => DatasetFile::flat(REACHES_FILE),
                };
                (*module, file)
            })
            .collect();

        Self { entries }
    }

    fn reaches_file(expanded: bool) -> &'static str {
        if expanded {
            EXPANDED_REACHES_FILE
        } else {
            REACHES_FILE
        }
    }

    /// Dataset file read by `module`.
    #[must_use]
    pub fn dataset_for(&self, module: Module) -> &DatasetFile {
        // Every module is inserted by `new`.
        &self.entries[&module]
    }

    /// The dataset the `input` module fans out over.
    #[must_use]
    pub fn primary(&self) -> &DatasetFile {
        self.dataset_for(Module::Input)
    }
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Every dataset file that shares the run's identifier space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFamily {
    /// Files in the order they are rewritten.
    pub files: Vec<DatasetFile>,
}

impl DatasetFamily {
    /// The family for a regular or expanded run.
    #[must_use]
    pub fn new(expanded: bool) -> Self {
        Self {
            files: vec![
                DatasetFile::basin(BASIN_FILE),
                DatasetFile::flat(ModuleTable::reaches_file(expanded)),
                DatasetFile::sets("hivdisets.json"),
                DatasetFile::sets("metrosets.json"),
                DatasetFile::sets("neosets.json"),
                DatasetFile::sets("sicsets.json"),
            ],
        }
    }
}

impl Default for DatasetFamily {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Parameters the next execution is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchParams {
    /// Four-digit run version, e.g. `0001`.
    pub version: String,
    /// Constraint mode.
    pub run_type: RunType,
    /// Percentage of map sub-tasks allowed to fail before aborting.
    pub tolerated_failure_percentage: u8,
}

impl DispatchParams {
    /// Creates dispatch parameters.
    #[must_use]
    pub fn new(version: impl Into<String>, run_type: RunType, tolerated: u8) -> Self {
        Self {
            version: version.into(),
            run_type,
            tolerated_failure_percentage: tolerated,
        }
    }

    /// Checks the version format and percentage range.
    pub fn validate(&self) -> Result<()> {
        if self.version.len() != 4 || !self.version.chars().all(|c| c.is_ascii_digit()) {
            return Err(RedriveError::Config(format!(
                "version must be 4 digits (e.g. 0001), got '{}'",
                self.version
            )));
        }
        if self.tolerated_failure_percentage > 100 {
            return Err(RedriveError::Config(format!(
                "tolerated failure percentage must be 0-100, got {}",
                self.tolerated_failure_percentage
            )));
        }
        Ok(())
    }
}

/// Configuration for one redrive attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedriveConfig {
    /// Directory holding the datasets the failed execution launched with.
    pub input_dir: PathBuf,
    /// Environment venue prefix, e.g. `confluence-dev1`.
    pub prefix: String,
    /// Whether the run used the expanded reach list.
    #[serde(default)]
    pub expanded: bool,
    /// Term identifying failure markers in map-result keys.
    #[serde(default = "default_failure_term")]
    pub failure_term: String,
    /// Term identifying manifest markers in map-result keys.
    #[serde(default = "default_manifest_term")]
    pub manifest_term: String,
    /// Name of the working subset file (the run token is appended).
    #[serde(default = "default_subset_file")]
    pub subset_file: String,
    /// Existing subset to refine instead of starting from the full input.
    #[serde(default)]
    pub existing_subset: Option<String>,
    /// Also upload reduced copies of every dataset in the family.
    #[serde(default)]
    pub rewrite_datasets: bool,
    /// Stop after the report and subset are written.
    #[serde(default)]
    pub report_only: bool,
    /// Maximum marker downloads in flight.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retry configuration for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Parameters for the next execution.
    pub dispatch: DispatchParams,
}

fn default_failure_term() -> String {
    "FAILED".to_string()
}

fn default_manifest_term() -> String {
    "manifest".to_string()
}

fn default_subset_file() -> String {
    DEFAULT_SUBSET_FILE.to_string()
}

fn default_worker_limit() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl RedriveConfig {
    /// Creates a configuration with defaults for everything but the venue.
    #[must_use]
    pub fn new(input_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            input_dir: input_dir.into(),
            prefix: prefix.into(),
            expanded: false,
            failure_term: default_failure_term(),
            manifest_term: default_manifest_term(),
            subset_file: default_subset_file(),
            existing_subset: None,
            rewrite_datasets: false,
            report_only: false,
            worker_limit: default_worker_limit(),
            request_timeout_ms: default_timeout_ms(),
            retry: RetryConfig::default(),
            dispatch: DispatchParams::new("0001", RunType::default(), 0),
        }
    }

    /// Sets expanded mode.
    #[must_use]
    pub fn with_expanded(mut self, expanded: bool) -> Self {
        self.expanded = expanded;
        self
    }

    /// Sets the working subset file name.
    #[must_use]
    pub fn with_subset_file(mut self, name: impl Into<String>) -> Self {
        self.subset_file = name.into();
        self
    }

    /// Refines an existing subset instead of the full input.
    #[must_use]
    pub fn with_existing_subset(mut self, key: impl Into<String>) -> Self {
        self.existing_subset = Some(key.into());
        self
    }

    /// Enables rewriting the dataset family.
    #[must_use]
    pub fn with_rewrite_datasets(mut self, rewrite: bool) -> Self {
        self.rewrite_datasets = rewrite;
        self
    }

    /// Sets report-only mode.
    #[must_use]
    pub fn with_report_only(mut self, report_only: bool) -> Self {
        self.report_only = report_only;
        self
    }

    /// Sets the download worker limit.
    #[must_use]
    pub fn with_worker_limit(mut self, limit: usize) -> Self {
        self.worker_limit = limit;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the dispatch parameters.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchParams) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Bucket holding workflow JSON inputs and redrive artifacts.
    #[must_use]
    pub fn json_bucket(&self) -> String {
        format!("{}-json", self.prefix)
    }

    /// Bucket holding distributed map results.
    #[must_use]
    pub fn map_bucket(&self) -> String {
        format!("{}-map-state", self.prefix)
    }

    /// Module to dataset mapping for this run.
    #[must_use]
    pub fn module_table(&self) -> ModuleTable {
        ModuleTable::new(self.expanded)
    }

    /// Dataset family for this run.
    #[must_use]
    pub fn dataset_family(&self) -> DatasetFamily {
        DatasetFamily::new(self.expanded)
    }

    /// Timeout and retry policy for remote calls.
    #[must_use]
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(
            self.retry.clone(),
            Duration::from_millis(self.request_timeout_ms),
        )
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(RedriveError::Config("prefix must not be empty".to_string()));
        }
        if self.worker_limit == 0 {
            return Err(RedriveError::Config("worker limit must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(RedriveError::Config("retry attempts must be at least 1".to_string()));
        }
        if self.subset_file.trim().is_empty() || self.subset_file.contains('/') {
            return Err(RedriveError::Config(format!(
                "subset file must be a plain file name, got '{}'",
                self.subset_file
            )));
        }
        if !self.report_only {
            self.dispatch.validate()?;
        }
        Ok(())
    }
}
