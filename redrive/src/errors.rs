//! Error types for the redrive engine.
//!
//! Every failure the engine can raise is a variant of [`RedriveError`].
//! Transport-level problems (object store, orchestration transport,
//! timeouts) are transient and retried; everything else is terminal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RedriveError>;

/// The main error type for redrive operations.
#[derive(Debug, Error)]
pub enum RedriveError {
    /// The object store failed to list, read or write.
    #[error("Object store error on {bucket}/{key}: {message}")]
    Store {
        /// Bucket involved.
        bucket: String,
        /// Key (or prefix) involved.
        key: String,
        /// Underlying message.
        message: String,
    },

    /// An object key was missing from the store.
    #[error("Object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket involved.
        bucket: String,
        /// Missing key.
        key: String,
    },

    /// A write-once key already exists.
    #[error("Refusing to overwrite existing object {bucket}/{key}")]
    AlreadyExists {
        /// Bucket involved.
        bucket: String,
        /// Existing key.
        key: String,
    },

    /// A remote call exceeded its deadline.
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The orchestration service could not be reached.
    #[error("Orchestration transport error: {0}")]
    Orchestration(String),

    /// The orchestration service rejected a request other than a start.
    #[error("Orchestration service rejected {operation}: {message}")]
    Rejected {
        /// The operation that was rejected.
        operation: String,
        /// Message returned by the service.
        message: String,
    },

    /// The orchestration service rejected the start request.
    #[error("Orchestration service rejected execution start: {0}")]
    Dispatch(String),

    /// A failure or manifest marker could not be interpreted.
    #[error("{0}")]
    CorruptArtifact(#[from] CorruptArtifactError),

    /// A module name did not match any known workflow module.
    #[error("Unknown workflow module: '{0}'")]
    UnknownModule(String),

    /// More than one execution produced the current artifacts.
    #[error(
        "More than one execution ARN has been detected ({}); delete all previous run files from {bucket}",
        .arns.join(", ")
    )]
    AmbiguousExecution {
        /// The distinct execution ARNs found.
        arns: Vec<String>,
        /// The map-result bucket holding the stale artifacts.
        bucket: String,
    },

    /// No manifest marker pointed at any execution.
    #[error("No execution could be located from manifests in {bucket}")]
    NoExecution {
        /// The map-result bucket that was scanned.
        bucket: String,
    },

    /// The reduced working set has nothing left to run.
    #[error("All reaches were removed from the working subset; see failure report at {report_key}")]
    EmptyWorkingSet {
        /// Location of the persisted failure report.
        report_key: String,
    },

    /// An ARN did not have the expected structure.
    #[error("Invalid ARN '{arn}': {reason}")]
    InvalidArn {
        /// The offending ARN.
        arn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Configuration was rejected during validation.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RedriveError {
    /// Creates a store error.
    #[must_use]
    pub fn store(
        bucket: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Store {
            bucket: bucket.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid ARN error.
    #[must_use]
    pub fn invalid_arn(arn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArn {
            arn: arn.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error may succeed when the call is repeated.
    ///
    /// Only transport-level failures qualify. Application-level outcomes
    /// such as an ambiguous execution or an empty working set never do.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store { .. } | Self::Timeout { .. } | Self::Orchestration(_)
        )
    }

    /// Short machine-readable name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { .. } => "Store",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Timeout { .. } => "Timeout",
            Self::Orchestration(_) => "Orchestration",
            Self::Rejected { .. } => "Rejected",
            Self::Dispatch(_) => "Dispatch",
            Self::CorruptArtifact(_) => "CorruptArtifact",
            Self::UnknownModule(_) => "UnknownModule",
            Self::AmbiguousExecution { .. } => "AmbiguousExecution",
            Self::NoExecution { .. } => "NoExecution",
            Self::EmptyWorkingSet { .. } => "EmptyWorkingSet",
            Self::InvalidArn { .. } => "InvalidArn",
            Self::Config(_) => "Config",
            Self::Serialization(_) => "Serialization",
            Self::Io(_) => "Io",
        }
    }

    /// Converts to a dictionary representation for structured reporting.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map.insert("transient".to_string(), serde_json::json!(self.is_transient()));

        match self {
            Self::AmbiguousExecution { arns, bucket } => {
                map.insert("arns".to_string(), serde_json::json!(arns));
                map.insert("bucket".to_string(), serde_json::json!(bucket));
            }
            Self::EmptyWorkingSet { report_key } => {
                map.insert("report_key".to_string(), serde_json::json!(report_key));
            }
            Self::CorruptArtifact(err) => {
                map.insert("key".to_string(), serde_json::json!(err.key));
                map.insert("reason".to_string(), serde_json::json!(err.reason));
            }
            _ => {}
        }

        map
    }
}

/// Describes a marker or dataset that violates its expected schema.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("Corrupt artifact '{key}': {reason}")]
pub struct CorruptArtifactError {
    /// Object key or file name of the artifact.
    pub key: String,
    /// What was wrong with it.
    pub reason: String,
}

impl CorruptArtifactError {
    /// Creates a new corrupt artifact error.
    #[must_use]
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
