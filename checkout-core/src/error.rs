// src/error.rs
use thiserror::Error;

use comparisons::{CheckResult, Comparison};

/// A path segment could not be resolved against the current tree shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathResolutionError {
    #[error("{owner} has no field {field:?}")]
    MissingField { owner: &'static str, field: String },

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("key {0:?} not found in mapping")]
    MissingKey(String),

    #[error("segment {position}: expected {expected}, found {found}")]
    KindMismatch {
        position: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("segment {position}: path was captured on {expected}, tree has {found}")]
    OwnerMismatch {
        position: usize,
        expected: String,
        found: &'static str,
    },

    #[error("segment {position} is terminal but the path continues")]
    TrailingSegments { position: usize },

    #[error("path is empty")]
    EmptyPath,
}

/// A replacement value could not be coerced into the leaf's type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {value:?} to {target}: {reason}")]
pub struct ReplaceConversionError {
    pub value: String,
    pub target: &'static str,
    pub reason: String,
}

impl ReplaceConversionError {
    pub fn new(value: impl ToString, target: &'static str, reason: impl Into<String>) -> Self {
        Self {
            value: value.to_string(),
            target,
            reason: reason.into(),
        }
    }
}

/// Failure of a single in-place edit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EditError {
    #[error(transparent)]
    Path(#[from] PathResolutionError),

    #[error(transparent)]
    Conversion(#[from] ReplaceConversionError),

    #[error("key {0:?} already exists in mapping")]
    DuplicateKey(String),

    #[error("cannot assign a value to a {0} node")]
    NotALeaf(&'static str),
}

#[derive(Debug, Error)]
pub enum FindReplaceError {
    #[error("regex is not valid: {pattern}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Path(#[from] PathResolutionError),
}

/// Transport-level failures reported by a signal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("timed out connecting to {0}")]
    ConnectionTimeout(String),

    #[error("{0} is disconnected")]
    Disconnected(String),

    #[error("could not create signal {id}: {reason}")]
    Create { id: String, reason: String },

    #[error("reading {id} failed: {reason}")]
    Read { id: String, reason: String },

    #[error("destroying {0} failed")]
    Destroy(String),
}

impl SignalError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SignalError::ConnectionTimeout(_) | SignalError::Disconnected(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DirectoryError {
    #[error("device {0} not found")]
    NotFound(String),

    #[error("device {name} failed to load: {reason}")]
    Load { name: String, reason: String },

    #[error("no device directory configured")]
    Unavailable,
}

/// Why one prepared unit could not be built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrepareFailure {
    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("attribute {attr} does not exist on device {device}")]
    MissingAttribute { device: String, attr: String },
}

/// Preparation of one identifier/comparison pair failed.
#[derive(Debug, Clone, Error)]
#[error("Failed to prepare comparison {} for {identifier}: {source}", label(.name, .comparison))]
pub struct PreparedComparisonError {
    pub identifier: String,
    pub comparison: Comparison,
    pub name: Option<String>,
    #[source]
    pub source: PrepareFailure,
}

fn label(name: &Option<String>, comparison: &Comparison) -> String {
    match name {
        Some(name) => name.clone(),
        None => comparison.kind_name().to_string(),
    }
}

impl PreparedComparisonError {
    /// Result-equivalent entry at the comparison's failure severity.
    pub fn to_result(&self) -> CheckResult {
        CheckResult::new(self.comparison.settings().severity_on_failure, self.to_string())
    }
}
