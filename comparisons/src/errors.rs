use thiserror::Error;

/// Raised by a comparator to exit early with a specific outcome. Plain
/// failures are `Ok(false)`, never an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComparisonError {
    /// The value passed with a caveat; reported as a warning.
    #[error("{0}")]
    Warning(String),

    /// The comparison cannot operate on this kind of value.
    #[error("expected {expected}, got {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl ComparisonError {
    pub fn kind(&self) -> &'static str {
        match self {
            ComparisonError::Warning(_) => "ComparisonWarning",
            ComparisonError::TypeMismatch { .. } => "TypeError",
        }
    }
}

/// A variant name that does not belong to the named enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name:?} is not a variant of {enumeration}")]
pub struct UnknownVariant {
    pub enumeration: &'static str,
    pub name: String,
}
