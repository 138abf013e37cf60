// Public modules so checkout-core can use them
pub mod errors;
pub mod evaluator;
pub mod result;
pub mod types;

pub use errors::{ComparisonError, UnknownVariant};
pub use result::CheckResult;
pub use types::{
    AnyComparison, AnyValue, Comparison, ComparisonSettings, DenyUnknownFields, Equals,
    GroupResultMode, NotEquals, Range, ReduceMethod, Severity, Threshold, Value,
};

/// --- Pure Rust API for checkout-core ---
pub fn compare_json(json_comparison: &str, value: Option<&Value>) -> Result<CheckResult, serde_json::Error> {
    let comparison: Comparison = serde_json::from_str(json_comparison)?;
    Ok(comparison.compare(value))
}
