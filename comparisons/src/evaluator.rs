use crate::errors::ComparisonError;
use crate::result::CheckResult;
use crate::types::{Comparison, ReduceMethod, Severity, Value};

// ----------------- Helpers -----------------

fn numeric(value: &Value) -> Result<f64, ComparisonError> {
    value.as_f64().ok_or(ComparisonError::TypeMismatch {
        expected: "number",
        found: value.type_name(),
    })
}

fn is_in_range(value: f64, low: f64, high: f64, inclusive: bool) -> bool {
    if inclusive {
        low <= value && value <= high
    } else {
        low < value && value < high
    }
}

/// `|a - b| <= atol + rtol * |b|`
fn is_close(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}

fn equals_within(
    value: &Value,
    target: &Value,
    rtol: Option<f64>,
    atol: Option<f64>,
) -> Result<bool, ComparisonError> {
    if rtol.is_none() && atol.is_none() {
        return Ok(value.loosely_equals(target));
    }
    Ok(is_close(
        numeric(value)?,
        numeric(target)?,
        rtol.unwrap_or(0.0),
        atol.unwrap_or(0.0),
    ))
}

fn tolerance_text(rtol: Option<f64>, atol: Option<f64>) -> String {
    if rtol.is_none() && atol.is_none() {
        return String::new();
    }
    let show = |t: Option<f64>| t.map(|v| v.to_string()).unwrap_or_else(|| "None".into());
    format!(" within rtol={}, atol={}", show(rtol), show(atol))
}

// ----------------- Core -----------------

impl Comparison {
    /// Human-readable description of the comparison operation itself.
    pub fn describe(&self) -> String {
        match self {
            Comparison::Equals(c) => {
                let op = if c.settings.invert { "!=" } else { "==" };
                format!("{op} {}{}", c.value, tolerance_text(c.rtol, c.atol))
            }
            Comparison::NotEquals(c) => {
                let op = if c.settings.invert { "==" } else { "!=" };
                format!("{op} {}{}", c.value, tolerance_text(c.rtol, c.atol))
            }
            Comparison::AnyValue(c) => {
                let values = c
                    .values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("One of {values}")
            }
            Comparison::AnyComparison(c) => {
                let nested = c
                    .comparisons
                    .iter()
                    .map(|n| n.describe())
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("Any of:\n{nested}")
            }
            Comparison::Greater(c) => format!("> {}", c.value),
            Comparison::GreaterOrEqual(c) => format!(">= {}", c.value),
            Comparison::Less(c) => format!("< {}", c.value),
            Comparison::LessOrEqual(c) => format!("<= {}", c.value),
            Comparison::Range(c) => {
                let (open, close) = if c.inclusive { ('[', ']') } else { ('(', ')') };
                let mut checks = Vec::new();
                if let (Some(low), Some(high)) = (c.low, c.high) {
                    checks.push(format!("Error if {open}{low}, {high}{close}"));
                }
                if let (Some(low), Some(high)) = (c.warn_low, c.warn_high) {
                    checks.push(format!("Warn if {open}{low}, {high}{close}"));
                }
                checks.join("\n")
            }
        }
    }

    /// Evaluate a present value, ignoring `invert`.
    ///
    /// `Ok(false)` is a plain failure. `Err` is a warning or a value the
    /// comparison cannot handle.
    pub fn evaluate(&self, value: &Value) -> Result<bool, ComparisonError> {
        match self {
            Comparison::Equals(c) => equals_within(value, &c.value, c.rtol, c.atol),
            Comparison::NotEquals(c) => {
                equals_within(value, &c.value, c.rtol, c.atol).map(|eq| !eq)
            }
            Comparison::AnyValue(c) => Ok(c.values.iter().any(|v| value.loosely_equals(v))),
            Comparison::AnyComparison(c) => {
                for nested in &c.comparisons {
                    match nested.evaluate(value) {
                        Ok(true) => return Ok(true),
                        Ok(false) | Err(ComparisonError::Warning(_)) => {}
                        Err(e @ ComparisonError::TypeMismatch { .. }) => return Err(e),
                    }
                }
                Ok(false)
            }
            Comparison::Greater(c) => Ok(numeric(value)? > c.value),
            Comparison::GreaterOrEqual(c) => Ok(numeric(value)? >= c.value),
            Comparison::Less(c) => Ok(numeric(value)? < c.value),
            Comparison::LessOrEqual(c) => Ok(numeric(value)? <= c.value),
            Comparison::Range(c) => {
                let v = numeric(value)?;
                if let (Some(low), Some(high)) = (c.low, c.high) {
                    if !is_in_range(v, low, high, c.inclusive) {
                        return Ok(false);
                    }
                }
                if let (Some(low), Some(high)) = (c.warn_low, c.warn_high) {
                    if !is_in_range(v, low, high, c.inclusive) {
                        return Err(ComparisonError::Warning(format!(
                            "In warning range ({})",
                            self.describe()
                        )));
                    }
                }
                Ok(true)
            }
        }
    }

    /// Compare the provided value using the comparator's settings.
    ///
    /// `None` means the endpoint produced no value (disconnected).
    pub fn compare(&self, value: Option<&Value>) -> CheckResult {
        let settings = self.settings();
        let value = match value {
            Some(v) => v,
            None => {
                return CheckResult::new(
                    settings.if_disconnected,
                    "Value unset (i.e., disconnected)",
                );
            }
        };

        let passed = match self.evaluate(value) {
            Ok(passed) => passed,
            Err(ComparisonError::Warning(msg)) => {
                return CheckResult::new(
                    Severity::Warning,
                    format!("Value {value} warned: {msg}"),
                );
            }
            Err(e) => {
                return CheckResult::new(
                    Severity::InternalError,
                    format!("Value {value} raised {}: {e}", e.kind()),
                );
            }
        };

        if passed != settings.invert {
            return CheckResult::success();
        }

        let mut desc = self.describe();
        if let Some(description) = &settings.description {
            desc = format!("{description} ({desc})");
        }
        CheckResult::new(settings.severity_on_failure, format!("{value} failed: {desc}"))
    }
}

impl ReduceMethod {
    /// Fold numeric samples into one value; `None` for an empty sample set.
    pub fn reduce(&self, samples: &[f64]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let out = match self {
            ReduceMethod::Average => samples.iter().sum::<f64>() / n,
            ReduceMethod::Sum => samples.iter().sum(),
            ReduceMethod::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
            ReduceMethod::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ReduceMethod::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            ReduceMethod::Std => {
                let mean = samples.iter().sum::<f64>() / n;
                let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
                var.sqrt()
            }
        };
        Some(out)
    }
}
