use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Severity;

/// The result of a single check: a severity and an optional reason.
///
/// `timestamp` is filled at creation and ignored by equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl CheckResult {
    pub fn new(severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            severity,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn success() -> Self {
        Self {
            severity: Severity::Success,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Placeholder held by a prepared comparison that has not run yet.
    pub fn incomplete() -> Self {
        Self::new(Severity::Warning, "step incomplete")
    }

    /// Combine results into one: worst severity, every reason kept.
    pub fn combine(results: &[CheckResult]) -> Self {
        let severity = Severity::worst(results.iter().map(|r| r.severity));
        let reasons: Vec<&str> = results.iter().filter_map(|r| r.reason.as_deref()).collect();
        Self {
            severity,
            reason: if reasons.is_empty() {
                None
            } else {
                Some(reasons.join("; "))
            },
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.severity == Severity::Success
    }
}

impl Default for CheckResult {
    fn default() -> Self {
        Self::success()
    }
}

impl PartialEq for CheckResult {
    fn eq(&self, other: &Self) -> bool {
        self.severity == other.severity && self.reason == other.reason
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "[{}] {}", self.severity, reason),
            None => write!(f, "[{}]", self.severity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_timestamp() {
        let a = CheckResult::new(Severity::Error, "bad");
        let mut b = a.clone();
        b.timestamp = b.timestamp + chrono::Duration::seconds(5);
        assert_eq!(a, b);
    }

    #[test]
    fn combine_takes_worst_and_keeps_reasons() {
        let combined = CheckResult::combine(&[
            CheckResult::success(),
            CheckResult::new(Severity::Warning, "w"),
            CheckResult::new(Severity::Error, "e"),
        ]);
        assert_eq!(combined.severity, Severity::Error);
        assert_eq!(combined.reason.as_deref(), Some("w; e"));
        assert_eq!(CheckResult::combine(&[]).severity, Severity::Success);
    }
}
