use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::UnknownVariant;

// ----------------- Severity -----------------

/// Outcome classification for a comparison, totally ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A successful result without any issue.
    #[default]
    Success,
    /// A successful result but with something worth noting.
    Warning,
    /// A failing result.
    Error,
    /// A failing and unexpected result.
    InternalError,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Success,
        Severity::Warning,
        Severity::Error,
        Severity::InternalError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::InternalError => "internal_error",
        }
    }

    /// Worst severity of the lot; `Success` when empty.
    pub fn worst<I: IntoIterator<Item = Severity>>(severities: I) -> Severity {
        severities.into_iter().fold(Severity::Success, Severity::max)
    }

    /// Best severity of the lot; `Success` when empty.
    pub fn best<I: IntoIterator<Item = Severity>>(severities: I) -> Severity {
        severities
            .into_iter()
            .reduce(Severity::min)
            .unwrap_or(Severity::Success)
    }

    pub(crate) fn default_failure() -> Severity {
        Severity::Error
    }

    pub(crate) fn is_error(&self) -> bool {
        *self == Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                enumeration: "Severity",
                name: s.to_string(),
            })
    }
}

// ----------------- GroupResultMode -----------------

/// How the results under a configuration group fold into one severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupResultMode {
    /// Every item must succeed: the worst severity wins.
    #[default]
    All,
    /// One successful item is enough: the best severity wins.
    Any,
}

impl GroupResultMode {
    pub const ALL: [GroupResultMode; 2] = [GroupResultMode::All, GroupResultMode::Any];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupResultMode::All => "all",
            GroupResultMode::Any => "any",
        }
    }

    pub fn reduce<I: IntoIterator<Item = Severity>>(&self, severities: I) -> Severity {
        match self {
            GroupResultMode::All => Severity::worst(severities),
            GroupResultMode::Any => Severity::best(severities),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == GroupResultMode::default()
    }
}

impl fmt::Display for GroupResultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupResultMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GroupResultMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                enumeration: "GroupResultMode",
                name: s.to_string(),
            })
    }
}

// ----------------- Value -----------------

/// A primitive endpoint value: what a signal reads and what comparisons hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Numeric view; booleans count as 0/1, strings have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
        }
    }

    /// Equality across numeric representations (`1 == 1.0 == true`).
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Str(_), _) | (_, Value::Str(_)) => false,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            // Debug keeps the trailing ".0" so floats stay recognisable as floats.
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// ----------------- Comparisons -----------------

/// Settings shared by every comparison kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSettings {
    /// Description tied to this comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Invert the comparison's result.
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    /// Period (seconds) over which samples are collected before comparing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_period: Option<f64>,
    /// Reduce collected samples by this method.
    #[serde(default, skip_serializing_if = "ReduceMethod::is_default")]
    pub reduce_method: ReduceMethod,
    /// Request and compare string values.
    #[serde(default, skip_serializing_if = "is_false")]
    pub string: bool,
    /// If the comparison fails, use this result severity.
    #[serde(default = "Severity::default_failure", skip_serializing_if = "Severity::is_error")]
    pub severity_on_failure: Severity,
    /// If disconnected and unable to perform the comparison, use this severity.
    #[serde(default = "Severity::default_failure", skip_serializing_if = "Severity::is_error")]
    pub if_disconnected: Severity,
    /// Connection / read window in seconds; the runtime default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Catches keys no field of the enclosing comparison claimed.
    #[serde(flatten)]
    pub unknown: DenyUnknownFields,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            description: None,
            invert: false,
            reduce_period: None,
            reduce_method: ReduceMethod::default(),
            string: false,
            severity_on_failure: Severity::default_failure(),
            if_disconnected: Severity::default_failure(),
            timeout: None,
            unknown: DenyUnknownFields,
        }
    }
}

/// Flattened into a struct, fails on the first key left over once every
/// other field has taken its own. Serializes to nothing.
///
/// `deny_unknown_fields` cannot be combined with `flatten`, and every
/// comparison flattens its settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenyUnknownFields;

impl Serialize for DenyUnknownFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for DenyUnknownFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LeftoverVisitor;

        impl<'de> Visitor<'de> for LeftoverVisitor {
            type Value = DenyUnknownFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("no fields beyond the comparison's own")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                match map.next_key::<String>()? {
                    Some(key) => Err(de::Error::custom(format!("unknown field `{key}`"))),
                    None => Ok(DenyUnknownFields),
                }
            }
        }

        deserializer.deserialize_map(LeftoverVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equals {
    #[serde(flatten)]
    pub settings: ComparisonSettings,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atol: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotEquals {
    #[serde(flatten)]
    pub settings: ComparisonSettings,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtol: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atol: Option<f64>,
}

/// Passes if the value is in `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyValue {
    #[serde(flatten)]
    pub settings: ComparisonSettings,
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Passes if the value matches *any* of the nested comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyComparison {
    #[serde(flatten)]
    pub settings: ComparisonSettings,
    #[serde(default)]
    pub comparisons: Vec<Comparison>,
}

/// Threshold comparison against a single number (`Greater`, `Less`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(flatten)]
    pub settings: ComparisonSettings,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(flatten)]
    pub settings: ComparisonSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_high: Option<f64>,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub inclusive: bool,
}

/// Closed set of comparison kinds, serialized as a union tagged by kind name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Comparison {
    Equals(Equals),
    NotEquals(NotEquals),
    AnyValue(AnyValue),
    AnyComparison(AnyComparison),
    Greater(Threshold),
    GreaterOrEqual(Threshold),
    Less(Threshold),
    LessOrEqual(Threshold),
    Range(Range),
}

impl Comparison {
    /// `Equals` with default settings.
    pub fn equals(value: impl Into<Value>) -> Self {
        Comparison::Equals(Equals {
            settings: ComparisonSettings::default(),
            value: value.into(),
            rtol: None,
            atol: None,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Comparison::Equals(_) => "Equals",
            Comparison::NotEquals(_) => "NotEquals",
            Comparison::AnyValue(_) => "AnyValue",
            Comparison::AnyComparison(_) => "AnyComparison",
            Comparison::Greater(_) => "Greater",
            Comparison::GreaterOrEqual(_) => "GreaterOrEqual",
            Comparison::Less(_) => "Less",
            Comparison::LessOrEqual(_) => "LessOrEqual",
            Comparison::Range(_) => "Range",
        }
    }

    pub fn settings(&self) -> &ComparisonSettings {
        match self {
            Comparison::Equals(c) => &c.settings,
            Comparison::NotEquals(c) => &c.settings,
            Comparison::AnyValue(c) => &c.settings,
            Comparison::AnyComparison(c) => &c.settings,
            Comparison::Greater(c)
            | Comparison::GreaterOrEqual(c)
            | Comparison::Less(c)
            | Comparison::LessOrEqual(c) => &c.settings,
            Comparison::Range(c) => &c.settings,
        }
    }

    pub fn settings_mut(&mut self) -> &mut ComparisonSettings {
        match self {
            Comparison::Equals(c) => &mut c.settings,
            Comparison::NotEquals(c) => &mut c.settings,
            Comparison::AnyValue(c) => &mut c.settings,
            Comparison::AnyComparison(c) => &mut c.settings,
            Comparison::Greater(c)
            | Comparison::GreaterOrEqual(c)
            | Comparison::Less(c)
            | Comparison::LessOrEqual(c) => &mut c.settings,
            Comparison::Range(c) => &mut c.settings,
        }
    }

    /// Builder-style helper used heavily in tests and programmatic configs.
    pub fn with_settings(mut self, f: impl FnOnce(&mut ComparisonSettings)) -> Self {
        f(self.settings_mut());
        self
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind_name(), self.describe())
    }
}

// ----------------- ReduceMethod -----------------

/// How samples collected over a reduce period are folded into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReduceMethod {
    #[default]
    Average,
    Median,
    Sum,
    Min,
    Max,
    Std,
}

impl ReduceMethod {
    pub const ALL: [ReduceMethod; 6] = [
        ReduceMethod::Average,
        ReduceMethod::Median,
        ReduceMethod::Sum,
        ReduceMethod::Min,
        ReduceMethod::Max,
        ReduceMethod::Std,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReduceMethod::Average => "average",
            ReduceMethod::Median => "median",
            ReduceMethod::Sum => "sum",
            ReduceMethod::Min => "min",
            ReduceMethod::Max => "max",
            ReduceMethod::Std => "std",
        }
    }

    fn is_default(&self) -> bool {
        *self == ReduceMethod::default()
    }
}

impl FromStr for ReduceMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReduceMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                enumeration: "ReduceMethod",
                name: s.to_string(),
            })
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_true(b: &bool) -> bool {
    *b
}

fn default_true() -> bool {
    true
}
