// src/tree/path.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use super::node::Walk;

pub const LIST_TAG: &str = "__list__";
pub const DICT_KEY_TAG: &str = "__dictkey__";
pub const DICT_VALUE_TAG: &str = "__dictvalue__";
pub const ENUM_TAG: &str = "__enum__";

/// One move from a container to its child, or to a terminal key/variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Field(String),
    ListIndex(usize),
    DictKey(String),
    DictValue(String),
    EnumVariant(String),
}

impl Step {
    /// Key and variant steps end a path; they have no child node.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Step::DictKey(_) | Step::EnumVariant(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Field(_) => "field",
            Step::ListIndex(_) => "list index",
            Step::DictKey(_) => "dict key",
            Step::DictValue(_) => "dict value",
            Step::EnumVariant(_) => "enum variant",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Field(name) => write!(f, ".{name}"),
            Step::ListIndex(idx) => write!(f, "[{idx}]"),
            Step::DictKey(key) => write!(f, "{{{key:?}}}"),
            Step::DictValue(key) => write!(f, "[{key:?}]"),
            Step::EnumVariant(name) => write!(f, "::{name}"),
        }
    }
}

/// A segment bound to the container it was captured from.
#[derive(Clone)]
pub struct LiveSegment<'a> {
    pub container: &'a dyn Walk,
    pub step: Step,
}

impl fmt::Debug for LiveSegment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSegment")
            .field("container", &self.container.type_name())
            .field("step", &self.step)
            .finish()
    }
}

/// A route from a borrowed root to one leaf, key or variant.
///
/// The borrow keeps the tree frozen while the address lives; edits go
/// through [`SimplifiedPath`].
#[derive(Clone)]
pub struct PathAddress<'a> {
    pub(crate) root: &'a dyn Walk,
    pub(crate) segments: Vec<LiveSegment<'a>>,
}

impl<'a> PathAddress<'a> {
    pub(crate) fn new(root: &'a dyn Walk, segments: Vec<LiveSegment<'a>>) -> Self {
        Self { root, segments }
    }

    pub fn root(&self) -> &'a dyn Walk {
        self.root
    }

    pub fn segments(&self) -> &[LiveSegment<'a>] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.segments.iter().map(|seg| &seg.step)
    }

    /// Drop live references, keeping owner type names for field segments.
    pub fn simplify(&self) -> SimplifiedPath {
        SimplifiedPath {
            segments: self
                .segments
                .iter()
                .map(|seg| SimplifiedSegment {
                    tag: match seg.step {
                        Step::Field(_) => seg.container.type_name().to_string(),
                        Step::ListIndex(_) => LIST_TAG.to_string(),
                        Step::DictKey(_) => DICT_KEY_TAG.to_string(),
                        Step::DictValue(_) => DICT_VALUE_TAG.to_string(),
                        Step::EnumVariant(_) => ENUM_TAG.to_string(),
                    },
                    step: seg.step.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for PathAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathAddress")
            .field("root", &self.root.type_name())
            .field("segments", &self.segments)
            .finish()
    }
}

impl fmt::Display for PathAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_steps(f, self.root.type_name(), self.steps())
    }
}

/// A serializable segment: `(tag, step)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSegment", into = "RawSegment")]
pub struct SimplifiedSegment {
    /// Owner type name for field segments, a `__kind__` marker otherwise.
    pub tag: String,
    pub step: Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawSegment(String, RawStep);

impl From<SimplifiedSegment> for RawSegment {
    fn from(seg: SimplifiedSegment) -> Self {
        let step = match seg.step {
            Step::ListIndex(idx) => RawStep::Index(idx),
            Step::Field(name)
            | Step::DictKey(name)
            | Step::DictValue(name)
            | Step::EnumVariant(name) => RawStep::Name(name),
        };
        RawSegment(seg.tag, step)
    }
}

impl TryFrom<RawSegment> for SimplifiedSegment {
    type Error = String;

    fn try_from(raw: RawSegment) -> Result<Self, Self::Error> {
        let RawSegment(tag, step) = raw;
        let step = match (tag.as_str(), step) {
            (LIST_TAG, RawStep::Index(idx)) => Step::ListIndex(idx),
            (LIST_TAG, RawStep::Name(name)) => {
                return Err(format!("list segment needs an integer index, got {name:?}"))
            }
            (_, RawStep::Index(idx)) => {
                return Err(format!("{tag} segment needs a name, got index {idx}"))
            }
            (DICT_KEY_TAG, RawStep::Name(name)) => Step::DictKey(name),
            (DICT_VALUE_TAG, RawStep::Name(name)) => Step::DictValue(name),
            (ENUM_TAG, RawStep::Name(name)) => Step::EnumVariant(name),
            (_, RawStep::Name(name)) => Step::Field(name),
        };
        Ok(SimplifiedSegment { tag, step })
    }
}

/// A path reduced to primitive data, safe to store next to a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimplifiedPath {
    pub segments: Vec<SimplifiedSegment>,
}

impl SimplifiedPath {
    pub fn new(segments: Vec<SimplifiedSegment>) -> Self {
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.segments.iter().map(|seg| &seg.step)
    }

    pub fn last(&self) -> Option<&SimplifiedSegment> {
        self.segments.last()
    }

    /// Path minus its final segment.
    pub fn parent(&self) -> Option<SimplifiedPath> {
        let (_, rest) = self.segments.split_last()?;
        Some(SimplifiedPath::new(rest.to_vec()))
    }

    /// Same steps in the same order, regardless of owner tags.
    pub fn same_steps(&self, other: &SimplifiedPath) -> bool {
        self.len() == other.len() && self.steps().zip(other.steps()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for SimplifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_steps(f, "<root>", self.steps())
    }
}

impl From<&PathAddress<'_>> for SimplifiedPath {
    fn from(path: &PathAddress<'_>) -> Self {
        path.simplify()
    }
}

fn write_steps<'s>(
    f: &mut fmt::Formatter<'_>,
    root: &str,
    steps: impl Iterator<Item = &'s Step>,
) -> fmt::Result {
    f.write_str(root)?;
    for step in steps {
        write!(f, "{step}")?;
    }
    Ok(())
}
