// src/tree/resolver.rs
use super::node::{Leaf, Node, NodeMut, Scalar, VariantMut, Walk};
use super::path::{LiveSegment, PathAddress, SimplifiedPath, SimplifiedSegment, Step};
use crate::error::{EditError, PathResolutionError};

/// What a path points at.
#[derive(Clone, Copy)]
pub enum Resolved<'a> {
    Node(&'a dyn Walk),
    /// A mapping key, for paths ending in a dict-key step.
    Key(&'a str),
    /// An enumeration's active variant name.
    Variant(&'static str),
}

impl Resolved<'_> {
    /// The addressed value as a scalar; `None` for containers.
    pub fn scalar(&self) -> Option<Scalar> {
        match self {
            Resolved::Node(node) => match node.node() {
                Node::Scalar(value) => Some(value),
                Node::Enumeration(variant) => Some(Scalar::from(variant)),
                _ => None,
            },
            Resolved::Key(key) => Some(Scalar::from(*key)),
            Resolved::Variant(variant) => Some(Scalar::from(*variant)),
        }
    }

    pub fn as_node(&self) -> Option<&dyn Walk> {
        match self {
            Resolved::Node(node) => Some(*node),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Resolved<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolved::Node(node) => write!(f, "Node({})", node.type_name()),
            Resolved::Key(key) => write!(f, "Key({key:?})"),
            Resolved::Variant(variant) => write!(f, "Variant({variant})"),
        }
    }
}

fn expected_kind(step: &Step) -> &'static str {
    match step {
        Step::Field(_) => "composite",
        Step::ListIndex(_) => "sequence",
        Step::DictKey(_) | Step::DictValue(_) => "mapping",
        Step::EnumVariant(_) => "enumeration",
    }
}

fn check_owner(
    node: &dyn Walk,
    seg: &SimplifiedSegment,
    position: usize,
) -> Result<(), PathResolutionError> {
    if let Step::Field(_) = seg.step {
        if seg.tag != node.type_name() {
            return Err(PathResolutionError::OwnerMismatch {
                position,
                expected: seg.tag.clone(),
                found: node.type_name(),
            });
        }
    }
    Ok(())
}

/// Take one step from `node`.
fn step_into<'a>(
    node: &'a dyn Walk,
    step: &Step,
    position: usize,
) -> Result<Resolved<'a>, PathResolutionError> {
    let found = node.node();
    let mismatch = |found: &Node<'_>| PathResolutionError::KindMismatch {
        position,
        expected: expected_kind(step),
        found: found.kind(),
    };
    match (step, found) {
        (Step::Field(name), Node::Composite(fields)) => fields
            .into_iter()
            .find(|(field, _)| *field == name.as_str())
            .map(|(_, child)| Resolved::Node(child))
            .ok_or_else(|| PathResolutionError::MissingField {
                owner: node.type_name(),
                field: name.clone(),
            }),
        (Step::ListIndex(idx), Node::Sequence(items)) => {
            let len = items.len();
            items
                .into_iter()
                .nth(*idx)
                .map(Resolved::Node)
                .ok_or(PathResolutionError::IndexOutOfRange { index: *idx, len })
        }
        (Step::DictValue(key), Node::Mapping(entries)) => entries
            .into_iter()
            .find(|(k, _)| *k == key.as_str())
            .map(|(_, value)| Resolved::Node(value))
            .ok_or_else(|| PathResolutionError::MissingKey(key.clone())),
        (Step::DictKey(key), Node::Mapping(entries)) => entries
            .into_iter()
            .find(|(k, _)| *k == key.as_str())
            .map(|(k, _)| Resolved::Key(k))
            .ok_or_else(|| PathResolutionError::MissingKey(key.clone())),
        (Step::EnumVariant(_), Node::Enumeration(variant)) => Ok(Resolved::Variant(variant)),
        (_, found) => Err(mismatch(&found)),
    }
}

/// Rebind a simplified path to `root`, checking every segment on the way.
pub fn expand<'a>(
    path: &SimplifiedPath,
    root: &'a dyn Walk,
) -> Result<PathAddress<'a>, PathResolutionError> {
    let mut node = root;
    let mut segments = Vec::with_capacity(path.len());
    let last = path.len().saturating_sub(1);
    for (position, seg) in path.segments.iter().enumerate() {
        check_owner(node, seg, position)?;
        if seg.step.is_terminal() && position != last {
            return Err(PathResolutionError::TrailingSegments { position });
        }
        let next = step_into(node, &seg.step, position)?;
        segments.push(LiveSegment {
            container: node,
            step: seg.step.clone(),
        });
        if let Resolved::Node(child) = next {
            node = child;
        }
    }
    Ok(PathAddress::new(root, segments))
}

/// Fetch what `path` addresses under `root`.
pub fn resolve<'a>(
    root: &'a dyn Walk,
    path: &SimplifiedPath,
) -> Result<Resolved<'a>, PathResolutionError> {
    expand(path, root)?.resolve()
}

impl<'a> PathAddress<'a> {
    /// Resolve through the captured back-reference of the final segment.
    pub fn resolve(&self) -> Result<Resolved<'a>, PathResolutionError> {
        match self.segments.last() {
            None => Ok(Resolved::Node(self.root)),
            Some(last) => step_into(last.container, &last.step, self.segments.len() - 1),
        }
    }

    /// Resolve the same logical route under a different root.
    pub fn resolve_in<'b>(&self, root: &'b dyn Walk) -> Result<Resolved<'b>, PathResolutionError> {
        resolve(root, &self.simplify())
    }
}

fn child_mut<'a>(
    node: &'a mut dyn Walk,
    step: &Step,
    position: usize,
) -> Result<&'a mut dyn Walk, PathResolutionError> {
    let owner = node.type_name();
    match (step, node.node_mut()) {
        (Step::Field(name), NodeMut::Composite(fields)) => fields
            .into_iter()
            .find(|(field, _)| *field == name.as_str())
            .map(|(_, child)| child)
            .ok_or_else(|| PathResolutionError::MissingField {
                owner,
                field: name.clone(),
            }),
        (Step::ListIndex(idx), NodeMut::Sequence(items)) => {
            let len = items.len();
            items
                .into_iter()
                .nth(*idx)
                .ok_or(PathResolutionError::IndexOutOfRange { index: *idx, len })
        }
        (Step::DictValue(key), NodeMut::Mapping(map)) => map
            .value_mut(key)
            .ok_or_else(|| PathResolutionError::MissingKey(key.clone())),
        (step, found) => Err(PathResolutionError::KindMismatch {
            position,
            expected: expected_kind(step),
            found: found.kind(),
        }),
    }
}

fn assign_variant(target: &mut dyn VariantMut, value: Scalar) -> Result<(), EditError> {
    let name = String::from_scalar(value)?;
    target.set_variant(&name)?;
    Ok(())
}

fn assign(target: &mut dyn Walk, value: Scalar) -> Result<(), EditError> {
    match target.node_mut() {
        NodeMut::Scalar(leaf) => Ok(leaf.set(value)?),
        NodeMut::Enumeration(variant) => assign_variant(variant, value),
        other => Err(EditError::NotALeaf(other.kind())),
    }
}

/// Replace the value `path` addresses under `root`, touching nothing else.
///
/// A dict-key path renames the entry, which moves it to the end of the
/// mapping. An enum-variant path switches the variant of the enclosing field.
pub fn set_at(root: &mut dyn Walk, path: &SimplifiedPath, value: Scalar) -> Result<(), EditError> {
    let Some((last, parents)) = path.segments.split_last() else {
        return Err(PathResolutionError::EmptyPath.into());
    };

    let mut node: &mut dyn Walk = root;
    for (position, seg) in parents.iter().enumerate() {
        check_owner(&*node, seg, position)?;
        if seg.step.is_terminal() {
            return Err(PathResolutionError::TrailingSegments { position }.into());
        }
        node = child_mut(node, &seg.step, position)?;
    }

    let position = parents.len();
    check_owner(&*node, last, position)?;
    match &last.step {
        Step::DictKey(key) => match node.node_mut() {
            NodeMut::Mapping(map) => map.rename(key, String::from_scalar(value)?),
            other => Err(PathResolutionError::KindMismatch {
                position,
                expected: "mapping",
                found: other.kind(),
            }
            .into()),
        },
        Step::EnumVariant(_) => match node.node_mut() {
            NodeMut::Enumeration(variant) => assign_variant(variant, value),
            other => Err(PathResolutionError::KindMismatch {
                position,
                expected: "enumeration",
                found: other.kind(),
            }
            .into()),
        },
        step => assign(child_mut(node, step, position)?, value),
    }
}
