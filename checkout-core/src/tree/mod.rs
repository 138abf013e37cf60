// src/tree/mod.rs
//
// Structural addressing over configuration trees: walk, resolve, edit.

pub mod node;
pub mod path;
pub mod resolver;
pub mod walker;

pub use node::{Leaf, MappingMut, Node, NodeMut, Scalar, ScalarMut, VariantMut, Walk};
pub use path::{LiveSegment, PathAddress, SimplifiedPath, SimplifiedSegment, Step};
pub use resolver::{Resolved, expand, resolve, set_at};
pub use walker::{TreeWalker, walk};

/// Collect every match at once, simplified.
pub fn find_paths<P>(root: &dyn Walk, predicate: P) -> Vec<SimplifiedPath>
where
    P: FnMut(&Scalar) -> bool,
{
    walk(root, predicate).map(|path| path.simplify()).collect()
}
