// src/tree/walker.rs
use super::node::{Node, Scalar, Walk};
use super::path::{LiveSegment, PathAddress, Step};

enum Work<'a> {
    Visit {
        path: Vec<LiveSegment<'a>>,
        node: &'a dyn Walk,
    },
    Key {
        path: Vec<LiveSegment<'a>>,
        key: &'a str,
    },
}

/// Lazy depth-first search yielding the address of every matching leaf.
///
/// Composite fields come in declared order, then sequence items by index,
/// then mapping entries. For each mapping entry the value subtree is searched
/// before the key itself is tested. Enumerations are tested by variant name.
pub struct TreeWalker<'a, P> {
    root: &'a dyn Walk,
    predicate: P,
    stack: Vec<Work<'a>>,
}

pub fn walk<'a, P>(root: &'a dyn Walk, predicate: P) -> TreeWalker<'a, P>
where
    P: FnMut(&Scalar) -> bool,
{
    TreeWalker {
        root,
        predicate,
        stack: vec![Work::Visit {
            path: Vec::new(),
            node: root,
        }],
    }
}

fn extend<'a>(path: &[LiveSegment<'a>], container: &'a dyn Walk, step: Step) -> Vec<LiveSegment<'a>> {
    let mut next = Vec::with_capacity(path.len() + 1);
    next.extend_from_slice(path);
    next.push(LiveSegment { container, step });
    next
}

impl<'a, P> Iterator for TreeWalker<'a, P>
where
    P: FnMut(&Scalar) -> bool,
{
    type Item = PathAddress<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(work) = self.stack.pop() {
            match work {
                Work::Key { path, key } => {
                    if (self.predicate)(&Scalar::from(key)) {
                        return Some(PathAddress::new(self.root, path));
                    }
                }
                Work::Visit { path, node } => match node.node() {
                    Node::Composite(fields) => {
                        for (name, child) in fields.into_iter().rev() {
                            self.stack.push(Work::Visit {
                                path: extend(&path, node, Step::Field(name.to_string())),
                                node: child,
                            });
                        }
                    }
                    Node::Sequence(items) => {
                        for (idx, child) in items.into_iter().enumerate().rev() {
                            self.stack.push(Work::Visit {
                                path: extend(&path, node, Step::ListIndex(idx)),
                                node: child,
                            });
                        }
                    }
                    Node::Mapping(entries) => {
                        for (key, value) in entries.into_iter().rev() {
                            self.stack.push(Work::Key {
                                path: extend(&path, node, Step::DictKey(key.to_string())),
                                key,
                            });
                            self.stack.push(Work::Visit {
                                path: extend(&path, node, Step::DictValue(key.to_string())),
                                node: value,
                            });
                        }
                    }
                    Node::Enumeration(variant) => {
                        if (self.predicate)(&Scalar::from(variant)) {
                            let path = extend(&path, node, Step::EnumVariant(variant.to_string()));
                            return Some(PathAddress::new(self.root, path));
                        }
                    }
                    Node::Scalar(value) => {
                        if (self.predicate)(&value) {
                            return Some(PathAddress::new(self.root, path));
                        }
                    }
                },
            }
        }
        None
    }
}
