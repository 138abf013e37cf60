// src/tree/node.rs
//
// Node kinds and the `Walk` trait every configuration type implements.

use indexmap::IndexMap;
use std::fmt;

use comparisons::{GroupResultMode, ReduceMethod, Severity, Value};

use crate::error::{EditError, ReplaceConversionError};

/// Terminal value as seen by predicates and replace functions.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "str",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x:?}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<Value> for Scalar {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => Scalar::Bool(b),
            Value::Int(i) => Scalar::Int(i),
            Value::Float(x) => Scalar::Float(x),
            Value::Str(s) => Scalar::Str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Read-only view of one node.
pub enum Node<'a> {
    /// Named fields in declared order.
    Composite(Vec<(&'static str, &'a dyn Walk)>),
    Sequence(Vec<&'a dyn Walk>),
    /// Entries in iteration order.
    Mapping(Vec<(&'a str, &'a dyn Walk)>),
    /// The active variant's name.
    Enumeration(&'static str),
    Scalar(Scalar),
}

impl Node<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Composite(_) => "composite",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
            Node::Enumeration(_) => "enumeration",
            Node::Scalar(_) => "scalar",
        }
    }
}

/// Mutable view of one node.
pub enum NodeMut<'a> {
    Composite(Vec<(&'static str, &'a mut dyn Walk)>),
    Sequence(Vec<&'a mut dyn Walk>),
    Mapping(&'a mut dyn MappingMut),
    Enumeration(&'a mut dyn VariantMut),
    Scalar(&'a mut dyn ScalarMut),
}

impl NodeMut<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeMut::Composite(_) => "composite",
            NodeMut::Sequence(_) => "sequence",
            NodeMut::Mapping(_) => "mapping",
            NodeMut::Enumeration(_) => "enumeration",
            NodeMut::Scalar(_) => "scalar",
        }
    }
}

/// A value that can be traversed as a tree of nodes.
pub trait Walk {
    /// Name of the concrete type, recorded in simplified paths.
    fn type_name(&self) -> &'static str;
    fn node(&self) -> Node<'_>;
    fn node_mut(&mut self) -> NodeMut<'_>;
}

pub trait MappingMut {
    fn value_mut(&mut self, key: &str) -> Option<&mut dyn Walk>;
    fn contains_key(&self, key: &str) -> bool;
    /// Move the entry under `old` to `new`. The entry lands at the end of
    /// the iteration order.
    fn rename(&mut self, old: &str, new: String) -> Result<(), EditError>;
}

pub trait VariantMut {
    fn variant(&self) -> &'static str;
    fn set_variant(&mut self, name: &str) -> Result<(), ReplaceConversionError>;
}

pub trait ScalarMut {
    fn get(&self) -> Scalar;
    fn set(&mut self, value: Scalar) -> Result<(), ReplaceConversionError>;
}

/// Primitive field types that convert to and from [`Scalar`].
pub trait Leaf: Sized {
    const TYPE_NAME: &'static str;
    fn to_scalar(&self) -> Scalar;
    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError>;
}

impl<T: Leaf> ScalarMut for T {
    fn get(&self) -> Scalar {
        self.to_scalar()
    }

    fn set(&mut self, value: Scalar) -> Result<(), ReplaceConversionError> {
        *self = T::from_scalar(value)?;
        Ok(())
    }
}

fn mismatch<T: Leaf>(scalar: &Scalar) -> ReplaceConversionError {
    ReplaceConversionError::new(
        scalar,
        T::TYPE_NAME,
        format!("unsupported source type {}", scalar.type_name()),
    )
}

impl Leaf for String {
    const TYPE_NAME: &'static str = "str";

    fn to_scalar(&self) -> Scalar {
        Scalar::Str(self.clone())
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        match scalar {
            Scalar::Str(s) => Ok(s),
            Scalar::Null => Err(mismatch::<Self>(&scalar)),
            other => Ok(other.to_string()),
        }
    }
}

impl Leaf for i64 {
    const TYPE_NAME: &'static str = "int";

    fn to_scalar(&self) -> Scalar {
        Scalar::Int(*self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        match scalar {
            Scalar::Int(i) => Ok(i),
            Scalar::Float(x) if x.is_finite() => Ok(x.trunc() as i64),
            Scalar::Str(ref s) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(i),
                Err(_) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|x| x.is_finite())
                    .map(|x| x.trunc() as i64)
                    .ok_or_else(|| {
                        ReplaceConversionError::new(&scalar, Self::TYPE_NAME, "invalid number")
                    }),
            },
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Leaf for u32 {
    const TYPE_NAME: &'static str = "uint";

    fn to_scalar(&self) -> Scalar {
        Scalar::Int(i64::from(*self))
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        let text = scalar.to_string();
        let wide = i64::from_scalar(scalar)?;
        u32::try_from(wide)
            .map_err(|_| ReplaceConversionError::new(text, Self::TYPE_NAME, "out of range"))
    }
}

impl Leaf for f64 {
    const TYPE_NAME: &'static str = "float";

    fn to_scalar(&self) -> Scalar {
        Scalar::Float(*self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        match scalar {
            Scalar::Float(x) => Ok(x),
            Scalar::Int(i) => Ok(i as f64),
            Scalar::Str(ref s) => s.trim().parse::<f64>().map_err(|e| {
                ReplaceConversionError::new(&scalar, Self::TYPE_NAME, e.to_string())
            }),
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Leaf for bool {
    const TYPE_NAME: &'static str = "bool";

    fn to_scalar(&self) -> Scalar {
        Scalar::Bool(*self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        match scalar {
            Scalar::Bool(b) => Ok(b),
            Scalar::Int(0) => Ok(false),
            Scalar::Int(1) => Ok(true),
            Scalar::Str(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ReplaceConversionError::new(
                    &scalar,
                    Self::TYPE_NAME,
                    "expected true or false",
                )),
            },
            other => Err(mismatch::<Self>(&other)),
        }
    }
}

impl Leaf for Value {
    const TYPE_NAME: &'static str = "value";

    fn to_scalar(&self) -> Scalar {
        Scalar::from(self.clone())
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        match scalar {
            Scalar::Bool(b) => Ok(Value::Bool(b)),
            Scalar::Int(i) => Ok(Value::Int(i)),
            Scalar::Float(x) => Ok(Value::Float(x)),
            Scalar::Str(s) => Ok(Value::Str(s)),
            Scalar::Null => Err(mismatch::<Self>(&scalar)),
        }
    }
}

impl<T: Leaf> Leaf for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn to_scalar(&self) -> Scalar {
        match self {
            Some(v) => v.to_scalar(),
            None => Scalar::Null,
        }
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, ReplaceConversionError> {
        match scalar {
            Scalar::Null => Ok(None),
            other => T::from_scalar(other).map(Some),
        }
    }
}

macro_rules! walk_leaf {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Walk for $ty {
                fn type_name(&self) -> &'static str {
                    <$ty as Leaf>::TYPE_NAME
                }

                fn node(&self) -> Node<'_> {
                    Node::Scalar(self.to_scalar())
                }

                fn node_mut(&mut self) -> NodeMut<'_> {
                    NodeMut::Scalar(self)
                }
            }
        )*
    };
}

walk_leaf!(String, i64, u32, f64, bool, Value);

impl<T: Leaf> Walk for Option<T> {
    fn type_name(&self) -> &'static str {
        <Self as Leaf>::TYPE_NAME
    }

    fn node(&self) -> Node<'_> {
        Node::Scalar(self.to_scalar())
    }

    fn node_mut(&mut self) -> NodeMut<'_> {
        NodeMut::Scalar(self)
    }
}

impl<T: Walk> Walk for Vec<T> {
    fn type_name(&self) -> &'static str {
        "list"
    }

    fn node(&self) -> Node<'_> {
        Node::Sequence(self.iter().map(|item| item as &dyn Walk).collect())
    }

    fn node_mut(&mut self) -> NodeMut<'_> {
        NodeMut::Sequence(self.iter_mut().map(|item| item as &mut dyn Walk).collect())
    }
}

impl<V: Walk> Walk for IndexMap<String, V> {
    fn type_name(&self) -> &'static str {
        "dict"
    }

    fn node(&self) -> Node<'_> {
        Node::Mapping(
            self.iter()
                .map(|(key, value)| (key.as_str(), value as &dyn Walk))
                .collect(),
        )
    }

    fn node_mut(&mut self) -> NodeMut<'_> {
        NodeMut::Mapping(self)
    }
}

impl<V: Walk> MappingMut for IndexMap<String, V> {
    fn value_mut(&mut self, key: &str) -> Option<&mut dyn Walk> {
        self.get_mut(key).map(|value| value as &mut dyn Walk)
    }

    fn contains_key(&self, key: &str) -> bool {
        IndexMap::contains_key(self, key)
    }

    fn rename(&mut self, old: &str, new: String) -> Result<(), EditError> {
        if !IndexMap::contains_key(self, old) {
            return Err(crate::error::PathResolutionError::MissingKey(old.to_string()).into());
        }
        if old == new {
            return Ok(());
        }
        if IndexMap::contains_key(self, &new) {
            return Err(EditError::DuplicateKey(new));
        }
        if let Some(value) = self.shift_remove(old) {
            self.insert(new, value);
        }
        Ok(())
    }
}

/// Implement [`Walk`] for a fieldless enum with `as_str` and `FromStr`.
macro_rules! walk_enum {
    ($($ty:ty),* $(,)?) => {
        $(
            impl VariantMut for $ty {
                fn variant(&self) -> &'static str {
                    self.as_str()
                }

                fn set_variant(&mut self, name: &str) -> Result<(), ReplaceConversionError> {
                    *self = name.parse::<$ty>().map_err(|e| {
                        ReplaceConversionError::new(name, stringify!($ty), e.to_string())
                    })?;
                    Ok(())
                }
            }

            impl Walk for $ty {
                fn type_name(&self) -> &'static str {
                    stringify!($ty)
                }

                fn node(&self) -> Node<'_> {
                    Node::Enumeration(self.as_str())
                }

                fn node_mut(&mut self) -> NodeMut<'_> {
                    NodeMut::Enumeration(self)
                }
            }
        )*
    };
}

walk_enum!(Severity, ReduceMethod, GroupResultMode);

/// Implement [`Walk`] for a struct, listing fields in declared order.
///
/// Fields of a nested `settings` struct are listed inline, so paths address
/// them as if they were declared on the outer type.
#[macro_export]
macro_rules! walk_composite {
    ($ty:ident { $( .. $group:ident { $($inner:ident),* $(,)? } , )? $($field:ident),* $(,)? }) => {
        impl $crate::tree::Walk for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn node(&self) -> $crate::tree::Node<'_> {
                $crate::tree::Node::Composite(vec![
                    $($( (stringify!($inner), &self.$group.$inner as &dyn $crate::tree::Walk), )*)?
                    $( (stringify!($field), &self.$field as &dyn $crate::tree::Walk), )*
                ])
            }

            fn node_mut(&mut self) -> $crate::tree::NodeMut<'_> {
                $crate::tree::NodeMut::Composite(vec![
                    $($( (stringify!($inner), &mut self.$group.$inner as &mut dyn $crate::tree::Walk), )*)?
                    $( (stringify!($field), &mut self.$field as &mut dyn $crate::tree::Walk), )*
                ])
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_leaves_coerce() {
        assert_eq!(i64::from_scalar(Scalar::Float(20.0)), Ok(20));
        assert_eq!(i64::from_scalar(Scalar::from("7")), Ok(7));
        assert_eq!(i64::from_scalar(Scalar::from("7.9")), Ok(7));
        assert_eq!(f64::from_scalar(Scalar::Int(3)), Ok(3.0));
        assert!(f64::from_scalar(Scalar::from("abc")).is_err());
        assert!(u32::from_scalar(Scalar::Int(-1)).is_err());
        assert_eq!(bool::from_scalar(Scalar::from("False")), Ok(false));
        assert!(bool::from_scalar(Scalar::Float(0.5)).is_err());
    }

    #[test]
    fn optional_leaf_maps_null() {
        assert_eq!(Option::<f64>::from_scalar(Scalar::Null), Ok(None));
        assert_eq!(Option::<f64>::from_scalar(Scalar::Int(2)), Ok(Some(2.0)));
        assert_eq!(None::<String>.to_scalar(), Scalar::Null);
        assert!(String::from_scalar(Scalar::Null).is_err());
    }

    #[test]
    fn rename_moves_entry_to_end() {
        let mut map: IndexMap<String, i64> = IndexMap::new();
        map.insert("a".into(), 1);
        map.insert("b".into(), 2);
        map.rename("a", "c".into()).unwrap();
        let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(map.rename("b", "c".into()), Err(EditError::DuplicateKey("c".into())));
        assert!(map.rename("zzz", "y".into()).is_err());
    }

    #[test]
    fn enum_variants_parse_case_sensitively() {
        let mut sev = Severity::Error;
        sev.set_variant("warning").unwrap();
        assert_eq!(sev, Severity::Warning);
        assert!(sev.set_variant("WARNING").is_err());
        assert_eq!(sev.node().kind(), "enumeration");
    }
}
