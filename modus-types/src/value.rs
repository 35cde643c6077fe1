//! Dynamic values held in slots and entity state maps

use crate::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An entity's state map: string key to value, ordered by key
pub type StateMap = BTreeMap<String, Value>;

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A strong raw address. Only scope frames may hold these.
    Address(Address),
    /// A non-owning cross-entity reference
    Weak(Address),
}

/// An address found while walking a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub address: Address,
    pub weak: bool,
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    /// The shape this value has
    pub fn shape(&self) -> ValueShape {
        match self {
            Value::Null => ValueShape::Null,
            Value::Bool(_) => ValueShape::Bool,
            Value::Int(_) => ValueShape::Int,
            Value::Float(_) => ValueShape::Float,
            Value::Str(_) => ValueShape::Str,
            Value::List(_) => ValueShape::List,
            Value::Map(_) => ValueShape::Map,
            Value::Address(_) => ValueShape::Address,
            Value::Weak(_) => ValueShape::Weak,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_weak(&self) -> Option<Address> {
        match self {
            Value::Weak(addr) => Some(*addr),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Collect every address reachable inside this value, depth first
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            Value::Address(address) => out.push(Reference {
                address: *address,
                weak: false,
            }),
            Value::Weak(address) => out.push(Reference {
                address: *address,
                weak: true,
            }),
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Address(addr) => write!(f, "{}", addr),
            Value::Weak(addr) => write!(f, "weak {}", addr),
        }
    }
}

/// Expected shape of a state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueShape {
    Any,
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Address,
    Weak,
}

impl ValueShape {
    /// Check whether a value satisfies this shape
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            ValueShape::Any => true,
            shape => *shape == value.shape(),
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueShape::Any => "any",
            ValueShape::Null => "null",
            ValueShape::Bool => "bool",
            ValueShape::Int => "int",
            ValueShape::Float => "float",
            ValueShape::Str => "str",
            ValueShape::List => "list",
            ValueShape::Map => "map",
            ValueShape::Address => "address",
            ValueShape::Weak => "weak",
        };
        f.write_str(name)
    }
}
