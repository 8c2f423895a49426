//! Dynamic values crossing the reflective boundary
//!
//! Every argument, return value and member passed through a
//! [`ReflectiveObject`](crate::reflect::ReflectiveObject) is a [`Value`].
//! Declarations carry a [`ValueKind`] so that typed access can be checked
//! against the declared shape instead of the runtime payload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Declared kind of a parameter, return value or member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Accepts any value
    #[default]
    Any,
    /// The unit value
    Unit,
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 string
    #[serde(alias = "string")]
    Str,
    /// Ordered list of values
    #[serde(alias = "array")]
    List,
    /// String-keyed map of values
    Map,
}

impl ValueKind {
    /// Parse a kind from its declaration name
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "any" | "dynamic" => Some(Self::Any),
            "unit" | "void" | "()" => Some(Self::Unit),
            "bool" => Some(Self::Bool),
            "int" | "i64" => Some(Self::Int),
            "float" | "f64" => Some(Self::Float),
            "str" | "string" => Some(Self::Str),
            "list" | "array" => Some(Self::List),
            "map" => Some(Self::Map),
            _ => None,
        }
    }

    /// Whether a value satisfies this declared kind
    pub fn accepts(self, value: &Value) -> bool {
        self == Self::Any || self == value.kind()
    }

    /// Whether a caller expecting `expected` may use a slot declared as `self`
    pub fn is_compatible_with(self, expected: ValueKind) -> bool {
        expected == Self::Any || self == expected
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Any => "any",
            ValueKind::Unit => "unit",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        };
        f.write_str(name)
    }
}

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Runtime kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Unit => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a typed Rust value
    pub fn into_typed<T: FromValue>(self) -> Result<T, Value> {
        T::from_value(self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
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
                f.write_str("#{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, item)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Conversion out of a [`Value`] with a statically known kind
pub trait FromValue: Sized {
    /// Kind a caller of this type expects
    const KIND: ValueKind;

    /// Convert, handing the value back on mismatch
    fn from_value(value: Value) -> Result<Self, Value>;
}

/// Conversion into a [`Value`] with a statically known kind
pub trait IntoValue {
    /// Kind produced by this type
    const KIND: ValueKind;

    fn into_value(self) -> Value;
}

macro_rules! value_conversions {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl FromValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn from_value(value: Value) -> Result<Self, Value> {
                match value {
                    Value::$variant(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }

        impl IntoValue for $ty {
            const KIND: ValueKind = ValueKind::$kind;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl From<$ty> for Value {
            fn from(inner: $ty) -> Self {
                Value::$variant(inner)
            }
        }
    };
}

value_conversions!(bool, Bool, Bool);
value_conversions!(i64, Int, Int);
value_conversions!(f64, Float, Float);
value_conversions!(String, Str, Str);
value_conversions!(Vec<Value>, List, List);
value_conversions!(BTreeMap<String, Value>, Map, Map);

impl FromValue for i32 {
    const KIND: ValueKind = ValueKind::Int;

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Int(i) => i32::try_from(i).map_err(|_| Value::Int(i)),
            other => Err(other),
        }
    }
}

impl IntoValue for i32 {
    const KIND: ValueKind = ValueKind::Int;

    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl From<i32> for Value {
    fn from(inner: i32) -> Self {
        Value::Int(i64::from(inner))
    }
}

impl IntoValue for &str {
    const KIND: ValueKind = ValueKind::Str;

    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl From<&str> for Value {
    fn from(inner: &str) -> Self {
        Value::Str(inner.to_string())
    }
}

impl FromValue for () {
    const KIND: ValueKind = ValueKind::Unit;

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Unit => Ok(()),
            other => Err(other),
        }
    }
}

impl IntoValue for () {
    const KIND: ValueKind = ValueKind::Unit;

    fn into_value(self) -> Value {
        Value::Unit
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl FromValue for Value {
    const KIND: ValueKind = ValueKind::Any;

    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

impl IntoValue for Value {
    const KIND: ValueKind = ValueKind::Any;

    fn into_value(self) -> Value {
        self
    }
}
