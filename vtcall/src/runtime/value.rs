use std::fmt;

use thiserror::Error;

use super::binder::Handle;

/// A typed value on the Rust side of a native call.
///
/// Integers are carried at their widest; the declared [`ValueType`](crate::types::ValueType)
/// of the slot decides how they are narrowed into a machine word.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Bool(bool),
    Str(String),
    Ptr(usize),
    Handle(Handle),
    /// Zero value of a handle-typed slot.
    Null,
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::Ptr(_) => "ptr",
            Value::Handle(_) => "handle",
            Value::Null => "null",
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Value::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Ptr(p) => write!(f, "{p:#x}"),
            Value::Handle(h) => write!(f, "<{} @ {:#x}>", h.record_name(), h.reference().addr()),
            Value::Null => write!(f, "null"),
        }
    }
}

macro_rules! impl_from_int {
    ($variant:ident, $wide:ty; $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v as $wide)
                }
            }
        )*
    };
}
impl_from_int!(Int, i64; i8, i16, i32, i64, isize);
impl_from_int!(UInt, u64; u8, u16, u32, u64, usize);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Value::Handle(v)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot convert {found} value into {expected}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: &'static str,
}

macro_rules! impl_try_into_int {
    ($($t:ty),*) => {
        $(
            impl TryFrom<Value> for $t {
                type Error = ConversionError;
                fn try_from(v: Value) -> Result<Self, Self::Error> {
                    let err = ConversionError {
                        expected: stringify!($t),
                        found: v.kind_name(),
                    };
                    match v {
                        Value::Int(i) => <$t>::try_from(i).map_err(|_| err),
                        Value::UInt(u) => <$t>::try_from(u).map_err(|_| err),
                        _ => Err(err),
                    }
                }
            }
        )*
    };
}
impl_try_into_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl TryFrom<Value> for bool {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Bool(b) => Ok(b),
            other => Err(ConversionError {
                expected: "bool",
                found: other.kind_name(),
            }),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Str(s) => Ok(s),
            other => Err(ConversionError {
                expected: "String",
                found: other.kind_name(),
            }),
        }
    }
}

impl TryFrom<Value> for Handle {
    type Error = ConversionError;
    fn try_from(v: Value) -> Result<Self, Self::Error> {
        match v {
            Value::Handle(h) => Ok(h),
            other => Err(ConversionError {
                expected: "Handle",
                found: other.kind_name(),
            }),
        }
    }
}
