//! Declared types of method parameters and return values.

use std::{fmt, sync::Arc};

/// The type of a single parameter or return value of a method slot.
///
/// Every type here travels across the native boundary as exactly one machine
/// word. `Record` by value is representable in a declaration, but the binder
/// rejects it because it would need more than one word.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    Bool,
    /// A null-terminated byte string owned by whichever side produced it.
    Str,
    /// An opaque address.
    Ptr,
    Pointer(Box<ValueType>),
    /// A named record declared in the same schema.
    Record(Arc<str>),
}

impl ValueType {
    pub fn pointer_to(inner: ValueType) -> Self {
        Self::Pointer(Box::new(inner))
    }

    pub fn record(name: impl Into<Arc<str>>) -> Self {
        Self::Record(name.into())
    }

    /// Shorthand for `*Name`, the shape a handle-typed value is declared with.
    pub fn handle(name: impl Into<Arc<str>>) -> Self {
        Self::pointer_to(Self::record(name))
    }

    /// Bit width and signedness for integer types.
    pub fn int_layout(&self) -> Option<(u32, bool)> {
        match self {
            Self::I8 => Some((8, true)),
            Self::I16 => Some((16, true)),
            Self::I32 => Some((32, true)),
            Self::I64 => Some((64, true)),
            Self::Isize => Some((usize::BITS, true)),
            Self::U8 => Some((8, false)),
            Self::U16 => Some((16, false)),
            Self::U32 => Some((32, false)),
            Self::U64 => Some((64, false)),
            Self::Usize => Some((usize::BITS, false)),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        self.int_layout().is_some()
    }

    pub fn is_pointer_like(&self) -> bool {
        matches!(self, Self::Ptr | Self::Pointer(_))
    }

    /// The record name behind exactly one level of pointer, if any.
    pub fn pointee_record(&self) -> Option<&str> {
        match self {
            Self::Pointer(inner) => match inner.as_ref() {
                Self::Record(name) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether this type is a record passed by value.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    pub(crate) fn from_keyword(word: &str) -> Option<Self> {
        let ty = match word {
            "i8" => Self::I8,
            "i16" => Self::I16,
            "i32" => Self::I32,
            "i64" => Self::I64,
            "isize" => Self::Isize,
            "u8" => Self::U8,
            "u16" => Self::U16,
            "u32" => Self::U32,
            "u64" => Self::U64,
            "usize" => Self::Usize,
            "bool" => Self::Bool,
            "str" => Self::Str,
            "ptr" => Self::Ptr,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I8 => write!(f, "i8"),
            Self::I16 => write!(f, "i16"),
            Self::I32 => write!(f, "i32"),
            Self::I64 => write!(f, "i64"),
            Self::Isize => write!(f, "isize"),
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::U32 => write!(f, "u32"),
            Self::U64 => write!(f, "u64"),
            Self::Usize => write!(f, "usize"),
            Self::Bool => write!(f, "bool"),
            Self::Str => write!(f, "str"),
            Self::Ptr => write!(f, "ptr"),
            Self::Pointer(inner) => write!(f, "*{inner}"),
            Self::Record(name) => write!(f, "{name}"),
        }
    }
}
