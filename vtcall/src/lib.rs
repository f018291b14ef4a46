//! **vtcall** calls methods on native objects through their virtual dispatch
//! tables.
//!
//! A [`Schema`](schema::Schema) declares the slots of a native class in table
//! order. [`Binder::bind`](runtime::binder::Binder::bind) turns an object
//! address plus a descriptor into a [`Handle`](runtime::binder::Handle) whose
//! methods marshal their arguments, look up the slot, and call it with the
//! configured calling convention.

pub mod runtime;
pub mod schema;
pub mod types;
pub mod utils;

pub use log;
pub use runtime::binder::{BindError, Binder, CallError, Handle, Trampoline, convert_ref};
pub use runtime::dispatch::{CallConvention, Dispatcher, RawCall};
pub use runtime::value::Value;
pub use schema::{Descriptor, Record, Schema, SlotSignature};
pub use types::ValueType;

/// How slots are assigned a calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConventionPolicy {
    /// Each slot's `call` annotation is honoured; unannotated slots use the
    /// object-method convention.
    PerSlot,
    /// Every slot uses the C convention and annotations are ignored.
    Uniform,
}

impl ConventionPolicy {
    /// `PerSlot` where the platform distinguishes conventions for methods.
    pub fn host() -> Self {
        if cfg!(windows) { Self::PerSlot } else { Self::Uniform }
    }
}

/// What a returned handle does when it cannot be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedHandlePolicy {
    /// Fail the call with [`CallError::NestedHandle`].
    #[default]
    Propagate,
    /// Return [`Value::Null`] and log a warning.
    ZeroValue,
}

/// Configuration for binding and calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub conventions: ConventionPolicy,
    /// Size in bytes of a dispatch table entry.
    pub word_size: usize,
    /// Most bytes scanned for the terminator of a returned string.
    pub max_string_len: usize,
    pub nested_handles: NestedHandlePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            conventions: ConventionPolicy::host(),
            word_size: size_of::<usize>(),
            max_string_len: 1 << 20,
            nested_handles: NestedHandlePolicy::default(),
        }
    }
}
