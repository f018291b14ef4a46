//! Handle binding.
//!
//! [`Binder::bind`] looks at a descriptor once and builds one [`Trampoline`]
//! per callable slot. Each trampoline captures the object reference, its slot
//! index and its calling convention; everything else happens per call:
//!
//! 1. check the arguments against the slot signature,
//! 2. resolve the slot entry through the object's dispatch table,
//! 3. marshal the arguments behind the implicit `this` word,
//! 4. dispatch, then marshal the returned word.
//!
//! String buffers built in step 3 are dropped only after the returned word
//! has been marshalled.

use std::{fmt, num::NonZeroUsize, sync::Arc};

use thiserror::Error;

use super::{
    dispatch::{CallConvention, Dispatcher},
    marshal::{self, ArgBuffer, MarshalError},
    raw::RawCallError,
    value::Value,
    vtable::{self, AddressError},
};
use crate::{
    Config, ConventionPolicy, NestedHandlePolicy,
    schema::{Descriptor, Field, Record, Schema, SlotSignature},
    types::ValueType,
};

/// Address of a native object. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef(NonZeroUsize);

impl ObjectRef {
    pub fn new(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }
    pub fn addr(self) -> usize {
        self.0.get()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("invalid address")]
    InvalidAddress,
    #[error("`{0}` is not a pointer to a record")]
    NotAStruct(String),
    #[error("no record named `{0}` in the schema")]
    UnknownRecord(String),
    #[error("`{slot}` declares {count} return values, at most one is supported")]
    UnsupportedReturnArity { slot: String, count: usize },
    #[error("`{slot}` uses {ty} by value, which does not fit in one word")]
    UnsupportedType { slot: String, ty: ValueType },
    #[error("unsupported word size {0}")]
    InvalidWordSize(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("invalid address")]
    InvalidAddress,
    #[error("no method named `{0}`")]
    UnknownMethod(String),
    #[error("`{slot}` takes {expected} arguments but {found} were given")]
    ArgumentCount {
        slot: String,
        expected: usize,
        found: usize,
    },
    #[error("argument {position} of `{slot}` expects {expected}, found {found} value")]
    ArgumentType {
        slot: String,
        position: usize,
        expected: ValueType,
        found: &'static str,
    },
    #[error(transparent)]
    Marshal(MarshalError),
    #[error(transparent)]
    Raw(#[from] RawCallError),
    #[error("returned handle could not be bound: {0}")]
    NestedHandle(Box<BindError>),
}

impl From<AddressError> for CallError {
    fn from(_: AddressError) -> Self {
        // word size was checked when the handle was bound
        CallError::InvalidAddress
    }
}

impl From<MarshalError> for CallError {
    fn from(e: MarshalError) -> Self {
        CallError::Marshal(e)
    }
}

type SlotFn = dyn Fn(&[Value]) -> Result<Option<Value>, CallError> + Send + Sync;

/// A bound method slot.
#[derive(Clone)]
pub struct Trampoline {
    signature: Arc<SlotSignature>,
    index: usize,
    convention: CallConvention,
    fun: Arc<SlotFn>,
}

impl Trampoline {
    pub fn name(&self) -> &str {
        &self.signature.name
    }
    pub fn signature(&self) -> &SlotSignature {
        &self.signature
    }
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn convention(&self) -> CallConvention {
        self.convention
    }
    /// Call the native method. `Ok(None)` when the slot returns nothing.
    pub fn invoke(&self, args: &[Value]) -> Result<Option<Value>, CallError> {
        (self.fun)(args)
    }
}

impl fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trampoline")
            .field("signature", &self.signature.to_string())
            .field("index", &self.index)
            .field("convention", &self.convention)
            .finish()
    }
}

struct HandleInner {
    reference: ObjectRef,
    record: Arc<Record>,
    /// One entry per field; reserved fields have none.
    slots: Vec<Option<Trampoline>>,
}

/// A native object seen through a record of a schema.
///
/// Cloning is cheap and clones share their trampolines. A handle neither
/// owns nor keeps alive the native object.
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub fn reference(&self) -> ObjectRef {
        self.inner.reference
    }
    pub fn record_name(&self) -> &str {
        &self.inner.record.name
    }
    pub fn record(&self) -> &Record {
        &self.inner.record
    }
    /// Trampoline at slot `index`. `None` for reserved or out of range slots.
    pub fn slot(&self, index: usize) -> Option<&Trampoline> {
        self.inner.slots.get(index).and_then(Option::as_ref)
    }
    pub fn method(&self, name: &str) -> Option<&Trampoline> {
        self.trampolines().find(|t| t.name() == name)
    }
    pub fn trampolines(&self) -> impl Iterator<Item = &Trampoline> {
        self.inner.slots.iter().flatten()
    }
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Option<Value>, CallError> {
        self.method(name)
            .ok_or_else(|| CallError::UnknownMethod(name.to_string()))?
            .invoke(args)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.reference == other.inner.reference
            && self.inner.record.name == other.inner.record.name
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("record", &self.record_name())
            .field("reference", &format_args!("{:#x}", self.reference().addr()))
            .finish_non_exhaustive()
    }
}

/// Convention for a slot with the given annotation.
pub fn select_convention(policy: ConventionPolicy, tag: Option<&str>) -> CallConvention {
    match (policy, tag) {
        (ConventionPolicy::Uniform, _) => CallConvention::Cdecl,
        (ConventionPolicy::PerSlot, None | Some("")) => CallConvention::Thiscall,
        (ConventionPolicy::PerSlot, Some(t)) if t.starts_with("std") => CallConvention::Stdcall,
        (ConventionPolicy::PerSlot, Some(t)) if t.starts_with("cdecl") => CallConvention::Cdecl,
        (ConventionPolicy::PerSlot, Some(t)) => {
            log::warn!("unknown calling convention `{t}`, using cdecl");
            CallConvention::Cdecl
        }
    }
}

/// Everything one trampoline needs per call.
struct SlotContext {
    binder: Binder,
    schema: Arc<Schema>,
    reference: ObjectRef,
    index: usize,
    convention: CallConvention,
    signature: Arc<SlotSignature>,
}

impl SlotContext {
    fn invoke(&self, args: &[Value]) -> Result<Option<Value>, CallError> {
        let sig = &self.signature;
        if args.len() != sig.params.len() {
            return Err(CallError::ArgumentCount {
                slot: sig.name.to_string(),
                expected: sig.params.len(),
                found: args.len(),
            });
        }
        let target = unsafe {
            vtable::resolve_slot(self.reference.addr(), self.index, self.binder.config.word_size)
        }?;

        let mut buf = ArgBuffer::new(self.reference.addr(), args.len());
        for (position, (value, ty)) in args.iter().zip(&sig.params).enumerate() {
            buf.push(value, ty).map_err(|e| match e {
                MarshalError::TypeMismatch { expected, found } => CallError::ArgumentType {
                    slot: sig.name.to_string(),
                    position,
                    expected,
                    found,
                },
                e => CallError::Marshal(e),
            })?;
        }

        log::trace!(
            "{:#x}.{} slot {} via {} at {target:#x}",
            self.reference.addr(),
            sig.name,
            self.index,
            self.convention
        );
        let word = unsafe {
            self.binder
                .dispatcher
                .dispatch(self.convention, target, buf.words())
        }?;

        // the callee may hand back one of our own buffers
        let ret = match sig.return_type() {
            None => Ok(None),
            Some(ty) => self.unmarshal(word, ty).map(Some),
        };
        drop(buf);
        ret
    }

    fn unmarshal(&self, word: usize, ty: &ValueType) -> Result<Value, CallError> {
        if *ty == ValueType::Str {
            let s = unsafe { marshal::read_c_string(word, self.binder.config.max_string_len) }?;
            return Ok(Value::Str(s));
        }
        if !self.schema.is_handle_type(ty) {
            return Ok(marshal::scalar_from_word(word, ty)?);
        }
        if word == 0 {
            return Ok(Value::Null);
        }
        let descriptor = Descriptor::new(self.schema.clone(), ty.clone());
        match unsafe { self.binder.bind(word, &descriptor) } {
            Ok(handle) => Ok(Value::Handle(handle)),
            Err(e) => match self.binder.config.nested_handles {
                NestedHandlePolicy::Propagate => Err(CallError::NestedHandle(Box::new(e))),
                NestedHandlePolicy::ZeroValue => {
                    log::warn!("`{}` returned an unusable {ty}: {e}", self.signature.name);
                    Ok(Value::Null)
                }
            },
        }
    }
}

fn check_slot(sig: &SlotSignature) -> Result<(), BindError> {
    if sig.returns.len() > 1 {
        return Err(BindError::UnsupportedReturnArity {
            slot: sig.name.to_string(),
            count: sig.returns.len(),
        });
    }
    match sig.params.iter().chain(&sig.returns).find(|t| t.is_aggregate()) {
        Some(ty) => Err(BindError::UnsupportedType {
            slot: sig.name.to_string(),
            ty: ty.clone(),
        }),
        None => Ok(()),
    }
}

/// Builds [`Handle`]s with a fixed configuration and set of primitives.
#[derive(Clone, Debug, Default)]
pub struct Binder {
    config: Config,
    dispatcher: Dispatcher,
}

impl Binder {
    /// A binder that calls through the host's own primitives.
    pub fn new(config: Config) -> Self {
        Self::with_dispatcher(config, Dispatcher::native())
    }
    pub fn with_dispatcher(config: Config, dispatcher: Dispatcher) -> Self {
        Self { config, dispatcher }
    }
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind the object at `reference` as `descriptor.target`.
    ///
    /// Every slot is validated before any trampoline is built, so a failure
    /// leaves nothing half-bound. No native code runs here.
    ///
    /// # Safety
    ///
    /// While the returned handle or any of its clones is in use, `reference`
    /// must stay a live object whose dispatch table matches the record, and
    /// each slot must accept and return what its signature declares.
    pub unsafe fn bind(&self, reference: usize, descriptor: &Descriptor) -> Result<Handle, BindError> {
        if !vtable::is_supported_word_size(self.config.word_size) {
            return Err(BindError::InvalidWordSize(self.config.word_size));
        }
        let reference = ObjectRef::new(reference).ok_or(BindError::InvalidAddress)?;
        let name = descriptor
            .target
            .pointee_record()
            .ok_or_else(|| BindError::NotAStruct(descriptor.target.to_string()))?;
        let record = descriptor
            .schema
            .get(name)
            .ok_or_else(|| BindError::UnknownRecord(name.to_string()))?
            .clone();
        record.methods().try_for_each(|(_, sig)| check_slot(sig))?;

        let slots = record
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| match field {
                Field::Method(sig) => {
                    Some(self.make_trampoline(&descriptor.schema, reference, index, sig))
                }
                Field::Reserved(_) => None,
            })
            .collect::<Vec<_>>();
        log::debug!(
            "bound {} at {:#x} with {} callable slots",
            record.name,
            reference.addr(),
            slots.iter().flatten().count()
        );
        Ok(Handle {
            inner: Arc::new(HandleInner {
                reference,
                record,
                slots,
            }),
        })
    }

    fn make_trampoline(
        &self,
        schema: &Arc<Schema>,
        reference: ObjectRef,
        index: usize,
        sig: &SlotSignature,
    ) -> Trampoline {
        let signature = Arc::new(sig.clone());
        let convention = select_convention(self.config.conventions, sig.call.as_deref());
        let ctx = SlotContext {
            binder: self.clone(),
            schema: schema.clone(),
            reference,
            index,
            convention,
            signature: signature.clone(),
        };
        Trampoline {
            signature,
            index,
            convention,
            fun: Arc::new(move |args: &[Value]| ctx.invoke(args)),
        }
    }

    /// Bind into `out`. `out` is left untouched on error.
    ///
    /// # Safety
    ///
    /// See [`Binder::bind`].
    pub unsafe fn convert_ref(
        &self,
        reference: usize,
        descriptor: &Descriptor,
        out: &mut Option<Handle>,
    ) -> Result<(), BindError> {
        let handle = unsafe { self.bind(reference, descriptor) }?;
        *out = Some(handle);
        Ok(())
    }
}

/// Bind the object at `reference` with the default configuration and the
/// host's primitives, writing the handle into `out`.
///
/// # Safety
///
/// See [`Binder::bind`].
pub unsafe fn convert_ref(
    reference: usize,
    descriptor: &Descriptor,
    out: &mut Option<Handle>,
) -> Result<(), BindError> {
    unsafe { Binder::default().convert_ref(reference, descriptor, out) }
}
