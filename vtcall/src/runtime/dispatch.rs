//! Calling-convention dispatch.
//!
//! The [`Dispatcher`] maps each [`CallConvention`] to one raw-call primitive
//! and forwards to it. It holds no other logic; substituting primitives is how
//! tests observe which convention a slot was routed through.

use std::{fmt, sync::Arc};

use super::raw::{self, RawCallError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallConvention {
    /// Platform default for object methods.
    Thiscall,
    /// Flat stack, callee cleans.
    Stdcall,
    /// Flat stack, caller cleans.
    Cdecl,
}

impl fmt::Display for CallConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallConvention::Thiscall => write!(f, "thiscall"),
            CallConvention::Stdcall => write!(f, "stdcall"),
            CallConvention::Cdecl => write!(f, "cdecl"),
        }
    }
}

/// A primitive that transfers control to `target` with `args` placed where
/// its convention expects them.
pub trait RawCall: Send + Sync {
    /// # Safety
    ///
    /// `target` must be callable with `args` under this primitive's
    /// convention.
    unsafe fn call(&self, target: usize, args: &[usize]) -> Result<usize, RawCallError>;
}

impl<F> RawCall for F
where
    F: Fn(usize, &[usize]) -> Result<usize, RawCallError> + Send + Sync,
{
    unsafe fn call(&self, target: usize, args: &[usize]) -> Result<usize, RawCallError> {
        self(target, args)
    }
}

/// [`RawCall`] over one of the native primitives in [`raw`].
#[derive(Clone, Copy)]
pub struct NativeCall(pub unsafe fn(usize, &[usize]) -> Result<usize, RawCallError>);

impl RawCall for NativeCall {
    unsafe fn call(&self, target: usize, args: &[usize]) -> Result<usize, RawCallError> {
        unsafe { (self.0)(target, args) }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    thiscall: Arc<dyn RawCall>,
    stdcall: Arc<dyn RawCall>,
    cdecl: Arc<dyn RawCall>,
}

impl Dispatcher {
    pub fn new(
        thiscall: Arc<dyn RawCall>,
        stdcall: Arc<dyn RawCall>,
        cdecl: Arc<dyn RawCall>,
    ) -> Self {
        Self {
            thiscall,
            stdcall,
            cdecl,
        }
    }

    /// The host's own primitives.
    pub fn native() -> Self {
        Self::new(
            Arc::new(NativeCall(raw::thiscall)),
            Arc::new(NativeCall(raw::stdcall)),
            Arc::new(NativeCall(raw::cdecl)),
        )
    }

    /// Every tag resolves to the same primitive.
    pub fn uniform(primitive: Arc<dyn RawCall>) -> Self {
        Self::new(primitive.clone(), primitive.clone(), primitive)
    }

    pub fn with_primitive(mut self, convention: CallConvention, primitive: Arc<dyn RawCall>) -> Self {
        match convention {
            CallConvention::Thiscall => self.thiscall = primitive,
            CallConvention::Stdcall => self.stdcall = primitive,
            CallConvention::Cdecl => self.cdecl = primitive,
        }
        self
    }

    pub fn primitive(&self, convention: CallConvention) -> &Arc<dyn RawCall> {
        match convention {
            CallConvention::Thiscall => &self.thiscall,
            CallConvention::Stdcall => &self.stdcall,
            CallConvention::Cdecl => &self.cdecl,
        }
    }

    /// # Safety
    ///
    /// See [`RawCall::call`].
    pub unsafe fn dispatch(
        &self,
        convention: CallConvention,
        target: usize,
        words: &[usize],
    ) -> Result<usize, RawCallError> {
        unsafe { self.primitive(convention).call(target, words) }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
