//! Native raw-call primitives.
//!
//! Each primitive transfers control to a machine address with a list of
//! word-sized arguments and returns the callee's single-word result. The
//! callee's real signature is unknown here, so a call interface is built at
//! run time with one word parameter per argument and a word result. Integer
//! and pointer arguments of at most one word share registers and stack slots
//! with a full word on every supported ABI, so the callee reads the low bits
//! it expects.
//!
//! `thiscall` and `stdcall` only differ from the C convention on 32-bit x86;
//! elsewhere they are the C convention.

use std::ffi::c_void;

use libffi::middle::{Arg, Cif, CodePtr, FfiAbi, Type};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawCallError {
    #[error("call target is a null address")]
    NullTarget,
    #[error("native call failed: {0}")]
    Failed(String),
}

/// Call `target` with `args` as word parameters under `abi`.
///
/// # Safety
///
/// As [`cdecl`], for a function using `abi`.
unsafe fn call_with_abi(abi: FfiAbi, target: usize, args: &[usize]) -> Result<usize, RawCallError> {
    if target == 0 {
        return Err(RawCallError::NullTarget);
    }
    let mut cif = Cif::new(args.iter().map(|_| Type::usize()), Type::usize());
    cif.set_abi(abi);
    let ffi_args = args.iter().map(|a| Arg::new(a)).collect::<Vec<_>>();
    let code = CodePtr::from_ptr(target as *const c_void);
    // SAFETY: upheld by the caller of the enclosing primitive.
    Ok(unsafe { cif.call::<usize>(code, &ffi_args) })
}

/// C calling convention.
///
/// # Safety
///
/// `target` must be the entry of a function whose parameters are `args.len()`
/// integer or pointer values of at most one word each, using the C convention.
pub unsafe fn cdecl(target: usize, args: &[usize]) -> Result<usize, RawCallError> {
    unsafe { call_with_abi(libffi::middle::ffi_abi_FFI_DEFAULT_ABI, target, args) }
}

/// Object-method convention: `this` in a register on 32-bit x86.
///
/// # Safety
///
/// As [`cdecl`], with the first word being the object pointer.
#[cfg(target_arch = "x86")]
pub unsafe fn thiscall(target: usize, args: &[usize]) -> Result<usize, RawCallError> {
    if args.is_empty() {
        // thiscall always has an object pointer
        return unsafe { cdecl(target, args) };
    }
    unsafe { call_with_abi(libffi::raw::ffi_abi_FFI_THISCALL, target, args) }
}

/// Object-method convention; identical to [`cdecl`] on this architecture.
///
/// # Safety
///
/// As [`cdecl`].
#[cfg(not(target_arch = "x86"))]
pub unsafe fn thiscall(target: usize, args: &[usize]) -> Result<usize, RawCallError> {
    unsafe { cdecl(target, args) }
}

/// Callee-cleans stack convention.
///
/// # Safety
///
/// As [`cdecl`], for a function using stdcall.
#[cfg(target_arch = "x86")]
pub unsafe fn stdcall(target: usize, args: &[usize]) -> Result<usize, RawCallError> {
    unsafe { call_with_abi(libffi::raw::ffi_abi_FFI_STDCALL, target, args) }
}

/// Callee-cleans stack convention; identical to [`cdecl`] on this
/// architecture.
///
/// # Safety
///
/// As [`cdecl`].
#[cfg(not(target_arch = "x86"))]
pub unsafe fn stdcall(target: usize, args: &[usize]) -> Result<usize, RawCallError> {
    unsafe { cdecl(target, args) }
}
