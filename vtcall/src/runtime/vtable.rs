//! Dispatch table lookup. This is the only place that does raw pointer
//! arithmetic on native memory.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid address")]
    InvalidAddress,
    #[error("unsupported word size {0}")]
    WordSize(usize),
}

/// Only the host word is readable: table entries are full addresses in this
/// process.
pub fn is_supported_word_size(word_size: usize) -> bool {
    word_size == size_of::<usize>()
}

unsafe fn read_word(addr: usize) -> usize {
    // SAFETY: the caller guarantees `addr` is readable for one host word.
    unsafe { (addr as *const usize).read_unaligned() }
}

/// Entry address of slot `index` of the object at `reference`:
/// `*(*(reference) + index * word_size)`.
///
/// A zero reference or a zero table pointer is reported without reading
/// further.
///
/// # Safety
///
/// A non-zero `reference` must point to a readable word holding the address
/// of a table with at least `index + 1` entries.
pub unsafe fn resolve_slot(
    reference: usize,
    index: usize,
    word_size: usize,
) -> Result<usize, AddressError> {
    if !is_supported_word_size(word_size) {
        return Err(AddressError::WordSize(word_size));
    }
    if reference == 0 {
        return Err(AddressError::InvalidAddress);
    }
    let table = unsafe { read_word(reference) };
    if table == 0 {
        return Err(AddressError::InvalidAddress);
    }
    let slot = table.wrapping_add(index.wrapping_mul(word_size));
    Ok(unsafe { read_word(slot) })
}
