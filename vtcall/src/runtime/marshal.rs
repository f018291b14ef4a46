//! Conversion between [`Value`]s and machine words.

use std::ffi::CString;

use thiserror::Error;

use super::value::Value;
use crate::types::ValueType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("string argument contains a NUL byte")]
    InteriorNul,
    #[error("returned string pointer is null")]
    NullString,
    #[error("no terminator within {max_len} bytes of returned string")]
    Unterminated { max_len: usize },
    #[error("expected {expected}, found {found} value")]
    TypeMismatch {
        expected: ValueType,
        found: &'static str,
    },
    #[error("{0} does not fit in one machine word")]
    Aggregate(ValueType),
}

/// Narrow `v` to `bits` and extend it back to a full word.
fn fit_int(v: u64, bits: u32, signed: bool) -> usize {
    if bits >= usize::BITS {
        return v as usize;
    }
    let shift = u64::BITS - bits;
    if signed {
        (((v << shift) as i64) >> shift) as isize as usize
    } else {
        ((v << shift) >> shift) as usize
    }
}

/// Convert one argument to a word. Strings come back with the buffer the word
/// points into, which must outlive the call.
pub fn to_word(value: &Value, ty: &ValueType) -> Result<(usize, Option<CString>), MarshalError> {
    let mismatch = || MarshalError::TypeMismatch {
        expected: ty.clone(),
        found: value.kind_name(),
    };
    if let Some((bits, signed)) = ty.int_layout() {
        let raw = match value {
            Value::Int(v) => *v as u64,
            Value::UInt(v) => *v,
            _ => return Err(mismatch()),
        };
        return Ok((fit_int(raw, bits, signed), None));
    }
    match (ty, value) {
        (ValueType::Bool, Value::Bool(b)) => Ok((usize::from(*b), None)),
        (ValueType::Str, Value::Str(s)) => {
            let buf = CString::new(s.as_bytes()).map_err(|_| MarshalError::InteriorNul)?;
            Ok((buf.as_ptr() as usize, Some(buf)))
        }
        (ValueType::Ptr | ValueType::Pointer(_), Value::Ptr(p)) => Ok((*p, None)),
        (ValueType::Ptr | ValueType::Pointer(_), Value::Handle(h)) => Ok((h.reference().addr(), None)),
        (ValueType::Ptr | ValueType::Pointer(_), Value::Null) => Ok((0, None)),
        (ValueType::Record(_), _) => Err(MarshalError::Aggregate(ty.clone())),
        _ => Err(mismatch()),
    }
}

/// Reinterpret a returned word as a value of `ty`.
///
/// Only the low bits the type occupies are looked at; the rest of the
/// register is unspecified on return. Strings and handles are not handled
/// here.
pub fn scalar_from_word(word: usize, ty: &ValueType) -> Result<Value, MarshalError> {
    let int = |bits: u32| Value::Int(fit_int(word as u64, bits, true) as isize as i64);
    let uint = |bits: u32| Value::UInt(fit_int(word as u64, bits, false) as u64);
    match ty {
        ValueType::I8 => Ok(int(8)),
        ValueType::I16 => Ok(int(16)),
        ValueType::I32 => Ok(int(32)),
        ValueType::I64 => Ok(int(64)),
        ValueType::Isize => Ok(int(usize::BITS)),
        ValueType::U8 => Ok(uint(8)),
        ValueType::U16 => Ok(uint(16)),
        ValueType::U32 => Ok(uint(32)),
        ValueType::U64 => Ok(uint(64)),
        ValueType::Usize => Ok(uint(usize::BITS)),
        ValueType::Bool => Ok(Value::Bool(word as u8 != 0)),
        ValueType::Ptr | ValueType::Pointer(_) => Ok(Value::Ptr(word)),
        ValueType::Record(_) => Err(MarshalError::Aggregate(ty.clone())),
        ValueType::Str => Err(MarshalError::TypeMismatch {
            expected: ValueType::Str,
            found: "ptr",
        }),
    }
}

/// Copy a NUL-terminated byte string out of native memory, looking at no
/// more than `max_len` bytes. Invalid UTF-8 is replaced.
///
/// # Safety
///
/// A non-zero `addr` must be readable up to its terminator or `max_len`
/// bytes, whichever comes first.
pub unsafe fn read_c_string(addr: usize, max_len: usize) -> Result<String, MarshalError> {
    if addr == 0 {
        return Err(MarshalError::NullString);
    }
    let base = addr as *const u8;
    let mut len = 0;
    while len < max_len {
        if unsafe { base.add(len).read() } == 0 {
            let bytes = unsafe { std::slice::from_raw_parts(base, len) };
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }
        len += 1;
    }
    Err(MarshalError::Unterminated { max_len })
}

/// Words for one call, plus the string buffers they point into.
///
/// The first word is always the object reference. Dropping the buffer frees
/// the strings, so it must live until the raw call has returned.
#[derive(Debug)]
pub struct ArgBuffer {
    words: Vec<usize>,
    retained: Vec<CString>,
}

impl ArgBuffer {
    pub fn new(this: usize, capacity: usize) -> Self {
        let mut words = Vec::with_capacity(capacity + 1);
        words.push(this);
        Self {
            words,
            retained: vec![],
        }
    }

    pub fn push(&mut self, value: &Value, ty: &ValueType) -> Result<(), MarshalError> {
        let (word, buf) = to_word(value, ty)?;
        self.words.push(word);
        self.retained.extend(buf);
        Ok(())
    }

    pub fn words(&self) -> &[usize] {
        &self.words
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integers_are_narrowed_then_extended() {
        let (w, _) = to_word(&Value::Int(-1), &ValueType::I32).unwrap();
        assert_eq!(w, -1isize as usize);
        let (w, _) = to_word(&Value::Int(-1), &ValueType::U8).unwrap();
        assert_eq!(w, 0xff);
        let (w, _) = to_word(&Value::Int(300), &ValueType::I8).unwrap();
        assert_eq!(w, 44);
        let (w, _) = to_word(&Value::UInt(7), &ValueType::I64).unwrap();
        assert_eq!(w, 7);
    }

    #[test]
    fn bools_and_pointers() {
        assert_eq!(to_word(&Value::Bool(true), &ValueType::Bool).unwrap().0, 1);
        assert_eq!(to_word(&Value::Bool(false), &ValueType::Bool).unwrap().0, 0);
        assert_eq!(to_word(&Value::Ptr(0x40), &ValueType::Ptr).unwrap().0, 0x40);
        let ty = ValueType::handle("Calc");
        assert_eq!(to_word(&Value::Null, &ty).unwrap().0, 0);
    }

    #[test]
    fn mismatches_are_reported() {
        let err = to_word(&Value::Str("x".into()), &ValueType::I32).unwrap_err();
        assert_eq!(
            err,
            MarshalError::TypeMismatch {
                expected: ValueType::I32,
                found: "str"
            }
        );
        assert!(matches!(
            to_word(&Value::Int(1), &ValueType::record("R")),
            Err(MarshalError::Aggregate(_))
        ));
        assert_eq!(
            to_word(&Value::Str("a\0b".into()), &ValueType::Str).unwrap_err(),
            MarshalError::InteriorNul
        );
    }

    #[test]
    fn string_round_trip() {
        let (w, buf) = to_word(&Value::Str("hello".into()), &ValueType::Str).unwrap();
        let buf = buf.unwrap();
        assert_eq!(w, buf.as_ptr() as usize);
        let back = unsafe { read_c_string(w, 64) }.unwrap();
        assert_eq!(back, "hello");
    }

    #[test]
    fn string_scan_is_bounded() {
        let bytes = *b"abcdef";
        let addr = bytes.as_ptr() as usize;
        assert_eq!(
            unsafe { read_c_string(addr, 6) },
            Err(MarshalError::Unterminated { max_len: 6 })
        );
        let ok = *b"ok\0";
        assert_eq!(unsafe { read_c_string(ok.as_ptr() as usize, 3) }, Ok("ok".into()));
        assert_eq!(unsafe { read_c_string(0, 3) }, Err(MarshalError::NullString));
    }

    #[test]
    fn returned_words_keep_low_bits() {
        let word = 0xdead_0000_0000_fffe_u64 as usize;
        assert_eq!(scalar_from_word(word, &ValueType::I16), Ok(Value::Int(-2)));
        assert_eq!(scalar_from_word(word, &ValueType::U16), Ok(Value::UInt(0xfffe)));
        assert_eq!(scalar_from_word(0x100, &ValueType::Bool), Ok(Value::Bool(false)));
        assert_eq!(scalar_from_word(0x101, &ValueType::Bool), Ok(Value::Bool(true)));
        assert_eq!(scalar_from_word(12, &ValueType::Ptr), Ok(Value::Ptr(12)));
    }

    #[test]
    fn non_scalar_returns_are_errors() {
        assert_eq!(
            scalar_from_word(0x1000, &ValueType::Str),
            Err(MarshalError::TypeMismatch {
                expected: ValueType::Str,
                found: "ptr"
            })
        );
        assert_eq!(
            scalar_from_word(0x1000, &ValueType::record("Shape")),
            Err(MarshalError::Aggregate(ValueType::record("Shape")))
        );
        assert_eq!(
            scalar_from_word(usize::MAX, &ValueType::Usize),
            Ok(Value::UInt(usize::MAX as u64))
        );
        assert_eq!(scalar_from_word(0xff, &ValueType::I8), Ok(Value::Int(-1)));
    }

    #[test]
    fn arg_buffer_starts_with_this() {
        let mut buf = ArgBuffer::new(0x1000, 2);
        buf.push(&Value::Int(3), &ValueType::I32).unwrap();
        buf.push(&Value::Str("s".into()), &ValueType::Str).unwrap();
        assert_eq!(buf.words()[0], 0x1000);
        assert_eq!(buf.words()[1], 3);
        assert_eq!(unsafe { read_c_string(buf.words()[2], 8) }, Ok("s".into()));
    }
}
