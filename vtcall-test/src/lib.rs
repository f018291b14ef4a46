//! Native fixtures and helpers shared by the integration tests.
//!
//! `fixtures/objects.c` is compiled by the build script. Its objects use plain
//! C functions for every slot, so they are bound with
//! [`ConventionPolicy::Uniform`] on every host.

use std::{path::PathBuf, ptr::NonNull, sync::Arc};

use vtcall::{
    BindError, Binder, Config, ConventionPolicy, Handle, Schema,
    schema::parser,
    utils::{error::report, fileloader},
};

#[repr(C)]
pub struct RawCalculator {
    _private: [u8; 0],
}

unsafe extern "C" {
    fn vt_make_calculator(offset: i32) -> *mut RawCalculator;
    fn vt_free_calculator(calc: *mut RawCalculator);
    fn vt_calculator_multiply_entry() -> usize;
}

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("TEST_ROOT")).join("fixtures/objects.vt")
}

/// The schema describing the fixture objects.
pub fn fixture_schema() -> Arc<Schema> {
    let path = fixture_path();
    let src = fileloader::load(&path).unwrap();
    match parser::parse(&src, Some(path.clone())) {
        Ok(schema) => Arc::new(schema),
        Err(errs) => {
            report(&src, path, &errs);
            panic!("invalid fixture schema");
        }
    }
}

pub fn fixture_config() -> Config {
    Config {
        conventions: ConventionPolicy::Uniform,
        ..Config::default()
    }
}

pub fn fixture_binder() -> Binder {
    Binder::new(fixture_config())
}

/// Address the fixture's `multiply` slot should resolve to.
pub fn multiply_entry() -> usize {
    unsafe { vt_calculator_multiply_entry() }
}

/// A native calculator owned by the test. Frees itself and the children it
/// handed out on drop, so handles must not outlive it.
pub struct Calculator(NonNull<RawCalculator>);

impl Calculator {
    pub fn new(offset: i32) -> Self {
        let raw = unsafe { vt_make_calculator(offset) };
        Self(NonNull::new(raw).expect("fixture allocation failed"))
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn bind_with(&self, binder: &Binder) -> Result<Handle, BindError> {
        let descriptor = fixture_schema().descriptor("Calculator");
        unsafe { binder.bind(self.addr(), &descriptor) }
    }

    pub fn bind(&self) -> Result<Handle, BindError> {
        self.bind_with(&fixture_binder())
    }
}

impl Drop for Calculator {
    fn drop(&mut self) {
        unsafe { vt_free_calculator(self.0.as_ptr()) }
    }
}
