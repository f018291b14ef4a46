pub mod binder;
pub mod dispatch;
pub mod marshal;
pub mod raw;
pub mod value;
pub mod vtable;
