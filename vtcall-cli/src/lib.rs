use std::path::{Path, PathBuf};

use itertools::Itertools;
use libloading::{Library, Symbol};
use thiserror::Error;
use vtcall::{
    BindError, Binder, CallError, Config, ConventionPolicy, Handle, NestedHandlePolicy, Value,
    ValueType, log,
    runtime::raw::{self, RawCallError},
    schema::{Schema, parser},
    utils::error::ReportableError,
};

#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Schema file declaring the handle layouts
    #[clap(value_parser)]
    pub schema: String,

    /// Record of the schema to bind the object as.
    #[arg(long)]
    pub handle: Option<String>,

    /// Shared library exporting the factory.
    #[arg(long, short)]
    pub library: Option<PathBuf>,

    /// Exported function that returns the object address.
    #[arg(long)]
    pub factory: Option<String>,

    /// Integer argument passed to the factory. Can be repeated.
    #[arg(long = "factory-arg", allow_negative_numbers = true)]
    pub factory_args: Vec<i64>,

    /// Print the parsed schema and exit
    #[arg(long, default_value_t = false)]
    pub emit_schema: bool,

    #[command(flatten)]
    pub conventions: ConventionFlags,

    /// Most bytes scanned for the end of a returned string.
    #[arg(long)]
    pub max_string_len: Option<usize>,

    /// Return null instead of failing when a returned handle cannot be bound.
    #[arg(long, default_value_t = false)]
    pub zero_nested: bool,

    /// Method to call. Without one, the bound slots are listed.
    pub method: Option<String>,

    /// Method arguments, read according to the declared parameter types.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(clap::Args, Debug, Clone, Copy)]
#[group(required = false, multiple = false)]
pub struct ConventionFlags {
    /// Call every slot with the C convention
    #[arg(long, default_value_t = false)]
    pub uniform: bool,

    /// Honour `#[call = "..."]` annotations
    #[arg(long, default_value_t = false)]
    pub per_slot: bool,
}

impl Args {
    pub fn to_config(&self) -> Config {
        let default = Config::default();
        let conventions = if self.conventions.uniform {
            ConventionPolicy::Uniform
        } else if self.conventions.per_slot {
            ConventionPolicy::PerSlot
        } else {
            default.conventions
        };
        Config {
            conventions,
            max_string_len: self.max_string_len.unwrap_or(default.max_string_len),
            nested_handles: if self.zero_nested {
                NestedHandlePolicy::ZeroValue
            } else {
                NestedHandlePolicy::Propagate
            },
            ..default
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema has {} error(s)", .0.len())]
    Schema(Vec<Box<dyn ReportableError>>),
    #[error("--{0} is required to call a method")]
    MissingArgument(&'static str),
    #[error("no handle `{0}` in the schema")]
    UnknownHandle(String),
    #[error("failed to load {}: {source}", path.display())]
    Load {
        path: PathBuf,
        source: libloading::Error,
    },
    #[error("symbol `{name}` not found: {source}")]
    MissingSymbol {
        name: String,
        source: libloading::Error,
    },
    #[error("factory call failed: {0}")]
    Factory(RawCallError),
    #[error("cannot read {text:?} as {ty}")]
    BadArgument { text: String, ty: ValueType },
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Call(#[from] CallError),
}

fn parse_int<T: TryFrom<i128>>(text: &str) -> Option<T> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    // one sign at most, taken above
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) if hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            i128::from_str_radix(hex, 16).ok()?
        }
        None if digits.bytes().all(|b| b.is_ascii_digit()) => digits.parse::<i128>().ok()?,
        _ => return None,
    };
    T::try_from(if negative { magnitude.checked_neg()? } else { magnitude }).ok()
}

/// Read a command line argument as a value of `ty`.
pub fn parse_arg(text: &str, ty: &ValueType) -> Result<Value, Error> {
    let bad = || Error::BadArgument {
        text: text.to_string(),
        ty: ty.clone(),
    };
    let value = match ty {
        ValueType::Str => Value::Str(text.to_string()),
        ValueType::Bool => match text {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(bad()),
        },
        ValueType::Ptr | ValueType::Pointer(_) if text == "null" => Value::Null,
        ValueType::Ptr | ValueType::Pointer(_) => Value::Ptr(parse_int(text).ok_or_else(bad)?),
        ValueType::Record(_) => return Err(bad()),
        ty => match ty.int_layout() {
            Some((_, true)) => Value::Int(parse_int(text).ok_or_else(bad)?),
            Some((_, false)) => Value::UInt(parse_int(text).ok_or_else(bad)?),
            None => return Err(bad()),
        },
    };
    Ok(value)
}

fn describe(handle: &Handle) -> String {
    handle
        .trampolines()
        .map(|t| format!("{:>3}: {} [{}]", t.index(), t.signature(), t.convention()))
        .join("\n")
}

fn call_method(handle: &Handle, method: &str, texts: &[String]) -> Result<String, Error> {
    let trampoline = handle
        .method(method)
        .ok_or_else(|| CallError::UnknownMethod(method.to_string()))?;
    let params = &trampoline.signature().params;
    if texts.len() != params.len() {
        return Err(CallError::ArgumentCount {
            slot: method.to_string(),
            expected: params.len(),
            found: texts.len(),
        }
        .into());
    }
    let args = texts
        .iter()
        .zip(params)
        .map(|(text, ty)| parse_arg(text, ty))
        .collect::<Result<Vec<_>, _>>()?;
    let ret = trampoline.invoke(&args)?;
    Ok(ret.map(|v| v.to_string()).unwrap_or_default())
}

/// Create an object with the library's factory and bind it.
///
/// # Safety
///
/// The factory must take `factory_args` integers and return an object laid
/// out as the schema's record declares. The library must stay loaded while
/// the handle is used.
unsafe fn bind_from_library(
    library: &Library,
    factory: &str,
    factory_args: &[i64],
    binder: &Binder,
    schema: &std::sync::Arc<Schema>,
    record: &str,
) -> Result<Handle, Error> {
    let symbol: Symbol<unsafe extern "C" fn()> =
        unsafe { library.get(factory.as_bytes()) }.map_err(|source| Error::MissingSymbol {
            name: factory.to_string(),
            source,
        })?;
    let entry = *symbol as usize;
    let words = factory_args
        .iter()
        .map(|a| *a as isize as usize)
        .collect::<Vec<_>>();
    let object = unsafe { raw::cdecl(entry, &words) }.map_err(Error::Factory)?;
    log::info!("{factory} returned object at {object:#x}");
    Ok(unsafe { binder.bind(object, &schema.descriptor(record)) }?)
}

/// Run the command described by `args` against already loaded schema text.
///
/// Returns what should be printed.
pub fn run_source(args: &Args, src: &str, path: &Path) -> Result<String, Error> {
    let schema = parser::parse(src, Some(path.to_path_buf())).map_err(Error::Schema)?;
    if args.emit_schema {
        return Ok(schema.to_string());
    }
    let schema = std::sync::Arc::new(schema);

    let record = args.handle.as_deref().ok_or(Error::MissingArgument("handle"))?;
    if schema.get(record).is_none() {
        return Err(Error::UnknownHandle(record.to_string()));
    }
    let lib_path = args.library.as_ref().ok_or(Error::MissingArgument("library"))?;
    let factory = args.factory.as_deref().ok_or(Error::MissingArgument("factory"))?;

    // SAFETY: loading a library runs its initialisers.
    let library = unsafe { Library::new(lib_path) }.map_err(|source| Error::Load {
        path: lib_path.clone(),
        source,
    })?;
    let binder = Binder::new(args.to_config());
    let handle = unsafe {
        bind_from_library(&library, factory, &args.factory_args, &binder, &schema, record)
    }?;

    let out = match &args.method {
        Some(method) => call_method(&handle, method, &args.args)?,
        None => describe(&handle),
    };
    drop(handle);
    drop(library);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use vtcall::utils::error::dump_to_string;

    const SCHEMA: &str = "handle Calc {\n    multiply(i32, i32) -> i32;\n}";

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "vtcall-cli",
            "calc.vt",
            "--handle",
            "Calc",
            "--library",
            "libcalc.so",
            "--factory",
            "make_calc",
            "--factory-arg",
            "-3",
            "--uniform",
            "multiply",
            "-2",
            "5",
        ])
        .unwrap();
        assert_eq!(args.handle.as_deref(), Some("Calc"));
        assert_eq!(args.factory_args, vec![-3]);
        assert_eq!(args.method.as_deref(), Some("multiply"));
        assert_eq!(args.args, vec!["-2".to_string(), "5".to_string()]);
        assert_eq!(args.to_config().conventions, ConventionPolicy::Uniform);
    }

    #[test]
    fn convention_flags_are_exclusive() {
        let res = Args::try_parse_from(["vtcall-cli", "a.vt", "--uniform", "--per-slot"]);
        assert!(res.is_err());
    }

    #[test]
    fn config_from_flags() {
        let args = Args::try_parse_from([
            "vtcall-cli",
            "a.vt",
            "--per-slot",
            "--max-string-len",
            "64",
            "--zero-nested",
        ])
        .unwrap();
        let config = args.to_config();
        assert_eq!(config.conventions, ConventionPolicy::PerSlot);
        assert_eq!(config.max_string_len, 64);
        assert_eq!(config.nested_handles, NestedHandlePolicy::ZeroValue);
        assert_eq!(config.word_size, size_of::<usize>());
    }

    #[test]
    fn arguments_follow_declared_types() {
        assert_eq!(parse_arg("-2", &ValueType::I32).unwrap(), Value::Int(-2));
        assert_eq!(parse_arg("0xff", &ValueType::U8).unwrap(), Value::UInt(255));
        assert!(parse_arg("256", &ValueType::U8).is_ok());
        assert!(parse_arg("-1", &ValueType::U32).is_err());
        assert_eq!(parse_arg("true", &ValueType::Bool).unwrap(), Value::Bool(true));
        assert_eq!(parse_arg("hi", &ValueType::Str).unwrap(), Value::Str("hi".into()));
        assert_eq!(parse_arg("null", &ValueType::handle("Calc")).unwrap(), Value::Null);
        assert_eq!(parse_arg("0x10", &ValueType::Ptr).unwrap(), Value::Ptr(16));
        assert!(parse_arg("x", &ValueType::I64).is_err());
        assert!(parse_arg("1", &ValueType::record("Calc")).is_err());
    }

    #[test]
    fn doubled_signs_are_rejected() {
        let min = i128::MIN.unsigned_abs().to_string();
        assert_eq!(parse_int::<i128>(&format!("--{min}")), None);
        assert_eq!(parse_int::<i64>("--5"), None);
        assert_eq!(parse_int::<i64>("-+5"), None);
        assert_eq!(parse_int::<i64>("+5"), None);
        assert_eq!(parse_int::<i64>("-0x-5"), None);
        assert_eq!(parse_int::<i64>("-0x10"), Some(-16));
        assert!(parse_arg("--1", &ValueType::I32).is_err());
    }

    #[test]
    fn emit_schema() {
        let args = Args::try_parse_from(["vtcall-cli", "calc.vt", "--emit-schema"]).unwrap();
        let out = run_source(&args, SCHEMA, Path::new("calc.vt")).unwrap();
        assert_eq!(out, SCHEMA);
    }

    #[test]
    fn schema_errors_are_returned() {
        let args = Args::try_parse_from(["vtcall-cli", "bad.vt", "--emit-schema"]).unwrap();
        let res = run_source(&args, "handle {", Path::new("bad.vt"));
        let Err(Error::Schema(errs)) = res else {
            panic!("expected schema errors")
        };
        assert!(!dump_to_string(&errs).is_empty());
    }

    #[test]
    fn calling_requires_a_library() {
        let args = Args::try_parse_from(["vtcall-cli", "calc.vt", "--handle", "Calc"]).unwrap();
        let res = run_source(&args, SCHEMA, Path::new("calc.vt"));
        assert!(matches!(res, Err(Error::MissingArgument("library"))));
        let args = Args::try_parse_from(["vtcall-cli", "calc.vt", "--handle", "Nope"]).unwrap();
        let res = run_source(&args, SCHEMA, Path::new("calc.vt"));
        assert!(matches!(res, Err(Error::UnknownHandle(_))));
    }
}
