//! Command line interface for vtcall.
//!
//! Loads a schema file, creates an object through a factory exported by a
//! shared library, binds it and calls one method. `--emit-schema` only parses
//! and prints the schema.

use clap::Parser;
use vtcall::log;
use vtcall::utils::{error::report, fileloader};
use vtcall_cli::{Args, Error, run_source};

#[cfg(not(target_arch = "wasm32"))]
use mimalloc::MiMalloc;

#[cfg(not(target_arch = "wasm32"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if cfg!(debug_assertions) | cfg!(test) {
        colog::default_builder()
            .filter_level(log::LevelFilter::Trace)
            .init();
    } else {
        colog::default_builder().init();
    }

    let args = Args::parse();
    let fullpath = fileloader::get_canonical_path(".", &args.schema)?;
    let content = fileloader::load(&fullpath)?;
    match run_source(&args, &content, &fullpath) {
        Ok(out) => {
            if !out.is_empty() {
                println!("{out}");
            }
            Ok(())
        }
        Err(Error::Schema(errs)) => {
            report(&content, fullpath, &errs);
            Err(format!("Failed to process {}", args.schema).into())
        }
        Err(e) => Err(e.into()),
    }
}
