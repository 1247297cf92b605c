//! # smali-native
//!
//! Selects methods of an Android package for native compilation and rewrites the package's smali
//! listings so those methods become JNI stubs.
//!
//! A run goes through the following steps, see [`pipeline::run`]:
//!
//! 1. the smali listings are scanned into a [`catalog::Catalog`] of every method,
//! 2. the filter rules ([`rules`]) decide which methods to compile and the [`selector`] hands
//!    each of them to the external translator,
//! 3. the generated sources are written into a private copy of the native project ([`emit`],
//!    [`template`]) and built,
//! 4. the selected methods are turned into native stubs ([`patcher`]), the loader is wired into
//!    the application ([`loader`]) and the package is rebuilt and signed ([`tools`]).
//!
//! ```no_run
//!  use smali_native::config::Config;
//!  use smali_native::pipeline::{run, RunOptions};
//!  use smali_native::tools::Toolchain;
//!  use std::path::Path;
//!
//!  let config = Config::load(Path::new("dcc.cfg")).unwrap();
//!  let mut options = RunOptions::new("app.apk");
//!  options.output = Some("app-native.apk".into());
//!  let report = run(&options, &config, &Toolchain::from_config(&config)).unwrap();
//!  println!("{} methods compiled", report.compiled.len());
//! ```

#[macro_use]
mod error;

pub mod abi;
pub mod android;
pub mod catalog;
pub mod config;
pub mod disassembler;
pub mod emit;
pub mod jni;
pub mod listing;
pub mod loader;
pub mod patcher;
pub mod pipeline;
pub mod rules;
pub mod selector;
mod smali_parse;
pub mod template;
pub mod tools;
pub mod types;

#[cfg(test)]
mod tests;

pub use error::{CompileFailure, Error, Result};
