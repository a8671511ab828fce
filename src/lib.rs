//! Rewrites a Mach-O executable into a loadable dylib, replacing any
//! dependency that can't be resolved on the target host with a synthesized
//! stub that defines placeholder implementations for the symbols it owned.
//!
//! See [`macho::process`] for the entry point the [`driver`] drives, and
//! [`driver::run`] for the CLI-facing orchestration of parse → rewrite →
//! stub build → serialize.

pub mod cli;
pub mod driver;
pub mod host_probe;
pub mod macho;
pub mod ordinal;
pub mod stub_build;
pub mod stub_source;
