//! Mach-O parsing, mutation, and rewrite logic.
//!
//! `arch`/`constants` hold shared vocabulary; `load_command` and `symtab`
//! are generic byte-surgery primitives; `bind` is a codec for the dyld bind
//! opcode streams; `rewriter` is the component that drives all of the above
//! through one slice's full executable-to-dylib transform.

pub mod arch;
pub mod bind;
pub mod constants;
pub mod load_command;
pub mod rewriter;
pub mod symtab;

pub use arch::Arch;
pub use constants::STUB_FILE_NAME;
pub use rewriter::{process, Platform, RewriteOptions, RewriteOutcome};
