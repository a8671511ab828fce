//! Generates Objective-C source defining placeholder implementations for a
//! set of orphaned symbols.
//!
//! Two symbol shapes are understood:
//! - `_OBJC_CLASS_$_<Name>` — an Objective-C class symbol, stubbed as an
//!   empty subclass of `NSObject`.
//! - `_<Name>` — a plain C symbol, stubbed as a zero-argument `void`
//!   function whose body aborts if ever called.
//!
//! Anything else is a symbol shape this crate doesn't know how to
//! synthesize a placeholder for, which is a fatal, unsupported input.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use anyhow::{bail, Result};

const OBJC_CLASS_PREFIX: &str = "_OBJC_CLASS_$_";

/// What kind of placeholder a symbol name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubSymbol {
    /// `_OBJC_CLASS_$_<name>` — emit an empty `NSObject` subclass `<name>`.
    Class { name: String },
    /// `_<name>` — emit a `void <name>(void)` that aborts.
    Function { name: String },
}

impl StubSymbol {
    /// Classifies a raw symbol name by its prefix.
    ///
    /// Returns an error for any shape this generator does not support; the
    /// rewriter treats that as fatal rather than silently dropping the
    /// symbol, since a missing placeholder would make the output dylib fail
    /// to load instead of merely failing to run.
    pub fn classify(raw: &str) -> Result<Self> {
        if let Some(name) = raw.strip_prefix(OBJC_CLASS_PREFIX) {
            if name.is_empty() {
                bail!("unsupported symbol shape: empty class name in '{raw}'");
            }
            return Ok(StubSymbol::Class {
                name: name.to_string(),
            });
        }
        if let Some(name) = raw.strip_prefix('_') {
            if name.is_empty() {
                bail!("unsupported symbol shape: empty function name in '{raw}'");
            }
            return Ok(StubSymbol::Function {
                name: name.to_string(),
            });
        }
        bail!("unsupported symbol shape: '{raw}' does not match any known stub prefix");
    }
}

/// Generates Objective-C source text defining every symbol in `symbols`
/// exactly once. Symbols are classified via [`StubSymbol::classify`] and
/// emitted in sorted order so the same orphan set always yields the same
/// source (and therefore the same stub binary), which auto-remove
/// idempotence depends on.
pub fn generate(symbols: &BTreeSet<String>) -> Result<String> {
    let mut classified = Vec::with_capacity(symbols.len());
    for raw in symbols {
        classified.push(StubSymbol::classify(raw)?);
    }

    let mut src = String::new();
    src.push_str("// Generated by dylibify. Do not edit.\n");
    src.push_str("#import <Foundation/Foundation.h>\n");
    src.push_str("#undef NDEBUG\n");
    src.push_str("#include <assert.h>\n\n");

    for symbol in &classified {
        match symbol {
            StubSymbol::Class { name } => {
                let _ = writeln!(src, "@interface {name} : NSObject\n@end\n");
                let _ = writeln!(src, "@implementation {name}\n@end\n");
            }
            StubSymbol::Function { name } => {
                let _ = writeln!(src, "void {name}(void) {{");
                let _ = writeln!(
                    src,
                    "    assert(!\"dylibify stub: {name} is not implemented\");"
                );
                let _ = writeln!(src, "}}\n");
            }
        }
    }

    Ok(src)
}
