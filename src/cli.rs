//! Argument surface for the `dylibify` binary.
//!
//! Names and short flags are part of the external contract; this module
//! only declares the shape `clap`'s derive macro turns into a parser.
//! What the arguments mean lives in [`crate::driver`].

use std::path::PathBuf;

use clap::Parser;

/// Rewrite a Mach-O executable into a loadable dylib, stubbing out missing
/// dependencies.
#[derive(Debug, Parser)]
#[clap(name = "dylibify", version, about, long_about = None)]
pub struct Args {
    /// Input Mach-O executable.
    #[clap(short = 'i', long = "in", value_name = "PATH")]
    pub input: PathBuf,

    /// Output Mach-O dylib.
    #[clap(short = 'o', long = "out", value_name = "PATH")]
    pub out: PathBuf,

    /// Value for the identity-dylib (`LC_ID_DYLIB`) command.
    ///
    /// Defaults to `@executable_path/<basename(out)>`.
    #[clap(short = 'd', long = "dylib-path", value_name = "PATH")]
    pub dylib_path: Option<String>,

    /// Dependency to remove explicitly. May be repeated.
    #[clap(short = 'r', long = "remove-dylib", value_name = "NAME")]
    pub remove_dylib: Vec<String>,

    /// Automatically remove every dependency this host's dynamic loader
    /// cannot currently resolve.
    #[clap(short = 'R', long = "auto-remove-dylibs")]
    pub auto_remove_dylibs: bool,

    /// Remove the embedded `__TEXT,__info_plist` section.
    #[clap(short = 'P', long = "remove-info-plist")]
    pub remove_info_plist: bool,

    /// Retarget platform metadata to iOS 11.0. Mutually exclusive with `-M`.
    #[clap(short = 'I', long = "ios")]
    pub ios: bool,

    /// Retarget platform metadata to macOS 11.0. Mutually exclusive with `-I`.
    #[clap(short = 'M', long = "macos")]
    pub macos: bool,

    /// Enable trace-level diagnostics from the rewriter and the underlying
    /// parser.
    #[clap(short = 'V', long = "verbose")]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_flags() {
        let args = Args::parse_from(["dylibify", "-i", "in", "-o", "out"]);
        assert_eq!(args.input, PathBuf::from("in"));
        assert_eq!(args.out, PathBuf::from("out"));
        assert!(!args.auto_remove_dylibs);
    }

    #[test]
    fn parses_repeated_remove_dylib() {
        let args = Args::parse_from([
            "dylibify", "-i", "in", "-o", "out", "-r", "libA.dylib", "-r", "libB.dylib",
        ]);
        assert_eq!(args.remove_dylib, vec!["libA.dylib", "libB.dylib"]);
    }

    #[test]
    fn parses_all_boolean_flags() {
        let args = Args::parse_from(["dylibify", "-i", "in", "-o", "out", "-R", "-P", "-I", "-V"]);
        assert!(args.auto_remove_dylibs);
        assert!(args.remove_info_plist);
        assert!(args.ios);
        assert!(!args.macos);
        assert!(args.verbose);
    }

    #[test]
    fn rejects_missing_required_args() {
        assert!(Args::try_parse_from(["dylibify"]).is_err());
    }
}
