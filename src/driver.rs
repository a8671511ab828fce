//! Orchestrates one end-to-end run: parse the input image, rewrite every
//! slice, build the stub if any symbols were orphaned, then serialize the
//! result. No partial writes — the output path is only touched once every
//! prior step has succeeded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fs_err as fs;

use crate::cli::Args;
use crate::macho::{self, Platform, RewriteOptions};
use crate::stub_build;

fn narrate(verbose: bool, msg: impl AsRef<str>) {
    if verbose {
        eprintln!("dylibify: {}", msg.as_ref());
    }
}

/// Resolves CLI arguments into the rewriter's own option struct, catching
/// the one combination `clap` can't express directly: `-I`/`-M` are each
/// ordinary booleans, but at most one may be set.
fn resolve_options(args: &Args) -> Result<RewriteOptions> {
    if args.ios && args.macos {
        bail!("--ios and --macos are mutually exclusive");
    }
    let platform = if args.ios {
        Some(Platform::Ios)
    } else if args.macos {
        Some(Platform::MacOs)
    } else {
        None
    };

    let out_basename = args
        .out
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out.dylib".to_string());

    Ok(RewriteOptions {
        dylib_path: args.dylib_path.clone(),
        remove_dylibs: args.remove_dylib.clone(),
        auto_remove: args.auto_remove_dylibs,
        remove_info_plist: args.remove_info_plist,
        platform,
        verbose: args.verbose,
        out_basename,
    })
}

/// Runs the full driver pipeline for `args`. On success the rewritten image
/// (and, if needed, its stub) are written to disk; on any failure, neither
/// file is touched.
pub fn run(args: &Args) -> Result<()> {
    let input = fs::read(&args.input).with_context(|| format!("reading input '{}'", args.input.display()))?;

    let opts = resolve_options(args)?;
    narrate(opts.verbose, format!("parsing '{}'", args.input.display()));

    let outcome = macho::process(&input, &opts)?;

    if !outcome.stub_symbols.is_empty() {
        let stub_install_path = outcome
            .stub_install_path
            .as_ref()
            .context("stub symbols present but no stub install path computed")?;
        let stub_path = stub_sibling_path(&args.out);
        narrate(
            opts.verbose,
            format!(
                "building stub dylib '{}' for {} arch(es), {} symbol(s)",
                stub_path.display(),
                outcome.stub_archs.len(),
                outcome.stub_symbols.len()
            ),
        );
        stub_build::build(&stub_path, stub_install_path, &outcome.stub_symbols, &outcome.stub_archs)?;
    } else {
        narrate(opts.verbose, "no dependencies orphaned; no stub needed");
    }

    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&args.out, &outcome.data).with_context(|| format!("writing output '{}'", args.out.display()))?;
    narrate(opts.verbose, format!("wrote '{}'", args.out.display()));

    Ok(())
}

/// The stub's on-disk path: always `dylibify-stubs.dylib` beside the
/// rewriter's own output, matching the path embedded into every slice's
/// stub dependency command.
fn stub_sibling_path(out: &Path) -> PathBuf {
    let dir = out.parent().filter(|p| !p.as_os_str().is_empty());
    match dir {
        Some(dir) => dir.join(macho::STUB_FILE_NAME),
        None => PathBuf::from(macho::STUB_FILE_NAME),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_sibling_path_sits_next_to_output() {
        assert_eq!(
            stub_sibling_path(Path::new("/tmp/out/app.dylib")),
            PathBuf::from("/tmp/out/dylibify-stubs.dylib")
        );
        assert_eq!(stub_sibling_path(Path::new("app.dylib")), PathBuf::from("dylibify-stubs.dylib"));
    }
}
