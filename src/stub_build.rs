//! Drives the external Objective-C compiler and universal-binary packager
//! to turn a set of orphaned symbol names into one fat stub dylib.
//!
//! Subprocess plumbing: build a [`Command`], run it to completion, and
//! turn a non-zero exit status into a `bail!` carrying whatever the child
//! wrote to stderr. Nothing here is retried.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use fs_err as fs;

use crate::macho::Arch;
use crate::stub_source;

/// One per-arch compiler invocation's expected inputs, and where its output
/// lands before `lipo` fuses every arch into the final fat stub.
struct ThinStub {
    arch: Arch,
    path: PathBuf,
}

/// Generates the stub source once, compiles it once per `archs`, and fuses
/// the per-arch outputs into `stub_path` via the universal-binary packager.
///
/// `stub_path` is the on-disk location of the fat stub (placed beside the
/// rewriter's output); `install_path` is the value baked into the stub's
/// own `LC_ID_DYLIB`, which must match the path the rewriter embedded in
/// every slice's stub dependency command.
pub fn build(
    stub_path: &Path,
    install_path: &str,
    symbols: &BTreeSet<String>,
    archs: &BTreeSet<Arch>,
) -> Result<()> {
    if archs.is_empty() {
        bail!("stub build requested with no architectures enqueued");
    }

    let out_dir = stub_path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(out_dir)?;

    let source = stub_source::generate(symbols)?;
    let src_path = out_dir.join("dylibify-stub.m");
    fs::write(&src_path, &source)?;

    let mut thin_stubs = Vec::with_capacity(archs.len());
    for &arch in archs {
        let thin_path = out_dir.join(format!("dylibify-stubs.{}.dylib", arch.file_suffix()));
        compile_one(&src_path, &thin_path, arch, install_path)?;
        thin_stubs.push(ThinStub { arch, path: thin_path });
    }

    lipo_create(&thin_stubs, stub_path)?;
    Ok(())
}

fn compile_one(src_path: &Path, out_path: &Path, arch: Arch, install_path: &str) -> Result<()> {
    let install_arg = format!("-Wl,-install_name,{install_path}");
    let output = Command::new("clang")
        .arg("-arch")
        .arg(arch.clang_flag())
        .arg("-o")
        .arg(out_path)
        .arg(src_path)
        .arg("-shared")
        .arg("-fobjc-arc")
        .arg("-framework")
        .arg("Foundation")
        .arg(&install_arg)
        .output()
        .with_context(|| format!("failed to spawn clang for arch {}", arch.clang_flag()))?;

    if !output.status.success() {
        bail!(
            "clang failed for arch {} (exit {:?}): {}",
            arch.clang_flag(),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

fn lipo_create(thin_stubs: &[ThinStub], fat_path: &Path) -> Result<()> {
    let mut cmd = Command::new("lipo");
    cmd.arg("-create").arg("-output").arg(fat_path);
    for thin in thin_stubs {
        cmd.arg(&thin.path);
    }

    let output = cmd.output().context("failed to spawn lipo")?;
    if !output.status.success() {
        bail!(
            "lipo failed (exit {:?}): {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}
