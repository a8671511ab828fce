//! CPU architecture recognition, shared between the rewriter (to know which
//! stub to enqueue for a slice) and the stub builder (to pick a `clang
//! -arch` flag).

use anyhow::{bail, Result};

use super::constants::{CPU_SUBTYPE_ARM_V7, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64};

/// One of the four CPU architectures this crate knows how to stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Arch {
    X86,
    X86_64,
    ArmV7,
    Arm64,
}

impl Arch {
    /// Classifies a slice by its `(cputype, cpusubtype)` pair.
    ///
    /// Any CPU type this crate doesn't know how to stub is a fatal error for
    /// that slice's stub build (per the component contract), not a silent
    /// skip.
    pub fn from_cpu(cpu_type: u32, cpu_subtype: u32) -> Result<Self> {
        match cpu_type {
            CPU_TYPE_X86 => Ok(Arch::X86),
            CPU_TYPE_X86_64 => Ok(Arch::X86_64),
            CPU_TYPE_ARM64 => Ok(Arch::Arm64),
            CPU_TYPE_ARM if cpu_subtype & 0x00ff_ffff == CPU_SUBTYPE_ARM_V7 => Ok(Arch::ArmV7),
            CPU_TYPE_ARM => bail!(
                "unsupported ARM cpusubtype {cpu_subtype:#x}: only armv7 is recognized for stub builds"
            ),
            other => bail!("unsupported cputype {other:#x}: no stub architecture known for it"),
        }
    }

    /// The `-arch` value `clang` expects for this architecture.
    pub fn clang_flag(self) -> &'static str {
        match self {
            Arch::X86 => "i386",
            Arch::X86_64 => "x86_64",
            Arch::ArmV7 => "armv7",
            Arch::Arm64 => "arm64",
        }
    }

    /// A short, filesystem-safe suffix used to name this architecture's
    /// per-arch stub file before it is fused by `lipo`.
    pub fn file_suffix(self) -> &'static str {
        self.clang_flag()
    }
}
