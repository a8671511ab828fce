//! Numeric Mach-O constants this crate needs beyond what `goblin`'s typed
//! `CommandVariant` already exposes. Load commands this crate only ever
//! needs to *find and remove* (never to read fields out of) are matched by
//! raw `cmd` id rather than by a typed variant, so a goblin version that
//! doesn't happen to wrap one of them in a rich struct still works.

/// Load a dependency dylib (`LC_LOAD_DYLIB`).
pub const LC_LOAD_DYLIB: u32 = 0xc;
/// A dylib's own identity (`LC_ID_DYLIB`), present only in dylib images.
pub const LC_ID_DYLIB: u32 = 0xd;
/// Embedded code signature (`LC_CODE_SIGNATURE`), dropped since a rewritten
/// binary invalidates any signature over the original bytes.
pub const LC_CODE_SIGNATURE: u32 = 0x1d;
/// Dynamic linker load command (`LC_LOAD_DYLINKER`).
pub const LC_LOAD_DYLINKER: u32 = 0xe;
/// Entry point load command (`LC_MAIN`).
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
/// Source version load command (`LC_SOURCE_VERSION`).
pub const LC_SOURCE_VERSION: u32 = 0x2a;
/// Minimum macOS version load command (`LC_VERSION_MIN_MACOSX`).
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
/// Minimum iOS version load command (`LC_VERSION_MIN_IPHONEOS`).
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
/// Build version load command (`LC_BUILD_VERSION`).
pub const LC_BUILD_VERSION: u32 = 0x32;
/// Set on commands that are required for dyld to load the image (part of
/// the numeric encoding of several `LC_*` constants).
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

/// Segment name of the zero page, mapped with no protections to catch null
/// dereferences in `MH_EXECUTE` images.
pub const SEG_PAGEZERO: &str = "__PAGEZERO";
/// Segment holding the text section and, when present, the embedded
/// Info.plist section.
pub const SEG_TEXT: &str = "__TEXT";
/// Section name of the embedded Info.plist inside `__TEXT`.
pub const SECT_INFO_PLIST: &str = "__info_plist";

/// `dyld` platform identifier for macOS, used in `LC_BUILD_VERSION`.
pub const PLATFORM_MACOS: u32 = 1;
/// `dyld` platform identifier for iOS, used in `LC_BUILD_VERSION`.
pub const PLATFORM_IOS: u32 = 2;

/// Packed `X.Y.Z` version used for `current_version`/`compatibility_version`
/// on every dylib command this crate emits.
pub const DYLIB_VERSION: u32 = 0x0001_0000;
/// Timestamp field of the identity-dylib command this crate emits. Not
/// meaningful to any loader; copied as a fixed constant.
pub const ID_DYLIB_TIMESTAMP: u32 = 2;
/// Minimum-OS and SDK version (`11.0.0`, packed `X.Y.Z`) used for the
/// platform retarget's `LC_BUILD_VERSION`.
pub const RETARGET_OS_VERSION: u32 = (11 << 16) | (0 << 8) | 0;

/// CPU type: Intel, 32-bit.
pub const CPU_TYPE_X86: u32 = 7;
/// CPU type: ARM, 32-bit.
pub const CPU_TYPE_ARM: u32 = 12;
/// Mask isolating the 64-bit ABI bit of a CPU type.
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
/// CPU type: Intel, 64-bit.
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// CPU type: ARM, 64-bit.
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// CPU subtype: ARMv7.
pub const CPU_SUBTYPE_ARM_V7: u32 = 9;

/// Default path the generated stub dylib is installed at, relative to the
/// directory the caller's output path lives in.
pub const STUB_FILE_NAME: &str = "dylibify-stubs.dylib";
