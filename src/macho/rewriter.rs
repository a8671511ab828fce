//! Per-slice Mach-O rewrite: the core rewriter.
//!
//! Each call to [`rewrite_slice`] runs one slice through the full phase
//! sequence: snapshot, header/identity, platform retarget, removal-set
//! computation, mutation, ordinal remap, stub trigger. [`process`] is the
//! fat/thin dispatcher that drives [`rewrite_slice`] once per architecture
//! and reassembles the result.
//!
//! Every removal below follows the same shape: re-parse, scan
//! `macho.load_commands` for the first match, mutate the buffer and
//! `break` immediately. Re-parsing on each attempt is what lets a
//! match+mutate+break happen in the same loop body the borrow checker
//! accepts: once the matched command's fields are copied into locals,
//! nothing from the old parse is touched again.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};
use goblin::container;
use goblin::mach::fat;
use goblin::mach::header::{MH_DYLIB, MH_EXECUTE, MH_NO_REEXPORTED_DYLIBS};
use goblin::mach::load_command::{CommandVariant, DylibCommand};
use goblin::mach::{MachO, MultiArch, parse_magic_and_ctx, peek};
use scroll::{Pread, Pwrite};

use crate::host_probe;
use crate::ordinal;
use crate::stub_source::StubSymbol;

use super::arch::Arch;
use super::bind;
use super::constants::*;
use super::load_command::{self as surgery, header_size};
use super::symtab;

/// Platform to retarget the output to, selected by `-I`/`-M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Ios,
}

/// Everything the rewriter needs that the CLI layer decides.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub dylib_path: Option<String>,
    pub remove_dylibs: Vec<String>,
    pub auto_remove: bool,
    pub remove_info_plist: bool,
    pub platform: Option<Platform>,
    pub verbose: bool,
    /// File name (not path) of the rewriter's own output; used to build the
    /// default identity path `@executable_path/<basename>`.
    pub out_basename: String,
}

/// What the rewriter learned needs building once every slice is done.
#[derive(Debug, Default)]
pub struct RewriteOutcome {
    pub data: Vec<u8>,
    pub stub_archs: BTreeSet<Arch>,
    pub stub_symbols: BTreeSet<String>,
    /// Install name to embed in the generated stub (same across all
    /// slices, since the identity path doesn't vary per architecture).
    pub stub_install_path: Option<String>,
}

fn narrate(opts: &RewriteOptions, msg: impl AsRef<str>) {
    if opts.verbose {
        eprintln!("dylibify: {}", msg.as_ref());
    }
}

/// Returns `name`'s directory component the way a Unix path would, without
/// touching the filesystem (identity paths are frequently `@executable_path`
/// pseudo-paths that don't exist on disk).
fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn dylib_command(variant: &CommandVariant) -> Option<&DylibCommand> {
    match variant {
        CommandVariant::LoadDylib(cmd)
        | CommandVariant::LoadWeakDylib(cmd)
        | CommandVariant::ReexportDylib(cmd)
        | CommandVariant::LazyLoadDylib(cmd)
        | CommandVariant::LoadUpwardDylib(cmd) => Some(cmd),
        _ => None,
    }
}

fn read_dylib_name(data: &[u8], cmd_offset: usize, dylib_cmd: &DylibCommand) -> String {
    let name_offset = cmd_offset + dylib_cmd.dylib.name as usize;
    let cmd_end = cmd_offset + dylib_cmd.cmdsize as usize;
    let name_end = data[name_offset..cmd_end]
        .iter()
        .position(|&b| b == 0)
        .map(|p| name_offset + p)
        .unwrap_or(cmd_end);
    String::from_utf8_lossy(&data[name_offset..name_end]).into_owned()
}

fn read_fixed_name(data: &[u8], offset: usize) -> String {
    let raw = &data[offset..offset + 16];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(16);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// One dependency-dylib command snapshotted before any mutation.
struct SnapshotLib {
    name: String,
}

/// The dependency-dylib names this slice currently declares, in load order.
/// Used ahead of any mutation to decide whether an explicit `-r` target
/// exists anywhere in a (possibly fat) input.
fn slice_dep_names(data: &[u8]) -> Result<BTreeSet<String>> {
    let macho = MachO::parse(data, 0).context("failed to parse Mach-O slice")?;
    let mut names = BTreeSet::new();
    for lc in &macho.load_commands {
        if let Some(dylib_cmd) = dylib_command(&lc.command) {
            names.insert(read_dylib_name(data, lc.offset, dylib_cmd));
        }
    }
    Ok(names)
}

/// Removes one load command whose numeric `cmd` id is in `target_ids`.
/// Returns `true` if something was removed. `target_ids` being plain data
/// (not a closure) is what keeps this free of the data-aliasing the
/// borrow checker would otherwise reject: the match condition never reads
/// `data` itself, only fields already copied out of `macho.load_commands`.
fn remove_one_command_by_id(data: &mut Vec<u8>, target_ids: &[u32]) -> Result<bool> {
    let macho = MachO::parse(data, 0).context("re-parsing slice for load-command removal")?;
    let (_, maybe_ctx) = parse_magic_and_ctx(data, 0)?;
    let ctx = maybe_ctx.context("could not determine slice context")?;
    let mut header = macho.header;

    for lc in &macho.load_commands {
        if target_ids.contains(&lc.command.cmd()) {
            let offset = lc.offset;
            let cmdsize = lc.command.cmdsize();
            surgery::remove_load_command(data, &mut header, ctx, offset, cmdsize)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn remove_all_commands_by_id(data: &mut Vec<u8>, target_ids: &[u32]) -> Result<()> {
    while remove_one_command_by_id(data, target_ids)? {}
    Ok(())
}

/// Removes the first segment command named `target_name`. Returns `true`
/// if one was found and removed.
fn remove_one_segment_by_name(data: &mut Vec<u8>, target_name: &str) -> Result<bool> {
    let macho = MachO::parse(data, 0).context("re-parsing slice for segment removal")?;
    let (_, maybe_ctx) = parse_magic_and_ctx(data, 0)?;
    let ctx = maybe_ctx.context("could not determine slice context")?;
    let mut header = macho.header;

    for lc in &macho.load_commands {
        let segname = match &lc.command {
            CommandVariant::Segment64(seg) => String::from_utf8_lossy(&seg.segname).trim_end_matches('\0').to_string(),
            CommandVariant::Segment32(seg) => String::from_utf8_lossy(&seg.segname).trim_end_matches('\0').to_string(),
            _ => continue,
        };
        if segname == target_name {
            let offset = lc.offset;
            let cmdsize = lc.command.cmdsize();
            surgery::remove_load_command(data, &mut header, ctx, offset, cmdsize)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn remove_all_segments_by_name(data: &mut Vec<u8>, target_name: &str) -> Result<()> {
    while remove_one_segment_by_name(data, target_name)? {}
    Ok(())
}

/// Removes the first dependency-dylib command named `target_name`. Returns
/// `true` if one was found and removed.
fn remove_one_dylib_by_name(data: &mut Vec<u8>, target_name: &str) -> Result<bool> {
    let macho = MachO::parse(data, 0).context("re-parsing slice for dylib removal")?;
    let (_, maybe_ctx) = parse_magic_and_ctx(data, 0)?;
    let ctx = maybe_ctx.context("could not determine slice context")?;
    let mut header = macho.header;

    for lc in &macho.load_commands {
        let Some(dylib_cmd) = dylib_command(&lc.command) else {
            continue;
        };
        let name = read_dylib_name(data, lc.offset, dylib_cmd);
        if name == target_name {
            let offset = lc.offset;
            let cmdsize = lc.command.cmdsize();
            surgery::remove_load_command(data, &mut header, ctx, offset, cmdsize)?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Removes the `__TEXT,__info_plist` section entry from the `__TEXT`
/// segment's section array, without removing the segment itself.
fn remove_info_plist_section(data: &mut Vec<u8>, ctx: container::Ctx) -> Result<()> {
    let macho = MachO::parse(data, 0).context("re-parsing slice for info_plist removal")?;
    let mut header = macho.header;

    for lc in &macho.load_commands {
        let (seg_header_size, section_size, nsects) = match &lc.command {
            CommandVariant::Segment64(seg) => {
                let segname = String::from_utf8_lossy(&seg.segname).trim_end_matches('\0').to_string();
                if segname != SEG_TEXT {
                    continue;
                }
                (72usize, 80usize, seg.nsects)
            }
            CommandVariant::Segment32(seg) => {
                let segname = String::from_utf8_lossy(&seg.segname).trim_end_matches('\0').to_string();
                if segname != SEG_TEXT {
                    continue;
                }
                (56usize, 68usize, seg.nsects)
            }
            _ => continue,
        };

        let cmd_offset = lc.offset;
        let sections_start = cmd_offset + seg_header_size;
        let mut found_at = None;
        for i in 0..nsects as usize {
            let sect_offset = sections_start + i * section_size;
            if read_fixed_name(data, sect_offset) == SECT_INFO_PLIST {
                found_at = Some(sect_offset);
                break;
            }
        }
        let Some(sect_offset) = found_at else {
            return Ok(());
        };

        surgery::shrink_command_bytes(data, &mut header, ctx, sect_offset, section_size)?;
        let cmdsize_offset = cmd_offset + 4;
        let new_cmdsize: u32 = data.pread_with(cmdsize_offset, ctx.le)?;
        data.pwrite_with(new_cmdsize - section_size as u32, cmdsize_offset, ctx.le)?;
        let nsects_offset = cmd_offset + seg_header_size - 8;
        data.pwrite_with(nsects - 1, nsects_offset, ctx.le)?;
        return Ok(());
    }
    Ok(())
}

/// Finds the current `LC_SYMTAB` command and returns
/// `(symoff, nsyms, stroff, strsize)`.
fn find_symtab(data: &[u8]) -> Result<(u32, u32, u32, u32)> {
    let macho = MachO::parse(data, 0)?;
    for lc in &macho.load_commands {
        if let CommandVariant::Symtab(cmd) = &lc.command {
            return Ok((cmd.symoff, cmd.nsyms, cmd.stroff, cmd.strsize));
        }
    }
    bail!("no LC_SYMTAB command found")
}

/// Finds the current dyld-info command (`LC_DYLD_INFO`/`LC_DYLD_INFO_ONLY`)
/// and returns `(cmd_offset, bind_off, bind_size, lazy_bind_off, lazy_bind_size)`.
fn find_dyld_info(data: &[u8]) -> Result<Option<(usize, u32, u32, u32, u32)>> {
    let macho = MachO::parse(data, 0)?;
    for lc in &macho.load_commands {
        if let CommandVariant::DyldInfo(cmd) | CommandVariant::DyldInfoOnly(cmd) = &lc.command {
            return Ok(Some((
                lc.offset,
                cmd.bind_off,
                cmd.bind_size,
                cmd.lazy_bind_off,
                cmd.lazy_bind_size,
            )));
        }
    }
    Ok(None)
}

/// Shifts every LINKEDIT offset field strictly after `edit_start` by
/// `delta`. Operates on whichever of the dyld-info and symtab commands
/// currently exist; each field is only touched if it lies after the
/// edited region, so this is safe to call regardless of file layout order.
fn shift_linkedit_offsets(data: &mut [u8], ctx: container::Ctx, edit_start: u32, delta: i64) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let shift = |value: u32| -> u32 {
        if value > edit_start {
            (value as i64 + delta) as u32
        } else {
            value
        }
    };

    if let Some((cmd_offset, ..)) = find_dyld_info(data)? {
        for field_offset in [8usize, 16, 24, 32, 40] {
            let abs = cmd_offset + field_offset;
            let value: u32 = data.pread_with(abs, ctx.le)?;
            data.pwrite_with(shift(value), abs, ctx.le)?;
        }
    }
    if let Ok((symoff, _, stroff, _)) = find_symtab(data) {
        let macho = MachO::parse(data, 0)?;
        let mut cmd_offset = None;
        for lc in &macho.load_commands {
            if let CommandVariant::Symtab(_) = &lc.command {
                cmd_offset = Some(lc.offset);
                break;
            }
        }
        if let Some(cmd_offset) = cmd_offset {
            data.pwrite_with(shift(symoff), cmd_offset + 8, ctx.le)?;
            data.pwrite_with(shift(stroff), cmd_offset + 16, ctx.le)?;
        }
    }
    Ok(())
}

/// Decodes, remaps, and re-encodes one bind-opcode stream (bind or
/// lazy-bind), splicing the buffer and shifting subsequent LINKEDIT offsets
/// if the re-encoded length differs from the original.
fn remap_bind_stream(
    data: &mut Vec<u8>,
    ctx: container::Ctx,
    off: u32,
    size: u32,
    remap: &HashMap<u8, u8>,
    size_field_offset: usize,
) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    let range = off as usize..(off as usize + size as usize);
    let mut ops = bind::decode(data, range.clone())?;
    bind::remap_ordinals(&mut ops, remap)?;
    let new_bytes = bind::encode(&ops);
    let delta = new_bytes.len() as i64 - size as i64;
    let new_len = new_bytes.len() as u32;

    data.splice(range, new_bytes);

    let (cmd_offset, ..) = find_dyld_info(data)?.context("dyld-info command vanished mid-rewrite")?;
    data.pwrite_with(new_len, cmd_offset + size_field_offset, ctx.le)?;

    shift_linkedit_offsets(data, ctx, off, delta)?;
    Ok(())
}

/// Result of rewriting one slice: its architecture and which symbols this
/// slice orphaned (for the stub builder).
pub struct SliceResult {
    pub arch: Arch,
    pub orphaned: BTreeSet<String>,
}

fn collect_symbol_libraries(
    data: &[u8],
    ctx: container::Ctx,
    symoff: u32,
    nsyms: u32,
    stroff: u32,
    orig_libs: &[SnapshotLib],
) -> Result<Vec<(String, String)>> {
    const N_STAB: u8 = 0xe0;
    const N_TYPE: u8 = 0x0e;
    const N_UNDF: u8 = 0x00;
    const N_EXT: u8 = 0x01;

    let is_64 = ctx.container.is_big();
    let entry_size = if is_64 { 16usize } else { 12 };
    let mut out = Vec::new();

    for i in 0..nsyms as usize {
        let base = symoff as usize + i * entry_size;
        let n_strx: u32 = data.pread_with(base, ctx.le)?;
        let n_type: u8 = data.pread_with(base + 4, ctx.le)?;
        let is_undef_external = (n_type & N_STAB) == 0 && (n_type & N_TYPE) == N_UNDF && (n_type & N_EXT) != 0;
        if !is_undef_external {
            continue;
        }
        let desc: u16 = data.pread_with(base + 6, ctx.le)?;
        let ord = ordinal::get(desc);
        if ordinal::is_sentinel(ord) || ord == 0 {
            continue;
        }
        let Some(lib) = orig_libs.get(ord as usize - 1) else {
            continue;
        };
        let name_start = stroff as usize + n_strx as usize;
        let name_end = data[name_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
            .unwrap_or(data.len());
        let sym_name = String::from_utf8_lossy(&data[name_start..name_end]).into_owned();
        out.push((sym_name, lib.name.clone()));
    }
    Ok(out)
}

fn apply_ordinal_remap(data: &mut Vec<u8>, ctx: container::Ctx, remap: &HashMap<u8, u8>) -> Result<()> {
    let (symoff, nsyms, _stroff, _strsize) = find_symtab(data)?;
    let is_64 = ctx.container.is_big();
    symtab::remap_ordinals(data, symoff as usize, nsyms as usize, is_64, ctx.le, remap)?;

    if let Some((_, bind_off, bind_size, lazy_bind_off, lazy_bind_size)) = find_dyld_info(data)? {
        remap_bind_stream(data, ctx, bind_off, bind_size, remap, 20)?;
        // Re-fetch: the bind stream's own splice may have shifted where the
        // lazy-bind stream now starts.
        if let Some((_, _, _, lazy_off, lazy_size)) = find_dyld_info(data)? {
            remap_bind_stream(data, ctx, lazy_off, lazy_size, remap, 36)?;
        }
        let _ = (lazy_bind_off, lazy_bind_size);
    }
    Ok(())
}

/// Runs the full rewrite phase sequence over one slice's bytes in place.
pub fn rewrite_slice(
    data: &mut Vec<u8>,
    opts: &RewriteOptions,
    new_id_path: &str,
    stub_install_path: &str,
) -> Result<SliceResult> {
    let macho = MachO::parse(data, 0).context("failed to parse Mach-O slice")?;
    let (_, maybe_ctx) = parse_magic_and_ctx(data, 0)?;
    let ctx = maybe_ctx.context("could not determine slice endianness/width")?;

    if macho.header.filetype == MH_DYLIB {
        bail!("input is already a dylib; dylibify only converts executables into dylibs");
    }
    if macho.header.filetype != MH_EXECUTE {
        bail!(
            "unsupported Mach-O filetype {:#x}: expected an executable",
            macho.header.filetype
        );
    }
    let arch = Arch::from_cpu(macho.header.cputype, macho.header.cpusubtype)?;
    narrate(opts, format!("rewriting {} slice", arch.clang_flag()));

    // ---- Snapshot phase ----
    let mut orig_libs = Vec::new();
    for lc in &macho.load_commands {
        if let Some(dylib_cmd) = dylib_command(&lc.command) {
            let name = read_dylib_name(data, lc.offset, dylib_cmd);
            orig_libs.push(SnapshotLib { name });
        }
    }
    let orig_ord: HashMap<String, u8> = orig_libs
        .iter()
        .enumerate()
        .map(|(i, lib)| (lib.name.clone(), (i + 1) as u8))
        .collect();

    let (symoff, nsyms, stroff, _strsize) = find_symtab(data)?;
    let orig_sym_lib = collect_symbol_libraries(data, ctx, symoff, nsyms, stroff, &orig_libs)?;
    drop(macho);

    // ---- Header/identity phase ----
    {
        let macho = MachO::parse(data, 0)?;
        let mut header = macho.header;
        header.filetype = MH_DYLIB;
        header.flags |= MH_NO_REEXPORTED_DYLIBS;
        data.pwrite_with(header, 0, ctx)?;
    }

    remove_all_commands_by_id(data, &[LC_CODE_SIGNATURE])?;
    remove_all_segments_by_name(data, SEG_PAGEZERO)?;

    if opts.remove_info_plist {
        remove_info_plist_section(data, ctx)?;
    }

    remove_all_commands_by_id(data, &[LC_LOAD_DYLINKER, LC_MAIN, LC_SOURCE_VERSION])?;

    {
        let macho = MachO::parse(data, 0)?;
        let mut header = macho.header;
        let insert_offset = header_size(ctx) + header.sizeofcmds as usize;
        let id_cmd = surgery::build_dylib_command(
            LC_ID_DYLIB,
            new_id_path,
            ID_DYLIB_TIMESTAMP,
            DYLIB_VERSION,
            DYLIB_VERSION,
            ctx,
        )?;
        surgery::insert_load_command(data, &mut header, ctx, insert_offset, &id_cmd)?;
    }

    // ---- Platform phase ----
    if let Some(platform) = opts.platform {
        remove_all_commands_by_id(
            data,
            &[LC_VERSION_MIN_MACOSX, LC_VERSION_MIN_IPHONEOS, LC_BUILD_VERSION],
        )?;

        let macho = MachO::parse(data, 0)?;
        let mut header = macho.header;
        let insert_offset = header_size(ctx) + header.sizeofcmds as usize;
        let platform_id = match platform {
            Platform::MacOs => PLATFORM_MACOS,
            Platform::Ios => PLATFORM_IOS,
        };
        let cmd = surgery::build_version_command(platform_id, ctx)?;
        surgery::insert_load_command(data, &mut header, ctx, insert_offset, &cmd)?;
    }

    // ---- Removal set computation ----
    // Existence of each `-r` target is checked once, across every slice of a
    // possibly-fat input, by `process` before any slice is rewritten. Here a
    // target absent from *this* slice's dependency list is simply a no-op,
    // per the resolved removal-list-scope decision: a name may be a
    // dependency of one slice of a universal binary and not another.
    let mut removal_set: BTreeSet<String> = BTreeSet::new();
    for name in &opts.remove_dylibs {
        if orig_ord.contains_key(name) {
            removal_set.insert(name.clone());
        }
    }
    if opts.auto_remove {
        for lib in &orig_libs {
            if !host_probe::exists(&lib.name) {
                removal_set.insert(lib.name.clone());
            }
        }
    }

    let orphaned: BTreeSet<String> = orig_sym_lib
        .iter()
        .filter(|(_, lib)| removal_set.contains(lib))
        .map(|(sym, _)| sym.clone())
        .collect();

    // ---- Mutation phase ----
    for name in &removal_set {
        remove_one_dylib_by_name(data, name)?;
    }

    let stub_triggered = !orphaned.is_empty();
    if stub_triggered {
        narrate(
            opts,
            format!("{} symbol(s) orphaned, inserting stub dependency", orphaned.len()),
        );
        let macho = MachO::parse(data, 0)?;
        let mut header = macho.header;
        let insert_offset = header_size(ctx) + header.sizeofcmds as usize;
        let stub_cmd = surgery::build_dylib_command(
            LC_LOAD_DYLIB,
            stub_install_path,
            ID_DYLIB_TIMESTAMP,
            DYLIB_VERSION,
            DYLIB_VERSION,
            ctx,
        )?;
        surgery::insert_load_command(data, &mut header, ctx, insert_offset, &stub_cmd)?;
    }

    // ---- Ordinal remap phase ----
    let mut new_ord: HashMap<String, u8> = HashMap::new();
    {
        let macho = MachO::parse(data, 0)?;
        let mut idx = 1u8;
        for lc in &macho.load_commands {
            if let Some(cmd) = dylib_command(&lc.command) {
                let name = read_dylib_name(data, lc.offset, cmd);
                new_ord.insert(name, idx);
                idx += 1;
            }
        }
    }

    let mut remap: HashMap<u8, u8> = HashMap::new();
    for (name, &old) in &orig_ord {
        if let Some(&new) = new_ord.get(name) {
            remap.insert(old, new);
        } else if let Some(&stub_new) = new_ord.get(stub_install_path) {
            remap.insert(old, stub_new);
        } else {
            // Removed with no stub: every symbol naming it must also have
            // been absent from `orig_sym_lib`, so no decoded ordinal should
            // reference `old` again; map it to itself so a stray reference
            // fails loudly instead of silently aliasing another library.
            remap.insert(old, old);
        }
    }

    apply_ordinal_remap(data, ctx, &remap)?;

    Ok(SliceResult { arch, orphaned })
}

/// Big-endian `fat_header` + `fat_arch` layout, per `<mach-o/fat.h>`: an
/// 8-byte header (`magic`, `nfat_arch`) followed by one 20-byte entry per
/// slice (`cputype`, `cpusubtype`, `offset`, `size`, `align`).
const SIZEOF_FAT_HEADER: usize = 8;
const SIZEOF_FAT_ARCH: usize = 20;

/// One slice's placement metadata, carried from the input fat container
/// through to the rebuilt output.
struct FatSlot {
    cputype: u32,
    cpusubtype: u32,
    align: u32,
    data: Vec<u8>,
}

/// Rebuilds a fat container from rewritten slices, recomputing each slice's
/// offset from its (possibly changed) length.
///
/// The per-slice mutations this crate performs are not guaranteed to
/// preserve a slice's byte length — re-encoding a bind-opcode stream
/// canonically rarely reproduces the original encoding's length exactly —
/// so unlike a tool that only ever inserts/removes fixed-size load
/// commands, this crate cannot assume the original `fat_arch` offsets
/// still describe the rewritten slices and must lay the file out fresh.
fn assemble_fat(slots: &[FatSlot]) -> Result<Vec<u8>> {
    let table_end = SIZEOF_FAT_HEADER + slots.len() * SIZEOF_FAT_ARCH;
    let mut out = vec![0u8; table_end];
    out.pwrite_with::<u32>(fat::FAT_MAGIC, 0, scroll::BE)?;
    out.pwrite_with::<u32>(slots.len() as u32, 4, scroll::BE)?;

    for (i, slot) in slots.iter().enumerate() {
        let align_bytes = 1usize << slot.align;
        let offset = out.len().next_multiple_of(align_bytes);
        out.resize(offset, 0);
        out.extend_from_slice(&slot.data);

        let entry_off = SIZEOF_FAT_HEADER + i * SIZEOF_FAT_ARCH;
        out.pwrite_with::<u32>(slot.cputype, entry_off, scroll::BE)?;
        out.pwrite_with::<u32>(slot.cpusubtype, entry_off + 4, scroll::BE)?;
        out.pwrite_with::<u32>(offset as u32, entry_off + 8, scroll::BE)?;
        out.pwrite_with::<u32>(slot.data.len() as u32, entry_off + 12, scroll::BE)?;
        out.pwrite_with::<u32>(slot.align, entry_off + 16, scroll::BE)?;
    }
    Ok(out)
}

/// Fails if any explicit `-r` target is absent from every slice's
/// dependency list. A target present in only *some* slices of a fat input
/// is not an error here; it becomes a no-op in the slices that lack it.
fn check_removal_targets_exist(opts: &RewriteOptions, deps: &BTreeSet<String>) -> Result<()> {
    for name in &opts.remove_dylibs {
        if !deps.contains(name) {
            bail!("requested removal of '{name}', which is not a dependency of any slice of this image");
        }
    }
    Ok(())
}

/// Dispatches a whole file (fat or thin) through [`rewrite_slice`].
pub fn process(input: &[u8], opts: &RewriteOptions) -> Result<RewriteOutcome> {
    let new_id_path = opts
        .dylib_path
        .clone()
        .unwrap_or_else(|| format!("@executable_path/{}", opts.out_basename));
    let stub_install_path = format!("{}/{}", dirname(&new_id_path), STUB_FILE_NAME);

    let magic = peek(input, 0).context("failed to read Mach-O magic")?;
    let mut outcome = RewriteOutcome {
        stub_install_path: Some(stub_install_path.clone()),
        ..Default::default()
    };

    if magic == fat::FAT_MAGIC {
        let multi = MultiArch::new(input)?;
        let arches: Vec<_> = multi.iter_arches().collect::<std::result::Result<_, _>>()?;

        let mut seen_deps: BTreeSet<String> = BTreeSet::new();
        for arch_hdr in &arches {
            let offset = arch_hdr.offset as usize;
            let size = arch_hdr.size as usize;
            seen_deps.extend(slice_dep_names(&input[offset..offset + size])?);
        }
        check_removal_targets_exist(opts, &seen_deps)?;

        let mut slots = Vec::with_capacity(arches.len());
        for arch_hdr in &arches {
            let offset = arch_hdr.offset as usize;
            let size = arch_hdr.size as usize;
            let mut slice = input[offset..offset + size].to_vec();
            let result = rewrite_slice(&mut slice, opts, &new_id_path, &stub_install_path)?;
            if !result.orphaned.is_empty() {
                outcome.stub_archs.insert(result.arch);
                outcome.stub_symbols.extend(result.orphaned);
            }
            slots.push(FatSlot {
                cputype: arch_hdr.cputype,
                cpusubtype: arch_hdr.cpusubtype,
                align: arch_hdr.align,
                data: slice,
            });
        }
        outcome.data = assemble_fat(&slots)?;
    } else {
        check_removal_targets_exist(opts, &slice_dep_names(input)?)?;
        let mut data = input.to_vec();
        let result = rewrite_slice(&mut data, opts, &new_id_path, &stub_install_path)?;
        if !result.orphaned.is_empty() {
            outcome.stub_archs.insert(result.arch);
            outcome.stub_symbols.extend(result.orphaned);
        }
        outcome.data = data;
    }

    if outcome.stub_symbols.is_empty() {
        outcome.stub_install_path = None;
    }
    for sym in &outcome.stub_symbols {
        StubSymbol::classify(sym).with_context(|| format!("orphaned symbol '{sym}'"))?;
    }

    Ok(outcome)
}
