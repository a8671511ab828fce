//! Generic load-command insertion/removal and the specific command
//! constructors this crate emits.
//!
//! Same drain-and-pad / splice-and-drain primitives throughout: a removed
//! command's bytes are drained and the slice re-padded so total length is
//! unchanged, and an inserted command's bytes are spliced in and an equal
//! amount of trailing padding drained back out. Built with raw-offset
//! construction so callers that only know a numeric `cmd` id (not a
//! `goblin` struct to copy fields from) can still build one.

use std::ffi::CStr;

use anyhow::Result;
use goblin::container;
use goblin::mach::header::{Header, SIZEOF_HEADER_32, SIZEOF_HEADER_64};
use goblin::mach::load_command::{Dylib, DylibCommand};
use scroll::Pwrite;

use super::constants::{LC_BUILD_VERSION, RETARGET_OS_VERSION};

/// Size in bytes of a Mach-O header for this slice's container width.
pub fn header_size(ctx: container::Ctx) -> usize {
    if ctx.container.is_big() {
        SIZEOF_HEADER_64
    } else {
        SIZEOF_HEADER_32
    }
}

/// Rounds `size` up to the slice's pointer width (4 bytes for 32-bit
/// containers, 8 for 64-bit).
pub fn align_to_ctx(size: usize, ctx: container::Ctx) -> usize {
    if ctx.container.is_big() {
        size.next_multiple_of(8)
    } else {
        size.next_multiple_of(4)
    }
}

/// Drains `len` bytes at `offset` out of the load-command region and re-pads
/// the file so its total size is unchanged, then writes `header` back to
/// `buffer[0]`. Does not touch `header.ncmds`/`sizeofcmds` itself — callers
/// decide what those should become before calling this.
fn shrink_commands_area(
    buffer: &mut Vec<u8>,
    header: &mut Header,
    ctx: container::Ctx,
    offset: usize,
    len: usize,
) -> Result<()> {
    buffer.drain(offset..offset + len);

    let padding_offset = header_size(ctx) + header.sizeofcmds as usize;
    let zeroes = vec![0u8; len];
    let tail = buffer.split_off(padding_offset);
    buffer.extend(&zeroes);
    buffer.extend(tail);

    buffer.pwrite_with(*header, 0, ctx)?;
    Ok(())
}

/// Drains a load command's bytes out of the load-command region and re-pads
/// the file so its total size is unchanged. Updates `header.ncmds` and
/// `header.sizeofcmds` and writes the header back to `buffer[0]`.
pub fn remove_load_command(
    buffer: &mut Vec<u8>,
    header: &mut Header,
    ctx: container::Ctx,
    cmd_offset: usize,
    cmdsize: usize,
) -> Result<()> {
    header.ncmds -= 1;
    header.sizeofcmds -= cmdsize as u32;
    shrink_commands_area(buffer, header, ctx, cmd_offset, cmdsize)
}

/// Drains `len` bytes at `offset` (e.g. one section-table entry inside a
/// segment command) without changing `header.ncmds`. Callers are
/// responsible for shrinking the owning command's own `cmdsize` field
/// before or after calling this, since that field lives inside the drained
/// region's neighborhood, not inside `header` itself.
pub fn shrink_command_bytes(
    buffer: &mut Vec<u8>,
    header: &mut Header,
    ctx: container::Ctx,
    offset: usize,
    len: usize,
) -> Result<()> {
    header.sizeofcmds -= len as u32;
    shrink_commands_area(buffer, header, ctx, offset, len)
}

/// Splices `cmd_data` into the load-command region at `offset` and drains
/// an equal amount of trailing padding so the file size is unchanged.
/// Updates `header.ncmds`/`header.sizeofcmds` and writes the header back.
pub fn insert_load_command(
    buffer: &mut Vec<u8>,
    header: &mut Header,
    ctx: container::Ctx,
    offset: usize,
    cmd_data: &[u8],
) -> Result<()> {
    let new_cmd_size = cmd_data.len() as u32;

    header.ncmds += 1;
    header.sizeofcmds += new_cmd_size;

    let tail = buffer.split_off(offset);
    buffer.extend_from_slice(cmd_data);
    buffer.extend(tail);

    let drain_start = header_size(ctx) + header.sizeofcmds as usize;
    let drain_end = drain_start + new_cmd_size as usize;
    if drain_end <= buffer.len() {
        buffer.drain(drain_start..drain_end);
    }

    buffer.pwrite_with(*header, 0, ctx)?;
    Ok(())
}

/// Builds a serialized dylib-family command (`LC_ID_DYLIB` or
/// `LC_LOAD_DYLIB`) naming `name`, with the given `cmd` id and version
/// fields.
pub fn build_dylib_command(
    cmd: u32,
    name: &str,
    timestamp: u32,
    current_version: u32,
    compat_version: u32,
    ctx: container::Ctx,
) -> Result<Vec<u8>> {
    let c_str = format!("{name}\0");
    let c_str = CStr::from_bytes_with_nul(c_str.as_bytes())?;
    let str_size = (c_str.count_bytes() + 1).next_multiple_of(4);
    // cmd(4) + cmdsize(4) + name_offset(4) + timestamp(4) + current_version(4) + compat_version(4)
    const DYLIB_HEADER_SIZE: usize = 24;
    let cmdsize = align_to_ctx(DYLIB_HEADER_SIZE + str_size, ctx);

    let new_cmd = DylibCommand {
        cmd,
        cmdsize: cmdsize as u32,
        dylib: Dylib {
            name: DYLIB_HEADER_SIZE as u32,
            timestamp,
            current_version,
            compatibility_version: compat_version,
        },
    };

    let mut buf = vec![0u8; cmdsize];
    buf.pwrite_with(new_cmd, 0, ctx)?;
    buf.pwrite(c_str, DYLIB_HEADER_SIZE)?;
    Ok(buf)
}

/// Builds a serialized `LC_BUILD_VERSION` command for `platform`, with no
/// tool-version entries (`ntools = 0`). Fixed 24-byte layout:
/// `cmd, cmdsize, platform, minos, sdk, ntools`.
pub fn build_version_command(platform: u32, ctx: container::Ctx) -> Result<Vec<u8>> {
    const CMDSIZE: u32 = 24;
    let mut buf = vec![0u8; CMDSIZE as usize];
    buf.pwrite_with::<u32>(LC_BUILD_VERSION, 0, ctx.le)?;
    buf.pwrite_with::<u32>(CMDSIZE, 4, ctx.le)?;
    buf.pwrite_with::<u32>(platform, 8, ctx.le)?;
    buf.pwrite_with::<u32>(RETARGET_OS_VERSION, 12, ctx.le)?;
    buf.pwrite_with::<u32>(RETARGET_OS_VERSION, 16, ctx.le)?;
    buf.pwrite_with::<u32>(0u32, 20, ctx.le)?;
    Ok(buf)
}
