//! Remaps the library ordinal packed into `n_desc` for every undefined
//! external symbol in the classic symbol table (`LC_SYMTAB`).
//!
//! Only undefined, external symbols carry a meaningful library ordinal in
//! their `n_desc` upper byte; other symbol kinds use that byte for unrelated
//! flag bits (`N_WEAK_REF`, `N_ARM_THUMB_DEF`, ...) that happen to collide
//! with the same bit positions, so this module restricts itself to that one
//! symbol kind rather than blindly patching every entry's upper byte.

use std::collections::HashMap;

use anyhow::Result;
use scroll::{Pread, Pwrite};

use crate::ordinal;

const N_STAB: u8 = 0xe0;
const N_TYPE: u8 = 0x0e;
const N_UNDF: u8 = 0x00;
const N_EXT: u8 = 0x01;

/// Size in bytes of one `nlist`/`nlist_64` entry.
fn entry_size(is_64: bool) -> usize {
    if is_64 { 16 } else { 12 }
}

/// Byte offset of `n_type` within one entry (after `n_strx: u32`).
const N_TYPE_OFFSET: usize = 4;
/// Byte offset of `n_desc` within one entry (after `n_strx`, `n_type`, `n_sect`).
const N_DESC_OFFSET: usize = 6;

/// Rewrites every undefined-external symbol's packed library ordinal in
/// `buffer[symoff..][..nsyms * entry_size]` according to `remap`. Sentinel
/// ordinals are left untouched.
pub fn remap_ordinals(
    buffer: &mut [u8],
    symoff: usize,
    nsyms: usize,
    is_64: bool,
    le: scroll::Endian,
    remap: &HashMap<u8, u8>,
) -> Result<()> {
    let size = entry_size(is_64);
    for i in 0..nsyms {
        let base = symoff + i * size;
        let n_type: u8 = buffer.pread_with(base + N_TYPE_OFFSET, le)?;
        let is_undef_external = (n_type & N_STAB) == 0 && (n_type & N_TYPE) == N_UNDF && (n_type & N_EXT) != 0;
        if !is_undef_external {
            continue;
        }

        let desc: u16 = buffer.pread_with(base + N_DESC_OFFSET, le)?;
        let old_ord = ordinal::get(desc);
        if ordinal::is_sentinel(old_ord) {
            continue;
        }
        let new_ord = *remap
            .get(&old_ord)
            .ok_or_else(|| anyhow::anyhow!("no remap entry for symtab library ordinal {old_ord}"))?;
        let new_desc = ordinal::set(desc, new_ord);
        buffer.pwrite_with(new_desc, base + N_DESC_OFFSET, le)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entry(buf: &mut [u8], offset: usize, n_type: u8, desc: u16, le: scroll::Endian) {
        buf.pwrite_with::<u32>(0, offset, le).unwrap();
        buf.pwrite_with::<u8>(n_type, offset + 4, le).unwrap();
        buf.pwrite_with::<u8>(0, offset + 5, le).unwrap();
        buf.pwrite_with::<u16>(desc, offset + 6, le).unwrap();
        buf.pwrite_with::<u64>(0, offset + 8, le).unwrap();
    }

    #[test]
    fn remaps_undefined_external_only() {
        let le = scroll::Endian::Little;
        let mut buf = vec![0u8; 16 * 2];
        // entry 0: undefined external, ordinal 1 -> should remap to 5
        write_entry(&mut buf, 0, N_EXT, ordinal::set(0, 1), le);
        // entry 1: a defined symbol whose upper byte happens to be nonzero
        // (a flag bit), never treated as an ordinal.
        write_entry(&mut buf, 16, 0x0e | N_EXT, 0x4000, le);

        let mut table = HashMap::new();
        table.insert(1u8, 5u8);
        remap_ordinals(&mut buf, 0, 2, true, le, &table).unwrap();

        let desc0: u16 = buf.pread_with(6, le).unwrap();
        assert_eq!(ordinal::get(desc0), 5);
        let desc1: u16 = buf.pread_with(16 + 6, le).unwrap();
        assert_eq!(desc1, 0x4000);
    }

    #[test]
    fn sentinel_ordinal_is_preserved() {
        let le = scroll::Endian::Little;
        let mut buf = vec![0u8; 16];
        write_entry(&mut buf, 0, N_EXT, ordinal::set(0, ordinal::EXECUTABLE_ORDINAL), le);
        remap_ordinals(&mut buf, 0, 1, true, le, &HashMap::new()).unwrap();
        let desc: u16 = buf.pread_with(6, le).unwrap();
        assert_eq!(ordinal::get(desc), ordinal::EXECUTABLE_ORDINAL);
    }

    #[test]
    fn missing_remap_entry_is_an_error() {
        let le = scroll::Endian::Little;
        let mut buf = vec![0u8; 16];
        write_entry(&mut buf, 0, N_EXT, ordinal::set(0, 3), le);
        assert!(remap_ordinals(&mut buf, 0, 1, true, le, &HashMap::new()).is_err());
    }
}
