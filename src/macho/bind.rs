//! Decoder/encoder for the dyld bind and lazy-bind opcode streams.
//!
//! Opcode shapes are grounded on the standard dyld bind-opcode encoding (see
//! e.g. `vivisect-rs`'s `mach::imports::BindInterpreter` for a reference
//! decode loop over the same opcode set). This module only concerns itself
//! with decoding a stream into operations, remapping the dylib-ordinal
//! operations, and re-encoding — LINKEDIT offset bookkeeping when the
//! re-encoded length differs from the original lives in
//! [`super::rewriter`], since it needs the whole slice's layout, not just
//! one stream.

use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::ordinal;

const BIND_OPCODE_MASK: u8 = 0xF0;
const BIND_IMMEDIATE_MASK: u8 = 0x0F;

const BIND_OPCODE_DONE: u8 = 0x00;
const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
const BIND_OPCODE_DO_BIND: u8 = 0x90;
const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xA0;
const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xB0;
const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xC0;

/// One decoded bind-stream instruction. Each variant carries exactly the
/// operand the real opcode carries; `SetDylibOrdinalImm`/`SetDylibOrdinalUleb`
/// collapse into a single `SetDylibOrdinal` since this codec re-chooses the
/// encoding at serialize time regardless of which one the input used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOp {
    Done,
    /// A regular (non-sentinel-path) library ordinal. May be 0 (self).
    SetDylibOrdinal(u8),
    /// One of the three sentinel ordinals, carried pre-sign-extended so it
    /// matches [`crate::ordinal`]'s sentinel bytes directly.
    SetDylibSpecialImm(u8),
    SetSymbolTrailingFlagsImm { flags: u8, name: String },
    SetTypeImm(u8),
    SetAddendSleb(i64),
    SetSegmentAndOffsetUleb { seg_index: u8, seg_offset: u64 },
    AddAddrUleb(u64),
    DoBind,
    DoBindAddAddrUleb(u64),
    DoBindAddAddrImmScaled(u8),
    DoBindUlebTimesSkippingUleb { count: u64, skip: u64 },
}

fn read_uleb128(data: &[u8], offset: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*offset)
            .ok_or_else(|| anyhow::anyhow!("truncated ULEB128 at offset {offset}"))?;
        *offset += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            bail!("ULEB128 overflow");
        }
    }
    Ok(result)
}

fn read_sleb128(data: &[u8], offset: &mut usize) -> Result<i64> {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    let mut byte;
    loop {
        byte = *data
            .get(*offset)
            .ok_or_else(|| anyhow::anyhow!("truncated SLEB128 at offset {offset}"))?;
        *offset += 1;
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
        if shift >= 64 {
            bail!("SLEB128 overflow");
        }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= -1i64 << shift;
    }
    Ok(result)
}

fn write_uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_sleb128(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign_bit = byte & 0x40 != 0;
        if (value == 0 && !sign_bit) || (value == -1 && sign_bit) {
            out.push(byte);
            break;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn read_cstr(data: &[u8], offset: &mut usize) -> Result<String> {
    let start = *offset;
    let end = data[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .ok_or_else(|| anyhow::anyhow!("unterminated string in bind stream at offset {start}"))?;
    let s = std::str::from_utf8(&data[start..end])?.to_string();
    *offset = end + 1;
    Ok(s)
}

/// Sign-extends a 4-bit special-dylib immediate into one of the three
/// sentinel bytes `ordinal` recognizes.
fn sign_extend_nibble(nibble: u8) -> u8 {
    if nibble & 0x08 != 0 {
        nibble | 0xF0
    } else {
        nibble
    }
}

/// Decodes the full opcode stream in `data[range]` into an ordered list of
/// operations, walking end to end so nothing is silently skipped.
pub fn decode(data: &[u8], range: std::ops::Range<usize>) -> Result<Vec<BindOp>> {
    let mut ops = Vec::new();
    let mut offset = range.start;
    while offset < range.end {
        let byte = data[offset];
        offset += 1;
        let opcode = byte & BIND_OPCODE_MASK;
        let imm = byte & BIND_IMMEDIATE_MASK;
        let op = match opcode {
            BIND_OPCODE_DONE => BindOp::Done,
            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => BindOp::SetDylibOrdinal(imm),
            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => {
                let ord = read_uleb128(data, &mut offset)?;
                BindOp::SetDylibOrdinal(ord as u8)
            }
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                BindOp::SetDylibSpecialImm(sign_extend_nibble(imm))
            }
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => {
                let name = read_cstr(data, &mut offset)?;
                BindOp::SetSymbolTrailingFlagsImm { flags: imm, name }
            }
            BIND_OPCODE_SET_TYPE_IMM => BindOp::SetTypeImm(imm),
            BIND_OPCODE_SET_ADDEND_SLEB => {
                let addend = read_sleb128(data, &mut offset)?;
                BindOp::SetAddendSleb(addend)
            }
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => {
                let seg_offset = read_uleb128(data, &mut offset)?;
                BindOp::SetSegmentAndOffsetUleb {
                    seg_index: imm,
                    seg_offset,
                }
            }
            BIND_OPCODE_ADD_ADDR_ULEB => {
                let addr = read_uleb128(data, &mut offset)?;
                BindOp::AddAddrUleb(addr)
            }
            BIND_OPCODE_DO_BIND => BindOp::DoBind,
            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => {
                let addr = read_uleb128(data, &mut offset)?;
                BindOp::DoBindAddAddrUleb(addr)
            }
            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => BindOp::DoBindAddAddrImmScaled(imm),
            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => {
                let count = read_uleb128(data, &mut offset)?;
                let skip = read_uleb128(data, &mut offset)?;
                BindOp::DoBindUlebTimesSkippingUleb { count, skip }
            }
            other => bail!("unknown bind opcode {other:#x} at offset {offset}"),
        };
        ops.push(op);
    }
    Ok(ops)
}

/// Applies `remap` to every non-sentinel `SetDylibOrdinal` operation in
/// place. `SetDylibSpecialImm` operations are left untouched, matching the
/// contract that sentinel ordinals are never remapped.
pub fn remap_ordinals(ops: &mut [BindOp], remap: &HashMap<u8, u8>) -> Result<()> {
    for op in ops {
        if let BindOp::SetDylibOrdinal(ord) = op {
            if !ordinal::is_sentinel(*ord) {
                let new_ord = *remap
                    .get(ord)
                    .ok_or_else(|| anyhow::anyhow!("no remap entry for library ordinal {ord}"))?;
                *ord = new_ord;
            }
        }
    }
    Ok(())
}

/// Re-serializes `ops` into a fresh, canonical byte stream: ordinals that
/// fit in 4 bits use the immediate encoding, larger ones use ULEB128. This
/// does not attempt to reproduce the original stream's encoding choices,
/// only its decoded meaning.
pub fn encode(ops: &[BindOp]) -> Vec<u8> {
    let mut out = Vec::new();
    for op in ops {
        match op {
            BindOp::Done => out.push(BIND_OPCODE_DONE),
            BindOp::SetDylibOrdinal(ord) => {
                if *ord <= 0x0F {
                    out.push(BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | ord);
                } else {
                    out.push(BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB);
                    write_uleb128(*ord as u64, &mut out);
                }
            }
            BindOp::SetDylibSpecialImm(sentinel) => {
                out.push(BIND_OPCODE_SET_DYLIB_SPECIAL_IMM | (sentinel & BIND_IMMEDIATE_MASK));
            }
            BindOp::SetSymbolTrailingFlagsImm { flags, name } => {
                out.push(BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM | (flags & BIND_IMMEDIATE_MASK));
                out.extend_from_slice(name.as_bytes());
                out.push(0);
            }
            BindOp::SetTypeImm(ty) => out.push(BIND_OPCODE_SET_TYPE_IMM | (ty & BIND_IMMEDIATE_MASK)),
            BindOp::SetAddendSleb(addend) => {
                out.push(BIND_OPCODE_SET_ADDEND_SLEB);
                write_sleb128(*addend, &mut out);
            }
            BindOp::SetSegmentAndOffsetUleb {
                seg_index,
                seg_offset,
            } => {
                out.push(BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | (seg_index & BIND_IMMEDIATE_MASK));
                write_uleb128(*seg_offset, &mut out);
            }
            BindOp::AddAddrUleb(addr) => {
                out.push(BIND_OPCODE_ADD_ADDR_ULEB);
                write_uleb128(*addr, &mut out);
            }
            BindOp::DoBind => out.push(BIND_OPCODE_DO_BIND),
            BindOp::DoBindAddAddrUleb(addr) => {
                out.push(BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB);
                write_uleb128(*addr, &mut out);
            }
            BindOp::DoBindAddAddrImmScaled(scale) => {
                out.push(BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED | (scale & BIND_IMMEDIATE_MASK));
            }
            BindOp::DoBindUlebTimesSkippingUleb { count, skip } => {
                out.push(BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB);
                write_uleb128(*count, &mut out);
                write_uleb128(*skip, &mut out);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(bytes: &[u8]) -> Vec<u8> {
        let mut v = vec![0u8; 4];
        v.extend_from_slice(bytes);
        v
    }

    #[test]
    fn decodes_ordinal_imm_and_done() {
        let data = build(&[BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | 3, BIND_OPCODE_DONE]);
        let ops = decode(&data, 4..data.len()).unwrap();
        assert_eq!(ops, vec![BindOp::SetDylibOrdinal(3), BindOp::Done]);
    }

    #[test]
    fn decodes_ordinal_uleb_above_15() {
        let mut bytes = vec![BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB];
        write_uleb128(42, &mut bytes);
        let data = build(&bytes);
        let ops = decode(&data, 4..data.len()).unwrap();
        assert_eq!(ops, vec![BindOp::SetDylibOrdinal(42)]);
    }

    #[test]
    fn decodes_special_imm_sentinels() {
        let data = build(&[
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM | 0x0,
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM | 0xF,
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM | 0xE,
        ]);
        let ops = decode(&data, 4..data.len()).unwrap();
        assert_eq!(
            ops,
            vec![
                BindOp::SetDylibSpecialImm(0x00),
                BindOp::SetDylibSpecialImm(0xFF),
                BindOp::SetDylibSpecialImm(0xFE),
            ]
        );
    }

    #[test]
    fn decodes_trailing_flags_symbol_name() {
        let mut bytes = vec![BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM | 1];
        bytes.extend_from_slice(b"_foo\0");
        bytes.push(BIND_OPCODE_DONE);
        let data = build(&bytes);
        let ops = decode(&data, 4..data.len()).unwrap();
        assert_eq!(
            ops[0],
            BindOp::SetSymbolTrailingFlagsImm {
                flags: 1,
                name: "_foo".to_string()
            }
        );
    }

    #[test]
    fn remap_rewrites_non_sentinel_ordinals_only() {
        let mut ops = vec![
            BindOp::SetDylibOrdinal(1),
            BindOp::SetDylibSpecialImm(0x00),
            BindOp::SetDylibOrdinal(2),
        ];
        let mut table = HashMap::new();
        table.insert(1, 5);
        table.insert(2, 6);
        remap_ordinals(&mut ops, &table).unwrap();
        assert_eq!(
            ops,
            vec![
                BindOp::SetDylibOrdinal(5),
                BindOp::SetDylibSpecialImm(0x00),
                BindOp::SetDylibOrdinal(6),
            ]
        );
    }

    #[test]
    fn remap_fails_for_unmapped_ordinal() {
        let mut ops = vec![BindOp::SetDylibOrdinal(9)];
        assert!(remap_ordinals(&mut ops, &HashMap::new()).is_err());
    }

    #[test]
    fn encode_chooses_imm_for_small_ordinal_and_uleb_for_large() {
        let small = encode(&[BindOp::SetDylibOrdinal(3)]);
        assert_eq!(small, vec![BIND_OPCODE_SET_DYLIB_ORDINAL_IMM | 3]);

        let large = encode(&[BindOp::SetDylibOrdinal(200)]);
        assert_eq!(large[0], BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB);
        assert!(large.len() > 1);
    }

    #[test]
    fn decode_then_encode_then_decode_round_trips() {
        let mut bytes = vec![BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB | 1];
        write_uleb128(0x1000, &mut bytes);
        bytes.push(BIND_OPCODE_SET_ADDEND_SLEB);
        write_sleb128(-5, &mut bytes);
        bytes.push(BIND_OPCODE_DO_BIND);
        bytes.push(BIND_OPCODE_DONE);
        let data = build(&bytes);

        let ops = decode(&data, 4..data.len()).unwrap();
        let re_encoded = encode(&ops);
        let re_decoded = decode(&re_encoded, 0..re_encoded.len()).unwrap();
        assert_eq!(ops, re_decoded);
    }

    #[test]
    fn sleb128_round_trips_negative_and_positive() {
        for value in [-128i64, -1, 0, 1, 127, 300, -300, i64::MIN / 2] {
            let mut buf = Vec::new();
            write_sleb128(value, &mut buf);
            let mut offset = 0;
            assert_eq!(read_sleb128(&buf, &mut offset).unwrap(), value);
            assert_eq!(offset, buf.len());
        }
    }

    #[test]
    fn uleb128_round_trips() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX / 2] {
            let mut buf = Vec::new();
            write_uleb128(value, &mut buf);
            let mut offset = 0;
            assert_eq!(read_uleb128(&buf, &mut offset).unwrap(), value);
            assert_eq!(offset, buf.len());
        }
    }
}
