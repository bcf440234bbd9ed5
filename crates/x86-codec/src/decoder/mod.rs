//! Top-level decode pipeline (§4.3): legacy prefixes, then REX/VEX/EVEX,
//! then the opcode map and primary byte, then per-family dispatch.

pub mod modrm;
mod ops;
pub mod table;

use log::trace;

use crate::coding::{OpcodeMap, Rex, VexPrefix};
use crate::error::{Error, Result};
use crate::instruction::Instruction;
use crate::reader::Reader;
use crate::reg::Register;

/// Legacy (pre-REX) prefix bytes accumulated before the opcode (§4.3.2).
/// `operand_size_override`/`address_size_override` never survive onto the
/// [`Instruction`] itself; they only steer width selection during decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyPrefixes {
    pub lock: bool,
    pub rep: bool,
    pub repnz: bool,
    pub segment: Option<Register>,
    pub operand_size_override: bool,
    pub address_size_override: bool,
}

fn parse_legacy_prefixes(reader: &mut Reader) -> Result<LegacyPrefixes> {
    let mut p = LegacyPrefixes::default();
    loop {
        let b = reader.peek_u8()?;
        match b {
            0xF0 => p.lock = true,
            0xF2 => {
                p.repnz = true;
                p.rep = false;
            }
            0xF3 => {
                p.rep = true;
                p.repnz = false;
            }
            0x2E => p.segment = Some(Register::Cs),
            0x36 => p.segment = Some(Register::Ss),
            0x3E => p.segment = Some(Register::Ds),
            0x26 => p.segment = Some(Register::Es),
            0x64 => p.segment = Some(Register::Fs),
            0x65 => p.segment = Some(Register::Gs),
            0x66 => p.operand_size_override = true,
            0x67 => p.address_size_override = true,
            _ => break,
        }
        reader.read_u8()?;
    }
    trace!("legacy prefixes: {p:?}");
    Ok(p)
}

enum ExtendedPrefix {
    None,
    Rex(Rex),
    Vex(VexPrefix),
}

/// REX is just the byte `0x40..=0x4F` immediately preceding the opcode;
/// VEX/EVEX are the two-, three-, and four-byte forms introduced by
/// 0xC5/0xC4/0x62. In 64-bit mode these introducer bytes are never
/// legacy one-byte opcodes themselves, so there is no ambiguity to
/// resolve against addressing-mode context the way 32-bit mode would
/// need (§4.3.3, §4.3.4).
fn parse_extended_prefix(reader: &mut Reader) -> Result<ExtendedPrefix> {
    let b = reader.peek_u8()?;
    match b {
        0x40..=0x4F => {
            reader.read_u8()?;
            Ok(ExtendedPrefix::Rex(Rex::from_byte(b).expect("checked range")))
        }
        0xC5 => {
            reader.read_u8()?;
            let byte2 = reader.read_u8()?;
            Ok(ExtendedPrefix::Vex(VexPrefix::from_two_byte(byte2)))
        }
        0xC4 => {
            reader.read_u8()?;
            let byte2 = reader.read_u8()?;
            let byte3 = reader.read_u8()?;
            Ok(ExtendedPrefix::Vex(VexPrefix::from_three_byte(byte2, byte3)))
        }
        0x62 => {
            reader.read_u8()?;
            let p0 = reader.read_u8()?;
            let p1 = reader.read_u8()?;
            let p2 = reader.read_u8()?;
            Ok(ExtendedPrefix::Vex(VexPrefix::from_evex(p0, p1, p2)))
        }
        _ => Ok(ExtendedPrefix::None),
    }
}

fn read_opcode(reader: &mut Reader, ext: &ExtendedPrefix) -> Result<(OpcodeMap, u8)> {
    if let ExtendedPrefix::Vex(vex) = ext {
        let primary = reader.read_u8()?;
        return Ok((vex.map, primary));
    }
    let b1 = reader.read_u8()?;
    if b1 == 0x0F {
        let b2 = reader.read_u8()?;
        match b2 {
            0x38 => Ok((OpcodeMap::ThreeByte38, reader.read_u8()?)),
            0x3A => Ok((OpcodeMap::ThreeByte3A, reader.read_u8()?)),
            _ => Ok((OpcodeMap::TwoByte, b2)),
        }
    } else {
        Ok((OpcodeMap::OneByte, b1))
    }
}

/// Decode a single instruction starting at the reader's current position,
/// advancing it past the bytes consumed.
pub fn decode_one(reader: &mut Reader) -> Result<Instruction> {
    let legacy = parse_legacy_prefixes(reader)?;
    let ext = parse_extended_prefix(reader)?;
    let (map, primary) = read_opcode(reader, &ext)?;

    let (rex, vex) = match ext {
        ExtendedPrefix::Rex(r) => (Some(r), None),
        ExtendedPrefix::Vex(v) => (None, Some(v)),
        ExtendedPrefix::None => (None, None),
    };
    trace!("opcode map={map:?} primary=0x{primary:02x} rex={rex:?} vex={vex:?}");

    ops::dispatch(reader, &legacy, rex, vex, map, primary)
}

/// Decode every instruction in `bytes`, stopping at the first error and
/// reporting it alongside the byte offset it occurred at (§4.3.9:
/// partial-success semantics — a trailing truncated instruction does not
/// invalidate instructions already decoded).
pub fn decode_all(bytes: &[u8]) -> (Vec<Instruction>, Option<(usize, Error)>) {
    let mut reader = Reader::new(bytes);
    let mut out = Vec::new();
    loop {
        if reader.remaining() == 0 {
            return (out, None);
        }
        let start = reader.position();
        match decode_one(&mut reader) {
            Ok(insn) => out.push(insn),
            Err(e) => return (out, Some((start, e))),
        }
    }
}
