//! Per-mnemonic-family decode dispatch (§4.3.1, §9 coverage subset).
//!
//! One function per opcode group, kept close to how the Intel manual
//! groups them (ALU group, group1/group3/shift group `/digit` dispatch,
//! string instructions, SSE/AVX move forms). [`dispatch`] is the single
//! entry point [`super::decode_one`] calls once prefixes and the opcode
//! byte are known.

use crate::coding::{MandatoryPrefix, OpcodeMap, Rex, VectorLength, VexPrefix};
use crate::error::{Error, Result};
use crate::instruction::{Condition, Instruction, Mnemonic, Prefix};
use crate::operand::{Immediate, Operand, PointerSize};
use crate::reader::Reader;
use crate::reg::Register;

use super::modrm::{decode_modrm, EffectiveRex, RmField};
use super::table;
use super::LegacyPrefixes;

pub(super) fn dispatch(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    rex: Option<Rex>,
    vex: Option<VexPrefix>,
    map: OpcodeMap,
    primary: u8,
) -> Result<Instruction> {
    if let Some(vex) = vex {
        return dispatch_vex(reader, legacy, vex, map, primary);
    }

    let eff = EffectiveRex::from_rex(rex);
    let rex_present = rex.is_some();
    let rex_w = rex.map(|r| r.w).unwrap_or(false);

    match map {
        OpcodeMap::OneByte => dispatch_one_byte(reader, legacy, eff, rex_present, rex_w, primary),
        OpcodeMap::TwoByte => dispatch_two_byte(reader, legacy, eff, rex_present, rex_w, primary),
        OpcodeMap::ThreeByte38 | OpcodeMap::ThreeByte3A => {
            Err(Error::UnknownOpcode { primary, map })
        }
    }
}

// ---------------------------------------------------------------- helpers

fn operand_width(rex_w: bool, operand_size_override: bool) -> u16 {
    if rex_w {
        64
    } else if operand_size_override {
        16
    } else {
        32
    }
}

fn pointer_size_for_width(width: u16) -> PointerSize {
    match width {
        8 => PointerSize::Byte,
        16 => PointerSize::Word,
        32 => PointerSize::Dword,
        64 => PointerSize::Qword,
        other => unreachable!("not a general-purpose register width: {other}"),
    }
}

fn read_immediate(reader: &mut Reader, width_bits: u16) -> Result<Immediate> {
    let value = match width_bits {
        8 => reader.read_i8()? as i64,
        16 => reader.read_i16_le()? as i64,
        32 => reader.read_i32_le()? as i64,
        64 => reader.read_i64_le()?,
        other => unreachable!("not an immediate width: {other}"),
    };
    Ok(Immediate::new(value, width_bits as u8))
}

fn gp8(encoding: u8, rex_present: bool) -> Register {
    Register::gp(8, encoding, rex_present)
}

fn rm_operand(rm: RmField, width: u16, rex_present: bool) -> Operand {
    match rm {
        RmField::Reg(full) => Operand::Reg(Register::gp(width, full, rex_present)),
        RmField::Mem(ind) => Operand::Mem(ind),
    }
}

fn read_modrm(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    pointer_size: PointerSize,
) -> Result<super::modrm::DecodedModRm> {
    decode_modrm(
        reader,
        eff,
        legacy.segment,
        pointer_size,
        !legacy.address_size_override,
    )
}

fn string_prefix(legacy: &LegacyPrefixes) -> Option<Prefix> {
    if legacy.rep {
        Some(Prefix::Rep)
    } else if legacy.repnz {
        Some(Prefix::Repnz)
    } else {
        None
    }
}

/// The generic prefix-selection rule used by every non-string opcode:
/// REP/REPNZ take priority over LOCK when (illegally) combined, which
/// cannot happen for the opcodes this decoder implements but keeps the
/// rule total.
fn generic_prefix(legacy: &LegacyPrefixes) -> Option<Prefix> {
    string_prefix(legacy).or(legacy.lock.then_some(Prefix::Lock))
}

fn with_generic_prefix(mut insn: Instruction, legacy: &LegacyPrefixes) -> Instruction {
    if let Some(p) = generic_prefix(legacy) {
        insn = insn.with_prefix(p);
    }
    insn
}

fn es_rdi(pointer_size: PointerSize, address_size_64: bool) -> crate::operand::Indirect {
    let base = if address_size_64 {
        Register::Rdi
    } else {
        Register::Edi
    };
    crate::operand::Indirect::builder()
        .pointer_size(pointer_size)
        .segment(Register::Es)
        .base(base)
        .build()
        .expect("es:[rdi]/es:[edi] is always structurally valid")
}

fn seg_rsi(
    legacy: &LegacyPrefixes,
    pointer_size: PointerSize,
    address_size_64: bool,
) -> crate::operand::Indirect {
    let base = if address_size_64 {
        Register::Rsi
    } else {
        Register::Esi
    };
    let seg = legacy.segment.unwrap_or(Register::Ds);
    crate::operand::Indirect::builder()
        .pointer_size(pointer_size)
        .segment(seg)
        .base(base)
        .build()
        .expect("ds:[rsi]/ds:[esi] (or overridden) is always structurally valid")
}

// ------------------------------------------------------------- one-byte map

fn dispatch_one_byte(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    primary: u8,
) -> Result<Instruction> {
    if let Some((desc, offset)) = table::arith_by_primary(primary) {
        return arith_insn(reader, legacy, eff, rex_present, rex_w, desc, offset)
            .map(|i| with_generic_prefix(i, legacy));
    }

    let insn = match primary {
        0x50..=0x57 => push_pop_reg(primary - 0x50, eff, legacy, Mnemonic::Push),
        0x58..=0x5F => push_pop_reg(primary - 0x58, eff, legacy, Mnemonic::Pop),
        0x68 => push_imm(reader, 32)?,
        0x6A => push_imm(reader, 8)?,
        0x70..=0x7F => jcc_short(primary, reader)?,
        0x80 | 0x81 | 0x83 => group1(reader, legacy, eff, rex_present, rex_w, primary)?,
        0x84 => {
            let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
            let rm = rm_operand(dm.rm, 8, rex_present);
            let reg = Operand::Reg(gp8(dm.reg, rex_present));
            Instruction::new(Mnemonic::Test, [Some(rm), Some(reg), None, None])
        }
        0x85 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
            let rm = rm_operand(dm.rm, width, rex_present);
            let reg = Operand::Reg(Register::gp(width, dm.reg, rex_present));
            Instruction::new(Mnemonic::Test, [Some(rm), Some(reg), None, None])
        }
        0x88 => {
            let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
            let dst = rm_operand(dm.rm, 8, rex_present);
            let src = Operand::Reg(gp8(dm.reg, rex_present));
            Instruction::new(Mnemonic::Mov, [Some(dst), Some(src), None, None])
        }
        0x89 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
            let dst = rm_operand(dm.rm, width, rex_present);
            let src = Operand::Reg(Register::gp(width, dm.reg, rex_present));
            Instruction::new(Mnemonic::Mov, [Some(dst), Some(src), None, None])
        }
        0x8A => {
            let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
            let dst = Operand::Reg(gp8(dm.reg, rex_present));
            let src = rm_operand(dm.rm, 8, rex_present);
            Instruction::new(Mnemonic::Mov, [Some(dst), Some(src), None, None])
        }
        0x8B => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
            let dst = Operand::Reg(Register::gp(width, dm.reg, rex_present));
            let src = rm_operand(dm.rm, width, rex_present);
            Instruction::new(Mnemonic::Mov, [Some(dst), Some(src), None, None])
        }
        0x8D => lea(reader, legacy, eff, rex_present, rex_w)?,
        0x90 => Instruction::new(Mnemonic::Nop, [None, None, None, None]),
        0xA4 => {
            let dst = es_rdi(PointerSize::Byte, !legacy.address_size_override);
            let src = seg_rsi(legacy, PointerSize::Byte, !legacy.address_size_override);
            Instruction::new(
                Mnemonic::Movs,
                [Some(Operand::Mem(dst)), Some(Operand::Mem(src)), None, None],
            )
        }
        0xA5 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let ps = pointer_size_for_width(width);
            let dst = es_rdi(ps, !legacy.address_size_override);
            let src = seg_rsi(legacy, ps, !legacy.address_size_override);
            Instruction::new(
                Mnemonic::Movs,
                [Some(Operand::Mem(dst)), Some(Operand::Mem(src)), None, None],
            )
        }
        0xA6 => cmps(legacy, PointerSize::Byte),
        0xA7 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            cmps(legacy, pointer_size_for_width(width))
        }
        0xA8 => {
            let imm = read_immediate(reader, 8)?;
            Instruction::new(
                Mnemonic::Test,
                [Some(Operand::Reg(Register::Al)), Some(Operand::Imm(imm)), None, None],
            )
        }
        0xA9 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let imm_width = if width == 16 { 16 } else { 32 };
            let imm = read_immediate(reader, imm_width)?;
            let acc = Register::gp(width, 0, rex_present);
            Instruction::new(
                Mnemonic::Test,
                [Some(Operand::Reg(acc)), Some(Operand::Imm(imm)), None, None],
            )
        }
        0xAA => stos(legacy, rex_w, true),
        0xAB => stos(legacy, rex_w, false),
        0xAC => lods(legacy, rex_w, true),
        0xAD => lods(legacy, rex_w, false),
        0xAE => scas(legacy, rex_w, true),
        0xAF => scas(legacy, rex_w, false),
        0xB0..=0xB7 => {
            let enc = (primary - 0xB0) | ((eff.b as u8) << 3);
            let reg = gp8(enc, true);
            let imm = read_immediate(reader, 8)?;
            Instruction::new(Mnemonic::Mov, [Some(Operand::Reg(reg)), Some(Operand::Imm(imm)), None, None])
        }
        0xB8..=0xBF => {
            let enc = (primary - 0xB8) | ((eff.b as u8) << 3);
            if rex_w {
                let imm = read_immediate(reader, 64)?;
                let reg = Register::gp(64, enc, true);
                Instruction::new(
                    Mnemonic::Movabs,
                    [Some(Operand::Reg(reg)), Some(Operand::Imm(imm)), None, None],
                )
            } else {
                let width = if legacy.operand_size_override { 16 } else { 32 };
                let imm = read_immediate(reader, width)?;
                let reg = Register::gp(width, enc, true);
                Instruction::new(Mnemonic::Mov, [Some(Operand::Reg(reg)), Some(Operand::Imm(imm)), None, None])
            }
        }
        0xC0 => shift_group(reader, legacy, eff, rex_present, rex_w, primary)?,
        0xC1 => shift_group(reader, legacy, eff, rex_present, rex_w, primary)?,
        0xC2 => {
            let imm = read_immediate(reader, 16)?;
            Instruction::new(Mnemonic::Ret, [Some(Operand::Imm(imm)), None, None, None])
        }
        0xC3 => Instruction::new(Mnemonic::Ret, [None, None, None, None]),
        0xC6 | 0xC7 => mov_imm(reader, legacy, eff, rex_present, rex_w, primary)?,
        0xCC => Instruction::new(Mnemonic::Int3, [None, None, None, None]),
        0xD0 | 0xD1 | 0xD2 | 0xD3 => shift_group(reader, legacy, eff, rex_present, rex_w, primary)?,
        0xE8 => {
            let rel = reader.read_i32_le()?;
            Instruction::new(Mnemonic::Call, [Some(Operand::Rel(rel)), None, None, None])
        }
        0xE9 => {
            let rel = reader.read_i32_le()?;
            Instruction::new(Mnemonic::Jmp, [Some(Operand::Rel(rel)), None, None, None])
        }
        0xEB => {
            let rel = reader.read_i8()? as i32;
            Instruction::new(Mnemonic::Jmp, [Some(Operand::Rel(rel)), None, None, None])
        }
        0xF4 => Instruction::new(Mnemonic::Hlt, [None, None, None, None]),
        0xF6 | 0xF7 => group3(reader, legacy, eff, rex_present, rex_w, primary)?,
        0xFE => group_fe(reader, legacy, eff, rex_present)?,
        0xFF => group_ff(reader, legacy, eff, rex_present, rex_w)?,
        _ => return Err(Error::UnknownOpcode { primary, map: OpcodeMap::OneByte }),
    };
    Ok(with_generic_prefix(insn, legacy))
}

fn arith_insn(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    desc: &table::ArithDescriptor,
    offset: u8,
) -> Result<Instruction> {
    match offset {
        0 => {
            let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
            let dst = rm_operand(dm.rm, 8, rex_present);
            let src = Operand::Reg(gp8(dm.reg, rex_present));
            Ok(Instruction::new(desc.mnemonic, [Some(dst), Some(src), None, None]))
        }
        1 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
            let dst = rm_operand(dm.rm, width, rex_present);
            let src = Operand::Reg(Register::gp(width, dm.reg, rex_present));
            Ok(Instruction::new(desc.mnemonic, [Some(dst), Some(src), None, None]))
        }
        2 => {
            let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
            let dst = Operand::Reg(gp8(dm.reg, rex_present));
            let src = rm_operand(dm.rm, 8, rex_present);
            Ok(Instruction::new(desc.mnemonic, [Some(dst), Some(src), None, None]))
        }
        3 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
            let dst = Operand::Reg(Register::gp(width, dm.reg, rex_present));
            let src = rm_operand(dm.rm, width, rex_present);
            Ok(Instruction::new(desc.mnemonic, [Some(dst), Some(src), None, None]))
        }
        4 => {
            let imm = read_immediate(reader, 8)?;
            Ok(Instruction::new(
                desc.mnemonic,
                [Some(Operand::Reg(Register::Al)), Some(Operand::Imm(imm)), None, None],
            ))
        }
        5 => {
            let width = operand_width(rex_w, legacy.operand_size_override);
            let imm_width = if width == 16 { 16 } else { 32 };
            let imm = read_immediate(reader, imm_width)?;
            let acc = Register::gp(width, 0, rex_present);
            Ok(Instruction::new(
                desc.mnemonic,
                [Some(Operand::Reg(acc)), Some(Operand::Imm(imm)), None, None],
            ))
        }
        _ => unreachable!("arith_by_primary only returns offsets 0..=5"),
    }
}

fn group1(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    primary: u8,
) -> Result<Instruction> {
    let (width, imm_width) = match primary {
        0x80 => (8, 8),
        0x81 => {
            let w = operand_width(rex_w, legacy.operand_size_override);
            (w, if w == 16 { 16 } else { 32 })
        }
        0x83 => (operand_width(rex_w, legacy.operand_size_override), 8),
        _ => unreachable!(),
    };
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let digit = dm.reg & 0b111;
    let desc = table::arith_by_digit(digit).ok_or(Error::ReservedEncoding {
        reason: "group1 /digit has no defined operation",
    })?;
    let rm = rm_operand(dm.rm, width, rex_present);
    let imm = read_immediate(reader, imm_width)?;
    Ok(Instruction::new(desc.mnemonic, [Some(rm), Some(Operand::Imm(imm)), None, None]))
}

fn group3(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    primary: u8,
) -> Result<Instruction> {
    let width = if primary == 0xF6 {
        8
    } else {
        operand_width(rex_w, legacy.operand_size_override)
    };
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let digit = dm.reg & 0b111;
    let mnemonic = table::group3_by_digit(digit).ok_or(Error::ReservedEncoding {
        reason: "group3 /digit not implemented",
    })?;
    let rm = rm_operand(dm.rm, width, rex_present);
    if matches!(mnemonic, Mnemonic::Test) {
        let imm_width = if primary == 0xF6 {
            8
        } else if width == 16 {
            16
        } else {
            32
        };
        let imm = read_immediate(reader, imm_width)?;
        Ok(Instruction::new(mnemonic, [Some(rm), Some(Operand::Imm(imm)), None, None]))
    } else {
        Ok(Instruction::new(mnemonic, [Some(rm), None, None, None]))
    }
}

fn shift_group(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    primary: u8,
) -> Result<Instruction> {
    let width = if matches!(primary, 0xC0 | 0xD0 | 0xD2) {
        8
    } else {
        operand_width(rex_w, legacy.operand_size_override)
    };
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let digit = dm.reg & 0b111;
    let mnemonic = table::shift_by_digit(digit).ok_or(Error::ReservedEncoding {
        reason: "shift group /digit not implemented",
    })?;
    let rm = rm_operand(dm.rm, width, rex_present);
    let count = match primary {
        0xC0 | 0xC1 => Some(Operand::Imm(read_immediate(reader, 8)?)),
        0xD0 | 0xD1 => Some(Operand::Imm(Immediate::new(1, 8))),
        0xD2 | 0xD3 => Some(Operand::Reg(Register::Cl)),
        _ => unreachable!(),
    };
    Ok(Instruction::new(mnemonic, [Some(rm), count, None, None]))
}

fn lea(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
) -> Result<Instruction> {
    let width = operand_width(rex_w, legacy.operand_size_override);
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let RmField::Mem(ind) = dm.rm else {
        return Err(Error::ReservedEncoding {
            reason: "LEA requires a memory operand",
        });
    };
    let dst = Register::gp(width, dm.reg, rex_present);
    Ok(Instruction::new(
        Mnemonic::Lea,
        [Some(Operand::Reg(dst)), Some(Operand::Mem(ind)), None, None],
    ))
}

fn push_pop_reg(
    reg_enc: u8,
    eff: EffectiveRex,
    legacy: &LegacyPrefixes,
    mnemonic: Mnemonic,
) -> Instruction {
    let width = if legacy.operand_size_override { 16 } else { 64 };
    let full = reg_enc | ((eff.b as u8) << 3);
    let reg = Register::gp(width, full, true);
    Instruction::new(mnemonic, [Some(Operand::Reg(reg)), None, None, None])
}

fn push_imm(reader: &mut Reader, width_bits: u16) -> Result<Instruction> {
    let imm = read_immediate(reader, width_bits)?;
    Ok(Instruction::new(Mnemonic::Push, [Some(Operand::Imm(imm)), None, None, None]))
}

fn group_fe(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
) -> Result<Instruction> {
    let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
    let digit = dm.reg & 0b111;
    let mnemonic = match digit {
        0 => Mnemonic::Inc,
        1 => Mnemonic::Dec,
        _ => {
            return Err(Error::ReservedEncoding {
                reason: "0xFE /digit beyond 1 is not defined",
            })
        }
    };
    let rm = rm_operand(dm.rm, 8, rex_present);
    Ok(Instruction::new(mnemonic, [Some(rm), None, None, None]))
}

fn group_ff(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
) -> Result<Instruction> {
    let modrm_byte = reader.peek_u8()?;
    let digit = (modrm_byte >> 3) & 0b111;
    let (mnemonic, width) = match digit {
        0 => (Mnemonic::Inc, operand_width(rex_w, legacy.operand_size_override)),
        1 => (Mnemonic::Dec, operand_width(rex_w, legacy.operand_size_override)),
        2 => (Mnemonic::Call, 64),
        4 => (Mnemonic::Jmp, 64),
        6 => (Mnemonic::Push, 64),
        _ => {
            return Err(Error::ReservedEncoding {
                reason: "0xFF /digit not implemented",
            })
        }
    };
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let rm = rm_operand(dm.rm, width, rex_present);
    Ok(Instruction::new(mnemonic, [Some(rm), None, None, None]))
}

fn mov_imm(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    primary: u8,
) -> Result<Instruction> {
    let width = if primary == 0xC6 {
        8
    } else {
        operand_width(rex_w, legacy.operand_size_override)
    };
    let modrm_byte = reader.peek_u8()?;
    let digit = (modrm_byte >> 3) & 0b111;
    if digit != 0 {
        return Err(Error::ReservedEncoding {
            reason: "0xC6/0xC7 /digit other than 0 is not defined",
        });
    }
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let rm = rm_operand(dm.rm, width, rex_present);
    let imm_width = if primary == 0xC6 {
        8
    } else if width == 16 {
        16
    } else {
        32
    };
    let imm = read_immediate(reader, imm_width)?;
    Ok(Instruction::new(Mnemonic::Mov, [Some(rm), Some(Operand::Imm(imm)), None, None]))
}

fn jcc_short(primary: u8, reader: &mut Reader) -> Result<Instruction> {
    let cond = Condition::from_tttn(primary & 0x0f);
    let rel = reader.read_i8()? as i32;
    Ok(Instruction::new(Mnemonic::Jcc(cond), [Some(Operand::Rel(rel)), None, None, None]))
}

fn jcc_near(opcode2: u8, reader: &mut Reader) -> Result<Instruction> {
    let cond = Condition::from_tttn(opcode2 & 0x0f);
    let rel = reader.read_i32_le()?;
    Ok(Instruction::new(Mnemonic::Jcc(cond), [Some(Operand::Rel(rel)), None, None, None]))
}

fn stos(legacy: &LegacyPrefixes, rex_w: bool, byte_form: bool) -> Instruction {
    let width = if byte_form { 8 } else { operand_width(rex_w, legacy.operand_size_override) };
    let ps = pointer_size_for_width(width);
    let dst = es_rdi(ps, !legacy.address_size_override);
    let acc = Register::gp(width, 0, true);
    with_generic_prefix(
        Instruction::new(Mnemonic::Stos, [Some(Operand::Mem(dst)), Some(Operand::Reg(acc)), None, None]),
        legacy,
    )
}

fn lods(legacy: &LegacyPrefixes, rex_w: bool, byte_form: bool) -> Instruction {
    let width = if byte_form { 8 } else { operand_width(rex_w, legacy.operand_size_override) };
    let ps = pointer_size_for_width(width);
    let mem = seg_rsi(legacy, ps, !legacy.address_size_override);
    let acc = Register::gp(width, 0, true);
    with_generic_prefix(
        Instruction::new(Mnemonic::Lods, [Some(Operand::Reg(acc)), Some(Operand::Mem(mem)), None, None]),
        legacy,
    )
}

fn scas(legacy: &LegacyPrefixes, rex_w: bool, byte_form: bool) -> Instruction {
    let width = if byte_form { 8 } else { operand_width(rex_w, legacy.operand_size_override) };
    let ps = pointer_size_for_width(width);
    let acc = Register::gp(width, 0, true);
    let mem = es_rdi(ps, !legacy.address_size_override);
    with_generic_prefix(
        Instruction::new(Mnemonic::Scas, [Some(Operand::Reg(acc)), Some(Operand::Mem(mem)), None, None]),
        legacy,
    )
}

fn cmps(legacy: &LegacyPrefixes, ps: PointerSize) -> Instruction {
    let src1 = seg_rsi(legacy, ps, !legacy.address_size_override);
    let src2 = es_rdi(ps, !legacy.address_size_override);
    with_generic_prefix(
        Instruction::new(Mnemonic::Cmps, [Some(Operand::Mem(src1)), Some(Operand::Mem(src2)), None, None]),
        legacy,
    )
}

fn xadd_cmpxchg(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    opcode2: u8,
    mnemonic: Mnemonic,
) -> Result<Instruction> {
    let width = if opcode2 & 1 == 0 {
        8
    } else {
        operand_width(rex_w, legacy.operand_size_override)
    };
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let is_mem = matches!(dm.rm, RmField::Mem(_));
    if legacy.lock && !is_mem {
        return Err(Error::ReservedEncoding {
            reason: "LOCK prefix requires a memory destination",
        });
    }
    let src = Register::gp(width, dm.reg, rex_present);
    let rm = rm_operand(dm.rm, width, rex_present);
    Ok(with_generic_prefix(
        Instruction::new(mnemonic, [Some(rm), Some(Operand::Reg(src)), None, None]),
        legacy,
    ))
}

// ------------------------------------------------------------- two-byte map

fn legacy_mandatory(legacy: &LegacyPrefixes) -> MandatoryPrefix {
    if legacy.operand_size_override {
        MandatoryPrefix::P66
    } else if legacy.rep {
        MandatoryPrefix::PF3
    } else if legacy.repnz {
        MandatoryPrefix::PF2
    } else {
        MandatoryPrefix::None
    }
}

fn dispatch_two_byte(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    opcode2: u8,
) -> Result<Instruction> {
    let mp = legacy_mandatory(legacy);
    let insn = match opcode2 {
        0x10 | 0x11 if mp == MandatoryPrefix::None => {
            sse_move(reader, legacy, eff, Mnemonic::Movups, opcode2 == 0x10)?
        }
        0x18 => prefetchnta(reader, legacy, eff)?,
        0x1F => nop_multibyte(reader, legacy, eff, rex_w)?,
        0x28 | 0x29 if mp == MandatoryPrefix::None => {
            sse_move(reader, legacy, eff, Mnemonic::Movaps, opcode2 == 0x28)?
        }
        0x40..=0x4F => cmovcc(reader, legacy, eff, rex_present, rex_w, opcode2)?,
        0x6E if mp == MandatoryPrefix::P66 => movd_movq(reader, legacy, eff, rex_present, rex_w, true)?,
        0x6F if mp == MandatoryPrefix::P66 => sse_move(reader, legacy, eff, Mnemonic::Movdqa, true)?,
        0x6F if mp == MandatoryPrefix::PF3 => sse_move(reader, legacy, eff, Mnemonic::Movdqu, true)?,
        0x7E if mp == MandatoryPrefix::P66 => movd_movq(reader, legacy, eff, rex_present, rex_w, false)?,
        0x7F if mp == MandatoryPrefix::P66 => sse_move(reader, legacy, eff, Mnemonic::Movdqa, false)?,
        0x7F if mp == MandatoryPrefix::PF3 => sse_move(reader, legacy, eff, Mnemonic::Movdqu, false)?,
        0x80..=0x8F => jcc_near(opcode2, reader)?,
        0x90..=0x9F => setcc(reader, legacy, eff, rex_present, opcode2)?,
        0xA2 => Instruction::new(Mnemonic::Cpuid, [None, None, None, None]),
        0xAF => imul_rm(reader, legacy, eff, rex_present, rex_w)?,
        0xB0 | 0xB1 => xadd_cmpxchg(reader, legacy, eff, rex_present, rex_w, opcode2, Mnemonic::Cmpxchg)?,
        0xC0 | 0xC1 => xadd_cmpxchg(reader, legacy, eff, rex_present, rex_w, opcode2, Mnemonic::Xadd)?,
        0xEF if mp == MandatoryPrefix::P66 => sse_alu_2op(reader, legacy, eff, Mnemonic::Pxor)?,
        _ => return Err(Error::UnknownOpcode { primary: opcode2, map: OpcodeMap::TwoByte }),
    };
    Ok(insn)
}

fn sse_move(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    mnemonic: Mnemonic,
    is_load: bool,
) -> Result<Instruction> {
    let dm = read_modrm(reader, legacy, eff, PointerSize::XmmWord)?;
    let reg = Register::xmm(dm.reg & 0x0f);
    let rm = match dm.rm {
        RmField::Reg(full) => Operand::Reg(Register::xmm(full & 0x0f)),
        RmField::Mem(ind) => Operand::Mem(ind),
    };
    let (dst, src) = if is_load { (Operand::Reg(reg), rm) } else { (rm, Operand::Reg(reg)) };
    Ok(Instruction::new(mnemonic, [Some(dst), Some(src), None, None]))
}

fn sse_alu_2op(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    mnemonic: Mnemonic,
) -> Result<Instruction> {
    let dm = read_modrm(reader, legacy, eff, PointerSize::XmmWord)?;
    let reg = Register::xmm(dm.reg & 0x0f);
    let rm = match dm.rm {
        RmField::Reg(full) => Operand::Reg(Register::xmm(full & 0x0f)),
        RmField::Mem(ind) => Operand::Mem(ind),
    };
    Ok(Instruction::new(mnemonic, [Some(Operand::Reg(reg)), Some(rm), None, None]))
}

fn movd_movq(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    is_load: bool,
) -> Result<Instruction> {
    let gp_width = if rex_w { 64 } else { 32 };
    let mnemonic = if rex_w { Mnemonic::Movq } else { Mnemonic::Movd };
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(gp_width))?;
    let xmm = Register::xmm(dm.reg & 0x0f);
    let rm = match dm.rm {
        RmField::Reg(full) => Operand::Reg(Register::gp(gp_width, full, rex_present)),
        RmField::Mem(ind) => Operand::Mem(ind),
    };
    let (dst, src) = if is_load { (Operand::Reg(xmm), rm) } else { (rm, Operand::Reg(xmm)) };
    Ok(Instruction::new(mnemonic, [Some(dst), Some(src), None, None]))
}

fn nop_multibyte(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_w: bool,
) -> Result<Instruction> {
    let width = operand_width(rex_w, legacy.operand_size_override);
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let rm = rm_operand(dm.rm, width, true);
    Ok(Instruction::new(Mnemonic::Nop, [Some(rm), None, None, None]))
}

fn prefetchnta(reader: &mut Reader, legacy: &LegacyPrefixes, eff: EffectiveRex) -> Result<Instruction> {
    let modrm_byte = reader.peek_u8()?;
    let digit = (modrm_byte >> 3) & 0b111;
    if digit != 0 {
        return Err(Error::ReservedEncoding {
            reason: "only PREFETCHNTA (/0) is implemented for opcode 0F 18",
        });
    }
    let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
    let RmField::Mem(ind) = dm.rm else {
        return Err(Error::ReservedEncoding {
            reason: "PREFETCHNTA requires a memory operand",
        });
    };
    Ok(Instruction::new(Mnemonic::Prefetchnta, [Some(Operand::Mem(ind)), None, None, None]))
}

fn cmovcc(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
    opcode2: u8,
) -> Result<Instruction> {
    let cond = Condition::from_tttn(opcode2 & 0x0f);
    let width = operand_width(rex_w, legacy.operand_size_override);
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let dst = Register::gp(width, dm.reg, rex_present);
    let src = rm_operand(dm.rm, width, rex_present);
    Ok(Instruction::new(Mnemonic::Cmovcc(cond), [Some(Operand::Reg(dst)), Some(src), None, None]))
}

fn setcc(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    opcode2: u8,
) -> Result<Instruction> {
    let cond = Condition::from_tttn(opcode2 & 0x0f);
    let dm = read_modrm(reader, legacy, eff, PointerSize::Byte)?;
    let rm = rm_operand(dm.rm, 8, rex_present);
    Ok(Instruction::new(Mnemonic::Setcc(cond), [Some(rm), None, None, None]))
}

fn imul_rm(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    rex_present: bool,
    rex_w: bool,
) -> Result<Instruction> {
    let width = operand_width(rex_w, legacy.operand_size_override);
    let dm = read_modrm(reader, legacy, eff, pointer_size_for_width(width))?;
    let dst = Register::gp(width, dm.reg, rex_present);
    let src = rm_operand(dm.rm, width, rex_present);
    Ok(Instruction::new(Mnemonic::Imul, [Some(Operand::Reg(dst)), Some(src), None, None]))
}

// ----------------------------------------------------------------- VEX/EVEX

fn dispatch_vex(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    vex: VexPrefix,
    map: OpcodeMap,
    primary: u8,
) -> Result<Instruction> {
    let eff = EffectiveRex::from_vex(&vex);
    match (map, primary) {
        (OpcodeMap::TwoByte, 0x6F) | (OpcodeMap::TwoByte, 0x7F) if vex.pp == MandatoryPrefix::PF3 => {
            vex_move(reader, legacy, eff, vex.length, Mnemonic::Vmovdqu, primary == 0x6F)
        }
        (OpcodeMap::TwoByte, 0x28) | (OpcodeMap::TwoByte, 0x29) if vex.pp == MandatoryPrefix::None => {
            vex_move(reader, legacy, eff, vex.length, Mnemonic::Vmovaps, primary == 0x28)
        }
        (OpcodeMap::TwoByte, 0xEF) if vex.pp == MandatoryPrefix::P66 => vex_pxor(reader, legacy, eff, &vex),
        _ => Err(Error::UnknownOpcode { primary, map }),
    }
}

fn vector_register_ctor(length: VectorLength) -> fn(u8) -> Register {
    match length {
        VectorLength::L128 => Register::xmm,
        VectorLength::L256 => Register::ymm,
        VectorLength::L512 => Register::zmm,
    }
}

fn vector_pointer_size(length: VectorLength) -> PointerSize {
    match length {
        VectorLength::L128 => PointerSize::XmmWord,
        VectorLength::L256 => PointerSize::YmmWord,
        VectorLength::L512 => PointerSize::ZmmWord,
    }
}

fn vex_move(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    length: VectorLength,
    mnemonic: Mnemonic,
    is_load: bool,
) -> Result<Instruction> {
    let reg_ctor = vector_register_ctor(length);
    let dm = read_modrm(reader, legacy, eff, vector_pointer_size(length))?;
    let reg = reg_ctor(dm.reg);
    let rm = match dm.rm {
        RmField::Reg(full) => Operand::Reg(reg_ctor(full)),
        RmField::Mem(ind) => Operand::Mem(ind),
    };
    let (dst, src) = if is_load { (Operand::Reg(reg), rm) } else { (rm, Operand::Reg(reg)) };
    Ok(Instruction::new(mnemonic, [Some(dst), Some(src), None, None]))
}

fn vex_pxor(
    reader: &mut Reader,
    legacy: &LegacyPrefixes,
    eff: EffectiveRex,
    vex: &VexPrefix,
) -> Result<Instruction> {
    let reg_ctor = vector_register_ctor(vex.length);
    let dm = read_modrm(reader, legacy, eff, vector_pointer_size(vex.length))?;
    let dst = reg_ctor(dm.reg);
    let src1 = reg_ctor(vex.vvvv_full());
    let src2 = match dm.rm {
        RmField::Reg(full) => Operand::Reg(reg_ctor(full)),
        RmField::Mem(ind) => Operand::Mem(ind),
    };
    Ok(Instruction::new(
        Mnemonic::Vpxor,
        [Some(Operand::Reg(dst)), Some(Operand::Reg(src1)), Some(src2), None],
    ))
}
