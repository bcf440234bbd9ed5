//! The structural inverse of the decoder (§4.4): turns an [`Instruction`]
//! back into bytes. Encoding does not "canonicalize" a loosely-specified
//! operation — every width (immediate, displacement, operand) is already
//! fixed on the [`Instruction`]/[`Operand`] values themselves (§4.2), so
//! encoding is a deterministic structural mapping, not a search over
//! legal encodings. The one real choice left to the encoder is whether a
//! REX prefix is necessary at all (§4.4 rule 4).

use crate::coding::{encode_modrm, encode_sib, scale_to_log2, Rex};
use crate::error::{Error, Result};
use crate::instruction::{Instruction, Mnemonic, Prefix};
use crate::operand::{Displacement, DisplacementWidth, Indirect, Operand, PointerSize};
use crate::reg::Register;

pub fn encode(insn: &Instruction) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if let Some(seg) = explicit_operand_segment(insn) {
        out.push(segment_prefix_byte(seg));
    }
    if insn_operand_size_is_16(insn) {
        out.push(0x66);
    }
    if insn_address_size_is_32(insn) {
        out.push(0x67);
    }
    match insn.prefix() {
        Some(Prefix::Rep) => out.push(0xF3),
        Some(Prefix::Repnz) => out.push(0xF2),
        Some(Prefix::Lock) => out.push(0xF0),
        None => {}
    }

    encode_body(insn, &mut out)?;
    Ok(out)
}

// --------------------------------------------------------------- ModR/M

struct RmEncoding {
    mod_bits: u8,
    rm_field: u8,
    rex_x: bool,
    rex_b: bool,
    address_size_override: bool,
    trailing: Vec<u8>,
}

fn register_direct(reg: Register) -> RmEncoding {
    let enc = reg.encoding();
    RmEncoding {
        mod_bits: 0b11,
        rm_field: enc & 0b111,
        rex_x: false,
        rex_b: enc >= 8,
        address_size_override: false,
        trailing: Vec::new(),
    }
}

fn disp_mod_and_bytes(disp: Option<Displacement>, force_disp8_zero: bool) -> Result<(u8, Vec<u8>)> {
    match disp {
        None if force_disp8_zero => Ok((0b01, vec![0])),
        None => Ok((0b00, Vec::new())),
        Some(d) => match d.width {
            DisplacementWidth::Byte => Ok((0b01, vec![d.value as i8 as u8])),
            DisplacementWidth::Dword => Ok((0b10, d.value.to_le_bytes().to_vec())),
            DisplacementWidth::Word => Err(Error::IllegalOperand {
                reason: "16-bit displacements are not valid in 64-bit addressing",
            }),
        },
    }
}

fn encode_indirect(ind: &Indirect) -> Result<RmEncoding> {
    let address_size_override = match (ind.base, ind.index) {
        (Some(b), _) => b.width_bits() == 32,
        (None, Some(i)) => i.width_bits() == 32,
        (None, None) => false,
    };

    if ind.is_rip_relative() {
        let disp = ind.displacement.ok_or(Error::IllegalOperand {
            reason: "a RIP-relative operand requires a displacement",
        })?;
        if disp.width != DisplacementWidth::Dword {
            return Err(Error::IllegalOperand {
                reason: "a RIP-relative displacement must be encoded as 32 bits",
            });
        }
        return Ok(RmEncoding {
            mod_bits: 0b00,
            rm_field: 0b101,
            rex_x: false,
            rex_b: false,
            address_size_override,
            trailing: disp.value.to_le_bytes().to_vec(),
        });
    }

    let needs_sib =
        ind.index.is_some() || matches!(ind.base, Some(b) if b.encoding() & 0b111 == 0b100);

    if needs_sib {
        let (idx_low, rex_x, scale_log2) = match ind.index {
            Some(i) => (
                i.encoding() & 0b111,
                i.encoding() >= 8,
                scale_to_log2(ind.scale.unwrap_or(1)),
            ),
            None => (0b100, false, 0),
        };

        let (base_low, rex_b, mod_bits, disp_bytes) = match ind.base {
            None => {
                let disp = ind.displacement.ok_or(Error::IllegalOperand {
                    reason: "base-less (index-only) addressing requires an explicit displacement",
                })?;
                if disp.width != DisplacementWidth::Dword {
                    return Err(Error::IllegalOperand {
                        reason: "base-less addressing requires a 32-bit displacement",
                    });
                }
                (0b101, false, 0b00, disp.value.to_le_bytes().to_vec())
            }
            Some(b) => {
                let low = b.encoding() & 0b111;
                let rex_b = b.encoding() >= 8;
                let force_zero_disp8 = low == 0b101;
                let (mod_bits, disp_bytes) = disp_mod_and_bytes(ind.displacement, force_zero_disp8)?;
                (low, rex_b, mod_bits, disp_bytes)
            }
        };

        let sib = encode_sib(scale_log2, idx_low, base_low);
        let mut trailing = vec![sib];
        trailing.extend(disp_bytes);
        return Ok(RmEncoding {
            mod_bits,
            rm_field: 0b100,
            rex_x,
            rex_b,
            address_size_override,
            trailing,
        });
    }

    let base = ind.base.ok_or(Error::IllegalOperand {
        reason: "a memory operand with neither base, index, nor RIP has no valid encoding",
    })?;
    let low = base.encoding() & 0b111;
    let rex_b = base.encoding() >= 8;
    let force_zero_disp8 = low == 0b101;
    let (mod_bits, disp_bytes) = disp_mod_and_bytes(ind.displacement, force_zero_disp8)?;
    Ok(RmEncoding {
        mod_bits,
        rm_field: low,
        rex_x: false,
        rex_b,
        address_size_override,
        trailing: disp_bytes,
    })
}

fn encode_rm(operand: &Operand) -> Result<RmEncoding> {
    match operand {
        Operand::Reg(r) => Ok(register_direct(*r)),
        Operand::Mem(ind) => encode_indirect(ind),
        other => Err(Error::IllegalOperand {
            reason: illegal_rm_reason(other),
        }),
    }
}

fn illegal_rm_reason(operand: &Operand) -> &'static str {
    match operand {
        Operand::Imm(_) => "an immediate cannot appear in the ModR/M r/m position",
        Operand::Seg(_) => "a bare segment register cannot appear in the ModR/M r/m position",
        Operand::Rel(_) => "a relative displacement cannot appear in the ModR/M r/m position",
        Operand::Reg(_) | Operand::Mem(_) => unreachable!(),
    }
}

/// Emit `reg`'s ModR/M.reg field plus the ModR/M/SIB/disp bytes naming
/// `rm`. `reg_field` is a raw 0..=7 field (`/digit` for group opcodes, or
/// a register's low 3 bits for a true register operand).
fn push_modrm(out: &mut Vec<u8>, reg_field: u8, rm: &RmEncoding) {
    out.push(encode_modrm(rm.mod_bits, reg_field, rm.rm_field));
    out.extend(&rm.trailing);
}

/// Push a REX prefix iff structurally necessary: any of W/R/X/B set, or a
/// `Gp8` register whose encoding collides with AH/CH/DH/BH's bit pattern
/// (§4.4 rule 4, the mirror of [`Register::is_new_8bit`]).
fn push_rex_if_needed(out: &mut Vec<u8>, w: bool, r: bool, x: bool, b: bool, forces_rex: bool) {
    let rex = Rex { w, r, x, b };
    if forces_rex || !rex.is_plain() {
        out.push(rex.to_byte());
    }
}

fn any_new_8bit(operands: &[&Operand]) -> bool {
    operands.iter().any(|o| matches!(o, Operand::Reg(r) if r.is_new_8bit()))
}

// ------------------------------------------------------------- top level

fn explicit_operand_segment(insn: &Instruction) -> Option<Register> {
    if is_string_mnemonic(insn.mnemonic()) {
        return None;
    }
    insn.operands().find_map(|o| match o {
        Operand::Mem(ind) => ind.segment,
        _ => None,
    })
}

fn is_string_mnemonic(m: Mnemonic) -> bool {
    matches!(
        m,
        Mnemonic::Movs | Mnemonic::Stos | Mnemonic::Cmps | Mnemonic::Scas | Mnemonic::Lods
    )
}

fn segment_prefix_byte(seg: Register) -> u8 {
    match seg {
        Register::Es => 0x26,
        Register::Cs => 0x2E,
        Register::Ss => 0x36,
        Register::Ds => 0x3E,
        Register::Fs => 0x64,
        Register::Gs => 0x65,
        other => unreachable!("{other} is not a segment register"),
    }
}

fn insn_operand_size_is_16(insn: &Instruction) -> bool {
    insn.operands().any(|o| match o {
        Operand::Reg(r) => r.width_bits() == 16 && !matches!(r.class(), crate::reg::RegisterClass::Segment),
        Operand::Mem(m) => m.pointer_size == PointerSize::Word,
        _ => false,
    })
}

fn insn_address_size_is_32(insn: &Instruction) -> bool {
    // A 32-bit base (including EIP-relative addressing) or index always
    // means the 0x67 address-size override was present; RIP (64-bit) is
    // the unprefixed default and never triggers it.
    insn.operands().any(|o| match o {
        Operand::Mem(m) => {
            m.base.map(|b| b.width_bits() == 32).unwrap_or(false)
                || m.index.map(|i| i.width_bits() == 32).unwrap_or(false)
        }
        _ => false,
    })
}

fn encode_body(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match insn.mnemonic() {
        m @ (Mnemonic::Add
        | Mnemonic::Or
        | Mnemonic::Adc
        | Mnemonic::Sbb
        | Mnemonic::And
        | Mnemonic::Sub
        | Mnemonic::Xor
        | Mnemonic::Cmp) => encode_arith(m, insn, out),
        Mnemonic::Mov => encode_mov(insn, out),
        Mnemonic::Movabs => encode_movabs(insn, out),
        Mnemonic::Lea => encode_lea(insn, out),
        Mnemonic::Push => encode_push(insn, out),
        Mnemonic::Pop => encode_pop(insn, out),
        Mnemonic::Inc | Mnemonic::Dec => encode_inc_dec(insn, out),
        Mnemonic::Nop => encode_nop(insn, out),
        Mnemonic::Test => encode_test(insn, out),
        Mnemonic::Movs | Mnemonic::Stos | Mnemonic::Cmps | Mnemonic::Scas | Mnemonic::Lods => {
            encode_string_op(insn, out)
        }
        Mnemonic::Jmp => encode_jmp(insn, out),
        Mnemonic::Call => encode_call(insn, out),
        Mnemonic::Ret => encode_ret(insn, out),
        Mnemonic::Jcc(c) => {
            let rel = rel_operand(insn, 0)?;
            match rel {
                r if (i8::MIN as i32..=i8::MAX as i32).contains(&r) && insn_is_short_form(insn) => {
                    out.push(0x70 | c.tttn());
                    out.push(r as i8 as u8);
                }
                r => {
                    out.push(0x0F);
                    out.push(0x80 | c.tttn());
                    out.extend(r.to_le_bytes());
                }
            }
            Ok(())
        }
        Mnemonic::Cmovcc(c) => encode_cmovcc(c, insn, out),
        Mnemonic::Setcc(c) => encode_setcc(c, insn, out),
        Mnemonic::Imul => encode_imul(insn, out),
        Mnemonic::Mul | Mnemonic::Div | Mnemonic::Idiv => encode_group3_unary(insn, out),
        Mnemonic::Shl | Mnemonic::Shr | Mnemonic::Sar | Mnemonic::Rol | Mnemonic::Ror => {
            encode_shift(insn, out)
        }
        Mnemonic::Movaps => encode_sse_move(insn, out, 0x28, 0x29),
        Mnemonic::Movups => encode_sse_move(insn, out, 0x10, 0x11),
        Mnemonic::Movdqa => encode_sse_move(insn, out, 0x6F, 0x7F),
        Mnemonic::Movdqu => encode_sse_move(insn, out, 0x6F, 0x7F),
        Mnemonic::Movd | Mnemonic::Movq => encode_movd_movq(insn, out),
        Mnemonic::Pxor => encode_sse_alu_2op(insn, out, 0xEF),
        Mnemonic::Vmovdqu => encode_vex_move(insn, out, 0xF3, 0x6F, 0x7F),
        Mnemonic::Vmovaps => encode_vex_move(insn, out, 0x00, 0x28, 0x29),
        Mnemonic::Vpxor => encode_vpxor(insn, out),
        Mnemonic::Cpuid => {
            out.extend([0x0F, 0xA2]);
            Ok(())
        }
        Mnemonic::Int3 => {
            out.push(0xCC);
            Ok(())
        }
        Mnemonic::Hlt => {
            out.push(0xF4);
            Ok(())
        }
        Mnemonic::Prefetchnta => encode_prefetchnta(insn, out),
        Mnemonic::Xadd => encode_xadd_cmpxchg(insn, out, 0xC0, 0xC1),
        Mnemonic::Cmpxchg => encode_xadd_cmpxchg(insn, out, 0xB0, 0xB1),
    }
}

fn operand(insn: &Instruction, index: usize) -> Result<&Operand> {
    insn.operand(index).ok_or(Error::IllegalOperand {
        reason: "instruction is missing a required operand",
    })
}

fn rel_operand(insn: &Instruction, index: usize) -> Result<i32> {
    operand(insn, index)?.as_relative().ok_or(Error::IllegalOperand {
        reason: "expected a relative branch-target operand",
    })
}

/// We only know the encoded form (short/near) once the instruction is
/// built with a concrete [`Operand::Rel`]; callers who decoded a short
/// Jcc always reconstruct one that fits in 8 bits, so re-encoding the
/// same instruction picks the same (short) form back. A rel that does
/// not fit in 8 bits always takes the near form regardless.
fn insn_is_short_form(insn: &Instruction) -> bool {
    matches!(insn.operand(0), Some(Operand::Rel(r)) if (i8::MIN as i32..=i8::MAX as i32).contains(r))
}

fn operand_width_of(reg: Register) -> u16 {
    reg.width_bits()
}

fn encode_arith(mnemonic: Mnemonic, insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let block_base = arith_block_base(mnemonic);
    let digit = arith_digit(mnemonic);
    let dst = operand(insn, 0)?;
    let src = operand(insn, 1)?;

    match (dst, src) {
        (Operand::Reg(a), Operand::Imm(imm)) if matches!(a, Register::Al) => {
            out.push(block_base + 4);
            out.push(imm.value as i8 as u8);
            Ok(())
        }
        // eAX/rAX, imm16/32 short form (opcode+5): only the accumulator
        // (encoding 0, non-8-bit) takes it; every other register/imm
        // combination below goes through the /digit group instead.
        (Operand::Reg(a), Operand::Imm(imm))
            if a.encoding() == 0
                && !matches!(
                    a.class(),
                    crate::reg::RegisterClass::Gp8 | crate::reg::RegisterClass::Gp8High
                ) =>
        {
            let width = operand_width_of(*a);
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(block_base + 5);
            push_imm_bytes(out, imm.value, if imm.width_bits == 16 { 16 } else { 32 });
            Ok(())
        }
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)) => {
            let width = width_of_rm(rm, rm)?;
            let opcode = if width == 8 {
                0x80
            } else if imm.width_bits == 8 {
                0x83
            } else {
                0x81
            };
            encode_digit_rm(out, &[opcode], digit, rm, width == 64, any_new_8bit(&[rm]))?;
            let imm_width = if opcode != 0x81 {
                8
            } else if width == 16 {
                16
            } else {
                32
            };
            push_imm_bytes(out, imm.value, imm_width);
            Ok(())
        }
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(r)) => {
            let width = width_of_rm(rm, dst)?;
            let opcode = if width == 8 { block_base } else { block_base + 1 };
            encode_reg_rm(out, opcode, *r, rm, width, any_new_8bit(&[dst, src]))
        }
        (Operand::Reg(r), rm @ (Operand::Reg(_) | Operand::Mem(_))) => {
            let width = width_of_rm(rm, src)?;
            let opcode = if width == 8 { block_base + 2 } else { block_base + 3 };
            encode_reg_rm(out, opcode, *r, rm, width, any_new_8bit(&[dst, src]))
        }
        _ => Err(Error::IllegalOperand {
            reason: "unsupported operand combination for an ALU-group mnemonic",
        }),
    }
}

fn arith_block_base(m: Mnemonic) -> u8 {
    match m {
        Mnemonic::Add => 0x00,
        Mnemonic::Or => 0x08,
        Mnemonic::Adc => 0x10,
        Mnemonic::Sbb => 0x18,
        Mnemonic::And => 0x20,
        Mnemonic::Sub => 0x28,
        Mnemonic::Xor => 0x30,
        Mnemonic::Cmp => 0x38,
        _ => unreachable!(),
    }
}

fn arith_digit(m: Mnemonic) -> u8 {
    match m {
        Mnemonic::Add => 0,
        Mnemonic::Or => 1,
        Mnemonic::Adc => 2,
        Mnemonic::Sbb => 3,
        Mnemonic::And => 4,
        Mnemonic::Sub => 5,
        Mnemonic::Xor => 6,
        Mnemonic::Cmp => 7,
        _ => unreachable!(),
    }
}

fn width_of_rm(rm: &Operand, fallback: &Operand) -> Result<u16> {
    match rm {
        Operand::Reg(r) => Ok(r.width_bits()),
        Operand::Mem(m) => Ok(m.pointer_size.bits()),
        _ => match fallback {
            Operand::Reg(r) => Ok(r.width_bits()),
            _ => Err(Error::IllegalOperand {
                reason: "could not determine operand width",
            }),
        },
    }
}

fn push_imm_bytes(out: &mut Vec<u8>, value: i64, width_bits: u16) {
    match width_bits {
        8 => out.push(value as i8 as u8),
        16 => out.extend((value as i16).to_le_bytes()),
        32 => out.extend((value as i32).to_le_bytes()),
        64 => out.extend(value.to_le_bytes()),
        other => unreachable!("not an immediate width: {other}"),
    }
}

/// Encode `opcode /r` with `reg` as ModR/M.reg and `rm` as ModR/M.rm.
fn encode_reg_rm(
    out: &mut Vec<u8>,
    opcode: u8,
    reg: Register,
    rm: &Operand,
    width: u16,
    forces_rex: bool,
) -> Result<()> {
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(
        out,
        width == 64,
        reg.encoding() >= 8,
        rm_enc.rex_x,
        rm_enc.rex_b,
        forces_rex,
    );
    out.push(opcode);
    push_modrm(out, reg.encoding() & 0b111, &rm_enc);
    Ok(())
}

/// Encode a group opcode (`/digit`) with `rm` as ModR/M.rm.
fn encode_digit_rm(
    out: &mut Vec<u8>,
    opcode: &[u8],
    digit: u8,
    rm: &Operand,
    width_is_64: bool,
    forces_rex: bool,
) -> Result<()> {
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, width_is_64, false, rm_enc.rex_x, rm_enc.rex_b, forces_rex);
    out.extend(opcode);
    push_modrm(out, digit, &rm_enc);
    Ok(())
}

fn encode_mov(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let dst = operand(insn, 0)?;
    let src = operand(insn, 1)?;
    match (dst, src) {
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)) => {
            let width = width_of_rm(rm, rm)?;
            let opcode = if width == 8 { 0xC6 } else { 0xC7 };
            encode_digit_rm(out, &[opcode], 0, rm, width == 64, any_new_8bit(&[dst]))?;
            let imm_width = if opcode == 0xC6 { 8 } else if width == 16 { 16 } else { 32 };
            push_imm_bytes(out, imm.value, imm_width);
            Ok(())
        }
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(r)) => {
            let width = width_of_rm(rm, dst)?;
            let opcode = if width == 8 { 0x88 } else { 0x89 };
            encode_reg_rm(out, opcode, *r, rm, width, any_new_8bit(&[dst, src]))
        }
        (Operand::Reg(r), rm @ (Operand::Reg(_) | Operand::Mem(_))) => {
            let width = width_of_rm(rm, src)?;
            let opcode = if width == 8 { 0x8A } else { 0x8B };
            encode_reg_rm(out, opcode, *r, rm, width, any_new_8bit(&[dst, src]))
        }
        _ => Err(Error::IllegalOperand {
            reason: "unsupported operand combination for MOV",
        }),
    }
}

fn encode_movabs(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let Operand::Reg(r) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "MOVABS destination must be a register" });
    };
    let Operand::Imm(imm) = *operand(insn, 1)? else {
        return Err(Error::IllegalOperand { reason: "MOVABS source must be an immediate" });
    };
    push_rex_if_needed(out, true, false, false, r.encoding() >= 8, false);
    out.push(0xB8 | (r.encoding() & 0b111));
    push_imm_bytes(out, imm.value, 64);
    Ok(())
}

fn encode_lea(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let Operand::Reg(r) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "LEA destination must be a register" });
    };
    let mem = operand(insn, 1)?;
    if !matches!(mem, Operand::Mem(_)) {
        return Err(Error::IllegalOperand { reason: "LEA source must be a memory operand" });
    }
    encode_reg_rm(out, 0x8D, r, mem, r.width_bits(), false)
}

fn encode_push(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match operand(insn, 0)? {
        Operand::Reg(r) => {
            push_rex_if_needed(out, false, false, false, r.encoding() >= 8, false);
            out.push(0x50 | (r.encoding() & 0b111));
            Ok(())
        }
        Operand::Imm(imm) if imm.width_bits == 8 => {
            out.push(0x6A);
            push_imm_bytes(out, imm.value, 8);
            Ok(())
        }
        Operand::Imm(imm) => {
            out.push(0x68);
            push_imm_bytes(out, imm.value, 32);
            Ok(())
        }
        Operand::Mem(_) => encode_digit_rm(out, &[0xFF], 6, operand(insn, 0)?, false, false),
        _ => Err(Error::IllegalOperand { reason: "unsupported PUSH operand" }),
    }
}

fn encode_pop(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let Operand::Reg(r) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "POP requires a register operand" });
    };
    push_rex_if_needed(out, false, false, false, r.encoding() >= 8, false);
    out.push(0x58 | (r.encoding() & 0b111));
    Ok(())
}

fn encode_inc_dec(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let rm = operand(insn, 0)?;
    let digit = if insn.mnemonic() == Mnemonic::Inc { 0 } else { 1 };
    let width = width_of_rm(rm, rm)?;
    if width == 8 {
        encode_digit_rm(out, &[0xFE], digit, rm, false, any_new_8bit(&[rm]))
    } else {
        encode_digit_rm(out, &[0xFF], digit, rm, width == 64, false)
    }
}

fn encode_nop(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match insn.operand(0) {
        None => {
            out.push(0x90);
            Ok(())
        }
        Some(rm) => {
            let width = width_of_rm(rm, rm)?;
            encode_digit_rm(out, &[0x0F, 0x1F], 0, rm, width == 64, false)
        }
    }
}

fn encode_test(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let a = operand(insn, 0)?;
    let b = operand(insn, 1)?;
    match (a, b) {
        (Operand::Reg(r), Operand::Imm(imm)) if matches!(r, Register::Al) => {
            out.push(0xA8);
            push_imm_bytes(out, imm.value, 8);
            Ok(())
        }
        (Operand::Reg(r), Operand::Imm(imm)) if r.encoding() == 0 && r.class() != crate::reg::RegisterClass::Gp8 => {
            let width = r.width_bits();
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(0xA9);
            push_imm_bytes(out, imm.value, if width == 16 { 16 } else { 32 });
            Ok(())
        }
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(imm)) => {
            let width = width_of_rm(rm, rm)?;
            let opcode = if width == 8 { 0xF6 } else { 0xF7 };
            encode_digit_rm(out, &[opcode], 0, rm, width == 64, any_new_8bit(&[rm]))?;
            push_imm_bytes(out, imm.value, if width == 8 { 8 } else if width == 16 { 16 } else { 32 });
            Ok(())
        }
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(r)) => {
            let width = width_of_rm(rm, a)?;
            let opcode = if width == 8 { 0x84 } else { 0x85 };
            encode_reg_rm(out, opcode, *r, rm, width, any_new_8bit(&[a, b]))
        }
        _ => Err(Error::IllegalOperand { reason: "unsupported operand combination for TEST" }),
    }
}

fn encode_group3_unary(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let rm = operand(insn, 0)?;
    let digit = match insn.mnemonic() {
        Mnemonic::Mul => 4,
        Mnemonic::Imul => 5,
        Mnemonic::Div => 6,
        Mnemonic::Idiv => 7,
        _ => unreachable!(),
    };
    let width = width_of_rm(rm, rm)?;
    let opcode = if width == 8 { 0xF6 } else { 0xF7 };
    encode_digit_rm(out, &[opcode], digit, rm, width == 64, any_new_8bit(&[rm]))
}

fn encode_imul(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let Operand::Reg(r) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "two-operand IMUL destination must be a register" });
    };
    let rm = operand(insn, 1)?;
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, r.width_bits() == 64, r.encoding() >= 8, rm_enc.rex_x, rm_enc.rex_b, false);
    out.extend([0x0F, 0xAF]);
    push_modrm(out, r.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn encode_cmovcc(c: crate::instruction::Condition, insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let Operand::Reg(r) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "CMOVcc destination must be a register" });
    };
    let rm = operand(insn, 1)?;
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, r.width_bits() == 64, r.encoding() >= 8, rm_enc.rex_x, rm_enc.rex_b, false);
    out.extend([0x0F, 0x40 | c.tttn()]);
    push_modrm(out, r.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn encode_setcc(c: crate::instruction::Condition, insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let rm = operand(insn, 0)?;
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, false, false, rm_enc.rex_x, rm_enc.rex_b, any_new_8bit(&[rm]));
    out.extend([0x0F, 0x90 | c.tttn()]);
    push_modrm(out, 0, &rm_enc);
    Ok(())
}

fn encode_shift(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let rm = operand(insn, 0)?;
    let count = operand(insn, 1)?;
    let digit = match insn.mnemonic() {
        Mnemonic::Rol => 0,
        Mnemonic::Ror => 1,
        Mnemonic::Shl => 4,
        Mnemonic::Shr => 5,
        Mnemonic::Sar => 7,
        _ => unreachable!(),
    };
    let width = width_of_rm(rm, rm)?;
    let forces_rex = any_new_8bit(&[rm]);
    match count {
        Operand::Reg(Register::Cl) => {
            let opcode = if width == 8 { 0xD2 } else { 0xD3 };
            encode_digit_rm(out, &[opcode], digit, rm, width == 64, forces_rex)
        }
        Operand::Imm(imm) if imm.value == 1 => {
            let opcode = if width == 8 { 0xD0 } else { 0xD1 };
            encode_digit_rm(out, &[opcode], digit, rm, width == 64, forces_rex)
        }
        Operand::Imm(imm) => {
            let opcode = if width == 8 { 0xC0 } else { 0xC1 };
            encode_digit_rm(out, &[opcode], digit, rm, width == 64, forces_rex)?;
            push_imm_bytes(out, imm.value, 8);
            Ok(())
        }
        _ => Err(Error::IllegalOperand { reason: "unsupported shift count operand" }),
    }
}

fn encode_xadd_cmpxchg(insn: &Instruction, out: &mut Vec<u8>, opcode8: u8, opcode_wide: u8) -> Result<()> {
    let rm = operand(insn, 0)?;
    let Operand::Reg(r) = *operand(insn, 1)? else {
        return Err(Error::IllegalOperand { reason: "expected a register source operand" });
    };
    if insn.prefix() == Some(Prefix::Lock) && !matches!(rm, Operand::Mem(_)) {
        return Err(Error::IllegalOperand { reason: "LOCK prefix requires a memory destination" });
    }
    let width = width_of_rm(rm, rm)?;
    let opcode = if width == 8 { opcode8 } else { opcode_wide };
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, width == 64, r.encoding() >= 8, rm_enc.rex_x, rm_enc.rex_b, any_new_8bit(&[rm]));
    out.extend([0x0F, opcode]);
    push_modrm(out, r.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn encode_string_op(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match insn.mnemonic() {
        Mnemonic::Movs => {
            let Operand::Mem(dst) = operand(insn, 0)? else {
                return Err(Error::IllegalOperand { reason: "MOVS destination must be memory" });
            };
            let Operand::Mem(src) = operand(insn, 1)? else {
                return Err(Error::IllegalOperand { reason: "MOVS source must be memory" });
            };
            push_string_segment_prefix(out, src);
            let width = dst.pointer_size.bits();
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(if dst.pointer_size == PointerSize::Byte { 0xA4 } else { 0xA5 });
            Ok(())
        }
        Mnemonic::Stos => {
            let Operand::Mem(dst) = operand(insn, 0)? else {
                return Err(Error::IllegalOperand { reason: "STOS destination must be memory" });
            };
            let width = dst.pointer_size.bits();
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(if dst.pointer_size == PointerSize::Byte { 0xAA } else { 0xAB });
            Ok(())
        }
        Mnemonic::Lods => {
            let Operand::Mem(src) = operand(insn, 1)? else {
                return Err(Error::IllegalOperand { reason: "LODS source must be memory" });
            };
            push_string_segment_prefix(out, src);
            let width = src.pointer_size.bits();
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(if src.pointer_size == PointerSize::Byte { 0xAC } else { 0xAD });
            Ok(())
        }
        Mnemonic::Scas => {
            let Operand::Mem(dst) = operand(insn, 1)? else {
                return Err(Error::IllegalOperand { reason: "SCAS operand must be memory" });
            };
            let width = dst.pointer_size.bits();
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(if dst.pointer_size == PointerSize::Byte { 0xAE } else { 0xAF });
            Ok(())
        }
        Mnemonic::Cmps => {
            let Operand::Mem(src1) = operand(insn, 0)? else {
                return Err(Error::IllegalOperand { reason: "CMPS operand must be memory" });
            };
            push_string_segment_prefix(out, src1);
            let width = src1.pointer_size.bits();
            push_rex_if_needed(out, width == 64, false, false, false, false);
            out.push(if src1.pointer_size == PointerSize::Byte { 0xA6 } else { 0xA7 });
            Ok(())
        }
        _ => unreachable!(),
    }
}

fn push_string_segment_prefix(out: &mut Vec<u8>, mem: &Indirect) {
    if let Some(seg) = mem.segment {
        if seg != Register::Ds {
            out.push(segment_prefix_byte(seg));
        }
    }
}

fn encode_jmp(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match operand(insn, 0)? {
        Operand::Rel(r) if (i8::MIN as i32..=i8::MAX as i32).contains(r) && insn_is_short_form(insn) => {
            out.push(0xEB);
            out.push(*r as i8 as u8);
            Ok(())
        }
        Operand::Rel(r) => {
            out.push(0xE9);
            out.extend(r.to_le_bytes());
            Ok(())
        }
        rm @ (Operand::Reg(_) | Operand::Mem(_)) => encode_digit_rm(out, &[0xFF], 4, rm, false, false),
        _ => Err(Error::IllegalOperand { reason: "unsupported JMP operand" }),
    }
}

fn encode_call(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match operand(insn, 0)? {
        Operand::Rel(r) => {
            out.push(0xE8);
            out.extend(r.to_le_bytes());
            Ok(())
        }
        rm @ (Operand::Reg(_) | Operand::Mem(_)) => encode_digit_rm(out, &[0xFF], 2, rm, false, false),
        _ => Err(Error::IllegalOperand { reason: "unsupported CALL operand" }),
    }
}

fn encode_ret(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match insn.operand(0) {
        None => {
            out.push(0xC3);
            Ok(())
        }
        Some(Operand::Imm(imm)) => {
            out.push(0xC2);
            push_imm_bytes(out, imm.value, 16);
            Ok(())
        }
        _ => Err(Error::IllegalOperand { reason: "unsupported RET operand" }),
    }
}

fn encode_prefetchnta(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let rm = operand(insn, 0)?;
    if !matches!(rm, Operand::Mem(_)) {
        return Err(Error::IllegalOperand { reason: "PREFETCHNTA requires a memory operand" });
    }
    encode_digit_rm(out, &[0x0F, 0x18], 0, rm, false, false)
}

fn encode_sse_move(insn: &Instruction, out: &mut Vec<u8>, load_opcode: u8, store_opcode: u8) -> Result<()> {
    let mandatory = match insn.mnemonic() {
        Mnemonic::Movdqa => Some(0x66),
        Mnemonic::Movdqu => Some(0xF3),
        _ => None,
    };
    let dst = operand(insn, 0)?;
    let src = operand(insn, 1)?;
    let (opcode, reg, rm) = match (dst, src) {
        (Operand::Reg(r), rm @ (Operand::Reg(_) | Operand::Mem(_))) => (load_opcode, *r, rm),
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(r)) => (store_opcode, *r, rm),
        _ => return Err(Error::IllegalOperand { reason: "unsupported SSE move operands" }),
    };
    if let Some(b) = mandatory {
        out.push(b);
    }
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, false, reg.encoding() >= 8, rm_enc.rex_x, rm_enc.rex_b, false);
    out.extend([0x0F, opcode]);
    push_modrm(out, reg.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn encode_sse_alu_2op(insn: &Instruction, out: &mut Vec<u8>, opcode: u8) -> Result<()> {
    let Operand::Reg(reg) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "expected an XMM destination register" });
    };
    let rm = operand(insn, 1)?;
    out.push(0x66);
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, false, reg.encoding() >= 8, rm_enc.rex_x, rm_enc.rex_b, false);
    out.extend([0x0F, opcode]);
    push_modrm(out, reg.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn encode_movd_movq(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let rex_w = insn.mnemonic() == Mnemonic::Movq;
    let dst = operand(insn, 0)?;
    let src = operand(insn, 1)?;
    let (opcode, xmm, rm) = match (dst, src) {
        (Operand::Reg(r), rm @ (Operand::Reg(_) | Operand::Mem(_))) if is_xmm(r) => (0x6E, *r, rm),
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(r)) if is_xmm(r) => (0x7E, *r, rm),
        _ => return Err(Error::IllegalOperand { reason: "unsupported MOVD/MOVQ operands" }),
    };
    out.push(0x66);
    let rm_enc = encode_rm(rm)?;
    push_rex_if_needed(out, rex_w, xmm.encoding() >= 8, rm_enc.rex_x, rm_enc.rex_b, false);
    out.extend([0x0F, opcode]);
    push_modrm(out, xmm.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn is_xmm(r: &Register) -> bool {
    matches!(r.class(), crate::reg::RegisterClass::Xmm)
}

fn vector_length_of(r: Register) -> Option<crate::coding::VectorLength> {
    match r.class() {
        crate::reg::RegisterClass::Xmm => Some(crate::coding::VectorLength::L128),
        crate::reg::RegisterClass::Ymm => Some(crate::coding::VectorLength::L256),
        crate::reg::RegisterClass::Zmm => Some(crate::coding::VectorLength::L512),
        _ => None,
    }
}

fn encode_vex_move(insn: &Instruction, out: &mut Vec<u8>, pp: u8, load_opcode: u8, store_opcode: u8) -> Result<()> {
    let dst = operand(insn, 0)?;
    let src = operand(insn, 1)?;
    let (opcode, reg, rm) = match (dst, src) {
        (Operand::Reg(r), rm @ (Operand::Reg(_) | Operand::Mem(_))) => (load_opcode, *r, rm),
        (rm @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Reg(r)) => (store_opcode, *r, rm),
        _ => return Err(Error::IllegalOperand { reason: "unsupported VEX move operands" }),
    };
    let length = vector_length_of(reg).ok_or(Error::IllegalOperand {
        reason: "VEX move requires an XMM/YMM register operand",
    })?;
    let rm_enc = push_vex(out, reg, rm, 0, length, pp)?;
    out.push(opcode);
    push_modrm(out, reg.encoding() & 0b111, &rm_enc);
    Ok(())
}

fn encode_vpxor(insn: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    let Operand::Reg(dst) = *operand(insn, 0)? else {
        return Err(Error::IllegalOperand { reason: "VPXOR destination must be a register" });
    };
    let Operand::Reg(vvvv) = *operand(insn, 1)? else {
        return Err(Error::IllegalOperand { reason: "VPXOR's second operand must be a register" });
    };
    let rm = operand(insn, 2)?;
    let length = vector_length_of(dst).ok_or(Error::IllegalOperand {
        reason: "VPXOR requires XMM/YMM register operands",
    })?;
    let rm_enc = push_vex(out, dst, rm, vvvv.encoding(), length, 0x66)?;
    out.push(0xEF);
    push_modrm(out, dst.encoding() & 0b111, &rm_enc);
    Ok(())
}

/// Emit a VEX prefix for `reg`/`rm`/`vvvv_reg` (`vvvv_reg` is 0 when the
/// operand is unused, per the encoding convention of inverting an all-0
/// register into an all-1 vvvv field). Picks the 2-byte form (`0xC5`)
/// whenever VEX.X/VEX.B would both be unset, the 3-byte form (`0xC4`)
/// otherwise — mirroring the decoder's two constructors (§4.3.4).
/// Returns the r/m encoding so the caller can still push ModR/M/SIB/disp.
fn push_vex(
    out: &mut Vec<u8>,
    reg: Register,
    rm: &Operand,
    vvvv_reg: u8,
    length: crate::coding::VectorLength,
    mandatory_prefix: u8,
) -> Result<RmEncoding> {
    let rm_enc = encode_rm(rm)?;
    let r_ext = reg.encoding() >= 8;
    let l_bit = if length == crate::coding::VectorLength::L256 { 0b100 } else { 0 };
    let pp_bits = mandatory_prefix_to_pp(mandatory_prefix);
    let vvvv_inv = (!vvvv_reg) & 0x0f;

    if !rm_enc.rex_x && !rm_enc.rex_b {
        let r_bit = if r_ext { 0 } else { 0x80 };
        let byte2 = r_bit | (vvvv_inv << 3) | l_bit | pp_bits;
        out.extend([0xC5, byte2]);
    } else {
        let r_bit = if r_ext { 0 } else { 0x80 };
        let x_bit = if rm_enc.rex_x { 0 } else { 0x40 };
        let b_bit = if rm_enc.rex_b { 0 } else { 0x20 };
        let byte2 = r_bit | x_bit | b_bit | 0b0_0001; // mmmmm = 1 (the 0F map)
        let byte3 = (vvvv_inv << 3) | l_bit | pp_bits;
        out.extend([0xC4, byte2, byte3]);
    }
    Ok(rm_enc)
}

fn mandatory_prefix_to_pp(legacy_byte: u8) -> u8 {
    match legacy_byte {
        0x66 => 0b01,
        0xF3 => 0b10,
        0xF2 => 0b11,
        _ => 0b00,
    }
}
