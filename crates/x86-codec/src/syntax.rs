//! Intel-syntax textual front end (§4.5): `parse_intel_syntax` and
//! `pretty_print`. This is a thin collaborator, not part of the codec's
//! hard part — it exists so the golden corpus can carry both a byte
//! column and a readable syntax column, and so the two round-trip
//! against each other (§8).

use thiserror::Error;

use crate::error::ConstructionError;
use crate::instruction::{Condition, Instruction, Mnemonic, Prefix};
use crate::operand::{Displacement, DisplacementWidth, Immediate, Indirect, Operand, PointerSize};
use crate::reg::Register;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("empty instruction text")]
    Empty,
    #[error("unknown mnemonic {0:?}")]
    UnknownMnemonic(String),
    #[error("unknown register {0:?}")]
    UnknownRegister(String),
    #[error("unknown pointer-size keyword {0:?}")]
    UnknownPointerSize(String),
    #[error("malformed memory operand {0:?}")]
    MalformedMemory(String),
    #[error("malformed immediate {0:?}")]
    MalformedImmediate(String),
    #[error("malformed operand {0:?}")]
    MalformedOperand(String),
    #[error("{0}")]
    Construction(#[from] ConstructionError),
}

/// Render an instruction the way the golden corpus and §8 scenarios
/// spell it: `[prefix ]mnemonic op1,op2,...` with no space after the
/// comma, memory operands as `SIZE PTR [seg:base+index*scale+disp]`.
pub fn pretty_print(insn: &Instruction) -> String {
    let mut out = String::new();
    if let Some(prefix) = insn.prefix() {
        out.push_str(prefix.mnemonic());
        out.push(' ');
    }
    out.push_str(&insn.mnemonic().text());

    let operands: Vec<String> = insn.operands().map(format_operand).collect();
    if !operands.is_empty() {
        out.push(' ');
        out.push_str(&operands.join(","));
    }
    out
}

fn format_operand(op: &Operand) -> String {
    match op {
        Operand::Reg(r) | Operand::Seg(r) => r.name().to_string(),
        Operand::Imm(imm) => format_signed_hex(imm.value),
        Operand::Rel(r) => format_signed_hex(*r as i64),
        Operand::Mem(ind) => format_memory(ind),
    }
}

fn format_signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", (value as i128).unsigned_abs())
    } else {
        format!("{value:#x}")
    }
}

fn format_memory(ind: &Indirect) -> String {
    let mut out = String::new();
    out.push_str(ind.pointer_size.keyword());
    out.push_str(" PTR [");
    if let Some(seg) = ind.segment {
        out.push_str(seg.name());
        out.push(':');
    }

    let mut wrote = false;
    if let Some(base) = ind.base {
        out.push_str(base.name());
        wrote = true;
    }
    if let Some(index) = ind.index {
        if wrote {
            out.push('+');
        }
        out.push_str(index.name());
        out.push('*');
        out.push_str(&ind.scale.unwrap_or(1).to_string());
        wrote = true;
    }
    if let Some(disp) = ind.displacement {
        if disp.value >= 0 {
            if wrote {
                out.push('+');
            }
            out.push_str(&format!("{:#x}", disp.value));
        } else {
            out.push_str(&format!("-{:#x}", (disp.value as i64).unsigned_abs()));
        }
    }
    out.push(']');
    out
}

/// Parse the same textual form [`pretty_print`] produces. Not intended to
/// accept arbitrary assembler syntax (comments, labels, directives) — see
/// §4.5/DESIGN.md.
pub fn parse_intel_syntax(text: &str) -> Result<Instruction, SyntaxError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SyntaxError::Empty);
    }

    let (prefix, rest) = match text.split_once(' ') {
        Some(("rep", rest)) => (Some(Prefix::Rep), rest),
        Some(("repnz", rest)) => (Some(Prefix::Repnz), rest),
        Some(("lock", rest)) => (Some(Prefix::Lock), rest),
        _ => (None, text),
    };
    let rest = rest.trim_start();

    let (mnemonic_str, operand_str) = match rest.split_once(' ') {
        Some((m, o)) => (m, o.trim()),
        None => (rest, ""),
    };
    let mnemonic = parse_mnemonic(mnemonic_str)?;

    let mut operands: [Option<Operand>; 4] = [None, None, None, None];
    if !operand_str.is_empty() {
        for (i, part) in operand_str.split(',').enumerate() {
            if i >= 4 {
                break;
            }
            operands[i] = Some(parse_operand(part.trim())?);
        }
    }

    if takes_relative_operand(mnemonic) {
        if let Some(Operand::Imm(imm)) = operands[0] {
            operands[0] = Some(Operand::Rel(imm.value as i32));
        }
    }

    let mut insn = Instruction::new(mnemonic, operands);
    if let Some(p) = prefix {
        insn = insn.with_prefix(p);
    }
    Ok(insn)
}

fn parse_mnemonic(word: &str) -> Result<Mnemonic, SyntaxError> {
    if let Some(m) = fixed_mnemonic(word) {
        return Ok(m);
    }
    if let Some(suffix) = word.strip_prefix("cmov") {
        return condition_from_suffix(suffix).map(Mnemonic::Cmovcc);
    }
    if let Some(suffix) = word.strip_prefix("set") {
        return condition_from_suffix(suffix).map(Mnemonic::Setcc);
    }
    if let Some(suffix) = word.strip_prefix('j') {
        return condition_from_suffix(suffix).map(Mnemonic::Jcc);
    }
    Err(SyntaxError::UnknownMnemonic(word.to_string()))
}

fn fixed_mnemonic(word: &str) -> Option<Mnemonic> {
    Some(match word {
        "add" => Mnemonic::Add,
        "or" => Mnemonic::Or,
        "adc" => Mnemonic::Adc,
        "sbb" => Mnemonic::Sbb,
        "and" => Mnemonic::And,
        "sub" => Mnemonic::Sub,
        "xor" => Mnemonic::Xor,
        "cmp" => Mnemonic::Cmp,
        "mov" => Mnemonic::Mov,
        "movabs" => Mnemonic::Movabs,
        "lea" => Mnemonic::Lea,
        "push" => Mnemonic::Push,
        "pop" => Mnemonic::Pop,
        "inc" => Mnemonic::Inc,
        "dec" => Mnemonic::Dec,
        "nop" => Mnemonic::Nop,
        "test" => Mnemonic::Test,
        "movs" => Mnemonic::Movs,
        "stos" => Mnemonic::Stos,
        "cmps" => Mnemonic::Cmps,
        "scas" => Mnemonic::Scas,
        "lods" => Mnemonic::Lods,
        "jmp" => Mnemonic::Jmp,
        "call" => Mnemonic::Call,
        "ret" => Mnemonic::Ret,
        "imul" => Mnemonic::Imul,
        "mul" => Mnemonic::Mul,
        "div" => Mnemonic::Div,
        "idiv" => Mnemonic::Idiv,
        "shl" => Mnemonic::Shl,
        "shr" => Mnemonic::Shr,
        "sar" => Mnemonic::Sar,
        "rol" => Mnemonic::Rol,
        "ror" => Mnemonic::Ror,
        "movaps" => Mnemonic::Movaps,
        "movups" => Mnemonic::Movups,
        "movdqa" => Mnemonic::Movdqa,
        "movdqu" => Mnemonic::Movdqu,
        "movd" => Mnemonic::Movd,
        "movq" => Mnemonic::Movq,
        "pxor" => Mnemonic::Pxor,
        "vmovdqu" => Mnemonic::Vmovdqu,
        "vmovaps" => Mnemonic::Vmovaps,
        "vpxor" => Mnemonic::Vpxor,
        "cpuid" => Mnemonic::Cpuid,
        "int3" => Mnemonic::Int3,
        "hlt" => Mnemonic::Hlt,
        "prefetchnta" => Mnemonic::Prefetchnta,
        "xadd" => Mnemonic::Xadd,
        "cmpxchg" => Mnemonic::Cmpxchg,
        _ => return None,
    })
}

/// JMP/CALL/Jcc take a branch-target displacement (`Operand::Rel`), which
/// prints identically to a plain immediate (§8) but is a distinct variant
/// `parse_operand` cannot tell apart from its text alone.
fn takes_relative_operand(mnemonic: Mnemonic) -> bool {
    matches!(mnemonic, Mnemonic::Jmp | Mnemonic::Call | Mnemonic::Jcc(_))
}

fn condition_from_suffix(suffix: &str) -> Result<Condition, SyntaxError> {
    Condition::ALL
        .iter()
        .copied()
        .find(|c| c.suffix() == suffix)
        .ok_or_else(|| SyntaxError::UnknownMnemonic(suffix.to_string()))
}

fn parse_operand(text: &str) -> Result<Operand, SyntaxError> {
    if let Some(idx) = text.find(" PTR [") {
        let kw = text[..idx].trim();
        let inner = &text[idx + " PTR [".len()..];
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| SyntaxError::MalformedMemory(text.to_string()))?;
        return parse_memory(kw, inner).map(Operand::Mem);
    }
    if text.starts_with("0x") || text.starts_with("-0x") {
        return parse_immediate(text).map(Operand::Imm);
    }
    register_by_name(text)
        .map(Operand::Reg)
        .ok_or_else(|| SyntaxError::UnknownRegister(text.to_string()))
}

fn parse_immediate(text: &str) -> Result<Immediate, SyntaxError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let digits = digits
        .strip_prefix("0x")
        .ok_or_else(|| SyntaxError::MalformedImmediate(text.to_string()))?;
    let magnitude = u64::from_str_radix(digits, 16)
        .map_err(|_| SyntaxError::MalformedImmediate(text.to_string()))?;
    let value = if negative {
        -(magnitude as i128) as i64
    } else {
        magnitude as i64
    };
    let width_bits = if value == (value as i8) as i64 {
        8
    } else if value == (value as i32) as i64 {
        32
    } else {
        64
    };
    Ok(Immediate::new(value, width_bits))
}

fn parse_pointer_size(kw: &str) -> Result<PointerSize, SyntaxError> {
    Ok(match kw {
        "BYTE" => PointerSize::Byte,
        "WORD" => PointerSize::Word,
        "DWORD" => PointerSize::Dword,
        "QWORD" => PointerSize::Qword,
        "XMMWORD" => PointerSize::XmmWord,
        "YMMWORD" => PointerSize::YmmWord,
        "ZMMWORD" => PointerSize::ZmmWord,
        _ => return Err(SyntaxError::UnknownPointerSize(kw.to_string())),
    })
}

fn parse_memory(kw: &str, inner: &str) -> Result<Indirect, SyntaxError> {
    let pointer_size = parse_pointer_size(kw)?;

    let (segment, addr) = match inner.split_once(':') {
        Some((seg, rest)) => {
            let reg = register_by_name(seg)
                .ok_or_else(|| SyntaxError::UnknownRegister(seg.to_string()))?;
            (Some(reg), rest)
        }
        None => (None, inner),
    };

    let mut builder = Indirect::builder().pointer_size(pointer_size);
    if let Some(seg) = segment {
        builder = builder.segment(seg);
    }

    let terms = split_address_terms(addr);

    // A RIP/EIP base always carries a mandatory 32-bit displacement
    // (`encoder.rs`'s `encode_indirect` rejects anything narrower), unlike
    // an ordinary base where the encoder picks the narrowest width that
    // fits. Scan for the base first so the displacement term below knows
    // which rule applies regardless of where it falls in the address.
    let is_rip_relative = terms.iter().any(|t| {
        !t.is_empty()
            && !t.contains('*')
            && !(t.starts_with("0x") || t.starts_with("-0x"))
            && matches!(register_by_name(t), Some(r) if r.is_instruction_pointer())
    });

    for term in terms {
        if term.is_empty() {
            continue;
        }
        if let Some((reg_str, scale_str)) = term.split_once('*') {
            let reg = register_by_name(reg_str)
                .ok_or_else(|| SyntaxError::UnknownRegister(reg_str.to_string()))?;
            let scale: u8 = scale_str
                .parse()
                .map_err(|_| SyntaxError::MalformedMemory(term.clone()))?;
            builder = builder.index(reg).scale(scale);
        } else if term.starts_with("0x") || term.starts_with("-0x") {
            let imm = parse_immediate(&term)?;
            let width = if is_rip_relative {
                DisplacementWidth::Dword
            } else if imm.value == (imm.value as i8) as i64 {
                DisplacementWidth::Byte
            } else {
                DisplacementWidth::Dword
            };
            builder = builder.displacement(Displacement::new(imm.value as i32, width));
        } else {
            let reg = register_by_name(&term)
                .ok_or_else(|| SyntaxError::UnknownRegister(term.clone()))?;
            builder = builder.base(reg);
        }
    }

    builder.build().map_err(SyntaxError::from)
}

/// Split `base+index*scale+disp`-style text on top-level `+`/`-`, keeping
/// a leading `-` attached to the term it introduces (so `-0x5` parses as
/// one negative-displacement term, not a subtraction).
fn split_address_terms(s: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut cur = String::new();
    for (i, c) in s.char_indices() {
        if i != 0 && (c == '+' || c == '-') {
            terms.push(std::mem::take(&mut cur));
            if c == '-' {
                cur.push('-');
            }
        } else {
            cur.push(c);
        }
    }
    if !cur.is_empty() {
        terms.push(cur);
    }
    terms
}

fn register_by_name(name: &str) -> Option<Register> {
    ALL_REGISTERS.iter().copied().find(|r| r.name() == name)
}

use Register::*;

const ALL_REGISTERS: &[Register] = &[
    Al, Cl, Dl, Bl, Spl, Bpl, Sil, Dil, R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b, Ah, Ch, Dh,
    Bh, Ax, Cx, Dx, Bx, Sp, Bp, Si, Di, R8w, R9w, R10w, R11w, R12w, R13w, R14w, R15w, Eax, Ecx,
    Edx, Ebx, Esp, Ebp, Esi, Edi, R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d, Eip, Rax, Rcx, Rdx,
    Rbx, Rsp, Rbp, Rsi, Rdi, R8, R9, R10, R11, R12, R13, R14, R15, Rip, Es, Cs, Ss, Ds, Fs, Gs,
    Mm0, Mm1, Mm2, Mm3, Mm4, Mm5, Mm6, Mm7, Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7, Xmm8,
    Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14, Xmm15, Ymm0, Ymm1, Ymm2, Ymm3, Ymm4, Ymm5, Ymm6,
    Ymm7, Ymm8, Ymm9, Ymm10, Ymm11, Ymm12, Ymm13, Ymm14, Ymm15, Zmm0, Zmm1, Zmm2, Zmm3, Zmm4,
    Zmm5, Zmm6, Zmm7, Zmm8, Zmm9, Zmm10, Zmm11, Zmm12, Zmm13, Zmm14, Zmm15, Zmm16, Zmm17, Zmm18,
    Zmm19, Zmm20, Zmm21, Zmm22, Zmm23, Zmm24, Zmm25, Zmm26, Zmm27, Zmm28, Zmm29, Zmm30, Zmm31,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reg::Register;

    #[test]
    fn round_trips_register_to_register() {
        let insn = Instruction::new(
            Mnemonic::Mov,
            [Some(Operand::Reg(Register::Rax)), Some(Operand::Reg(Register::Rbx)), None, None],
        );
        let text = pretty_print(&insn);
        assert_eq!(text, "mov rax,rbx");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn round_trips_memory_operand_with_sib() {
        let mem = Indirect::builder()
            .pointer_size(PointerSize::Dword)
            .base(Register::Rbx)
            .index(Register::R12)
            .scale(4)
            .displacement(Displacement::new(0x12345678, DisplacementWidth::Dword))
            .build()
            .unwrap();
        let insn = Instruction::new(Mnemonic::Nop, [Some(Operand::Mem(mem)), None, None, None]);
        let text = pretty_print(&insn);
        assert_eq!(text, "nop DWORD PTR [rbx+r12*4+0x12345678]");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn round_trips_segment_qualified_string_op() {
        let es_rdi = Indirect::builder()
            .pointer_size(PointerSize::Dword)
            .segment(Register::Es)
            .base(Register::Rdi)
            .build()
            .unwrap();
        let ds_rsi = Indirect::builder()
            .pointer_size(PointerSize::Dword)
            .segment(Register::Ds)
            .base(Register::Rsi)
            .build()
            .unwrap();
        let insn = Instruction::new(
            Mnemonic::Movs,
            [Some(Operand::Mem(es_rdi)), Some(Operand::Mem(ds_rsi)), None, None],
        )
        .with_prefix(Prefix::Rep);
        let text = pretty_print(&insn);
        assert_eq!(text, "rep movs DWORD PTR es:[rdi],DWORD PTR ds:[rsi]");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn round_trips_large_immediate() {
        let insn = Instruction::new(
            Mnemonic::Movabs,
            [
                Some(Operand::Reg(Register::Rcx)),
                Some(Operand::Imm(Immediate::new(0x1234567812345678, 64))),
                None,
                None,
            ],
        );
        let text = pretty_print(&insn);
        assert_eq!(text, "movabs rcx,0x1234567812345678");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn round_trips_vex_move() {
        let mem = Indirect::builder()
            .pointer_size(PointerSize::YmmWord)
            .base(Register::Rdi)
            .build()
            .unwrap();
        let insn = Instruction::new(
            Mnemonic::Vmovdqu,
            [Some(Operand::Reg(Register::Ymm1)), Some(Operand::Mem(mem)), None, None],
        );
        let text = pretty_print(&insn);
        assert_eq!(text, "vmovdqu ymm1,YMMWORD PTR [rdi]");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn round_trips_branch_target_as_relative_not_immediate() {
        let insn = Instruction::new(Mnemonic::Jmp, [Some(Operand::Rel(0x10)), None, None, None]);
        let text = pretty_print(&insn);
        assert_eq!(text, "jmp 0x10");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn round_trips_rip_relative_small_displacement_as_dword() {
        let mem = Indirect::builder()
            .pointer_size(PointerSize::Qword)
            .base(Register::Rip)
            .displacement(Displacement::new(0x10, DisplacementWidth::Dword))
            .build()
            .unwrap();
        let insn = Instruction::new(
            Mnemonic::Lea,
            [Some(Operand::Reg(Register::Rax)), Some(Operand::Mem(mem)), None, None],
        );
        let text = pretty_print(&insn);
        assert_eq!(text, "lea rax,QWORD PTR [rip+0x10]");
        assert_eq!(parse_intel_syntax(&text).unwrap(), insn);
    }

    #[test]
    fn rejects_unknown_mnemonic() {
        assert!(parse_intel_syntax("frobnicate rax").is_err());
    }
}
