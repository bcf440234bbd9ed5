//! Golden-corpus and property-based tests against the public API (§8).
//!
//! The corpus file (`tests/vectors/golden.txt`) pairs canonical Intel
//! syntax with the canonical byte sequence; every row must satisfy the
//! three-way round trip every row must satisfy: decode == parse, encode
//! == bytes, and pretty_print(decode) == syntax.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use x86_codec::error::Error;
use x86_codec::instruction::{Condition, Instruction, Mnemonic};
use x86_codec::operand::{Displacement, DisplacementWidth, Indirect, Operand, PointerSize};
use x86_codec::reg::Register;
use x86_codec::syntax::{parse_intel_syntax, pretty_print};
use x86_codec::{decode_all, decode_one, encode, Reader};

struct Row {
    syntax: String,
    bytes: Vec<u8>,
}

fn load_corpus() -> Vec<Row> {
    let text = include_str!("vectors/golden.txt");
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (syntax, byte_col) = line
            .split_once('|')
            .unwrap_or_else(|| panic!("malformed corpus line (missing '|'): {line}"));
        let bytes: Vec<u8> = byte_col
            .split_whitespace()
            .map(|tok| u8::from_str_radix(tok, 16).unwrap_or_else(|_| panic!("bad hex byte {tok:?} in {line:?}")))
            .collect();
        rows.push(Row {
            syntax: syntax.trim().to_string(),
            bytes,
        });
    }
    rows
}

#[test]
fn corpus_is_nonempty() {
    assert!(!load_corpus().is_empty(), "golden.txt produced no rows");
}

#[test]
fn corpus_rows_decode_to_the_parsed_instruction() {
    for row in load_corpus() {
        let mut reader = Reader::new(&row.bytes);
        let decoded = decode_one(&mut reader)
            .unwrap_or_else(|e| panic!("failed to decode {:?} ({}): {e}", row.bytes, row.syntax));
        assert_eq!(reader.position(), row.bytes.len(), "decode of {:?} did not consume all bytes", row.syntax);

        let parsed = parse_intel_syntax(&row.syntax)
            .unwrap_or_else(|e| panic!("failed to parse {:?}: {e}", row.syntax));
        assert_eq!(decoded, parsed, "decode({:?}) != parse({:?})", row.bytes, row.syntax);
    }
}

#[test]
fn corpus_rows_encode_back_to_their_canonical_bytes() {
    for row in load_corpus() {
        let parsed = parse_intel_syntax(&row.syntax)
            .unwrap_or_else(|e| panic!("failed to parse {:?}: {e}", row.syntax));
        let encoded = encode(&parsed).unwrap_or_else(|e| panic!("failed to encode {:?}: {e}", row.syntax));
        assert_eq!(encoded, row.bytes, "encode(parse({:?})) != {:?}", row.syntax, row.bytes);
    }
}

#[test]
fn corpus_rows_pretty_print_back_to_their_syntax() {
    for row in load_corpus() {
        let mut reader = Reader::new(&row.bytes);
        let decoded = decode_one(&mut reader).unwrap();
        assert_eq!(pretty_print(&decoded), row.syntax);
    }
}

#[test]
fn no_two_corpus_rows_collide() {
    let rows = load_corpus();
    for i in 0..rows.len() {
        for j in (i + 1)..rows.len() {
            assert_ne!(rows[i].syntax, rows[j].syntax, "duplicate syntax at rows {i},{j}");
            assert_ne!(rows[i].bytes, rows[j].bytes, "duplicate bytes at rows {i},{j}");
        }
    }
}

#[test]
fn truncated_prefix_of_a_multi_byte_vector_is_insufficient_bytes() {
    for row in load_corpus() {
        if row.bytes.len() < 2 {
            continue;
        }
        let truncated = &row.bytes[..row.bytes.len() - 1];
        let mut reader = Reader::new(truncated);
        match decode_one(&mut reader) {
            Err(Error::InsufficientBytes) => {}
            Err(other) => panic!("truncating {:?} raised {other:?}, not InsufficientBytes", row.syntax),
            Ok(insn) => {
                // A strict prefix of one encoding can legitimately be a
                // complete, different, shorter encoding (e.g. `90` is a
                // full NOP on its own). Only flag it if encoding this
                // shorter instruction right back out would itself equal
                // the original row's full byte sequence, which would mean
                // truncation was silently accepted rather than legitimately
                // reinterpreted.
                let re_encoded = encode(&insn).unwrap();
                assert_ne!(
                    re_encoded, row.bytes,
                    "truncating {:?} decoded cleanly instead of raising InsufficientBytes",
                    row.syntax
                );
            }
        }
    }
}

#[test]
fn decode_all_reports_partial_success_on_a_trailing_truncated_instruction() {
    // `mov rax,rbx` (3 bytes) followed by one more byte belonging to a
    // truncated second instruction (a REX prefix with nothing after it).
    let mut bytes = vec![0x48, 0x89, 0xd8];
    bytes.push(0x48);
    let (insns, failure) = decode_all(&bytes);
    assert_eq!(insns.len(), 1);
    let (offset, err) = failure.expect("trailing truncated byte should surface as a failure");
    assert_eq!(offset, 3);
    assert_eq!(err, Error::InsufficientBytes);
}

#[test]
fn decode_all_on_a_clean_multi_instruction_stream_decodes_everything() {
    // `nop` then `mov rax,rbx`.
    let bytes = [0x90, 0x48, 0x89, 0xd8];
    let (insns, failure) = decode_all(&bytes);
    assert!(failure.is_none());
    assert_eq!(insns.len(), 2);
    assert_eq!(insns[0].mnemonic(), Mnemonic::Nop);
    assert_eq!(insns[1].mnemonic(), Mnemonic::Mov);
}

#[test]
fn mismatched_base_index_width_is_rejected_at_construction() {
    let err = Indirect::builder()
        .pointer_size(PointerSize::Dword)
        .base(Register::Eax)
        .index(Register::Rcx)
        .build()
        .unwrap_err();
    assert_eq!(err, x86_codec::error::ConstructionError::MixedBaseIndexWidth);
}

#[test]
fn jcc_near_form_is_used_when_the_target_does_not_fit_in_eight_bits() {
    let insn = Instruction::new(Mnemonic::Jcc(Condition::E), [Some(Operand::Rel(0x1000)), None, None, None]);
    let bytes = encode(&insn).unwrap();
    assert_eq!(bytes[0], 0x0F);
    assert_eq!(bytes[1], 0x84);
    let mut reader = Reader::new(&bytes);
    assert_eq!(decode_one(&mut reader).unwrap(), insn);
}

fn arbitrary_gp_pair_same_width() -> impl Strategy<Value = (Register, Register)> {
    let gp64 = [
        Register::Rax,
        Register::Rcx,
        Register::Rdx,
        Register::Rbx,
        Register::Rsi,
        Register::Rdi,
        Register::R8,
        Register::R13,
    ];
    (0..gp64.len(), 0..gp64.len()).prop_map(move |(a, b)| (gp64[a], gp64[b]))
}

proptest! {
    /// `decode(encode(i)) == [i]` for any register-to-register MOV: the
    /// universal round-trip invariant (§8), sampled rather than exhaustive.
    #[test]
    fn reg_to_reg_mov_round_trips((dst, src) in arbitrary_gp_pair_same_width()) {
        let insn = Instruction::new(
            Mnemonic::Mov,
            [Some(Operand::Reg(dst)), Some(Operand::Reg(src)), None, None],
        );
        let bytes = encode(&insn).unwrap();
        let (decoded, failure) = decode_all(&bytes);
        prop_assert!(failure.is_none());
        prop_assert_eq!(decoded, vec![insn]);
    }

    /// Every 8-bit-immediate ADD to a 32-bit register round-trips, and the
    /// encoder always picks the shortest legal immediate form (rule 1).
    #[test]
    fn add_with_small_immediate_round_trips(value in -100i32..100, (dst, _src) in arbitrary_gp_pair_same_width()) {
        let imm = x86_codec::operand::Immediate::new(value as i64, 8);
        let insn = Instruction::new(Mnemonic::Add, [Some(Operand::Reg(dst)), Some(Operand::Imm(imm)), None, None]);
        let bytes = encode(&insn).unwrap();
        let mut reader = Reader::new(&bytes);
        let decoded = decode_one(&mut reader).unwrap();
        prop_assert_eq!(decoded.mnemonic(), Mnemonic::Add);
        prop_assert_eq!(decoded.operand(0).copied(), Some(Operand::Reg(dst)));
        let redecoded_imm = decoded.operand(1).and_then(Operand::as_immediate).unwrap();
        prop_assert_eq!(redecoded_imm.value, value as i64);
    }

    /// RIP-relative memory operands always survive a decode/encode round
    /// trip with their displacement pinned at 32 bits (§4.4 rule 6).
    #[test]
    fn rip_relative_round_trips_regardless_of_displacement_magnitude(disp in any::<i32>()) {
        let mem = Indirect::builder()
            .pointer_size(PointerSize::Qword)
            .base(Register::Rip)
            .displacement(Displacement::new(disp, DisplacementWidth::Dword))
            .build()
            .unwrap();
        let insn = Instruction::new(
            Mnemonic::Lea,
            [Some(Operand::Reg(Register::Rax)), Some(Operand::Mem(mem)), None, None],
        );
        let bytes = encode(&insn).unwrap();
        let mut reader = Reader::new(&bytes);
        let decoded = decode_one(&mut reader).unwrap();
        prop_assert_eq!(decoded, insn);
    }
}
