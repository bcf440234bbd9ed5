//! Static opcode descriptor data (§4.3.1, §9: "a table of descriptors,
//! not a chain of if/else on the primary byte"). These are plain `const`
//! arrays rather than a lazily-built structure: every entry is known at
//! compile time, so there is nothing to race on and no initialization
//! order to guard with `OnceLock`.

use crate::instruction::Mnemonic;

/// The eight ALU-group mnemonics share one opcode layout (§4.3.1): a
/// 6-opcode block at `base..=base+5` (r/m8,r8 / r/m,r / r8,r/m8 / r,r/m /
/// al,imm8 / eAX,imm) plus a `/digit` selecting the same operation out of
/// the 0x80/0x81/0x83 immediate-group opcodes.
pub struct ArithDescriptor {
    pub mnemonic: Mnemonic,
    pub block_base: u8,
    pub digit: u8,
}

pub const ARITH_GROUP: [ArithDescriptor; 8] = [
    ArithDescriptor { mnemonic: Mnemonic::Add, block_base: 0x00, digit: 0 },
    ArithDescriptor { mnemonic: Mnemonic::Or, block_base: 0x08, digit: 1 },
    ArithDescriptor { mnemonic: Mnemonic::Adc, block_base: 0x10, digit: 2 },
    ArithDescriptor { mnemonic: Mnemonic::Sbb, block_base: 0x18, digit: 3 },
    ArithDescriptor { mnemonic: Mnemonic::And, block_base: 0x20, digit: 4 },
    ArithDescriptor { mnemonic: Mnemonic::Sub, block_base: 0x28, digit: 5 },
    ArithDescriptor { mnemonic: Mnemonic::Xor, block_base: 0x30, digit: 6 },
    ArithDescriptor { mnemonic: Mnemonic::Cmp, block_base: 0x38, digit: 7 },
];

pub fn arith_by_primary(primary: u8) -> Option<(&'static ArithDescriptor, u8)> {
    for d in ARITH_GROUP.iter() {
        let offset = primary.wrapping_sub(d.block_base);
        if offset <= 0x05 {
            return Some((d, offset));
        }
    }
    None
}

pub fn arith_by_digit(digit: u8) -> Option<&'static ArithDescriptor> {
    ARITH_GROUP.iter().find(|d| d.digit == digit)
}

/// The shift/rotate group sharing opcodes 0xC0/0xC1/0xD0-0xD3, selected
/// by ModR/M.reg as a `/digit` (§4.3.1).
pub const SHIFT_GROUP: [(Mnemonic, u8); 5] = [
    (Mnemonic::Rol, 0),
    (Mnemonic::Ror, 1),
    (Mnemonic::Shl, 4),
    (Mnemonic::Shr, 5),
    (Mnemonic::Sar, 7),
];

pub fn shift_by_digit(digit: u8) -> Option<Mnemonic> {
    SHIFT_GROUP
        .iter()
        .find(|(_, d)| *d == digit)
        .map(|(m, _)| *m)
}

/// 0xF6/0xF7 group: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV by `/digit`. Only the
/// digits this codec implements are listed (§9 coverage).
pub const GROUP3: [(Mnemonic, u8); 5] = [
    (Mnemonic::Test, 0),
    (Mnemonic::Mul, 4),
    (Mnemonic::Imul, 5),
    (Mnemonic::Div, 6),
    (Mnemonic::Idiv, 7),
];

pub fn group3_by_digit(digit: u8) -> Option<Mnemonic> {
    GROUP3.iter().find(|(_, d)| *d == digit).map(|(m, _)| *m)
}
