//! The closed, flat set of x86-64 registers (§3 DATA MODEL).
//!
//! Each register carries its class, its width in bits, and its 0..=31
//! encoding index. The encoding index is what ModR/M.reg, ModR/M.rm,
//! SIB.base, SIB.index and opcode-embedded-register fields all name; the
//! REX/VEX/EVEX extension bits supply the top bit(s) on top of it.

use std::fmt;

/// Partition of the register set used to validate operand combinations
/// (e.g. base/index width equality) and to pick ModR/M encoding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// AL, CL, ..., R15B — addressable with or without a REX prefix.
    Gp8,
    /// AH, CH, DH, BH — only addressable when no REX prefix is present.
    Gp8High,
    Gp16,
    Gp32,
    Gp64,
    Segment,
    Mmx,
    Xmm,
    Ymm,
    Zmm,
}

macro_rules! registers {
    ($($variant:ident => $class:ident, $index:expr, $width:expr, $text:literal);* $(;)?) => {
        /// A single named register. See module docs for the encoding model.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum Register {
            $($variant),*
        }

        impl Register {
            pub fn class(self) -> RegisterClass {
                match self { $(Register::$variant => RegisterClass::$class),* }
            }

            /// 0..=31 encoding index named by ModR/M/SIB/opcode-embedded fields.
            /// For `Gp8High` this is 4..=7, same bit pattern as SPL/BPL/SIL/DIL;
            /// REX presence is what disambiguates the two at decode/encode time.
            pub fn encoding(self) -> u8 {
                match self { $(Register::$variant => $index),* }
            }

            pub fn width_bits(self) -> u16 {
                match self { $(Register::$variant => $width),* }
            }

            pub fn name(self) -> &'static str {
                match self { $(Register::$variant => $text),* }
            }
        }
    };
}

registers! {
    // 8-bit, REX-addressable (index 0..=7 without REX names AL..BH's low nibble,
    // index 4..=7 *with* REX names SPL/BPL/SIL/DIL instead of AH/CH/DH/BH).
    Al  => Gp8, 0, 8, "al";
    Cl  => Gp8, 1, 8, "cl";
    Dl  => Gp8, 2, 8, "dl";
    Bl  => Gp8, 3, 8, "bl";
    Spl => Gp8, 4, 8, "spl";
    Bpl => Gp8, 5, 8, "bpl";
    Sil => Gp8, 6, 8, "sil";
    Dil => Gp8, 7, 8, "dil";
    R8b  => Gp8, 8, 8, "r8b";
    R9b  => Gp8, 9, 8, "r9b";
    R10b => Gp8, 10, 8, "r10b";
    R11b => Gp8, 11, 8, "r11b";
    R12b => Gp8, 12, 8, "r12b";
    R13b => Gp8, 13, 8, "r13b";
    R14b => Gp8, 14, 8, "r14b";
    R15b => Gp8, 15, 8, "r15b";

    // 8-bit, high-byte, no-REX-only.
    Ah => Gp8High, 4, 8, "ah";
    Ch => Gp8High, 5, 8, "ch";
    Dh => Gp8High, 6, 8, "dh";
    Bh => Gp8High, 7, 8, "bh";

    // 16-bit.
    Ax  => Gp16, 0, 16, "ax";
    Cx  => Gp16, 1, 16, "cx";
    Dx  => Gp16, 2, 16, "dx";
    Bx  => Gp16, 3, 16, "bx";
    Sp  => Gp16, 4, 16, "sp";
    Bp  => Gp16, 5, 16, "bp";
    Si  => Gp16, 6, 16, "si";
    Di  => Gp16, 7, 16, "di";
    R8w  => Gp16, 8, 16, "r8w";
    R9w  => Gp16, 9, 16, "r9w";
    R10w => Gp16, 10, 16, "r10w";
    R11w => Gp16, 11, 16, "r11w";
    R12w => Gp16, 12, 16, "r12w";
    R13w => Gp16, 13, 16, "r13w";
    R14w => Gp16, 14, 16, "r14w";
    R15w => Gp16, 15, 16, "r15w";

    // 32-bit, plus EIP (base-only, RIP-relative is named separately below).
    Eax  => Gp32, 0, 32, "eax";
    Ecx  => Gp32, 1, 32, "ecx";
    Edx  => Gp32, 2, 32, "edx";
    Ebx  => Gp32, 3, 32, "ebx";
    Esp  => Gp32, 4, 32, "esp";
    Ebp  => Gp32, 5, 32, "ebp";
    Esi  => Gp32, 6, 32, "esi";
    Edi  => Gp32, 7, 32, "edi";
    R8d  => Gp32, 8, 32, "r8d";
    R9d  => Gp32, 9, 32, "r9d";
    R10d => Gp32, 10, 32, "r10d";
    R11d => Gp32, 11, 32, "r11d";
    R12d => Gp32, 12, 32, "r12d";
    R13d => Gp32, 13, 32, "r13d";
    R14d => Gp32, 14, 32, "r14d";
    R15d => Gp32, 15, 32, "r15d";
    Eip  => Gp32, 5, 32, "eip";

    // 64-bit, plus RIP.
    Rax => Gp64, 0, 64, "rax";
    Rcx => Gp64, 1, 64, "rcx";
    Rdx => Gp64, 2, 64, "rdx";
    Rbx => Gp64, 3, 64, "rbx";
    Rsp => Gp64, 4, 64, "rsp";
    Rbp => Gp64, 5, 64, "rbp";
    Rsi => Gp64, 6, 64, "rsi";
    Rdi => Gp64, 7, 64, "rdi";
    R8  => Gp64, 8, 64, "r8";
    R9  => Gp64, 9, 64, "r9";
    R10 => Gp64, 10, 64, "r10";
    R11 => Gp64, 11, 64, "r11";
    R12 => Gp64, 12, 64, "r12";
    R13 => Gp64, 13, 64, "r13";
    R14 => Gp64, 14, 64, "r14";
    R15 => Gp64, 15, 64, "r15";
    Rip => Gp64, 5, 64, "rip";

    // Segments.
    Es => Segment, 0, 16, "es";
    Cs => Segment, 1, 16, "cs";
    Ss => Segment, 2, 16, "ss";
    Ds => Segment, 3, 16, "ds";
    Fs => Segment, 4, 16, "fs";
    Gs => Segment, 5, 16, "gs";

    // MMX.
    Mm0 => Mmx, 0, 64, "mm0";
    Mm1 => Mmx, 1, 64, "mm1";
    Mm2 => Mmx, 2, 64, "mm2";
    Mm3 => Mmx, 3, 64, "mm3";
    Mm4 => Mmx, 4, 64, "mm4";
    Mm5 => Mmx, 5, 64, "mm5";
    Mm6 => Mmx, 6, 64, "mm6";
    Mm7 => Mmx, 7, 64, "mm7";

    // XMM (0..15; XMM16..31 need EVEX and are out of the tested set, §3).
    Xmm0  => Xmm, 0, 128, "xmm0";
    Xmm1  => Xmm, 1, 128, "xmm1";
    Xmm2  => Xmm, 2, 128, "xmm2";
    Xmm3  => Xmm, 3, 128, "xmm3";
    Xmm4  => Xmm, 4, 128, "xmm4";
    Xmm5  => Xmm, 5, 128, "xmm5";
    Xmm6  => Xmm, 6, 128, "xmm6";
    Xmm7  => Xmm, 7, 128, "xmm7";
    Xmm8  => Xmm, 8, 128, "xmm8";
    Xmm9  => Xmm, 9, 128, "xmm9";
    Xmm10 => Xmm, 10, 128, "xmm10";
    Xmm11 => Xmm, 11, 128, "xmm11";
    Xmm12 => Xmm, 12, 128, "xmm12";
    Xmm13 => Xmm, 13, 128, "xmm13";
    Xmm14 => Xmm, 14, 128, "xmm14";
    Xmm15 => Xmm, 15, 128, "xmm15";

    // YMM (0..15).
    Ymm0  => Ymm, 0, 256, "ymm0";
    Ymm1  => Ymm, 1, 256, "ymm1";
    Ymm2  => Ymm, 2, 256, "ymm2";
    Ymm3  => Ymm, 3, 256, "ymm3";
    Ymm4  => Ymm, 4, 256, "ymm4";
    Ymm5  => Ymm, 5, 256, "ymm5";
    Ymm6  => Ymm, 6, 256, "ymm6";
    Ymm7  => Ymm, 7, 256, "ymm7";
    Ymm8  => Ymm, 8, 256, "ymm8";
    Ymm9  => Ymm, 9, 256, "ymm9";
    Ymm10 => Ymm, 10, 256, "ymm10";
    Ymm11 => Ymm, 11, 256, "ymm11";
    Ymm12 => Ymm, 12, 256, "ymm12";
    Ymm13 => Ymm, 13, 256, "ymm13";
    Ymm14 => Ymm, 14, 256, "ymm14";
    Ymm15 => Ymm, 15, 256, "ymm15";

    // ZMM (0..31).
    Zmm0  => Zmm, 0, 512, "zmm0";
    Zmm1  => Zmm, 1, 512, "zmm1";
    Zmm2  => Zmm, 2, 512, "zmm2";
    Zmm3  => Zmm, 3, 512, "zmm3";
    Zmm4  => Zmm, 4, 512, "zmm4";
    Zmm5  => Zmm, 5, 512, "zmm5";
    Zmm6  => Zmm, 6, 512, "zmm6";
    Zmm7  => Zmm, 7, 512, "zmm7";
    Zmm8  => Zmm, 8, 512, "zmm8";
    Zmm9  => Zmm, 9, 512, "zmm9";
    Zmm10 => Zmm, 10, 512, "zmm10";
    Zmm11 => Zmm, 11, 512, "zmm11";
    Zmm12 => Zmm, 12, 512, "zmm12";
    Zmm13 => Zmm, 13, 512, "zmm13";
    Zmm14 => Zmm, 14, 512, "zmm14";
    Zmm15 => Zmm, 15, 512, "zmm15";
    Zmm16 => Zmm, 16, 512, "zmm16";
    Zmm17 => Zmm, 17, 512, "zmm17";
    Zmm18 => Zmm, 18, 512, "zmm18";
    Zmm19 => Zmm, 19, 512, "zmm19";
    Zmm20 => Zmm, 20, 512, "zmm20";
    Zmm21 => Zmm, 21, 512, "zmm21";
    Zmm22 => Zmm, 22, 512, "zmm22";
    Zmm23 => Zmm, 23, 512, "zmm23";
    Zmm24 => Zmm, 24, 512, "zmm24";
    Zmm25 => Zmm, 25, 512, "zmm25";
    Zmm26 => Zmm, 26, 512, "zmm26";
    Zmm27 => Zmm, 27, 512, "zmm27";
    Zmm28 => Zmm, 28, 512, "zmm28";
    Zmm29 => Zmm, 29, 512, "zmm29";
    Zmm30 => Zmm, 30, 512, "zmm30";
    Zmm31 => Zmm, 31, 512, "zmm31";
}

impl Register {
    pub fn is_high_byte(self) -> bool {
        matches!(self.class(), RegisterClass::Gp8High)
    }

    /// True for EIP/RIP: these only ever appear as the `base` of an
    /// [`crate::operand::Indirect`], never as a normal register operand.
    pub fn is_instruction_pointer(self) -> bool {
        matches!(self, Register::Eip | Register::Rip)
    }

    /// The dedicated 8-bit registers that require a REX prefix to name
    /// even when none of W/R/X/B would otherwise be set (§4.4 rule 4).
    pub fn is_new_8bit(self) -> bool {
        matches!(
            self,
            Register::Spl | Register::Bpl | Register::Sil | Register::Dil
        ) || (self.class() == RegisterClass::Gp8 && self.encoding() >= 8)
    }

    /// General-purpose register by (width in bits, encoding index,
    /// REX-extended). Used by the decoder, which only ever knows the
    /// numeric encoding and must reconstruct the symbolic register.
    pub fn gp(width_bits: u16, encoding: u8, rex_present: bool) -> Register {
        match width_bits {
            8 if !rex_present && (4..=7).contains(&encoding) => GP8_HIGH[(encoding - 4) as usize],
            8 => GP8[encoding as usize],
            16 => GP16[encoding as usize],
            32 => GP32[encoding as usize],
            64 => GP64[encoding as usize],
            other => panic!("invalid general-purpose register width: {other}"),
        }
    }

    pub fn segment(encoding: u8) -> Register {
        SEGMENTS[encoding as usize]
    }

    pub fn xmm(encoding: u8) -> Register {
        XMM[encoding as usize]
    }

    pub fn ymm(encoding: u8) -> Register {
        YMM[encoding as usize]
    }

    pub fn zmm(encoding: u8) -> Register {
        ZMM[encoding as usize]
    }

    pub fn mmx(encoding: u8) -> Register {
        MMX[encoding as usize]
    }
}

use Register::*;

const GP8: [Register; 16] = [
    Al, Cl, Dl, Bl, Spl, Bpl, Sil, Dil, R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
];
const GP8_HIGH: [Register; 4] = [Ah, Ch, Dh, Bh];
const GP16: [Register; 16] = [
    Ax, Cx, Dx, Bx, Sp, Bp, Si, Di, R8w, R9w, R10w, R11w, R12w, R13w, R14w, R15w,
];
const GP32: [Register; 16] = [
    Eax, Ecx, Edx, Ebx, Esp, Ebp, Esi, Edi, R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d,
];
const GP64: [Register; 16] = [
    Rax, Rcx, Rdx, Rbx, Rsp, Rbp, Rsi, Rdi, R8, R9, R10, R11, R12, R13, R14, R15,
];
const SEGMENTS: [Register; 6] = [Es, Cs, Ss, Ds, Fs, Gs];
const MMX: [Register; 8] = [Mm0, Mm1, Mm2, Mm3, Mm4, Mm5, Mm6, Mm7];
const XMM: [Register; 16] = [
    Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7, Xmm8, Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14,
    Xmm15,
];
const YMM: [Register; 16] = [
    Ymm0, Ymm1, Ymm2, Ymm3, Ymm4, Ymm5, Ymm6, Ymm7, Ymm8, Ymm9, Ymm10, Ymm11, Ymm12, Ymm13, Ymm14,
    Ymm15,
];
const ZMM: [Register; 32] = [
    Zmm0, Zmm1, Zmm2, Zmm3, Zmm4, Zmm5, Zmm6, Zmm7, Zmm8, Zmm9, Zmm10, Zmm11, Zmm12, Zmm13, Zmm14,
    Zmm15, Zmm16, Zmm17, Zmm18, Zmm19, Zmm20, Zmm21, Zmm22, Zmm23, Zmm24, Zmm25, Zmm26, Zmm27,
    Zmm28, Zmm29, Zmm30, Zmm31,
];

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
