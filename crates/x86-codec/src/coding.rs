//! Bit layouts shared by the decoder and the encoder: REX, the two VEX
//! forms, and EVEX (§4.3.3, §4.3.4), plus the ModR/M and SIB byte packing
//! helpers (§4.3.6). Keeping one definition of each layout is what lets
//! `encode(decode(b)) == b` hold structurally rather than by coincidence.

/// Which opcode map a (possibly prefixed) opcode byte is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeMap {
    /// No escape byte.
    OneByte,
    /// `0F xx`.
    TwoByte,
    /// `0F 38 xx`.
    ThreeByte38,
    /// `0F 3A xx`.
    ThreeByte3A,
}

/// Mandatory-prefix / VEX.pp selector: distinguishes opcode variants that
/// share a primary byte but differ by a legacy prefix acting as part of
/// the opcode rather than as a true prefix (§4.3.2, §4.3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MandatoryPrefix {
    None,
    P66,
    PF3,
    PF2,
}

impl MandatoryPrefix {
    pub fn from_pp(pp: u8) -> MandatoryPrefix {
        match pp & 0b11 {
            0 => MandatoryPrefix::None,
            1 => MandatoryPrefix::P66,
            2 => MandatoryPrefix::PF3,
            3 => MandatoryPrefix::PF2,
            _ => unreachable!(),
        }
    }

    pub fn pp(self) -> u8 {
        match self {
            MandatoryPrefix::None => 0,
            MandatoryPrefix::P66 => 1,
            MandatoryPrefix::PF3 => 2,
            MandatoryPrefix::PF2 => 3,
        }
    }
}

/// Vector length selector carried by VEX.L / EVEX.L'L.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorLength {
    L128,
    L256,
    L512,
}

/// REX prefix bits (§4.3.3), decomposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rex {
    pub w: bool,
    pub r: bool,
    pub x: bool,
    pub b: bool,
}

impl Rex {
    pub fn from_byte(byte: u8) -> Option<Rex> {
        if !(0x40..=0x4F).contains(&byte) {
            return None;
        }
        Some(Rex {
            w: byte & 0b1000 != 0,
            r: byte & 0b0100 != 0,
            x: byte & 0b0010 != 0,
            b: byte & 0b0001 != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        0x40 | (self.w as u8) << 3 | (self.r as u8) << 2 | (self.x as u8) << 1 | (self.b as u8)
    }

    pub fn is_plain(self) -> bool {
        !(self.w || self.r || self.x || self.b)
    }
}

/// The effective VEX/EVEX prefix record (§4.3.4): downstream opcode
/// dispatch consults this uniformly, regardless of which of the three
/// byte encodings (2-byte VEX, 3-byte VEX, EVEX) produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VexPrefix {
    pub map: OpcodeMap,
    pub w: bool,
    /// NDS/NDD register, already un-inverted.
    pub vvvv: u8,
    pub length: VectorLength,
    pub pp: MandatoryPrefix,
    pub r: bool,
    pub x: bool,
    pub b: bool,
    /// Only set by EVEX: R' (ModRM.reg bit 4) and V' (vvvv bit 4), the
    /// opmask register, and the zeroing/merging bit.
    pub evex: Option<EvexFields>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvexFields {
    pub r_prime: bool,
    pub v_prime: bool,
    pub opmask: u8,
    pub zeroing: bool,
    pub broadcast_or_rc: bool,
}

impl VexPrefix {
    /// `0xC5 byte2`.
    pub fn from_two_byte(byte2: u8) -> VexPrefix {
        VexPrefix {
            map: OpcodeMap::TwoByte,
            w: false,
            vvvv: !(byte2 >> 3) & 0x0f,
            length: if byte2 & 0b100 != 0 {
                VectorLength::L256
            } else {
                VectorLength::L128
            },
            pp: MandatoryPrefix::from_pp(byte2),
            r: byte2 & 0x80 == 0,
            // The 2-byte form has no X/B bits: it can never extend
            // SIB.index or ModR/M.rm/SIB.base.
            x: false,
            b: false,
            evex: None,
        }
    }

    /// `0xC4 byte2 byte3`.
    pub fn from_three_byte(byte2: u8, byte3: u8) -> VexPrefix {
        let map = match byte2 & 0b0001_1111 {
            0b00001 => OpcodeMap::TwoByte,
            0b00010 => OpcodeMap::ThreeByte38,
            0b00011 => OpcodeMap::ThreeByte3A,
            _ => OpcodeMap::TwoByte,
        };
        VexPrefix {
            map,
            w: byte3 & 0x80 != 0,
            vvvv: !(byte3 >> 3) & 0x0f,
            length: if byte3 & 0b100 != 0 {
                VectorLength::L256
            } else {
                VectorLength::L128
            },
            pp: MandatoryPrefix::from_pp(byte3),
            r: byte2 & 0x80 == 0,
            x: byte2 & 0x40 == 0,
            b: byte2 & 0x20 == 0,
            evex: None,
        }
    }

    /// `0x62 p0 p1 p2`.
    pub fn from_evex(p0: u8, p1: u8, p2: u8) -> VexPrefix {
        let map = match p0 & 0b11 {
            0b01 => OpcodeMap::TwoByte,
            0b10 => OpcodeMap::ThreeByte38,
            0b11 => OpcodeMap::ThreeByte3A,
            _ => OpcodeMap::TwoByte,
        };
        let length = match (p2 >> 5) & 0b11 {
            0b00 => VectorLength::L128,
            0b01 => VectorLength::L256,
            _ => VectorLength::L512,
        };
        VexPrefix {
            map,
            w: p1 & 0x80 != 0,
            vvvv: !(p1 >> 3) & 0x0f,
            length,
            pp: MandatoryPrefix::from_pp(p1),
            r: p0 & 0x80 == 0,
            x: p0 & 0x40 == 0,
            b: p0 & 0x20 == 0,
            evex: Some(EvexFields {
                r_prime: p0 & 0x10 == 0,
                v_prime: p2 & 0x08 == 0,
                opmask: p2 & 0b111,
                zeroing: p2 & 0x80 != 0,
                broadcast_or_rc: p2 & 0x10 != 0,
            }),
        }
    }

    pub fn is_evex(&self) -> bool {
        self.evex.is_some()
    }

    /// Full (possibly 5-bit, under EVEX) vvvv register encoding.
    pub fn vvvv_full(&self) -> u8 {
        match self.evex {
            Some(e) => self.vvvv | ((e.v_prime as u8) << 4),
            None => self.vvvv,
        }
    }
}

/// Pack a ModR/M byte from its three fields (§4.3.6).
pub fn encode_modrm(mod_bits: u8, reg: u8, rm: u8) -> u8 {
    debug_assert!(mod_bits < 4);
    ((mod_bits & 0b11) << 6) | ((reg & 0b111) << 3) | (rm & 0b111)
}

/// Pack a SIB byte from (scale-as-shift, index, base).
pub fn encode_sib(scale_log2: u8, index: u8, base: u8) -> u8 {
    debug_assert!(scale_log2 < 4);
    ((scale_log2 & 0b11) << 6) | ((index & 0b111) << 3) | (base & 0b111)
}

pub fn scale_to_log2(scale: u8) -> u8 {
    match scale {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        other => panic!("invalid SIB scale: {other}"),
    }
}

pub fn log2_to_scale(log2: u8) -> u8 {
    1u8 << log2
}
