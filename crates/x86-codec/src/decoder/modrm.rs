//! ModR/M and SIB decoding (§4.3.6).

use crate::coding::{log2_to_scale, VexPrefix};
use crate::error::Error;
use crate::operand::{Displacement, DisplacementWidth, Indirect, PointerSize};
use crate::reader::Reader;
use crate::reg::Register;

/// The effective REX-equivalent bits, uniform across plain REX, VEX, and
/// EVEX (§4.3.4: "the decoder parses these bytes into the same internal
/// effective prefix record").
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveRex {
    pub r: bool,
    pub x: bool,
    pub b: bool,
    /// EVEX.R': 5th bit of ModR/M.reg, for registers 16..=31.
    pub r_prime: bool,
    pub is_evex: bool,
}

impl EffectiveRex {
    pub fn from_rex(rex: Option<crate::coding::Rex>) -> EffectiveRex {
        match rex {
            Some(r) => EffectiveRex {
                r: r.r,
                x: r.x,
                b: r.b,
                r_prime: false,
                is_evex: false,
            },
            None => EffectiveRex::default(),
        }
    }

    pub fn from_vex(vex: &VexPrefix) -> EffectiveRex {
        EffectiveRex {
            r: vex.r,
            x: vex.x,
            b: vex.b,
            r_prime: vex.evex.map(|e| e.r_prime).unwrap_or(false),
            is_evex: vex.is_evex(),
        }
    }
}

pub enum RmField {
    /// Full 0..=31 register encoding (0..=15 outside EVEX).
    Reg(u8),
    Mem(Indirect),
}

pub struct DecodedModRm {
    /// Full 0..=31 ModR/M.reg encoding (0..=15 outside EVEX).
    pub reg: u8,
    pub rm: RmField,
}

/// Decode a ModR/M byte, and its SIB/displacement if it names memory.
///
/// `pointer_size` is attached to any produced [`Indirect`] so the printer
/// can advertise the right keyword; it does not affect which bytes are
/// consumed. `address_size_64` selects whether base/index registers are
/// 64-bit (default in long mode) or 32-bit (0x67 override, §4.3.6).
pub fn decode_modrm(
    reader: &mut Reader,
    eff: EffectiveRex,
    segment_override: Option<Register>,
    pointer_size: PointerSize,
    address_size_64: bool,
) -> Result<DecodedModRm, Error> {
    let byte = reader.read_u8()?;
    let md = byte >> 6;
    let reg_low = (byte >> 3) & 0b111;
    let rm_low = byte & 0b111;
    let reg = reg_low | ((eff.r as u8) << 3) | ((eff.r_prime as u8) << 4);

    if md == 0b11 {
        let fifth_bit = if eff.is_evex { (eff.x as u8) << 4 } else { 0 };
        let rm_full = rm_low | ((eff.b as u8) << 3) | fifth_bit;
        return Ok(DecodedModRm {
            reg,
            rm: RmField::Reg(rm_full),
        });
    }

    let addr_width = if address_size_64 { 64 } else { 32 };
    let mut base: Option<Register> = None;
    let mut index: Option<Register> = None;
    let mut scale: Option<u8> = None;
    let mut displacement: Option<Displacement> = None;

    if rm_low == 0b100 {
        let sib = reader.read_u8()?;
        let scale_log2 = sib >> 6;
        let idx_low = (sib >> 3) & 0b111;
        let base_low = sib & 0b111;

        let has_index = !(idx_low == 0b100 && !eff.x);
        if has_index {
            let idx_full = idx_low | ((eff.x as u8) << 3);
            index = Some(Register::gp(addr_width, idx_full, true));
            scale = Some(log2_to_scale(scale_log2));
        }

        if md == 0b00 && base_low == 0b101 {
            let d = reader.read_i32_le()?;
            displacement = Some(Displacement::new(d, DisplacementWidth::Dword));
        } else {
            let base_full = base_low | ((eff.b as u8) << 3);
            base = Some(Register::gp(addr_width, base_full, true));
            displacement = read_disp_for_mod(reader, md)?;
        }
    } else if md == 0b00 && rm_low == 0b101 {
        let d = reader.read_i32_le()?;
        base = Some(if address_size_64 {
            Register::Rip
        } else {
            Register::Eip
        });
        displacement = Some(Displacement::new(d, DisplacementWidth::Dword));
    } else {
        let base_full = rm_low | ((eff.b as u8) << 3);
        base = Some(Register::gp(addr_width, base_full, true));
        displacement = read_disp_for_mod(reader, md)?;
    }

    let mut builder = Indirect::builder().pointer_size(pointer_size);
    if let Some(seg) = segment_override {
        builder = builder.segment(seg);
    }
    if let Some(b) = base {
        builder = builder.base(b);
    }
    if let Some(i) = index {
        builder = builder.index(i);
    }
    if let Some(s) = scale {
        builder = builder.scale(s);
    }
    if let Some(d) = displacement {
        builder = builder.displacement(d);
    }
    let mem = builder.build().map_err(|_| Error::IllegalOperand {
        reason: "ModR/M named a structurally invalid memory operand",
    })?;

    Ok(DecodedModRm {
        reg,
        rm: RmField::Mem(mem),
    })
}

fn read_disp_for_mod(reader: &mut Reader, md: u8) -> Result<Option<Displacement>, Error> {
    match md {
        0b01 => {
            let d = reader.read_i8()? as i32;
            Ok(Some(Displacement::new(d, DisplacementWidth::Byte)))
        }
        0b10 => {
            let d = reader.read_i32_le()?;
            Ok(Some(Displacement::new(d, DisplacementWidth::Dword)))
        }
        _ => Ok(None),
    }
}
