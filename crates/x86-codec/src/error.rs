//! Error taxonomy (spec §7).
//!
//! `Error` is raised by the byte reader, decoder, and encoder. Operand
//! builders raise the disjoint `ConstructionError` instead — the decoder
//! never raises it, only clients assembling instructions by hand can.

use crate::coding::OpcodeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A read would run past the end of the byte slab. Marks truncated
    /// instruction streams; a stream that ends cleanly between
    /// instructions is not an error.
    #[error("insufficient bytes to decode the instruction")]
    InsufficientBytes,

    /// No descriptor in the opcode table matched.
    #[error("unknown opcode 0x{primary:02x} in map {map:?}")]
    UnknownOpcode { primary: u8, map: OpcodeMap },

    /// A field combination the table marks reserved, e.g. mod=11 where
    /// the descriptor demands a memory operand.
    #[error("reserved encoding: {reason}")]
    ReservedEncoding { reason: &'static str },

    /// A structural invariant on operands was violated during decode,
    /// e.g. SIB.index naming RSP where the descriptor forbids it.
    #[error("illegal operand: {reason}")]
    IllegalOperand { reason: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Raised only by [`crate::operand::Indirect::build`] (§9 Design Notes:
/// the source's separate argument/state errors collapse to one
/// discriminated type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("base and index registers must have equal width")]
    MixedBaseIndexWidth,
    #[error("index register may not be the stack pointer")]
    IndexIsStackPointer,
    #[error("scale requires an index register")]
    ScaleWithoutIndex,
    #[error("pointer size is required for a memory operand")]
    MissingPointerSize,
    #[error("register class {0:?} is not valid in this position")]
    IllegalRegisterClass(crate::reg::RegisterClass),
    #[error("scale must be 1, 2, 4, or 8, got {0}")]
    IllegalScale(u8),
    #[error("field `{0}` was set more than once during construction")]
    DuplicateField(&'static str),
}
