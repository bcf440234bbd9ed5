//! A bidirectional codec for the Intel 64 (x86-64) instruction set:
//! decode a byte stream into symbolic instructions, and re-encode any
//! such instruction back into its canonical bytes. A secondary Intel
//! syntax parser/printer (`syntax`) converts between text and the same
//! symbolic form.
//!
//! This crate implements 64-bit (long) mode only. It does not emulate
//! execution (no register/flag/memory state), does not resolve
//! assembler-level symbols (labels, relocations, sections), and does not
//! check semantic legality beyond what the encoding itself requires.

pub mod coding;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod instruction;
pub mod operand;
pub mod reader;
pub mod reg;
pub mod syntax;

pub use decoder::{decode_all, decode_one};
pub use encoder::encode;
pub use error::{ConstructionError, Error, Result};
pub use instruction::Instruction;
pub use reader::Reader;
