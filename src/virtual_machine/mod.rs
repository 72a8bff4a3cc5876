//! Virtual CPU with a byte-addressed 32-bit memory, and its assembler.
//!
//! # Architecture
//!
//! - **Registers**: seven general 32-bit registers `F0`..`F6` plus the program
//!   counter `XX`, and one condition flag
//! - **Memory**: sparse and big-endian; bytes never written read as a random
//!   value that then stays fixed
//! - **Instruction format**: one opcode byte followed by two or three ModRM
//!   operands, each with 0 to 4 trailing bytes
//! - **Control flow**: there are no jump instructions; writing `XX` jumps, and
//!   `MALKRZ` after a comparison makes the jump conditional
//! - **Termination**: the run ends when `XX` reaches the return sentinel, which
//!   is preset at `[F5]`
//!
//! # Modules
//!
//! - [`assembler`]: Program builder, label resolution, and the text front end
//! - [`errors`]: Assembly and execution error types
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`operand`]: ModRM operand encoding/decoding
//! - [`program`]: Flat binary program images
//! - [`vm`]: Execution engine, memory, registers and execution profile

pub mod assembler;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod program;
pub mod vm;
