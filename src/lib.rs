//! Virtual CPU library.
//!
//! Provides the instruction set, an assembler, and the execution engine, plus the
//! logging utilities the command-line tools share.

pub mod utils;
pub mod virtual_machine;
