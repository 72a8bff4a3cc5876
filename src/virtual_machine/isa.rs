//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction list and invokes a callback macro for code generation,
//! so the engine, the assembler and the ISA fingerprint test all expand the same
//! table.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - Mnemonic lookup in both directions, operand arity and [`InstrClass`]
//!
//! # Bytecode Format
//!
//! Every instruction is one opcode byte followed by two or three operands.
//! Each operand is a ModRM byte plus 0, 1, 2 or 4 big-endian trailing bytes,
//! see [`operand`](super::operand).

use crate::virtual_machine::errors::VMError;

/// Invokes a callback macro with the complete instruction definition list.
///
/// Opcode values are part of the binary format: changing one invalidates every
/// previously assembled image.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Arithmetic and logic
            // =========================
            /// ATA a, b ; b = b + a
            Ata = 0x00, "ATA" => [a, b], Arithmetic,
            /// NTA a, b ; b = b - a
            Nta = 0x01, "NTA" => [a, b], Arithmetic,
            /// ADA a, b ; b = b & a
            Ada = 0x02, "ADA" => [a, b], Logic,
            /// EKC a, b ; b = b | a
            Ekc = 0x03, "EKC" => [a, b], Logic,
            /// DTO a, b ; b = b >> a (logical, 0 when a >= 32)
            Dto = 0x04, "DTO" => [a, b], Shift,
            /// DRO a, b ; b = b << a (0 when a >= 32)
            Dro = 0x05, "DRO" => [a, b], Shift,
            /// DTOSNA a, b ; b = b >> a (arithmetic, sign fill when a >= 32)
            Dtosna = 0x06, "DTOSNA" => [a, b], Shift,
            /// DAL a, b ; b = !(b ^ a)
            Dal = 0x07, "DAL" => [a, b], Logic,
            // =========================
            // Transfer
            // =========================
            /// KRZ a, b ; b = a
            Krz = 0x08, "KRZ" => [a, b], Transfer,
            /// MALKRZ a, b ; if flag { b = a }
            Malkrz = 0x09, "MALKRZ" => [a, b], Transfer,
            /// KRZ8I a, b ; b = sign_extend(top byte of a)
            Krz8i = 0x0A, "KRZ8I" => [a, b], Transfer,
            /// KRZ16I a, b ; b = sign_extend(top half-word of a)
            Krz16i = 0x0B, "KRZ16I" => [a, b], Transfer,
            /// KRZ8C a, b ; top byte of b = low byte of a
            Krz8c = 0x0C, "KRZ8C" => [a, b], Transfer,
            /// KRZ16C a, b ; top half-word of b = low half-word of a
            Krz16c = 0x0D, "KRZ16C" => [a, b], Transfer,
            // =========================
            // Comparison
            // =========================
            /// LLONYS a, b ; flag = a > b (unsigned)
            Llonys = 0x10, "LLONYS" => [a, b], Compare,
            /// XTLONYS a, b ; flag = a <= b (unsigned)
            Xtlonys = 0x11, "XTLONYS" => [a, b], Compare,
            /// XOLONYS a, b ; flag = a >= b (unsigned)
            Xolonys = 0x12, "XOLONYS" => [a, b], Compare,
            /// XYLONYS a, b ; flag = a < b (unsigned)
            Xylonys = 0x13, "XYLONYS" => [a, b], Compare,
            /// CLO a, b ; flag = a == b
            Clo = 0x16, "CLO" => [a, b], Compare,
            /// NIV a, b ; flag = a != b
            Niv = 0x17, "NIV" => [a, b], Compare,
            /// LLO a, b ; flag = a > b (signed)
            Llo = 0x18, "LLO" => [a, b], Compare,
            /// XTLO a, b ; flag = a <= b (signed)
            Xtlo = 0x19, "XTLO" => [a, b], Compare,
            /// XOLO a, b ; flag = a >= b (signed)
            Xolo = 0x1A, "XOLO" => [a, b], Compare,
            /// XYLO a, b ; flag = a < b (signed)
            Xylo = 0x1B, "XYLO" => [a, b], Compare,
            // =========================
            // Three-operand
            // =========================
            /// INJ a, b, c ; c = b, b = a
            Inj = 0x20, "INJ" => [a, b, c], Exchange,
            /// LAT a, b, c ; (c, b) = b * a (unsigned 64-bit product)
            Lat = 0x28, "LAT" => [a, b, c], Multiply,
            /// LATSNA a, b, c ; (c, b) = b * a (signed 64-bit product)
            Latsna = 0x29, "LATSNA" => [a, b, c], Multiply,
        }
    };
}

/// Coarse grouping of instructions, used for operand validation and profiling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum InstrClass {
    Arithmetic = 0,
    Logic = 1,
    Shift = 2,
    Transfer = 3,
    Compare = 4,
    Exchange = 5,
    Multiply = 6,
}

impl InstrClass {
    pub const COUNT: usize = 7;

    pub const ALL: [InstrClass; Self::COUNT] = [
        InstrClass::Arithmetic,
        InstrClass::Logic,
        InstrClass::Shift,
        InstrClass::Transfer,
        InstrClass::Compare,
        InstrClass::Exchange,
        InstrClass::Multiply,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            InstrClass::Arithmetic => "Arithmetic",
            InstrClass::Logic => "Logic",
            InstrClass::Shift => "Shift",
            InstrClass::Transfer => "Transfer",
            InstrClass::Compare => "Compare",
            InstrClass::Exchange => "Exchange",
            InstrClass::Multiply => "Multiply",
        }
    }
}

#[macro_export]
macro_rules! define_instructions {
    (@one $field:ident) => { 1 };

    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident ),* $(,)?
            ], $class:ident
        ),* $(,)?
    ) => {
        // =========================
        // VM instruction enum
        // =========================
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        #[repr(u8)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidInstruction {
                        opcode: value,
                        pc: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Looks up an instruction by mnemonic, ignoring ASCII case.
            pub fn from_mnemonic(name: &str) -> Option<Instruction> {
                $(
                    if name.eq_ignore_ascii_case($mnemonic) {
                        return Some(Instruction::$name);
                    }
                )*
                None
            }

            /// Number of ModRM operands following the opcode.
            pub const fn arity(&self) -> usize {
                match self {
                    $( Instruction::$name => 0 $( + $crate::define_instructions!(@one $field) )*, )*
                }
            }

            pub const fn class(&self) -> InstrClass {
                match self {
                    $( Instruction::$name => InstrClass::$class, )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl Instruction {
    /// Whether this instruction only sets the flag instead of writing a destination.
    pub const fn is_comparison(&self) -> bool {
        matches!(self.class(), InstrClass::Compare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_try_from_invalid() {
        assert!(matches!(
            Instruction::try_from(0xFF),
            Err(VMError::InvalidInstruction { opcode: 0xFF, .. })
        ));
        // gaps inside the table are not opcodes either
        assert!(Instruction::try_from(0x14).is_err());
        assert!(Instruction::try_from(0x21).is_err());
    }

    #[test]
    fn base_opcode_assignment() {
        assert_eq!(Instruction::Ata as u8, 0x00);
        assert_eq!(Instruction::Malkrz as u8, 0x09);
        assert_eq!(Instruction::Llonys as u8, 0x10);
        assert_eq!(Instruction::Clo as u8, 0x16);
        assert_eq!(Instruction::Niv as u8, 0x17);
        assert_eq!(Instruction::Xylo as u8, 0x1B);
        assert_eq!(Instruction::Inj as u8, 0x20);
        assert_eq!(Instruction::Lat as u8, 0x28);
        assert_eq!(Instruction::Latsna as u8, 0x29);
    }

    #[test]
    fn opcode_roundtrip_for_all() {
        for instr in Instruction::ALL {
            assert_eq!(Instruction::try_from(*instr as u8).unwrap(), *instr);
        }
    }

    #[test]
    fn mnemonic_lookup_ignores_case() {
        assert_eq!(Instruction::from_mnemonic("krz"), Some(Instruction::Krz));
        assert_eq!(Instruction::from_mnemonic("KRZ16C"), Some(Instruction::Krz16c));
        assert_eq!(Instruction::from_mnemonic("xoLonys"), Some(Instruction::Xolonys));
        assert_eq!(Instruction::from_mnemonic("fi"), None);
    }

    #[test]
    fn arity_and_class() {
        assert_eq!(Instruction::Krz.arity(), 2);
        assert_eq!(Instruction::Inj.arity(), 3);
        assert_eq!(Instruction::Latsna.arity(), 3);
        assert!(Instruction::Xtlo.is_comparison());
        assert!(!Instruction::Malkrz.is_comparison());
        assert_eq!(Instruction::Dtosna.class(), InstrClass::Shift);
    }
}
