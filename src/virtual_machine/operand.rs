//! ModRM operand codec shared by the engine and the assembler.
//!
//! Each operand is one ModRM byte, `(reg << 5) | mode`, followed by 0, 1, 2 or 4
//! big-endian trailing bytes selected by the low nibble of `mode`:
//!
//! | mode          | form                 | trailing |
//! |---------------|----------------------|----------|
//! | `0x00`        | `reg`                | 0        |
//! | `0x04..=0x06` | immediate 8/16/32    | 1/2/4    |
//! | `0x10`        | `[reg]`              | 0        |
//! | `0x14..=0x16` | `[reg + disp8/16/32]`| 1/2/4    |
//! | `0x18..=0x1F` | `[reg + reg(mode&7)]`| 0        |
//!
//! Every other mode decodes (so the cursor stays in sync) but has no
//! [`Addressing`] and is rejected by the engine.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::Register;
use std::fmt;

pub const MODE_MASK: u8 = 0x1F;
pub const MODE_REG: u8 = 0x00;
pub const MODE_IMM: u8 = 0x04;
pub const MODE_INDIRECT: u8 = 0x10;
pub const MODE_DISP: u8 = 0x14;
pub const MODE_INDEXED: u8 = 0x18;

/// Width of an immediate or displacement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Width {
    W8,
    W16,
    W32,
}

impl Width {
    /// Smallest width that holds `value` without loss.
    pub const fn for_value(value: u32) -> Width {
        if value <= 0xFF {
            Width::W8
        } else if value <= 0xFFFF {
            Width::W16
        } else {
            Width::W32
        }
    }

    /// Width selected by the low nibble of a mode, if it carries one.
    pub const fn from_mode(mode: u8) -> Option<Width> {
        match mode & 0x0F {
            0x4 => Some(Width::W8),
            0x5 => Some(Width::W16),
            0x6 => Some(Width::W32),
            _ => None,
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
        }
    }

    /// Low mode bits selecting this width (`0x4`, `0x5`, `0x6`).
    pub const fn mode_bits(self) -> u8 {
        match self {
            Width::W8 => 0x4,
            Width::W16 => 0x5,
            Width::W32 => 0x6,
        }
    }

    /// Truncates `value` to this width.
    pub const fn narrow(self, value: u32) -> u32 {
        match self {
            Width::W8 => value & 0xFF,
            Width::W16 => value & 0xFFFF,
            Width::W32 => value,
        }
    }
}

/// Sequential byte source for operand decoding.
///
/// The engine implements this over live memory and the program counter, so
/// decoding an operand advances `XX` past it.
pub trait Fetch {
    fn fetch8(&mut self) -> Result<u8, VMError>;

    /// Reads `width` bytes as a big-endian unsigned value.
    fn fetch_be(&mut self, width: Width) -> Result<u32, VMError> {
        let mut value = 0u32;
        for _ in 0..width.bytes() {
            value = (value << 8) | self.fetch8()? as u32;
        }
        Ok(value)
    }
}

impl Fetch for &[u8] {
    fn fetch8(&mut self) -> Result<u8, VMError> {
        let (first, rest) = self
            .split_first()
            .ok_or(VMError::UnexpectedEndOfBytecode {
                requested: 1,
                available: 0,
            })?;
        *self = rest;
        Ok(*first)
    }

    fn fetch_be(&mut self, width: Width) -> Result<u32, VMError> {
        let n = width.bytes();
        if self.len() < n {
            return Err(VMError::UnexpectedEndOfBytecode {
                requested: n,
                available: self.len(),
            });
        }
        let (bytes, rest) = self.split_at(n);
        *self = rest;
        Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
    }
}

/// Decoded operand descriptor.
///
/// `value` holds the immediate or displacement for modes that carry one and is
/// zero otherwise; the second register of an indexed form lives in `mode & 7`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ModRm {
    pub reg: u8,
    pub mode: u8,
    pub value: u32,
}

impl ModRm {
    pub const fn new(reg: u8, mode: u8, value: u32) -> Self {
        Self {
            reg: reg & 0x07,
            mode: mode & MODE_MASK,
            value,
        }
    }

    pub const fn register(reg: Register) -> Self {
        Self::new(reg.index(), MODE_REG, 0)
    }

    /// Immediate in the narrowest form that holds it.
    pub const fn immediate(value: u32) -> Self {
        Self::new(0, MODE_IMM | Width::for_value(value).mode_bits(), value)
    }

    /// Full-width immediate, used for label placeholders.
    pub const fn immediate32(value: u32) -> Self {
        Self::new(0, MODE_IMM | Width::W32.mode_bits(), value)
    }

    pub const fn indirect(reg: Register) -> Self {
        Self::new(reg.index(), MODE_INDIRECT, 0)
    }

    pub const fn displaced(reg: Register, disp: u32) -> Self {
        Self::new(reg.index(), MODE_DISP | Width::for_value(disp).mode_bits(), disp)
    }

    pub const fn indexed(base: Register, index: Register) -> Self {
        Self::new(base.index(), MODE_INDEXED | index.index(), 0)
    }

    /// The ModRM byte itself.
    pub const fn code(&self) -> u8 {
        (self.reg << 5) | (self.mode & MODE_MASK)
    }

    /// Width of the trailing value. Indexed modes never land on nibbles 4..=6.
    pub const fn width(&self) -> Option<Width> {
        Width::from_mode(self.mode)
    }

    /// Encoded size: the ModRM byte plus its trailing bytes.
    pub const fn encoded_len(&self) -> usize {
        1 + match self.width() {
            Some(w) => w.bytes(),
            None => 0,
        }
    }

    /// This descriptor as it reads back after a round trip through the wire form.
    pub const fn narrowed(&self) -> Self {
        Self::new(
            self.reg,
            self.mode,
            match self.width() {
                Some(w) => w.narrow(self.value),
                None => 0,
            },
        )
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.code());
        if let Some(w) = self.width() {
            out.extend_from_slice(&self.value.to_be_bytes()[4 - w.bytes()..]);
        }
    }

    /// Reads one ModRM byte and its trailing bytes from `src`.
    pub fn decode<F: Fetch + ?Sized>(src: &mut F) -> Result<ModRm, VMError> {
        let code = src.fetch8()?;
        let mut modrm = ModRm::new(code >> 5, code & MODE_MASK, 0);
        if let Some(w) = modrm.width() {
            modrm.value = src.fetch_be(w)?;
        }
        Ok(modrm)
    }

    /// Classifies the descriptor, or `None` for a mode with no defined meaning.
    pub fn addressing(&self) -> Option<Addressing> {
        let base = Register::from_index(self.reg & 0x07).ok()?;
        match self.mode {
            MODE_REG => Some(Addressing::Register(base)),
            0x04..=0x06 => Width::from_mode(self.mode).map(|width| Addressing::Immediate {
                value: self.value,
                width,
            }),
            MODE_INDIRECT => Some(Addressing::Indirect(base)),
            0x14..=0x16 => Some(Addressing::Displaced(base, self.value)),
            0x18..=0x1F => Register::from_index(self.mode & 0x07)
                .ok()
                .map(|index| Addressing::Indexed(base, index)),
            // 0x08..=0x0F carry a bare displacement with no base and are left undefined
            _ => None,
        }
    }
}

impl fmt::Display for ModRm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addressing() {
            Some(a) => write!(f, "{a}"),
            None => write!(f, "?{:02X}", self.code()),
        }
    }
}

/// Operand form after decoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Addressing {
    Register(Register),
    Immediate { value: u32, width: Width },
    /// `[reg]`
    Indirect(Register),
    /// `[reg + disp]`, displacement zero-extended.
    Displaced(Register, u32),
    /// `[reg + reg]`
    Indexed(Register, Register),
}

impl Addressing {
    pub const fn is_memory(&self) -> bool {
        matches!(
            self,
            Addressing::Indirect(_) | Addressing::Displaced(..) | Addressing::Indexed(..)
        )
    }
}

impl fmt::Display for Addressing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addressing::Register(r) => write!(f, "{r}"),
            Addressing::Immediate { value, .. } => write!(f, "{value}"),
            Addressing::Indirect(r) => write!(f, "{r}@"),
            Addressing::Displaced(r, d) => write!(f, "{r}+{d}@"),
            Addressing::Indexed(r, i) => write!(f, "{r}+{i}@"),
        }
    }
}
