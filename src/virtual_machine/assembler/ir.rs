//! Symbolic operands and the instruction list they are lowered into.

use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::ModRm;
use crate::virtual_machine::vm::Register;
use std::fmt;

/// Shape of a symbolic operand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperandKind {
    Imm(u32),
    Reg(Register),
    /// `reg + disp`, valid only as an address.
    RegDisp(Register, u32),
    /// `reg + reg`, valid only as an address.
    RegReg(Register, Register),
    /// Absolute address of a label, resolved at emission.
    Label(String),
}

/// Operand as written in assembly, before encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Operand {
    pub kind: OperandKind,
    /// Refers to the memory word at the operand rather than the operand itself.
    pub address: bool,
}

impl Operand {
    const fn value(kind: OperandKind) -> Self {
        Self {
            kind,
            address: false,
        }
    }

    pub const fn imm(value: u32) -> Self {
        Self::value(OperandKind::Imm(value))
    }

    pub const fn reg(reg: Register) -> Self {
        Self::value(OperandKind::Reg(reg))
    }

    pub const fn reg_disp(reg: Register, disp: u32) -> Self {
        Self::value(OperandKind::RegDisp(reg, disp))
    }

    pub const fn reg_reg(base: Register, index: Register) -> Self {
        Self::value(OperandKind::RegReg(base, index))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::value(OperandKind::Label(name.into()))
    }

    /// Marks the operand as a memory reference (`@`).
    pub fn at(mut self) -> Self {
        self.address = true;
        self
    }

    /// Immediates and labels are values only and can never be written to.
    pub fn is_value_only(&self) -> bool {
        matches!(self.kind, OperandKind::Imm(_) | OperandKind::Label(_))
    }

    /// Lowers the operand to its ModRM form.
    ///
    /// Labels become a 32-bit placeholder whose value is patched at emission.
    pub fn encode(&self) -> Result<CodeOperand, &'static str> {
        let modrm = match (&self.kind, self.address) {
            (OperandKind::Imm(v), false) => ModRm::immediate(*v),
            (OperandKind::Reg(r), false) => ModRm::register(*r),
            (OperandKind::Reg(r), true) => ModRm::indirect(*r),
            (OperandKind::RegDisp(r, d), true) => ModRm::displaced(*r, *d),
            (OperandKind::RegReg(r, i), true) => ModRm::indexed(*r, *i),
            (OperandKind::Label(name), false) => {
                return Ok(CodeOperand {
                    modrm: ModRm::immediate32(0),
                    label: Some(name.clone()),
                });
            }
            (OperandKind::Imm(_), true) => return Err("an immediate cannot be an address"),
            (OperandKind::Label(_), true) => return Err("a label cannot be an address"),
            (OperandKind::RegDisp(..) | OperandKind::RegReg(..), false) => {
                return Err("an offset register is only valid as an address");
            }
        };
        Ok(CodeOperand { modrm, label: None })
    }
}

impl From<Register> for Operand {
    fn from(reg: Register) -> Self {
        Operand::reg(reg)
    }
}

impl From<u32> for Operand {
    fn from(value: u32) -> Self {
        Operand::imm(value)
    }
}

impl From<&str> for Operand {
    fn from(name: &str) -> Self {
        Operand::label(name)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperandKind::Imm(v) => write!(f, "{v}")?,
            OperandKind::Reg(r) => write!(f, "{r}")?,
            OperandKind::RegDisp(r, d) => write!(f, "{r}+{d}")?,
            OperandKind::RegReg(r, i) => write!(f, "{r}+{i}")?,
            OperandKind::Label(name) => f.write_str(name)?,
        }
        if self.address {
            f.write_str("@")?;
        }
        Ok(())
    }
}

/// Encoded operand waiting for label resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CodeOperand {
    pub modrm: ModRm,
    /// Label whose absolute address replaces `modrm.value` at emission.
    pub label: Option<String>,
}

/// One instruction in the IR.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Code {
    pub instruction: Instruction,
    pub operands: Vec<CodeOperand>,
}

impl Code {
    /// Encoded size in bytes, known before labels are resolved.
    pub fn encoded_len(&self) -> u32 {
        1 + self
            .operands
            .iter()
            .map(|o| o.modrm.encoded_len() as u32)
            .sum::<u32>()
    }
}
