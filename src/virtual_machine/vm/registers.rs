use crate::virtual_machine::errors::VMError;
use std::fmt;
use std::str::FromStr;

/// Number of architectural registers, also the range of the 3-bit ModRM selector.
pub const REGISTER_COUNT: usize = 8;

/// Architectural register, numbered by its ModRM selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Register {
    F0 = 0,
    F1 = 1,
    F2 = 2,
    F3 = 3,
    F4 = 4,
    /// Frame register. The debug trap reads its return address and argument through it.
    F5 = 5,
    F6 = 6,
    /// Program counter.
    XX = 7,
}

impl Register {
    /// All registers in selector order.
    pub const ALL: [Register; REGISTER_COUNT] = [
        Register::F0,
        Register::F1,
        Register::F2,
        Register::F3,
        Register::F4,
        Register::F5,
        Register::F6,
        Register::XX,
    ];

    /// Returns the register addressed by a 3-bit selector.
    pub fn from_index(idx: u8) -> Result<Register, VMError> {
        Self::ALL
            .get(idx as usize)
            .copied()
            .ok_or_else(|| VMError::InvalidRegister {
                register: idx.to_string(),
            })
    }

    pub const fn index(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Register::F0 => "F0",
            Register::F1 => "F1",
            Register::F2 => "F2",
            Register::F3 => "F3",
            Register::F4 => "F4",
            Register::F5 => "F5",
            Register::F6 => "F6",
            Register::XX => "XX",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = VMError;

    /// Parses a register name, ignoring ASCII case (`f5`, `F5`, `xx`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| VMError::InvalidRegister {
                register: s.to_string(),
            })
    }
}

/// Register bank plus the comparison flag.
///
/// Every register is a plain `u32`; signedness is decided by the instruction
/// reading it.
#[derive(Clone, Debug, Default)]
pub struct RegisterFile {
    regs: [u32; REGISTER_COUNT],
    flag: bool,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, reg: Register) -> u32 {
        self.regs[reg as usize]
    }

    #[inline]
    pub fn set(&mut self, reg: Register, value: u32) {
        self.regs[reg as usize] = value;
    }

    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn set_flag(&mut self, flag: bool) {
        self.flag = flag;
    }

    /// Iterates over `(register, value)` in selector order.
    pub fn iter(&self) -> impl Iterator<Item = (Register, u32)> + '_ {
        Register::ALL.into_iter().zip(self.regs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_register_names() {
        assert_eq!("f0".parse::<Register>().unwrap(), Register::F0);
        assert_eq!("F5".parse::<Register>().unwrap(), Register::F5);
        assert_eq!("xX".parse::<Register>().unwrap(), Register::XX);
        assert!(matches!(
            "f7".parse::<Register>(),
            Err(VMError::InvalidRegister { .. })
        ));
        assert!("nx".parse::<Register>().is_err());
    }

    #[test]
    fn selector_roundtrip() {
        for reg in Register::ALL {
            assert_eq!(Register::from_index(reg.index()).unwrap(), reg);
        }
        assert!(Register::from_index(8).is_err());
    }

    #[test]
    fn register_file_defaults_to_zero() {
        let regs = RegisterFile::new();
        assert!(regs.iter().all(|(_, v)| v == 0));
        assert!(!regs.flag());
    }

    #[test]
    fn iter_is_in_selector_order() {
        let mut regs = RegisterFile::new();
        regs.set(Register::F6, 6);
        regs.set(Register::XX, 0x1483_0000);
        let names: Vec<_> = regs.iter().map(|(r, _)| r.to_string()).collect();
        assert_eq!(names, ["F0", "F1", "F2", "F3", "F4", "F5", "F6", "XX"]);
        assert_eq!(regs.iter().last(), Some((Register::XX, 0x1483_0000)));
    }
}
