//! Core execution engine.
//!
//! The VM fetches an opcode at `XX`, decodes two or three ModRM operands (each
//! decode advances `XX`), then executes. Arithmetic wraps at 32 bits.
//!
//! Two program counter values are special: reaching
//! [`ExecConfig::return_address`] ends the run, and reaching
//! [`ExecConfig::debug_trap`] emits the word at `F5 + 4` to the debug buffer and
//! returns to the address stored at `F5`, without fetching anything.
//!
//! Every destination write clears the flag, so only a comparison immediately
//! followed by `MALKRZ` observes it set.

mod context;
mod memory;
mod profile;
mod registers;

pub use context::{
    DEFAULT_DEBUG_TRAP, DEFAULT_ENTRY, DEFAULT_FRAME, DEFAULT_RETURN_ADDRESS, ExecConfig,
};
pub use memory::Memory;
pub use profile::ExecProfile;
pub use registers::{REGISTER_COUNT, Register, RegisterFile};

use crate::trace;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{Addressing, Fetch, MODE_IMM, ModRm, Width};
use crate::virtual_machine::program::Program;

macro_rules! exec_vm {
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident ),* ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    $( let $field = $vm.fetch_operand()?; )*
                    $vm.$handler($instr, $( $field ),*)
                }
            ),*
        }
    }};
}

/// Byte source reading the instruction stream at `XX` and advancing it.
struct ProgramCursor<'a> {
    memory: &'a mut Memory,
    registers: &'a mut RegisterFile,
}

impl Fetch for ProgramCursor<'_> {
    fn fetch8(&mut self) -> Result<u8, VMError> {
        let pc = self.registers.get(Register::XX);
        let byte = self.memory.read8(pc);
        self.registers.set(Register::XX, pc.wrapping_add(1));
        Ok(byte)
    }
}

/// Virtual CPU.
///
/// Owns its memory and registers for the lifetime of one run.
pub struct VM {
    memory: Memory,
    registers: RegisterFile,
    config: ExecConfig,
    /// Text emitted by the debug trap, in order.
    debug_output: Vec<String>,
    /// Address of the opcode currently executing, for error reports.
    instr_start: u32,
    profile: ExecProfile,
}

impl VM {
    /// Creates a VM whose uninitialized memory is filled from OS entropy.
    pub fn new(config: ExecConfig) -> Self {
        Self::with_memory(config, Memory::new())
    }

    /// Creates a VM over the given memory, typically [`Memory::with_seed`].
    ///
    /// Sets `XX` to the entry point and `F5` to the frame address, and stores the
    /// return sentinel at `[F5]` so that `KRZ F5@, XX` ends the program.
    pub fn with_memory(config: ExecConfig, mut memory: Memory) -> Self {
        let mut registers = RegisterFile::new();
        registers.set(Register::XX, config.entry);
        registers.set(Register::F5, config.frame);
        memory.write32(config.frame, config.return_address);
        Self {
            memory,
            registers,
            instr_start: config.entry,
            config,
            debug_output: Vec::new(),
            profile: ExecProfile::new(),
        }
    }

    /// Copies the program image into memory at its base address.
    pub fn load(&mut self, program: &Program) -> Result<(), VMError> {
        self.memory.load(program.base, &program.code)
    }

    /// Runs until `XX` reaches the return sentinel.
    ///
    /// Without a step limit a program that never returns runs forever.
    pub fn run(&mut self) -> Result<(), VMError> {
        loop {
            let pc = self.registers.get(Register::XX);
            if pc == self.config.return_address {
                return Ok(());
            }
            if pc == self.config.debug_trap {
                self.debug_trap();
                continue;
            }
            self.step()?;
        }
    }

    /// Fetches, decodes and executes the instruction at `XX`.
    pub fn step(&mut self) -> Result<(), VMError> {
        let pc = self.registers.get(Register::XX);
        self.instr_start = pc;

        if let Some(limit) = self.config.max_steps
            && self.profile.instructions() >= limit
        {
            return Err(VMError::StepLimitExceeded { limit, pc });
        }

        let opcode = self.cursor().fetch8()?;
        let instr = Instruction::try_from(opcode)
            .map_err(|_| VMError::InvalidInstruction { opcode, pc })?;
        trace!("{pc:08X}: {opcode:02X} {}", instr.mnemonic());

        self.profile.record(instr.class());
        self.exec(instr)
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Values emitted by the debug trap, as decimal text.
    pub fn debug_output(&self) -> &[String] {
        &self.debug_output
    }

    pub fn profile(&self) -> &ExecProfile {
        &self.profile
    }

    fn cursor(&mut self) -> ProgramCursor<'_> {
        ProgramCursor {
            memory: &mut self.memory,
            registers: &mut self.registers,
        }
    }

    /// Emits `[F5 + 4]` and returns to `[F5]`.
    fn debug_trap(&mut self) {
        let frame = self.registers.get(Register::F5);
        let resume = self.memory.read32(frame);
        let value = self.memory.read32(frame.wrapping_add(4));
        trace!("debug trap: {value}, resuming at {resume:08X}");
        self.debug_output.push(value.to_string());
        self.registers.set(Register::XX, resume);
        self.profile.record_trap();
    }

    /// Decodes the next operand and classifies its addressing form.
    fn fetch_operand(&mut self) -> Result<Addressing, VMError> {
        let modrm = ModRm::decode(&mut self.cursor())?;
        modrm
            .addressing()
            .ok_or(VMError::UnsupportedAddressing {
                reg: modrm.reg,
                mode: modrm.mode,
                pc: self.instr_start,
            })
    }

    /// Executes a single instruction.
    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                // Arithmetic and logic
                Ata => op_ata(a, b),
                Nta => op_nta(a, b),
                Ada => op_ada(a, b),
                Ekc => op_ekc(a, b),
                Dto => op_dto(a, b),
                Dro => op_dro(a, b),
                Dtosna => op_dtosna(a, b),
                Dal => op_dal(a, b),
                // Transfer
                Krz => op_krz(a, b),
                Malkrz => op_malkrz(a, b),
                Krz8i => op_krz8i(a, b),
                Krz16i => op_krz16i(a, b),
                Krz8c => op_krz8c(a, b),
                Krz16c => op_krz16c(a, b),
                // Comparison
                Llonys => op_compare(a, b),
                Xtlonys => op_compare(a, b),
                Xolonys => op_compare(a, b),
                Xylonys => op_compare(a, b),
                Clo => op_compare(a, b),
                Niv => op_compare(a, b),
                Llo => op_compare(a, b),
                Xtlo => op_compare(a, b),
                Xolo => op_compare(a, b),
                Xylo => op_compare(a, b),
                // Three-operand
                Inj => op_inj(a, b, c),
                Lat => op_lat(a, b, c),
                Latsna => op_latsna(a, b, c),
            }
        }
    }

    // ==================== Operand access ====================

    fn effective_address(&self, operand: Addressing) -> Option<u32> {
        let reg = |r| self.registers.get(r);
        match operand {
            Addressing::Indirect(r) => Some(reg(r)),
            Addressing::Displaced(r, disp) => Some(reg(r).wrapping_add(disp)),
            Addressing::Indexed(r, i) => Some(reg(r).wrapping_add(reg(i))),
            Addressing::Register(_) | Addressing::Immediate { .. } => None,
        }
    }

    fn load_operand(&mut self, operand: Addressing) -> u32 {
        match operand {
            Addressing::Register(r) => self.registers.get(r),
            Addressing::Immediate { value, .. } => value,
            _ => match self.effective_address(operand) {
                Some(addr) => self.memory.read32(addr),
                None => 0,
            },
        }
    }

    /// Top byte of a register, immediate or addressed byte.
    fn load_top8(&mut self, operand: Addressing) -> u8 {
        match operand {
            Addressing::Register(r) => (self.registers.get(r) >> 24) as u8,
            Addressing::Immediate { value, width } => match width {
                Width::W8 => value as u8,
                Width::W16 => (value >> 8) as u8,
                Width::W32 => (value >> 24) as u8,
            },
            _ => match self.effective_address(operand) {
                Some(addr) => self.memory.read8(addr),
                None => 0,
            },
        }
    }

    /// Top half-word of a register, immediate or addressed half-word.
    fn load_top16(&mut self, operand: Addressing) -> u16 {
        match operand {
            Addressing::Register(r) => (self.registers.get(r) >> 16) as u16,
            Addressing::Immediate { value, width } => match width {
                Width::W8 | Width::W16 => value as u16,
                Width::W32 => (value >> 16) as u16,
            },
            _ => match self.effective_address(operand) {
                Some(addr) => self.memory.read16(addr),
                None => 0,
            },
        }
    }

    fn invalid_destination(&self, instr: Instruction, operand: Addressing) -> VMError {
        let mode = match operand {
            Addressing::Immediate { width, .. } => MODE_IMM | width.mode_bits(),
            _ => 0,
        };
        VMError::InvalidDestination {
            instruction: instr.mnemonic(),
            mode,
            pc: self.instr_start,
        }
    }

    /// Writes a full word to `operand` and clears the flag.
    fn store(&mut self, instr: Instruction, operand: Addressing, value: u32) -> Result<(), VMError> {
        match operand {
            Addressing::Register(r) => self.registers.set(r, value),
            Addressing::Immediate { .. } => return Err(self.invalid_destination(instr, operand)),
            _ => {
                if let Some(addr) = self.effective_address(operand) {
                    self.memory.write32(addr, value);
                }
            }
        }
        self.registers.set_flag(false);
        Ok(())
    }

    /// Writes the low byte of `value` into the top byte of a register, or as a single
    /// byte to memory.
    fn store_top8(&mut self, instr: Instruction, operand: Addressing, value: u32) -> Result<(), VMError> {
        match operand {
            Addressing::Register(r) => {
                let old = self.registers.get(r);
                self.registers.set(r, (old & 0x00FF_FFFF) | (value << 24));
            }
            Addressing::Immediate { .. } => return Err(self.invalid_destination(instr, operand)),
            _ => {
                if let Some(addr) = self.effective_address(operand) {
                    self.memory.write8(addr, value as u8);
                }
            }
        }
        self.registers.set_flag(false);
        Ok(())
    }

    fn store_top16(&mut self, instr: Instruction, operand: Addressing, value: u32) -> Result<(), VMError> {
        match operand {
            Addressing::Register(r) => {
                let old = self.registers.get(r);
                self.registers.set(r, (old & 0x0000_FFFF) | (value << 16));
            }
            Addressing::Immediate { .. } => return Err(self.invalid_destination(instr, operand)),
            _ => {
                if let Some(addr) = self.effective_address(operand) {
                    self.memory.write16(addr, value as u16);
                }
            }
        }
        self.registers.set_flag(false);
        Ok(())
    }

    // ==================== Handlers ====================

    fn op_ata(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let va = self.load_operand(a);
        self.store(instr, b, vb.wrapping_add(va))
    }

    fn op_nta(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let va = self.load_operand(a);
        self.store(instr, b, vb.wrapping_sub(va))
    }

    fn op_ada(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let va = self.load_operand(a);
        self.store(instr, b, vb & va)
    }

    fn op_ekc(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let va = self.load_operand(a);
        self.store(instr, b, vb | va)
    }

    fn op_dto(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let shift = self.load_operand(a);
        self.store(instr, b, vb.checked_shr(shift).unwrap_or(0))
    }

    fn op_dro(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let shift = self.load_operand(a);
        self.store(instr, b, vb.checked_shl(shift).unwrap_or(0))
    }

    fn op_dtosna(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b) as i32;
        let shift = self.load_operand(a);
        // past the width every bit is a copy of the sign
        let shifted = vb.checked_shr(shift).unwrap_or(vb >> 31);
        self.store(instr, b, shifted as u32)
    }

    fn op_dal(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let vb = self.load_operand(b);
        let va = self.load_operand(a);
        self.store(instr, b, !(vb ^ va))
    }

    fn op_krz(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let va = self.load_operand(a);
        self.store(instr, b, va)
    }

    fn op_malkrz(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        if self.registers.flag() {
            let va = self.load_operand(a);
            self.store(instr, b, va)?;
        }
        self.registers.set_flag(false);
        Ok(())
    }

    fn op_krz8i(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let v = self.load_top8(a) as i8 as i32;
        self.store(instr, b, v as u32)
    }

    fn op_krz16i(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let v = self.load_top16(a) as i16 as i32;
        self.store(instr, b, v as u32)
    }

    fn op_krz8c(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let va = self.load_operand(a);
        self.store_top8(instr, b, va)
    }

    fn op_krz16c(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let va = self.load_operand(a);
        self.store_top16(instr, b, va)
    }

    /// Sets the flag from `a OP b`; the only handler that leaves it set.
    fn op_compare(&mut self, instr: Instruction, a: Addressing, b: Addressing) -> Result<(), VMError> {
        let va = self.load_operand(a);
        let vb = self.load_operand(b);
        let (sa, sb) = (va as i32, vb as i32);
        let flag = match instr {
            Instruction::Llonys => va > vb,
            Instruction::Xtlonys => va <= vb,
            Instruction::Xolonys => va >= vb,
            Instruction::Xylonys => va < vb,
            Instruction::Clo => va == vb,
            Instruction::Niv => va != vb,
            Instruction::Llo => sa > sb,
            Instruction::Xtlo => sa <= sb,
            Instruction::Xolo => sa >= sb,
            Instruction::Xylo => sa < sb,
            _ => unreachable!("{} is not a comparison", instr.mnemonic()),
        };
        self.registers.set_flag(flag);
        Ok(())
    }

    fn op_inj(
        &mut self,
        instr: Instruction,
        a: Addressing,
        b: Addressing,
        c: Addressing,
    ) -> Result<(), VMError> {
        let va = self.load_operand(a);
        let vb = self.load_operand(b);
        self.store(instr, b, va)?;
        self.store(instr, c, vb)
    }

    fn op_lat(
        &mut self,
        instr: Instruction,
        a: Addressing,
        b: Addressing,
        c: Addressing,
    ) -> Result<(), VMError> {
        let vb = self.load_operand(b) as u64;
        let va = self.load_operand(a) as u64;
        let product = vb * va;
        self.store(instr, c, (product >> 32) as u32)?;
        self.store(instr, b, product as u32)
    }

    fn op_latsna(
        &mut self,
        instr: Instruction,
        a: Addressing,
        b: Addressing,
        c: Addressing,
    ) -> Result<(), VMError> {
        let vb = self.load_operand(b) as i32 as i64;
        let va = self.load_operand(a) as i32 as i64;
        // |i32 * i32| < 2^63
        let product = vb * va;
        self.store(instr, c, (product >> 32) as u32)?;
        self.store(instr, b, product as u32)
    }
}

#[cfg(test)]
mod tests;
