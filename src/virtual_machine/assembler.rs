//! Assembler: builds programs from instructions and labels.
//!
//! An [`Assembler`] collects instructions into an IR list, tracking the byte
//! offset of each so labels can be bound before their bytes exist. On
//! [`Assembler::finish`] the IR is moved into the emitter, which writes every
//! opcode and operand and patches label references with absolute addresses.
//!
//! # Syntax
//!
//! The text front end reads whitespace-separated words, operands first:
//!
//! ```text
//! nll loop          # label the next instruction
//! krz 1 f0          # f0 = 1
//! ata f0 f5+4@      # [f5 + 4] += f0
//! fi f0 10 xylonys  # flag = f0 < 10
//! malkrz loop xx    # jump if flag
//! krz f5@ xx        # return
//! ```
//!
//! - Registers are `f0`..`f6` and `xx`, in any case
//! - Immediates are unsigned decimal numbers
//! - `@` after an operand makes it a memory reference; `reg+num` and `reg+reg`
//!   exist only as memory references
//! - Any other operand word names a label
//! - `l' name` labels the start of the previous instruction
//! - `kue name` exports a label, `xok name` requires one from another file
//! - `'c'i` switches to destination-first order until `'i'c`

mod ir;
mod source;

pub use ir::{Code, CodeOperand, Operand, OperandKind};
pub use source::{Word, analyze, parse_operand, tokenize};

use crate::trace;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::program::Program;
use crate::virtual_machine::vm::DEFAULT_ENTRY;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::fs;
use std::path::Path;

/// Extract line/offset and message from assembly errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, String)> {
    match err {
        VMError::AssemblyError {
            line,
            offset,
            reason,
        } => Some((*line, *offset, reason.clone())),
        VMError::ParseError {
            line,
            offset,
            message,
        } => Some((*line, *offset, message.to_string())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Emit a diagnostic to stderr for errors that carry a source position.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    if let Some((line, offset, message)) = assembly_error_location(err) {
        eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, line, offset, &message)
        );
    }
}

/// Label name to byte offset from the program base.
#[derive(Debug, Default)]
pub struct LabelTable {
    offsets: BTreeMap<String, u32>,
}

impl LabelTable {
    pub fn define(&mut self, name: &str, offset: u32) -> Result<(), VMError> {
        if self.offsets.contains_key(name) {
            return Err(VMError::DuplicateLabel {
                label: name.to_string(),
            });
        }
        self.offsets.insert(name.to_string(), offset);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<u32, VMError> {
        self.offsets
            .get(name)
            .copied()
            .ok_or_else(|| VMError::UndefinedLabel {
                label: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Generates one builder method per two-operand mnemonic.
macro_rules! binary_builders {
    ($( $method:ident => $variant:ident ),* $(,)?) => {
        $(
            #[doc = concat!("Appends `", stringify!($variant), " a, b`.")]
            pub fn $method(
                &mut self,
                a: impl Into<Operand>,
                b: impl Into<Operand>,
            ) -> Result<(), VMError> {
                self.append(Instruction::$variant, &[a.into(), b.into()])
            }
        )*
    };
}

/// Generates one builder method per three-operand mnemonic.
macro_rules! ternary_builders {
    ($( $method:ident => $variant:ident ),* $(,)?) => {
        $(
            #[doc = concat!("Appends `", stringify!($variant), " a, b, c`.")]
            pub fn $method(
                &mut self,
                a: impl Into<Operand>,
                b: impl Into<Operand>,
                c: impl Into<Operand>,
            ) -> Result<(), VMError> {
                self.append(Instruction::$variant, &[a.into(), b.into(), c.into()])
            }
        )*
    };
}

/// Incremental program builder.
///
/// One assembler holds one build session: labels are shared by everything
/// appended to it, including several source files.
#[derive(Debug)]
pub struct Assembler {
    base: u32,
    ir: Vec<Code>,
    labels: LabelTable,
    /// Byte offset of the next instruction.
    offset: u32,
    /// Index into `ir` of the first instruction of the current source file.
    file_start: usize,
    exports: BTreeSet<String>,
    imports: BTreeSet<String>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    /// Assembler for a program placed at the default entry address.
    pub fn new() -> Self {
        Self::with_base(DEFAULT_ENTRY)
    }

    pub fn with_base(base: u32) -> Self {
        Self {
            base,
            ir: Vec::new(),
            labels: LabelTable::default(),
            offset: 0,
            file_start: 0,
            exports: BTreeSet::new(),
            imports: BTreeSet::new(),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Byte offset the next instruction will be placed at.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.resolve(name).ok()
    }

    /// Validates operand shapes and appends one instruction.
    ///
    /// Every operand but the first is written to, except for comparisons, so
    /// it may not be an immediate or a label.
    pub fn append(&mut self, instr: Instruction, operands: &[Operand]) -> Result<(), VMError> {
        if operands.len() != instr.arity() {
            return Err(VMError::InvalidOperand {
                instruction: instr.mnemonic(),
                position: operands.len(),
                operand: operands
                    .iter()
                    .map(Operand::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                reason: "wrong number of operands",
            });
        }

        let mut encoded = Vec::with_capacity(operands.len());
        for (i, op) in operands.iter().enumerate() {
            let invalid = |reason| VMError::InvalidOperand {
                instruction: instr.mnemonic(),
                position: i + 1,
                operand: op.to_string(),
                reason,
            };
            if i > 0 && !instr.is_comparison() && op.is_value_only() {
                return Err(invalid("destination must be a register or memory reference"));
            }
            encoded.push(op.encode().map_err(invalid)?);
        }

        let code = Code {
            instruction: instr,
            operands: encoded,
        };
        trace!(
            "{:08X}: {:02X} {:<6} {}",
            self.base.wrapping_add(self.offset),
            instr as u8,
            instr.mnemonic(),
            operands
                .iter()
                .map(Operand::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        );
        self.offset = self.offset.wrapping_add(code.encoded_len());
        self.ir.push(code);
        Ok(())
    }

    binary_builders! {
        ata => Ata,
        nta => Nta,
        ada => Ada,
        ekc => Ekc,
        dto => Dto,
        dro => Dro,
        dtosna => Dtosna,
        dal => Dal,
        krz => Krz,
        malkrz => Malkrz,
        krz8i => Krz8i,
        krz16i => Krz16i,
        krz8c => Krz8c,
        krz16c => Krz16c,
    }

    ternary_builders! {
        inj => Inj,
        lat => Lat,
        latsna => Latsna,
    }

    /// Appends the comparison `cmp a, b`.
    pub fn fi(
        &mut self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        cmp: Instruction,
    ) -> Result<(), VMError> {
        if !cmp.is_comparison() {
            return Err(VMError::InvalidInstructionName {
                name: cmp.mnemonic().to_string(),
            });
        }
        self.append(cmp, &[a.into(), b.into()])
    }

    /// Bitwise not of `x` in place, as `DAL 0, x`.
    pub fn nac(&mut self, x: impl Into<Operand>) -> Result<(), VMError> {
        self.append(Instruction::Dal, &[Operand::imm(0), x.into()])
    }

    /// Binds `name` to the next instruction.
    pub fn nll(&mut self, name: &str) -> Result<(), VMError> {
        self.labels.define(name, self.offset)
    }

    /// Binds `name` to the start of the previous instruction.
    ///
    /// The previous instruction must belong to the current source file.
    pub fn l(&mut self, name: &str) -> Result<(), VMError> {
        let previous = match self.ir.last() {
            Some(code) if self.ir.len() > self.file_start => code.encoded_len(),
            _ => {
                return Err(VMError::DanglingLabel {
                    label: name.to_string(),
                });
            }
        };
        self.labels.define(name, self.offset.wrapping_sub(previous))
    }

    /// Starts a new source file: `l'` can no longer reach back past this point.
    pub fn begin_file(&mut self) {
        self.file_start = self.ir.len();
    }

    /// Marks `name` as exported; it must be bound by the end of the build.
    pub fn export(&mut self, name: &str) {
        self.exports.insert(name.to_string());
    }

    /// Declares that `name` is bound elsewhere in this build.
    pub fn import(&mut self, name: &str) {
        self.imports.insert(name.to_string());
    }

    /// Tokenizes and appends one source file.
    ///
    /// On failure a diagnostic pointing into `source` is printed to stderr.
    pub fn feed(&mut self, name: &str, source: &str) -> Result<(), VMError> {
        let result = tokenize(source).and_then(|words| analyze(&words, self));
        if let Err(err) = &result {
            log_assembly_error(name, source, err);
        }
        result
    }

    /// Checks link declarations and emits the program.
    pub fn finish(self) -> Result<Program, VMError> {
        for name in &self.imports {
            self.labels.resolve(name)?;
        }
        let mut symbols = BTreeMap::new();
        for name in &self.exports {
            let offset = self.labels.resolve(name)?;
            symbols.insert(name.clone(), self.base.wrapping_add(offset));
        }

        let code = emit(self.ir, &self.labels, self.base)?;
        Ok(Program {
            base: self.base,
            code,
            symbols,
        })
    }
}

/// Serializes the IR, replacing label placeholders with `base + offset`.
///
/// Fails on the first unbound label and returns no bytes.
pub fn emit(ir: Vec<Code>, labels: &LabelTable, base: u32) -> Result<Vec<u8>, VMError> {
    let mut out = Vec::with_capacity(ir.iter().map(|c| c.encoded_len() as usize).sum());
    for code in ir {
        out.push(code.instruction as u8);
        for operand in code.operands {
            let mut modrm = operand.modrm;
            if let Some(label) = operand.label {
                modrm.value = base.wrapping_add(labels.resolve(&label)?);
            }
            modrm.encode(&mut out);
        }
    }
    Ok(out)
}

/// Assembles a source string placed at the default entry address.
pub fn assemble_source(source: &str) -> Result<Program, VMError> {
    let mut asm = Assembler::new();
    asm.feed("<source>", source)?;
    asm.finish()
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<Program, VMError> {
    assemble_files(&[path])
}

/// Assembles several files into one program with a shared label namespace.
///
/// Files are laid out in the order given.
pub fn assemble_files<P: AsRef<Path>>(paths: &[P]) -> Result<Program, VMError> {
    let mut asm = Assembler::new();
    for path in paths {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| VMError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        asm.feed(&path.display().to_string(), &source)?;
    }
    asm.finish()
}
