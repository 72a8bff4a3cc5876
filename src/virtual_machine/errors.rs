use thiserror::Error;

/// Errors that can occur while assembling, loading or executing a program.
#[derive(Debug, Error)]
pub enum VMError {
    /// Unknown opcode encountered at `pc`.
    #[error("invalid instruction 0x{opcode:02X} at 0x{pc:08X}")]
    InvalidInstruction { opcode: u8, pc: u32 },
    /// ModRM addressing form with no defined meaning.
    #[error("unsupported addressing mode 0x{mode:02X} (reg {reg}) at 0x{pc:08X}")]
    UnsupportedAddressing { reg: u8, mode: u8, pc: u32 },
    /// Instruction tried to write through an immediate operand.
    #[error("{instruction} cannot write to immediate operand (mode 0x{mode:02X}) at 0x{pc:08X}")]
    InvalidDestination {
        instruction: &'static str,
        mode: u8,
        pc: u32,
    },
    /// Execution ran past the configured instruction budget.
    #[error("step limit of {limit} instructions exceeded at 0x{pc:08X}")]
    StepLimitExceeded { limit: u64, pc: u32 },
    /// Image does not fit between its base address and the top of the address space.
    #[error("program of {len} bytes does not fit at base 0x{base:08X}")]
    ProgramTooLarge { base: u32, len: usize },
    /// Byte source ran dry in the middle of an operand.
    #[error("unexpected end of bytecode: requested {requested} bytes, {available} available")]
    UnexpectedEndOfBytecode { requested: usize, available: usize },
    /// Register index or name that does not denote a register.
    #[error("invalid register {register}")]
    InvalidRegister { register: String },
    /// Unrecognized mnemonic during assembly.
    #[error("invalid instruction name: {name}")]
    InvalidInstructionName { name: String },
    /// Operand shape not accepted at this position.
    #[error("{instruction} operand {position}: {reason} ({operand})")]
    InvalidOperand {
        instruction: &'static str,
        position: usize,
        operand: String,
        reason: &'static str,
    },
    /// Operand word that is not a register, number, label or offset form.
    #[error("malformed operand: {operand}")]
    MalformedOperand { operand: String },
    /// Reserved word with no implementation.
    #[error("{word} is not supported")]
    UnsupportedWord { word: String },
    /// Source ended while an instruction still expected words.
    #[error("{word} expects {expected} more word(s)")]
    UnexpectedEndOfSource { word: String, expected: usize },
    /// Label defined more than once.
    #[error("duplicate label: {label}")]
    DuplicateLabel { label: String },
    /// Reference to a label that was never bound.
    #[error("undefined label: {label}")]
    UndefinedLabel { label: String },
    /// `l'` used with no preceding instruction in its source file.
    #[error("label {label} has no preceding instruction to follow")]
    DanglingLabel { label: String },
    /// Error with a source position attached.
    #[error("line {line}:{offset}: {reason}")]
    AssemblyError {
        line: usize,
        offset: usize,
        reason: String,
    },
    /// Tokenizer error.
    #[error("line {line}:{offset}: {message}")]
    ParseError {
        line: usize,
        offset: usize,
        message: &'static str,
    },
    /// File I/O error.
    #[error("io error on {path}: {message}")]
    IoError { path: String, message: String },
}
