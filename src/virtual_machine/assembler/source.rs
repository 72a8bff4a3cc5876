//! Text front end: splits source into words and drives an [`Assembler`] with them.

use super::Assembler;
use super::ir::Operand;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::vm::Register;
use std::iter::Peekable;
use std::str::Chars;

/// A whitespace-separated source word with its 1-based position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Word {
    pub text: String,
    pub line: usize,
    pub offset: usize,
}

/// Character stream that tracks the position of the last character read.
struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    offset: usize,
}

impl Scanner<'_> {
    fn next(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.offset = 0;
        } else {
            self.offset += 1;
        }
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.next();
        }
    }

    fn error(&self, message: &'static str) -> VMError {
        VMError::ParseError {
            line: self.line,
            offset: self.offset,
            message,
        }
    }
}

fn ends_with_operand_char(text: &str) -> bool {
    text.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Splits source text into words.
///
/// Rules:
/// - whitespace separates words, `#` starts a comment running to the end of the line
/// - `@` closes the current word as an address; a lone `@` attaches to the previous word
/// - `+` joins the previous word with the next one, whitespace around it is ignored
pub fn tokenize(source: &str) -> Result<Vec<Word>, VMError> {
    let mut scanner = Scanner {
        chars: source.chars().peekable(),
        line: 1,
        offset: 0,
    };
    let mut words: Vec<Word> = Vec::new();
    let mut current: Option<Word> = None;

    while let Some(c) = scanner.next() {
        match c {
            c if c.is_whitespace() => words.extend(current.take()),
            '#' => {
                words.extend(current.take());
                while scanner.chars.peek().is_some_and(|&c| c != '\n') {
                    scanner.next();
                }
            }
            '@' => {
                if let Some(mut word) = current.take() {
                    word.text.push('@');
                    words.push(word);
                } else {
                    match words.last_mut() {
                        Some(prev) if ends_with_operand_char(&prev.text) => prev.text.push('@'),
                        _ => return Err(scanner.error("'@' must follow a register or number")),
                    }
                }
            }
            '+' => {
                let mut word = match current.take() {
                    Some(word) => word,
                    None => match words.pop() {
                        Some(prev) if ends_with_operand_char(&prev.text) => prev,
                        _ => return Err(scanner.error("'+' must follow a register or number")),
                    },
                };
                word.text.push('+');
                scanner.skip_whitespace();
                match scanner.next() {
                    Some(n) if n.is_ascii_alphanumeric() => word.text.push(n),
                    _ => return Err(scanner.error("'+' must be followed by a register or number")),
                }
                current = Some(word);
            }
            c => current
                .get_or_insert_with(|| Word {
                    text: String::new(),
                    line: scanner.line,
                    offset: scanner.offset,
                })
                .text
                .push(c),
        }
    }
    words.extend(current);
    Ok(words)
}

fn parse_register(text: &str) -> Option<Register> {
    text.parse().ok()
}

fn parse_number(text: &str) -> Option<u32> {
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

/// Parses one operand word.
///
/// `x@` marks a memory reference, `a+b` is register plus displacement or register
/// plus register, a decimal number is an immediate, a register name is a register,
/// and anything else names a label.
pub fn parse_operand(text: &str) -> Result<Operand, VMError> {
    let invalid = || VMError::MalformedOperand {
        operand: text.to_string(),
    };

    let (body, address) = match text.strip_suffix('@') {
        Some(body) => (body, true),
        None => (text, false),
    };
    if body.is_empty() {
        return Err(invalid());
    }

    let operand = if let Some((left, right)) = body.split_once('+') {
        match (
            parse_register(left),
            parse_number(left),
            parse_register(right),
            parse_number(right),
        ) {
            (Some(base), _, Some(index), _) => Operand::reg_reg(base, index),
            (Some(base), _, None, Some(disp)) => Operand::reg_disp(base, disp),
            (None, Some(disp), Some(base), _) => Operand::reg_disp(base, disp),
            _ => return Err(invalid()),
        }
    } else if let Some(value) = parse_number(body) {
        Operand::imm(value)
    } else if let Some(reg) = parse_register(body) {
        Operand::reg(reg)
    } else if body.starts_with(|c: char| c.is_ascii_digit()) {
        // digits followed by junk, e.g. an out-of-range number
        return Err(invalid());
    } else {
        Operand::label(body)
    };

    Ok(if address { operand.at() } else { operand })
}

/// Two-operand words and the instruction they assemble to.
fn binary_instruction(word: &str) -> Option<Instruction> {
    Some(match word {
        "krz" | "kRz" => Instruction::Krz,
        "malkrz" | "malkRz" => Instruction::Malkrz,
        "ata" => Instruction::Ata,
        "nta" => Instruction::Nta,
        "ada" => Instruction::Ada,
        "ekc" => Instruction::Ekc,
        "dal" => Instruction::Dal,
        "dto" => Instruction::Dto,
        "dro" | "dRo" => Instruction::Dro,
        "dtosna" => Instruction::Dtosna,
        "krz8i" => Instruction::Krz8i,
        "krz16i" => Instruction::Krz16i,
        "krz8c" => Instruction::Krz8c,
        "krz16c" => Instruction::Krz16c,
        _ => return None,
    })
}

/// Cursor over the word list of one source file.
struct Words<'a> {
    words: &'a [Word],
    pos: usize,
}

impl<'a> Words<'a> {
    /// Takes the `n` words following the current one.
    fn take<const N: usize>(&mut self, head: &Word) -> Result<[&'a str; N], VMError> {
        let start = self.pos + 1;
        let slice = self
            .words
            .get(start..start + N)
            .ok_or_else(|| VMError::UnexpectedEndOfSource {
                word: head.text.clone(),
                expected: N - self.words.len().saturating_sub(start).min(N),
            })?;
        self.pos += N;
        let mut out = [""; N];
        for (o, w) in out.iter_mut().zip(slice) {
            *o = w.text.as_str();
        }
        Ok(out)
    }
}

/// Feeds one file's words to `asm`.
///
/// `'c'i` switches to destination-first operand order until `'i'c`; the mode
/// does not carry over to the next file. Errors carry the position of the word
/// that starts the failing statement.
pub fn analyze(words: &[Word], asm: &mut Assembler) -> Result<(), VMError> {
    let mut cursor = Words { words, pos: 0 };
    let mut reversed = false;
    asm.begin_file();

    while let Some(word) = words.get(cursor.pos) {
        analyze_word(word, &mut cursor, &mut reversed, asm).map_err(|e| match e {
            e @ VMError::ParseError { .. } => e,
            e => VMError::AssemblyError {
                line: word.line,
                offset: word.offset,
                reason: e.to_string(),
            },
        })?;
        cursor.pos += 1;
    }
    Ok(())
}

fn analyze_word(
    word: &Word,
    cursor: &mut Words<'_>,
    reversed: &mut bool,
    asm: &mut Assembler,
) -> Result<(), VMError> {
    let text = word.text.as_str();
    if let Some(instr) = binary_instruction(text) {
        let [first, second] = cursor.take::<2>(word)?;
        let (src, dst) = if *reversed {
            (second, first)
        } else {
            (first, second)
        };
        return asm.append(instr, &[parse_operand(src)?, parse_operand(dst)?]);
    }

    match text {
        "'c'i" => *reversed = true,
        "'i'c" => *reversed = false,
        "nll" => {
            let [name] = cursor.take::<1>(word)?;
            if cursor.words.get(cursor.pos + 1).is_some_and(|w| w.text == "l'") {
                return Err(VMError::DanglingLabel {
                    label: name.to_string(),
                });
            }
            asm.nll(name)?;
        }
        "l'" => {
            let [name] = cursor.take::<1>(word)?;
            asm.l(name)?;
        }
        "kue" => {
            let [name] = cursor.take::<1>(word)?;
            asm.export(name);
        }
        "xok" => {
            let [name] = cursor.take::<1>(word)?;
            asm.import(name);
        }
        "nac" => {
            let [dst] = cursor.take::<1>(word)?;
            asm.nac(parse_operand(dst)?)?;
        }
        "fi" => {
            let [a, b, cmp] = cursor.take::<3>(word)?;
            let cmp = Instruction::from_mnemonic(cmp)
                .filter(Instruction::is_comparison)
                .ok_or_else(|| VMError::InvalidInstructionName {
                    name: cmp.to_string(),
                })?;
            asm.fi(parse_operand(a)?, parse_operand(b)?, cmp)?;
        }
        "inj" | "lat" | "latsna" => {
            let [w1, w2, w3] = cursor.take::<3>(word)?;
            let instr = match text {
                "inj" => Instruction::Inj,
                "lat" => Instruction::Lat,
                _ => Instruction::Latsna,
            };
            let (a, b, c) = match (*reversed, instr) {
                (false, _) => (w1, w2, w3),
                (true, Instruction::Inj) => (w3, w2, w1),
                (true, _) => (w3, w1, w2),
            };
            asm.append(instr, &[parse_operand(a)?, parse_operand(b)?, parse_operand(c)?])?;
        }
        "kak" => {
            return Err(VMError::UnsupportedWord {
                word: text.to_string(),
            });
        }
        _ => {
            return Err(VMError::InvalidInstructionName {
                name: text.to_string(),
            });
        }
    }
    Ok(())
}
