//! Flat binary program images.
//!
//! An image is raw instruction bytes with no header; it is placed at a base
//! address (the initial program counter) by [`VM::load`](super::vm::VM::load).
//! Images produced by the assembler also carry the absolute addresses of their
//! exported labels, which are not part of the on-disk form.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::DEFAULT_ENTRY;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Assembled or loaded program image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Program {
    /// Address of the first byte.
    pub base: u32,
    pub code: Vec<u8>,
    /// Exported labels (`kue`) with their absolute addresses.
    pub symbols: BTreeMap<String, u32>,
}

impl Program {
    pub fn new(base: u32, code: Vec<u8>) -> Self {
        Self {
            base,
            code,
            symbols: BTreeMap::new(),
        }
    }

    /// Wraps raw bytes placed at the default entry address.
    pub fn from_bytes(code: Vec<u8>) -> Self {
        Self::new(DEFAULT_ENTRY, code)
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Reads an image file to be placed at `base`.
    pub fn from_file<P: AsRef<Path>>(path: P, base: u32) -> Result<Self, VMError> {
        let path = path.as_ref();
        let code = fs::read(path).map_err(|e| VMError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::new(base, code))
    }

    /// Writes the image bytes to `path`.
    ///
    /// The bytes go to a temporary file in the destination directory first and
    /// are renamed into place, so a failure never leaves a truncated image behind.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), VMError> {
        let path = path.as_ref();
        let io_err = |e: std::io::Error| VMError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&self.code).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
