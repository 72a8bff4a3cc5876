/// Address images are loaded at and execution starts from.
pub const DEFAULT_ENTRY: u32 = 0x1483_0000;
/// Initial value of the frame register `F5`.
pub const DEFAULT_FRAME: u32 = 0x6D7A_A0F8;
/// Program counter value that ends a run.
pub const DEFAULT_RETURN_ADDRESS: u32 = 0xBDA5_74B8;
/// Program counter value that triggers the debug trap instead of a fetch.
pub const DEFAULT_DEBUG_TRAP: u32 = 0xBA5F_B6B0;

/// Execution parameters fixed when a [`VM`](super::VM) is constructed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecConfig {
    /// Initial `XX`, also the load address of the image.
    pub entry: u32,
    /// Initial `F5`. The word at this address is preset to `return_address`.
    pub frame: u32,
    pub return_address: u32,
    pub debug_trap: u32,
    /// Abort after this many decoded instructions. `None` runs unbounded.
    pub max_steps: Option<u64>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            entry: DEFAULT_ENTRY,
            frame: DEFAULT_FRAME,
            return_address: DEFAULT_RETURN_ADDRESS,
            debug_trap: DEFAULT_DEBUG_TRAP,
            max_steps: None,
        }
    }
}

impl ExecConfig {
    pub fn with_max_steps(mut self, limit: u64) -> Self {
        self.max_steps = Some(limit);
        self
    }
}
