use crate::virtual_machine::isa::InstrClass;

/// Counts of executed instructions per [`InstrClass`], plus debug traps taken.
///
/// Backed by a flat array indexed by the class discriminant so the hot loop only
/// does one add per instruction.
#[derive(Clone, Debug)]
pub struct ExecProfile {
    counts: [u64; InstrClass::COUNT],
    traps: u64,
}

impl Default for ExecProfile {
    fn default() -> Self {
        Self {
            counts: [0; InstrClass::COUNT],
            traps: 0,
        }
    }
}

impl ExecProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record(&mut self, class: InstrClass) {
        let slot = &mut self.counts[class as usize];
        *slot = slot.saturating_add(1);
    }

    #[inline(always)]
    pub fn record_trap(&mut self) {
        self.traps = self.traps.saturating_add(1);
    }

    /// Total decoded instructions (traps excluded).
    pub fn instructions(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    pub fn traps(&self) -> u64 {
        self.traps
    }

    pub fn iter(&self) -> impl Iterator<Item = (InstrClass, u64)> {
        InstrClass::ALL.into_iter().zip(self.counts)
    }
}
