use crate::virtual_machine::errors::VMError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_core::{OsRng, RngCore};
use std::collections::BTreeMap;

/// Sparse, byte-addressable 32-bit memory.
///
/// Cells that were never written hold no value until first read, at which point a
/// byte is drawn from the memory's own generator and kept for every later read.
/// Multi-byte accesses are big-endian and go through the byte primitives, so each
/// byte of a word is filled independently. Address arithmetic wraps at 2^32.
#[derive(Clone, Debug)]
pub struct Memory {
    cells: BTreeMap<u32, u8>,
    rng: StdRng,
}

impl Memory {
    /// Creates an empty memory whose fill generator is seeded from the OS.
    pub fn new() -> Self {
        Self::with_seed(OsRng.next_u64())
    }

    /// Creates an empty memory with a reproducible fill sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            cells: BTreeMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn read8(&mut self, addr: u32) -> u8 {
        let rng = &mut self.rng;
        *self
            .cells
            .entry(addr)
            .or_insert_with(|| rng.gen_range(0..=u8::MAX))
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        u16::from_be_bytes([self.read8(addr), self.read8(addr.wrapping_add(1))])
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read8(addr.wrapping_add(i as u32));
        }
        u32::from_be_bytes(bytes)
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        self.cells.insert(addr, value);
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        self.write_bytes(addr, &value.to_be_bytes());
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        self.write_bytes(addr, &value.to_be_bytes());
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.write8(addr.wrapping_add(i as u32), *b);
        }
    }

    /// Copies an image into memory starting at `base`.
    ///
    /// Fails without touching memory if the image would run past the top of the
    /// address space.
    pub fn load(&mut self, base: u32, image: &[u8]) -> Result<(), VMError> {
        let end = base as u64 + image.len() as u64;
        if end > u32::MAX as u64 + 1 {
            return Err(VMError::ProgramTooLarge {
                base,
                len: image.len(),
            });
        }
        for (i, b) in image.iter().enumerate() {
            self.write8(base + i as u32, *b);
        }
        Ok(())
    }

    /// Every touched cell in address order.
    pub fn snapshot(&self) -> &BTreeMap<u32, u8> {
        &self.cells
    }

    /// Number of cells that have been written or first-touched.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_touch_is_stable() {
        let mut mem = Memory::with_seed(7);
        let first = mem.read8(0x1000);
        for _ in 0..16 {
            assert_eq!(mem.read8(0x1000), first);
        }
        assert_eq!(mem.len(), 1);
    }

    #[test]
    fn write_replaces_filled_byte() {
        let mut mem = Memory::with_seed(7);
        let _ = mem.read8(0x20);
        mem.write8(0x20, 0xAB);
        assert_eq!(mem.read8(0x20), 0xAB);
        assert_eq!(mem.read8(0x20), 0xAB);
    }

    #[test]
    fn writes_do_not_fill_neighbours() {
        let mut mem = Memory::with_seed(1);
        mem.write32(0x100, 0xDEADBEEF);
        assert_eq!(mem.len(), 4);
        assert!(!mem.snapshot().contains_key(&0x104));
    }

    #[test]
    fn word_access_is_big_endian() {
        let mut mem = Memory::with_seed(0);
        mem.write32(0x40, 0x1122_3344);
        assert_eq!(mem.read8(0x40), 0x11);
        assert_eq!(mem.read8(0x43), 0x44);
        assert_eq!(mem.read16(0x41), 0x2233);
        mem.write16(0x40, 0xAABB);
        assert_eq!(mem.read32(0x40), 0xAABB_3344);
    }

    #[test]
    fn word_read_of_fresh_region_fixes_all_bytes() {
        let mut mem = Memory::with_seed(99);
        let word = mem.read32(0x8000);
        assert_eq!(mem.len(), 4);
        assert_eq!(mem.read32(0x8000), word);
        assert_eq!(mem.read8(0x8003), word as u8);
    }

    #[test]
    fn addresses_wrap_around() {
        let mut mem = Memory::with_seed(0);
        mem.write32(0xFFFF_FFFE, 0x0102_0304);
        assert_eq!(mem.read8(0xFFFF_FFFF), 0x02);
        assert_eq!(mem.read8(0x0000_0000), 0x03);
        assert_eq!(mem.read16(0x0000_0000), 0x0304);
        assert_eq!(mem.read32(0xFFFF_FFFE), 0x0102_0304);
    }

    #[test]
    fn same_seed_same_fill() {
        let mut a = Memory::with_seed(42);
        let mut b = Memory::with_seed(42);
        let xs: Vec<u8> = (0..32).map(|i| a.read8(i)).collect();
        let ys: Vec<u8> = (0..32).map(|i| b.read8(i)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn instances_do_not_share_generator() {
        let mut a = Memory::with_seed(5);
        let mut b = Memory::with_seed(5);
        // draining one instance must not shift the other's sequence
        for i in 0..100 {
            a.read8(0x1000 + i);
        }
        let mut c = Memory::with_seed(5);
        assert_eq!(b.read8(0), c.read8(0));
    }

    #[test]
    fn load_copies_image() {
        let mut mem = Memory::with_seed(0);
        mem.load(0x1483_0000, &[8, 4, 1, 2]).unwrap();
        let snap: Vec<_> = mem.snapshot().iter().map(|(a, b)| (*a, *b)).collect();
        assert_eq!(
            snap,
            vec![
                (0x1483_0000, 8),
                (0x1483_0001, 4),
                (0x1483_0002, 1),
                (0x1483_0003, 2)
            ]
        );
    }

    #[test]
    fn load_rejects_overflowing_image() {
        let mut mem = Memory::with_seed(0);
        assert!(matches!(
            mem.load(0xFFFF_FFFE, &[1, 2, 3]),
            Err(VMError::ProgramTooLarge { len: 3, .. })
        ));
        assert!(mem.is_empty());
        // exactly reaching the top is fine
        mem.load(0xFFFF_FFFE, &[1, 2]).unwrap();
        assert_eq!(mem.read8(0xFFFF_FFFF), 2);
    }
}
