//! Descriptor ring and TX slot cursors.

/// How a ring returns to index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingWrap {
    /// `(index + 1) % capacity`, nothing in the descriptor marks the end.
    ImplicitModulus,
    /// The driver flags the last descriptor with `EOR`; `capacity` is the hard upper bound.
    EndOfRingFlag,
}

/// Position of the device inside one descriptor ring (or slot array).
///
/// `index < capacity` always holds; every constructor and mutator maintains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    base: u64,
    stride: u64,
    capacity: u32,
    index: u32,
    wrap: RingWrap,
}

impl RingCursor {
    pub fn new(stride: u64, capacity: u32, wrap: RingWrap) -> Self {
        Self {
            base: 0,
            stride,
            capacity: capacity.max(1),
            index: 0,
            wrap,
        }
    }

    pub fn set_base(&mut self, base: u64) {
        self.base = base;
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bus address of descriptor `index`. Guest-programmed bases may sit anywhere, so this wraps
    /// instead of overflowing.
    pub fn descriptor_addr(&self, index: u32) -> u64 {
        self.base
            .wrapping_add(u64::from(index % self.capacity).wrapping_mul(self.stride))
    }

    /// Index following `index`, honouring `EOR` on flag-terminated rings.
    pub fn next_index(&self, index: u32, end_of_ring: bool) -> u32 {
        if end_of_ring && self.wrap == RingWrap::EndOfRingFlag {
            return 0;
        }
        (index + 1) % self.capacity
    }

    /// Step past the descriptor just consumed and return the new index.
    pub fn advance(&mut self, end_of_ring: bool) -> u32 {
        self.index = self.next_index(self.index, end_of_ring);
        self.index
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn end_of_ring_flag_wraps_early() {
        let mut ring = RingCursor::new(16, 64, RingWrap::EndOfRingFlag);
        ring.set_base(0x1000);
        assert_eq!(ring.advance(false), 1);
        assert_eq!(ring.descriptor_addr(ring.index()), 0x1010);
        assert_eq!(ring.advance(true), 0);
        assert_eq!(ring.descriptor_addr(ring.index()), 0x1000);
    }

    #[test]
    fn implicit_modulus_ignores_eor() {
        let mut ring = RingCursor::new(4, 4, RingWrap::ImplicitModulus);
        for _ in 0..3 {
            ring.advance(true);
        }
        assert_eq!(ring.index(), 3);
        assert_eq!(ring.advance(false), 0);
    }

    #[test]
    fn descriptor_addr_wraps_the_bus() {
        let mut ring = RingCursor::new(16, 64, RingWrap::EndOfRingFlag);
        ring.set_base(u64::MAX - 7);
        assert_eq!(ring.descriptor_addr(1), 8);
    }

    proptest! {
        #[test]
        fn fetches_without_eor_land_on_start_plus_n(
            capacity in 1u32..=64,
            start in 0u32..64,
            n in 0usize..512,
        ) {
            let mut ring = RingCursor::new(16, capacity, RingWrap::EndOfRingFlag);
            let start = start % capacity;
            for _ in 0..start {
                ring.advance(false);
            }
            prop_assert_eq!(ring.index(), start);

            for _ in 0..n {
                ring.advance(false);
                prop_assert!(ring.index() < capacity);
            }
            prop_assert_eq!(ring.index() as usize, (start as usize + n) % capacity as usize);
        }
    }
}
