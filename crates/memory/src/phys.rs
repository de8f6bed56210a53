use thiserror::Error;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size.
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    /// The requested size cannot be represented by the current platform's `usize`.
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Guest *physical* memory storage.
///
/// Addresses are always `u64`; devices program 64-bit bus addresses even when the host only backs a
/// few megabytes of RAM. Out-of-range accesses are reported, never clamped.
pub trait GuestMemory {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory. A failed write leaves memory
    /// untouched.
    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;
}

impl<T: GuestMemory + ?Sized> GuestMemory for &mut T {
    fn size(&self) -> u64 {
        <T as GuestMemory>::size(&**self)
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::read_into(&**self, paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::write_from(&mut **self, paddr, src)
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for Box<T> {
    fn size(&self) -> u64 {
        <T as GuestMemory>::size(&**self)
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::read_into(&**self, paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::write_from(&mut **self, paddr, src)
    }
}

fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let end = paddr
        .checked_add(len as u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

/// Contiguous, fully-allocated guest RAM.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn range_to_usize(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        check_range(self.size(), paddr, len)?;
        // `check_range` guarantees `paddr + len <= data.len()`, which fits in usize.
        let start = paddr as usize;
        Ok((start, start + len))
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dense_round_trips_unaligned_spans() {
        let mut mem = DenseMemory::new(64).unwrap();
        mem.write_from(3, &[1, 2, 3, 4, 5]).unwrap();

        let mut buf = [0u8; 7];
        mem.read_into(2, &mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 0]);
        mem.read_into(64, &mut []).unwrap();
    }

    #[test]
    fn dense_rejects_accesses_past_the_end() {
        let mut mem = DenseMemory::new(16).unwrap();

        assert_eq!(
            mem.read_into(14, &mut [0u8; 4]),
            Err(GuestMemoryError::OutOfRange {
                paddr: 14,
                len: 4,
                size: 16
            })
        );
        assert!(mem.write_from(u64::MAX, &[1]).is_err());
        // A failed write must not touch the in-range prefix.
        assert!(mem.write_from(12, &[0xaa; 8]).is_err());
        assert_eq!(&mem.as_slice()[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn forwarding_impls_reach_the_backend() {
        let mut mem = DenseMemory::new(8).unwrap();
        {
            let mut borrowed: &mut DenseMemory = &mut mem;
            borrowed.write_from(0, &[7]).unwrap();
        }
        let boxed: Box<dyn GuestMemory> = Box::new(mem);
        let mut byte = [0u8; 1];
        boxed.read_into(0, &mut byte).unwrap();
        assert_eq!(byte, [7]);
        assert_eq!(boxed.size(), 8);
    }

    proptest! {
        #[test]
        fn dense_accepts_exactly_the_in_range_accesses(
            size in 1u64..256,
            paddr in 0u64..300,
            len in 0usize..64,
        ) {
            let mem = DenseMemory::new(size).unwrap();
            let mut buf = vec![0u8; len];
            let ok = mem.read_into(paddr, &mut buf).is_ok();
            prop_assert_eq!(ok, paddr + len as u64 <= size);
        }
    }
}
