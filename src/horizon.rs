use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorKind, Result};
use crate::geometry::Lba;

/// Sequential append-only overflow allocator (spec.md §4.4). Used once the
/// ballistic allocator exhausts its probe budget for an anchor (`K` would
/// reach the reserved marker value 15) or when a volume's profile disables
/// orbit probing entirely (Pico).
#[derive(Debug)]
pub struct HorizonRing {
    start: Lba,
    ring_len: u64,
    write_head: AtomicU64,
}

impl HorizonRing {
    pub fn new(start: Lba, ring_len: u64) -> Self
    {
        Self {
            start,
            ring_len,
            write_head: AtomicU64::new(0),
        }
    }

    pub fn ring_len(&self) -> u64
    {
        self.ring_len
    }

    /// Claims the next block in the ring. `ENoSpc` once every slot in the
    /// ring has been claimed since the volume was mounted — the ring does
    /// not recycle freed slots on its own; that is the allocator's job via
    /// `VoidBitmap`.
    pub fn claim(&self) -> Result<Lba>
    {
        if self.ring_len == 0 {
            return Err(ErrorKind::ENoSpc.into());
        }

        let mut cur = self.write_head.load(Ordering::Relaxed);
        loop {
            if cur >= self.ring_len {
                return Err(ErrorKind::ENoSpc.into());
            }

            match self.write_head.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(self.start + cur),
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn claimed(&self) -> u64
    {
        self.write_head.load(Ordering::Relaxed).min(self.ring_len)
    }
}
