use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ErrorKind, Result};
use crate::flags::{state, StateFlags};
use crate::geometry::Geometry;

const EPOCH_MAGIC: u32 = 0x4830_4545;
pub const EPOCH_HEADER_SIZE: u64 = 24;

/// One commit record written to the epoch ring (spec.md §4.7). `pointer`
/// is the ring-relative slot this header itself occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochHeader {
    pub generation: u64,
    pub pointer: u64,
    pub crc: u32,
}

impl EpochHeader {
    fn compute_crc(generation: u64, pointer: u64) -> u32
    {
        let mut buf = [0u8; 20];
        buf[0..4].copy_from_slice(&EPOCH_MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&generation.to_le_bytes());
        buf[12..20].copy_from_slice(&pointer.to_le_bytes());
        crate::crc::crc32c(0, &buf)
    }

    fn new(generation: u64, pointer: u64) -> Self
    {
        Self {
            generation,
            pointer,
            crc: Self::compute_crc(generation, pointer),
        }
    }

    pub fn verify(&self) -> bool
    {
        Self::compute_crc(self.generation, self.pointer) == self.crc
    }
}

/// Monotonic commit-sequencing ring buffer (spec.md §4.7). Every
/// `epoch_advance` writes exactly one header, wrapping the write pointer
/// back to slot zero once the ring fills.
#[derive(Debug)]
pub struct EpochRing {
    ring_blocks: u64,
    generation: AtomicU64,
    write_ptr: AtomicU64,
}

impl EpochRing {
    pub fn new(ring_blocks: u64) -> Self
    {
        Self {
            ring_blocks,
            generation: AtomicU64::new(0),
            write_ptr: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64
    {
        self.generation.load(Ordering::Acquire)
    }

    pub fn write_ptr(&self) -> u64
    {
        self.write_ptr.load(Ordering::Acquire)
    }

    /// Pre-flight checks for `epoch_advance`, run in a fixed order so the
    /// most specific fault always wins over a weaker, more generic one
    /// (spec.md §4.7):
    ///
    /// 1. media already flagged read-only/toxic -> `MediaToxic`
    /// 2. block size too small to hold a header -> `Geometry`
    /// 3. superblock's replica generation saturated -> `EExist`
    /// 4. ring has no slots to write into -> `AlignmentFail`
    /// 5. write pointer out of the ring's range -> `DataRot`
    ///
    /// `copy_generation` is the superblock's own replica-broadcast
    /// counter (spec.md §3, §4.7), not this ring's internal epoch-id
    /// sequence — the cap applies to that counter, since it is what the
    /// four-replica selection on mount actually compares.
    pub fn check(&self, flags: &StateFlags, geometry: &Geometry, copy_generation: u64) -> Result<()>
    {
        if flags.test_flag(state::TOXIC) {
            return Err(ErrorKind::MediaToxic.into());
        }
        if geometry.block_size < EPOCH_HEADER_SIZE {
            return Err(ErrorKind::Geometry.into());
        }
        if copy_generation >= u64::MAX - 16 {
            return Err(ErrorKind::EExist.into());
        }
        if self.ring_blocks == 0 {
            return Err(ErrorKind::AlignmentFail.into());
        }
        if self.write_ptr() >= self.ring_blocks {
            return Err(ErrorKind::DataRot.into());
        }
        Ok(())
    }

    /// Advances the epoch: runs `check`, then writes the next header and
    /// wraps the ring pointer (spec.md §8 "epoch wrap" scenario).
    pub fn advance(
        &self,
        flags: &StateFlags,
        geometry: &Geometry,
        copy_generation: u64,
    ) -> Result<EpochHeader>
    {
        self.check(flags, geometry, copy_generation)?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let pointer = self.write_ptr();
        let header = EpochHeader::new(generation, pointer);

        let next_ptr = (pointer + 1) % self.ring_blocks;
        self.write_ptr.store(next_ptr, Ordering::Release);

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Profile;

    fn sample_geometry(block_size: u64) -> Geometry
    {
        Geometry {
            block_size,
            sector_size: 512,
            total_blocks: 25_600,
            profile: Profile::Standard,
            is_zns: false,
            flux_start: 100,
            horizon_start: 20_000,
            journal_start: 21_000,
            epoch_start: 21_000,
            cortex_start: 50,
            bitmap_start: 10,
            qmask_start: 20,
            fractal_max: 18,
        }
    }

    #[test]
    fn advance_bumps_generation_and_pointer()
    {
        let ring = EpochRing::new(4);
        let flags = StateFlags::new(0);
        let geom = sample_geometry(4096);

        let h0 = ring.advance(&flags, &geom, 0).unwrap();
        assert_eq!(h0.generation, 1);
        assert_eq!(h0.pointer, 0);
        assert!(h0.verify());

        let h1 = ring.advance(&flags, &geom, 1).unwrap();
        assert_eq!(h1.generation, 2);
        assert_eq!(h1.pointer, 1);
    }

    #[test]
    fn ring_wraps_after_filling()
    {
        let ring = EpochRing::new(2);
        let flags = StateFlags::new(0);
        let geom = sample_geometry(4096);

        ring.advance(&flags, &geom, 0).unwrap();
        ring.advance(&flags, &geom, 1).unwrap();
        let h = ring.advance(&flags, &geom, 2).unwrap();
        assert_eq!(h.pointer, 0);
        assert_eq!(h.generation, 3);
    }

    #[test]
    fn toxic_flag_blocks_advance_before_anything_else()
    {
        let ring = EpochRing::new(0);
        let flags = StateFlags::new(state::TOXIC);
        let geom = sample_geometry(4);

        assert_eq!(ring.check(&flags, &geom, 0).unwrap_err().kind, ErrorKind::MediaToxic);
    }

    #[test]
    fn undersized_block_is_geometry()
    {
        let ring = EpochRing::new(4);
        let flags = StateFlags::new(0);
        let geom = sample_geometry(8);
        assert_eq!(ring.check(&flags, &geom, 0).unwrap_err().kind, ErrorKind::Geometry);
    }

    #[test]
    fn zero_length_ring_is_alignment_fail()
    {
        let ring = EpochRing::new(0);
        let flags = StateFlags::new(0);
        let geom = sample_geometry(4096);
        assert_eq!(ring.check(&flags, &geom, 0).unwrap_err().kind, ErrorKind::AlignmentFail);
    }

    #[test]
    fn generation_cap_is_eexist()
    {
        let ring = EpochRing::new(4);
        let flags = StateFlags::new(0);
        let geom = sample_geometry(4096);
        assert_eq!(
            ring.check(&flags, &geom, u64::MAX - 15).unwrap_err().kind,
            ErrorKind::EExist
        );
        assert!(ring.check(&flags, &geom, u64::MAX - 17).is_ok());
    }

    #[test]
    fn out_of_range_pointer_is_data_rot()
    {
        let ring = EpochRing::new(4);
        ring.write_ptr.store(9, Ordering::Relaxed);
        let flags = StateFlags::new(0);
        let geom = sample_geometry(4096);
        assert_eq!(ring.check(&flags, &geom, 0).unwrap_err().kind, ErrorKind::DataRot);
    }
}
