use std::sync::atomic::{AtomicU64, Ordering};

use crate::anchor::Anchor;
use crate::bitmap::VoidBitmap;
use crate::error::{ErrorKind, Result};
use crate::flags::{state, StateFlags};
use crate::geometry::{Geometry, Lba};
use crate::horizon::HorizonRing;
use crate::quality::QualityMask;
use crate::trajectory::trajectory;

const SATURATION_NUMERATOR: u64 = 9;
const SATURATION_DENOMINATOR: u64 = 10;

/// The ballistic allocator: walks the bounded `K`-probe sequence through
/// `trajectory()` for a given anchor, skipping toxic or already-occupied
/// candidates, and falls back to the Horizon ring when the probe budget is
/// exhausted (spec.md §4.3).
pub struct Allocator<'a> {
    geometry: &'a Geometry,
    bitmap: &'a VoidBitmap,
    quality: &'a QualityMask,
    horizon: Option<&'a HorizonRing>,
    flags: &'a StateFlags,
    used_blocks: AtomicU64,
}

/// `alloc_block` succeeds in one of two distinct ways: a normal orbit probe
/// landed on a free, non-toxic block, or every probe in budget collided and
/// the allocation was satisfied from the Horizon ring instead. The latter
/// is informational, not an error (spec.md §4.4) — callers that care can
/// match on it, but `?` composes fine either way via `lba()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocOutcome {
    Orbit { lba: Lba, k: u8 },
    HorizonFallback { lba: Lba },
}

impl AllocOutcome {
    pub fn lba(self) -> Lba
    {
        match self {
            AllocOutcome::Orbit { lba, .. } => lba,
            AllocOutcome::HorizonFallback { lba } => lba,
        }
    }
}

impl<'a> Allocator<'a> {
    pub fn new(
        geometry: &'a Geometry,
        bitmap: &'a VoidBitmap,
        quality: &'a QualityMask,
        horizon: Option<&'a HorizonRing>,
        flags: &'a StateFlags,
    ) -> Self
    {
        Self {
            geometry,
            bitmap,
            quality,
            horizon,
            flags,
            used_blocks: AtomicU64::new(0),
        }
    }

    pub fn used_blocks(&self) -> u64
    {
        self.used_blocks.load(Ordering::Relaxed)
    }

    fn note_grant(&self)
    {
        let used = self.used_blocks.fetch_add(1, Ordering::AcqRel) + 1;
        self.flags.set_flag(state::DIRTY);

        if used.saturating_mul(SATURATION_DENOMINATOR)
            >= self.geometry.total_blocks.saturating_mul(SATURATION_NUMERATOR)
        {
            self.flags.set_flag(state::RUNTIME_SATURATED);
        }
    }

    /// Allocates the block for sequence index `n` of `anchor`. `k_max` is
    /// clamped below the reserved Horizon marker value (15) regardless of
    /// what the profile requests.
    pub fn alloc_block(&self, anchor: &Anchor, n: u64, k_max: u8) -> Result<AllocOutcome>
    {
        let k_max = k_max.min(14);
        let m = anchor.fractal_scale;
        let s = 1u64
            .checked_shl(m as u32)
            .ok_or(ErrorKind::Geometry)?;
        let flux_aligned = self.geometry.flux_aligned_at(m);
        let phi = self
            .geometry
            .flux_period_at(m)
            .ok_or(ErrorKind::Geometry)?;

        for k in 0..=k_max {
            let lba = trajectory(
                anchor.gravity_center,
                anchor.orbit_vector,
                n,
                k,
                flux_aligned,
                s,
                phi,
                self.geometry.is_zns,
            )
            .ok_or(ErrorKind::Geometry)?;

            let idx = lba - self.geometry.flux_start;
            if self.quality.is_toxic(idx) {
                // TOXIC is prohibitive on allocate regardless of bitmap
                // state: skip this probe, do not touch the bitmap.
                continue;
            }

            // A granule at fractal scale M spans S = 2^M physical blocks
            // starting at `idx`; the probe is only valid if every one of
            // them is free (spec.md §4.3's conservative interference
            // guard), and a successful probe must reserve all S, not just
            // the first.
            match self.bitmap.try_reserve_range(idx, s) {
                Ok(true) => {
                    self.note_grant();
                    return Ok(AllocOutcome::Orbit { lba, k });
                }
                Ok(false) => continue,
                Err(e) => return Err(e),
            }
        }

        self.horizon_fallback()
    }

    fn horizon_fallback(&self) -> Result<AllocOutcome>
    {
        let horizon = self.horizon.ok_or(ErrorKind::GravityCollapse)?;
        let lba = horizon.claim().map_err(|_| ErrorKind::GravityCollapse)?;
        self.note_grant();
        Ok(AllocOutcome::HorizonFallback { lba })
    }

    /// Frees the granule starting at `lba`. `fractal_scale` must match the
    /// `M` the block was allocated under, so all `S = 2^M` constituent
    /// sub-blocks are cleared, mirroring how `alloc_block` reserved them.
    pub fn free_block(&self, lba: Lba, fractal_scale: u16) -> Result<()>
    {
        if lba < self.geometry.flux_start {
            return Err(ErrorKind::Geometry.into());
        }
        let s = 1u64
            .checked_shl(fractal_scale as u32)
            .ok_or(ErrorKind::Geometry)?;
        let idx = lba - self.geometry.flux_start;
        self.bitmap.clear_range(idx, s)?;
        self.used_blocks.fetch_sub(1, Ordering::AcqRel);
        self.flags.set_flag(state::DIRTY);
        Ok(())
    }
}
