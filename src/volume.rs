use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::anchor::Anchor;
use crate::bitmap::VoidBitmap;
use crate::epoch::EpochRing;
use crate::error::{ErrorKind, Result};
use crate::flags::{dirty_bits, state, StateFlags};
use crate::genesis::{alloc_genesis, GenesisIntent};
use crate::geometry::Geometry;
use crate::geometry::SB_SPACE;
use crate::hal::Hal;
use crate::horizon::HorizonRing;
use crate::quality::QualityMask;
use crate::spinlock::Spinlock;
use crate::superblock::{broadcast_superblock, replica_lbas, Superblock, SuperblockState};
use crate::util::ceil_division;

/// A mounted HN4 volume: the owning handle for every structure an open
/// volume needs (spec.md §4.9). Mount/unmount are the only operations
/// serialized through `admin_lock` — everything else (allocation, the
/// bitmap) has its own finer-grained synchronization.
pub struct Volume<'a> {
    pub geometry: Geometry,
    pub flags: StateFlags,
    pub bitmap: VoidBitmap,
    pub quality: QualityMask,
    pub horizon: Option<HorizonRing>,
    pub epoch: EpochRing,
    pub metadata_anchor: Anchor,
    copy_generation: AtomicU64,
    taint_counter: AtomicU32,
    sentinel_cursor: u64,
    compat_flags: u32,
    mount_intent: u32,
    admin_lock: Spinlock<()>,
    hal: &'a dyn Hal,
}

impl<'a> std::fmt::Debug for Volume<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Volume")
            .field("geometry", &self.geometry)
            .field("flags", &self.flags)
            .field("bitmap", &self.bitmap)
            .field("quality", &self.quality)
            .field("horizon", &self.horizon)
            .field("epoch", &self.epoch)
            .field("metadata_anchor", &self.metadata_anchor)
            .field("copy_generation", &self.copy_generation)
            .field("taint_counter", &self.taint_counter)
            .field("sentinel_cursor", &self.sentinel_cursor)
            .field("compat_flags", &self.compat_flags)
            .field("mount_intent", &self.mount_intent)
            .field("admin_lock", &self.admin_lock)
            .finish()
    }
}

fn read_replica(hal: &dyn Hal, geometry: &Geometry, lba: u64) -> Result<Superblock>
{
    let sb_blocks = ceil_division(SB_SPACE, geometry.block_size);
    let mut buf = vec![0u8; (sb_blocks * geometry.block_size) as usize];
    hal.submit_io(lba, &mut buf)?;
    bincode::deserialize(&buf).map_err(|_| ErrorKind::Uninitialized.into())
}

/// Reads every replica, keeping only those that verify (magic, CRC) and
/// agree with the geometry being mounted, then returns the one with the
/// highest `copy_generation` (spec.md §4.8, §4.9 "mount"). A single torn
/// or stale replica is survivable as long as one other replica is intact.
fn select_superblock(hal: &dyn Hal, geometry: &Geometry) -> Result<Superblock>
{
    let lbas = replica_lbas(geometry)?;

    let best = lbas
        .into_iter()
        .filter_map(|lba| read_replica(hal, geometry, lba).ok())
        .filter(|sb| sb.verify() && sb.total_blocks == geometry.total_blocks && sb.block_size == geometry.block_size)
        .max_by_key(|sb| sb.copy_generation);

    best.ok_or_else(|| ErrorKind::Tampered.into())
}

impl<'a> Volume<'a> {
    fn assemble(hal: &'a dyn Hal, geometry: Geometry, sb: &Superblock) -> Self
    {
        let flux_len = geometry.total_blocks - geometry.flux_start;
        let horizon = if geometry.profile.has_horizon() {
            Some(HorizonRing::new(
                geometry.horizon_start,
                geometry.total_blocks - geometry.horizon_start,
            ))
        } else {
            None
        };

        let mut initial = sb.state_flags & !state::CLEAN;
        initial |= state::DIRTY;

        Self {
            bitmap: VoidBitmap::new(flux_len),
            quality: QualityMask::new(flux_len as usize),
            horizon,
            epoch: EpochRing::new(geometry.profile.epoch_ring_blocks(geometry.block_size)),
            flags: StateFlags::new(initial),
            metadata_anchor: Anchor::new(0, 1, 0),
            copy_generation: AtomicU64::new(sb.copy_generation),
            taint_counter: AtomicU32::new(sb.taint_counter),
            sentinel_cursor: sb.sentinel_cursor,
            compat_flags: sb.compat_flags,
            mount_intent: sb.mount_intent,
            geometry,
            admin_lock: Spinlock::new(()),
            hal,
        }
    }

    /// Marks the volume tainted for this session. Surfaced to callers that
    /// detect corruption short of outright `PANIC` (spec.md §3 "taint
    /// counter"); persisted into `dirty_bits` at unmount.
    pub fn mark_tainted(&self)
    {
        self.taint_counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Writes a fresh, all-clean superblock and returns a newly mounted
    /// volume over it. Not itself part of the mount state machine — the
    /// one-time step before a volume exists at all.
    pub fn format(hal: &'a dyn Hal, geometry: Geometry) -> Result<Self>
    {
        geometry.validate()?;

        let state = SuperblockState {
            copy_generation: 0,
            state_flags: state::CLEAN | state::METADATA_ZEROED,
            ..Default::default()
        };
        let sb = Superblock::from_geometry(&geometry, state);
        broadcast_superblock(hal, &geometry, &sb)?;
        Ok(Self::assemble(hal, geometry, &sb))
    }

    /// Mount validation (spec.md §4.9): the geometry must validate on its
    /// own terms, the highest-generation valid replica must verify, and a
    /// volume whose last-known state already carries `TOXIC` refuses to
    /// mount at all. Fresh media (no `METADATA_ZEROED` replica) runs
    /// genesis on its metadata anchor before the volume is handed back.
    pub fn mount(hal: &'a dyn Hal, geometry: Geometry) -> Result<Self>
    {
        geometry.validate()?;

        let sb = select_superblock(hal, &geometry)?;
        if sb.state_flags & state::TOXIC != 0 {
            return Err(ErrorKind::MediaToxic.into());
        }

        let mut vol = Self::assemble(hal, geometry, &sb);

        if sb.state_flags & state::METADATA_ZEROED == 0 {
            let outcome = alloc_genesis(
                hal,
                &vol.geometry,
                &vol.flags,
                GenesisIntent::Metadata,
                0,
                None,
            )?;
            vol.metadata_anchor = outcome.anchor();
        }

        Ok(vol)
    }

    /// The flag-policy table applied on unmount (spec.md §4.9 step 4):
    /// `CLEAN` is only set when persistence actually completed AND no
    /// `PANIC`/`DEGRADED`/taint condition is outstanding; a pre-existing
    /// `DEGRADED` is never cleared by a later successful unmount.
    fn final_state_flags(&self, persistence_ok: bool) -> u32
    {
        let mut bits = self.flags.bits();
        let was_degraded = bits & state::DEGRADED != 0;
        bits &= !(state::CLEAN | state::DIRTY | state::DEGRADED);

        let tainted = self.taint_counter.load(Ordering::Acquire) > 0;
        let panicked = self.flags.test_flag(state::PANIC);

        if persistence_ok && !panicked && !was_degraded && !tainted {
            bits |= state::CLEAN;
        } else {
            bits |= state::DIRTY;
        }

        if was_degraded || !persistence_ok {
            bits |= state::DEGRADED;
        }

        bits
    }

    fn dirty_bits(&self) -> u32
    {
        let mut bits = 0;
        if self.taint_counter.load(Ordering::Acquire) > 0 {
            bits |= dirty_bits::DIRTY_BIT_TAINT;
        }
        bits
    }

    fn run_persistence_phase(&self) -> Result<()>
    {
        if self.geometry.profile.flushes_bitmap_on_unmount() {
            self.hal.persist(
                self.geometry.bitmap_start,
                &pad_to_block(&self.bitmap.to_bytes(), self.geometry.block_size),
            )?;
            self.hal.persist(
                self.geometry.qmask_start,
                &pad_to_block(self.quality.as_bytes(), self.geometry.block_size),
            )?;
            self.hal.sync_io()?;
        }

        let current_generation = self.copy_generation.load(Ordering::Acquire);

        // A generation-cap refusal must surface before any superblock
        // replica is touched, never after a partial broadcast.
        let header = self.epoch.advance(&self.flags, &self.geometry, current_generation)?;
        let next_generation = current_generation.saturating_add(1);

        let state = SuperblockState {
            copy_generation: next_generation,
            current_epoch_id: header.generation,
            state_flags: self.final_state_flags(true),
            taint_counter: self.taint_counter.load(Ordering::Acquire),
            dirty_bits: self.dirty_bits(),
            sentinel_cursor: self.sentinel_cursor,
            compat_flags: self.compat_flags,
            mount_intent: self.mount_intent,
        };
        let sb = Superblock::from_geometry(&self.geometry, state);
        broadcast_superblock(self.hal, &self.geometry, &sb)?;

        self.copy_generation.store(next_generation, Ordering::Release);
        Ok(())
    }

    /// Unmounts the volume: validate -> refuse outright if `TOXIC` -> skip
    /// persistence entirely when read-only -> run the persistence phase ->
    /// unconditional teardown. The teardown step always runs, even when the
    /// persistence phase failed partway through, so local state never leaks
    /// past the call regardless of what made it to disk (spec.md §4.9).
    pub fn unmount(mut self, read_only: bool) -> Result<()>
    {
        self.geometry.validate()?;
        let _admin = self.admin_lock.lock();

        if self.flags.test_flag(state::TOXIC) {
            return Err(ErrorKind::MediaToxic.into());
        }

        let persistence_result = if read_only {
            Ok(())
        } else {
            self.run_persistence_phase()
        };

        let final_bits = self.final_state_flags(persistence_result.is_ok());
        self.flags.set_bits(final_bits);
        self.quality = QualityMask::new(0);

        persistence_result
    }
}

fn pad_to_block(bytes: &[u8], block_size: u64) -> Vec<u8>
{
    let blocks = ceil_division(bytes.len() as u64, block_size);
    let mut buf = vec![0u8; (blocks * block_size) as usize];
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Profile;
    use crate::hal::MemHal;

    fn sample_geometry() -> Geometry
    {
        Geometry {
            block_size: 4096,
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
    fn format_then_mount_roundtrip()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);

        let vol = Volume::format(&hal, geom).unwrap();
        vol.unmount(false).unwrap();

        let vol2 = Volume::mount(&hal, geom).unwrap();
        assert!(!vol2.flags.test_flag(state::TOXIC));
    }

    #[test]
    fn clean_unmount_sets_clean_flag()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let vol = Volume::format(&hal, geom).unwrap();

        vol.unmount(false).unwrap();

        let sb = select_superblock(&hal, &geom).unwrap();
        assert!(sb.state_flags & state::CLEAN != 0);
        assert!(sb.state_flags & state::DIRTY == 0);
    }

    #[test]
    fn read_only_unmount_skips_persistence()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let vol = Volume::format(&hal, geom).unwrap();

        let sb_before = select_superblock(&hal, &geom).unwrap();
        vol.unmount(true).unwrap();
        let sb_after = select_superblock(&hal, &geom).unwrap();

        assert_eq!(sb_before.copy_generation, sb_after.copy_generation);
    }

    #[test]
    fn taint_blocks_clean_but_persists_dirty_bit()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let vol = Volume::format(&hal, geom).unwrap();
        vol.mark_tainted();

        vol.unmount(false).unwrap();

        let sb = select_superblock(&hal, &geom).unwrap();
        assert!(sb.state_flags & state::CLEAN == 0);
        assert!(sb.state_flags & state::DIRTY != 0);
        assert!(sb.dirty_bits & dirty_bits::DIRTY_BIT_TAINT != 0);
        assert_eq!(sb.taint_counter, 1);
    }

    #[test]
    fn degraded_flag_survives_a_later_clean_unmount()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let vol = Volume::format(&hal, geom).unwrap();
        vol.flags.set_flag(state::DEGRADED);

        vol.unmount(false).unwrap();

        let sb = select_superblock(&hal, &geom).unwrap();
        assert!(sb.state_flags & state::DEGRADED != 0);
        assert!(sb.state_flags & state::CLEAN == 0);
    }

    #[test]
    fn mount_rejects_toxic_volume()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let state = SuperblockState {
            state_flags: state::TOXIC | state::METADATA_ZEROED,
            ..Default::default()
        };
        let sb = Superblock::from_geometry(&geom, state);
        broadcast_superblock(&hal, &geom, &sb).unwrap();

        let err = Volume::mount(&hal, geom).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MediaToxic);
    }

    #[test]
    fn unmount_refuses_a_toxic_volume()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let vol = Volume::format(&hal, geom).unwrap();
        vol.flags.set_flag(state::TOXIC);

        let err = vol.unmount(false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MediaToxic);
    }

    #[test]
    fn mount_rejects_tampered_superblock()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        // Nothing was ever formatted: every replica is all zero bytes,
        // which deserializes but fails the CRC/magic check.
        let err = Volume::mount(&hal, geom).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Tampered);
    }

    #[test]
    fn mount_runs_genesis_on_fresh_media()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);
        let state = SuperblockState { state_flags: state::CLEAN, ..Default::default() };
        let sb = Superblock::from_geometry(&geom, state);
        broadcast_superblock(&hal, &geom, &sb).unwrap();

        let vol = Volume::mount(&hal, geom).unwrap();
        let phi = geom.flux_period_at(0).unwrap();
        assert!(vol.metadata_anchor.gravity_center < phi);
    }

    #[test]
    fn mount_picks_the_highest_generation_replica()
    {
        let geom = sample_geometry();
        let hal = MemHal::new(geom.total_blocks, geom.block_size, 1);

        let vol = Volume::format(&hal, geom).unwrap();
        vol.unmount(false).unwrap();

        // Poison the North replica in place so only a stale read there
        // would be picked up; the East/West/South replicas carry the
        // post-unmount generation and must win the selection.
        let sb_blocks = ceil_division(SB_SPACE, geom.block_size);
        let garbage = vec![0xffu8; (sb_blocks * geom.block_size) as usize];
        hal.persist(0, &garbage).unwrap();

        let vol2 = Volume::mount(&hal, geom).unwrap();
        assert!(!vol2.flags.test_flag(state::TOXIC));
    }
}
