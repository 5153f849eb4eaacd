use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};
use crate::geometry::{Geometry, Lba, SB_SPACE};
use crate::hal::Hal;
use crate::util::{align_up_u128, ceil_division};

const SB_MAGIC: u64 = 0x484e_3453_4230_3120;

/// The superblock fields that vary per commit, as distinct from the
/// geometry fields fixed at format time — exactly the set spec.md §4.9
/// step 4 names as "always preserve" across an unmount plus the counters
/// the flag policy reads (spec.md §3).
#[derive(Clone, Copy, Debug, Default)]
pub struct SuperblockState {
    pub copy_generation: u64,
    pub current_epoch_id: u64,
    pub state_flags: u32,
    pub taint_counter: u32,
    pub dirty_bits: u32,
    pub sentinel_cursor: u64,
    pub compat_flags: u32,
    pub mount_intent: u32,
}

/// The fixed-size record broadcast to every replica (spec.md §3, §4.8).
/// `bincode`'s fixint encoding gives this a stable on-disk width, the same
/// way the teacher's `SuperBlock` is laid out in `filesys/e2fs`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u64,
    pub total_blocks: u64,
    pub block_size: u64,
    pub flux_start: u64,
    pub horizon_start: u64,
    pub journal_start: u64,
    pub epoch_start: u64,
    pub cortex_start: u64,
    pub bitmap_start: u64,
    pub qmask_start: u64,
    pub current_epoch_id: u64,
    /// Monotonic replica generation, capped at `u64::MAX - 16`
    /// (spec.md §3, §4.7). Distinct from `current_epoch_id`: this counts
    /// successful superblock broadcasts, not epoch-ring commits.
    pub copy_generation: u64,
    pub state_flags: u32,
    pub taint_counter: u32,
    pub dirty_bits: u32,
    pub profile_tag: u8,
    pub sentinel_cursor: u64,
    pub compat_flags: u32,
    pub mount_intent: u32,
    pub crc: u32,
}

impl Superblock {
    pub fn from_geometry(geometry: &Geometry, state: SuperblockState) -> Self
    {
        let mut sb = Self {
            magic: SB_MAGIC,
            total_blocks: geometry.total_blocks,
            block_size: geometry.block_size,
            flux_start: geometry.flux_start,
            horizon_start: geometry.horizon_start,
            journal_start: geometry.journal_start,
            epoch_start: geometry.epoch_start,
            cortex_start: geometry.cortex_start,
            bitmap_start: geometry.bitmap_start,
            qmask_start: geometry.qmask_start,
            current_epoch_id: state.current_epoch_id,
            copy_generation: state.copy_generation,
            state_flags: state.state_flags,
            taint_counter: state.taint_counter,
            dirty_bits: state.dirty_bits,
            profile_tag: geometry.profile.tag(),
            sentinel_cursor: state.sentinel_cursor,
            compat_flags: state.compat_flags,
            mount_intent: state.mount_intent,
            crc: 0,
        };
        sb.crc = sb.compute_crc();
        sb
    }

    fn compute_crc(&self) -> u32
    {
        let mut copy = *self;
        copy.crc = 0;
        let bytes = bincode::serialize(&copy).expect("superblock serializes infallibly");
        crate::crc::crc32c(0, &bytes)
    }

    pub fn verify(&self) -> bool
    {
        self.magic == SB_MAGIC && self.compute_crc() == self.crc
    }
}

/// The four replica slots (spec.md §3, §4.8, §6): North fixed at LBA 0,
/// East/West at `align_up(capacity * {33,66} / 100, block_size)`, and
/// South in the device's final `SB_SPACE` bytes — suppressed entirely
/// below `16 * SB_SPACE` bytes of capacity. All math runs through `u128`
/// so a near-`u64::MAX` byte capacity can't overflow before rounding.
pub(crate) fn replica_lbas(geometry: &Geometry) -> Result<Vec<Lba>>
{
    let total_bytes: u128 = (geometry.total_blocks as u128)
        .checked_mul(geometry.block_size as u128)
        .ok_or(ErrorKind::Geometry)?;
    if total_bytes == 0 {
        return Err(ErrorKind::Geometry.into());
    }

    let bs = geometry.block_size as u128;
    let east_bytes = total_bytes.checked_mul(33).ok_or(ErrorKind::Geometry)? / 100;
    let west_bytes = total_bytes.checked_mul(66).ok_or(ErrorKind::Geometry)? / 100;

    let east = (align_up_u128(east_bytes, bs) / bs) as Lba;
    let west = (align_up_u128(west_bytes, bs) / bs) as Lba;

    let mut lbas = vec![0u64, east, west];

    let sb_space = SB_SPACE as u128;
    if total_bytes >= 16 * sb_space {
        let south_bytes = total_bytes - sb_space;
        lbas.push((south_bytes / bs) as Lba);
    }

    Ok(lbas)
}

/// Broadcasts `sb` to every replica in order (North, East, West, South),
/// issuing a barrier between each write so a crash mid-broadcast leaves a
/// bounded, detectable amount of damage rather than a torn single replica
/// (spec.md §4.8). South is silently skipped on volumes below
/// `16 * SB_SPACE` bytes — not enough capacity to spare a fourth copy.
pub fn broadcast_superblock(hal: &dyn Hal, geometry: &Geometry, sb: &Superblock) -> Result<()>
{
    let sb_blocks = ceil_division(SB_SPACE, geometry.block_size);
    let buf_len = (sb_blocks * geometry.block_size) as usize;

    let mut buf = vec![0u8; buf_len];
    let encoded = bincode::serialize(sb).map_err(|_| ErrorKind::InternalFault)?;
    if encoded.len() > buf_len {
        return Err(ErrorKind::Geometry.into());
    }
    buf[..encoded.len()].copy_from_slice(&encoded);

    for lba in replica_lbas(geometry)? {
        hal.persist(lba, &buf)?;
        hal.barrier()?;
    }

    hal.sync_io()
}
