use crate::anchor::Anchor;
use crate::error::{ErrorKind, Result};
use crate::util::ceil_division;

const SLOT_SIZE: usize = 128;
const HEADER_SIZE: usize = 14;
const PAYLOAD_PER_SLOT: usize = SLOT_SIZE - HEADER_SIZE;
const MAX_OBJECT_SIZE: usize = 16 * 1024;

const MAGIC_FREE: u32 = 0x4652_4545;
const MAGIC_PENDING: u32 = 0x504e_4447;
const MAGIC_COMMITTED: u32 = 0x434d_4954;

/// `Anchor::write_gen` is the generation the anchor was last written under;
/// a lattice object always commits one generation ahead of it (spec.md
/// §4.6).
pub fn next_object_version(anchor: &Anchor) -> u32
{
    anchor.write_gen.wrapping_add(1)
}

/// The nano-lattice: packs objects too small to justify a whole block into
/// 128-byte slots within the cortex region, using a two-phase commit so a
/// crash between slot reservation and final commit leaves no slot readable
/// as valid data (spec.md §4.6).
pub struct NanoLattice {
    raw: Vec<u8>,
    occupied: Vec<bool>,
    slot_count: usize,
}

impl NanoLattice {
    pub fn new(slot_count: usize) -> Self
    {
        let mut raw = vec![0u8; slot_count * SLOT_SIZE];
        for i in 0..slot_count {
            write_magic(&mut raw, i, MAGIC_FREE);
        }
        Self {
            raw,
            occupied: vec![false; slot_count],
            slot_count,
        }
    }

    pub fn slot_count(&self) -> usize
    {
        self.slot_count
    }

    fn find_free_run(&self, n: usize) -> Result<usize>
    {
        if n == 0 || n > self.slot_count {
            return Err(ErrorKind::ENoSpc.into());
        }

        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for i in 0..self.slot_count {
            if self.occupied[i] {
                run_start = i + 1;
                run_len = 0;
            } else {
                run_len += 1;
                if run_len == n {
                    return Ok(run_start);
                }
            }
        }
        Err(ErrorKind::ENoSpc.into())
    }

    /// Writes `payload` into a fresh run of slots and returns the starting
    /// slot index. Performs the two-phase commit described on the type:
    /// every slot in the run is marked `PNDG` (reserved) before any payload
    /// byte is written, the payload and its per-slot CRC land next, and
    /// only then does a final pass flip every slot's magic to `CMIT`.
    pub fn put(&mut self, payload: &[u8], version: u32) -> Result<usize>
    {
        if payload.len() > MAX_OBJECT_SIZE {
            return Err(ErrorKind::InvalidArgument.into());
        }

        let n_slots = ceil_division(payload.len().max(1) as u64, PAYLOAD_PER_SLOT as u64) as usize;
        let start = self.find_free_run(n_slots)?;

        for i in start..start + n_slots {
            self.occupied[i] = true;
            write_magic(&mut self.raw, i, MAGIC_PENDING);
        }

        for (slot_offset, i) in (start..start + n_slots).enumerate() {
            let lo = slot_offset * PAYLOAD_PER_SLOT;
            let hi = (lo + PAYLOAD_PER_SLOT).min(payload.len());
            let chunk = if lo < payload.len() { &payload[lo..hi] } else { &[] };

            let crc = crate::crc::crc32c(0, chunk);
            write_header_fields(&mut self.raw, i, chunk.len() as u16, crc, version);
            write_payload(&mut self.raw, i, chunk);
        }

        for i in start..start + n_slots {
            write_magic(&mut self.raw, i, MAGIC_COMMITTED);
        }

        Ok(start)
    }

    /// Reads back an object spanning `n_slots` slots from `start`. Any slot
    /// whose magic is not `CMIT` means the write never completed (or the
    /// slot was never occupied) — surfaced as `Tampered`, the same kind a
    /// torn superblock broadcast reports.
    pub fn get(&self, start: usize, n_slots: usize) -> Result<Vec<u8>>
    {
        if start + n_slots > self.slot_count {
            return Err(ErrorKind::Geometry.into());
        }

        let mut out = Vec::new();
        for i in start..start + n_slots {
            let (magic, len, crc, _version) = read_header_fields(&self.raw, i);
            if magic != MAGIC_COMMITTED {
                return Err(ErrorKind::Tampered.into());
            }

            let payload = read_payload(&self.raw, i, len as usize);
            if crate::crc::crc32c(0, payload) != crc {
                return Err(ErrorKind::DataRot.into());
            }
            out.extend_from_slice(payload);
        }

        Ok(out)
    }

    pub fn free(&mut self, start: usize, n_slots: usize) -> Result<()>
    {
        if start + n_slots > self.slot_count {
            return Err(ErrorKind::Geometry.into());
        }

        for i in start..start + n_slots {
            self.occupied[i] = false;
            write_magic(&mut self.raw, i, MAGIC_FREE);
        }
        Ok(())
    }
}

fn slot_offset(i: usize) -> usize
{
    i * SLOT_SIZE
}

fn write_magic(raw: &mut [u8], i: usize, magic: u32)
{
    let off = slot_offset(i);
    raw[off..off + 4].copy_from_slice(&magic.to_le_bytes());
}

fn write_header_fields(raw: &mut [u8], i: usize, len: u16, crc: u32, version: u32)
{
    let off = slot_offset(i);
    raw[off + 4..off + 6].copy_from_slice(&len.to_le_bytes());
    raw[off + 6..off + 10].copy_from_slice(&crc.to_le_bytes());
    raw[off + 10..off + 14].copy_from_slice(&version.to_le_bytes());
}

fn read_header_fields(raw: &[u8], i: usize) -> (u32, u16, u32, u32)
{
    let off = slot_offset(i);
    let magic = u32::from_le_bytes(raw[off..off + 4].try_into().unwrap());
    let len = u16::from_le_bytes(raw[off + 4..off + 6].try_into().unwrap());
    let crc = u32::from_le_bytes(raw[off + 6..off + 10].try_into().unwrap());
    let version = u32::from_le_bytes(raw[off + 10..off + 14].try_into().unwrap());
    (magic, len, crc, version)
}

fn write_payload(raw: &mut [u8], i: usize, payload: &[u8])
{
    let off = slot_offset(i) + HEADER_SIZE;
    raw[off..off + payload.len()].copy_from_slice(payload);
}

fn read_payload(raw: &[u8], i: usize, len: usize) -> &[u8]
{
    let off = slot_offset(i) + HEADER_SIZE;
    &raw[off..off + len]
}
