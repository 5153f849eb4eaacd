use crate::error::{ErrorKind, Result};
use crate::spinlock::Spinlock;

const BITS_PER_WORD: u64 = 64;

/// Computes the one-byte checksum ("ECC") covering a word's data bits and
/// version. A single byte cannot correct anything, so this plays only the
/// corruption-detection half of the armored word's contract; the name
/// follows the design's own (Design Notes §9).
fn word_ecc(bits: u64, version: u32) -> u8
{
    let mut buf = [0u8; 12];
    buf[0..8].copy_from_slice(&bits.to_le_bytes());
    buf[8..12].copy_from_slice(&version.to_le_bytes());
    crate::crc::crc32c(0, &buf) as u8
}

/// A 128-bit armored lane: 64 data bits + version + ECC byte, padded to a
/// 16-byte word (spec.md §3 "Armored word"). On hardware with a native
/// 128-bit CAS this would be one atomic lane; here it is protected by a
/// dedicated `Spinlock`, one per word — the engine's only synchronization
/// point on the bitmap (Design Notes §9).
#[derive(Clone, Copy, Debug)]
#[repr(C, align(16))]
struct ArmoredWordData {
    bits: u64,
    version: u32,
    ecc: u8,
    _reserved: [u8; 3],
}

impl ArmoredWordData {
    fn fresh(bits: u64) -> Self
    {
        let version = 0;
        Self {
            bits,
            version,
            ecc: word_ecc(bits, version),
            _reserved: [0; 3],
        }
    }

    fn check(&self) -> bool
    {
        word_ecc(self.bits, self.version) == self.ecc
    }

    fn rewrite(&mut self, bits: u64)
    {
        self.bits = bits;
        self.version = self.version.wrapping_add(1);
        self.ecc = word_ecc(self.bits, self.version);
    }
}

#[derive(Debug)]
struct ArmoredWord(Spinlock<ArmoredWordData>);

impl ArmoredWord {
    fn new(bits: u64) -> Self
    {
        Self(Spinlock::new(ArmoredWordData::fresh(bits)))
    }
}

/// The void bitmap: authoritative free/used state for every block in the
/// Flux and Horizon regions (spec.md §3, §4.1). A set bit means allocated.
#[derive(Debug)]
pub struct VoidBitmap {
    words: Vec<ArmoredWord>,
    len: u64,
}

impl VoidBitmap {
    pub fn new(len: u64) -> Self
    {
        let word_count = (len + BITS_PER_WORD - 1) / BITS_PER_WORD;
        let words = (0..word_count).map(|_| ArmoredWord::new(0)).collect();
        Self { words, len }
    }

    pub fn len(&self) -> u64
    {
        self.len
    }

    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    fn locate(&self, lba: u64) -> Result<(usize, u32)>
    {
        if lba >= self.len {
            return Err(ErrorKind::Geometry.into());
        }
        Ok(((lba / BITS_PER_WORD) as usize, (lba % BITS_PER_WORD) as u32))
    }

    /// Sets the bit for `lba`. Returns `changed = false` (not an error) if
    /// the bit was already set — the allocator treats that as a collision,
    /// not a fault.
    pub fn set(&self, lba: u64) -> Result<bool>
    {
        let (word_idx, bit) = self.locate(lba)?;
        let mut guard = self.words[word_idx].0.lock();

        if !guard.check() {
            return Err(ErrorKind::DataRot.into());
        }

        let mask = 1u64 << bit;
        if guard.bits & mask != 0 {
            return Ok(false);
        }

        let new_bits = guard.bits | mask;
        guard.rewrite(new_bits);
        Ok(true)
    }

    /// Clears the bit for `lba`. Idempotent: clearing an already-clear bit
    /// is success, not an error (Design Notes §9, "free-on-double-free").
    pub fn clear(&self, lba: u64) -> Result<()>
    {
        let (word_idx, bit) = self.locate(lba)?;
        let mut guard = self.words[word_idx].0.lock();

        if !guard.check() {
            return Err(ErrorKind::DataRot.into());
        }

        let mask = 1u64 << bit;
        if guard.bits & mask == 0 {
            return Ok(());
        }

        let new_bits = guard.bits & !mask;
        guard.rewrite(new_bits);
        Ok(())
    }

    /// Clears the bit unconditionally, even over a word whose ECC has
    /// already failed, rewriting fresh data and ECC in the same stroke.
    /// Decision recorded in DESIGN.md (spec.md §9 Open Question): a
    /// `force_clear` always repairs the word rather than leaving it
    /// poisoned, since the caller is asserting the new state is
    /// authoritative.
    pub fn force_clear(&self, lba: u64) -> Result<()>
    {
        let (word_idx, bit) = self.locate(lba)?;
        let mut guard = self.words[word_idx].0.lock();

        let mask = 1u64 << bit;
        let new_bits = guard.bits & !mask;
        guard.rewrite(new_bits);
        Ok(())
    }

    /// Reserves `count` consecutive bits starting at `start` as a single
    /// unit: either every bit transitions free-to-set, or none do. Backs
    /// the M>0 fractal-interference guard (spec.md §4.3), where a granule
    /// spans `S = 2^M` physical blocks and a probe is only valid if all `S`
    /// constituent sub-blocks are free. Not a true atomic multi-word CAS —
    /// it probes then claims bit-by-bit and unwinds on a lost race — but
    /// the net effect observed by callers is all-or-nothing.
    pub fn try_reserve_range(&self, start: u64, count: u64) -> Result<bool>
    {
        for i in 0..count {
            if self.test(start + i)? {
                return Ok(false);
            }
        }

        let mut claimed = 0u64;
        for i in 0..count {
            match self.set(start + i) {
                Ok(true) => claimed += 1,
                Ok(false) => {
                    for j in 0..claimed {
                        let _ = self.clear(start + j);
                    }
                    return Ok(false);
                }
                Err(e) => {
                    for j in 0..claimed {
                        let _ = self.clear(start + j);
                    }
                    return Err(e);
                }
            }
        }

        Ok(true)
    }

    /// Clears `count` consecutive bits starting at `start`, mirroring
    /// `clear`'s free-on-double-free idempotence per bit.
    pub fn clear_range(&self, start: u64, count: u64) -> Result<()>
    {
        for i in 0..count {
            self.clear(start + i)?;
        }
        Ok(())
    }

    pub fn test(&self, lba: u64) -> Result<bool>
    {
        let (word_idx, bit) = self.locate(lba)?;
        let guard = self.words[word_idx].0.lock();

        if !guard.check() {
            return Err(ErrorKind::DataRot.into());
        }

        Ok(guard.bits & (1u64 << bit) != 0)
    }

    /// Serializes to the on-disk packed format: 8 bytes per 64 blocks,
    /// little-endian, with the armor (ECC/version) stripped — it is
    /// reconstructed deterministically by `from_bytes` (spec.md §6).
    pub fn to_bytes(&self) -> Vec<u8>
    {
        let mut out = Vec::with_capacity(self.words.len() * 8);
        for word in &self.words {
            let guard = word.0.lock();
            out.extend_from_slice(&guard.bits.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8], len: u64) -> Result<Self>
    {
        let word_count = ((len + BITS_PER_WORD - 1) / BITS_PER_WORD) as usize;
        if bytes.len() < word_count * 8 {
            return Err(ErrorKind::Geometry.into());
        }

        let words = (0..word_count)
            .map(|i| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
                ArmoredWord::new(u64::from_le_bytes(raw))
            })
            .collect();

        Ok(Self { words, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn set_then_test()
    {
        let bmp = VoidBitmap::new(128);
        assert_eq!(bmp.set(5).unwrap(), true);
        assert!(bmp.test(5).unwrap());
        assert!(!bmp.test(6).unwrap());
    }

    #[test]
    fn set_twice_reports_unchanged()
    {
        let bmp = VoidBitmap::new(128);
        assert!(bmp.set(5).unwrap());
        assert!(!bmp.set(5).unwrap());
    }

    #[test]
    fn clear_is_idempotent()
    {
        let bmp = VoidBitmap::new(128);
        bmp.clear(5).unwrap();
        bmp.clear(5).unwrap();
        bmp.set(5).unwrap();
        bmp.clear(5).unwrap();
        assert!(!bmp.test(5).unwrap());
    }

    #[test]
    fn out_of_range_is_geometry()
    {
        let bmp = VoidBitmap::new(64);
        assert_eq!(bmp.set(64).unwrap_err().kind, ErrorKind::Geometry);
        assert_eq!(bmp.test(100).unwrap_err().kind, ErrorKind::Geometry);
    }

    #[test]
    fn roundtrip_through_bytes()
    {
        let bmp = VoidBitmap::new(200);
        for lba in [0u64, 1, 63, 64, 65, 199] {
            bmp.set(lba).unwrap();
        }

        let bytes = bmp.to_bytes();
        let reloaded = VoidBitmap::from_bytes(&bytes, 200).unwrap();

        for lba in 0..200 {
            assert_eq!(bmp.test(lba).unwrap(), reloaded.test(lba).unwrap());
        }
    }

    #[test]
    fn force_clear_repairs_a_corrupt_word()
    {
        let bmp = VoidBitmap::new(64);
        bmp.set(3).unwrap();

        {
            let mut guard = bmp.words[0].0.lock();
            guard.ecc ^= 0xff;
        }
        assert_eq!(bmp.test(3).unwrap_err().kind, ErrorKind::DataRot);

        bmp.force_clear(3).unwrap();
        assert!(!bmp.test(3).unwrap());
        assert!(bmp.set(3).unwrap());
    }

    #[test]
    fn try_reserve_range_claims_all_or_nothing()
    {
        let bmp = VoidBitmap::new(64);
        assert!(bmp.try_reserve_range(4, 4).unwrap());
        for lba in 4..8 {
            assert!(bmp.test(lba).unwrap());
        }

        // A later probe overlapping even one already-claimed bit must be
        // refused, and must not leave any of its own bits set behind.
        assert!(!bmp.try_reserve_range(6, 4).unwrap());
        assert!(!bmp.test(8).unwrap());
        assert!(!bmp.test(9).unwrap());

        bmp.clear_range(4, 4).unwrap();
        for lba in 4..8 {
            assert!(!bmp.test(lba).unwrap());
        }
    }

    #[test]
    fn concurrent_sets_never_double_grant_same_bit()
    {
        let bmp = Arc::new(VoidBitmap::new(4096));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let bmp = Arc::clone(&bmp);
            handles.push(thread::spawn(move || {
                let mut won = 0u32;
                for lba in 0..4096u64 {
                    if bmp.set(lba).unwrap() {
                        won += 1;
                    }
                }
                won
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 4096);
    }
}
