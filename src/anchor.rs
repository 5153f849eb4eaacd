use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::error::{ErrorKind, Result};

/// Anchor data-class flags (spec.md §3 "Anchor"). `NANO` routes the object
/// through the nano-lattice packer instead of direct ballistic allocation.
pub mod data_class {
    pub const NANO: u16 = 1 << 0;
    pub const ZNS_APPEND: u16 = 1 << 1;
    pub const PENDING_GC: u16 = 1 << 2;
}

const INLINE_CAPACITY: usize = 48;

/// The per-object anchor record: the (G, V, M) trajectory parameters plus
/// enough inline storage to skip a block entirely for very small objects
/// (spec.md §3, §4.5, §4.6).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Anchor {
    pub gravity_center: u64,
    pub orbit_vector: u64,
    pub fractal_scale: u16,
    pub data_class: u16,
    pub version: u32,
    pub write_gen: u32,
    /// Valid only when `data_class & NANO` is set: the starting slot index
    /// into the nano-lattice cortex region (spec.md §4.6).
    pub nano_start_slot: u32,
    pub inline_len: u8,
    pub inline: Array<u8, INLINE_CAPACITY>,
}

impl Anchor {
    pub fn new(gravity_center: u64, orbit_vector: u64, fractal_scale: u16) -> Self
    {
        Self {
            gravity_center,
            orbit_vector,
            fractal_scale,
            data_class: 0,
            version: 0,
            write_gen: 0,
            nano_start_slot: 0,
            inline_len: 0,
            inline: Array::default(),
        }
    }

    pub fn is_nano(&self) -> bool
    {
        self.data_class & data_class::NANO != 0
    }

    pub fn is_zns_append(&self) -> bool
    {
        self.data_class & data_class::ZNS_APPEND != 0
    }

    /// Stashes `payload` inline and marks the anchor `NANO`-eligible for
    /// the lattice packer. `payload.len()` must fit within the 48-byte
    /// inline buffer; larger objects take the ballistic path instead.
    pub fn set_inline(&mut self, payload: &[u8]) -> Result<()>
    {
        if payload.len() > INLINE_CAPACITY {
            return Err(ErrorKind::InvalidArgument.into());
        }

        self.inline.0[..payload.len()].copy_from_slice(payload);
        self.inline.0[payload.len()..].fill(0);
        self.inline_len = payload.len() as u8;
        Ok(())
    }

    pub fn inline_bytes(&self) -> &[u8]
    {
        &self.inline.0[..self.inline_len as usize]
    }

    pub fn bump_version(&mut self)
    {
        self.version = self.version.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_anchor_has_no_data_class_flags()
    {
        let a = Anchor::new(1, 3, 0);
        assert!(!a.is_nano());
        assert!(!a.is_zns_append());
    }

    #[test]
    fn set_inline_roundtrip()
    {
        let mut a = Anchor::new(0, 1, 0);
        a.set_inline(b"small object").unwrap();
        assert_eq!(a.inline_bytes(), b"small object");
    }

    #[test]
    fn set_inline_rejects_oversized_payload()
    {
        let mut a = Anchor::new(0, 1, 0);
        let big = vec![0u8; INLINE_CAPACITY + 1];
        assert_eq!(a.set_inline(&big).unwrap_err().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn bump_version_wraps()
    {
        let mut a = Anchor::new(0, 1, 0);
        a.version = u32::MAX;
        a.bump_version();
        assert_eq!(a.version, 0);
    }

    #[test]
    fn serde_roundtrip_via_bincode()
    {
        let mut a = Anchor::new(7, 9, 3);
        a.set_inline(b"x").unwrap();
        a.data_class |= data_class::NANO;

        let bytes = bincode::serialize(&a).unwrap();
        let back: Anchor = bincode::deserialize(&bytes).unwrap();
        assert_eq!(a, back);
    }
}
