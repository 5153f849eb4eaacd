//! HN4: a bare-metal ballistic block-allocation and persistence engine.
//!
//! Objects are not addressed by a free list or a B-tree but by a pure
//! trajectory function over an anchor's `(gravity_center, orbit_vector,
//! fractal_scale)` — the same physical block can be recomputed from those
//! three numbers and a sequence index without ever touching the bitmap,
//! which exists only to arbitrate collisions and record what is occupied.
//!
//! Module map:
//! - [`geometry`]: validated on-disk layout, profiles, device capabilities
//! - [`trajectory`]: the pure `T(G, V, N, M, K)` allocation function
//! - [`bitmap`]: the armored (ECC-protected) free/used bitmap
//! - [`quality`]: per-block health annotations
//! - [`anchor`]: per-object trajectory parameters and inline storage
//! - [`horizon`]: the sequential overflow allocator
//! - [`allocator`]: the bounded-probe ballistic allocator tying the above together
//! - [`genesis`]: initial `(G, V)` selection for new anchors
//! - [`lattice`]: the small-object nano-lattice packer
//! - [`epoch`]: the commit-sequencing ring
//! - [`superblock`]: the four-replica superblock broadcast protocol
//! - [`volume`]: mount/unmount lifecycle tying every subsystem together
//! - [`hal`]: the hardware abstraction layer and its in-memory reference impl

pub mod allocator;
pub mod anchor;
pub mod array;
pub mod bitmap;
pub mod crc;
pub mod epoch;
pub mod error;
pub mod flags;
pub mod genesis;
pub mod geometry;
pub mod hal;
pub mod horizon;
pub mod lattice;
pub mod logger;
pub mod quality;
pub mod spinlock;
pub mod superblock;
pub mod trajectory;
pub mod util;
pub mod volume;

pub use error::{Error, ErrorKind, Result};
