//! # Blockmap - Hierarchical Bitmap Block Allocator
//!
//! `blockmap` is the in-memory reservation substrate of a storage engine:
//! it tracks availability of a fixed, contiguous range of fixed-size blocks
//! and answers "give me N blocks" and "take these blocks back" correctly
//! under concurrent traffic. Features:
//!
//! - **Multi-level bitmap tree**: 64-block words under power-of-two zones
//!   under internal routing nodes, cache-friendly and O(capacity/8) memory
//! - **Discontiguous results**: allocations return one or more extents into
//!   a caller-supplied, capacity-bounded sink
//! - **Two-tier locking**: a structural reader/writer lock plus an optional
//!   serial mutex; scans contend only at per-zone locks
//! - **Reservation accounting**: requests are reserved against aggregate
//!   counters before descent, so capacity is never oversubscribed
//! - **Rotating cursor**: hintless allocations rotate away from filled
//!   zones to spread load and fragmentation
//!
//! The allocator is volatile and content-agnostic: no persistence, no
//! knowledge of what the blocks hold.
//!
//! ## Quick Start
//!
//! ```rust
//! use blockmap::{AllocatorConfig, BitAllocator, ExtentList};
//!
//! # fn main() -> blockmap::Result<()> {
//! let alloc = BitAllocator::new(AllocatorConfig::new(4096))?;
//!
//! // Ask for 100 blocks in extents of at least 100.
//! let mut sink = ExtentList::new(4);
//! let got = alloc.allocate_reserved(100, 100, 0, &mut sink);
//! assert_eq!(got, 100);
//!
//! // Give them back.
//! for extent in sink.extents().to_vec() {
//!     alloc.free_blocks(extent.start, extent.count);
//! }
//! assert_eq!(alloc.used_blocks(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Map
//!
//! - [`allocator`] - The allocator root: public API, modes, reservation
//! - [`config`] - Construction parameters and tree geometry
//! - [`extent`] - Extents and the [`ExtentSink`] contract
//! - [`bits`] - Word-level bitmap primitives
//! - [`stats`] - Atomic statistics counters
//! - [`error`] - Construction-time error types
//!
//! ## Exhaustion and errors
//!
//! Running out of blocks is not an error: `allocate_reserved` returns the
//! partial count and callers compare it against the request. Errors are
//! reserved for invalid construction parameters; runtime precondition
//! violations (freeing unallocated blocks, out-of-range indices, use after
//! shutdown) panic, because they indicate caller bugs that cannot be
//! safely continued from.

pub mod allocator;
pub mod bits;
pub mod config;
pub mod error;
pub mod extent;
pub mod stats;

mod area;
mod zone;

// Re-export commonly used types
pub use allocator::BitAllocator;
pub use config::{AllocMode, AllocatorConfig, DEFAULT_SPAN_SIZE, DEFAULT_ZONE_SIZE};
pub use error::{BlockMapError, Result};
pub use extent::{Extent, ExtentList, ExtentSink};
pub use stats::{AllocatorStats, StatsSnapshot};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
