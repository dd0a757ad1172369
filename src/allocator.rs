//! The allocator root: public API, locking discipline, reservation
//! accounting, and the two allocation modes.
//!
//! Lock order is strictly top-down: the structural rw-lock (reader for
//! every public operation, writer only for shutdown), then the serial
//! mutex when the mode calls for it, then per-area counter locks, then
//! zone locks. Counter locks are never held across recursion and zone
//! locks are never held while ascending, so the discipline is acyclic.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::area::InternalArea;
use crate::config::{AllocMode, AllocatorConfig};
use crate::error::Result;
use crate::extent::{Extent, ExtentSink};
use crate::stats::AllocatorStats;

/// In-memory hierarchical bitmap block allocator
///
/// Tracks a fixed contiguous range of fixed-size blocks and serves
/// concurrent allocate/free traffic, returning allocations as one or more
/// extents when no single contiguous run is available. Purely volatile:
/// it owns no block contents and persists nothing.
pub struct BitAllocator {
    config: AllocatorConfig,
    root: InternalArea,
    /// Structural state; the writer side is taken only by `shutdown`.
    state: RwLock<bool>,
    serial: Mutex<()>,
    stats: Option<Arc<AllocatorStats>>,
    internal_blocks: i64,
    /// Rounding remainder above the declared capacity, pre-marked
    /// allocated and never handed out.
    extra_blocks: i64,
}

impl BitAllocator {
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        config.validate()?;
        let internal_blocks = config.internal_blocks();
        let extra_blocks = config.extra_blocks();
        let level = config.level_for(internal_blocks);
        let root = InternalArea::new(&config, level, internal_blocks);
        let stats = config.stats_enabled.then(|| Arc::new(AllocatorStats::new()));

        let allocator = BitAllocator {
            config,
            root,
            state: RwLock::new(false),
            serial: Mutex::new(()),
            stats,
            internal_blocks,
            extra_blocks,
        };
        if extra_blocks > 0 && !allocator.config.default_allocated {
            allocator.for_each_zone_slice(
                allocator.internal_blocks - extra_blocks,
                extra_blocks,
                |start, len| allocator.root.mark_used(start, len),
            );
        }
        debug!(
            total_blocks = allocator.total_blocks(),
            zone_size = allocator.config.zone_size,
            extra_blocks,
            levels = level,
            "bitmap allocator built"
        );
        Ok(allocator)
    }

    /// User-visible capacity
    pub fn total_blocks(&self) -> i64 {
        self.internal_blocks - self.extra_blocks
    }

    /// Blocks currently allocated, excluding the pre-marked remainder
    pub fn used_blocks(&self) -> i64 {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        self.root.used_blocks() - self.extra_blocks
    }

    /// In-flight reservations not yet converted to allocated bits
    pub fn reserved_blocks(&self) -> i64 {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        self.root.reserved_blocks()
    }

    pub fn mode(&self) -> AllocMode {
        self.config.mode
    }

    pub fn stats(&self) -> Option<Arc<AllocatorStats>> {
        self.stats.clone()
    }

    /// Allocate up to `num_blocks` blocks, emitting extents of at least
    /// `min_alloc` blocks each into `sink`, scanning forward from `hint`.
    ///
    /// The request is first reserved against the aggregate counters,
    /// clamped to the free count, and the shortfall is unreserved on
    /// return. Exhaustion yields a partial result rather than an error.
    /// Returns the number of blocks placed in the sink; callers detect
    /// underfill by comparing against the request.
    pub fn allocate_reserved(
        &self,
        num_blocks: i64,
        min_alloc: i64,
        hint: i64,
        sink: &mut dyn ExtentSink,
    ) -> i64 {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        assert!(num_blocks >= 0, "negative block request");
        assert!(min_alloc >= 1, "min_alloc must be at least 1");
        assert!(hint >= 0, "negative hint");
        if num_blocks == 0 {
            return 0;
        }
        let hint = hint % self.internal_blocks;

        let reservation = self.root.reserve_up_to(num_blocks);
        if reservation == 0 {
            return 0;
        }
        if let Some(stats) = &self.stats {
            stats.add_alloc_calls(1);
        }
        let stats = self.stats.as_deref();

        let mut allocated = 0;
        match self.config.mode {
            AllocMode::Serial => {
                let _serial = self.serial.lock();
                if let Some(stats) = stats {
                    stats.add_serial_scans(1);
                }
                allocated =
                    self.root
                        .allocate_distributed(reservation, min_alloc, hint, 0, sink, true, stats);
            }
            AllocMode::Concurrent => {
                if let Some(stats) = stats {
                    stats.add_concurrent_scans(1);
                }
                allocated = self.root.allocate_distributed(
                    reservation,
                    min_alloc,
                    hint,
                    0,
                    sink,
                    false,
                    stats,
                );
                // Contention skips can under-fill even though the
                // reservation guarantees the blocks exist; re-scan the
                // residue serialized, with blocking zone locks.
                if allocated < reservation && !sink.is_full() {
                    let _serial = self.serial.lock();
                    if let Some(stats) = stats {
                        stats.add_serial_scans(1);
                    }
                    allocated += self.root.allocate_distributed(
                        reservation - allocated,
                        min_alloc,
                        hint,
                        0,
                        sink,
                        true,
                        stats,
                    );
                }
            }
        }

        self.root.unreserve(reservation, allocated);
        if let Some(stats) = &self.stats {
            stats.add_allocated(allocated as u64);
        }
        debug!(requested = num_blocks, allocated, "distributed allocation");
        allocated
    }

    /// Return a contiguous block range. Every block must be allocated.
    pub fn free_blocks(&self, start: i64, num_blocks: i64) {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        self.check_range(start, num_blocks);
        if num_blocks == 0 {
            return;
        }
        if let Some(stats) = &self.stats {
            stats.add_free_calls(1);
            stats.add_freed(num_blocks as u64);
        }
        self.for_each_zone_slice(start, num_blocks, |s, n| self.root.free_range(s, n));
    }

    /// Bulk free of a set of extents
    pub fn free_blocks_distributed(&self, extents: &[Extent]) {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        if let Some(stats) = &self.stats {
            stats.add_free_calls(1);
        }
        for extent in extents {
            self.check_range(extent.start, extent.count);
            if let Some(stats) = &self.stats {
                stats.add_freed(extent.count as u64);
            }
            self.for_each_zone_slice(extent.start, extent.count, |s, n| {
                self.root.free_range(s, n)
            });
        }
    }

    /// Pre-mark a contiguous range allocated. Every block must be free;
    /// used by callers restoring externally tracked state.
    pub fn mark_used(&self, start: i64, num_blocks: i64) {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        self.check_range(start, num_blocks);
        if num_blocks == 0 {
            return;
        }
        self.for_each_zone_slice(start, num_blocks, |s, n| self.root.mark_used(s, n));
    }

    /// Diagnostic: true iff every block in the range is allocated
    pub fn is_allocated(&self, start: i64, num_blocks: i64) -> bool {
        let shut_down = self.state.read();
        assert!(!*shut_down, "allocator is shut down");
        self.check_range(start, num_blocks);
        let mut all = true;
        self.for_each_zone_slice(start, num_blocks, |s, n| {
            all &= self.root.is_allocated(s, n);
        });
        all
    }

    /// Diagnostic: true iff every block in every extent is allocated
    pub fn is_allocated_extents(&self, extents: &[Extent]) -> bool {
        extents.iter().all(|e| self.is_allocated(e.start, e.count))
    }

    /// Mark the allocator shut down. Idempotent; every other public
    /// operation afterwards panics.
    pub fn shutdown(&self) {
        let mut shut_down = self.state.write();
        if *shut_down {
            return;
        }
        *shut_down = true;
        debug!("bitmap allocator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.state.read()
    }

    fn check_range(&self, start: i64, num_blocks: i64) {
        assert!(
            start >= 0 && num_blocks >= 0 && start + num_blocks <= self.total_blocks(),
            "block range {start}+{num_blocks} outside capacity of {} blocks",
            self.total_blocks()
        );
    }

    /// Split a block range at zone boundaries and apply `f` to each slice.
    /// Zone and span sizes are powers of two, so every slice falls within
    /// a single child at every level of the tree.
    fn for_each_zone_slice(&self, start: i64, num_blocks: i64, mut f: impl FnMut(i64, i64)) {
        let zone_size = self.config.zone_size;
        let mut cursor = start;
        let mut left = num_blocks;
        while left > 0 {
            let within_zone = zone_size - cursor % zone_size;
            let take = left.min(within_zone);
            f(cursor, take);
            cursor += take;
            left -= take;
        }
    }
}

impl Drop for BitAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
