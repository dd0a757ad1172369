//! Allocator configuration
//!
//! An immutable configuration value owned by the allocator root and handed
//! down during tree construction. There is no ambient global state; every
//! component reads the parameters it needs from here.

use serde::{Deserialize, Serialize};

use crate::bits::BITS_PER_WORD;
use crate::error::{BlockMapError, Result};

/// Returns true if `n` is a positive power of two.
fn is_power_of_two_i64(n: i64) -> bool {
    n > 0 && (n & (n - 1)) == 0
}

/// Default blocks per zone
pub const DEFAULT_ZONE_SIZE: i64 = 1024;

/// Default children per internal node
pub const DEFAULT_SPAN_SIZE: i64 = 1024;

/// Allocation serialization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocMode {
    /// One allocation decision at a time: the serial mutex is held for the
    /// whole call. Concurrent frees still proceed.
    Serial,
    /// Allocators run in parallel, contending only at zone locks and
    /// per-area counter locks.
    Concurrent,
}

/// Construction parameters for [`BitAllocator`](crate::BitAllocator)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// User-visible capacity in blocks. Rounded up internally to a whole
    /// number of zones; the remainder is pre-marked allocated and never
    /// handed out.
    pub total_blocks: i64,
    /// Blocks per zone, the unit of exclusive locking during scans.
    /// Power of two, at least one bitmap word.
    pub zone_size: i64,
    /// Fanout of internal nodes. Power of two.
    pub span_size: i64,
    /// Allocation mode
    pub mode: AllocMode,
    /// Start with every block marked allocated
    pub default_allocated: bool,
    /// Attach an atomic statistics sink
    pub stats_enabled: bool,
}

impl AllocatorConfig {
    /// Configuration with default zone/span sizes and concurrent mode
    pub fn new(total_blocks: i64) -> Self {
        AllocatorConfig {
            total_blocks,
            zone_size: DEFAULT_ZONE_SIZE,
            span_size: DEFAULT_SPAN_SIZE,
            mode: AllocMode::Concurrent,
            default_allocated: false,
            stats_enabled: false,
        }
    }

    pub fn with_zone_size(mut self, zone_size: i64) -> Self {
        self.zone_size = zone_size;
        self
    }

    pub fn with_span_size(mut self, span_size: i64) -> Self {
        self.span_size = span_size;
        self
    }

    pub fn with_mode(mut self, mode: AllocMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_default_allocated(mut self, default_allocated: bool) -> Self {
        self.default_allocated = default_allocated;
        self
    }

    pub fn with_stats(mut self, stats_enabled: bool) -> Self {
        self.stats_enabled = stats_enabled;
        self
    }

    /// Validate the parameter combination
    pub fn validate(&self) -> Result<()> {
        if self.total_blocks <= 0 {
            return Err(BlockMapError::InvalidCapacity(self.total_blocks));
        }
        if self.zone_size < BITS_PER_WORD as i64 || !is_power_of_two_i64(self.zone_size) {
            return Err(BlockMapError::InvalidZoneSize(self.zone_size));
        }
        if self.span_size < 2 || !is_power_of_two_i64(self.span_size) {
            return Err(BlockMapError::InvalidSpanSize(self.span_size));
        }
        Ok(())
    }

    /// Internal capacity: the declared capacity rounded up to whole zones
    pub(crate) fn internal_blocks(&self) -> i64 {
        (self.total_blocks + self.zone_size - 1) / self.zone_size * self.zone_size
    }

    /// Rounding remainder, pre-marked allocated at construction
    pub(crate) fn extra_blocks(&self) -> i64 {
        self.internal_blocks() - self.total_blocks
    }

    /// Blocks covered by one child of a node at `level`. Level 1 nodes hold
    /// zones, so their children each cover `zone_size` blocks.
    pub(crate) fn level_span(&self, level: u32) -> i64 {
        let mut span = self.zone_size;
        for _ in 1..level {
            span = span.saturating_mul(self.span_size);
        }
        span
    }

    /// Smallest tree depth whose root can cover `blocks` with at most
    /// `span_size` children
    pub(crate) fn level_for(&self, blocks: i64) -> u32 {
        let mut level = 1;
        while self.level_span(level).saturating_mul(self.span_size) < blocks {
            level += 1;
        }
        level
    }
}
