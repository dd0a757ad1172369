//! Extents and the extent sink
//!
//! Allocations are returned as one or more extents appended into a
//! caller-supplied sink. The sink declares a maximum extent count; the
//! allocator stops scanning once that capacity is reached and returns a
//! partial result.

use serde::{Deserialize, Serialize};

/// A contiguous run of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Starting block index
    pub start: i64,
    /// Number of contiguous blocks
    pub count: i64,
}

impl Extent {
    pub fn new(start: i64, count: i64) -> Self {
        debug_assert!(count > 0);
        Extent { start, count }
    }

    /// One past the last block in the extent
    pub fn end(&self) -> i64 {
        self.start + self.count
    }

    /// Check if this extent contains a block index
    pub fn contains(&self, block: i64) -> bool {
        block >= self.start && block < self.end()
    }
}

/// Capacity-bounded collector for allocation results
///
/// The allocator guarantees `len() <= capacity()` after each call and treats
/// `len() == capacity()` as "stop emitting".
pub trait ExtentSink {
    /// Append a run of blocks
    fn append(&mut self, start: i64, count: i64);

    /// Configured maximum extent count
    fn capacity(&self) -> usize;

    /// Extents collected so far
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

/// Default [`ExtentSink`]: an append-only extent vector
///
/// A run appended contiguously after the tail extent extends it in place
/// instead of consuming a capacity slot, so per-zone fragments of one
/// logical run collapse back into a single extent.
#[derive(Debug, Clone, Default)]
pub struct ExtentList {
    extents: Vec<Extent>,
    max_extents: usize,
}

impl ExtentList {
    /// A sink that accepts at most `max_extents` extents
    pub fn new(max_extents: usize) -> Self {
        ExtentList {
            extents: Vec::new(),
            max_extents,
        }
    }

    /// A sink with no practical extent limit
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Sum of extent lengths
    pub fn total_blocks(&self) -> i64 {
        self.extents.iter().map(|e| e.count).sum()
    }

    pub fn clear(&mut self) {
        self.extents.clear();
    }

    pub fn into_extents(self) -> Vec<Extent> {
        self.extents
    }
}

impl ExtentSink for ExtentList {
    fn append(&mut self, start: i64, count: i64) {
        debug_assert!(count > 0);
        if let Some(last) = self.extents.last_mut() {
            if last.end() == start {
                last.count += count;
                return;
            }
        }
        debug_assert!(self.extents.len() < self.max_extents);
        self.extents.push(Extent::new(start, count));
    }

    fn capacity(&self) -> usize {
        self.max_extents
    }

    fn len(&self) -> usize {
        self.extents.len()
    }
}
