//! Statistics sink
//!
//! Monotonic atomic counters updated without locks on the allocation and
//! free paths. Counters wrap on 64-bit overflow. Shared as an
//! `Arc<AllocatorStats>` when the allocator is constructed with stats
//! enabled; wiring them to a telemetry pipeline is the caller's concern.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for allocator activity
#[derive(Debug, Default)]
pub struct AllocatorStats {
    alloc_calls: AtomicU64,
    free_calls: AtomicU64,
    total_allocated: AtomicU64,
    total_freed: AtomicU64,
    serial_scans: AtomicU64,
    concurrent_scans: AtomicU64,
    nodes_scanned: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatsSnapshot {
    pub alloc_calls: u64,
    pub free_calls: u64,
    pub total_allocated: u64,
    pub total_freed: u64,
    pub serial_scans: u64,
    pub concurrent_scans: u64,
    pub nodes_scanned: u64,
}

impl AllocatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_alloc_calls(&self, val: u64) {
        self.alloc_calls.fetch_add(val, Ordering::Relaxed);
    }

    pub fn add_free_calls(&self, val: u64) {
        self.free_calls.fetch_add(val, Ordering::Relaxed);
    }

    pub fn add_allocated(&self, val: u64) {
        self.total_allocated.fetch_add(val, Ordering::Relaxed);
    }

    pub fn add_freed(&self, val: u64) {
        self.total_freed.fetch_add(val, Ordering::Relaxed);
    }

    pub fn add_serial_scans(&self, val: u64) {
        self.serial_scans.fetch_add(val, Ordering::Relaxed);
    }

    pub fn add_concurrent_scans(&self, val: u64) {
        self.concurrent_scans.fetch_add(val, Ordering::Relaxed);
    }

    /// Tree children visited during allocation descent
    pub fn add_nodes_scanned(&self, val: u64) {
        self.nodes_scanned.fetch_add(val, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            alloc_calls: self.alloc_calls.load(Ordering::Relaxed),
            free_calls: self.free_calls.load(Ordering::Relaxed),
            total_allocated: self.total_allocated.load(Ordering::Relaxed),
            total_freed: self.total_freed.load(Ordering::Relaxed),
            serial_scans: self.serial_scans.load(Ordering::Relaxed),
            concurrent_scans: self.concurrent_scans.load(Ordering::Relaxed),
            nodes_scanned: self.nodes_scanned.load(Ordering::Relaxed),
        }
    }
}
