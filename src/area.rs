//! Internal areas: routing nodes of the allocator tree
//!
//! An [`InternalArea`] owns an ordered list of children (zones, or smaller
//! areas), aggregate used/reserved counters behind a short lock, and a
//! rotating cursor that spreads hintless allocations away from children the
//! scans have filled. Descent skips children that are exhausted or
//! contended rather than waiting on them.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::AllocatorConfig;
use crate::extent::ExtentSink;
use crate::stats::AllocatorStats;
use crate::zone::Zone;

/// A child of an internal area. Held by value so traversal stays
/// cache-friendly; dispatch is a `match`.
pub(crate) enum AreaNode {
    Zone(Zone),
    Area(InternalArea),
}

impl AreaNode {
    fn size(&self) -> i64 {
        match self {
            AreaNode::Zone(z) => z.size(),
            AreaNode::Area(a) => a.size(),
        }
    }

    fn free_range(&self, start: i64, num_blocks: i64) {
        match self {
            AreaNode::Zone(z) => z.free_range(start, num_blocks),
            AreaNode::Area(a) => a.free_range(start, num_blocks),
        }
    }

    fn mark_used(&self, start: i64, num_blocks: i64) {
        match self {
            AreaNode::Zone(z) => z.mark_used(start, num_blocks),
            AreaNode::Area(a) => a.mark_used(start, num_blocks),
        }
    }

    fn is_allocated(&self, start: i64, num_blocks: i64) -> bool {
        match self {
            AreaNode::Zone(z) => z.is_allocated(start, num_blocks),
            AreaNode::Area(a) => a.is_allocated(start, num_blocks),
        }
    }
}

/// Index iterator over an area's children, starting anywhere, optionally
/// wrapping.
///
/// Each child is visited at most twice: once on the linear pass and, when
/// wrapping, the start child exactly once more at the end of the wrap
/// cycle. The final revisit lets a scan that entered the start child
/// mid-way (from a hint) come back for the child's earlier blocks.
pub(crate) struct AreaListIterator {
    len: usize,
    start: usize,
    current: usize,
    wrap: bool,
    wrapped: bool,
    ended: bool,
}

impl AreaListIterator {
    pub(crate) fn new(len: usize, start: usize, wrap: bool) -> Self {
        debug_assert!(start < len);
        AreaListIterator {
            len,
            start,
            current: start,
            wrap,
            wrapped: false,
            ended: false,
        }
    }
}

impl Iterator for AreaListIterator {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.current;
        if self.wrapped && current == self.start {
            // End of wrap cycle + 1.
            if !self.ended {
                self.ended = true;
                return Some(current);
            }
            return None;
        }
        self.current += 1;
        if self.current == self.len && self.wrap {
            self.current = 0;
            self.wrapped = true;
        }
        if current == self.len {
            return None;
        }
        Some(current)
    }
}

pub(crate) struct InternalArea {
    children: Vec<AreaNode>,
    /// Nominal blocks per child; the last child may cover fewer.
    child_span: i64,
    level: u32,
    num_blocks: i64,
    /// Aggregate counters. Written only under `counters_lock`, read
    /// lock-free by routing checks.
    used: AtomicI64,
    reserved: AtomicI64,
    cursor: AtomicUsize,
    counters_lock: Mutex<()>,
}

impl InternalArea {
    pub(crate) fn new(config: &AllocatorConfig, level: u32, num_blocks: i64) -> Self {
        debug_assert!(level >= 1 && num_blocks > 0);
        let child_span = config.level_span(level);
        let num_children = ((num_blocks + child_span - 1) / child_span) as usize;
        debug_assert!(num_children as i64 <= config.span_size);

        let mut children = Vec::with_capacity(num_children);
        for idx in 0..num_children {
            let offset = idx as i64 * child_span;
            let covered = child_span.min(num_blocks - offset);
            children.push(if level == 1 {
                AreaNode::Zone(Zone::new(covered, config.default_allocated))
            } else {
                AreaNode::Area(InternalArea::new(config, level - 1, covered))
            });
        }

        let used = if config.default_allocated { num_blocks } else { 0 };
        InternalArea {
            children,
            child_span,
            level,
            num_blocks,
            used: AtomicI64::new(used),
            reserved: AtomicI64::new(0),
            cursor: AtomicUsize::new(0),
            counters_lock: Mutex::new(()),
        }
    }

    pub(crate) fn size(&self) -> i64 {
        self.num_blocks
    }

    #[allow(dead_code)]
    pub(crate) fn level(&self) -> u32 {
        self.level
    }

    pub(crate) fn used_blocks(&self) -> i64 {
        self.used.load(Ordering::Relaxed)
    }

    pub(crate) fn reserved_blocks(&self) -> i64 {
        self.reserved.load(Ordering::Relaxed)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.used_blocks() >= self.num_blocks
    }

    /// Reserve up to `want` blocks against the remaining free count.
    /// Returns the amount actually reserved, possibly zero.
    pub(crate) fn reserve_up_to(&self, want: i64) -> i64 {
        let _guard = self.counters_lock.lock();
        let free = self.num_blocks - self.used.load(Ordering::Relaxed)
            - self.reserved.load(Ordering::Relaxed);
        let take = want.min(free).max(0);
        if take > 0 {
            self.reserved.fetch_add(take, Ordering::Relaxed);
        }
        take
    }

    /// Release a reservation, converting the satisfied part to used.
    /// Frees decrement `used` but never `reserved`.
    pub(crate) fn unreserve(&self, reserved: i64, allocated: i64) {
        debug_assert!(allocated <= reserved);
        let _guard = self.counters_lock.lock();
        self.reserved.fetch_sub(reserved, Ordering::Relaxed);
        if allocated > 0 {
            self.used.fetch_add(allocated, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_used(&self, num_blocks: i64) {
        let _guard = self.counters_lock.lock();
        self.used.fetch_add(num_blocks, Ordering::Relaxed);
    }

    pub(crate) fn sub_used(&self, num_blocks: i64) {
        let _guard = self.counters_lock.lock();
        debug_assert!(self.used.load(Ordering::Relaxed) >= num_blocks);
        self.used.fetch_sub(num_blocks, Ordering::Relaxed);
    }

    /// Route an allocation request across the children, round-robin from
    /// the hint child (or the cursor when no hint is given), and return
    /// how many blocks landed in the sink.
    pub(crate) fn allocate_distributed(
        &self,
        num_blocks: i64,
        min_alloc: i64,
        hint: i64,
        base_offset: i64,
        sink: &mut dyn ExtentSink,
        blocking: bool,
        stats: Option<&AllocatorStats>,
    ) -> i64 {
        debug_assert!(num_blocks > 0);
        let fanout = self.children.len();
        let hint_child = ((hint / self.child_span) as usize).min(fanout - 1);
        let start_idx = if hint == 0 {
            self.cursor.load(Ordering::Relaxed) % fanout
        } else {
            hint_child
        };

        let mut allocated = 0i64;
        let mut first_visit = true;
        for idx in AreaListIterator::new(fanout, start_idx, true) {
            if allocated >= num_blocks || sink.is_full() {
                break;
            }
            let child_hint = if first_visit && hint != 0 && idx == hint_child {
                hint % self.child_span
            } else {
                0
            };
            first_visit = false;
            if let Some(stats) = stats {
                stats.add_nodes_scanned(1);
            }

            let remaining = num_blocks - allocated;
            let child_base = base_offset + idx as i64 * self.child_span;
            allocated += match &self.children[idx] {
                AreaNode::Zone(zone) => {
                    if zone.is_exhausted() {
                        self.advance_cursor(idx);
                        continue;
                    }
                    let mut guard = if blocking {
                        zone.lock()
                    } else {
                        match zone.try_lock() {
                            Some(guard) => guard,
                            None => continue,
                        }
                    };
                    let got = zone.allocate_distributed(
                        &mut guard, remaining, min_alloc, child_hint, child_base, sink,
                    );
                    drop(guard);
                    if zone.is_exhausted() {
                        self.advance_cursor(idx);
                    }
                    got
                }
                AreaNode::Area(area) => {
                    if area.is_exhausted() {
                        self.advance_cursor(idx);
                        continue;
                    }
                    let reservation = area.reserve_up_to(remaining);
                    if reservation == 0 {
                        continue;
                    }
                    let got = area.allocate_distributed(
                        reservation,
                        min_alloc,
                        child_hint,
                        child_base,
                        sink,
                        blocking,
                        stats,
                    );
                    area.unreserve(reservation, got);
                    if area.is_exhausted() {
                        self.advance_cursor(idx);
                    }
                    got
                }
            };
        }
        allocated
    }

    /// Move the cursor past a child the scan found exhausted. Advisory
    /// only; hinted allocations ignore it entirely.
    fn advance_cursor(&self, exhausted_idx: usize) {
        let next = (exhausted_idx + 1) % self.children.len();
        self.cursor.store(next, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Free a slice that lies within a single child at every level below;
    /// the root splits requests at zone boundaries before dispatch.
    pub(crate) fn free_range(&self, start: i64, num_blocks: i64) {
        let (child, rel) = self.locate(start, num_blocks);
        child.free_range(rel, num_blocks);
        self.sub_used(num_blocks);
    }

    pub(crate) fn mark_used(&self, start: i64, num_blocks: i64) {
        let (child, rel) = self.locate(start, num_blocks);
        child.mark_used(rel, num_blocks);
        self.add_used(num_blocks);
    }

    pub(crate) fn is_allocated(&self, start: i64, num_blocks: i64) -> bool {
        let (child, rel) = self.locate(start, num_blocks);
        child.is_allocated(rel, num_blocks)
    }

    fn locate(&self, start: i64, num_blocks: i64) -> (&AreaNode, i64) {
        assert!(
            start >= 0 && num_blocks >= 0 && start + num_blocks <= self.num_blocks,
            "block range {start}+{num_blocks} outside area of {} blocks",
            self.num_blocks
        );
        let idx = (start / self.child_span) as usize;
        let rel = start - idx as i64 * self.child_span;
        let child = &self.children[idx];
        debug_assert!(rel + num_blocks <= child.size());
        (child, rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::{Extent, ExtentList, ExtentSink as _};

    fn test_config(total: i64) -> AllocatorConfig {
        AllocatorConfig::new(total)
            .with_zone_size(128)
            .with_span_size(4)
    }

    /// Reserve, descend, unreserve, the way the allocator root drives an
    /// area.
    fn alloc(area: &InternalArea, num: i64, min_alloc: i64, hint: i64, sink: &mut ExtentList) -> i64 {
        let reservation = area.reserve_up_to(num);
        if reservation == 0 {
            return 0;
        }
        let got = area.allocate_distributed(reservation, min_alloc, hint, 0, sink, true, None);
        area.unreserve(reservation, got);
        got
    }

    #[test]
    fn test_iterator_linear() {
        let visited: Vec<_> = AreaListIterator::new(4, 1, false).collect();
        assert_eq!(visited, vec![1, 2, 3]);
    }

    #[test]
    fn test_iterator_wrap_revisits_start() {
        let visited: Vec<_> = AreaListIterator::new(4, 2, true).collect();
        assert_eq!(visited, vec![2, 3, 0, 1, 2]);
    }

    #[test]
    fn test_iterator_wrap_from_zero() {
        let visited: Vec<_> = AreaListIterator::new(3, 0, true).collect();
        assert_eq!(visited, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_iterator_single_child() {
        let visited: Vec<_> = AreaListIterator::new(1, 0, true).collect();
        assert_eq!(visited, vec![0, 0]);
    }

    #[test]
    fn test_tree_construction() {
        // 4 zones of 128 under one level-1 area.
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        assert_eq!(area.children.len(), 4);
        assert_eq!(area.size(), 512);
        assert_eq!(area.used_blocks(), 0);

        // Two levels: 8 zones of 128 under two level-1 areas.
        let config = test_config(1024);
        let area = InternalArea::new(&config, 2, 1024);
        assert_eq!(area.children.len(), 2);
        assert!(matches!(area.children[0], AreaNode::Area(_)));
    }

    #[test]
    fn test_allocation_descends_and_counts() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        let mut sink = ExtentList::new(4);
        let got = alloc(&area, 200, 1, 0, &mut sink);
        assert_eq!(got, 200);
        assert_eq!(area.used_blocks(), 200);
        assert_eq!(area.reserved_blocks(), 0);
        // 128 from zone 0 merged with 72 from zone 1.
        assert_eq!(sink.extents(), &[Extent::new(0, 200)]);
    }

    #[test]
    fn test_cursor_skips_filled_children() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        let mut sink = ExtentList::unbounded();
        // Fill zone 0 exactly; the cursor should move past it.
        assert_eq!(alloc(&area, 128, 1, 0, &mut sink), 128);
        assert_eq!(area.cursor(), 1);

        // A partial fill of zone 1 leaves the cursor alone.
        let mut sink = ExtentList::unbounded();
        assert_eq!(alloc(&area, 30, 1, 0, &mut sink), 30);
        assert_eq!(area.cursor(), 1);
        assert_eq!(sink.extents(), &[Extent::new(128, 30)]);
    }

    #[test]
    fn test_hint_overrides_cursor() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        let mut sink = ExtentList::unbounded();
        let got = alloc(&area, 10, 1, 300, &mut sink);
        assert_eq!(got, 10);
        assert_eq!(sink.extents(), &[Extent::new(300, 10)]);
    }

    #[test]
    fn test_wrap_covers_blocks_before_hint() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        let mut sink = ExtentList::unbounded();
        // Hint near the end; the request is larger than what remains after
        // it, so the scan must wrap and revisit the start child.
        let got = alloc(&area, 512, 1, 400, &mut sink);
        assert_eq!(got, 512);
        assert_eq!(area.used_blocks(), 512);
        assert!(area.is_exhausted());
    }

    #[test]
    fn test_reserve_clamps_to_free() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        assert_eq!(area.reserve_up_to(600), 512);
        assert_eq!(area.reserve_up_to(1), 0);
        area.unreserve(512, 100);
        assert_eq!(area.used_blocks(), 100);
        assert_eq!(area.reserve_up_to(600), 412);
        area.unreserve(412, 0);
    }

    #[test]
    fn test_free_and_mark_delegate() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        area.mark_used(130, 20);
        assert_eq!(area.used_blocks(), 20);
        assert!(area.is_allocated(130, 20));
        assert!(!area.is_allocated(129, 1));
        area.free_range(130, 20);
        assert_eq!(area.used_blocks(), 0);
    }

    #[test]
    fn test_sink_capacity_limits_descent() {
        let config = test_config(512);
        let area = InternalArea::new(&config, 1, 512);
        // Fragment zone 0: blocks 0..8 and 16..128 used.
        area.mark_used(0, 8);
        area.mark_used(16, 112);
        let mut sink = ExtentList::new(1);
        let got = alloc(&area, 100, 2, 0, &mut sink);
        assert_eq!(got, 8);
        assert_eq!(sink.extents(), &[Extent::new(8, 8)]);
        assert!(sink.is_full());
    }
}
