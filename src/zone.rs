//! Zones: the leaf scan unit
//!
//! A zone owns a fixed vector of bitmap words and is the unit of exclusive
//! locking during allocation scans. `used_blocks` mirrors the popcount over
//! all words; it is written only under the zone lock but read lock-free so
//! routing can skip exhausted zones without contending.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::bits::{BitEntry, RunSearch, BITS_PER_WORD};
use crate::extent::ExtentSink;

/// Proof of exclusive access to a zone's bitmap during a scan
pub(crate) type ZoneGuard<'a> = MutexGuard<'a, Vec<BitEntry>>;

pub(crate) struct Zone {
    bits: Mutex<Vec<BitEntry>>,
    used_blocks: AtomicI64,
    num_blocks: i64,
}

impl Zone {
    pub(crate) fn new(num_blocks: i64, default_allocated: bool) -> Self {
        debug_assert!(num_blocks > 0 && num_blocks % BITS_PER_WORD as i64 == 0);
        let num_words = (num_blocks as usize) / BITS_PER_WORD;
        Zone {
            bits: Mutex::new(vec![BitEntry::new(default_allocated); num_words]),
            used_blocks: AtomicI64::new(if default_allocated { num_blocks } else { 0 }),
            num_blocks,
        }
    }

    pub(crate) fn try_lock(&self) -> Option<ZoneGuard<'_>> {
        self.bits.try_lock()
    }

    pub(crate) fn lock(&self) -> ZoneGuard<'_> {
        self.bits.lock()
    }

    pub(crate) fn size(&self) -> i64 {
        self.num_blocks
    }

    pub(crate) fn used_blocks(&self) -> i64 {
        self.used_blocks.load(Ordering::Relaxed)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.used_blocks() == self.num_blocks
    }

    /// First-fit forward scan from `hint`, emitting extents into `sink`.
    ///
    /// Runs shorter than `min_alloc` are skipped; a clear run reaching a
    /// word boundary is extended speculatively into the following words and
    /// committed only once it reaches the required length, so a scan that
    /// stops mid-zone leaves no stray set bits. Returns the number of
    /// blocks placed into the sink.
    pub(crate) fn allocate_distributed(
        &self,
        words: &mut ZoneGuard<'_>,
        num_blocks: i64,
        min_alloc: i64,
        hint: i64,
        base_offset: i64,
        sink: &mut dyn ExtentSink,
    ) -> i64 {
        debug_assert!(min_alloc >= 1);
        if num_blocks <= 0 || self.is_exhausted() {
            return 0;
        }
        let zone_bits = self.num_blocks as usize;
        let start_bit = hint.clamp(0, self.num_blocks - 1) as usize;
        let entries: &mut Vec<BitEntry> = &mut *words;

        let allocated = if min_alloc == 1 {
            Self::scan_singles(entries, num_blocks, start_bit, base_offset, sink)
        } else {
            Self::scan_runs(
                entries, num_blocks, min_alloc, start_bit, zone_bits, base_offset, sink,
            )
        };

        if allocated > 0 {
            self.used_blocks.fetch_add(allocated, Ordering::Relaxed);
        }
        allocated
    }

    /// `min_alloc == 1`: claim every free run in scan order
    fn scan_singles(
        words: &mut [BitEntry],
        num_blocks: i64,
        start_bit: usize,
        base_offset: i64,
        sink: &mut dyn ExtentSink,
    ) -> i64 {
        let mut needed = num_blocks;
        let mut allocated = 0i64;
        let mut word = start_bit / BITS_PER_WORD;
        let mut offset = start_bit % BITS_PER_WORD;

        while needed > 0 && word < words.len() {
            if sink.is_full() {
                break;
            }
            if words[word].is_full() {
                word += 1;
                offset = 0;
                continue;
            }
            let max = needed.min(BITS_PER_WORD as i64) as usize;
            let (count, first, end) = words[word].find_n_free_bits(offset, max);
            if count == 0 {
                word += 1;
                offset = 0;
                continue;
            }
            let abs = (word * BITS_PER_WORD + first) as i64;
            sink.append(base_offset + abs, count as i64);
            allocated += count as i64;
            needed -= count as i64;
            if end >= BITS_PER_WORD {
                word += 1;
                offset = 0;
            } else {
                offset = end;
            }
        }
        allocated
    }

    /// `min_alloc > 1`: first-fit runs with cross-word extension
    fn scan_runs(
        words: &mut [BitEntry],
        num_blocks: i64,
        min_alloc: i64,
        start_bit: usize,
        zone_bits: usize,
        base_offset: i64,
        sink: &mut dyn ExtentSink,
    ) -> i64 {
        let num_words = zone_bits / BITS_PER_WORD;
        let mut needed = num_blocks;
        let mut allocated = 0i64;
        let mut word = start_bit / BITS_PER_WORD;
        let mut offset = start_bit % BITS_PER_WORD;
        // A clear run that reached a word boundary, not yet committed.
        let mut pending_start = 0usize;
        let mut pending_len = 0usize;

        // A residue below min_alloc cannot be emitted as a valid extent;
        // it stays unallocated rather than degrading the contract.
        while needed >= min_alloc && word < num_words {
            if sink.is_full() {
                break;
            }
            let threshold = min_alloc as usize;

            if pending_len > 0 {
                let lead = words[word].run_len_from(0);
                if lead == BITS_PER_WORD && pending_len + BITS_PER_WORD < needed as usize {
                    // Whole word clear and the run is still growing.
                    pending_len += BITS_PER_WORD;
                    word += 1;
                    continue;
                }
                let total = pending_len + lead;
                let run = total.min(needed as usize);
                if run >= threshold {
                    set_range(words, pending_start, run);
                    sink.append(base_offset + pending_start as i64, run as i64);
                    allocated += run as i64;
                    needed -= run as i64;
                    let next = pending_start + run;
                    word = next / BITS_PER_WORD;
                    offset = next % BITS_PER_WORD;
                    pending_len = 0;
                    continue;
                }
                // Too short; the bit at `lead` is set, resume the in-word
                // search there.
                pending_len = 0;
                offset = lead;
            }

            match words[word].find_first_run(threshold, offset) {
                RunSearch::Found { start, .. } => {
                    // Extend greedily up to the remaining request.
                    let mut run = threshold;
                    let mut extra = needed as usize - threshold;
                    let mut w = word;
                    let mut o = start + threshold;
                    while extra > 0 {
                        if o == BITS_PER_WORD {
                            w += 1;
                            o = 0;
                            if w == num_words {
                                break;
                            }
                        }
                        let claimed = words[w].find_n_cont_bits(o, extra);
                        if claimed == 0 {
                            break;
                        }
                        run += claimed;
                        extra -= claimed;
                        o += claimed;
                        if o < BITS_PER_WORD {
                            break;
                        }
                    }
                    let abs = word * BITS_PER_WORD + start;
                    sink.append(base_offset + abs as i64, run as i64);
                    allocated += run as i64;
                    needed -= run as i64;
                    let next = abs + run;
                    word = next / BITS_PER_WORD;
                    offset = next % BITS_PER_WORD;
                }
                RunSearch::Tail { start, len, .. } => {
                    pending_start = word * BITS_PER_WORD + start;
                    pending_len = len;
                    word += 1;
                    offset = 0;
                }
                RunSearch::Exhausted { .. } => {
                    word += 1;
                    offset = 0;
                }
            }
        }
        allocated
    }

    /// Clear a block range. Every block must be allocated.
    pub(crate) fn free_range(&self, start: i64, num_blocks: i64) {
        self.check_range(start, num_blocks);
        if num_blocks == 0 {
            return;
        }
        let mut words = self.bits.lock();
        assert!(
            range_is_allocated(&words, start as usize, num_blocks as usize),
            "freeing unallocated blocks at {start}+{num_blocks}"
        );
        clear_range(&mut words, start as usize, num_blocks as usize);
        self.used_blocks.fetch_sub(num_blocks, Ordering::Relaxed);
    }

    /// Set a block range. Every block must be free.
    pub(crate) fn mark_used(&self, start: i64, num_blocks: i64) {
        self.check_range(start, num_blocks);
        if num_blocks == 0 {
            return;
        }
        let mut words = self.bits.lock();
        assert!(
            range_is_free(&words, start as usize, num_blocks as usize),
            "marking already-allocated blocks at {start}+{num_blocks}"
        );
        set_range(&mut words, start as usize, num_blocks as usize);
        self.used_blocks.fetch_add(num_blocks, Ordering::Relaxed);
    }

    pub(crate) fn is_allocated(&self, start: i64, num_blocks: i64) -> bool {
        self.check_range(start, num_blocks);
        if num_blocks == 0 {
            return true;
        }
        let words = self.bits.lock();
        range_is_allocated(&words, start as usize, num_blocks as usize)
    }

    fn check_range(&self, start: i64, num_blocks: i64) {
        assert!(
            start >= 0 && num_blocks >= 0 && start + num_blocks <= self.num_blocks,
            "block range {start}+{num_blocks} outside zone of {} blocks",
            self.num_blocks
        );
    }
}

fn for_each_word(start_bit: usize, num_bits: usize, mut f: impl FnMut(usize, usize, usize)) {
    let mut word = start_bit / BITS_PER_WORD;
    let mut offset = start_bit % BITS_PER_WORD;
    let mut left = num_bits;
    while left > 0 {
        let take = left.min(BITS_PER_WORD - offset);
        f(word, offset, take);
        word += 1;
        offset = 0;
        left -= take;
    }
}

fn set_range(words: &mut [BitEntry], start_bit: usize, num_bits: usize) {
    for_each_word(start_bit, num_bits, |w, o, n| words[w].set_bits(o, n));
}

fn clear_range(words: &mut [BitEntry], start_bit: usize, num_bits: usize) {
    for_each_word(start_bit, num_bits, |w, o, n| words[w].clear_bits(o, n));
}

fn range_is_allocated(words: &[BitEntry], start_bit: usize, num_bits: usize) -> bool {
    let mut all = true;
    for_each_word(start_bit, num_bits, |w, o, n| {
        all &= words[w].is_allocated(o, n);
    });
    all
}

fn range_is_free(words: &[BitEntry], start_bit: usize, num_bits: usize) -> bool {
    let mut none = true;
    for_each_word(start_bit, num_bits, |w, o, n| {
        none &= words[w].is_free(o, n);
    });
    none
}
