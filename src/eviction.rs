//! Budgeted eviction over a [ResourceTable].
//!
//! This is an approximate LRU: instead of timestamps, every resident slot carries a usage counter which is reset to 1
//! whenever the slot is used and incremented by each aging pass. When a reservation would push the heap past the high
//! watermark, the stalest evictable slots are dropped until the heap is back under the low watermark, or until
//! nothing evictable is left. The watermarks are a soft target: pinned and live resources are never given up to meet
//! them.
use log::{debug, trace, warn};

use crate::*;

/// A victim must have been aged at least once since its last use.
const MIN_VICTIM_COUNTER: u8 = 2;

/// What a call to [Budget::reserve] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReserveReport {
    /// Evicted slots, in the order they were chosen.
    pub evicted: Vec<(ResourceCategory, usize)>,
    pub freed_bytes: u64,
}

/// Process-wide memory budget state.
#[derive(Debug)]
pub struct Budget {
    low_watermark: u64,
    high_watermark: u64,
    /// Set once a reservation has aged the table, until the next load or the next frame wrap.
    aging_suppressed: bool,
    /// Per-frame counter; every time it wraps, the table is aged.
    expire_counter: u8,
}

/// Increment every resident, unlocked counter which is not already capped.
pub fn age_counters(table: &mut ResourceTable) {
    for (_, _, slot) in table.iter_mut() {
        let flags = slot.flags_mut();
        let counter = flags.counter();
        if counter != 0 && counter < USAGE_MAX && !flags.is_locked() {
            flags.set_counter(counter + 1);
        }
    }
}

/// Pick the stalest evictable slot: the first one in scan order among those with the highest counter.
fn select_victim<F>(table: &ResourceTable, in_use: &F) -> Option<(ResourceCategory, usize)>
where
    F: Fn(ResourceCategory, usize) -> bool,
{
    let mut best: Option<(ResourceCategory, usize)> = None;
    let mut best_counter = MIN_VICTIM_COUNTER - 1;

    for (category, id, slot) in table.iter() {
        let mode = match table.category(category) {
            Some(t) => t.mode,
            None => continue,
        };
        let flags = slot.flags();
        if !mode.is_reloadable() || flags.is_locked() || !slot.is_resident() {
            continue;
        }
        if flags.counter() > best_counter && !in_use(category, id) {
            best_counter = flags.counter();
            best = Some((category, id));
        }
    }

    best
}

impl Budget {
    pub fn new(low_watermark: u64, high_watermark: u64) -> Budget {
        Budget {
            low_watermark,
            high_watermark,
            aging_suppressed: false,
            expire_counter: 0,
        }
    }

    pub fn low_watermark(&self) -> u64 {
        self.low_watermark
    }

    pub fn high_watermark(&self) -> u64 {
        self.high_watermark
    }

    /// Make room for an allocation of `size` bytes.
    ///
    /// `in_use` is the liveness oracle: slots it reports as in use are never evicted. The first reservation after a
    /// load ages the table; every reservation ages it once more on the way out.
    pub fn reserve<F>(&mut self, table: &mut ResourceTable, size: u64, in_use: F) -> ReserveReport
    where
        F: Fn(ResourceCategory, usize) -> bool,
    {
        if !self.aging_suppressed {
            self.aging_suppressed = true;
            age_counters(table);
        }

        let mut report = ReserveReport::default();
        let before = table.allocated_bytes();

        if before + size >= self.high_watermark {
            while table.allocated_bytes() + size > self.low_watermark {
                let (category, id) = match select_victim(table, &in_use) {
                    Some(v) => v,
                    None => {
                        warn!(
                            "Nothing left to evict; heap will be {} bytes against a target of {}",
                            table.allocated_bytes() + size,
                            self.low_watermark
                        );
                        break;
                    }
                };

                let freed = table
                    .mark_evicted(category, id)
                    .map(|b| b.len() as u64)
                    .unwrap_or(0);
                trace!("Evicted {} {} ({} bytes)", category, id, freed);
                report.freed_bytes += freed;
                report.evicted.push((category, id));
            }
        }

        age_counters(table);

        if !report.evicted.is_empty() {
            debug!(
                "Expired resources, mem {} -> {}",
                before,
                table.allocated_bytes()
            );
        }
        report
    }

    /// Note that a load completed, so the next reservation ages the table again.
    pub fn loaded(&mut self) {
        self.aging_suppressed = false;
    }

    /// Advance the frame counter, aging the table every time it wraps. Returns whether aging happened.
    pub fn tick(&mut self, table: &mut ResourceTable) -> bool {
        self.expire_counter = self.expire_counter.wrapping_add(1);
        if self.expire_counter != 0 {
            return false;
        }

        self.aging_suppressed = false;
        age_counters(table);
        true
    }
}
