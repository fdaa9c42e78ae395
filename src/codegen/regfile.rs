//! Fixed-size register file with pin and eviction bookkeeping.
//!
//! Slots are scanned linearly on every acquisition: first free slot wins,
//! otherwise the first occupied unpinned slot is evicted. The policy is
//! deliberately not least-recently-used — tests rely on knowing exactly
//! which value spills when several are evictable.

use crate::ir::InstId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegStatus {
    /// Holds nothing a later instruction will read.
    Free,
    /// Holds a value that may be read later; evictable by spilling.
    Live,
    /// Holds an in-flight operand; never evicted.
    Pinned,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    status: RegStatus,
    holder: Option<InstId>,
}

/// Outcome of a slot scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// A free slot is available.
    Free(usize),
    /// No free slot; evict `victim` from `index` (spill first).
    Evict { index: usize, victim: InstId },
}

pub struct RegFile {
    slots: Vec<Slot>,
}

impl RegFile {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![
                Slot {
                    status: RegStatus::Free,
                    holder: None,
                };
                size
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Scan for a slot: first free, else first live. `None` means every
    /// slot is pinned — the caller reports allocator exhaustion.
    pub fn pick(&self) -> Option<Acquire> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.status == RegStatus::Free {
                return Some(Acquire::Free(i));
            }
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.status == RegStatus::Live {
                let victim = slot.holder.expect("live slot always has a holder");
                return Some(Acquire::Evict { index: i, victim });
            }
        }
        None
    }

    /// Take ownership of a slot. A `Live` claim records the holder whose
    /// spill slot will receive the value if the register is later evicted.
    pub fn claim(&mut self, index: usize, holder: Option<InstId>, status: RegStatus) {
        debug_assert!(
            status != RegStatus::Live || holder.is_some(),
            "live slots need a holder"
        );
        self.slots[index] = Slot { status, holder };
    }

    pub fn status(&self, index: usize) -> RegStatus {
        self.slots[index].status
    }

    pub fn set_status(&mut self, index: usize, status: RegStatus) {
        self.slots[index].status = status;
    }

    pub fn holder(&self, index: usize) -> Option<InstId> {
        self.slots[index].holder
    }

    /// All live slots with their holders, in scan order.
    pub fn live_slots(&self) -> Vec<(usize, InstId)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match (slot.status, slot.holder) {
                (RegStatus::Live, Some(holder)) => Some((i, holder)),
                _ => None,
            })
            .collect()
    }

    /// Forget everything (function boundaries and call clobbers).
    pub fn release_all(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot {
                status: RegStatus::Free,
                holder: None,
            };
        }
    }
}
