//! # Page Mapper
//!
//! Virtual-to-physical page translation for the data partition. The mapper
//! owns three structures:
//!
//! - the **mapping table**, one `u64` per virtual page, [`PAGE_NONE`] when
//!   unmapped; exactly the bytes persisted in the checkpoint's mapping
//!   region
//! - the **lifecycle states**, a [`StateMap`] over every physical page
//! - the **free queue**, an array-backed queue of allocatable physical page
//!   numbers, consumed from the front and refilled at the back
//!
//! ## Ownership Invariant
//!
//! A physical page is handed out by [`PageMapper::allocate`] at most once
//! until it travels the full lifecycle and is re-queued by
//! [`PageMapper::refill_free_list`]: allocation pops it from the queue and
//! marks it `Valid`, so no later allocation can see it.
//!
//! ## Asymmetries Callers Must Know
//!
//! - [`PageMapper::mark_invalid`] flips the *physical* page's state but does
//!   not clear the mapping-table entry; a virtual page must be re-allocated
//!   before its mapping is trusted again.
//! - `refill_free_list` re-queues `Reclaimed` pages without returning them to
//!   `Free`; the state changes to `Valid` only when the page is allocated
//!   again. Call it once per garbage-collection round: a second scan before
//!   any allocation would see the same `Reclaimed` pages and queue duplicates.
//!
//! ## Error Policy
//!
//! Per the engine-wide convention, exhaustion and missing mappings are
//! signaled with [`PAGE_NONE`], not an error type. Out-of-range virtual page
//! numbers get the same treatment (and `mark_invalid` skips them), hardening
//! what the interface otherwise leaves undefined.

use std::collections::VecDeque;

use super::state::{PageState, StateMap};
use super::PAGE_NONE;

#[derive(Debug)]
pub struct PageMapper {
    /// mapping[vpage] = physical page, or PAGE_NONE.
    mapping: Vec<u64>,
    states: StateMap,
    free: VecDeque<u64>,
}

impl PageMapper {
    /// A fresh mapper for a data partition of `total_pages` physical pages:
    /// nothing mapped, every page `Free`, free queue empty until
    /// [`PageMapper::seed_free_list`] or [`PageMapper::rebuild_free_list`].
    pub fn new(total_pages: u64) -> Self {
        Self {
            mapping: vec![PAGE_NONE; total_pages as usize],
            states: StateMap::new(total_pages),
            free: VecDeque::new(),
        }
    }

    /// Reassembles a mapper from persisted checkpoint regions. The free
    /// queue starts empty; mount calls [`PageMapper::rebuild_free_list`].
    pub fn from_parts(mapping: Vec<u64>, states: StateMap) -> Self {
        debug_assert_eq!(mapping.len() as u64, states.pages());
        Self {
            mapping,
            states,
            free: VecDeque::new(),
        }
    }

    /// Number of physical (and virtual) pages covered.
    pub fn total_pages(&self) -> u64 {
        self.states.pages()
    }

    /// Pops the next free physical page, maps `vpage` to it, and marks it
    /// `Valid`. Returns [`PAGE_NONE`] when the free queue is exhausted or
    /// `vpage` is out of range.
    pub fn allocate(&mut self, vpage: u64) -> u64 {
        if vpage >= self.mapping.len() as u64 {
            return PAGE_NONE;
        }
        match self.free.pop_front() {
            Some(page_no) => {
                self.states.set(page_no, PageState::Valid);
                self.mapping[vpage as usize] = page_no;
                page_no
            }
            None => PAGE_NONE,
        }
    }

    /// Pure lookup: the physical page currently mapped for `vpage`, or
    /// [`PAGE_NONE`] if unmapped or out of range.
    pub fn lookup(&self, vpage: u64) -> u64 {
        match self.mapping.get(vpage as usize) {
            Some(&page_no) => page_no,
            None => PAGE_NONE,
        }
    }

    /// Marks the physical pages mapped by `count` consecutive virtual pages
    /// starting at `vpage` as `Invalid`. Unmapped or out-of-range virtual
    /// pages are skipped. The mapping-table entries are left in place.
    pub fn mark_invalid(&mut self, vpage: u64, count: u64) {
        for v in vpage..vpage.saturating_add(count) {
            let Some(&page_no) = self.mapping.get(v as usize) else {
                break;
            };
            if page_no != PAGE_NONE {
                self.states.set(page_no, PageState::Invalid);
            }
        }
    }

    /// Sets the lifecycle state of one physical page. The external garbage
    /// collector uses this for `Invalid -> Reclaimed`.
    pub fn set_state(&mut self, state: PageState, page_no: u64) {
        self.states.set(page_no, state);
    }

    /// Reads the lifecycle state of one physical page.
    pub fn state_of(&self, page_no: u64) -> PageState {
        self.states.get(page_no)
    }

    /// Appends every physical page currently `Reclaimed` to the back of the
    /// free queue, in ascending order. The sole path by which collected
    /// pages become allocatable again. States are not rewritten; see the
    /// module docs for the caller contract.
    pub fn refill_free_list(&mut self) {
        let reclaimed: Vec<u64> = self.states.pages_in_state(PageState::Reclaimed).collect();
        self.free.extend(reclaimed);
    }

    /// Seeds the free queue with every physical page in ascending order.
    /// First-format only; states are already all `Free`.
    pub fn seed_free_list(&mut self) {
        debug_assert!(self.free.is_empty());
        self.free.extend(0..self.total_pages());
    }

    /// Rebuilds the free queue from persisted states: every page still
    /// `Free` is queued in ascending order. Used at mount time, where the
    /// queue itself was not persisted.
    pub fn rebuild_free_list(&mut self) {
        self.free.clear();
        let free: Vec<u64> = self.states.pages_in_state(PageState::Free).collect();
        self.free.extend(free);
    }

    /// Number of pages currently queued for allocation.
    pub fn free_pages(&self) -> usize {
        self.free.len()
    }

    /// The mapping table as persisted in the checkpoint's mapping region.
    pub fn mapping_table(&self) -> &[u64] {
        &self.mapping
    }

    pub fn states(&self) -> &StateMap {
        &self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(pages: u64) -> PageMapper {
        let mut m = PageMapper::new(pages);
        m.seed_free_list();
        m
    }

    #[test]
    fn allocate_hands_out_pages_in_seed_order() {
        let mut m = seeded(16);

        assert_eq!(m.allocate(0), 0);
        assert_eq!(m.allocate(1), 1);
        assert_eq!(m.allocate(2), 2);
        assert_eq!(m.state_of(0), PageState::Valid);
        assert_eq!(m.state_of(1), PageState::Valid);
        assert_eq!(m.state_of(2), PageState::Valid);
    }

    #[test]
    fn lookup_is_unmapped_until_first_allocation() {
        let mut m = seeded(8);

        assert_eq!(m.lookup(3), PAGE_NONE);
        let p = m.allocate(3);
        assert_eq!(m.lookup(3), p);
    }

    #[test]
    fn lookup_is_stable_until_reallocation() {
        let mut m = seeded(8);
        let first = m.allocate(0);

        m.mark_invalid(0, 1);
        assert_eq!(m.lookup(0), first, "invalidation must not clear the mapping");

        let second = m.allocate(0);
        assert_ne!(second, first);
        assert_eq!(m.lookup(0), second);
    }

    #[test]
    fn exhausting_the_free_list_yields_sentinel_not_panic() {
        let mut m = seeded(4);

        for v in 0..4 {
            assert_ne!(m.allocate(v), PAGE_NONE);
        }
        assert_eq!(m.allocate(0), PAGE_NONE);
        assert_eq!(m.allocate(3), PAGE_NONE);
    }

    #[test]
    fn no_physical_page_is_handed_out_twice() {
        let mut m = seeded(16);
        let mut seen = std::collections::HashSet::new();

        for v in 0..16 {
            let p = m.allocate(v);
            assert!(seen.insert(p), "page {p} allocated twice");
        }
    }

    #[test]
    fn mark_invalid_walks_consecutive_vpages() {
        let mut m = seeded(8);
        let pages: Vec<u64> = (0..4).map(|v| m.allocate(v)).collect();

        m.mark_invalid(1, 2);

        assert_eq!(m.state_of(pages[0]), PageState::Valid);
        assert_eq!(m.state_of(pages[1]), PageState::Invalid);
        assert_eq!(m.state_of(pages[2]), PageState::Invalid);
        assert_eq!(m.state_of(pages[3]), PageState::Valid);
    }

    #[test]
    fn mark_invalid_skips_unmapped_vpages() {
        let mut m = seeded(8);
        m.allocate(0);

        // vpage 1 was never mapped; the walk must not corrupt any state.
        m.mark_invalid(0, 3);

        assert_eq!(m.state_of(0), PageState::Invalid);
        for p in 1..8 {
            assert_eq!(m.state_of(p), PageState::Free);
        }
    }

    #[test]
    fn out_of_range_vpage_yields_sentinel() {
        let mut m = seeded(4);

        assert_eq!(m.allocate(99), PAGE_NONE);
        assert_eq!(m.lookup(99), PAGE_NONE);
        m.mark_invalid(99, 2); // must not panic
    }

    #[test]
    fn reclaimed_page_rejoins_at_the_queue_tail() {
        // The concrete 16-page scenario: allocate 0..2, invalidate vpage 0,
        // reclaim its physical page, refill, then drain the queue.
        let mut m = seeded(16);

        assert_eq!(m.allocate(0), 0);
        assert_eq!(m.allocate(1), 1);
        assert_eq!(m.allocate(2), 2);

        m.mark_invalid(0, 1);
        assert_eq!(m.state_of(0), PageState::Invalid);

        m.set_state(PageState::Reclaimed, 0);
        m.refill_free_list();

        // Pages 3..15 still queue ahead of the re-added page 0.
        for v in 3..16 {
            assert_eq!(m.allocate(v), v);
        }
        assert_eq!(m.allocate(0), 0, "reclaimed page comes back last");
        assert_eq!(m.state_of(0), PageState::Valid);
    }

    #[test]
    fn refill_ignores_free_valid_and_invalid_pages() {
        let mut m = seeded(8);
        for v in 0..8 {
            m.allocate(v);
        }
        m.mark_invalid(0, 4);
        m.set_state(PageState::Reclaimed, 1);
        m.set_state(PageState::Reclaimed, 3);

        m.refill_free_list();

        assert_eq!(m.free_pages(), 2);
        assert_eq!(m.allocate(0), 1);
        assert_eq!(m.allocate(1), 3);
    }

    #[test]
    fn rebuild_free_list_queues_only_free_pages() {
        let mut m = seeded(8);
        m.allocate(0);
        m.allocate(1);
        m.mark_invalid(0, 1);

        // Simulate a remount: rebuild from states alone.
        let mut remounted = PageMapper::from_parts(
            m.mapping_table().to_vec(),
            StateMap::from_bytes(m.states().as_bytes(), 8),
        );
        remounted.rebuild_free_list();

        // Pages 0 (Invalid) and 1 (Valid) are excluded.
        assert_eq!(remounted.free_pages(), 6);
        assert_eq!(remounted.allocate(2), 2);
    }
}
