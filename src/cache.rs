//! # Page Cache
//!
//! Fixed-capacity pool of in-memory page buffers in front of the data
//! medium. The backing arena (`cache_pages * page_size` bytes) is allocated
//! once at construction and never resized; a slot's buffer address is fixed
//! for the life of the cache and is only ever re-labeled with a new page
//! identifier on eviction, never freed.
//!
//! ## Eviction Order
//!
//! The recency list records **insertion** order, not access order: a cache
//! hit returns the slot without re-ordering the list. Eviction therefore
//! removes the least-recently-*inserted* slot (the list tail), FIFO-like
//! rather than LRU, even though a page cache is usually described as the
//! latter. Clients
//! must not assume promotion-on-hit; the literal behavior is part of the
//! contract and is pinned by tests.
//!
//! ## Read Path
//!
//! [`PageCache::get_page`] only reserves a slot; it never touches the
//! medium. [`PageCache::read_page`] populates the slot lazily: if the slot
//! is not yet loaded, it issues one page-granular read at
//! `page_no * page_size` and marks the slot valid. There is no write-back
//! path in this component: writes go through the page mapper, and the cache
//! stays read-oriented.
//!
//! Slots are keyed by physical page number. Because an overwrite redirects a
//! virtual page to a fresh physical page, a stale slot for the old physical
//! page is simply never requested again and ages out of the list.

use std::collections::VecDeque;

use eyre::Result;

use crate::ftl::PAGE_NONE;
use crate::medium::FlashMedium;

/// Handle to a reserved cache slot, returned by [`PageCache::get_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

#[derive(Debug)]
struct Slot {
    page_no: u64,
    /// Whether the buffer holds the medium's contents for `page_no`.
    loaded: bool,
}

/// Occupancy bitmap over the cache slots.
#[derive(Debug)]
struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    fn set(&mut self, idx: usize) {
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    fn clear(&mut self, idx: usize) {
        self.words[idx / 64] &= !(1 << (idx % 64));
    }

    /// Lowest-indexed clear bit, or `None` when all `len` bits are set.
    fn first_zero(&self) -> Option<usize> {
        for (w, &word) in self.words.iter().enumerate() {
            let bit = word.trailing_ones() as usize;
            if bit < 64 {
                let idx = w * 64 + bit;
                return (idx < self.len).then_some(idx);
            }
        }
        None
    }
}

#[derive(Debug)]
pub struct PageCache {
    page_size: usize,
    arena: Box<[u8]>,
    slots: Vec<Slot>,
    /// Slot indices, front = most recently inserted.
    order: VecDeque<usize>,
    occupancy: Bitmap,
}

impl PageCache {
    /// Allocates the arena for `cache_pages` slots of `page_size` bytes.
    /// Capacity is fixed thereafter.
    pub fn new(cache_pages: usize, page_size: usize) -> Self {
        assert!(cache_pages > 0, "cache needs at least one slot");
        assert!(page_size > 0, "page_size must be non-zero");
        Self {
            page_size,
            arena: vec![0u8; cache_pages * page_size].into_boxed_slice(),
            slots: (0..cache_pages)
                .map(|_| Slot {
                    page_no: PAGE_NONE,
                    loaded: false,
                })
                .collect(),
            order: VecDeque::with_capacity(cache_pages),
            occupancy: Bitmap::new(cache_pages),
        }
    }

    /// Returns the slot holding `page_no`, reserving one if absent.
    ///
    /// Hit: the slot is returned as-is, without re-ordering the recency
    /// list. Miss: the lowest-indexed unoccupied slot is claimed, or, when
    /// every slot is occupied, the least-recently-inserted slot is evicted
    /// and its buffer re-labeled. Either way the slot enters the list head,
    /// marked not-loaded; no medium I/O happens here.
    pub fn get_page(&mut self, page_no: u64) -> SlotId {
        for &idx in &self.order {
            if self.slots[idx].page_no == page_no {
                return SlotId(idx);
            }
        }

        let idx = match self.occupancy.first_zero() {
            Some(idx) => {
                self.occupancy.set(idx);
                idx
            }
            None => self
                .order
                .pop_back()
                .expect("occupancy full implies a non-empty recency list"),
        };

        self.slots[idx].page_no = page_no;
        self.slots[idx].loaded = false;
        self.order.push_front(idx);
        SlotId(idx)
    }

    /// Returns the slot's buffer, reading it from the medium first if the
    /// slot is not yet loaded.
    pub fn read_page<M: FlashMedium>(&mut self, slot: SlotId, medium: &M) -> Result<&[u8]> {
        let start = slot.0 * self.page_size;
        let buf = &mut self.arena[start..start + self.page_size];
        if !self.slots[slot.0].loaded {
            medium.read_page(self.slots[slot.0].page_no, buf)?;
            self.slots[slot.0].loaded = true;
        }
        Ok(&self.arena[start..start + self.page_size])
    }

    /// Drops the slot holding `page_no`, if any. Used when a physical page
    /// is rewritten after recycling through the free list, so a stale buffer
    /// can never satisfy a later read of the same page number.
    pub fn forget(&mut self, page_no: u64) {
        let Some(pos) = self.order.iter().position(|&i| self.slots[i].page_no == page_no) else {
            return;
        };
        let idx = self.order.remove(pos).expect("position came from the list");
        self.occupancy.clear(idx);
        self.slots[idx].page_no = PAGE_NONE;
        self.slots[idx].loaded = false;
    }

    /// The page identifier a slot currently represents.
    pub fn page_no(&self, slot: SlotId) -> u64 {
        self.slots[slot.0].page_no
    }

    /// Whether `page_no` currently occupies a slot.
    pub fn contains(&self, page_no: u64) -> bool {
        self.order.iter().any(|&i| self.slots[i].page_no == page_no)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fixed slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
