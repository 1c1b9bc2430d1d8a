//! # Page Lifecycle States
//!
//! Every physical page in the data partition carries exactly one of four
//! states, packed four pages per byte:
//!
//! ```text
//! state     value   meaning
//! --------  -----   ------------------------------------------------------
//! Free      0b00    never written since last erase, allocatable
//! Valid     0b01    holds the live copy of a virtual page
//! Invalid   0b10    superseded by a newer write, awaiting collection
//! Reclaimed 0b11    collector has copied/abandoned it, ready to re-queue
//! ```
//!
//! Transitions: `Free -> Valid` on allocation, `Valid -> Invalid` on
//! overwrite or delete, `Invalid -> Reclaimed` by the external garbage
//! collector, and `Reclaimed` pages are re-queued to the free list by
//! `PageMapper::refill_free_list`. There is no `Reclaimed -> Free`
//! transition; a re-queued page stays `Reclaimed` until it is allocated
//! again.
//!
//! ## Packing
//!
//! `byte = page / 4`, `shift = 2 * (page % 4)`, low bits first. The accessor
//! below is the single place this arithmetic lives so it can be tested in
//! isolation; nothing else in the crate shifts state bits by hand. The byte
//! array is exactly what gets persisted as the checkpoint's state region.

/// Lifecycle state of one physical page, two bits on the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageState {
    Free = 0,
    Valid = 1,
    Invalid = 2,
    Reclaimed = 3,
}

impl PageState {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => PageState::Free,
            1 => PageState::Valid,
            2 => PageState::Invalid,
            _ => PageState::Reclaimed,
        }
    }
}

/// Packed 2-bit state array covering every physical page of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMap {
    bytes: Vec<u8>,
    pages: u64,
}

impl StateMap {
    /// A fresh map with every page `Free` (all bits zero).
    pub fn new(pages: u64) -> Self {
        Self {
            bytes: vec![0u8; pages.div_ceil(4) as usize],
            pages,
        }
    }

    /// Rebuilds a map from a persisted state region. `bytes` may be longer
    /// than strictly needed (region padding up to a whole page); the excess
    /// is ignored.
    pub fn from_bytes(bytes: &[u8], pages: u64) -> Self {
        let needed = pages.div_ceil(4) as usize;
        debug_assert!(bytes.len() >= needed, "state region shorter than page count");
        Self {
            bytes: bytes[..needed].to_vec(),
            pages,
        }
    }

    /// Number of pages the map covers.
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// The packed bytes, as persisted in the checkpoint state region.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reads the state of `page_no`. Out-of-range pages read as `Free`,
    /// matching the mapper's sentinel policy for out-of-range addresses.
    pub fn get(&self, page_no: u64) -> PageState {
        if page_no >= self.pages {
            return PageState::Free;
        }
        let byte = self.bytes[(page_no / 4) as usize];
        let shift = 2 * (page_no % 4) as u8;
        PageState::from_bits(byte >> shift)
    }

    /// Sets exactly the 2-bit field for `page_no`, leaving the other three
    /// pages in its byte untouched. Out-of-range pages are ignored.
    pub fn set(&mut self, page_no: u64, state: PageState) {
        if page_no >= self.pages {
            return;
        }
        let idx = (page_no / 4) as usize;
        let shift = 2 * (page_no % 4) as u8;
        let mask = !(0b11u8 << shift);
        self.bytes[idx] = (self.bytes[idx] & mask) | ((state as u8) << shift);
    }

    /// Iterates over all pages currently in `state`, in ascending order.
    pub fn pages_in_state(&self, state: PageState) -> impl Iterator<Item = u64> + '_ {
        (0..self.pages).filter(move |&p| self.get(p) == state)
    }
}
