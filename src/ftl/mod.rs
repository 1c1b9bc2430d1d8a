//! # Flash Translation Layer
//!
//! Flash pages cannot be rewritten in place: a page is written once after its
//! block is erased, so an update must be redirected to a fresh physical page
//! while the stale one is marked for later reclamation. The FTL provides the
//! indirection that makes this invisible to the layer above:
//!
//! - [`state`]: per-page lifecycle metadata, two bits per physical page
//!   (`Free -> Valid -> Invalid -> Reclaimed`), packed four pages per byte
//! - [`mapper`]: virtual-to-physical mapping table plus the free-page queue
//! - [`checkpoint`]: persistence of both structures to a dedicated metadata
//!   partition, rotated to a new block range on every flush
//!
//! Garbage collection is an external collaborator: the FTL only tracks page
//! state and re-queues pages an outside collector has already marked
//! `Reclaimed`.
//!
//! ## Sentinel Convention
//!
//! "No mapping", "key not found", and "no free page" are all signaled in-band
//! with [`PAGE_NONE`] (all-ones), matching the persisted mapping-table
//! encoding where an unmapped entry is `0xFFFF_FFFF_FFFF_FFFF`. Callers
//! compare against the sentinel rather than matching on an error type.

pub mod checkpoint;
pub mod mapper;
pub mod state;

pub use checkpoint::MetadataStore;
pub use mapper::PageMapper;
pub use state::{PageState, StateMap};

/// All-ones sentinel: unmapped virtual page, missing key, or exhausted
/// free list, depending on context.
pub const PAGE_NONE: u64 = u64::MAX;
