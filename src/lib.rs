//! # nandkv: Key-Value Storage for Raw Flash
//!
//! nandkv is a key-value storage engine for raw flash (or any block-erasable)
//! media, built to run where no conventional file system or flash controller
//! is available. Flash pages cannot be rewritten in place (only written once
//! after a block erase), so every update is redirected through a Flash
//! Translation Layer (FTL) to a fresh physical page while the stale one is
//! tracked for later reclamation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │        Host (command surface)        │   external
//! ├──────────────────────────────────────┤
//! │        FlashStore (facade)           │   store
//! ├─────────────┬────────────────────────┤
//! │  Key Index  │      Page Cache        │   index / cache
//! ├─────────────┴────────────────────────┤
//! │  FTL: mapper + states + checkpoints  │   ftl
//! ├──────────────────────────────────────┤
//! │     FlashMedium (page/block I/O)     │   medium
//! └──────────────────────────────────────┘
//! ```
//!
//! - [`index`]: in-memory hash index, key string → page identifier
//! - [`cache`]: fixed-capacity page buffer pool with insertion-order eviction
//! - [`ftl`]: virtual-to-physical mapping, free-page queue, per-page
//!   lifecycle states, and rotating metadata checkpoints
//! - [`medium`]: the raw device boundary (RAM and flash-image backends
//!   included)
//! - [`store`]: the facade owning all of the above
//!
//! ## Quick Start
//!
//! ```ignore
//! use nandkv::{FlashStore, PartitionConfig, RamMedium, StoreConfig};
//!
//! let cfg = StoreConfig::new(
//!     PartitionConfig::new(4096, 64, 8),   // metadata partition
//!     PartitionConfig::new(4096, 64, 256), // data partition
//! );
//!
//! let mut store = FlashStore::format(
//!     cfg,
//!     RamMedium::new(cfg.meta),
//!     RamMedium::new(cfg.data),
//! )?;
//!
//! store.put("sensor/7", b"22.5C")?;
//! assert_eq!(store.get("sensor/7")?.as_deref(), Some(&b"22.5C"[..]));
//! store.flush()?; // checkpoint the FTL metadata
//! ```
//!
//! ## What This Engine Does Not Do
//!
//! Garbage collection runs outside the engine: the FTL tracks page states
//! (`Free -> Valid -> Invalid -> Reclaimed`) and re-queues pages a collector
//! has marked `Reclaimed`, but never moves data itself. There is no
//! wear-leveling beyond rotating the checkpoint location, no durability
//! guarantee for data pages (only the FTL's own metadata is checkpointed),
//! and no internal locking: a multi-threaded host serializes all calls.

pub mod cache;
pub mod config;
pub mod ftl;
pub mod index;
pub mod medium;
pub mod store;

pub use cache::PageCache;
pub use config::{PartitionConfig, StoreConfig};
pub use ftl::{MetadataStore, PageMapper, PageState, StateMap, PAGE_NONE};
pub use index::KeyIndex;
pub use medium::{FlashMedium, ImageMedium, RamMedium};
pub use store::FlashStore;
