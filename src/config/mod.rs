//! # Engine Configuration
//!
//! Partition geometry and engine tuning knobs. Flash media are described in
//! page/block terms: a page is the smallest write unit, a block is the
//! smallest erase unit, and a partition is a linear run of blocks. The engine
//! operates on two partitions with independent geometry:
//!
//! - **metadata partition**: holds the rotating checkpoint (signature page,
//!   packed lifecycle states, mapping table)
//! - **data partition**: holds the key-value record pages
//!
//! ## Dependency Graph
//!
//! ```text
//! PartitionConfig { page_size, pages_per_block, nb_blocks }
//!       │
//!       ├─> total_pages = nb_blocks * pages_per_block
//!       │
//!       ├─> state region bytes   = ceil(total_data_pages / 4)  (2 bits/page)
//!       ├─> mapping region bytes = total_data_pages * 8        (u64/page)
//!       │
//!       └─> checkpoint block range = ceil((1 + state_pages + map_pages)
//!                                          / pages_per_block)
//! ```
//!
//! `StoreConfig::validate` rejects geometry where the metadata partition
//! cannot hold two checkpoint ranges, so the rotation in `ftl::checkpoint`
//! always has a second range to write into while the previous checkpoint
//! stays intact.

use eyre::{ensure, Result};

/// Default number of slots in the page cache.
pub const DEFAULT_CACHE_PAGES: usize = 64;

/// Default number of hash buckets in the key index.
pub const DEFAULT_INDEX_BUCKETS: usize = 64;

/// Magic value at the start of a checkpoint signature page.
pub const CHECKPOINT_MAGIC: u32 = 0xDEAD_BEEF;

/// Minimum interval between two timely metadata flushes.
pub const FLUSH_INTERVAL_MS: u64 = 333;

/// Geometry of one flash partition.
///
/// All medium addressing is `page_no * page_size` byte offsets into the
/// partition's linear address space. Pages within a block can only be
/// rewritten after the whole block is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Bytes per page (smallest write unit).
    pub page_size: usize,
    /// Pages per erase block.
    pub pages_per_block: u64,
    /// Number of erase blocks in the partition.
    pub nb_blocks: u64,
}

impl PartitionConfig {
    pub fn new(page_size: usize, pages_per_block: u64, nb_blocks: u64) -> Self {
        Self {
            page_size,
            pages_per_block,
            nb_blocks,
        }
    }

    /// Total number of pages in the partition.
    pub fn total_pages(&self) -> u64 {
        self.nb_blocks * self.pages_per_block
    }

    /// Bytes covered by one erase block.
    pub fn block_bytes(&self) -> usize {
        self.page_size * self.pages_per_block as usize
    }

    /// Total byte length of the partition.
    pub fn len_bytes(&self) -> usize {
        self.block_bytes() * self.nb_blocks as usize
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.page_size > 0, "page_size must be non-zero");
        ensure!(self.pages_per_block > 0, "pages_per_block must be non-zero");
        ensure!(self.nb_blocks > 0, "nb_blocks must be non-zero");
        Ok(())
    }
}

/// Full engine configuration: both partitions plus cache/index sizing.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub meta: PartitionConfig,
    pub data: PartitionConfig,
    /// Number of fixed slots in the page cache.
    pub cache_pages: usize,
    /// Number of hash buckets in the key index.
    pub index_buckets: usize,
}

impl StoreConfig {
    pub fn new(meta: PartitionConfig, data: PartitionConfig) -> Self {
        Self {
            meta,
            data,
            cache_pages: DEFAULT_CACHE_PAGES,
            index_buckets: DEFAULT_INDEX_BUCKETS,
        }
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn with_index_buckets(mut self, index_buckets: usize) -> Self {
        self.index_buckets = index_buckets;
        self
    }

    /// Number of metadata-partition pages needed for the packed state region.
    pub fn state_region_pages(&self) -> u64 {
        let bytes = self.data.total_pages().div_ceil(4);
        bytes.div_ceil(self.meta.page_size as u64)
    }

    /// Number of metadata-partition pages needed for the mapping region.
    pub fn mapping_region_pages(&self) -> u64 {
        let bytes = self.data.total_pages() * 8;
        bytes.div_ceil(self.meta.page_size as u64)
    }

    /// Number of erase blocks one checkpoint occupies (signature page plus
    /// both regions, rounded up to whole blocks).
    pub fn checkpoint_blocks(&self) -> u64 {
        let pages = 1 + self.state_region_pages() + self.mapping_region_pages();
        pages.div_ceil(self.meta.pages_per_block)
    }

    pub fn validate(&self) -> Result<()> {
        self.meta.validate()?;
        self.data.validate()?;
        ensure!(self.cache_pages > 0, "cache_pages must be non-zero");
        ensure!(self.index_buckets > 0, "index_buckets must be non-zero");
        // Rotation needs a second range: with only one, every flush erases
        // the sole checkpoint before rewriting it, and a crash in between
        // leaves no checkpoint at all.
        ensure!(
            self.checkpoint_blocks() * 2 <= self.meta.nb_blocks,
            "metadata partition too small: rotation needs {} blocks (two checkpoint ranges), partition has {}",
            self.checkpoint_blocks() * 2,
            self.meta.nb_blocks
        );
        Ok(())
    }
}
