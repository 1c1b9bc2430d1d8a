//! # Flash Medium Abstraction
//!
//! The engine never talks to hardware directly; it goes through the
//! `FlashMedium` trait, which models a raw page/block device over one
//! partition's linear address space:
//!
//! ```text
//! fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<()>;
//! fn write_page(&mut self, page_no: u64, data: &[u8]) -> Result<()>;
//! fn erase_block(&mut self, block_no: u64, block_count: u64) -> Result<()>;
//! ```
//!
//! Addressing is `page_no * page_size` byte offsets; page and block sizes are
//! fixed per partition and supplied at construction via
//! [`PartitionConfig`](crate::config::PartitionConfig).
//! Every call is synchronous: it completes or fails outright, and failures
//! propagate to the caller unchanged. There is no retry, cancellation, or
//! timeout at this layer.
//!
//! ## Backends
//!
//! | Backend       | Storage              | Use                         |
//! |---------------|----------------------|-----------------------------|
//! | `RamMedium`   | heap `Vec<u8>`       | tests, simulation           |
//! | `ImageMedium` | memory-mapped file   | flash image on a host FS    |
//!
//! Erasing fills the affected blocks with `0xFF`, matching NOR/NAND erase
//! semantics where an erased cell reads as all-ones.

mod image;
mod ram;

pub use image::ImageMedium;
pub use ram::RamMedium;

use eyre::Result;

/// A page-granular, block-erasable storage medium for one partition.
pub trait FlashMedium {
    /// Reads one page into `buf`. `buf` must be exactly one page long.
    fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes one page from `data`. `data` must be exactly one page long.
    fn write_page(&mut self, page_no: u64, data: &[u8]) -> Result<()>;

    /// Erases `block_count` consecutive blocks starting at `block_no`,
    /// filling them with `0xFF`. Returns once the erase has completed.
    fn erase_block(&mut self, block_no: u64, block_count: u64) -> Result<()>;

    /// Flushes buffered writes to durable storage, where the backend has any.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
