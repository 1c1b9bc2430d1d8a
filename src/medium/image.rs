//! Memory-mapped flash image file.
//!
//! `ImageMedium` backs a partition with an ordinary file on the host
//! filesystem, memory-mapped for access without per-page syscalls. The file
//! is sized to the full partition up front and never grows; `create` leaves
//! it fully erased (`0xFF`), `open` takes the image as it is.
//!
//! This backend exists for development and tooling against flash dumps. It
//! deliberately does not emulate program/erase constraints (a real device
//! rejects programming a non-erased page); the engine's own discipline is
//! exercised against `RamMedium` in tests.

use std::fs::OpenOptions;
use std::path::Path;

use eyre::{ensure, Context, Result};
use memmap2::MmapMut;

use crate::config::PartitionConfig;

use super::FlashMedium;

#[derive(Debug)]
pub struct ImageMedium {
    cfg: PartitionConfig,
    mmap: MmapMut,
}

impl ImageMedium {
    /// Creates a new image file sized to the partition and fills it with
    /// `0xFF`, i.e. a freshly erased device.
    pub fn create<P: AsRef<Path>>(path: P, cfg: PartitionConfig) -> Result<Self> {
        cfg.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to create flash image {:?}", path.as_ref()))?;

        file.set_len(cfg.len_bytes() as u64)
            .wrap_err("failed to size flash image")?;

        // SAFETY: the file was just created and sized by this process; the
        // map stays valid because the file is never resized afterwards.
        let mut mmap =
            unsafe { MmapMut::map_mut(&file).wrap_err("failed to map flash image")? };
        mmap.fill(0xFF);

        Ok(Self { cfg, mmap })
    }

    /// Opens an existing image file. The file length must match the
    /// partition geometry exactly.
    pub fn open<P: AsRef<Path>>(path: P, cfg: PartitionConfig) -> Result<Self> {
        cfg.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .wrap_err_with(|| format!("failed to open flash image {:?}", path.as_ref()))?;

        let len = file.metadata().wrap_err("failed to stat flash image")?.len();
        ensure!(
            len == cfg.len_bytes() as u64,
            "flash image is {} bytes, geometry expects {}",
            len,
            cfg.len_bytes()
        );

        // SAFETY: the file is held open for the lifetime of the map and is
        // never resized by this type.
        let mmap = unsafe { MmapMut::map_mut(&file).wrap_err("failed to map flash image")? };

        Ok(Self { cfg, mmap })
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.cfg
    }

    fn page_range(&self, page_no: u64) -> Result<std::ops::Range<usize>> {
        ensure!(
            page_no < self.cfg.total_pages(),
            "page {} out of range (partition has {} pages)",
            page_no,
            self.cfg.total_pages()
        );
        let start = page_no as usize * self.cfg.page_size;
        Ok(start..start + self.cfg.page_size)
    }
}

impl FlashMedium for ImageMedium {
    fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.cfg.page_size,
            "read buffer is {} bytes, page is {}",
            buf.len(),
            self.cfg.page_size
        );
        let range = self.page_range(page_no)?;
        buf.copy_from_slice(&self.mmap[range]);
        Ok(())
    }

    fn write_page(&mut self, page_no: u64, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.cfg.page_size,
            "write buffer is {} bytes, page is {}",
            data.len(),
            self.cfg.page_size
        );
        let range = self.page_range(page_no)?;
        self.mmap[range].copy_from_slice(data);
        Ok(())
    }

    fn erase_block(&mut self, block_no: u64, block_count: u64) -> Result<()> {
        ensure!(
            block_no + block_count <= self.cfg.nb_blocks,
            "erase of blocks {}..{} out of range (partition has {} blocks)",
            block_no,
            block_no + block_count,
            self.cfg.nb_blocks
        );
        let start = block_no as usize * self.cfg.block_bytes();
        let end = start + block_count as usize * self.cfg.block_bytes();
        self.mmap[start..end].fill(0xFF);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync flash image")
    }
}
