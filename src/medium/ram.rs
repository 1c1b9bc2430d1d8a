//! In-memory flash medium used by tests and simulations.
//!
//! Behaves like the real thing at the interface: page-granular reads and
//! writes, block-granular erases that fill with `0xFF`, hard errors on
//! out-of-range addresses. Contents start fully erased.

use eyre::{ensure, Result};

use crate::config::PartitionConfig;

use super::FlashMedium;

#[derive(Debug)]
pub struct RamMedium {
    cfg: PartitionConfig,
    bytes: Vec<u8>,
}

impl RamMedium {
    pub fn new(cfg: PartitionConfig) -> Self {
        Self {
            cfg,
            bytes: vec![0xFF; cfg.len_bytes()],
        }
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

impl FlashMedium for RamMedium {
    fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<()> {
        ensure!(
            buf.len() == self.cfg.page_size,
            "read buffer is {} bytes, page is {}",
            buf.len(),
            self.cfg.page_size
        );
        let range = self.page_range(page_no)?;
        buf.copy_from_slice(&self.bytes[range]);
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
        self.bytes[range].copy_from_slice(data);
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
        self.bytes[start..end].fill(0xFF);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn medium() -> RamMedium {
        RamMedium::new(PartitionConfig::new(64, 4, 4))
    }

    #[test]
    fn fresh_medium_reads_as_erased() {
        let m = medium();
        let mut buf = [0u8; 64];

        m.read_page(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut m = medium();
        let page = [0xABu8; 64];

        m.write_page(7, &page).unwrap();

        let mut buf = [0u8; 64];
        m.read_page(7, &mut buf).unwrap();
        assert_eq!(buf, page);
    }

    #[test]
    fn erase_block_fills_with_ones() {
        let mut m = medium();
        m.write_page(0, &[0u8; 64]).unwrap();
        m.write_page(3, &[0u8; 64]).unwrap();

        m.erase_block(0, 1).unwrap();

        let mut buf = [0u8; 64];
        m.read_page(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xFF));
        m.read_page(3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn erase_leaves_neighboring_blocks_intact() {
        let mut m = medium();
        m.write_page(4, &[0x11u8; 64]).unwrap();

        m.erase_block(0, 1).unwrap();

        let mut buf = [0u8; 64];
        m.read_page(4, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn out_of_range_page_is_an_error() {
        let m = medium();
        let mut buf = [0u8; 64];

        assert!(m.read_page(16, &mut buf).is_err());
    }

    #[test]
    fn out_of_range_erase_is_an_error() {
        let mut m = medium();

        assert!(m.erase_block(3, 2).is_err());
    }

    #[test]
    fn wrong_buffer_length_is_an_error() {
        let m = medium();
        let mut buf = [0u8; 32];

        assert!(m.read_page(0, &mut buf).is_err());
    }
}
