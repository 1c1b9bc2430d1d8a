//! # Metadata Checkpointing
//!
//! Persists the page mapper's in-memory state (packed lifecycle states plus
//! the mapping table) to the metadata partition, and reconstructs it at
//! mount. Data pages get no durability promise from this layer; only the
//! FTL's own metadata does.
//!
//! ## On-Medium Layout
//!
//! A checkpoint occupies one block range of the metadata partition:
//!
//! ```text
//! page offset          contents
//! -----------          -------------------------------------------------
//! 0                    signature page: magic 0xDEADBEEF (u32 LE) followed
//!                      by the write counter (u64 LE); rest 0xFF
//! 1 ..                 packed state region, ceil(total_data_pages/4) bytes
//! 1 + state_pages ..   mapping region, one u64 LE per virtual page,
//!                      all-ones = unmapped
//! ```
//!
//! Region page counts are derived from the data partition's geometry and
//! padded with `0xFF` up to whole metadata pages.
//!
//! ## Rotation
//!
//! Each flush erases the block range *ahead* of the current checkpoint,
//! writes the new checkpoint there with an incremented write counter, and
//! advances the checkpoint location (wrapping to block 0 when the next range
//! would overrun the partition). Spreading checkpoints across the partition
//! spreads erase cycles, and because the previous checkpoint is left intact
//! until the new one is fully written, a crash mid-flush loses at most the
//! flush in progress. Within one checkpoint the signature page is written
//! *last*: until it lands, the range has no valid signature and cannot be
//! selected. Mount scans every block's first page and loads the checkpoint
//! with the highest write counter.
//!
//! [`MetadataStore::flush_timely`] bounds checkpoint frequency: it is a
//! no-op unless at least a third of a second has passed since the previous
//! successful flush, limiting erase-cycle wear on hosts that call it on
//! every request tick.

use std::time::{Duration, Instant};

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{StoreConfig, CHECKPOINT_MAGIC, FLUSH_INTERVAL_MS};
use crate::medium::FlashMedium;

use super::mapper::PageMapper;
use super::state::StateMap;

const HEADER_LEN: usize = 12;

/// Signature header at the start of a checkpoint's first page.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct CheckpointHeader {
    magic: U32,
    write_counter: U64,
}

const _: () = assert!(std::mem::size_of::<CheckpointHeader>() == HEADER_LEN);

#[derive(Debug)]
pub struct MetadataStore {
    cfg: StoreConfig,
    /// First block of the live checkpoint.
    checkpoint_block: u64,
    write_counter: u64,
    last_flush: Option<Instant>,
}

impl MetadataStore {
    /// Formats the metadata partition: a fresh checkpoint (every page `Free`,
    /// every virtual page unmapped, counter 0) written at block 0. Any
    /// previous contents of that block range are erased.
    ///
    /// Returns the store together with the fresh mapper. The caller seeds
    /// the free list (`PageMapper::seed_free_list`).
    pub fn format<M: FlashMedium>(cfg: StoreConfig, medium: &mut M) -> Result<(Self, PageMapper)> {
        cfg.validate()?;
        ensure!(
            cfg.meta.page_size >= HEADER_LEN,
            "metadata page too small for the signature header"
        );

        let mapper = PageMapper::new(cfg.data.total_pages());
        let mut store = Self {
            cfg,
            checkpoint_block: 0,
            write_counter: 0,
            last_flush: None,
        };
        medium.erase_block(0, cfg.checkpoint_blocks())?;
        store.write_checkpoint(medium, &mapper, 0, 0)?;
        Ok((store, mapper))
    }

    /// Mounts existing metadata: scans every block's first page for the
    /// signature magic, loads the checkpoint with the highest write counter,
    /// and reconstructs the mapper from its two regions. Fails when no
    /// signature exists anywhere in the partition.
    ///
    /// The mapper's free queue is returned empty; the caller rebuilds it
    /// (`PageMapper::rebuild_free_list`).
    pub fn mount<M: FlashMedium>(cfg: StoreConfig, medium: &M) -> Result<(Self, PageMapper)> {
        cfg.validate()?;
        ensure!(
            cfg.meta.page_size >= HEADER_LEN,
            "metadata page too small for the signature header"
        );

        let mut page = vec![0u8; cfg.meta.page_size];
        let mut newest: Option<(u64, u64)> = None;

        for block in 0..cfg.meta.nb_blocks {
            medium.read_page(block * cfg.meta.pages_per_block, &mut page)?;
            let header = CheckpointHeader::ref_from_bytes(&page[..HEADER_LEN])
                .map_err(|e| eyre::eyre!("failed to parse signature page: {e:?}"))?;
            if header.magic.get() != CHECKPOINT_MAGIC {
                continue;
            }
            let counter = header.write_counter.get();
            if newest.map_or(true, |(_, best)| counter > best) {
                newest = Some((block, counter));
            }
        }

        let Some((checkpoint_block, write_counter)) = newest else {
            bail!("no checkpoint signature found: format the flash before use");
        };

        let base = checkpoint_block * cfg.meta.pages_per_block;
        let state_pages = cfg.state_region_pages();
        let map_pages = cfg.mapping_region_pages();
        let total_data_pages = cfg.data.total_pages();

        let state_bytes = read_region(medium, base + 1, state_pages, cfg.meta.page_size)?;
        let states = StateMap::from_bytes(&state_bytes, total_data_pages);

        let map_bytes = read_region(medium, base + 1 + state_pages, map_pages, cfg.meta.page_size)?;
        let mapping: Vec<u64> = map_bytes
            .chunks_exact(8)
            .take(total_data_pages as usize)
            .map(|c| u64::from_le_bytes(c.try_into().expect("chunks_exact yields 8 bytes")))
            .collect();

        let store = Self {
            cfg,
            checkpoint_block,
            write_counter,
            last_flush: None,
        };
        Ok((store, PageMapper::from_parts(mapping, states)))
    }

    /// Checkpoint rotation: erase the next block range, write the mapper's
    /// current state there with an incremented counter, advance the
    /// checkpoint location (wrapping at the partition end).
    ///
    /// The checkpoint location and counter advance only once every page has
    /// landed, so a failed flush leaves the previous checkpoint live and can
    /// simply be retried.
    pub fn flush<M: FlashMedium>(&mut self, medium: &mut M, mapper: &PageMapper) -> Result<()> {
        let block_count = self.cfg.checkpoint_blocks();
        let mut next = self.checkpoint_block + block_count;
        if next + block_count > self.cfg.meta.nb_blocks {
            next = 0;
        }

        medium.erase_block(next, block_count)?;
        self.write_checkpoint(medium, mapper, next, self.write_counter + 1)?;
        self.checkpoint_block = next;
        self.write_counter += 1;
        self.last_flush = Some(Instant::now());
        Ok(())
    }

    /// Rate-limited flush: a no-op unless [`FLUSH_INTERVAL_MS`] has elapsed
    /// since the previous successful flush. The first call always flushes.
    /// Returns whether a flush happened.
    pub fn flush_timely<M: FlashMedium>(
        &mut self,
        medium: &mut M,
        mapper: &PageMapper,
    ) -> Result<bool> {
        if let Some(last) = self.last_flush {
            if last.elapsed() < Duration::from_millis(FLUSH_INTERVAL_MS) {
                return Ok(false);
            }
        }
        self.flush(medium, mapper)?;
        Ok(true)
    }

    /// First block of the live checkpoint.
    pub fn checkpoint_block(&self) -> u64 {
        self.checkpoint_block
    }

    /// Monotonic counter of checkpoints written since format.
    pub fn write_counter(&self) -> u64 {
        self.write_counter
    }

    /// Writes one complete checkpoint at `block`. Both regions go first and
    /// the signature page last: a crash anywhere mid-write leaves the range
    /// without a valid signature, so mount can never select a checkpoint
    /// whose regions are incomplete.
    fn write_checkpoint<M: FlashMedium>(
        &self,
        medium: &mut M,
        mapper: &PageMapper,
        block: u64,
        counter: u64,
    ) -> Result<()> {
        let page_size = self.cfg.meta.page_size;
        let base = block * self.cfg.meta.pages_per_block;

        write_region(
            medium,
            base + 1,
            self.cfg.state_region_pages(),
            page_size,
            mapper.states().as_bytes(),
        )?;

        let mut map_bytes = Vec::with_capacity(mapper.mapping_table().len() * 8);
        for &entry in mapper.mapping_table() {
            map_bytes.extend_from_slice(&entry.to_le_bytes());
        }
        write_region(
            medium,
            base + 1 + self.cfg.state_region_pages(),
            self.cfg.mapping_region_pages(),
            page_size,
            &map_bytes,
        )?;

        let mut page = vec![0xFFu8; page_size];
        let header = CheckpointHeader {
            magic: U32::new(CHECKPOINT_MAGIC),
            write_counter: U64::new(counter),
        };
        page[..HEADER_LEN].copy_from_slice(header.as_bytes());
        medium.write_page(base, &page)?;

        Ok(())
    }
}

/// Writes `bytes` across `pages` consecutive pages starting at `start`,
/// padding the tail of the last page with `0xFF`.
fn write_region<M: FlashMedium>(
    medium: &mut M,
    start: u64,
    pages: u64,
    page_size: usize,
    bytes: &[u8],
) -> Result<()> {
    let mut page = vec![0xFFu8; page_size];
    for i in 0..pages {
        let offset = i as usize * page_size;
        let end = bytes.len().min(offset + page_size);
        page.fill(0xFF);
        if offset < bytes.len() {
            page[..end - offset].copy_from_slice(&bytes[offset..end]);
        }
        medium.write_page(start + i, &page)?;
    }
    Ok(())
}

/// Reads `pages` consecutive pages starting at `start` into one buffer.
fn read_region<M: FlashMedium>(
    medium: &M,
    start: u64,
    pages: u64,
    page_size: usize,
) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; pages as usize * page_size];
    for i in 0..pages {
        let offset = i as usize * page_size;
        medium.read_page(start + i, &mut bytes[offset..offset + page_size])?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionConfig;
    use crate::ftl::state::PageState;
    use crate::ftl::PAGE_NONE;
    use crate::medium::RamMedium;

    fn test_config() -> StoreConfig {
        // 16 data pages; one checkpoint = 3 meta pages = 1 block of 8 total.
        StoreConfig::new(
            PartitionConfig::new(256, 4, 8),
            PartitionConfig::new(256, 4, 4),
        )
    }

    #[test]
    fn format_writes_a_mountable_checkpoint() {
        let cfg = test_config();
        let mut medium = RamMedium::new(cfg.meta);

        let (store, mapper) = MetadataStore::format(cfg, &mut medium).unwrap();
        assert_eq!(store.write_counter(), 0);
        assert_eq!(store.checkpoint_block(), 0);

        let (mounted, loaded) = MetadataStore::mount(cfg, &medium).unwrap();
        assert_eq!(mounted.write_counter(), 0);
        assert_eq!(loaded.mapping_table(), mapper.mapping_table());
        assert!(loaded.mapping_table().iter().all(|&e| e == PAGE_NONE));
    }

    #[test]
    fn mount_without_signature_demands_format() {
        let cfg = test_config();
        let medium = RamMedium::new(cfg.meta);

        let err = MetadataStore::mount(cfg, &medium).unwrap_err();
        assert!(err.to_string().contains("format"));
    }

    #[test]
    fn flush_then_mount_round_trips_states_and_mapping() {
        let cfg = test_config();
        let mut medium = RamMedium::new(cfg.meta);
        let (mut store, mut mapper) = MetadataStore::format(cfg, &mut medium).unwrap();
        mapper.seed_free_list();

        assert_eq!(mapper.allocate(0), 0);
        assert_eq!(mapper.allocate(1), 1);
        mapper.mark_invalid(0, 1);
        mapper.set_state(PageState::Reclaimed, 5);

        store.flush(&mut medium, &mapper).unwrap();

        let (_, loaded) = MetadataStore::mount(cfg, &medium).unwrap();
        assert_eq!(loaded.mapping_table(), mapper.mapping_table());
        assert_eq!(loaded.states(), mapper.states());
        assert_eq!(loaded.state_of(0), PageState::Invalid);
        assert_eq!(loaded.state_of(1), PageState::Valid);
        assert_eq!(loaded.state_of(5), PageState::Reclaimed);
    }

    #[test]
    fn flush_rotates_the_checkpoint_block_and_wraps() {
        let cfg = test_config(); // 8 meta blocks, 1 block per checkpoint
        let mut medium = RamMedium::new(cfg.meta);
        let (mut store, mapper) = MetadataStore::format(cfg, &mut medium).unwrap();

        let mut blocks = Vec::new();
        for _ in 0..9 {
            store.flush(&mut medium, &mapper).unwrap();
            blocks.push(store.checkpoint_block());
        }

        // Walks forward one block range per flush, wrapping after block 7.
        assert_eq!(blocks, vec![1, 2, 3, 4, 5, 6, 7, 0, 1]);
    }

    #[test]
    fn mount_picks_the_checkpoint_with_the_highest_counter() {
        let cfg = test_config();
        let mut medium = RamMedium::new(cfg.meta);
        let (mut store, mut mapper) = MetadataStore::format(cfg, &mut medium).unwrap();
        mapper.seed_free_list();

        store.flush(&mut medium, &mapper).unwrap(); // counter 1 at block 1
        mapper.allocate(7);
        store.flush(&mut medium, &mapper).unwrap(); // counter 2 at block 2

        // Blocks 0, 1, and 2 all hold signatures now; only block 2 is live.
        let (mounted, loaded) = MetadataStore::mount(cfg, &medium).unwrap();
        assert_eq!(mounted.write_counter(), 2);
        assert_eq!(mounted.checkpoint_block(), 2);
        assert_ne!(loaded.lookup(7), PAGE_NONE);
    }

    /// RamMedium wrapper that fails every write after a budgeted count,
    /// simulating power loss partway through a checkpoint.
    struct DyingMedium {
        inner: RamMedium,
        writes_left: usize,
    }

    impl FlashMedium for DyingMedium {
        fn read_page(&self, page_no: u64, buf: &mut [u8]) -> Result<()> {
            self.inner.read_page(page_no, buf)
        }

        fn write_page(&mut self, page_no: u64, data: &[u8]) -> Result<()> {
            if self.writes_left == 0 {
                bail!("simulated power loss");
            }
            self.writes_left -= 1;
            self.inner.write_page(page_no, data)
        }

        fn erase_block(&mut self, block_no: u64, block_count: u64) -> Result<()> {
            self.inner.erase_block(block_no, block_count)
        }
    }

    #[test]
    fn a_flush_interrupted_mid_write_never_becomes_the_newest_checkpoint() {
        let cfg = test_config();
        // One checkpoint is three page writes (state, mapping, signature);
        // cut the power before each of them in turn.
        for cut in 0..3 {
            let mut medium = DyingMedium {
                inner: RamMedium::new(cfg.meta),
                writes_left: usize::MAX,
            };
            let (mut store, mut mapper) = MetadataStore::format(cfg, &mut medium).unwrap();
            mapper.seed_free_list();
            mapper.allocate(3);
            store.flush(&mut medium, &mapper).unwrap(); // counter 1, complete

            mapper.allocate(4);
            medium.writes_left = cut;
            assert!(store.flush(&mut medium, &mapper).is_err());

            // The torn flush left no signature, so mount falls back to the
            // last complete checkpoint.
            let (mounted, loaded) = MetadataStore::mount(cfg, &medium).unwrap();
            assert_eq!(mounted.write_counter(), 1, "cut after {cut} writes");
            assert_eq!(loaded.lookup(3), mapper.lookup(3));
            assert_eq!(loaded.lookup(4), PAGE_NONE);
        }
    }

    #[test]
    fn a_failed_flush_leaves_the_store_retryable() {
        let cfg = test_config();
        let mut medium = DyingMedium {
            inner: RamMedium::new(cfg.meta),
            writes_left: usize::MAX,
        };
        let (mut store, mut mapper) = MetadataStore::format(cfg, &mut medium).unwrap();
        mapper.seed_free_list();
        mapper.allocate(0);

        medium.writes_left = 1;
        assert!(store.flush(&mut medium, &mapper).is_err());
        assert_eq!(store.write_counter(), 0, "failed flush must not advance");

        medium.writes_left = usize::MAX;
        store.flush(&mut medium, &mapper).unwrap();

        let (mounted, loaded) = MetadataStore::mount(cfg, &medium).unwrap();
        assert_eq!(mounted.write_counter(), 1);
        assert_eq!(loaded.lookup(0), mapper.lookup(0));
    }

    #[test]
    fn flush_timely_is_rate_limited() {
        let cfg = test_config();
        let mut medium = RamMedium::new(cfg.meta);
        let (mut store, mapper) = MetadataStore::format(cfg, &mut medium).unwrap();

        // First call always flushes; an immediate second call is a no-op.
        assert!(store.flush_timely(&mut medium, &mapper).unwrap());
        assert!(!store.flush_timely(&mut medium, &mapper).unwrap());
        assert_eq!(store.write_counter(), 1);
    }

    #[test]
    fn counter_increments_once_per_flush() {
        let cfg = test_config();
        let mut medium = RamMedium::new(cfg.meta);
        let (mut store, mapper) = MetadataStore::format(cfg, &mut medium).unwrap();

        for expected in 1..=5 {
            store.flush(&mut medium, &mapper).unwrap();
            assert_eq!(store.write_counter(), expected);
        }
    }
}
