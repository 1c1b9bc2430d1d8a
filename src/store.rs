//! # Engine Facade
//!
//! `FlashStore` wires the four components together and owns all mutable
//! state: the key index, the page cache, the page mapper, and the metadata
//! store, plus the two medium handles. Every structure is an explicit owned
//! field constructed at [`FlashStore::format`] or [`FlashStore::mount`], so
//! multiple independent engines can coexist and tear down deterministically.
//!
//! ## Control Flow
//!
//! ```text
//! get:  key ──KeyIndex──> vpage ──PageMapper──> ppage ──PageCache──> bytes
//! put:  mark old ppage Invalid, allocate fresh ppage, write record,
//!       index the key
//! ```
//!
//! ## Record Layout
//!
//! One record per data page:
//!
//! ```text
//! offset  size       field
//! ------  ---------  --------------------------
//! 0       8          vpage (u64 LE, owner of this page)
//! 8       2          key_len (u16 LE)
//! 10      4          val_len (u32 LE)
//! 14      key_len    key bytes (UTF-8)
//! 14+k    val_len    value bytes
//! rest    -          0xFF padding
//! ```
//!
//! Storing the key alongside the value lets [`FlashStore::mount`] rebuild
//! the in-memory key index by scanning the mapped, `Valid` pages; the index
//! itself is never persisted. The owner vpage disambiguates stale mappings:
//! `mark_invalid` never clears a mapping-table entry, so after a physical
//! page recycles through the free list two virtual pages can point at it.
//! Only the one named in the record owns it; the other is reusable.
//!
//! ## Concurrency
//!
//! None. Every operation is synchronous and runs to completion; a host that
//! serves multiple threads must serialize all entry points (a single mutex
//! around the whole store suffices). Periodic checkpointing is driven by the
//! host calling [`FlashStore::flush_timely`] on its regular tick, not by a
//! background task.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::cache::PageCache;
use crate::config::StoreConfig;
use crate::ftl::state::PageState;
use crate::ftl::{MetadataStore, PageMapper, PAGE_NONE};
use crate::index::KeyIndex;
use crate::medium::FlashMedium;

const RECORD_HEADER_LEN: usize = 14;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RecordHeader {
    vpage: U64,
    key_len: U16,
    val_len: U32,
}

const _: () = assert!(std::mem::size_of::<RecordHeader>() == RECORD_HEADER_LEN);

#[derive(Debug)]
pub struct FlashStore<M: FlashMedium> {
    cfg: StoreConfig,
    meta: M,
    data: M,
    index: KeyIndex,
    cache: PageCache,
    mapper: PageMapper,
    checkpoints: MetadataStore,
    /// Next never-used virtual page number.
    next_vpage: u64,
    /// Virtual pages freed by deletes, reusable for new keys.
    free_vpages: Vec<u64>,
}

impl<M: FlashMedium> FlashStore<M> {
    /// Fresh initialization: formats the metadata partition, seeds the free
    /// list with every data page, and starts with an empty index and cache.
    /// Destroys whatever checkpoint the metadata partition held before.
    pub fn format(cfg: StoreConfig, mut meta: M, data: M) -> Result<Self> {
        let (checkpoints, mut mapper) = MetadataStore::format(cfg, &mut meta)?;
        mapper.seed_free_list();
        Ok(Self {
            cfg,
            meta,
            data,
            index: KeyIndex::new(cfg.index_buckets),
            cache: PageCache::new(cfg.cache_pages, cfg.data.page_size),
            mapper,
            checkpoints,
            next_vpage: 0,
            free_vpages: Vec::new(),
        })
    }

    /// Mounts existing state: loads the newest checkpoint, rebuilds the free
    /// list from persisted page states, and rebuilds the key index by
    /// scanning every mapped page that is still `Valid`. Fails if the
    /// metadata partition holds no checkpoint signature.
    pub fn mount(cfg: StoreConfig, meta: M, data: M) -> Result<Self> {
        let (checkpoints, mut mapper) = MetadataStore::mount(cfg, &meta)?;
        mapper.rebuild_free_list();

        let next_vpage = mapper
            .mapping_table()
            .iter()
            .rposition(|&p| p != PAGE_NONE)
            .map(|i| i as u64 + 1)
            .unwrap_or(0);

        // Rebuild the index from records still owned by their vpage; every
        // other previously-used vpage (stale mapping, invalidated page) is
        // reusable for new keys.
        let mut index = KeyIndex::new(cfg.index_buckets);
        let mut free_vpages = Vec::new();
        let mut page = vec![0u8; cfg.data.page_size];
        for vpage in 0..next_vpage {
            let ppage = mapper.lookup(vpage);
            if ppage != PAGE_NONE && mapper.state_of(ppage) == PageState::Valid {
                data.read_page(ppage, &mut page)?;
                let record = parse_record(&page)?;
                if record.vpage == vpage {
                    index.put(record.key, vpage);
                    continue;
                }
            }
            free_vpages.push(vpage);
        }

        Ok(Self {
            cfg,
            meta,
            data,
            index,
            cache: PageCache::new(cfg.cache_pages, cfg.data.page_size),
            mapper,
            checkpoints,
            next_vpage,
            free_vpages,
        })
    }

    /// Writes or overwrites one key-value record. The record (header, key,
    /// value) must fit in a single data page.
    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let record_len = RECORD_HEADER_LEN + key.len() + value.len();
        ensure!(
            record_len <= self.cfg.data.page_size,
            "record for key {:?} is {} bytes, page is {}",
            key,
            record_len,
            self.cfg.data.page_size
        );
        ensure!(
            key.len() <= u16::MAX as usize,
            "key longer than {} bytes",
            u16::MAX
        );

        // A failed put must leave the live copy untouched, so the free page
        // is confirmed before the old physical page is invalidated.
        ensure!(
            self.mapper.free_pages() > 0,
            "no free pages in the data partition"
        );

        // An existing key keeps its virtual page; the old physical page is
        // invalidated before re-allocation rebinds the mapping entry.
        let existing = self.index.get(key);
        let vpage = if existing != PAGE_NONE && self.mapper.lookup(existing) != PAGE_NONE {
            self.mapper.mark_invalid(existing, 1);
            existing
        } else if let Some(v) = self.free_vpages.pop() {
            v
        } else {
            let v = self.next_vpage;
            ensure!(
                v < self.mapper.total_pages(),
                "virtual address space exhausted ({} pages)",
                self.mapper.total_pages()
            );
            self.next_vpage += 1;
            v
        };

        let ppage = self.mapper.allocate(vpage);
        if ppage == PAGE_NONE {
            bail!("no free pages in the data partition");
        }

        let mut page = vec![0xFFu8; self.cfg.data.page_size];
        let header = RecordHeader {
            vpage: U64::new(vpage),
            key_len: U16::new(key.len() as u16),
            val_len: U32::new(value.len() as u32),
        };
        page[..RECORD_HEADER_LEN].copy_from_slice(header.as_bytes());
        page[RECORD_HEADER_LEN..RECORD_HEADER_LEN + key.len()].copy_from_slice(key.as_bytes());
        page[RECORD_HEADER_LEN + key.len()..RECORD_HEADER_LEN + key.len() + value.len()]
            .copy_from_slice(value);
        self.data.write_page(ppage, &page)?;

        // The physical page may have cycled through the free list; a stale
        // cached copy must not survive the rewrite.
        self.cache.forget(ppage);

        self.index.put(key, vpage);
        Ok(())
    }

    /// Looks up a key. Returns `None` for never-written or deleted keys.
    pub fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let vpage = self.index.get(key);
        if vpage == PAGE_NONE {
            return Ok(None);
        }
        let ppage = self.mapper.lookup(vpage);
        if ppage == PAGE_NONE {
            return Ok(None);
        }

        let slot = self.cache.get_page(ppage);
        let page = self.cache.read_page(slot, &self.data)?;
        let record = parse_record(page)?;
        ensure!(
            record.key == key,
            "page {} holds key {:?}, expected {:?}",
            ppage,
            record.key,
            key
        );
        Ok(Some(record.value.to_vec()))
    }

    /// Deletes a key: invalidates its physical page and shadows the index
    /// chain with a tombstone. Returns whether the key existed. Space is
    /// recovered once the external collector reclaims the page.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let vpage = self.index.get(key);
        if vpage == PAGE_NONE {
            return Ok(false);
        }
        self.mapper.mark_invalid(vpage, 1);
        self.index.put(key, PAGE_NONE);
        self.free_vpages.push(vpage);
        Ok(true)
    }

    /// Checkpoints the FTL metadata now.
    pub fn flush(&mut self) -> Result<()> {
        self.checkpoints.flush(&mut self.meta, &self.mapper)
    }

    /// Rate-limited checkpoint; call once per host tick. Returns whether a
    /// flush happened.
    pub fn flush_timely(&mut self) -> Result<bool> {
        self.checkpoints.flush_timely(&mut self.meta, &self.mapper)
    }

    /// Lifecycle state of a physical page. GC surface.
    pub fn state_of(&self, ppage: u64) -> PageState {
        self.mapper.state_of(ppage)
    }

    /// Sets a physical page's lifecycle state. The external garbage
    /// collector uses this to mark copied-out pages `Reclaimed`.
    pub fn set_state(&mut self, state: PageState, ppage: u64) {
        self.mapper.set_state(state, ppage);
    }

    /// Re-queues every `Reclaimed` page onto the free list. Call once after
    /// each garbage-collection round.
    pub fn refill_free_list(&mut self) {
        self.mapper.refill_free_list();
    }

    /// Number of immediately allocatable data pages.
    pub fn free_pages(&self) -> usize {
        self.mapper.free_pages()
    }

    /// Checkpoints written since format.
    pub fn write_counter(&self) -> u64 {
        self.checkpoints.write_counter()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    /// Consumes the store, returning the `(meta, data)` medium handles.
    pub fn into_media(self) -> (M, M) {
        (self.meta, self.data)
    }
}

struct Record<'a> {
    vpage: u64,
    key: &'a str,
    value: &'a [u8],
}

fn parse_record(page: &[u8]) -> Result<Record<'_>> {
    ensure!(page.len() >= RECORD_HEADER_LEN, "page shorter than a record header");
    let header = RecordHeader::ref_from_bytes(&page[..RECORD_HEADER_LEN])
        .map_err(|e| eyre::eyre!("failed to parse record header: {e:?}"))?;
    let key_len = header.key_len.get() as usize;
    let val_len = header.val_len.get() as usize;
    ensure!(
        RECORD_HEADER_LEN + key_len + val_len <= page.len(),
        "record header claims {} bytes, page holds {}",
        RECORD_HEADER_LEN + key_len + val_len,
        page.len()
    );
    let key = std::str::from_utf8(&page[RECORD_HEADER_LEN..RECORD_HEADER_LEN + key_len])
        .map_err(|_| eyre::eyre!("record key is not valid UTF-8"))?;
    let value = &page[RECORD_HEADER_LEN + key_len..RECORD_HEADER_LEN + key_len + val_len];
    Ok(Record {
        vpage: header.vpage.get(),
        key,
        value,
    })
}
