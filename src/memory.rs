//! NSF memory image: RAM, bootstrap, APU shadow, bank registers, and the
//! ROM backing (either a flat contiguous buffer or a bank-switched LRU
//! cache streamed from the file).

use crate::error::{Error, Result};
use crate::header::NsfHeader;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, error, warn};

pub const RAM_SIZE: usize = 0x0800;
pub const BOOTSTRAP_SIZE: usize = 0x80;
pub const APU_SHADOW_SIZE: usize = 24;
pub const BANK_REG_COUNT: usize = 8;
pub const INT_VEC_SIZE: usize = 6;
pub const WINDOW_COUNT: usize = 8;
pub const BANK_SIZE: usize = 4096;
pub const SLOT_COUNT: usize = 10;
const CONTIGUOUS_SIZE: usize = 0x8000;
const FILE_BODY_OFFSET: u64 = 0x080;

/// A seekable byte source backing the NSF file body.
pub trait RomSource: Read + Seek {}
impl<T: Read + Seek> RomSource for T {}

/// Ten-slot LRU cache of 4 KiB banks streamed from the NSF file.
#[derive(Clone)]
pub struct BankCache {
    storage: Box<[[u8; BANK_SIZE]; SLOT_COUNT]>,
    slot_bank_id: [Option<u8>; SLOT_COUNT],
    use_order: [Option<u8>; SLOT_COUNT],
    windows: [Option<usize>; WINDOW_COUNT],
}

impl BankCache {
    fn new() -> Self {
        Self {
            storage: Box::new([[0u8; BANK_SIZE]; SLOT_COUNT]),
            slot_bank_id: [None; SLOT_COUNT],
            use_order: [None; SLOT_COUNT],
            windows: [None; WINDOW_COUNT],
        }
    }

    /// Loads `bank_id` into `window_index`, reading from `src` when the bank
    /// isn't already cached, evicting the LRU slot if the cache is full.
    pub fn load(
        &mut self,
        window_index: usize,
        bank_id: u8,
        header: &NsfHeader,
        src: &mut impl RomSource,
    ) -> Result<()> {
        if window_index >= WINDOW_COUNT {
            return Err(Error::InvalidArgument(format!(
                "window index {window_index} out of range"
            )));
        }

        if let Some(slot) = self.find_slot(bank_id) {
            self.windows[window_index] = Some(slot);
            self.mark_used(bank_id)?;
            return Ok(());
        }

        let slot = match self.find_empty_slot() {
            Some(slot) => slot,
            None => self.evict_lru()?,
        };

        self.storage[slot] = [0u8; BANK_SIZE];
        self.fill_bank(slot, bank_id, header, src)?;

        self.slot_bank_id[slot] = Some(bank_id);
        self.windows[window_index] = Some(slot);
        self.mark_used(bank_id)?;
        Ok(())
    }

    /// Reads one byte from `window_index` at `offset` (0..4096), marking the
    /// backing bank most-recently-used. Returns `None` if the window has no
    /// slot loaded.
    pub fn read(&mut self, window_index: usize, offset: usize) -> Option<u8> {
        let slot = self.windows[window_index]?;
        let bank_id = self.slot_bank_id[slot]?;
        let val = self.storage[slot][offset];
        if let Err(err) = self.mark_used(bank_id) {
            error!(%err, "mark_used failed during rom window read");
        }
        Some(val)
    }

    /// Clears a window's slot pointer without touching cache occupancy.
    /// Used when a bank load fails mid-write: the register shadow already
    /// changed, so the window must stop showing stale data (§7).
    pub fn clear_window(&mut self, window_index: usize) {
        self.windows[window_index] = None;
    }

    fn find_slot(&self, bank_id: u8) -> Option<usize> {
        self.slot_bank_id
            .iter()
            .position(|&id| id == Some(bank_id))
    }

    fn find_empty_slot(&self) -> Option<usize> {
        self.slot_bank_id.iter().position(Option::is_none)
    }

    fn last_occupied(&self) -> Option<usize> {
        self.use_order.iter().rposition(Option::is_some)
    }

    fn evict_lru(&mut self) -> Result<usize> {
        let last = self.last_occupied().ok_or_else(|| {
            Error::CacheInvariantViolation("cache full but use_order is empty".to_string())
        })?;
        let oldest = self.use_order[last].ok_or_else(|| {
            Error::CacheInvariantViolation("eviction candidate slot was empty".to_string())
        })?;

        let slot = self.find_slot(oldest).ok_or_else(|| {
            Error::CacheInvariantViolation(format!("lru bank {oldest} has no backing slot"))
        })?;

        debug!(bank = oldest, slot, "evicting bank from cache");
        self.slot_bank_id[slot] = None;

        for i in last..SLOT_COUNT - 1 {
            self.use_order[i] = self.use_order[i + 1];
        }
        self.use_order[SLOT_COUNT - 1] = None;

        for window in &mut self.windows {
            if *window == Some(slot) {
                *window = None;
            }
        }

        Ok(slot)
    }

    /// Moves `bank_id` to the front of `use_order`. See §9's Open Question:
    /// the shift-and-insert path is the normal way a freshly evicted-then-
    /// loaded bank enters the list; the bail-out guards against a caller
    /// that inserted without evicting first.
    fn mark_used(&mut self, bank_id: u8) -> Result<()> {
        if self.use_order[0] == Some(bank_id) {
            return Ok(());
        }

        if let Some(pos) = self.use_order.iter().position(|&id| id == Some(bank_id)) {
            for i in (1..=pos).rev() {
                self.use_order[i] = self.use_order[i - 1];
            }
            self.use_order[0] = Some(bank_id);
            return Ok(());
        }

        warn!(bank = bank_id, "used rom bank not in lru collection");
        if self.use_order[SLOT_COUNT - 1].is_some() {
            error!("lru collection tail was not empty");
            return Err(Error::CacheInvariantViolation(
                "lru tail was not empty while inserting unlisted bank".to_string(),
            ));
        }

        for i in (1..SLOT_COUNT).rev() {
            self.use_order[i] = self.use_order[i - 1];
        }
        self.use_order[0] = Some(bank_id);
        Ok(())
    }

    fn fill_bank(
        &mut self,
        slot: usize,
        bank_id: u8,
        header: &NsfHeader,
        src: &mut impl RomSource,
    ) -> Result<()> {
        let padding = (header.load_address & 0x0FFF) as usize;
        let start = std::time::Instant::now();

        let (seek_to, dest_offset, want) = if bank_id == 0 {
            (FILE_BODY_OFFSET, padding, BANK_SIZE - padding)
        } else {
            (
                FILE_BODY_OFFSET + (BANK_SIZE - padding) as u64 + BANK_SIZE as u64 * (bank_id - 1) as u64,
                0,
                BANK_SIZE,
            )
        };

        src.seek(SeekFrom::Start(seek_to))
            .map_err(|e| Error::io(e, "seeking to bank offset"))?;
        let got = read_tolerant(src, &mut self.storage[slot][dest_offset..dest_offset + want])?;
        if got < want {
            warn!(bank = bank_id, got, want, "short read at eof loading bank");
        }

        debug!(
            bank = bank_id,
            slot,
            elapsed_us = start.elapsed().as_micros(),
            "bank loaded"
        );
        Ok(())
    }
}

/// Reads until `buf` is full or the source reports EOF (`Ok(0)`).
/// Returns the number of bytes actually read; a non-EOF I/O error propagates.
fn read_tolerant(src: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(e, "reading nsf rom data")),
        }
    }
    Ok(filled)
}

/// The ROM backing for $8000-$FFFF: either a flat 32 KiB contiguous buffer
/// or a bank-switched cache streamed on demand.
#[derive(Clone)]
pub enum RomBacking {
    Contiguous(Box<[u8; CONTIGUOUS_SIZE]>),
    Bankswitched(BankCache),
}

impl RomBacking {
    /// Loads a non-bankswitched ROM body entirely into a flat 32 KiB buffer.
    pub fn load_contiguous(header: &NsfHeader, src: &mut impl RomSource) -> Result<Self> {
        if header.load_address < 0x8000 {
            return Err(Error::InvalidArgument(format!(
                "load address ${:04X} is below $8000",
                header.load_address
            )));
        }

        let mut data = Box::new([0u8; CONTIGUOUS_SIZE]);
        let offset = (header.load_address - 0x8000) as usize;
        let want = (0xFFFF - header.load_address) as usize;

        src.seek(SeekFrom::Start(FILE_BODY_OFFSET))
            .map_err(|e| Error::io(e, "seeking to rom body"))?;
        let got = read_tolerant(src, &mut data[offset..offset + want])?;
        if got < want {
            warn!(got, want, "short read at eof loading contiguous rom");
        }

        Ok(Self::Contiguous(data))
    }

    pub fn new_bankswitched() -> Self {
        Self::Bankswitched(BankCache::new())
    }

    /// Reads a byte from CPU address `addr` within $8000..=$FFF9.
    pub fn read(&mut self, addr: u16) -> u8 {
        let window = ((addr >> 12) & 0x7) as usize;
        let offset = (addr & 0x0FFF) as usize;
        match self {
            Self::Contiguous(data) => data[window * BANK_SIZE + offset],
            Self::Bankswitched(cache) => match cache.read(window, offset) {
                Some(val) => val,
                None => {
                    error!(addr = format!("${addr:04X}"), window, "read from unloaded rom window");
                    0
                }
            },
        }
    }

    /// Loads `bank_id` into `window_index`. No-op for contiguous images
    /// (invariant 5: the cache is inert).
    pub fn load_bank(
        &mut self,
        window_index: usize,
        bank_id: u8,
        header: &NsfHeader,
        src: &mut impl RomSource,
    ) -> Result<()> {
        match self {
            Self::Contiguous(_) => Ok(()),
            Self::Bankswitched(cache) => cache.load(window_index, bank_id, header, src),
        }
    }

    /// Clears a window's slot pointer. No-op for contiguous images.
    pub fn clear_window(&mut self, window_index: usize) {
        if let Self::Bankswitched(cache) = self {
            cache.clear_window(window_index);
        }
    }
}

/// Backing storage for RAM, bootstrap, APU shadow, bank registers,
/// interrupt vectors, and the ROM image.
pub struct MemoryImage {
    pub ram: [u8; RAM_SIZE],
    pub bootstrap: [u8; BOOTSTRAP_SIZE],
    pub apu_shadow: [u8; APU_SHADOW_SIZE],
    pub bank_regs: [u8; BANK_REG_COUNT],
    pub int_vecs: [u8; INT_VEC_SIZE],
    pub rom: RomBacking,
}

impl MemoryImage {
    pub fn new(bankswitched: bool) -> Self {
        Self {
            ram: [0; RAM_SIZE],
            bootstrap: [0; BOOTSTRAP_SIZE],
            apu_shadow: [0; APU_SHADOW_SIZE],
            bank_regs: [0; BANK_REG_COUNT],
            int_vecs: [0; INT_VEC_SIZE],
            rom: if bankswitched {
                RomBacking::new_bankswitched()
            } else {
                RomBacking::Contiguous(Box::new([0u8; CONTIGUOUS_SIZE]))
            },
        }
    }
}
