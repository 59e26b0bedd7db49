//! Top-level NSF playback instance and the single-active-instance guard.
//!
//! The original firmware keeps exactly one NSF loaded at a time behind a
//! global `active_nsf_file` pointer, because `read6502`/`write6502` have no
//! user-data parameter to thread a handle through. This crate's bus is a
//! trait object instead (§9), so nothing *requires* a single instance
//! anymore — but the public API still models the original's resource model
//! (§5: "at most one instance open at a time") rather than silently allowing
//! concurrent playback the original hardware never supported. The guard is
//! a process-wide atomic flag set on `open` and cleared on `close`/`Drop`.

use crate::bus::{ApuCallback, Bus};
use crate::cpu::Cpu;
use crate::error::{Error, Result};
use crate::header::NsfHeader;
use crate::memory::{MemoryImage, RomSource};
use crate::trampoline::{self, FRAME_SYNC_PC};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

static INSTANCE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// An open NSF file paired with a running CPU core and bus.
pub struct Nsf<'a, R: RomSource, C: Cpu<Bus<'a, R>>> {
    bus: Bus<'a, R>,
    cpu: C,
}

impl<'a, R: RomSource, C: Cpu<Bus<'a, R>>> Nsf<'a, R, C> {
    /// Reads the header without acquiring the single-instance guard or
    /// allocating the ROM backing — used to inspect a file before deciding
    /// whether to open it.
    pub fn read_header(src: &mut R) -> Result<NsfHeader> {
        NsfHeader::load(src)
    }

    /// Opens `src`, parses its header, and acquires the process-wide
    /// single-active-instance guard. The memory image and ROM aren't
    /// populated until [`Self::playback_init`] (§3: "memory image is
    /// initialized on each call to `playback_init`").
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if another instance is already open.
    #[instrument(skip(src, cpu))]
    pub fn open(mut src: R, cpu: C) -> Result<Self> {
        if INSTANCE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidState(
                "an nsf instance is already open".to_string(),
            ));
        }

        let result = (|| {
            let header = NsfHeader::load(&mut src)?;
            let bankswitched = header.is_bankswitched();
            let bus = Bus::new(header, src, MemoryImage::new(bankswitched));
            Ok(Self { bus, cpu })
        })();

        if result.is_err() {
            INSTANCE_ACTIVE.store(false, Ordering::Release);
        }
        result
    }

    pub fn header(&self) -> &NsfHeader {
        self.bus.header()
    }

    /// Installs the bootstrap trampoline for `song` (0-based, per §6's
    /// `playback_init(instance, song_index_zero_based, apu_cb)`),
    /// re-initializes the memory image and ROM from scratch, and resets the
    /// CPU into the trampoline, stepping it through `LDA`/`LDX`/INIT until
    /// it reaches the frame-sync point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `song` is out of range, or
    /// propagates an I/O error from the ROM (re)load.
    #[instrument(skip(self, apu_cb))]
    pub fn playback_init(&mut self, song: u8, apu_cb: Option<ApuCallback<'a>>) -> Result<()> {
        let total_songs = self.bus.header().total_songs;
        if song >= total_songs {
            return Err(Error::InvalidArgument(format!(
                "song {song} out of range (0..{total_songs})"
            )));
        }

        if let Some(cb) = apu_cb {
            self.bus.set_apu_callback(cb);
        }

        self.bus.reinit_memory()?;

        let header = self.bus.header();
        let pal_ntsc = u8::from(header.is_pal());
        let init_address = header.init_address;
        let play_address = header.play_address;
        trampoline::install(&mut self.bus, song, pal_ntsc, init_address, play_address);
        trampoline::playback_init(&mut self.cpu, &mut self.bus);
        Ok(())
    }

    /// Runs one PLAY invocation, returning once the CPU reaches the
    /// frame-sync point again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the CPU isn't parked at the
    /// frame-sync point (§4.5's precondition).
    #[instrument(skip(self))]
    pub fn playback_frame(&mut self) -> Result<()> {
        trampoline::playback_frame(&mut self.cpu, &mut self.bus)
    }

    /// True once the CPU is parked at the frame-sync point, ready for the
    /// next [`Self::playback_frame`].
    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.cpu.pc() == FRAME_SYNC_PC
    }

    /// Closes the instance, releasing the single-active-instance guard.
    /// Equivalent to dropping the instance; exposed under the spec's name.
    pub fn close(self) {}
}

impl<'a, R: RomSource, C: Cpu<Bus<'a, R>>> Drop for Nsf<'a, R, C> {
    fn drop(&mut self) {
        INSTANCE_ACTIVE.store(false, Ordering::Release);
    }
}
