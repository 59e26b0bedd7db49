//! NSF (NES Sound Format) memory subsystem: the CPU address-space bus, a
//! bank-switched ROM cache with LRU eviction, and a synthesized bootstrap
//! trampoline that drives a 6502 core through INIT/PLAY cycles.
//!
//! This crate does not implement a 6502 core, APU, or audio backend — see
//! [`cpu::Cpu`] and [`bus::ApuCallback`] for the seams an embedder fills in.

pub mod bus;
pub mod cpu;
pub mod error;
pub mod header;
pub mod instance;
pub mod memory;
pub mod trampoline;

pub use bus::{ApuCallback, Bus};
pub use cpu::{BusRead, BusWrite, Cpu};
pub use error::{Error, Result};
pub use header::{ExtraSoundChips, NsfHeader};
pub use instance::Nsf;
pub use memory::{BankCache, MemoryImage, RomBacking, RomSource};
