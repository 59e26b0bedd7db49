//! The 6502 CPU core contract this crate drives but does not implement.
//!
//! Out of scope (§1): stepping, registers, and reset are an external black
//! box. The original firmware wired this up through free functions
//! (`reset6502`/`step6502`/`get6502_pc`) backed by a single global "active"
//! pointer; the re-architecture called out in §9 is to parameterize the
//! core over a bus trait instead, so each [`crate::Nsf`] instance can carry
//! its own. [`Bus`] implements [`BusRead`]/[`BusWrite`] and a conforming
//! core is expected to call back into those on every memory access.

/// Single-byte bus read, issued by the CPU core on every memory access.
pub trait BusRead {
    fn read(&mut self, addr: u16) -> u8;
}

/// Single-byte bus write, issued by the CPU core on every memory access.
pub trait BusWrite {
    fn write(&mut self, addr: u16, val: u8);
}

/// The CPU core contract consumed by the playback driver (§6).
pub trait Cpu<B: BusRead + BusWrite> {
    /// Resets the core, loading `pc` from the reset vector at $FFFC/$FFFD.
    fn reset(&mut self, bus: &mut B);

    /// Executes exactly one instruction, issuing `bus` reads/writes as needed.
    fn step(&mut self, bus: &mut B);

    /// The current program counter.
    fn pc(&self) -> u16;
}
