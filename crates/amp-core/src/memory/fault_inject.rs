//! Stuck-bit fault injection.
//!
//! [`FaultyBus`] wraps another bus and forces chosen data bits to a fixed
//! level on every read, the way a shorted or open data line would. Writes
//! pass through untouched, so the fault shows up only when the self-test
//! verifies what it wrote.

use alloc::vec::Vec;

use super::MemoryBus;
use crate::AddressRange;

/// Level a faulty bit is stuck at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StuckAt {
    /// Bit always reads as 0.
    Zero,
    /// Bit always reads as 1.
    One,
}

/// One stuck bit in one 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StuckBit {
    /// Word-aligned address of the faulty word.
    pub addr: u32,
    /// Bit index within the little-endian word, `0..32`.
    pub bit: u8,
    /// Level the bit is stuck at.
    pub level: StuckAt,
}

impl StuckBit {
    /// Creates a fault; `addr` is rounded down to its word.
    ///
    /// # Panics
    ///
    /// Panics when `bit` is 32 or more.
    #[must_use]
    pub const fn new(addr: u32, bit: u8, level: StuckAt) -> Self {
        assert!(bit < 32, "stuck bit index must be below 32");
        Self {
            addr: addr & !3,
            bit,
            level,
        }
    }

    const fn apply_word(self, word: u32) -> u32 {
        let mask = 1_u32 << self.bit;
        match self.level {
            StuckAt::Zero => word & !mask,
            StuckAt::One => word | mask,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn apply_byte(self, addr: u32, byte: u8) -> u8 {
        if addr & !3 != self.addr || (addr & 3) as u8 != self.bit / 8 {
            return byte;
        }
        let mask = 1_u8 << (self.bit % 8);
        match self.level {
            StuckAt::Zero => byte & !mask,
            StuckAt::One => byte | mask,
        }
    }
}

/// Bus wrapper that applies [`StuckBit`] faults to reads.
#[derive(Debug, Clone)]
pub struct FaultyBus<B> {
    inner: B,
    faults: Vec<StuckBit>,
}

impl<B: MemoryBus> FaultyBus<B> {
    /// Wraps `inner` with no faults installed.
    #[must_use]
    pub const fn new(inner: B) -> Self {
        Self {
            inner,
            faults: Vec::new(),
        }
    }

    /// Installs a fault, returning `self` for chaining.
    #[must_use]
    pub fn with_fault(mut self, fault: StuckBit) -> Self {
        self.inject(fault);
        self
    }

    /// Installs a fault.
    pub fn inject(&mut self, fault: StuckBit) {
        log::debug!(
            "injecting stuck-at-{} on bit {} of {:#010x}",
            u8::from(fault.level == StuckAt::One),
            fault.bit,
            fault.addr
        );
        self.faults.push(fault);
    }

    /// Removes every installed fault.
    pub fn clear(&mut self) {
        self.faults.clear();
    }

    /// Installed faults.
    #[must_use]
    pub fn faults(&self) -> &[StuckBit] {
        &self.faults
    }

    /// The wrapped bus, holding the values actually written.
    #[must_use]
    pub const fn inner(&self) -> &B {
        &self.inner
    }

    /// Unwraps the inner bus.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: MemoryBus> MemoryBus for FaultyBus<B> {
    fn span(&self) -> AddressRange {
        self.inner.span()
    }

    fn read_u8(&self, addr: u32) -> u8 {
        self.faults
            .iter()
            .fold(self.inner.read_u8(addr), |byte, fault| {
                fault.apply_byte(addr, byte)
            })
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        self.inner.write_u8(addr, value);
    }

    fn read_u32(&self, addr: u32) -> u32 {
        self.faults
            .iter()
            .filter(|fault| fault.addr == addr)
            .fold(self.inner.read_u32(addr), |word, fault| {
                fault.apply_word(word)
            })
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        self.inner.write_u32(addr, value);
    }

    fn barrier(&self) {
        self.inner.barrier();
    }
}
