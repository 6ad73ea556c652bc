//! Monotonic 64-bit tick clock over a split 32-bit counter.
//!
//! The BCM2837 system timer exposes a free-running 1 MHz counter as two
//! 32-bit registers. Reading them separately can tear when the low word
//! wraps between the two loads; [`Clock::now`] re-reads the high word and
//! retries until both high reads agree.

use core::cell::Cell;
use core::fmt;
use core::hint::spin_loop;

use crate::memory::{MemoryBus, VolatileRegion};
use crate::{AddressRange, SYSTIMER_BASE};

/// Counter frequency: one tick per microsecond.
pub const TICKS_PER_SECOND: u64 = 1_000_000;
/// Ticks per millisecond.
pub const TICKS_PER_MILLI: u64 = 1_000;
/// Offset of the counter low word (`CLO`) from the timer base.
pub const SYSTIMER_CLO: u32 = 0x04;
/// Offset of the counter high word (`CHI`) from the timer base.
pub const SYSTIMER_CHI: u32 = 0x08;
/// Span of the system timer register block (`CS`, `CLO`, `CHI`, `C0..C3`).
pub const SYSTIMER_SPAN: u32 = 0x1C;

/// Source of a 64-bit counter exposed as two 32-bit halves.
pub trait CounterSource {
    /// Reads the upper 32 bits.
    fn read_high(&self) -> u32;
    /// Reads the lower 32 bits.
    fn read_low(&self) -> u32;
}

impl<C: CounterSource + ?Sized> CounterSource for &C {
    fn read_high(&self) -> u32 {
        (**self).read_high()
    }

    fn read_low(&self) -> u32 {
        (**self).read_low()
    }
}

/// Tear-safe clock over a [`CounterSource`].
#[derive(Debug, Clone)]
pub struct Clock<C> {
    counter: C,
}

impl<C: CounterSource> Clock<C> {
    /// Wraps a counter source.
    #[must_use]
    pub const fn new(counter: C) -> Self {
        Self { counter }
    }

    /// Current tick count.
    ///
    /// Retries while the high word changes across the low-word read, so a
    /// carry out of the low word never yields a value that was never held.
    #[must_use]
    pub fn now(&self) -> u64 {
        loop {
            let high = self.counter.read_high();
            let low = self.counter.read_low();
            if self.counter.read_high() == high {
                return (u64::from(high) << 32) | u64::from(low);
            }
        }
    }

    /// Whole seconds since the counter started.
    #[must_use]
    pub fn seconds(&self) -> u64 {
        self.now() / TICKS_PER_SECOND
    }

    /// Whole milliseconds since the counter started.
    #[must_use]
    pub fn millis(&self) -> u64 {
        self.now() / TICKS_PER_MILLI
    }

    /// Spins until `ticks` ticks have elapsed.
    pub fn delay_ticks(&self, ticks: u64) {
        let start = self.now();
        while self.now().wrapping_sub(start) < ticks {
            spin_loop();
        }
    }

    /// Spins for `us` microseconds.
    pub fn delay_us(&self, us: u64) {
        self.delay_ticks(us);
    }

    /// Spins for `ms` milliseconds.
    pub fn delay_ms(&self, ms: u64) {
        self.delay_ticks(ms.saturating_mul(TICKS_PER_MILLI));
    }

    /// Spins for `sec` seconds.
    pub fn delay_sec(&self, sec: u64) {
        self.delay_ticks(sec.saturating_mul(TICKS_PER_SECOND));
    }

    /// Current time as a printable timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        Timestamp(self.now())
    }

    /// Underlying counter source.
    #[must_use]
    pub const fn counter(&self) -> &C {
        &self.counter
    }
}

/// BCM2837 free-running system timer.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimer {
    regs: VolatileRegion,
}

impl SystemTimer {
    /// Timer at its fixed physical address.
    ///
    /// # Safety
    ///
    /// Must run on the SoC with the peripheral window identity mapped as
    /// device memory.
    #[allow(unsafe_code)]
    #[must_use]
    pub const unsafe fn bcm2837() -> Self {
        // SAFETY: forwarded to the caller
        Self::new(unsafe { VolatileRegion::new(AddressRange::new(SYSTIMER_BASE, SYSTIMER_SPAN)) })
    }

    /// Timer whose register block is reachable through `regs`.
    #[must_use]
    pub const fn new(regs: VolatileRegion) -> Self {
        Self { regs }
    }
}

impl CounterSource for SystemTimer {
    fn read_high(&self) -> u32 {
        self.regs.read_u32(self.regs.range().base + SYSTIMER_CHI)
    }

    fn read_low(&self) -> u32 {
        self.regs.read_u32(self.regs.range().base + SYSTIMER_CLO)
    }
}

/// Deterministic counter that advances by a fixed step on every low-word read.
///
/// Each [`Clock::now`] call therefore advances simulated time by exactly one
/// step (plus one more when a retry is needed across a carry).
#[derive(Debug, Clone, Default)]
pub struct SteppingCounter {
    value: Cell<u64>,
    step: u64,
}

impl SteppingCounter {
    /// Counter starting at `start`, advancing `step` ticks per read.
    #[must_use]
    pub const fn new(start: u64, step: u64) -> Self {
        Self {
            value: Cell::new(start),
            step,
        }
    }

    /// Moves the counter forward by `ticks`.
    pub fn advance(&self, ticks: u64) {
        self.value.set(self.value.get().wrapping_add(ticks));
    }

    /// Current counter value without advancing it.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.get()
    }
}

impl CounterSource for SteppingCounter {
    #[allow(clippy::cast_possible_truncation)]
    fn read_high(&self) -> u32 {
        (self.value.get() >> 32) as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_low(&self) -> u32 {
        let value = self.value.get();
        self.value.set(value.wrapping_add(self.step));
        value as u32
    }
}

/// Tick count rendered as `HH:MM:SS.mmm`; the hour wraps at 24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = self.0 / TICKS_PER_MILLI;
        let total_sec = total_ms / 1000;
        write!(
            f,
            "{:02}:{:02}:{:02}.{:03}",
            (total_sec / 3600) % 24,
            (total_sec / 60) % 60,
            total_sec % 60,
            total_ms % 1000
        )
    }
}

/// Seconds rendered compactly as `Nd Nh Nm Ns`.
///
/// Leading zero units are omitted; seconds are always shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uptime(pub u64);

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.0;
        let days = seconds / 86_400;
        let hours = (seconds / 3600) % 24;
        let minutes = (seconds / 60) % 60;

        if days > 0 {
            write!(f, "{days}d ")?;
        }
        if days > 0 || hours > 0 {
            write!(f, "{hours}h ")?;
        }
        if days > 0 || hours > 0 || minutes > 0 {
            write!(f, "{minutes}m ")?;
        }
        write!(f, "{}s", seconds % 60)
    }
}
