//! Wall-clock counter source for real-time simulation.

use std::time::Instant;

use amp_core::CounterSource;

/// Microseconds since creation, offset by a chosen start tick.
#[derive(Debug, Clone, Copy)]
pub struct HostCounter {
    origin: Instant,
    offset: u64,
}

impl HostCounter {
    /// Counter reading `offset` ticks now.
    #[must_use]
    pub fn starting_at(offset: u64) -> Self {
        Self {
            origin: Instant::now(),
            offset,
        }
    }

    fn ticks(&self) -> u64 {
        let elapsed = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.offset.wrapping_add(elapsed)
    }
}

impl Default for HostCounter {
    fn default() -> Self {
        Self::starting_at(0)
    }
}

impl CounterSource for HostCounter {
    #[allow(clippy::cast_possible_truncation)]
    fn read_high(&self) -> u32 {
        (self.ticks() >> 32) as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_low(&self) -> u32 {
        self.ticks() as u32
    }
}
