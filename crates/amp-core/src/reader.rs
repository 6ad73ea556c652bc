//! Host-side, read-only view of the status record.
//!
//! The host never writes the window and never takes a lock. It copies the
//! whole record on every refresh and checks `magic` before trusting any
//! other field; a torn copy is simply superseded by the next one.

use crate::barrier::read_barrier;
use crate::memory::{read_bytes, MemoryBus};
use crate::status::{StatusRecord, FIRMWARE_MAGIC, MAGIC_OFFSET, RECORD_SIZE};
use crate::AmpError;

/// Result of one look at the status region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Magic mismatch: the remote core never initialized the record.
    NotRunning {
        /// Value found in the magic field.
        magic: u32,
    },
    /// Record with a valid magic.
    Live(StatusRecord),
}

impl Observation {
    /// The record when live.
    #[must_use]
    pub const fn record(&self) -> Option<&StatusRecord> {
        match self {
            Self::Live(record) => Some(record),
            Self::NotRunning { .. } => None,
        }
    }

    /// Returns `true` when the magic matched.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Converts into a `Result`, mapping a magic mismatch to
    /// [`AmpError::InvalidMagic`].
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::InvalidMagic`] for [`Observation::NotRunning`].
    pub const fn into_result(self) -> Result<StatusRecord, AmpError> {
        match self {
            Self::Live(record) => Ok(record),
            Self::NotRunning { magic } => Err(AmpError::InvalidMagic { found: magic }),
        }
    }
}

/// Classifies a copied record image. The magic is checked before anything
/// else is decoded.
#[must_use]
pub fn observe(bytes: &[u8; RECORD_SIZE]) -> Observation {
    let offset = MAGIC_OFFSET as usize;
    let magic = u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]);
    if magic == FIRMWARE_MAGIC {
        Observation::Live(StatusRecord::decode(bytes))
    } else {
        Observation::NotRunning { magic }
    }
}

/// Copies the record at `base` out of the bus and classifies it.
#[must_use]
pub fn read_status<B: MemoryBus + ?Sized>(bus: &B, base: u32) -> Observation {
    read_barrier();
    let mut bytes = [0; RECORD_SIZE];
    read_bytes(bus, base, &mut bytes);
    observe(&bytes)
}

#[cfg(test)]
mod tests {
    use super::{observe, read_status, Observation};
    use crate::status::{StatusRecord, FIRMWARE_MAGIC, RECORD_SIZE};
    use crate::{AddressRange, AmpError, MemoryBus, RamBus};

    #[test]
    fn zeroed_memory_is_not_running() {
        assert_eq!(
            observe(&[0; RECORD_SIZE]),
            Observation::NotRunning { magic: 0 }
        );
    }

    #[test]
    fn garbage_with_running_state_is_still_not_running() {
        let record = StatusRecord {
            magic: 0x5250_3342,
            state: 2,
            heartbeat_counter: 99,
            ..StatusRecord::default()
        };
        let observation = observe(&record.encode());
        assert!(!observation.is_live());
        assert_eq!(observation.record(), None);
        assert_eq!(
            observation.into_result(),
            Err(AmpError::InvalidMagic { found: 0x5250_3342 })
        );
    }

    #[test]
    fn valid_record_is_read_through_the_bus() {
        let record = StatusRecord {
            magic: FIRMWARE_MAGIC,
            boot_count: 3,
            ..StatusRecord::default()
        };
        let mut bus = RamBus::new(AddressRange::new(0x100, 0x200));
        for (addr, byte) in (0x140..).zip(record.encode()) {
            bus.write_u8(addr, byte);
        }
        let observation = read_status(&bus, 0x140);
        assert_eq!(observation, Observation::Live(record));
        assert_eq!(observation.into_result().map(|record| record.boot_count), Ok(3));
    }
}
