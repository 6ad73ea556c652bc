//! Writer-side handle over the status record in shared memory.
//!
//! The remote core is the only writer. Every logical group of field stores
//! is closed by a bus barrier so the host observes groups in order. The
//! handle is owned by the control loop; it keeps a shadow of the fields it
//! is responsible for so no write depends on reading shared memory back.

use crate::memory::{read_bytes, write_bytes, MemoryBus};
use crate::status::{
    DebugMessage, FirmwareVersion, MemtestStatus, StatusRecord, BOOT_COUNT_OFFSET,
    BOOT_TIME_OFFSET, DEBUG_MESSAGE_OFFSET, FIRMWARE_MAGIC, HEARTBEAT_COUNTER_OFFSET,
    HEARTBEAT_INTERVAL_OFFSET, MAGIC_OFFSET, MEMTEST_BYTES_OFFSET, MEMTEST_ERRORS_OFFSET,
    MEMTEST_STATUS_OFFSET, RECORD_SIZE, STATE_OFFSET, UPTIME_TICKS_OFFSET, VERSION_OFFSET,
};
use crate::{validate_range_within, validate_word_alignment, AddressRange, AmpError, LifecycleState};

#[allow(clippy::cast_possible_truncation)]
const RECORD_LEN: u32 = RECORD_SIZE as u32;

/// Header values written once at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Firmware version to publish.
    pub version: FirmwareVersion,
    /// Tick value at initialization.
    pub boot_time: u64,
    /// Heartbeat period in milliseconds, non-zero.
    pub heartbeat_interval_ms: u32,
    /// Initial debug message.
    pub debug_message: DebugMessage,
}

/// Exclusive writer handle over one status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRegion {
    base: u32,
    boot_time: u64,
    boot_count: u32,
    state: LifecycleState,
    heartbeat_counter: u32,
}

impl StatusRegion {
    /// Creates the record at `base` and publishes it in state INIT.
    ///
    /// Any previous record is read first to carry `boot_count` forward. The
    /// write order is: zero-fill, barrier, every non-magic field, barrier,
    /// magic, barrier. Until the last group lands a reader sees "not running".
    ///
    /// # Errors
    ///
    /// Fails before touching memory when `base` is unaligned, the record
    /// does not fit the bus, or the heartbeat interval is zero.
    pub fn initialize<B: MemoryBus + ?Sized>(
        bus: &mut B,
        base: u32,
        header: &RecordHeader,
    ) -> Result<Self, AmpError> {
        validate_word_alignment(base)?;
        validate_range_within(bus.span(), AddressRange::new(base, RECORD_LEN))?;
        if header.heartbeat_interval_ms == 0 {
            return Err(AmpError::ZeroHeartbeatInterval);
        }

        let boot_count = if bus.read_u32(base + MAGIC_OFFSET) == FIRMWARE_MAGIC {
            bus.read_u32(base + BOOT_COUNT_OFFSET).wrapping_add(1)
        } else {
            1
        };

        for offset in (0..RECORD_LEN).step_by(4) {
            bus.write_u32(base + offset, 0);
        }
        bus.barrier();

        bus.write_u32(base + VERSION_OFFSET, header.version.pack());
        bus.write_u32(base + STATE_OFFSET, LifecycleState::Init.as_u32());
        bus.write_u32(base + BOOT_COUNT_OFFSET, boot_count);
        bus.write_u64(base + BOOT_TIME_OFFSET, header.boot_time);
        bus.write_u32(base + HEARTBEAT_INTERVAL_OFFSET, header.heartbeat_interval_ms);
        write_bytes(
            bus,
            base + DEBUG_MESSAGE_OFFSET,
            header.debug_message.as_bytes(),
        );
        bus.barrier();

        bus.write_u32(base + MAGIC_OFFSET, FIRMWARE_MAGIC);
        bus.barrier();

        log::debug!("status record published at {base:#010x}, boot #{boot_count}");
        Ok(Self {
            base,
            boot_time: header.boot_time,
            boot_count,
            state: LifecycleState::Init,
            heartbeat_counter: 0,
        })
    }

    /// Physical address of the record.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Byte range occupied by the record.
    #[must_use]
    pub const fn range(&self) -> AddressRange {
        AddressRange::new(self.base, RECORD_LEN)
    }

    /// Tick value captured at initialization.
    #[must_use]
    pub const fn boot_time(&self) -> u64 {
        self.boot_time
    }

    /// Boot count published at initialization.
    #[must_use]
    pub const fn boot_count(&self) -> u32 {
        self.boot_count
    }

    /// Last state written.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Last heartbeat count written.
    #[must_use]
    pub const fn heartbeat_counter(&self) -> u32 {
        self.heartbeat_counter
    }

    /// Publishes a state transition.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::IllegalTransition`] and writes nothing when the
    /// edge is not part of the lifecycle.
    pub fn set_state<B: MemoryBus + ?Sized>(
        &mut self,
        bus: &mut B,
        to: LifecycleState,
    ) -> Result<(), AmpError> {
        if !self.state.can_transition(to) {
            return Err(AmpError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        bus.write_u32(self.base + STATE_OFFSET, to.as_u32());
        bus.barrier();
        self.state = to;
        Ok(())
    }

    /// Adds `beats` heartbeats and refreshes the uptime; returns the new count.
    pub fn heartbeat<B: MemoryBus + ?Sized>(&mut self, bus: &mut B, now: u64, beats: u32) -> u32 {
        self.heartbeat_counter = self.heartbeat_counter.wrapping_add(beats);
        bus.write_u32(self.base + HEARTBEAT_COUNTER_OFFSET, self.heartbeat_counter);
        self.update_uptime(bus, now);
        self.heartbeat_counter
    }

    /// Writes `now - boot_time` into `uptime_ticks`.
    pub fn update_uptime<B: MemoryBus + ?Sized>(&self, bus: &mut B, now: u64) {
        bus.write_u64(
            self.base + UPTIME_TICKS_OFFSET,
            now.wrapping_sub(self.boot_time),
        );
        bus.barrier();
    }

    /// Replaces the debug message.
    pub fn set_debug<B: MemoryBus + ?Sized>(&self, bus: &mut B, message: &DebugMessage) {
        write_bytes(bus, self.base + DEBUG_MESSAGE_OFFSET, message.as_bytes());
        bus.barrier();
    }

    /// Publishes a self-test outcome.
    pub fn record_memtest<B: MemoryBus + ?Sized>(
        &self,
        bus: &mut B,
        status: MemtestStatus,
        errors: u32,
        bytes: u32,
    ) {
        bus.write_u32(self.base + MEMTEST_STATUS_OFFSET, status.as_u32());
        bus.write_u32(self.base + MEMTEST_ERRORS_OFFSET, errors);
        bus.write_u32(self.base + MEMTEST_BYTES_OFFSET, bytes);
        bus.barrier();
    }

    /// Reads the whole record back through the bus.
    #[must_use]
    pub fn snapshot<B: MemoryBus + ?Sized>(&self, bus: &B) -> StatusRecord {
        let mut bytes = [0; RECORD_SIZE];
        read_bytes(bus, self.base, &mut bytes);
        StatusRecord::decode(&bytes)
    }
}
