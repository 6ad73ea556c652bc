//! Shared-memory status protocol for the RPi3 AMP remote core.
//!
//! Core 3 runs freestanding firmware next to a host OS on cores 0-2. The two
//! sides share one fixed physical window. The remote core is its only
//! writer: it publishes a fixed-layout [`StatusRecord`], advances a
//! heartbeat, and runs memory self-tests. The host reads the record without
//! locks and trusts it only when the magic matches.
//!
//! The crate is `no_std` with `alloc`, so the same code links into the
//! freestanding firmware and into host tools.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Fixed physical memory map and byte-addressed memory buses.
pub mod memory;
pub use memory::{
    read_bytes, validate_range_within, validate_word_alignment, write_bytes, AddressRange,
    FaultyBus, MemoryBus, MemoryRegion, RamBus, RegionDescriptor, StuckAt, StuckBit, VolatileRegion,
    AMP_CODE_BASE, AMP_CODE_SIZE, ARM_LOCAL_BASE, ARM_LOCAL_SIZE, LINUX_RAM_BASE, LINUX_RAM_SIZE,
    PERIPHERAL_BASE, PERIPHERAL_SIZE, PHYSICAL_MEMORY_MAP, SHARED_DATA_ADDR, SHARED_DATA_SIZE,
    SHARED_MEMTEST_ADDR, SHARED_MEMTEST_SIZE, SHARED_MEM_BASE, SHARED_MEM_SIZE, SHARED_STATUS_ADDR,
    SHARED_STATUS_SIZE, SHARED_WINDOW, SYSTIMER_BASE, WORD_BYTES,
};

/// Ordering barriers between field-write groups.
pub mod barrier;

/// Error taxonomy.
pub mod fault;
pub use fault::{AmpError, FaultClass};

/// Remote-core lifecycle state machine.
pub mod state;
pub use state::LifecycleState;

/// Tear-safe tick clock and counter sources.
pub mod clock;
pub use clock::{
    Clock, CounterSource, SteppingCounter, SystemTimer, Timestamp, Uptime,
    TICKS_PER_MILLI, TICKS_PER_SECOND,
};

/// Status record layout and codec.
pub mod status;
pub use status::{
    DebugMessage, FirmwareVersion, MemtestStatus, StatusRecord, DEBUG_MESSAGE_CAPACITY,
    FIRMWARE_MAGIC, FIRMWARE_VERSION, RECORD_SIZE,
};

/// Writer handle over the record in shared memory.
pub mod region;
pub use region::{RecordHeader, StatusRegion};

/// Memory self-test battery.
pub mod memtest;
pub use memtest::{MemtestMode, MemtestReport, Subtest, SubtestReport, WalkingOnesReport};

/// Configuration and diagnostic sinks.
pub mod api;
pub use api::{
    ControlConfig, DiagEvent, DiagSink, LogSink, NullSink, RecordingSink, SharedLayout,
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_IDLE_SPINS,
};

/// Remote-core control loop.
pub mod control;
pub use control::ControlLoop;

/// Host-side reader.
pub mod reader;
pub use reader::{observe, read_status, Observation};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
