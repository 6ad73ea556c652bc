//! Configuration and diagnostic surfaces for embedding the control loop.

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::memtest::{MemtestMode, Subtest};
use crate::status::RECORD_SIZE;
use crate::{
    validate_word_alignment, AddressRange, AmpError, LifecycleState, SHARED_DATA_ADDR,
    SHARED_DATA_SIZE, SHARED_MEMTEST_ADDR, SHARED_MEMTEST_SIZE, SHARED_STATUS_ADDR,
    SHARED_STATUS_SIZE,
};

/// Default heartbeat period in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u32 = 5_000;
/// Default busy-wait iterations between heartbeat checks.
pub const DEFAULT_IDLE_SPINS: u32 = 10_000;
/// Debug message published at initialization.
pub const INIT_MESSAGE: &str = "Core 3 initialized";
/// Debug message published on entering RUNNING.
pub const RUNNING_MESSAGE: &str = "Core 3 running OK";

/// Boot policy for the remote-core control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControlConfig {
    /// Heartbeat period in milliseconds; must be non-zero.
    pub heartbeat_interval_ms: u32,
    /// Self-test to run right after reaching RUNNING, if any.
    pub boot_memtest: Option<MemtestMode>,
    /// Emits per-sub-test diagnostics during self-tests.
    pub verbose_memtest: bool,
    /// Busy-wait iterations between heartbeat checks.
    pub idle_spins: u32,
    /// Debug message published at initialization.
    pub init_message: String,
    /// Debug message published on entering RUNNING.
    pub running_message: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            boot_memtest: None,
            verbose_memtest: false,
            idle_spins: DEFAULT_IDLE_SPINS,
            init_message: INIT_MESSAGE.to_owned(),
            running_message: RUNNING_MESSAGE.to_owned(),
        }
    }
}

impl ControlConfig {
    /// Heartbeat period in clock ticks.
    #[must_use]
    pub const fn heartbeat_interval_ticks(&self) -> u64 {
        self.heartbeat_interval_ms as u64 * crate::clock::TICKS_PER_MILLI
    }

    /// Checks values that would make the loop ill-defined.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::ZeroHeartbeatInterval`] for a zero interval.
    pub const fn validate(&self) -> Result<(), AmpError> {
        if self.heartbeat_interval_ms == 0 {
            Err(AmpError::ZeroHeartbeatInterval)
        } else {
            Ok(())
        }
    }
}

/// Placement of the three shared sub-regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SharedLayout {
    /// Status record sub-region.
    pub status: AddressRange,
    /// Data sub-region, reserved for a future message queue.
    pub data: AddressRange,
    /// Self-test scratch sub-region.
    pub memtest: AddressRange,
}

impl Default for SharedLayout {
    fn default() -> Self {
        Self {
            status: AddressRange::new(SHARED_STATUS_ADDR, SHARED_STATUS_SIZE),
            data: AddressRange::new(SHARED_DATA_ADDR, SHARED_DATA_SIZE),
            memtest: AddressRange::new(SHARED_MEMTEST_ADDR, SHARED_MEMTEST_SIZE),
        }
    }
}

impl SharedLayout {
    /// Smallest range covering all three sub-regions.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn window(&self) -> AddressRange {
        let ranges = [self.status, self.data, self.memtest];
        let base = ranges.iter().map(|range| range.base).min().unwrap_or(0);
        let end = ranges.iter().map(|range| range.end()).max().unwrap_or(0);
        AddressRange::new(base, (end - u64::from(base)) as u32)
    }

    /// Checks alignment, disjointness and that the status record fits.
    ///
    /// # Errors
    ///
    /// Returns the first geometry violation found.
    #[allow(clippy::cast_possible_truncation)]
    pub fn validate(&self) -> Result<(), AmpError> {
        let ranges = [self.status, self.data, self.memtest];
        for range in ranges {
            validate_word_alignment(range.base)?;
            validate_word_alignment(range.len)?;
        }
        for (index, first) in ranges.iter().enumerate() {
            for second in &ranges[index + 1..] {
                if first.overlaps(*second) {
                    return Err(AmpError::OverlappingRanges {
                        first: *first,
                        second: *second,
                    });
                }
            }
        }
        if (self.status.len as usize) < RECORD_SIZE {
            return Err(AmpError::RegionTooSmall {
                needed: RECORD_SIZE as u32,
                available: self.status.len,
            });
        }
        Ok(())
    }
}

/// Diagnostic events emitted at lifecycle boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagEvent {
    /// Status record published.
    RecordInitialized {
        /// Record address.
        base: u32,
        /// Boot count written.
        boot_count: u32,
        /// Boot tick written.
        boot_time: u64,
    },
    /// Lifecycle state written.
    StateChanged {
        /// Previous state.
        from: LifecycleState,
        /// New state.
        to: LifecycleState,
    },
    /// Heartbeat counter advanced.
    Heartbeat {
        /// Counter after the update.
        count: u32,
        /// Uptime written with it.
        uptime_ticks: u64,
    },
    /// A heartbeat check ran after more than one interval had elapsed.
    HeartbeatLate {
        /// Whole intervals that passed without a check.
        missed: u32,
        /// Ticks since the last deadline that should have been met.
        late_ticks: u64,
    },
    /// Self-test began.
    MemtestStarted {
        /// Battery.
        mode: MemtestMode,
        /// Region under test.
        region: AddressRange,
    },
    /// One sub-test completed.
    SubtestFinished {
        /// Which sub-test.
        subtest: Subtest,
        /// Mismatching words.
        errors: u32,
    },
    /// One sub-test was skipped for size.
    SubtestSkipped {
        /// Which sub-test.
        subtest: Subtest,
    },
    /// Self-test completed.
    MemtestFinished {
        /// Aggregate error count.
        errors: u32,
        /// Bytes covered.
        bytes: u32,
    },
    /// An operation failed; the state machine may have moved to ERROR.
    Faulted {
        /// Failure cause.
        error: AmpError,
    },
}

impl fmt::Display for DiagEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordInitialized {
                base,
                boot_count,
                boot_time,
            } => write!(
                f,
                "status record at {base:#010x} (boot #{boot_count}, boot tick {boot_time})"
            ),
            Self::StateChanged { from, to } => write!(f, "state {from} -> {to}"),
            Self::Heartbeat {
                count,
                uptime_ticks,
            } => write!(f, "heartbeat #{count} (uptime {uptime_ticks} ticks)"),
            Self::HeartbeatLate { missed, late_ticks } => write!(
                f,
                "heartbeat check late by {late_ticks} ticks ({missed} intervals missed)"
            ),
            Self::MemtestStarted { mode, region } => {
                write!(f, "{mode} memtest over {region} ({} bytes)", region.len)
            }
            Self::SubtestFinished { subtest, errors: 0 } => write!(f, "{subtest}: PASS"),
            Self::SubtestFinished { subtest, errors } => write!(f, "{subtest}: FAIL ({errors})"),
            Self::SubtestSkipped { subtest } => write!(f, "{subtest}: skipped"),
            Self::MemtestFinished { errors: 0, bytes } => {
                write!(f, "memtest passed ({bytes} bytes)")
            }
            Self::MemtestFinished { errors, bytes } => {
                write!(f, "memtest FAILED ({errors} errors over {bytes} bytes)")
            }
            Self::Faulted { error } => write!(f, "fault: {error}"),
        }
    }
}

/// Sink trait for diagnostic hooks.
pub trait DiagSink {
    /// Records an event in emission order.
    fn on_event(&mut self, event: DiagEvent);
}

impl<S: DiagSink + ?Sized> DiagSink for &mut S {
    fn on_event(&mut self, event: DiagEvent) {
        (**self).on_event(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullSink;

impl DiagSink for NullSink {
    fn on_event(&mut self, _event: DiagEvent) {}
}

/// Collects events in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordingSink {
    events: Vec<DiagEvent>,
}

impl RecordingSink {
    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> &[DiagEvent] {
        &self.events
    }

    /// Removes and returns the collected events.
    pub fn take(&mut self) -> Vec<DiagEvent> {
        core::mem::take(&mut self.events)
    }
}

impl DiagSink for RecordingSink {
    fn on_event(&mut self, event: DiagEvent) {
        self.events.push(event);
    }
}

/// Forwards events to the `log` facade under the `amp_core` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogSink;

impl DiagSink for LogSink {
    fn on_event(&mut self, event: DiagEvent) {
        match event {
            DiagEvent::Faulted { .. }
            | DiagEvent::StateChanged {
                to: LifecycleState::Error,
                ..
            } => log::error!("{event}"),
            DiagEvent::SubtestFinished { errors, .. } | DiagEvent::MemtestFinished { errors, .. }
                if errors > 0 =>
            {
                log::warn!("{event}");
            }
            DiagEvent::HeartbeatLate { .. } => log::warn!("{event}"),
            DiagEvent::SubtestFinished { .. } | DiagEvent::SubtestSkipped { .. } => {
                log::debug!("{event}");
            }
            _ => log::info!("{event}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ControlConfig, DiagEvent, DiagSink, LogSink, RecordingSink, SharedLayout,
        DEFAULT_HEARTBEAT_INTERVAL_MS,
    };
    use crate::memtest::Subtest;
    use crate::{AddressRange, AmpError, LifecycleState, SHARED_MEM_BASE};

    #[test]
    fn default_config_matches_firmware_policy() {
        let config = ControlConfig::default();
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
        assert_eq!(config.heartbeat_interval_ticks(), 5_000_000);
        assert_eq!(config.boot_memtest, None);
        assert_eq!(config.init_message, "Core 3 initialized");
        assert_eq!(config.running_message, "Core 3 running OK");
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = ControlConfig {
            heartbeat_interval_ms: 0,
            ..ControlConfig::default()
        };
        assert_eq!(config.validate(), Err(AmpError::ZeroHeartbeatInterval));
    }

    #[test]
    fn default_layout_is_valid_and_spans_72_kib() {
        let layout = SharedLayout::default();
        assert_eq!(layout.validate(), Ok(()));
        assert_eq!(layout.window(), AddressRange::new(SHARED_MEM_BASE, 0x1_2000));
    }

    #[test]
    fn layout_rejects_overlap_and_small_status() {
        let overlapping = SharedLayout {
            data: AddressRange::new(SHARED_MEM_BASE + 0x800, 0x1000),
            ..SharedLayout::default()
        };
        assert!(matches!(
            overlapping.validate(),
            Err(AmpError::OverlappingRanges { .. })
        ));

        let small = SharedLayout {
            status: AddressRange::new(SHARED_MEM_BASE, 0x80),
            ..SharedLayout::default()
        };
        assert_eq!(
            small.validate(),
            Err(AmpError::RegionTooSmall {
                needed: 224,
                available: 0x80,
            })
        );

        let unaligned = SharedLayout {
            memtest: AddressRange::new(SHARED_MEM_BASE + 0x2002, 0x100),
            ..SharedLayout::default()
        };
        assert_eq!(
            unaligned.validate(),
            Err(AmpError::UnalignedAddress {
                addr: SHARED_MEM_BASE + 0x2002
            })
        );
    }

    #[test]
    fn recording_sink_keeps_order_and_drains() {
        let mut sink = RecordingSink::default();
        let first = DiagEvent::StateChanged {
            from: LifecycleState::Init,
            to: LifecycleState::Running,
        };
        let second = DiagEvent::Heartbeat {
            count: 1,
            uptime_ticks: 5_000_000,
        };
        {
            let mut borrowed = &mut sink;
            borrowed.on_event(first);
            borrowed.on_event(second);
        }
        assert_eq!(sink.take(), vec![first, second]);
        assert!(sink.events().is_empty());
        LogSink.on_event(first);
    }

    #[test]
    fn events_render_for_logs() {
        let event = DiagEvent::SubtestFinished {
            subtest: Subtest::Ones,
            errors: 3,
        };
        assert_eq!(event.to_string(), "All Ones: FAIL (3)");
        let event = DiagEvent::SubtestFinished {
            subtest: Subtest::Zeros,
            errors: 0,
        };
        assert_eq!(event.to_string(), "All Zeros: PASS");
        let event = DiagEvent::StateChanged {
            from: LifecycleState::Running,
            to: LifecycleState::Memtest,
        };
        assert_eq!(event.to_string(), "state RUNNING -> MEMTEST");
        let event = DiagEvent::HeartbeatLate {
            missed: 2,
            late_ticks: 12_500_000,
        };
        assert_eq!(
            event.to_string(),
            "heartbeat check late by 12500000 ticks (2 intervals missed)"
        );
    }
}
