//! Remote-core control loop: lifecycle state machine and heartbeat.
//!
//! ```text
//! BOOT -> INIT -> RUNNING <-> MEMTEST
//!   \       \        \           \
//!    +-------+--------+-----------+--> ERROR | HALTED (terminal)
//! ```
//!
//! The loop owns the bus, the clock, the diagnostic sink and the status
//! record handle. Faults are recorded, never retried.

use core::hint::spin_loop;

use crate::api::{ControlConfig, DiagEvent, DiagSink, SharedLayout};
use crate::clock::{Clock, CounterSource};
use crate::memory::MemoryBus;
use crate::memtest::{self, MemtestMode, MemtestReport};
use crate::region::{RecordHeader, StatusRegion};
use crate::status::{DebugMessage, StatusRecord, FIRMWARE_VERSION};
use crate::{AmpError, LifecycleState};

/// Remote-core control loop over a bus `B`, counter `C` and sink `S`.
#[derive(Debug)]
pub struct ControlLoop<B, C, S> {
    bus: B,
    clock: Clock<C>,
    sink: S,
    config: ControlConfig,
    layout: SharedLayout,
    region: Option<StatusRegion>,
    state: LifecycleState,
    last_heartbeat: u64,
}

impl<B: MemoryBus, C: CounterSource, S: DiagSink> ControlLoop<B, C, S> {
    /// Creates a loop in BOOT. Nothing is written until [`Self::initialize`].
    ///
    /// # Errors
    ///
    /// Rejects a zero heartbeat interval and an inconsistent layout.
    pub fn new(
        bus: B,
        clock: Clock<C>,
        sink: S,
        config: ControlConfig,
        layout: SharedLayout,
    ) -> Result<Self, AmpError> {
        config.validate()?;
        layout.validate()?;
        Ok(Self {
            bus,
            clock,
            sink,
            config,
            layout,
            region: None,
            state: LifecycleState::Boot,
            last_heartbeat: 0,
        })
    }

    /// Initializes, enters RUNNING and runs the configured boot self-test.
    ///
    /// # Errors
    ///
    /// Propagates the first failing step; an initialization failure leaves
    /// the loop in ERROR with no record written.
    pub fn boot(&mut self) -> Result<Option<MemtestReport>, AmpError> {
        self.initialize()?;
        self.start()?;
        match self.config.boot_memtest {
            Some(mode) => self.run_memtest(mode).map(Some),
            None => Ok(None),
        }
    }

    /// Publishes a fresh status record and moves BOOT -> INIT.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::IllegalTransition`] outside BOOT. Geometry errors
    /// move the loop to ERROR without writing anything.
    pub fn initialize(&mut self) -> Result<(), AmpError> {
        if self.state != LifecycleState::Boot {
            return Err(AmpError::IllegalTransition {
                from: self.state,
                to: LifecycleState::Init,
            });
        }

        let header = RecordHeader {
            version: FIRMWARE_VERSION,
            boot_time: self.clock.now(),
            heartbeat_interval_ms: self.config.heartbeat_interval_ms,
            debug_message: DebugMessage::new(&self.config.init_message),
        };
        match StatusRegion::initialize(&mut self.bus, self.layout.status.base, &header) {
            Ok(region) => {
                self.sink.on_event(DiagEvent::RecordInitialized {
                    base: region.base(),
                    boot_count: region.boot_count(),
                    boot_time: region.boot_time(),
                });
                self.last_heartbeat = region.boot_time();
                self.region = Some(region);
                self.state = LifecycleState::Init;
                self.sink.on_event(DiagEvent::StateChanged {
                    from: LifecycleState::Boot,
                    to: LifecycleState::Init,
                });
                Ok(())
            }
            Err(error) => {
                self.sink.on_event(DiagEvent::Faulted { error });
                self.transition(LifecycleState::Error)?;
                Err(error)
            }
        }
    }

    /// Moves INIT -> RUNNING and publishes the running message.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::IllegalTransition`] outside INIT.
    pub fn start(&mut self) -> Result<(), AmpError> {
        self.transition(LifecycleState::Running)?;
        let message = DebugMessage::new(&self.config.running_message);
        self.set_debug(&message);
        Ok(())
    }

    /// Runs a self-test bracketed by RUNNING -> MEMTEST -> RUNNING.
    ///
    /// The verdict is advisory: errors are published in the record and the
    /// loop returns to RUNNING either way.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::NotRunning`] outside RUNNING, or a geometry error
    /// if the scratch region is unreachable (after returning to RUNNING).
    pub fn run_memtest(&mut self, mode: MemtestMode) -> Result<MemtestReport, AmpError> {
        if self.state != LifecycleState::Running {
            return Err(AmpError::NotRunning { state: self.state });
        }
        self.transition(LifecycleState::Memtest)?;

        let outcome = memtest::run(
            &mut self.bus,
            self.layout.memtest,
            mode,
            self.config.verbose_memtest,
            &mut self.sink,
        );
        match outcome {
            Ok(report) => {
                if let Some(region) = &self.region {
                    region.record_memtest(
                        &mut self.bus,
                        report.verdict(),
                        report.errors,
                        report.bytes_tested,
                    );
                }
                if !report.passed() {
                    log::warn!(
                        "memtest found {} errors, faulty bits {:#010x}",
                        report.errors,
                        report.faulty_bits
                    );
                }
                self.transition(LifecycleState::Running)?;
                Ok(report)
            }
            Err(error) => {
                self.sink.on_event(DiagEvent::Faulted { error });
                self.transition(LifecycleState::Running)?;
                Err(error)
            }
        }
    }

    /// Checks the heartbeat deadline once.
    ///
    /// Returns the new counter when at least one interval elapsed. The
    /// reference point advances by whole intervals, so the counter always
    /// equals `(now - boot_time) / interval`. A check that finds more than
    /// one interval elapsed still counts every interval, and reports the
    /// stall as [`DiagEvent::HeartbeatLate`] first.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::NotRunning`] outside RUNNING.
    pub fn poll(&mut self) -> Result<Option<u32>, AmpError> {
        if self.state != LifecycleState::Running {
            return Err(AmpError::NotRunning { state: self.state });
        }
        let Some(region) = self.region.as_mut() else {
            return Err(AmpError::NotRunning { state: self.state });
        };

        let now = self.clock.now();
        let interval = self.config.heartbeat_interval_ticks();
        let elapsed = now.wrapping_sub(self.last_heartbeat);
        if elapsed < interval {
            return Ok(None);
        }

        let beats = elapsed / interval;
        #[allow(clippy::cast_possible_truncation)]
        let beats_u32 = beats.min(u64::from(u32::MAX)) as u32;
        if beats > 1 {
            let late_ticks = elapsed - interval;
            log::warn!("heartbeat check ran {late_ticks} ticks late");
            self.sink.on_event(DiagEvent::HeartbeatLate {
                missed: beats_u32 - 1,
                late_ticks,
            });
        }
        self.last_heartbeat = self.last_heartbeat.wrapping_add(beats * interval);
        let count = region.heartbeat(&mut self.bus, now, beats_u32);
        self.sink.on_event(DiagEvent::Heartbeat {
            count,
            uptime_ticks: now.wrapping_sub(region.boot_time()),
        });
        Ok(Some(count))
    }

    /// Bounded busy-wait between heartbeat checks.
    pub fn idle(&self) {
        for _ in 0..self.config.idle_spins {
            spin_loop();
        }
    }

    /// One pass of the steady-state loop: a heartbeat check while RUNNING,
    /// then the idle wait.
    ///
    /// Returns the new heartbeat counter when it advanced. Other states
    /// only idle.
    pub fn step(&mut self) -> Option<u32> {
        let beat = if self.state == LifecycleState::Running {
            self.poll().unwrap_or_else(|error| {
                log::warn!("heartbeat check failed: {error}");
                None
            })
        } else {
            None
        };
        self.idle();
        beat
    }

    /// Runs [`Self::step`] forever.
    ///
    /// Terminal states park in the idle wait; the record keeps the last
    /// state for the host to see.
    pub fn run(&mut self) -> ! {
        loop {
            self.step();
        }
    }

    /// Moves to ERROR and publishes `reason` as the debug message.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::IllegalTransition`] from a terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), AmpError> {
        self.transition(LifecycleState::Error)?;
        self.set_debug(&DebugMessage::new(reason));
        Ok(())
    }

    /// Moves to HALTED.
    ///
    /// # Errors
    ///
    /// Returns [`AmpError::IllegalTransition`] unless RUNNING or MEMTEST.
    pub fn halt(&mut self) -> Result<(), AmpError> {
        self.transition(LifecycleState::Halted)
    }

    /// Replaces the debug message; a no-op before initialization.
    pub fn set_debug(&mut self, message: &DebugMessage) {
        if let Some(region) = &self.region {
            region.set_debug(&mut self.bus, message);
        }
    }

    fn transition(&mut self, to: LifecycleState) -> Result<(), AmpError> {
        let from = self.state;
        if !from.can_transition(to) {
            return Err(AmpError::IllegalTransition { from, to });
        }
        if let Some(region) = self.region.as_mut() {
            region.set_state(&mut self.bus, to)?;
        }
        self.state = to;
        self.sink.on_event(DiagEvent::StateChanged { from, to });
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Heartbeats published since initialization.
    #[must_use]
    pub fn heartbeat_count(&self) -> u32 {
        self.region
            .as_ref()
            .map_or(0, StatusRegion::heartbeat_counter)
    }

    /// Record handle, once initialized.
    #[must_use]
    pub const fn region(&self) -> Option<&StatusRegion> {
        self.region.as_ref()
    }

    /// Reads the record back through the bus, once initialized.
    #[must_use]
    pub fn record(&self) -> Option<StatusRecord> {
        self.region.as_ref().map(|region| region.snapshot(&self.bus))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Active layout.
    #[must_use]
    pub const fn layout(&self) -> &SharedLayout {
        &self.layout
    }

    /// Bus.
    #[must_use]
    pub const fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable bus, for fault injection.
    #[must_use]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Clock.
    #[must_use]
    pub const fn clock(&self) -> &Clock<C> {
        &self.clock
    }

    /// Diagnostic sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutable diagnostic sink.
    #[must_use]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consumes the loop, returning the bus and sink.
    pub fn into_parts(self) -> (B, S) {
        (self.bus, self.sink)
    }
}
