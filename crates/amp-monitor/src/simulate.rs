//! Host-side simulation of the remote core.
//!
//! Runs the real [`ControlLoop`] against an in-memory shared window, with
//! optional stuck bits in the self-test scratch region, and hands back the
//! final window image. Written to a file, the image can be read back by the
//! `show` command at offset 0.

use std::fs;
use std::io;
use std::path::Path;

use amp_core::{
    AmpError, Clock, ControlConfig, ControlLoop, CounterSource, DiagEvent, FaultyBus, MemtestMode,
    MemtestReport, RamBus, RecordingSink, SharedLayout, StatusRecord, SteppingCounter, StuckAt,
    StuckBit, DEFAULT_HEARTBEAT_INTERVAL_MS, SHARED_MEMTEST_ADDR, SHARED_MEMTEST_SIZE,
    TICKS_PER_MILLI,
};

use crate::host_clock::HostCounter;

/// Tick value the simulated system timer starts at.
pub const DEFAULT_START_TICK: u64 = 1_000_000;

/// What to simulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationOptions {
    /// Heartbeat intervals to let elapse after boot.
    pub heartbeats: u32,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u32,
    /// Self-test to run right after reaching RUNNING.
    pub boot_memtest: Option<MemtestMode>,
    /// Emit one event per sub-test.
    pub verbose_memtest: bool,
    /// Stuck bits injected before boot.
    pub faults: Vec<StuckBit>,
    /// Halt the core after the last heartbeat.
    pub halt: bool,
    /// Follow the wall clock instead of stepping simulated time.
    pub realtime: bool,
    /// Initial counter value.
    pub start_tick: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            heartbeats: 3,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            boot_memtest: Some(MemtestMode::Quick),
            verbose_memtest: false,
            faults: Vec::new(),
            halt: false,
            realtime: false,
            start_tick: DEFAULT_START_TICK,
        }
    }
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    /// Shared window bytes; the status record sits at offset 0.
    pub image: Vec<u8>,
    /// Final record as the host would see it.
    pub record: StatusRecord,
    /// Diagnostic events in emission order.
    pub events: Vec<DiagEvent>,
    /// Boot self-test report, when one ran.
    pub memtest: Option<MemtestReport>,
}

impl Simulation {
    /// Writes the window image to `path`.
    ///
    /// # Errors
    ///
    /// Propagates the filesystem error.
    pub fn write_image(&self, path: &Path) -> io::Result<()> {
        fs::write(path, &self.image)
    }
}

type SimLoop<C> = ControlLoop<FaultyBus<RamBus>, C, RecordingSink>;

/// Boots a simulated core, lets the configured heartbeats elapse and returns
/// the resulting window.
///
/// # Errors
///
/// Returns [`AmpError`] for an invalid configuration or an illegal final
/// transition.
pub fn run(options: &SimulationOptions) -> Result<Simulation, AmpError> {
    let mut bus = FaultyBus::new(RamBus::shared_window());
    for fault in &options.faults {
        bus.inject(*fault);
    }
    let config = ControlConfig {
        heartbeat_interval_ms: options.heartbeat_interval_ms,
        boot_memtest: options.boot_memtest,
        verbose_memtest: options.verbose_memtest,
        ..ControlConfig::default()
    };
    let interval_ms = u64::from(options.heartbeat_interval_ms);

    if options.realtime {
        let clock = Clock::new(HostCounter::starting_at(options.start_tick));
        let control = build(bus, clock, config)?;
        drive(control, options, |clock| clock.delay_ms(interval_ms))
    } else {
        let clock = Clock::new(SteppingCounter::new(options.start_tick, 0));
        let control = build(bus, clock, config)?;
        drive(control, options, |clock| {
            clock.counter().advance(interval_ms * TICKS_PER_MILLI);
        })
    }
}

fn build<C: CounterSource>(
    bus: FaultyBus<RamBus>,
    clock: Clock<C>,
    config: ControlConfig,
) -> Result<SimLoop<C>, AmpError> {
    ControlLoop::new(
        bus,
        clock,
        RecordingSink::default(),
        config,
        SharedLayout::default(),
    )
}

fn drive<C: CounterSource>(
    mut control: SimLoop<C>,
    options: &SimulationOptions,
    mut wait: impl FnMut(&Clock<C>),
) -> Result<Simulation, AmpError> {
    let memtest = control.boot()?;
    for _ in 0..options.heartbeats {
        wait(control.clock());
        if let Some(count) = control.step() {
            log::debug!("heartbeat {count}");
        }
    }
    if options.halt {
        control.halt()?;
    }

    let state = control.state();
    let record = control
        .record()
        .ok_or(AmpError::NotRunning { state })?;
    let (bus, mut sink) = control.into_parts();
    Ok(Simulation {
        image: bus.into_inner().as_bytes().to_vec(),
        record,
        events: sink.take(),
        memtest,
    })
}

/// Parses a fault as `ADDR:BIT:LEVEL`, e.g. `0x20A02400:7:0`.
///
/// `ADDR` must lie inside the self-test scratch region; `LEVEL` is `0` or
/// `1`.
///
/// # Errors
///
/// Returns a message naming the malformed part.
pub fn parse_fault(text: &str) -> Result<StuckBit, String> {
    let mut parts = text.split(':');
    let (Some(addr), Some(bit), Some(level), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("fault must be ADDR:BIT:LEVEL, got {text:?}"));
    };

    let addr = parse_u32(addr).map_err(|error| format!("fault address: {error}"))?;
    let scratch_end = u64::from(SHARED_MEMTEST_ADDR) + u64::from(SHARED_MEMTEST_SIZE);
    if addr < SHARED_MEMTEST_ADDR || u64::from(addr) >= scratch_end {
        return Err(format!(
            "fault address {addr:#010x} is outside the memtest region"
        ));
    }
    let bit = bit
        .parse::<u8>()
        .ok()
        .filter(|bit| *bit < 32)
        .ok_or_else(|| format!("fault bit must be 0..31, got {bit:?}"))?;
    let level = match level {
        "0" => StuckAt::Zero,
        "1" => StuckAt::One,
        other => return Err(format!("fault level must be 0 or 1, got {other:?}")),
    };
    Ok(StuckBit::new(addr, bit, level))
}

/// Parses a decimal or `0x`-prefixed hexadecimal `u32`.
///
/// # Errors
///
/// Returns a message when the text is not a number in range.
pub fn parse_u32(text: &str) -> Result<u32, String> {
    parse_u64(text).and_then(|value| {
        u32::try_from(value).map_err(|_| format!("{text} does not fit in 32 bits"))
    })
}

/// Parses a decimal or `0x`-prefixed hexadecimal `u64`.
///
/// # Errors
///
/// Returns a message when the text is not a number in range.
pub fn parse_u64(text: &str) -> Result<u64, String> {
    let cleaned = text.replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|_| format!("invalid number: {text}"))
}

#[cfg(test)]
mod tests {
    use super::{parse_fault, parse_u32, parse_u64, run, SimulationOptions};
    use amp_core::{
        observe, DiagEvent, LifecycleState, MemtestMode, MemtestStatus, Observation, StuckAt,
        StuckBit, FIRMWARE_MAGIC, RECORD_SIZE, SHARED_MEMTEST_ADDR,
    };

    #[test]
    fn default_run_publishes_a_live_record() {
        let simulation = run(&SimulationOptions::default()).unwrap();
        let record = simulation.record;
        assert_eq!(record.magic, FIRMWARE_MAGIC);
        assert_eq!(record.lifecycle_state(), Some(LifecycleState::Running));
        assert_eq!(record.boot_count, 1);
        assert_eq!(record.heartbeat_counter, 3);
        assert_eq!(record.uptime_ticks, 15_000_000);
        assert_eq!(record.memtest_verdict(), Some(MemtestStatus::Pass));
        assert_eq!(record.debug_message.text(), "Core 3 running OK");

        let mut image = [0; RECORD_SIZE];
        image.copy_from_slice(&simulation.image[..RECORD_SIZE]);
        assert_eq!(observe(&image), Observation::Live(record));
    }

    #[test]
    fn stuck_bit_fails_the_boot_memtest() {
        let options = SimulationOptions {
            boot_memtest: Some(MemtestMode::Full),
            faults: vec![StuckBit::new(SHARED_MEMTEST_ADDR + 0x400, 7, StuckAt::Zero)],
            heartbeats: 0,
            ..SimulationOptions::default()
        };
        let simulation = run(&options).unwrap();
        assert_eq!(simulation.record.memtest_status, 2);
        assert!(simulation.record.memtest_errors >= 1);
        assert_eq!(simulation.memtest.map(|report| report.faulty_bits), Some(1 << 7));
    }

    #[test]
    fn halt_is_recorded() {
        let options = SimulationOptions {
            halt: true,
            boot_memtest: None,
            ..SimulationOptions::default()
        };
        let simulation = run(&options).unwrap();
        assert_eq!(
            simulation.record.lifecycle_state(),
            Some(LifecycleState::Halted)
        );
        assert_eq!(
            simulation.events.last(),
            Some(&DiagEvent::StateChanged {
                from: LifecycleState::Running,
                to: LifecycleState::Halted,
            })
        );
    }

    #[test]
    fn zero_interval_is_rejected_before_boot() {
        let options = SimulationOptions {
            heartbeat_interval_ms: 0,
            ..SimulationOptions::default()
        };
        assert!(run(&options).is_err());
    }

    #[test]
    fn parses_faults() {
        assert_eq!(
            parse_fault("0x20A02402:7:0"),
            Ok(StuckBit::new(0x20A0_2400, 7, StuckAt::Zero))
        );
        assert_eq!(
            parse_fault("547364864:31:1").map(|fault| fault.level),
            Ok(StuckAt::One)
        );
        assert!(parse_fault("0x20A00000:7:0").unwrap_err().contains("outside"));
        assert!(parse_fault("0x20A02400:32:0").unwrap_err().contains("bit"));
        assert!(parse_fault("0x20A02400:7:2").unwrap_err().contains("level"));
        assert!(parse_fault("0x20A02400:7").is_err());
    }

    #[test]
    fn parses_numbers() {
        assert_eq!(parse_u64("0x20A0_0000"), Ok(0x20A0_0000));
        assert_eq!(parse_u64("500"), Ok(500));
        assert!(parse_u64("0xZZ").is_err());
        assert!(parse_u32("0x1_0000_0000").is_err());
    }
}
