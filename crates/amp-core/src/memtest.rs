//! Memory self-test battery.
//!
//! Each pattern sub-test writes every word of the region, issues a barrier,
//! then verifies in a separate pass. Errors are counted per mismatching word
//! and summed across sub-tests; no error is fatal to the engine.

use alloc::vec::Vec;
use core::fmt;

use crate::api::{DiagEvent, DiagSink};
use crate::memory::MemoryBus;
use crate::status::MemtestStatus;
use crate::{validate_range_within, validate_word_alignment, AddressRange, AmpError, FaultClass};

/// All bits clear.
pub const PATTERN_ZEROS: u32 = 0x0000_0000;
/// All bits set.
pub const PATTERN_ONES: u32 = 0xFFFF_FFFF;
/// Alternating bits, odd positions set.
pub const PATTERN_AA: u32 = 0xAAAA_AAAA;
/// Alternating bits, even positions set.
pub const PATTERN_55: u32 = 0x5555_5555;
/// Largest region the walking-ones pass runs over (64 KiB).
pub const WALKING_ONES_MAX_BYTES: u32 = 0x1_0000;

/// One step of the battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Subtest {
    /// Fill with [`PATTERN_ZEROS`].
    Zeros,
    /// Fill with [`PATTERN_ONES`].
    Ones,
    /// Fill with [`PATTERN_AA`].
    AlternatingAa,
    /// Fill with [`PATTERN_55`].
    Alternating55,
    /// Fill with `1 << bit` for each of the 32 bit positions.
    WalkingOnes,
    /// Each word holds its own physical byte address.
    AddressAsData,
}

impl Subtest {
    /// Full battery in execution order.
    pub const FULL: [Self; 6] = [
        Self::Zeros,
        Self::Ones,
        Self::AlternatingAa,
        Self::Alternating55,
        Self::WalkingOnes,
        Self::AddressAsData,
    ];

    /// Quick battery: the four fixed patterns.
    pub const QUICK: [Self; 4] = [
        Self::Zeros,
        Self::Ones,
        Self::AlternatingAa,
        Self::Alternating55,
    ];

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Zeros => "All Zeros",
            Self::Ones => "All Ones",
            Self::AlternatingAa => "0xAAAAAAAA",
            Self::Alternating55 => "0x55555555",
            Self::WalkingOnes => "Walking Ones",
            Self::AddressAsData => "Addr as Data",
        }
    }

    /// Fixed fill pattern, for the sub-tests that have one.
    #[must_use]
    pub const fn pattern(self) -> Option<u32> {
        match self {
            Self::Zeros => Some(PATTERN_ZEROS),
            Self::Ones => Some(PATTERN_ONES),
            Self::AlternatingAa => Some(PATTERN_AA),
            Self::Alternating55 => Some(PATTERN_55),
            Self::WalkingOnes | Self::AddressAsData => None,
        }
    }
}

impl fmt::Display for Subtest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which battery to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MemtestMode {
    /// [`Subtest::QUICK`].
    Quick,
    /// [`Subtest::FULL`].
    #[default]
    Full,
}

impl MemtestMode {
    /// Sub-tests in execution order.
    #[must_use]
    pub const fn subtests(self) -> &'static [Subtest] {
        match self {
            Self::Quick => &Subtest::QUICK,
            Self::Full => &Subtest::FULL,
        }
    }

    /// Lower-case name used on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }

    /// Parses a lower-case name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "quick" => Some(Self::Quick),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl fmt::Display for MemtestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one sub-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubtestReport {
    /// Which sub-test.
    pub subtest: Subtest,
    /// Mismatching words, or `None` when the sub-test was skipped.
    pub errors: Option<u32>,
}

/// Outcome of a walking-ones pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WalkingOnesReport {
    /// Mismatching words summed over all 32 passes.
    pub errors: u32,
    /// Union of `read ^ expected` over every mismatch.
    ///
    /// A single stuck bit sets exactly its own position here whether it is
    /// stuck at 0 or at 1.
    pub faulty_bits: u32,
}

/// Aggregate outcome of a battery run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemtestReport {
    /// Battery that ran.
    pub mode: MemtestMode,
    /// Region tested.
    pub region: AddressRange,
    /// Sum of all sub-test errors.
    pub errors: u32,
    /// Bytes covered.
    pub bytes_tested: u32,
    /// Per-sub-test outcomes in execution order.
    pub subtests: Vec<SubtestReport>,
    /// Bits isolated by walking-ones, zero when it passed or was skipped.
    pub faulty_bits: u32,
}

impl MemtestReport {
    /// Verdict for the record.
    #[must_use]
    pub const fn verdict(&self) -> MemtestStatus {
        MemtestStatus::from_errors(self.errors)
    }

    /// Returns `true` when no errors were found.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.errors == 0
    }

    /// [`FaultClass::Integrity`] when errors were found.
    #[must_use]
    pub const fn fault_class(&self) -> Option<FaultClass> {
        if self.errors == 0 {
            None
        } else {
            Some(FaultClass::Integrity)
        }
    }

    /// Errors of one sub-test, `None` when it was skipped or not in the battery.
    #[must_use]
    pub fn errors_for(&self, subtest: Subtest) -> Option<u32> {
        self.subtests
            .iter()
            .find(|report| report.subtest == subtest)
            .and_then(|report| report.errors)
    }
}

fn word_addresses(region: AddressRange) -> impl Iterator<Item = u32> {
    (0..region.words()).map(move |index| region.base + index * 4)
}

/// Fills `region` with `pattern`, then counts words that read back differently.
pub fn pattern_test<B: MemoryBus + ?Sized>(bus: &mut B, region: AddressRange, pattern: u32) -> u32 {
    for addr in word_addresses(region) {
        bus.write_u32(addr, pattern);
    }
    bus.barrier();
    let mismatches = word_addresses(region).filter(|addr| bus.read_u32(*addr) != pattern);
    u32::try_from(mismatches.count()).unwrap_or(u32::MAX)
}

/// Runs one fill-and-verify pass for each of the 32 single-bit patterns.
pub fn walking_ones<B: MemoryBus + ?Sized>(bus: &mut B, region: AddressRange) -> WalkingOnesReport {
    let mut report = WalkingOnesReport::default();
    for bit in 0..32 {
        let pattern = 1_u32 << bit;
        for addr in word_addresses(region) {
            bus.write_u32(addr, pattern);
        }
        bus.barrier();
        for addr in word_addresses(region) {
            let read = bus.read_u32(addr);
            if read != pattern {
                report.errors = report.errors.saturating_add(1);
                report.faulty_bits |= read ^ pattern;
            }
        }
    }
    report
}

/// Writes each word's physical byte address into it, then verifies.
pub fn address_as_data<B: MemoryBus + ?Sized>(bus: &mut B, region: AddressRange) -> u32 {
    for addr in word_addresses(region) {
        bus.write_u32(addr, addr);
    }
    bus.barrier();
    let mismatches = word_addresses(region).filter(|addr| bus.read_u32(*addr) != *addr);
    u32::try_from(mismatches.count()).unwrap_or(u32::MAX)
}

/// Runs a battery over `region`.
///
/// Walking-ones is skipped for regions larger than
/// [`WALKING_ONES_MAX_BYTES`]. With `verbose` set, start, per-sub-test and
/// finish events go to `sink`.
///
/// # Errors
///
/// Rejects an unaligned region or one outside the bus before writing.
pub fn run<B, S>(
    bus: &mut B,
    region: AddressRange,
    mode: MemtestMode,
    verbose: bool,
    sink: &mut S,
) -> Result<MemtestReport, AmpError>
where
    B: MemoryBus + ?Sized,
    S: DiagSink + ?Sized,
{
    validate_word_alignment(region.base)?;
    validate_range_within(bus.span(), region)?;

    if verbose {
        sink.on_event(DiagEvent::MemtestStarted { mode, region });
    }

    let mut report = MemtestReport {
        mode,
        region,
        errors: 0,
        bytes_tested: region.len,
        subtests: Vec::with_capacity(mode.subtests().len()),
        faulty_bits: 0,
    };

    for &subtest in mode.subtests() {
        let errors = match subtest.pattern() {
            Some(pattern) => Some(pattern_test(bus, region, pattern)),
            None if subtest == Subtest::WalkingOnes => {
                if region.len <= WALKING_ONES_MAX_BYTES {
                    let walking = walking_ones(bus, region);
                    report.faulty_bits = walking.faulty_bits;
                    Some(walking.errors)
                } else {
                    None
                }
            }
            None => Some(address_as_data(bus, region)),
        };

        if let Some(errors) = errors {
            report.errors = report.errors.saturating_add(errors);
        }
        if verbose {
            sink.on_event(match errors {
                Some(errors) => DiagEvent::SubtestFinished { subtest, errors },
                None => DiagEvent::SubtestSkipped { subtest },
            });
        }
        report.subtests.push(SubtestReport { subtest, errors });
    }

    if verbose {
        sink.on_event(DiagEvent::MemtestFinished {
            errors: report.errors,
            bytes: report.bytes_tested,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{
        address_as_data, pattern_test, run, walking_ones, MemtestMode, Subtest, PATTERN_AA,
        WALKING_ONES_MAX_BYTES,
    };
    use crate::api::{DiagEvent, NullSink, RecordingSink};
    use crate::memory::{FaultyBus, StuckAt, StuckBit};
    use crate::status::MemtestStatus;
    use crate::{AddressRange, AmpError, FaultClass, MemoryBus, RamBus};

    const REGION: AddressRange = AddressRange::new(0x20A0_2000, 256);

    fn bus() -> RamBus {
        RamBus::new(REGION)
    }

    #[test]
    fn fault_free_memory_passes_every_subtest() {
        let mut bus = bus();
        let report = run(&mut bus, REGION, MemtestMode::Full, false, &mut NullSink).unwrap();
        assert_eq!(report.errors, 0);
        assert_eq!(report.bytes_tested, 256);
        assert_eq!(report.verdict(), MemtestStatus::Pass);
        assert_eq!(report.fault_class(), None);
        assert_eq!(report.subtests.len(), 6);
        assert_eq!(report.faulty_bits, 0);
    }

    #[test]
    fn address_as_data_leaves_addresses_behind() {
        let mut bus = bus();
        assert_eq!(address_as_data(&mut bus, REGION), 0);
        assert_eq!(bus.read_u32(REGION.base + 8), REGION.base + 8);
    }

    #[test]
    fn pattern_leaves_memory_filled() {
        let mut bus = bus();
        assert_eq!(pattern_test(&mut bus, REGION, PATTERN_AA), 0);
        assert!(bus.as_bytes().iter().all(|byte| *byte == 0xAA));
    }

    #[test]
    fn stuck_at_zero_isolated_by_walking_ones() {
        let fault = StuckBit::new(REGION.base + 0x40, 7, StuckAt::Zero);
        let mut bus = FaultyBus::new(bus()).with_fault(fault);
        let report = walking_ones(&mut bus, REGION);
        assert_eq!(report.errors, 1);
        assert_eq!(report.faulty_bits, 1 << 7);
    }

    #[test]
    fn stuck_at_one_isolated_by_walking_ones() {
        let fault = StuckBit::new(REGION.base, 12, StuckAt::One);
        let mut bus = FaultyBus::new(bus()).with_fault(fault);
        let report = walking_ones(&mut bus, REGION);
        assert_eq!(report.errors, 31);
        assert_eq!(report.faulty_bits, 1 << 12);
    }

    #[test]
    fn stuck_bit_fails_ones_and_exactly_one_alternating_pattern() {
        let fault = StuckBit::new(REGION.base + 0x10, 7, StuckAt::Zero);
        let mut bus = FaultyBus::new(bus()).with_fault(fault);
        let report = run(&mut bus, REGION, MemtestMode::Full, false, &mut NullSink).unwrap();

        assert_eq!(report.errors_for(Subtest::Zeros), Some(0));
        assert_eq!(report.errors_for(Subtest::Ones), Some(1));
        let alternating = [
            report.errors_for(Subtest::AlternatingAa),
            report.errors_for(Subtest::Alternating55),
        ];
        assert_eq!(alternating.iter().filter(|errors| **errors == Some(1)).count(), 1);
        assert_eq!(report.errors_for(Subtest::WalkingOnes), Some(1));
        assert_eq!(report.faulty_bits, 1 << 7);
        assert_eq!(report.verdict(), MemtestStatus::Fail);
        assert_eq!(report.fault_class(), Some(FaultClass::Integrity));
    }

    #[test]
    fn quick_battery_runs_only_fixed_patterns() {
        let mut bus = bus();
        let report = run(&mut bus, REGION, MemtestMode::Quick, false, &mut NullSink).unwrap();
        let ran: Vec<_> = report.subtests.iter().map(|report| report.subtest).collect();
        assert_eq!(ran, Subtest::QUICK);
        assert_eq!(report.errors_for(Subtest::WalkingOnes), None);
    }

    #[test]
    fn walking_ones_is_skipped_above_64_kib() {
        let region = AddressRange::new(0, WALKING_ONES_MAX_BYTES + 4);
        let mut bus = RamBus::new(region);
        let mut sink = RecordingSink::default();
        let report = run(&mut bus, region, MemtestMode::Full, true, &mut sink).unwrap();
        assert_eq!(report.errors, 0);
        assert!(sink
            .events()
            .contains(&DiagEvent::SubtestSkipped { subtest: Subtest::WalkingOnes }));
    }

    #[test]
    fn verbose_run_brackets_subtest_events() {
        let mut bus = bus();
        let mut sink = RecordingSink::default();
        run(&mut bus, REGION, MemtestMode::Quick, true, &mut sink).unwrap();
        let events = sink.events();
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            DiagEvent::MemtestStarted {
                mode: MemtestMode::Quick,
                region: REGION,
            }
        );
        assert_eq!(
            events[5],
            DiagEvent::MemtestFinished {
                errors: 0,
                bytes: 256,
            }
        );
    }

    #[test]
    fn quiet_run_emits_nothing() {
        let mut bus = bus();
        let mut sink = RecordingSink::default();
        run(&mut bus, REGION, MemtestMode::Full, false, &mut sink).unwrap();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn region_outside_bus_is_rejected() {
        let mut bus = bus();
        let region = AddressRange::new(REGION.base + 4, REGION.len);
        assert!(matches!(
            run(&mut bus, region, MemtestMode::Quick, false, &mut NullSink),
            Err(AmpError::RangeOutOfBounds { .. })
        ));
    }
}
