//! End-to-end control loop behavior: boot scenario, heartbeat cadence and
//! the lifecycle state machine.

#![allow(clippy::pedantic, clippy::nursery, clippy::cast_possible_truncation)]

use amp_core::{
    read_status, AmpError, Clock, ControlConfig, ControlLoop, DiagEvent, FaultClass, FaultyBus,
    LifecycleState, MemtestMode, MemtestStatus, Observation, RamBus, RecordingSink, SharedLayout,
    SteppingCounter, StuckAt, StuckBit, FIRMWARE_MAGIC, SHARED_MEMTEST_ADDR, SHARED_STATUS_ADDR,
};
use log as _;
use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

type SimLoop = ControlLoop<FaultyBus<RamBus>, SteppingCounter, RecordingSink>;

fn sim(config: ControlConfig, boot_tick: u64) -> SimLoop {
    ControlLoop::new(
        FaultyBus::new(RamBus::shared_window()),
        Clock::new(SteppingCounter::new(boot_tick, 0)),
        RecordingSink::default(),
        config,
        SharedLayout::default(),
    )
    .unwrap()
}

fn host_view(control: &SimLoop) -> Observation {
    read_status(control.bus().inner(), SHARED_STATUS_ADDR)
}

#[test]
fn concrete_boot_scenario() {
    let mut control = sim(ControlConfig::default(), 42);
    assert_eq!(host_view(&control), Observation::NotRunning { magic: 0 });

    control.initialize().unwrap();
    let record = host_view(&control).into_result().unwrap();
    assert_eq!(record.magic, FIRMWARE_MAGIC);
    assert_eq!(record.lifecycle_state(), Some(LifecycleState::Init));
    assert_eq!(record.boot_count, 1);

    control.start().unwrap();
    assert_eq!(
        host_view(&control).record().and_then(|record| record.lifecycle_state()),
        Some(LifecycleState::Running)
    );

    let quick = control.run_memtest(MemtestMode::Quick).unwrap();
    let record = host_view(&control).into_result().unwrap();
    assert_eq!(quick.errors, 0);
    assert_eq!(record.memtest_status, 1);
    assert_eq!(record.memtest_errors, 0);

    control
        .bus_mut()
        .inject(StuckBit::new(SHARED_MEMTEST_ADDR + 0x400, 7, StuckAt::Zero));
    let full = control.run_memtest(MemtestMode::Full).unwrap();
    let record = host_view(&control).into_result().unwrap();
    assert_eq!(record.memtest_status, 2);
    assert!(record.memtest_errors >= 1);
    assert_eq!(record.memtest_verdict(), Some(MemtestStatus::Fail));
    assert_eq!(full.fault_class(), Some(FaultClass::Integrity));
    assert_eq!(record.lifecycle_state(), Some(LifecycleState::Running));
}

#[test]
fn second_boot_over_a_live_window_increments_boot_count() {
    let mut first = sim(ControlConfig::default(), 0);
    first.boot().unwrap();
    let (bus, _) = first.into_parts();

    let mut second = ControlLoop::new(
        bus,
        Clock::new(SteppingCounter::new(9_000_000, 0)),
        RecordingSink::default(),
        ControlConfig::default(),
        SharedLayout::default(),
    )
    .unwrap();
    second.boot().unwrap();
    let record = second.record().unwrap();
    assert_eq!(record.boot_count, 2);
    assert_eq!(record.boot_time, 9_000_000);
    assert_eq!(record.heartbeat_counter, 0);
}

#[test]
fn memtest_events_are_bracketed_by_state_changes() {
    let mut control = sim(
        ControlConfig {
            verbose_memtest: true,
            ..ControlConfig::default()
        },
        0,
    );
    control.boot().unwrap();
    control.sink_mut().take();
    control.run_memtest(MemtestMode::Quick).unwrap();

    let events = control.sink().events();
    assert_eq!(
        events.first(),
        Some(&DiagEvent::StateChanged {
            from: LifecycleState::Running,
            to: LifecycleState::Memtest,
        })
    );
    assert_eq!(
        events.last(),
        Some(&DiagEvent::StateChanged {
            from: LifecycleState::Memtest,
            to: LifecycleState::Running,
        })
    );
    assert!(matches!(events[1], DiagEvent::MemtestStarted { .. }));
    assert_eq!(events.len(), 2 + 2 + 4);
}

#[test]
fn late_check_counts_every_interval_and_reports_the_stall() {
    let mut control = sim(ControlConfig::default(), 0);
    control.boot().unwrap();
    control.sink_mut().take();

    control.clock().counter().advance(5_000_000);
    assert_eq!(control.poll().unwrap(), Some(1));
    assert_eq!(
        control.sink_mut().take(),
        vec![DiagEvent::Heartbeat {
            count: 1,
            uptime_ticks: 5_000_000,
        }]
    );

    control.clock().counter().advance(17_500_000);
    assert_eq!(control.poll().unwrap(), Some(4));
    assert_eq!(
        control.sink_mut().take(),
        vec![
            DiagEvent::HeartbeatLate {
                missed: 2,
                late_ticks: 12_500_000,
            },
            DiagEvent::Heartbeat {
                count: 4,
                uptime_ticks: 22_500_000,
            },
        ]
    );
}

#[test]
fn step_beats_only_while_running() {
    let mut control = sim(
        ControlConfig {
            idle_spins: 1,
            ..ControlConfig::default()
        },
        0,
    );
    control.clock().counter().advance(5_000_000);
    assert_eq!(control.step(), None);
    assert_eq!(control.state(), LifecycleState::Boot);

    control.boot().unwrap();
    assert_eq!(control.step(), None);
    control.clock().counter().advance(5_000_000);
    assert_eq!(control.step(), Some(1));

    control.halt().unwrap();
    control.clock().counter().advance(50_000_000);
    assert_eq!(control.step(), None);
    assert_eq!(control.record().unwrap().heartbeat_counter, 1);
}

#[rstest]
#[case(LifecycleState::Boot, LifecycleState::Init)]
#[case(LifecycleState::Boot, LifecycleState::Error)]
#[case(LifecycleState::Init, LifecycleState::Running)]
#[case(LifecycleState::Init, LifecycleState::Error)]
#[case(LifecycleState::Running, LifecycleState::Memtest)]
#[case(LifecycleState::Running, LifecycleState::Error)]
#[case(LifecycleState::Running, LifecycleState::Halted)]
#[case(LifecycleState::Memtest, LifecycleState::Running)]
#[case(LifecycleState::Memtest, LifecycleState::Error)]
#[case(LifecycleState::Memtest, LifecycleState::Halted)]
fn legal_edges(#[case] from: LifecycleState, #[case] to: LifecycleState) {
    assert!(from.can_transition(to));
}

#[test]
fn exactly_ten_edges_exist() {
    let edges = LifecycleState::ALL
        .iter()
        .flat_map(|from| LifecycleState::ALL.iter().map(move |to| (*from, *to)))
        .filter(|(from, to)| from.can_transition(*to))
        .count();
    assert_eq!(edges, 10);
}

#[rstest]
#[case::from_boot(false)]
#[case::from_running(true)]
fn fail_is_published_where_a_record_exists(#[case] booted: bool) {
    let mut control = sim(ControlConfig::default(), 0);
    if booted {
        control.boot().unwrap();
    }
    control.fail("panic in core 3").unwrap();
    assert_eq!(control.state(), LifecycleState::Error);
    match host_view(&control) {
        Observation::Live(record) => {
            assert!(booted);
            assert_eq!(record.lifecycle_state(), Some(LifecycleState::Error));
            assert_eq!(record.debug_message.text(), "panic in core 3");
        }
        Observation::NotRunning { .. } => assert!(!booted),
    }
    assert_eq!(
        control.run_memtest(MemtestMode::Quick).err().map(AmpError::class),
        Some(FaultClass::Lifecycle)
    );
}

proptest! {
    #[test]
    fn property_heartbeat_tracks_elapsed_intervals(
        interval_ms in 1_u32..10_000,
        boot_tick in 0_u64..1_000_000_000,
        advances in prop::collection::vec(0_u64..30_000_000, 1..40),
    ) {
        let mut control = sim(
            ControlConfig {
                heartbeat_interval_ms: interval_ms,
                ..ControlConfig::default()
            },
            boot_tick,
        );
        control.boot().unwrap();
        let interval = u64::from(interval_ms) * 1_000;

        for advance in advances {
            control.clock().counter().advance(advance);
            let before = control.heartbeat_count();
            let polled = control.poll().unwrap();
            let now = control.clock().counter().value();
            let expected = ((now - boot_tick) / interval) as u32;

            prop_assert_eq!(control.heartbeat_count(), expected);
            prop_assert_eq!(polled.is_some(), expected != before);

            let record = control.record().unwrap();
            prop_assert_eq!(record.heartbeat_counter, expected);
            if polled.is_some() {
                prop_assert_eq!(record.uptime_ticks, now - boot_tick);
            }
        }
    }

    #[test]
    fn property_terminal_states_are_sticky(halt in any::<bool>(), follow_up in 0_u8..4) {
        let mut control = sim(ControlConfig::default(), 0);
        control.boot().unwrap();
        if halt {
            control.halt().unwrap();
        } else {
            control.fail("stop").unwrap();
        }
        let terminal = control.state();
        let snapshot = control.record().unwrap();

        let outcome = match follow_up {
            0 => control.halt(),
            1 => control.fail("again"),
            2 => control.start(),
            _ => control.run_memtest(MemtestMode::Quick).map(|_| ()),
        };
        prop_assert!(outcome.is_err());
        prop_assert_eq!(control.state(), terminal);
        prop_assert_eq!(control.record().unwrap(), snapshot);
    }
}
