//! CLI entry point for the `amp-status` host monitor.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use amp_core::{
    DiagSink, LifecycleState, LogSink, MemtestMode, MemtestStatus, Observation, StuckBit,
};
use amp_monitor::render::{needs_attention, render_memory_map, render_status};
use amp_monitor::simulate::{self, parse_fault, parse_u32, parse_u64, SimulationOptions};
use amp_monitor::source::{RecordSource, DEFAULT_ADDRESS, DEFAULT_DEVICE};
use env_logger::Env;
use libc as _;
use log::LevelFilter;
#[cfg(test)]
use tempfile as _;

const USAGE_TEXT: &str = "\
Usage: amp-status <command> [options]

Commands:
  show                 Read the Core 3 status record once
  watch                Redraw the status record until interrupted
  map                  Print the physical memory map
  simulate -o <image>  Run a simulated Core 3 and write the shared window

Source options (show, watch):
  -d, --device <path>      File holding physical memory (default: /dev/mem)
  -a, --address <addr>     Byte offset of the record (default: 0x20A00000)

Watch options:
  -i, --interval <ms>      Refresh period (default: 500)
  -n, --count <n>          Stop after n refreshes

Simulate options:
  -o, --output <file>      Image path
      --heartbeats <n>     Heartbeat intervals to let elapse (default: 3)
      --heartbeat-ms <ms>  Heartbeat interval (default: 5000)
      --memtest <mode>     Boot self-test: none, quick or full (default: quick)
      --stuck <a:b:l>      Stuck bit ADDR:BIT:LEVEL in the memtest region
      --halt               Halt the core after the last heartbeat
      --realtime           Follow the wall clock instead of simulated time

Options:
  -v, --verbose            Debug logging on stderr
  -h, --help               Show this help message

Examples:
  sudo amp-status show
  sudo amp-status watch -i 250
  amp-status simulate -o window.bin --stuck 0x20A02400:7:0 --memtest full
  amp-status show --device window.bin --address 0
";

const DEFAULT_REFRESH_MS: u64 = 500;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Show(SourceArgs),
    Watch(WatchArgs),
    Map,
    Simulate(SimulateArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct SourceArgs {
    device: PathBuf,
    address: u64,
}

impl Default for SourceArgs {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            address: DEFAULT_ADDRESS,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct WatchArgs {
    source: SourceArgs,
    interval_ms: u64,
    count: Option<u64>,
}

#[derive(Debug, PartialEq, Eq)]
struct SimulateArgs {
    output: PathBuf,
    options: SimulationOptions,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    command: Command,
    verbose: bool,
}

#[derive(Debug)]
enum ParseResult {
    Command(Cli),
    Help,
}

fn parse_args(args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut verbose = false;
    let mut rest = Vec::new();
    for arg in args {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }
        if arg == "--verbose" || arg == "-v" {
            verbose = true;
            continue;
        }
        rest.push(arg);
    }

    let mut rest = rest.into_iter();
    let first = rest.next().ok_or_else(|| "missing command".to_string())?;
    let command_str = first.to_string_lossy().to_string();

    let command = match command_str.as_str() {
        "show" => Command::Show(parse_show_args(rest)?),
        "watch" => Command::Watch(parse_watch_args(rest)?),
        "map" => {
            if let Some(extra) = rest.next() {
                return Err(format!("unexpected argument: {}", extra.to_string_lossy()));
            }
            Command::Map
        }
        "simulate" => Command::Simulate(parse_simulate_args(rest)?),
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(ParseResult::Command(Cli { command, verbose }))
}

fn take_value(args: &mut impl Iterator<Item = OsString>, flag: &str) -> Result<String, String> {
    args.next()
        .map(|value| value.to_string_lossy().to_string())
        .ok_or_else(|| format!("missing value for {flag}"))
}

/// Consumes a source option if `arg` is one; returns whether it was.
fn parse_source_option(
    arg: &OsString,
    args: &mut impl Iterator<Item = OsString>,
    source: &mut SourceArgs,
) -> Result<bool, String> {
    if arg == "-d" || arg == "--device" {
        source.device = PathBuf::from(take_value(args, "--device")?);
        return Ok(true);
    }
    if arg == "-a" || arg == "--address" {
        source.address = parse_u64(&take_value(args, "--address")?)?;
        return Ok(true);
    }
    Ok(false)
}

#[allow(clippy::while_let_on_iterator)]
fn parse_show_args(mut args: impl Iterator<Item = OsString>) -> Result<SourceArgs, String> {
    let mut source = SourceArgs::default();
    while let Some(arg) = args.next() {
        if parse_source_option(&arg, &mut args, &mut source)? {
            continue;
        }
        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }
    Ok(source)
}

#[allow(clippy::while_let_on_iterator)]
fn parse_watch_args(mut args: impl Iterator<Item = OsString>) -> Result<WatchArgs, String> {
    let mut source = SourceArgs::default();
    let mut interval_ms = DEFAULT_REFRESH_MS;
    let mut count = None;

    while let Some(arg) = args.next() {
        if parse_source_option(&arg, &mut args, &mut source)? {
            continue;
        }
        if arg == "-i" || arg == "--interval" {
            interval_ms = parse_u64(&take_value(&mut args, "--interval")?)?;
            if interval_ms == 0 {
                return Err("refresh interval must be at least 1 ms".to_string());
            }
            continue;
        }
        if arg == "-n" || arg == "--count" {
            count = Some(parse_u64(&take_value(&mut args, "--count")?)?);
            continue;
        }
        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    Ok(WatchArgs {
        source,
        interval_ms,
        count,
    })
}

#[allow(clippy::while_let_on_iterator)]
fn parse_simulate_args(mut args: impl Iterator<Item = OsString>) -> Result<SimulateArgs, String> {
    let mut output: Option<PathBuf> = None;
    let mut options = SimulationOptions::default();

    while let Some(arg) = args.next() {
        if arg == "-o" || arg == "--output" {
            output = Some(PathBuf::from(take_value(&mut args, "--output")?));
            continue;
        }
        if arg == "--heartbeats" {
            options.heartbeats = parse_u32(&take_value(&mut args, "--heartbeats")?)?;
            continue;
        }
        if arg == "--heartbeat-ms" {
            options.heartbeat_interval_ms = parse_u32(&take_value(&mut args, "--heartbeat-ms")?)?;
            continue;
        }
        if arg == "--memtest" {
            options.boot_memtest = parse_memtest(&take_value(&mut args, "--memtest")?)?;
            continue;
        }
        if arg == "--stuck" {
            let fault: StuckBit = parse_fault(&take_value(&mut args, "--stuck")?)?;
            options.faults.push(fault);
            continue;
        }
        if arg == "--halt" {
            options.halt = true;
            continue;
        }
        if arg == "--realtime" {
            options.realtime = true;
            continue;
        }
        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    let output = output.ok_or_else(|| "missing output path (-o)".to_string())?;
    Ok(SimulateArgs { output, options })
}

fn parse_memtest(text: &str) -> Result<Option<MemtestMode>, String> {
    if text.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    MemtestMode::from_name(&text.to_ascii_lowercase())
        .map(Some)
        .ok_or_else(|| format!("unknown memtest mode: {text} (expected none, quick or full)"))
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn record_source(args: &SourceArgs) -> RecordSource {
    RecordSource::new(&args.device, args.address)
}

fn run_show(args: &SourceArgs) -> Result<(), i32> {
    match record_source(args).observe() {
        Ok(observation) => {
            print!("{}", render_status(&observation));
            warn_on_attention(&observation);
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e}");
            Err(1)
        }
    }
}

fn warn_on_attention(observation: &Observation) {
    if !needs_attention(observation) {
        return;
    }
    match observation.record() {
        Some(record) => log::warn!(
            "core 3 needs attention: state {}, memtest status {}",
            record.state,
            record.memtest_status
        ),
        None => log::warn!("core 3 needs attention: no valid status record"),
    }
}

fn run_watch(args: &WatchArgs) -> Result<(), i32> {
    let source = record_source(&args.source);
    let mut refresh: u64 = 0;
    loop {
        let observation = match source.observe() {
            Ok(observation) => observation,
            Err(e) => {
                eprintln!("error: {e}");
                return Err(1);
            }
        };
        refresh += 1;
        print!("\x1b[2J\x1b[H");
        print!("{}", render_status(&observation));
        warn_on_attention(&observation);
        println!(
            "Refresh {refresh} every {} ms from {} at {:#x}. Press Ctrl+C to exit.",
            args.interval_ms,
            source.path().display(),
            source.offset()
        );

        if args.count.is_some_and(|count| refresh >= count) {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(args.interval_ms));
    }
}

fn run_simulate(args: &SimulateArgs, verbose: bool) -> Result<(), i32> {
    let simulation = match simulate::run(&args.options) {
        Ok(simulation) => simulation,
        Err(e) => {
            eprintln!("error: simulation failed: {e}");
            return Err(1);
        }
    };

    if verbose {
        let mut sink = LogSink;
        for event in &simulation.events {
            sink.on_event(*event);
        }
    }

    if let Err(e) = simulation.write_image(&args.output) {
        eprintln!("error: failed to write image: {e}");
        return Err(1);
    }

    let record = &simulation.record;
    println!(
        "Simulated Core 3: {} after {} heartbeats, memtest {} -> {} ({} bytes)",
        record
            .lifecycle_state()
            .map_or("UNKNOWN", LifecycleState::name),
        record.heartbeat_counter,
        record
            .memtest_verdict()
            .map_or("UNKNOWN", MemtestStatus::name),
        args.output.display(),
        simulation.image.len()
    );
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(cli)) => {
            init_logging(cli.verbose);
            let result = match &cli.command {
                Command::Show(args) => run_show(args),
                Command::Watch(args) => run_watch(args),
                Command::Map => {
                    print!("{}", render_memory_map());
                    Ok(())
                }
                Command::Simulate(args) => run_simulate(args, cli.verbose),
            };
            match result {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::PathBuf;

    fn args(list: &[&str]) -> impl Iterator<Item = OsString> {
        list.iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn command(list: &[&str]) -> Cli {
        match parse_args(args(list)).expect("valid args should parse") {
            ParseResult::Command(cli) => cli,
            ParseResult::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn show_defaults_to_physical_memory() {
        let cli = command(&["show"]);
        assert_eq!(cli.command, Command::Show(SourceArgs::default()));
        assert!(!cli.verbose);
    }

    #[test]
    fn show_accepts_device_and_address() {
        let cli = command(&["show", "-d", "window.bin", "--address", "0", "-v"]);
        assert_eq!(
            cli.command,
            Command::Show(SourceArgs {
                device: PathBuf::from("window.bin"),
                address: 0,
            })
        );
        assert!(cli.verbose);
    }

    #[test]
    fn watch_defaults_to_half_second_refresh() {
        let cli = command(&["watch", "--count", "2"]);
        assert_eq!(
            cli.command,
            Command::Watch(WatchArgs {
                source: SourceArgs::default(),
                interval_ms: 500,
                count: Some(2),
            })
        );
    }

    #[test]
    fn watch_rejects_zero_interval() {
        let error = parse_args(args(&["watch", "-i", "0"])).expect_err("zero interval");
        assert!(error.contains("at least 1 ms"));
    }

    #[test]
    fn simulate_collects_faults_and_modes() {
        let cli = command(&[
            "simulate",
            "-o",
            "out.bin",
            "--memtest",
            "FULL",
            "--stuck",
            "0x20A02400:7:0",
            "--stuck",
            "0x20A02800:0:1",
            "--heartbeats",
            "10",
            "--halt",
        ]);
        let Command::Simulate(sim) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(sim.output, PathBuf::from("out.bin"));
        assert_eq!(sim.options.boot_memtest, Some(MemtestMode::Full));
        assert_eq!(sim.options.faults.len(), 2);
        assert_eq!(sim.options.heartbeats, 10);
        assert!(sim.options.halt);
        assert!(!sim.options.realtime);
    }

    #[test]
    fn simulate_requires_output() {
        let error = parse_args(args(&["simulate"])).expect_err("missing output");
        assert!(error.contains("missing output"));
    }

    #[test]
    fn memtest_mode_names() {
        assert_eq!(parse_memtest("none"), Ok(None));
        assert_eq!(parse_memtest("quick"), Ok(Some(MemtestMode::Quick)));
        assert!(parse_memtest("slow").is_err());
    }

    #[test]
    fn parses_help_flag_anywhere() {
        let result = parse_args(args(&["show", "--help"])).expect("help should parse");
        assert!(matches!(result, ParseResult::Help));
    }

    #[test]
    fn rejects_unknown_command_and_option() {
        let error = parse_args(args(&["unknown"])).expect_err("unknown command");
        assert!(error.contains("unknown command"));
        let error = parse_args(args(&["show", "--bogus"])).expect_err("unknown option");
        assert!(error.contains("unknown option"));
        let error = parse_args(args(&["map", "extra"])).expect_err("extra argument");
        assert!(error.contains("unexpected argument"));
    }

    #[test]
    fn missing_command_is_an_error() {
        let error = parse_args(std::iter::empty()).expect_err("missing command");
        assert!(error.contains("missing command"));
    }
}
