//! Text rendering of the status record and the physical memory map.
//!
//! Everything renders into a `String` so the CLI and the tests share one
//! code path. Boxes are drawn with fixed-width rows; values wider than their
//! column are cut rather than allowed to break the frame, except the debug
//! message, which wraps onto continuation rows.

use std::fmt;
use std::fmt::Write as _;

use amp_core::{
    LifecycleState, MemtestStatus, Observation, StatusRecord, FIRMWARE_MAGIC, PHYSICAL_MEMORY_MAP,
    TICKS_PER_SECOND,
};

/// Characters between the two vertical box edges.
pub const BOX_WIDTH: usize = 62;

const LABEL_WIDTH: usize = 14;
const VALUE_WIDTH: usize = BOX_WIDTH - LABEL_WIDTH - 5;

/// Uptime in ticks, rendered as `Nd HH:MM:SS` or `HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostUptime(pub u64);

impl fmt::Display for HostUptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.0 / TICKS_PER_SECOND;
        let days = total / 86_400;
        let hours = (total / 3_600) % 24;
        let minutes = (total / 60) % 60;
        let seconds = total % 60;
        if days > 0 {
            write!(f, "{days}d {hours:02}:{minutes:02}:{seconds:02}")
        } else {
            write!(f, "{hours:02}:{minutes:02}:{seconds:02}")
        }
    }
}

struct Frame {
    out: String,
}

impl Frame {
    fn new(title: &str) -> Self {
        let mut frame = Self { out: String::new() };
        frame.rule('╔', '╗');
        frame.text(&format!("{title:^width$}", width = BOX_WIDTH - 2));
        frame.rule('╠', '╣');
        frame
    }

    fn rule(&mut self, left: char, right: char) {
        self.out.push(left);
        self.out.push_str(&"═".repeat(BOX_WIDTH));
        self.out.push(right);
        self.out.push('\n');
    }

    fn text(&mut self, text: &str) {
        let clipped: String = text.chars().take(BOX_WIDTH - 2).collect();
        let _ = writeln!(self.out, "║ {clipped:<width$} ║", width = BOX_WIDTH - 2);
    }

    fn field(&mut self, label: &str, value: impl fmt::Display) {
        let value: String = value.to_string().chars().take(VALUE_WIDTH).collect();
        self.text(&format!("{label:<LABEL_WIDTH$}: {value}"));
    }

    /// Field whose value wraps onto continuation rows under the value
    /// column. Characters outside printable ASCII render as `?`.
    fn wrapped_field(&mut self, label: &str, value: &str) {
        let printable: Vec<char> = value
            .chars()
            .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
            .collect();
        let mut rows = printable.chunks(VALUE_WIDTH);
        let first: String = rows.next().unwrap_or_default().iter().collect();
        self.text(&format!("{label:<LABEL_WIDTH$}: {first}"));
        for row in rows {
            let row: String = row.iter().collect();
            self.text(&format!("{:<LABEL_WIDTH$}  {row}", ""));
        }
    }

    fn divider(&mut self) {
        self.rule('╠', '╣');
    }

    fn finish(mut self) -> String {
        self.rule('╚', '╝');
        self.out
    }
}

/// Renders one observation of the status region.
///
/// A magic mismatch renders as "not running" with the expected magic; no
/// other field of such a record is shown.
#[must_use]
pub fn render_status(observation: &Observation) -> String {
    let mut frame = Frame::new("RPi3 AMP - Core 3 Status");
    match observation {
        Observation::NotRunning { magic } => {
            frame.text(&format!(
                "Invalid magic: {magic:#010X} (expected {FIRMWARE_MAGIC:#010X})"
            ));
            frame.text("Core 3 firmware may not be running.");
        }
        Observation::Live(record) => render_record(&mut frame, record),
    }
    frame.finish()
}

fn render_record(frame: &mut Frame, record: &StatusRecord) {
    frame.field("Magic", format_args!("{:#010X} (valid)", record.magic));
    frame.field("FW Version", record.firmware_version());
    frame.divider();
    frame.field("State", state_label(record));
    frame.field("Boot Count", record.boot_count);
    frame.field("Uptime", HostUptime(record.uptime_ticks));
    frame.field("Heartbeat", record.heartbeat_counter);
    frame.field(
        "Interval",
        format_args!("{} ms", record.heartbeat_interval_ms),
    );
    frame.divider();
    frame.field("Memory Test", memtest_label(record));
    frame.field(
        "IPC Stats",
        format_args!(
            "TX={}, RX={}",
            record.messages_sent, record.messages_received
        ),
    );
    frame.divider();
    frame.wrapped_field("Debug Msg", &record.debug_message.text());
}

fn state_label(record: &StatusRecord) -> String {
    match record.lifecycle_state() {
        Some(state) => state.name().to_string(),
        None => format!("UNKNOWN ({})", record.state),
    }
}

fn memtest_label(record: &StatusRecord) -> String {
    match record.memtest_verdict() {
        Some(MemtestStatus::NotRun) => "Not run".to_string(),
        Some(MemtestStatus::Pass) => format!("PASS ({} bytes)", record.memtest_bytes),
        Some(MemtestStatus::Fail) => format!(
            "FAIL ({} errors in {} bytes)",
            record.memtest_errors, record.memtest_bytes
        ),
        None => format!("UNKNOWN ({})", record.memtest_status),
    }
}

/// Renders the physical memory map, marking the shared sub-regions.
#[must_use]
pub fn render_memory_map() -> String {
    let mut frame = Frame::new("RPi3 AMP - Physical Memory Map");
    for descriptor in PHYSICAL_MEMORY_MAP {
        let marker = if descriptor.region.is_shared() { "->" } else { "" };
        frame.text(&format!(
            "{marker:<2} {:<16} {}  {:>9}",
            descriptor.region.label(),
            descriptor.range,
            format_size(descriptor.range.len),
        ));
    }
    frame.finish()
}

fn format_size(bytes: u32) -> String {
    const KIB: u32 = 1024;
    const MIB: u32 = KIB * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MiB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KiB", bytes / KIB)
    } else {
        format!("{bytes} B")
    }
}

/// Returns `true` when the record reports a state the host should flag.
#[must_use]
pub fn needs_attention(observation: &Observation) -> bool {
    match observation.record() {
        Some(record) => {
            matches!(record.lifecycle_state(), Some(LifecycleState::Error) | None)
                || record.memtest_verdict() == Some(MemtestStatus::Fail)
        }
        None => true,
    }
}
