//! Shared status record: the fixed-layout contract between the remote core
//! and the host.
//!
//! The record is little-endian and C-compatible. Both sides agree on the
//! layout at build time; `version` is informational and never consulted for
//! decoding. `magic` is the only validity gate.
//!
//! | Offset | Field |
//! |---|---|
//! | `0x00` | magic |
//! | `0x04` | version |
//! | `0x08` | state |
//! | `0x0C` | boot_count |
//! | `0x10` | boot_time (u64) |
//! | `0x18` | uptime_ticks (u64) |
//! | `0x20` | heartbeat_counter |
//! | `0x24` | heartbeat_interval_ms |
//! | `0x28` | memtest_status |
//! | `0x2C` | memtest_errors |
//! | `0x30` | memtest_bytes |
//! | `0x34` | messages_sent |
//! | `0x38` | messages_received |
//! | `0x3C` | reserved (8 words) |
//! | `0x5C` | debug_message (128 bytes) |

use alloc::borrow::Cow;
use alloc::string::String;
use core::fmt;

use crate::clock::{Uptime, TICKS_PER_SECOND};
use crate::{LifecycleState, SHARED_STATUS_SIZE};

/// Validity sentinel, `"RP3A"` in little-endian byte order.
pub const FIRMWARE_MAGIC: u32 = 0x5250_3341;
/// Encoded record size, including 4 bytes of tail padding.
pub const RECORD_SIZE: usize = 224;
/// Capacity of the debug message field, NUL terminator included.
pub const DEBUG_MESSAGE_CAPACITY: usize = 128;
/// Number of reserved words.
pub const RESERVED_WORDS: usize = 8;

/// Offset of `magic`.
pub const MAGIC_OFFSET: u32 = 0x00;
/// Offset of `version`.
pub const VERSION_OFFSET: u32 = 0x04;
/// Offset of `state`.
pub const STATE_OFFSET: u32 = 0x08;
/// Offset of `boot_count`.
pub const BOOT_COUNT_OFFSET: u32 = 0x0C;
/// Offset of `boot_time`.
pub const BOOT_TIME_OFFSET: u32 = 0x10;
/// Offset of `uptime_ticks`.
pub const UPTIME_TICKS_OFFSET: u32 = 0x18;
/// Offset of `heartbeat_counter`.
pub const HEARTBEAT_COUNTER_OFFSET: u32 = 0x20;
/// Offset of `heartbeat_interval_ms`.
pub const HEARTBEAT_INTERVAL_OFFSET: u32 = 0x24;
/// Offset of `memtest_status`.
pub const MEMTEST_STATUS_OFFSET: u32 = 0x28;
/// Offset of `memtest_errors`.
pub const MEMTEST_ERRORS_OFFSET: u32 = 0x2C;
/// Offset of `memtest_bytes`.
pub const MEMTEST_BYTES_OFFSET: u32 = 0x30;
/// Offset of `messages_sent`.
pub const MESSAGES_SENT_OFFSET: u32 = 0x34;
/// Offset of `messages_received`.
pub const MESSAGES_RECEIVED_OFFSET: u32 = 0x38;
/// Offset of the reserved words.
pub const RESERVED_OFFSET: u32 = 0x3C;
/// Offset of `debug_message`.
pub const DEBUG_MESSAGE_OFFSET: u32 = 0x5C;
/// End of the last field; the rest of the record is padding.
pub const RECORD_FIELDS_END: u32 = DEBUG_MESSAGE_OFFSET + DEBUG_MESSAGE_CAPACITY as u32;

const _: () = assert_record_layout();

#[allow(clippy::cast_possible_truncation)]
const fn assert_record_layout() {
    assert!(
        RESERVED_OFFSET + (RESERVED_WORDS as u32) * 4 == DEBUG_MESSAGE_OFFSET,
        "reserved words must end where the debug message starts"
    );
    assert!(RECORD_FIELDS_END == 220, "fields must end at byte 220");
    assert!(
        RECORD_SIZE as u32 == (RECORD_FIELDS_END + 7) & !7,
        "record size is the fields padded to 8-byte alignment"
    );
    assert!(
        RECORD_SIZE as u32 <= SHARED_STATUS_SIZE,
        "record must fit in the status sub-region"
    );
    assert!(
        BOOT_TIME_OFFSET % 8 == 0 && UPTIME_TICKS_OFFSET % 8 == 0,
        "64-bit fields must be naturally aligned"
    );
}

/// Firmware version packed as `major << 16 | minor << 8 | patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

/// Version written by this firmware.
pub const FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion::new(1, 0, 0);

const _: () = assert!(FIRMWARE_VERSION.pack() == 0x0001_0000);

impl FirmwareVersion {
    /// Creates a version triple.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Packs into the wire word.
    #[must_use]
    pub const fn pack(self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | self.patch as u32
    }

    /// Unpacks a wire word; the top byte is ignored.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn unpack(word: u32) -> Self {
        Self::new((word >> 16) as u8, (word >> 8) as u8, word as u8)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Self-test verdict as stored in `memtest_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum MemtestStatus {
    /// No test has run since boot.
    #[default]
    NotRun = 0,
    /// Last test found no errors.
    Pass = 1,
    /// Last test found at least one error.
    Fail = 2,
}

impl MemtestStatus {
    /// Wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decodes a wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::NotRun),
            1 => Some(Self::Pass),
            2 => Some(Self::Fail),
            _ => None,
        }
    }

    /// Verdict for an aggregate error count.
    #[must_use]
    pub const fn from_errors(errors: u32) -> Self {
        if errors == 0 {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    /// Upper-case label used by monitors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotRun => "NOT RUN",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }
}

impl fmt::Display for MemtestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// NUL-terminated ASCII text in a fixed 128-byte field.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebugMessage {
    bytes: [u8; DEBUG_MESSAGE_CAPACITY],
}

impl DebugMessage {
    /// Encodes `text`, truncating to 127 bytes.
    ///
    /// Non-ASCII characters and embedded NULs become `?`, one per character.
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut bytes = [0; DEBUG_MESSAGE_CAPACITY];
        for (slot, ch) in bytes[..DEBUG_MESSAGE_CAPACITY - 1].iter_mut().zip(text.chars()) {
            *slot = match u8::try_from(ch) {
                Ok(byte) if byte.is_ascii() && byte != 0 => byte,
                _ => b'?',
            };
        }
        Self { bytes }
    }

    /// Wraps raw field bytes read from memory, unvalidated.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DEBUG_MESSAGE_CAPACITY]) -> Self {
        Self { bytes }
    }

    /// Raw field bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DEBUG_MESSAGE_CAPACITY] {
        &self.bytes
    }

    /// Length up to the first NUL, or the whole field when none is present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(DEBUG_MESSAGE_CAPACITY)
    }

    /// Returns `true` when the message is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }

    /// Text before the first NUL; invalid UTF-8 from foreign writers is
    /// replaced rather than rejected.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes[..self.len()])
    }
}

impl Default for DebugMessage {
    fn default() -> Self {
        Self::from_bytes([0; DEBUG_MESSAGE_CAPACITY])
    }
}

impl fmt::Debug for DebugMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DebugMessage").field(&self.text()).finish()
    }
}

impl fmt::Display for DebugMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Decoded status record.
///
/// `state` and `memtest_status` keep their raw wire values so a record
/// written by a different firmware build still decodes; use
/// [`StatusRecord::lifecycle_state`] and [`StatusRecord::memtest_verdict`]
/// for the typed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusRecord {
    /// Validity sentinel.
    pub magic: u32,
    /// Packed firmware version.
    pub version: u32,
    /// Raw lifecycle state.
    pub state: u32,
    /// Boots observed since the window was last cleared.
    pub boot_count: u32,
    /// Tick value captured at initialization.
    pub boot_time: u64,
    /// Ticks since `boot_time` at the last heartbeat.
    pub uptime_ticks: u64,
    /// Heartbeats since boot.
    pub heartbeat_counter: u32,
    /// Heartbeat period in milliseconds.
    pub heartbeat_interval_ms: u32,
    /// Raw self-test verdict.
    pub memtest_status: u32,
    /// Errors found by the last self-test.
    pub memtest_errors: u32,
    /// Bytes covered by the last self-test.
    pub memtest_bytes: u32,
    /// Messages sent (placeholder, always written as 0).
    pub messages_sent: u32,
    /// Messages received (placeholder, always written as 0).
    pub messages_received: u32,
    /// Reserved words, never interpreted.
    pub reserved: [u32; RESERVED_WORDS],
    /// Last debug message.
    pub debug_message: DebugMessage,
}

impl StatusRecord {
    /// Returns `true` when `magic` is the protocol sentinel.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.magic == FIRMWARE_MAGIC
    }

    /// Typed lifecycle state, or `None` for an unknown wire value.
    #[must_use]
    pub const fn lifecycle_state(&self) -> Option<LifecycleState> {
        LifecycleState::from_u32(self.state)
    }

    /// Typed self-test verdict, or `None` for an unknown wire value.
    #[must_use]
    pub const fn memtest_verdict(&self) -> Option<MemtestStatus> {
        MemtestStatus::from_u32(self.memtest_status)
    }

    /// Unpacked firmware version.
    #[must_use]
    pub const fn firmware_version(&self) -> FirmwareVersion {
        FirmwareVersion::unpack(self.version)
    }

    /// Uptime in whole seconds.
    #[must_use]
    pub const fn uptime(&self) -> Uptime {
        Uptime(self.uptime_ticks / TICKS_PER_SECOND)
    }

    /// Encodes the record into its little-endian wire image.
    #[must_use]
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0; RECORD_SIZE];
        put_u32(&mut out, MAGIC_OFFSET, self.magic);
        put_u32(&mut out, VERSION_OFFSET, self.version);
        put_u32(&mut out, STATE_OFFSET, self.state);
        put_u32(&mut out, BOOT_COUNT_OFFSET, self.boot_count);
        put_u64(&mut out, BOOT_TIME_OFFSET, self.boot_time);
        put_u64(&mut out, UPTIME_TICKS_OFFSET, self.uptime_ticks);
        put_u32(&mut out, HEARTBEAT_COUNTER_OFFSET, self.heartbeat_counter);
        put_u32(&mut out, HEARTBEAT_INTERVAL_OFFSET, self.heartbeat_interval_ms);
        put_u32(&mut out, MEMTEST_STATUS_OFFSET, self.memtest_status);
        put_u32(&mut out, MEMTEST_ERRORS_OFFSET, self.memtest_errors);
        put_u32(&mut out, MEMTEST_BYTES_OFFSET, self.memtest_bytes);
        put_u32(&mut out, MESSAGES_SENT_OFFSET, self.messages_sent);
        put_u32(&mut out, MESSAGES_RECEIVED_OFFSET, self.messages_received);
        for (offset, word) in (RESERVED_OFFSET..).step_by(4).zip(self.reserved) {
            put_u32(&mut out, offset, word);
        }
        let start = DEBUG_MESSAGE_OFFSET as usize;
        out[start..start + DEBUG_MESSAGE_CAPACITY].copy_from_slice(self.debug_message.as_bytes());
        out
    }

    /// Decodes a wire image. Every bit pattern decodes; validity is judged
    /// separately through [`StatusRecord::is_valid`].
    #[must_use]
    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut reserved = [0; RESERVED_WORDS];
        for (offset, word) in (RESERVED_OFFSET..).step_by(4).zip(reserved.iter_mut()) {
            *word = get_u32(bytes, offset);
        }
        let start = DEBUG_MESSAGE_OFFSET as usize;
        let mut debug = [0; DEBUG_MESSAGE_CAPACITY];
        debug.copy_from_slice(&bytes[start..start + DEBUG_MESSAGE_CAPACITY]);

        Self {
            magic: get_u32(bytes, MAGIC_OFFSET),
            version: get_u32(bytes, VERSION_OFFSET),
            state: get_u32(bytes, STATE_OFFSET),
            boot_count: get_u32(bytes, BOOT_COUNT_OFFSET),
            boot_time: get_u64(bytes, BOOT_TIME_OFFSET),
            uptime_ticks: get_u64(bytes, UPTIME_TICKS_OFFSET),
            heartbeat_counter: get_u32(bytes, HEARTBEAT_COUNTER_OFFSET),
            heartbeat_interval_ms: get_u32(bytes, HEARTBEAT_INTERVAL_OFFSET),
            memtest_status: get_u32(bytes, MEMTEST_STATUS_OFFSET),
            memtest_errors: get_u32(bytes, MEMTEST_ERRORS_OFFSET),
            memtest_bytes: get_u32(bytes, MEMTEST_BYTES_OFFSET),
            messages_sent: get_u32(bytes, MESSAGES_SENT_OFFSET),
            messages_received: get_u32(bytes, MESSAGES_RECEIVED_OFFSET),
            reserved,
            debug_message: DebugMessage::from_bytes(debug),
        }
    }
}

fn put_u32(out: &mut [u8; RECORD_SIZE], offset: u32, value: u32) {
    let offset = offset as usize;
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(out: &mut [u8; RECORD_SIZE], offset: u32, value: u64) {
    let offset = offset as usize;
    out[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(bytes: &[u8; RECORD_SIZE], offset: u32) -> u32 {
    let offset = offset as usize;
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

fn get_u64(bytes: &[u8; RECORD_SIZE], offset: u32) -> u64 {
    let offset = offset as usize;
    let mut word = [0; 8];
    word.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(word)
}
