//! Host-side tools for the RPi3 AMP shared status record.

use env_logger as _;

/// Wall-clock counter source.
pub mod host_clock;
/// Read-only page mapping used to copy records out of memory.
pub mod mapping;
/// Boxed text rendering of records and the memory map.
pub mod render;
/// Simulated remote core producing window images.
pub mod simulate;
/// Record sources: `/dev/mem` or an image file.
pub mod source;
