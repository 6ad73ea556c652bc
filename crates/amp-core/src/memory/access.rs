//! Deterministic alignment and containment checks for shared-window accesses.

use crate::{AddressRange, AmpError};

/// Byte width of the architectural word used for every record field.
pub const WORD_BYTES: u32 = 4;

/// Validates alignment for 32-bit accesses.
///
/// # Errors
///
/// Returns [`AmpError::UnalignedAddress`] when `addr` is not a multiple of
/// [`WORD_BYTES`].
pub const fn validate_word_alignment(addr: u32) -> Result<(), AmpError> {
    if addr % WORD_BYTES == 0 {
        Ok(())
    } else {
        Err(AmpError::UnalignedAddress { addr })
    }
}

/// Validates that `inner` lies entirely inside `outer`.
///
/// # Errors
///
/// Returns [`AmpError::RangeOutOfBounds`] when any byte of `inner` falls
/// outside `outer`.
pub const fn validate_range_within(outer: AddressRange, inner: AddressRange) -> Result<(), AmpError> {
    if outer.contains_range(inner) {
        Ok(())
    } else {
        Err(AmpError::RangeOutOfBounds { inner, outer })
    }
}
