use thiserror::Error;

use crate::{AddressRange, LifecycleState};

/// Fault classes from the protocol's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Host-observable: the record is absent or unrecognizable.
    Validity,
    /// Remote-observable: the memory self-test found errors.
    Integrity,
    /// Lifecycle fault: a terminal or illegal state was requested.
    Lifecycle,
    /// Static geometry or configuration mismatch detected before any write.
    Geometry,
}

/// Errors raised by fallible protocol operations.
///
/// None of these cross the host/remote boundary; the remote core records
/// faults in the status record instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AmpError {
    /// Record magic did not match the protocol sentinel.
    #[error("status record magic {found:#010x} is not the protocol sentinel")]
    InvalidMagic {
        /// Value found in the magic field.
        found: u32,
    },
    /// Word-granular access used an address that is not 4-byte aligned.
    #[error("address {addr:#010x} is not word aligned")]
    UnalignedAddress {
        /// Offending address.
        addr: u32,
    },
    /// A range does not fit inside the memory it must live in.
    #[error("range {inner} lies outside {outer}")]
    RangeOutOfBounds {
        /// Range that was requested.
        inner: AddressRange,
        /// Range that was available.
        outer: AddressRange,
    },
    /// Two sub-regions that must be disjoint overlap.
    #[error("ranges {first} and {second} overlap")]
    OverlappingRanges {
        /// First range.
        first: AddressRange,
        /// Second range.
        second: AddressRange,
    },
    /// The status region cannot hold a full record.
    #[error("status record needs {needed} bytes but the status region holds {available}")]
    RegionTooSmall {
        /// Bytes required.
        needed: u32,
        /// Bytes available.
        available: u32,
    },
    /// Heartbeat interval of zero would make the cadence undefined.
    #[error("heartbeat interval must be at least one millisecond")]
    ZeroHeartbeatInterval,
    /// Lifecycle transition is not part of the state machine.
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
    /// Operation requires the RUNNING state.
    #[error("operation requires RUNNING, core is {state}")]
    NotRunning {
        /// State the core was in.
        state: LifecycleState,
    },
}

impl AmpError {
    /// Returns the taxonomy class of this error.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::InvalidMagic { .. } => FaultClass::Validity,
            Self::IllegalTransition { .. } | Self::NotRunning { .. } => FaultClass::Lifecycle,
            Self::UnalignedAddress { .. }
            | Self::RangeOutOfBounds { .. }
            | Self::OverlappingRanges { .. }
            | Self::RegionTooSmall { .. }
            | Self::ZeroHeartbeatInterval => FaultClass::Geometry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AmpError, FaultClass};
    use crate::{AddressRange, LifecycleState};

    #[test]
    fn class_mapping_matches_taxonomy() {
        assert_eq!(
            AmpError::InvalidMagic { found: 0 }.class(),
            FaultClass::Validity
        );
        assert_eq!(
            AmpError::IllegalTransition {
                from: LifecycleState::Error,
                to: LifecycleState::Running,
            }
            .class(),
            FaultClass::Lifecycle
        );
        assert_eq!(
            AmpError::NotRunning {
                state: LifecycleState::Init
            }
            .class(),
            FaultClass::Lifecycle
        );
        assert_eq!(
            AmpError::UnalignedAddress { addr: 2 }.class(),
            FaultClass::Geometry
        );
        assert_eq!(AmpError::ZeroHeartbeatInterval.class(), FaultClass::Geometry);
    }

    #[test]
    fn messages_name_the_offending_values() {
        let error = AmpError::InvalidMagic { found: 0xDEAD_BEEF };
        assert_eq!(
            error.to_string(),
            "status record magic 0xdeadbeef is not the protocol sentinel"
        );

        let error = AmpError::IllegalTransition {
            from: LifecycleState::Init,
            to: LifecycleState::Memtest,
        };
        assert_eq!(error.to_string(), "illegal lifecycle transition INIT -> MEMTEST");

        let error = AmpError::RangeOutOfBounds {
            inner: AddressRange::new(0x1000, 0x10),
            outer: AddressRange::new(0x2000, 0x10),
        };
        assert_eq!(
            error.to_string(),
            "range 0x00001000-0x0000100f lies outside 0x00002000-0x0000200f"
        );
    }
}
