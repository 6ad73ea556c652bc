use core::fmt;

/// Remote-core lifecycle state as published in the status record.
///
/// The discriminants are the wire values of the `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u32)]
pub enum LifecycleState {
    /// Before any status record exists.
    #[default]
    Boot = 0,
    /// Record zero-filled and header populated.
    Init = 1,
    /// Steady-state heartbeat loop.
    Running = 2,
    /// Memory self-test in progress.
    Memtest = 3,
    /// Initialized, then failed. Terminal.
    Error = 4,
    /// Stopped on request. Terminal.
    Halted = 5,
}

impl LifecycleState {
    /// Every state in wire-value order.
    pub const ALL: [Self; 6] = [
        Self::Boot,
        Self::Init,
        Self::Running,
        Self::Memtest,
        Self::Error,
        Self::Halted,
    ];

    /// Converts the state to its wire value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Converts a wire value back into a state.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Boot),
            1 => Some(Self::Init),
            2 => Some(Self::Running),
            3 => Some(Self::Memtest),
            4 => Some(Self::Error),
            5 => Some(Self::Halted),
            _ => None,
        }
    }

    /// Upper-case display name shared by the firmware and host renderings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boot => "BOOT",
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Memtest => "MEMTEST",
            Self::Error => "ERROR",
            Self::Halted => "HALTED",
        }
    }

    /// States with no outgoing transitions; only an external reset leaves them.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Halted)
    }

    /// Returns `true` when `self -> to` is an edge of the state machine.
    ///
    /// ```text
    /// BOOT -> INIT | ERROR
    /// INIT -> RUNNING | ERROR
    /// RUNNING -> MEMTEST | ERROR | HALTED
    /// MEMTEST -> RUNNING | ERROR | HALTED
    /// ```
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Boot, Self::Init | Self::Error)
                | (Self::Init, Self::Running | Self::Error)
                | (Self::Running, Self::Memtest | Self::Error | Self::Halted)
                | (Self::Memtest, Self::Running | Self::Error | Self::Halted)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState;

    #[test]
    fn default_state_is_boot() {
        assert_eq!(LifecycleState::default(), LifecycleState::Boot);
    }

    #[test]
    fn wire_values_roundtrip_and_unknown_values_are_rejected() {
        for state in LifecycleState::ALL {
            assert_eq!(LifecycleState::from_u32(state.as_u32()), Some(state));
        }
        assert_eq!(LifecycleState::from_u32(6), None);
        assert_eq!(LifecycleState::from_u32(u32::MAX), None);
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in [LifecycleState::Error, LifecycleState::Halted] {
            assert!(from.is_terminal());
            for to in LifecycleState::ALL {
                assert!(!from.can_transition(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn init_only_leads_to_running_or_error() {
        let reachable: Vec<_> = LifecycleState::ALL
            .into_iter()
            .filter(|to| LifecycleState::Init.can_transition(*to))
            .collect();
        assert_eq!(
            reachable,
            vec![LifecycleState::Running, LifecycleState::Error]
        );
    }

    #[test]
    fn memtest_round_trip_through_running_is_legal() {
        assert!(LifecycleState::Running.can_transition(LifecycleState::Memtest));
        assert!(LifecycleState::Memtest.can_transition(LifecycleState::Running));
        assert!(!LifecycleState::Init.can_transition(LifecycleState::Memtest));
        assert!(!LifecycleState::Running.can_transition(LifecycleState::Running));
    }
}
