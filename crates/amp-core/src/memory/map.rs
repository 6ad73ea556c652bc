//! Fixed BCM2837 physical memory map shared by the host and the remote core.

use core::fmt;

/// Base address of the RAM owned by the host OS.
pub const LINUX_RAM_BASE: u32 = 0x0000_0000;
/// Size of the RAM owned by the host OS (512 MiB).
pub const LINUX_RAM_SIZE: u32 = 0x2000_0000;
/// Load address of the remote-core firmware image.
pub const AMP_CODE_BASE: u32 = 0x2000_0000;
/// Size of the remote-core code/data area (10 MiB).
pub const AMP_CODE_SIZE: u32 = 0x00A0_0000;
/// Base address of the shared window.
pub const SHARED_MEM_BASE: u32 = 0x20A0_0000;
/// Size of the shared window (2 MiB).
pub const SHARED_MEM_SIZE: u32 = 0x0020_0000;
/// Address of the status sub-region holding the status record.
pub const SHARED_STATUS_ADDR: u32 = SHARED_MEM_BASE;
/// Size of the status sub-region (4 KiB).
pub const SHARED_STATUS_SIZE: u32 = 0x1000;
/// Address of the data sub-region, reserved for a future message queue.
pub const SHARED_DATA_ADDR: u32 = SHARED_MEM_BASE + 0x1000;
/// Size of the data sub-region (4 KiB).
pub const SHARED_DATA_SIZE: u32 = 0x1000;
/// Address of the memory self-test scratch sub-region.
pub const SHARED_MEMTEST_ADDR: u32 = SHARED_MEM_BASE + 0x2000;
/// Size of the memory self-test scratch sub-region (64 KiB).
pub const SHARED_MEMTEST_SIZE: u32 = 0x1_0000;
/// Base address of the SoC peripheral window.
pub const PERIPHERAL_BASE: u32 = 0x3F00_0000;
/// Size of the SoC peripheral window (16 MiB).
pub const PERIPHERAL_SIZE: u32 = 0x0100_0000;
/// Base address of the free-running 1 MHz system timer.
pub const SYSTIMER_BASE: u32 = PERIPHERAL_BASE + 0x3000;
/// Base address of the ARM local peripherals (mailboxes, local interrupts).
pub const ARM_LOCAL_BASE: u32 = 0x4000_0000;
/// Size of the ARM local peripheral block (4 KiB).
pub const ARM_LOCAL_SIZE: u32 = 0x1000;

/// Half-open physical address range `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressRange {
    /// First byte address.
    pub base: u32,
    /// Length in bytes.
    pub len: u32,
}

impl AddressRange {
    /// Creates a range starting at `base` spanning `len` bytes.
    #[must_use]
    pub const fn new(base: u32, len: u32) -> Self {
        Self { base, len }
    }

    /// Exclusive end address, widened so ranges touching 4 GiB do not wrap.
    #[must_use]
    pub const fn end(self) -> u64 {
        self.base as u64 + self.len as u64
    }

    /// Inclusive last address, or `None` for an empty range.
    #[must_use]
    pub const fn last(self) -> Option<u32> {
        if self.len == 0 {
            None
        } else {
            Some(self.base + (self.len - 1))
        }
    }

    /// Returns `true` when `addr` lies inside the range.
    #[must_use]
    pub const fn contains(self, addr: u32) -> bool {
        addr >= self.base && (addr as u64) < self.end()
    }

    /// Returns `true` when `other` lies entirely inside this range.
    #[must_use]
    pub const fn contains_range(self, other: Self) -> bool {
        other.base >= self.base && other.end() <= self.end()
    }

    /// Returns `true` when the two ranges share at least one byte.
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        (self.base as u64) < other.end() && (other.base as u64) < self.end()
    }

    /// Number of whole 32-bit words in the range.
    #[must_use]
    pub const fn words(self) -> u32 {
        self.len / 4
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.last() {
            Some(last) => write!(f, "{:#010x}-{last:#010x}", self.base),
            None => write!(f, "{:#010x} (empty)", self.base),
        }
    }
}

/// Named regions of the physical memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// RAM owned by the host OS.
    LinuxRam,
    /// Remote-core firmware code and data.
    AmpCode,
    /// Status sub-region of the shared window.
    SharedStatus,
    /// Data sub-region of the shared window (reserved).
    SharedData,
    /// Self-test scratch sub-region of the shared window.
    SharedMemtest,
    /// SoC peripheral registers.
    Peripherals,
    /// ARM local peripherals.
    ArmLocal,
}

impl MemoryRegion {
    /// Returns the address range of this region.
    #[must_use]
    pub const fn range(self) -> AddressRange {
        match self {
            Self::LinuxRam => AddressRange::new(LINUX_RAM_BASE, LINUX_RAM_SIZE),
            Self::AmpCode => AddressRange::new(AMP_CODE_BASE, AMP_CODE_SIZE),
            Self::SharedStatus => AddressRange::new(SHARED_STATUS_ADDR, SHARED_STATUS_SIZE),
            Self::SharedData => AddressRange::new(SHARED_DATA_ADDR, SHARED_DATA_SIZE),
            Self::SharedMemtest => AddressRange::new(SHARED_MEMTEST_ADDR, SHARED_MEMTEST_SIZE),
            Self::Peripherals => AddressRange::new(PERIPHERAL_BASE, PERIPHERAL_SIZE),
            Self::ArmLocal => AddressRange::new(ARM_LOCAL_BASE, ARM_LOCAL_SIZE),
        }
    }

    /// Human-readable label used by memory-map listings.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::LinuxRam => "Linux RAM",
            Self::AmpCode => "AMP Code/Data",
            Self::SharedStatus => "Shared Status",
            Self::SharedData => "Shared Data",
            Self::SharedMemtest => "Shared Memtest",
            Self::Peripherals => "Peripherals",
            Self::ArmLocal => "ARM Local",
        }
    }

    /// Returns `true` for the sub-regions of the shared window.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(
            self,
            Self::SharedStatus | Self::SharedData | Self::SharedMemtest
        )
    }

    /// Returns the canonical descriptor for this region.
    #[must_use]
    pub const fn descriptor(self) -> RegionDescriptor {
        RegionDescriptor {
            region: self,
            range: self.range(),
        }
    }
}

/// Canonical region descriptor for the physical memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionDescriptor {
    /// Region classification.
    pub region: MemoryRegion,
    /// Region address range.
    pub range: AddressRange,
}

/// Physical memory map in ascending address order.
pub const PHYSICAL_MEMORY_MAP: [RegionDescriptor; 7] = [
    MemoryRegion::LinuxRam.descriptor(),
    MemoryRegion::AmpCode.descriptor(),
    MemoryRegion::SharedStatus.descriptor(),
    MemoryRegion::SharedData.descriptor(),
    MemoryRegion::SharedMemtest.descriptor(),
    MemoryRegion::Peripherals.descriptor(),
    MemoryRegion::ArmLocal.descriptor(),
];

/// The whole shared window as one range.
pub const SHARED_WINDOW: AddressRange = AddressRange::new(SHARED_MEM_BASE, SHARED_MEM_SIZE);

const _: () = assert_physical_layout();

const fn assert_physical_layout() {
    let mut index = 1;
    while index < PHYSICAL_MEMORY_MAP.len() {
        let previous = PHYSICAL_MEMORY_MAP[index - 1].range;
        let current = PHYSICAL_MEMORY_MAP[index].range;
        assert!(
            previous.end() <= current.base as u64,
            "regions must be ascending and disjoint"
        );
        index += 1;
    }

    assert!(
        LINUX_RAM_BASE as u64 + LINUX_RAM_SIZE as u64 == AMP_CODE_BASE as u64,
        "firmware area must follow host RAM"
    );
    assert!(
        AMP_CODE_BASE as u64 + AMP_CODE_SIZE as u64 == SHARED_MEM_BASE as u64,
        "shared window must follow firmware area"
    );

    let mut index = 0;
    while index < PHYSICAL_MEMORY_MAP.len() {
        let descriptor = PHYSICAL_MEMORY_MAP[index];
        if descriptor.region.is_shared() {
            assert!(
                SHARED_WINDOW.contains_range(descriptor.range),
                "shared sub-regions must lie inside the shared window"
            );
            assert!(
                descriptor.range.base % 4 == 0 && descriptor.range.len % 4 == 0,
                "shared sub-regions must be word aligned"
            );
        }
        index += 1;
    }
}
