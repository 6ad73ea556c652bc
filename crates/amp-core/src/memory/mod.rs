//! Physical memory map and byte-addressed memory buses.
//!
//! Every access to the shared window goes through a [`MemoryBus`] so the same
//! writer, reader and self-test code runs against device memory on the
//! remote core and against plain RAM in simulation.

/// Alignment and containment checks for bus accesses.
pub mod access;
/// Stuck-bit fault injection for self-test validation.
pub mod fault_inject;
/// Fixed physical memory map.
pub mod map;
/// Volatile access to identity-mapped physical memory.
pub mod volatile;

pub use access::{validate_range_within, validate_word_alignment, WORD_BYTES};
pub use fault_inject::{FaultyBus, StuckAt, StuckBit};
pub use map::{
    AddressRange, MemoryRegion, RegionDescriptor, AMP_CODE_BASE, AMP_CODE_SIZE, ARM_LOCAL_BASE,
    ARM_LOCAL_SIZE, LINUX_RAM_BASE, LINUX_RAM_SIZE, PERIPHERAL_BASE, PERIPHERAL_SIZE,
    PHYSICAL_MEMORY_MAP, SHARED_DATA_ADDR, SHARED_DATA_SIZE, SHARED_MEMTEST_ADDR,
    SHARED_MEMTEST_SIZE, SHARED_MEM_BASE, SHARED_MEM_SIZE, SHARED_STATUS_ADDR, SHARED_STATUS_SIZE,
    SHARED_WINDOW, SYSTIMER_BASE,
};
pub use volatile::VolatileRegion;

use alloc::boxed::Box;
use alloc::vec;

use crate::barrier;

/// Byte-addressed access to a span of physical memory.
///
/// Addresses are physical. Callers must stay inside [`MemoryBus::span`] and
/// keep 32-bit accesses word aligned; implementations may panic otherwise.
pub trait MemoryBus {
    /// Physical range this bus can reach.
    fn span(&self) -> AddressRange;

    /// Reads one byte.
    fn read_u8(&self, addr: u32) -> u8;

    /// Writes one byte.
    fn write_u8(&mut self, addr: u32, value: u8);

    /// Reads an aligned little-endian 32-bit word.
    fn read_u32(&self, addr: u32) -> u32;

    /// Writes an aligned little-endian 32-bit word.
    fn write_u32(&mut self, addr: u32, value: u32);

    /// Reads a little-endian 64-bit value as two words, low word first.
    fn read_u64(&self, addr: u32) -> u64 {
        let low = self.read_u32(addr);
        let high = self.read_u32(addr + 4);
        (u64::from(high) << 32) | u64::from(low)
    }

    /// Writes a little-endian 64-bit value as two words, low word first.
    #[allow(clippy::cast_possible_truncation)]
    fn write_u64(&mut self, addr: u32, value: u64) {
        self.write_u32(addr, value as u32);
        self.write_u32(addr + 4, (value >> 32) as u32);
    }

    /// Orders all preceding accesses before any following one.
    fn barrier(&self) {
        barrier::dsb();
    }
}

impl<B: MemoryBus + ?Sized> MemoryBus for &mut B {
    fn span(&self) -> AddressRange {
        (**self).span()
    }

    fn read_u8(&self, addr: u32) -> u8 {
        (**self).read_u8(addr)
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        (**self).write_u8(addr, value);
    }

    fn read_u32(&self, addr: u32) -> u32 {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        (**self).write_u32(addr, value);
    }

    fn read_u64(&self, addr: u32) -> u64 {
        (**self).read_u64(addr)
    }

    fn write_u64(&mut self, addr: u32, value: u64) {
        (**self).write_u64(addr, value);
    }

    fn barrier(&self) {
        (**self).barrier();
    }
}

/// Copies `out.len()` bytes starting at `addr` out of the bus.
pub fn read_bytes<B: MemoryBus + ?Sized>(bus: &B, addr: u32, out: &mut [u8]) {
    for (addr, byte) in (addr..).zip(out.iter_mut()) {
        *byte = bus.read_u8(addr);
    }
}

/// Copies `bytes` into the bus starting at `addr`.
pub fn write_bytes<B: MemoryBus + ?Sized>(bus: &mut B, addr: u32, bytes: &[u8]) {
    for (addr, byte) in (addr..).zip(bytes.iter()) {
        bus.write_u8(addr, *byte);
    }
}

/// Plain RAM standing in for a physical range, used for simulation and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamBus {
    base: u32,
    bytes: Box<[u8]>,
}

impl RamBus {
    /// Allocates a zeroed backing store covering `range`.
    #[must_use]
    pub fn new(range: AddressRange) -> Self {
        Self {
            base: range.base,
            bytes: vec![0; range.len as usize].into_boxed_slice(),
        }
    }

    /// Allocates the status, data and memtest sub-regions of the shared window.
    #[must_use]
    pub fn shared_window() -> Self {
        Self::new(AddressRange::new(
            SHARED_MEM_BASE,
            SHARED_MEMTEST_ADDR + SHARED_MEMTEST_SIZE - SHARED_MEM_BASE,
        ))
    }

    /// Raw backing bytes; offset 0 is [`MemoryBus::span`]'s base.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable raw backing bytes, for tests that corrupt memory directly.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn offset(&self, addr: u32, width: usize) -> usize {
        let offset = addr.checked_sub(self.base).map(|offset| offset as usize);
        match offset {
            Some(offset) if offset + width <= self.bytes.len() => offset,
            _ => panic!("access of {width} bytes at {addr:#010x} is outside the bus span"),
        }
    }
}

impl MemoryBus for RamBus {
    #[allow(clippy::cast_possible_truncation)]
    fn span(&self) -> AddressRange {
        AddressRange::new(self.base, self.bytes.len() as u32)
    }

    fn read_u8(&self, addr: u32) -> u8 {
        self.bytes[self.offset(addr, 1)]
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        let offset = self.offset(addr, 1);
        self.bytes[offset] = value;
    }

    fn read_u32(&self, addr: u32) -> u32 {
        debug_assert!(addr % WORD_BYTES == 0, "unaligned read at {addr:#010x}");
        let offset = self.offset(addr, 4);
        let mut word = [0; 4];
        word.copy_from_slice(&self.bytes[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        debug_assert!(addr % WORD_BYTES == 0, "unaligned write at {addr:#010x}");
        let offset = self.offset(addr, 4);
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn barrier(&self) {
        barrier::full_barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::{read_bytes, write_bytes, AddressRange, MemoryBus, RamBus, SHARED_MEM_BASE};

    #[test]
    fn shared_window_bus_is_zeroed_and_covers_all_sub_regions() {
        let bus = RamBus::shared_window();
        assert_eq!(bus.span(), AddressRange::new(SHARED_MEM_BASE, 0x1_2000));
        assert!(bus.as_bytes().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn words_are_little_endian() {
        let mut bus = RamBus::new(AddressRange::new(0x1000, 16));
        bus.write_u32(0x1004, 0x5250_3341);
        assert_eq!(&bus.as_bytes()[4..8], &[0x41, 0x33, 0x50, 0x52]);
        assert_eq!(bus.read_u8(0x1004), 0x41);
        assert_eq!(bus.read_u32(0x1004), 0x5250_3341);
    }

    #[test]
    fn u64_accesses_split_low_word_first() {
        let mut bus = RamBus::new(AddressRange::new(0x1000, 16));
        bus.write_u64(0x1008, 0x0123_4567_89AB_CDEF);
        assert_eq!(bus.read_u32(0x1008), 0x89AB_CDEF);
        assert_eq!(bus.read_u32(0x100C), 0x0123_4567);
        assert_eq!(bus.read_u64(0x1008), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn byte_copies_roundtrip() {
        let mut bus = RamBus::new(AddressRange::new(0x2000, 8));
        write_bytes(&mut bus, 0x2002, b"RP3A");
        let mut out = [0; 4];
        read_bytes(&bus, 0x2002, &mut out);
        assert_eq!(&out, b"RP3A");
    }

    #[test]
    #[should_panic(expected = "outside the bus span")]
    fn out_of_span_access_panics() {
        let bus = RamBus::new(AddressRange::new(0x1000, 4));
        let _ = bus.read_u32(0x1004);
    }

    #[test]
    fn mutable_reference_forwards_to_inner_bus() {
        let mut bus = RamBus::new(AddressRange::new(0, 8));
        {
            let mut borrowed = &mut bus;
            borrowed.write_u32(4, 7);
            borrowed.barrier();
        }
        assert_eq!(bus.read_u32(4), 7);
    }
}
