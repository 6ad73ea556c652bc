//! Volatile access to physical memory.
//!
//! On the remote core the MMU is off and physical addresses are used directly,
//! so a region's pointer is its physical base. Every access is a single
//! volatile load or store the compiler may neither elide nor merge.
//!
//! # Safety
//!
//! The caller is responsible for ensuring the pointer is valid for the whole
//! range and mapped with device or non-cacheable attributes.

#![allow(unsafe_code)]

use core::ptr::{read_volatile, write_volatile};

use super::MemoryBus;
use crate::AddressRange;

/// A physical range accessed through volatile loads and stores.
#[derive(Debug, Clone, Copy)]
pub struct VolatileRegion {
    ptr: *mut u8,
    range: AddressRange,
}

impl VolatileRegion {
    /// Creates a region over identity-mapped physical memory.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `range` is mapped at its own physical address
    /// - the mapping is device or non-cacheable memory
    /// - nothing else writes the range without synchronisation
    #[inline]
    #[must_use]
    pub const unsafe fn new(range: AddressRange) -> Self {
        Self {
            ptr: range.base as usize as *mut u8,
            range,
        }
    }

    /// Creates a region whose physical `range` is reachable through `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `range.len` bytes, aligned
    /// to 4 bytes, and outlive every use of the returned region.
    #[inline]
    #[must_use]
    pub const unsafe fn from_ptr(ptr: *mut u8, range: AddressRange) -> Self {
        Self { ptr, range }
    }

    /// Physical range covered.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> AddressRange {
        self.range
    }

    fn offset(&self, addr: u32, width: u32) -> usize {
        assert!(
            self.range.contains_range(AddressRange::new(addr, width)),
            "volatile access at {addr:#010x} outside {}",
            self.range
        );
        (addr - self.range.base) as usize
    }
}

impl MemoryBus for VolatileRegion {
    fn span(&self) -> AddressRange {
        self.range
    }

    fn read_u8(&self, addr: u32) -> u8 {
        let offset = self.offset(addr, 1);
        // SAFETY: constructor contract covers the range; offset checked above
        unsafe { read_volatile(self.ptr.add(offset)) }
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        let offset = self.offset(addr, 1);
        // SAFETY: constructor contract covers the range; offset checked above
        unsafe { write_volatile(self.ptr.add(offset), value) }
    }

    fn read_u32(&self, addr: u32) -> u32 {
        debug_assert!(addr % 4 == 0, "volatile read32 not aligned");
        let offset = self.offset(addr, 4);
        // SAFETY: in range and word aligned; the base is 4-byte aligned
        let raw = unsafe { read_volatile(self.ptr.add(offset).cast::<u32>()) };
        u32::from_le(raw)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        debug_assert!(addr % 4 == 0, "volatile write32 not aligned");
        let offset = self.offset(addr, 4);
        // SAFETY: in range and word aligned; the base is 4-byte aligned
        unsafe { write_volatile(self.ptr.add(offset).cast::<u32>(), value.to_le()) }
    }
}
