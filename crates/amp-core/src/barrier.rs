//! Memory barrier helpers for the shared window.
//!
//! The remote core and the host never coordinate through locks; visibility
//! order is established only by these barriers.
//!
//! - Writer: store a logical group of fields, then [`dsb`], then the next group.
//! - Reader: [`read_barrier`] before copying the record out.
//!
//! On AArch64 the hardware barriers are emitted directly. Elsewhere (host
//! builds, simulation) they degrade to sequentially consistent fences, which
//! still stop the compiler from reordering the surrounding accesses.

#![allow(unsafe_code)]

use core::sync::atomic::{fence, Ordering};

/// Read barrier (acquire semantics).
#[inline]
pub fn read_barrier() {
    fence(Ordering::Acquire);
}

/// Full memory barrier.
#[inline]
pub fn full_barrier() {
    fence(Ordering::SeqCst);
}

/// Data Synchronisation Barrier (DSB SY).
///
/// All preceding memory accesses complete before execution continues.
#[inline]
pub fn dsb() {
    arch::dsb();
}

#[cfg(target_arch = "aarch64")]
mod arch {
    #[inline]
    pub fn dsb() {
        // SAFETY: DSB is always safe to execute
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, preserves_flags));
        }
    }
}

#[cfg(not(target_arch = "aarch64"))]
mod arch {
    #[inline]
    pub fn dsb() {
        super::full_barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::{dsb, full_barrier, read_barrier};

    #[test]
    fn barriers_are_callable_on_every_target() {
        read_barrier();
        full_barrier();
        dsb();
    }
}
