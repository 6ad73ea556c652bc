//! Read-only `mmap` of the page span holding the status record.
//!
//! `/dev/mem` on ARM rejects plain `read(2)` of RAM it does not own, so the
//! record is copied out of a shared mapping with volatile loads. Image files
//! go through the same path.

#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::ptr::{self, NonNull};

use amp_core::barrier::read_barrier;

const FALLBACK_PAGE_SIZE: u64 = 4096;

/// Size of one virtual memory page on this host.
#[must_use]
pub fn page_size() -> u64 {
    // SAFETY: sysconf only reads a system constant.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size)
        .ok()
        .filter(|size| size.is_power_of_two())
        .unwrap_or(FALLBACK_PAGE_SIZE)
}

/// A `PROT_READ`, `MAP_SHARED` mapping unmapped on drop.
#[derive(Debug)]
pub struct PageMapping {
    base: NonNull<libc::c_void>,
    len: usize,
    delta: usize,
    span: usize,
}

impl PageMapping {
    /// Maps the pages covering `span` bytes at `offset` in `file`.
    ///
    /// The mapping starts at the page containing `offset`; `mmap` only
    /// accepts page-aligned file offsets.
    ///
    /// # Errors
    ///
    /// Returns the OS error from `mmap`, or `InvalidInput` when the span
    /// does not fit the platform's offset or size types.
    pub fn new(file: &File, offset: u64, span: usize) -> io::Result<Self> {
        let page = page_size();
        let page_base = offset & !(page - 1);
        let delta = usize::try_from(offset - page_base).map_err(too_large)?;
        let len = delta.checked_add(span).ok_or_else(|| too_large(()))?;
        let file_offset = libc::off_t::try_from(page_base).map_err(too_large)?;

        // SAFETY: a fresh read-only mapping with no address hint aliases no
        // Rust-owned memory. The result is checked before use.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                file_offset,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(base).ok_or_else(|| io::Error::from(io::ErrorKind::Other))?;
        log::trace!("mapped {len} bytes at file offset {page_base:#x}");
        Ok(Self {
            base,
            len,
            delta,
            span,
        })
    }

    /// Copies the mapped span out with one volatile load per byte. Bytes of
    /// `N` past the span stay zero.
    #[must_use]
    pub fn copy_out<const N: usize>(&self) -> [u8; N] {
        let mut image = [0_u8; N];
        let start = self.base.as_ptr().cast::<u8>();
        for (index, byte) in image.iter_mut().enumerate().take(self.span) {
            // SAFETY: delta + index < delta + span == len, inside the mapping.
            *byte = unsafe { ptr::read_volatile(start.add(self.delta + index)) };
        }
        read_barrier();
        image
    }
}

impl Drop for PageMapping {
    fn drop(&mut self) {
        // SAFETY: base and len are exactly what mmap returned and accepted.
        let result = unsafe { libc::munmap(self.base.as_ptr(), self.len) };
        if result != 0 {
            log::warn!("munmap failed: {}", io::Error::last_os_error());
        }
    }
}

fn too_large<E>(_: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "offset out of range")
}
