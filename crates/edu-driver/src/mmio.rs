// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-mapped register access
//!
//! [`RegisterWindow`] is the only way the driver touches device registers.
//! [`MappedRegion`] implements it over an `mmap` of a BAR; the simulated
//! device implements it in software.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::cast_possible_truncation)]

use crate::error::{EduError, Result};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fmt::Debug;
use std::os::fd::AsFd;
use std::ptr::NonNull;

/// Byte-addressable view of a device's 32-bit registers.
///
/// Implementations must tolerate concurrent calls from caller context and
/// interrupt context. Accesses to distinct registers are independent.
pub trait RegisterWindow: Debug + Send + Sync {
    /// Read the 32-bit register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Write the 32-bit register at `offset`.
    fn write32(&self, offset: usize, value: u32);

    /// Size of the window in bytes.
    fn len(&self) -> usize;

    /// Whether the window maps zero bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mapped BAR region for MMIO access
pub struct MappedRegion {
    /// Memory-mapped pointer
    ptr: NonNull<u8>,
    /// Size of the mapping
    size: usize,
    /// BAR index
    bar: u32,
}

impl Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("bar", &self.bar)
            .finish()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively. Moving between threads
// doesn't invalidate it (mmap'd memory is process-wide). No thread-local state.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - every access is a single volatile 32-bit load or store. The device
// defines the result of concurrent accesses; no Rust-visible data is shared.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `size` bytes of BAR `bar` found at `offset` in `fd`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceUnavailable` if `size` is zero or `mmap` fails.
    pub fn map(fd: impl AsFd, bar: u32, offset: u64, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(EduError::resource_unavailable(format!(
                "BAR{bar} has zero size"
            )));
        }

        // SAFETY: mmap necessary for MMIO - maps BAR region into process address space.
        // Invariants: (1) fd valid for the duration of the call; (2) size non-zero;
        // (3) offset/size come from the kernel's region info; (4) ptr valid for size
        // bytes or Err. The mapping outlives fd and is released in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd.as_fd(),
                offset,
            )
        }
        .map_err(|e| EduError::resource_unavailable(format!("Failed to mmap BAR{bar}: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| {
            EduError::resource_unavailable(format!("mmap of BAR{bar} returned null"))
        })?;

        tracing::info!("Mapped BAR{bar} at {ptr:p}, size={size:#x}");

        Ok(Self { ptr, size, bar })
    }

    fn check(&self, offset: usize) {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.size,
            "Register offset {offset:#x} out of bounds"
        );
    }
}

impl RegisterWindow for MappedRegion {
    /// # Panics
    ///
    /// Panics if `offset` is unaligned or `offset + 4` exceeds the mapping.
    fn read32(&self, offset: usize) -> u32 {
        self.check(offset);
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap in map(), valid for self.size; (2) offset+4 <= size;
        // (3) offset is 4-aligned and the mapping is page aligned.
        unsafe { std::ptr::read_volatile(self.ptr.as_ptr().add(offset).cast::<u32>()) }
    }

    /// # Panics
    ///
    /// Panics if `offset` is unaligned or `offset + 4` exceeds the mapping.
    fn write32(&self, offset: usize, value: u32) {
        self.check(offset);
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= size; (3) u32 aligned.
        unsafe {
            std::ptr::write_volatile(self.ptr.as_ptr().add(offset).cast::<u32>(), value);
        }
    }

    fn len(&self) -> usize {
        self.size
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: munmap necessary - releases the mapping created in map().
        // Invariants: (1) ptr/size are exactly what mmap returned; (2) Drop runs at
        // most once; (3) no outstanding references (accesses borrow &self).
        if let Err(e) = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) } {
            tracing::warn!("munmap of BAR{} failed: {e}", self.bar);
        }
        tracing::debug!("Unmapped BAR{}", self.bar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_anonymous_backing_file() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(4096).unwrap();

        let region = MappedRegion::map(&file, 0, 0, 4096).unwrap();
        assert_eq!(region.len(), 4096);
        region.write32(edu_chip::regs::XOR, 0x1234_5678);
        assert_eq!(region.read32(edu_chip::regs::XOR), 0x1234_5678);
        assert_eq!(region.read32(edu_chip::regs::IDENT), 0);
    }

    #[test]
    fn zero_size_rejected() {
        let file = tempfile::tempfile().unwrap();
        let err = MappedRegion::map(&file, 0, 0, 0).unwrap_err();
        assert!(matches!(err, EduError::ResourceUnavailable { .. }));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_read_panics() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(4096).unwrap();
        let region = MappedRegion::map(&file, 0, 0, 4096).unwrap();
        let _ = region.read32(4096);
    }
}
