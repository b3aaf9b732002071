// Aligned allocation for O_DIRECT-style external-memory I/O, plus the
// tagging used by `Manager` to attribute tracked bytes to a subsystem.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::ThrillError;
use crate::Result;

pub const DEFAULT_ALIGNMENT: usize = 4096;

/// Tag recording which subsystem an allocation is charged against, so
/// `Manager::total_tracked` can be broken down by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationSource {
    Blocks,
    Network,
    ReduceTables,
    User,
}

/// An allocation aligned to `alignment`, with the unaligned base pointer
/// stored immediately before the returned aligned address so `Drop` can
/// recover it and pass the exact same layout to `dealloc`. Allocators for
/// data blocks must be interchangeable with this scheme so that blocks can
/// be handed directly to O_DIRECT-style write paths.
pub struct AlignedBuffer {
    /// Pointer to the aligned, user-visible region.
    ptr: NonNull<u8>,
    /// Size of the user-visible region in bytes.
    size: usize,
    /// The base pointer actually returned by the global allocator, used to
    /// free the correct layout.
    base: NonNull<u8>,
    /// Total bytes requested from the global allocator for `base`.
    base_layout: Layout,
}

unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if size == 0 {
            return Err(ThrillError::Configuration(
                "AlignedBuffer size must be non-zero".into(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(ThrillError::Configuration(format!(
                "alignment {alignment} is not a power of two"
            )));
        }

        // Overhead: `alignment` bytes plus one pointer-width slot to store
        // the base pointer immediately before the user-visible region.
        let overhead = alignment + std::mem::size_of::<*mut u8>();
        let alloc_size = size
            .checked_add(overhead)
            .ok_or_else(|| ThrillError::Configuration("requested size overflows".into()))?;

        let base_layout = Layout::from_size_align(alloc_size, std::mem::align_of::<usize>())
            .map_err(|e| ThrillError::Configuration(format!("invalid layout: {e}")))?;

        let base = unsafe { alloc(base_layout) };
        let base = NonNull::new(base)
            .ok_or_else(|| ThrillError::OutOfMemory(format!("aligned_alloc({alloc_size})")))?;

        let reserve = unsafe { base.as_ptr().add(std::mem::size_of::<*mut u8>()) } as usize;
        let aligned_addr = (reserve + alignment - 1) & !(alignment - 1);
        let aligned_ptr = aligned_addr as *mut u8;

        debug_assert!(
            (aligned_ptr as usize) - (base.as_ptr() as usize) >= std::mem::size_of::<*mut u8>()
        );

        // Store the base pointer directly before the aligned address.
        unsafe {
            let slot = (aligned_ptr as *mut *mut u8).offset(-1);
            slot.write(base.as_ptr());
        }

        Ok(AlignedBuffer {
            ptr: NonNull::new(aligned_ptr).expect("aligned_ptr is non-null by construction"),
            size,
            base,
            base_layout,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.base.as_ptr(), self.base_layout);
        }
        let _ = self.base; // silence unused-field lint under some configs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_and_aligns() {
        let buf = AlignedBuffer::new(8192, 4096).unwrap();
        assert_eq!(buf.len(), 8192);
        assert_eq!(buf.as_ptr() as usize % 4096, 0);
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        assert!(AlignedBuffer::new(1024, 100).is_err());
    }

    #[test]
    fn rejects_zero_size() {
        assert!(AlignedBuffer::new(0, 4096).is_err());
    }

    #[test]
    fn mutation_is_visible_in_as_slice() {
        let mut buf = AlignedBuffer::new(16, 16).unwrap();
        buf.as_mut_slice()[0] = 0xAB;
        assert_eq!(buf.as_slice()[0], 0xAB);
    }
}
