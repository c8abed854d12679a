//! # Physical page access
//!
//! The allocator never dereferences a physical address directly. It asks a
//! [`PhysMapper`] for a writable view of the page, so the same code runs
//! against a higher-half direct map in a kernel and against plain heap memory
//! on a host.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::{HostRam, PhysMapper};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let ram = HostRam::new(PhysicalAddress::new(0x10_0000), 2);
//! let page = PhysicalAddress::new(0x10_1000);
//! unsafe { ram.fill_page(page, 0xAB) };
//! assert_eq!(unsafe { ram.page_mut(page) }[17], 0xAB);
//! ```

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Converts a physical page address into a usable mutable view.
///
/// # Safety
/// Implementations must return a view of exactly the page at `pa`. Callers
/// must ensure no other live reference to the same page exists while the
/// returned borrow is in use; the lifetime `'a` is not tied to the mapper.
pub trait PhysMapper: Sync {
    /// # Safety
    /// `pa` must be page-aligned and backed by the mapper; the caller must
    /// hold exclusive ownership of the page for the lifetime of the borrow.
    unsafe fn page_mut<'a>(&self, pa: PhysicalAddress) -> &'a mut [u8; PAGE_SIZE];

    /// Overwrites the page at `pa` with `byte`.
    ///
    /// # Safety
    /// See [`PhysMapper::page_mut`].
    unsafe fn fill_page(&self, pa: PhysicalAddress, byte: u8) {
        unsafe { self.page_mut(pa) }.fill(byte);
    }

    /// Copies the page at `src` over the page at `dst`.
    ///
    /// # Safety
    /// See [`PhysMapper::page_mut`]; `src` and `dst` must be distinct pages.
    unsafe fn copy_page(&self, dst: PhysicalAddress, src: PhysicalAddress) {
        debug_assert_ne!(dst, src);
        let src = unsafe { self.page_mut(src) };
        let dst = unsafe { self.page_mut(dst) };
        dst.copy_from_slice(src);
    }
}

#[cfg(any(test, feature = "host"))]
pub use host::HostRam;

#[cfg(any(test, feature = "host"))]
mod host {
    use super::PhysMapper;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use core::cell::UnsafeCell;
    use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalRange, Size4K};

    /// Heap-backed "physical memory": `pages` frames starting at `base`.
    ///
    /// Stands in for the direct map when the kernel runs as a host process.
    pub struct HostRam {
        base: PhysicalAddress,
        frames: Box<[UnsafeCell<[u8; PAGE_SIZE]>]>,
    }

    // Safety: frames are only reached through `page_mut`, whose contract makes
    // the caller the exclusive owner of the page it touches.
    unsafe impl Sync for HostRam {}

    impl HostRam {
        /// # Panics
        /// If `base` is not page-aligned.
        #[must_use]
        pub fn new(base: PhysicalAddress, pages: usize) -> Self {
            assert!(base.is_aligned::<Size4K>(), "RAM base {base} is not page-aligned");
            let frames: Vec<_> = (0..pages).map(|_| UnsafeCell::new([0; PAGE_SIZE])).collect();
            Self {
                base,
                frames: frames.into_boxed_slice(),
            }
        }

        /// The physical range covered by this RAM.
        #[must_use]
        pub fn range(&self) -> PhysicalRange {
            PhysicalRange::from_pages::<Size4K>(self.base, self.frames.len() as u64)
        }
    }

    impl PhysMapper for HostRam {
        unsafe fn page_mut<'a>(&self, pa: PhysicalAddress) -> &'a mut [u8; PAGE_SIZE] {
            let index = pa
                .offset_from(self.base)
                .and_then(|off| usize::try_from(off / PAGE_SIZE as u64).ok())
                .filter(|&i| i < self.frames.len() && pa.is_aligned::<Size4K>());
            let Some(index) = index else {
                panic!("physical address {pa} is not backed by host RAM");
            };
            // SAFETY: caller holds exclusive ownership of this page.
            unsafe { &mut *self.frames[index].get() }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn pages_are_distinct_and_copyable() {
            let ram = HostRam::new(PhysicalAddress::new(0x4000), 3);
            assert_eq!(ram.range().len(), 3 * 4096);

            let a = PhysicalAddress::new(0x4000);
            let b = PhysicalAddress::new(0x6000);
            unsafe {
                ram.fill_page(a, 7);
                ram.copy_page(b, a);
                assert_eq!(ram.page_mut(b)[4095], 7);
                assert_eq!(ram.page_mut(PhysicalAddress::new(0x5000))[0], 0);
            }
        }

        #[test]
        #[should_panic(expected = "not backed by host RAM")]
        fn outside_range_panics() {
            let ram = HostRam::new(PhysicalAddress::new(0x4000), 1);
            unsafe { ram.fill_page(PhysicalAddress::new(0x5000), 0) };
        }
    }
}
