//! # User address spaces
//!
//! A process's user memory is a list of whole physical pages plus a byte
//! size; page `i` backs user addresses `[i * 4096, (i + 1) * 4096)`. There are
//! no page tables: translation is an index into the list.
//!
//! All page traffic goes through the page allocator one page at a time
//! (`reserve_pages` / `release_pages`). Callers never hold the process-table
//! lock while calling into this module.

use crate::error::ProcError;
use kernel_alloc::{HostRam, PageAllocator, PhysMapper};
use kernel_memory_addresses::{PAGE_SIZE, PageSize, PhysicalAddress, Size4K};
use log::trace;

pub(crate) type Kmem = PageAllocator<HostRam, { crate::param::KMEM_NODES }>;

#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct AddressSpace {
    pages: Vec<PhysicalAddress>,
    size: u64,
}

impl AddressSpace {
    #[inline]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn pages(&self) -> &[PhysicalAddress] {
        &self.pages
    }

    /// Zero-filled memory of `size` bytes.
    pub fn with_size(kmem: &Kmem, size: u64) -> Result<Self, ProcError> {
        let pages = reserve_pages(kmem, pages_for(size))?;
        Ok(Self { pages, size })
    }

    /// Page-by-page copy of the memory `(src, size)` into fresh pages.
    pub fn duplicate(kmem: &Kmem, src: &[PhysicalAddress], size: u64) -> Result<Self, ProcError> {
        let pages = reserve_pages(kmem, src.len())?;
        for (&dst, &from) in pages.iter().zip(src) {
            // SAFETY: `dst` was just allocated; `from` belongs to the caller,
            // which is the only context touching it.
            unsafe { kmem.mapper().copy_page(dst, from) };
        }
        Ok(Self { pages, size })
    }

    /// Number of pages a resize to `new_size` needs beyond the current ones.
    pub fn missing_pages(&self, new_size: u64) -> usize {
        pages_for(new_size).saturating_sub(self.pages.len())
    }

    /// Resizes to `new_size`, appending `fresh` pages. Returns the pages no
    /// longer needed.
    pub fn resize(&mut self, new_size: u64, fresh: Vec<PhysicalAddress>) -> Vec<PhysicalAddress> {
        self.pages.extend(fresh);
        let surplus = self.pages.split_off(pages_for(new_size).min(self.pages.len()));
        self.size = new_size;
        surplus
    }

    /// Physical pages and in-page ranges covering `[addr, addr + len)`.
    pub fn span(&self, addr: u64, len: usize) -> Result<Vec<(PhysicalAddress, usize, usize)>, ProcError> {
        let end = addr
            .checked_add(len as u64)
            .filter(|&end| end <= self.size)
            .ok_or(ProcError::BadAddress)?;
        let mut out = Vec::new();
        let mut at = addr;
        while at < end {
            let page = (at / Size4K::SIZE) as usize;
            let offset = (at % Size4K::SIZE) as usize;
            let chunk = (PAGE_SIZE - offset).min((end - at) as usize);
            out.push((self.pages[page], offset, chunk));
            at += chunk as u64;
        }
        Ok(out)
    }

    pub fn free(self, kmem: &Kmem) {
        release_pages(kmem, self.pages);
    }
}

fn pages_for(size: u64) -> usize {
    usize::try_from(Size4K::pages_for(size)).unwrap_or(usize::MAX)
}

/// Allocates `count` zeroed pages, or none at all.
pub(crate) fn reserve_pages(kmem: &Kmem, count: usize) -> Result<Vec<PhysicalAddress>, ProcError> {
    let mut pages = Vec::with_capacity(count);
    for _ in 0..count {
        match kmem.allocate_zeroed() {
            Ok(pa) => pages.push(pa),
            Err(e) => {
                trace!("reserve_pages: {e} after {} of {count} pages", pages.len());
                release_pages(kmem, pages);
                return Err(e.into());
            }
        }
    }
    Ok(pages)
}

pub(crate) fn release_pages(kmem: &Kmem, pages: Vec<PhysicalAddress>) {
    for pa in pages {
        kmem.release(pa);
    }
}

/// Copies `data` into the user memory described by `span`.
pub(crate) fn write(kmem: &Kmem, span: &[(PhysicalAddress, usize, usize)], data: &[u8]) {
    let mut done = 0;
    for &(pa, offset, len) in span {
        // SAFETY: the pages belong to the calling process.
        let page = unsafe { kmem.mapper().page_mut(pa) };
        page[offset..offset + len].copy_from_slice(&data[done..done + len]);
        done += len;
    }
}

/// Copies the user memory described by `span` into `buf`.
pub(crate) fn read(kmem: &Kmem, span: &[(PhysicalAddress, usize, usize)], buf: &mut [u8]) {
    let mut done = 0;
    for &(pa, offset, len) in span {
        // SAFETY: the pages belong to the calling process.
        let page = unsafe { kmem.mapper().page_mut(pa) };
        buf[done..done + len].copy_from_slice(&page[offset..offset + len]);
        done += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::AllocatorConfig;
    use kernel_memory_addresses::PhysicalRange;

    fn kmem(pages: usize) -> Kmem {
        let ram = HostRam::new(PhysicalAddress::new(0x10_0000), pages);
        let range: PhysicalRange = ram.range();
        let mut kmem = PageAllocator::new(ram, range, AllocatorConfig::default());
        kmem.init_early(range);
        kmem
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let kmem = kmem(3);
        assert_eq!(reserve_pages(&kmem, 4), Err(ProcError::OutOfMemory));
        assert_eq!(kmem.free_bytes(), 3 * 4096);
        assert_eq!(reserve_pages(&kmem, 3).unwrap().len(), 3);
    }

    #[test]
    fn duplicate_copies_contents() {
        let kmem = kmem(8);
        let vm = AddressSpace::with_size(&kmem, 5000).unwrap();
        assert_eq!(vm.pages().len(), 2);
        write(&kmem, &vm.span(4090, 10).unwrap(), b"0123456789");

        let copy = AddressSpace::duplicate(&kmem, vm.pages(), vm.size()).unwrap();
        assert_ne!(copy.pages(), vm.pages());
        let mut buf = [0; 10];
        read(&kmem, &copy.span(4090, 10).unwrap(), &mut buf);
        assert_eq!(&buf, b"0123456789");
    }

    #[test]
    fn resize_and_bounds() {
        let kmem = kmem(8);
        let mut vm = AddressSpace::with_size(&kmem, 4096).unwrap();
        assert_eq!(vm.missing_pages(3 * 4096), 2);
        let fresh = reserve_pages(&kmem, 2).unwrap();
        assert!(vm.resize(3 * 4096, fresh).is_empty());
        assert_eq!(vm.span(3 * 4096 - 1, 2), Err(ProcError::BadAddress));

        let surplus = vm.resize(100, Vec::new());
        assert_eq!(surplus.len(), 2);
        assert_eq!(vm.size(), 100);
        release_pages(&kmem, surplus);
        vm.free(&kmem);
        assert_eq!(kmem.free_bytes(), 8 * 4096);
    }
}
