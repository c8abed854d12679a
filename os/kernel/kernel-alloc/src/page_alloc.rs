//! # Best-fit page allocator
//!
//! Hands out and takes back 4 KiB physical pages. Free memory is kept as
//! maximal runs in a [`FreeTree`]; allocation carves the leading page off the
//! smallest run that fits, release merges the page with its free neighbours
//! before indexing it again.
//!
//! ## Boot
//!
//! ```text
//!   init_early(&mut self, low)    single core, no lock taken
//!   init_late(&self, rest)        lock taken; other cores may be running
//! ```
//!
//! Both phases index their range as a single block, so booting costs one pool
//! node per phase (plus one per merge), not one per page.
//!
//! ## Locking
//!
//! All index state sits behind one [`SpinLock`]. Page contents are touched
//! (junk fill) before the lock is taken, since the page is owned by the caller
//! until it is indexed.

use crate::free_tree::{FreeBlock, FreeTree};
use crate::node_pool::NodeRecycling;
use crate::phys_mapper::PhysMapper;
use crate::{AllocError, FrameAlloc};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalRange, Size4K};
use kernel_sync::SpinLock;
use log::{debug, error, trace, warn};

/// Default capacity of the node pool.
pub const DEFAULT_NODES: usize = 128;

/// Byte written over every released page.
pub const JUNK: u8 = 0x01;

const PAGE: u64 = Size4K::SIZE;

/// Which physical neighbours a released block is merged with.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum CoalescePolicy {
    /// Merge only with the free block that starts where the released one ends.
    #[default]
    HighOnly,
    /// Also merge with the free block that ends where the released one starts.
    Bidirectional,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct AllocatorConfig {
    pub coalesce: CoalescePolicy,
    pub recycling: NodeRecycling,
}

/// Snapshot of the allocator counters.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct AllocStats {
    /// Bytes currently indexed as free.
    pub free_bytes: u64,
    /// Number of free blocks in the index.
    pub free_blocks: usize,
    pub nodes_used: usize,
    pub nodes_capacity: usize,
    /// Bytes released while the node pool was exhausted; they are lost.
    pub dropped_bytes: u64,
    /// Pages handed out and not yet released.
    pub allocated_pages: u64,
}

/// The lock-protected part of the allocator.
struct Index<const N: usize> {
    tree: FreeTree<N>,
    coalesce: CoalescePolicy,
    free_bytes: u64,
    dropped_bytes: u64,
    allocated_pages: u64,
}

impl<const N: usize> Index<N> {
    const fn new(config: AllocatorConfig) -> Self {
        Self {
            tree: FreeTree::new(config.recycling),
            coalesce: config.coalesce,
            free_bytes: 0,
            dropped_bytes: 0,
            allocated_pages: 0,
        }
    }

    /// Removes `size` bytes from the front of the best-fitting block.
    fn take(&mut self, size: u64) -> Result<PhysicalAddress, AllocError> {
        let id = self.tree.find_best_fit(size).ok_or(AllocError::OutOfMemory)?;
        let block = self.tree.block(id);
        if block.size > size {
            self.tree
                .replace(id, FreeBlock::new(block.addr + size, block.size - size));
        } else {
            self.tree.remove(id);
        }
        self.free_bytes -= size;
        Ok(block.addr)
    }

    /// Merges `block` with its free neighbours and indexes the result.
    ///
    /// A block that cannot be indexed because the pool is exhausted is
    /// dropped; its bytes are accounted in `dropped_bytes`.
    fn give_back(&mut self, mut block: FreeBlock) {
        loop {
            if let Some(id) = self.tree.find_starting_at(block.end()) {
                let high = self.tree.remove(id);
                self.free_bytes -= high.size;
                block.size += high.size;
                continue;
            }
            if self.coalesce == CoalescePolicy::Bidirectional
                && let Some(id) = self.tree.find_ending_at(block.addr)
            {
                let low = self.tree.remove(id);
                self.free_bytes -= low.size;
                block = FreeBlock::new(low.addr, low.size + block.size);
                continue;
            }
            break;
        }

        match self.tree.insert(block) {
            Ok(_) => self.free_bytes += block.size,
            Err(e) => {
                self.dropped_bytes += block.size;
                warn!(
                    "{e}: dropping free block {block:?} ({} bytes lost in total)",
                    self.dropped_bytes
                );
            }
        }
        debug_assert!(self.tree.is_consistent());
    }

    fn add_range(&mut self, range: PhysicalRange) {
        let range = range.page_aligned::<Size4K>();
        if range.is_empty() {
            return;
        }
        self.give_back(FreeBlock::new(range.start, range.len()));
    }

    fn stats(&self) -> AllocStats {
        AllocStats {
            free_bytes: self.free_bytes,
            free_blocks: self.tree.len(),
            nodes_used: self.tree.nodes_used(),
            nodes_capacity: self.tree.nodes_capacity(),
            dropped_bytes: self.dropped_bytes,
            allocated_pages: self.allocated_pages,
        }
    }
}

/// Best-fit allocator of physical pages inside a fixed managed range.
///
/// `N` is the capacity of the node pool backing the free-block index.
pub struct PageAllocator<M: PhysMapper, const N: usize = DEFAULT_NODES> {
    mapper: M,
    managed: PhysicalRange,
    index: SpinLock<Index<N>>,
}

impl<M: PhysMapper, const N: usize> PageAllocator<M, N> {
    /// Creates an allocator with an empty index.
    ///
    /// Pages outside `managed` are rejected by [`release`](Self::release).
    pub const fn new(mapper: M, managed: PhysicalRange, config: AllocatorConfig) -> Self {
        Self {
            mapper,
            managed,
            index: SpinLock::new(Index::new(config)),
        }
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    pub const fn managed(&self) -> PhysicalRange {
        self.managed
    }

    /// First boot phase: indexes `range` without taking the lock.
    ///
    /// The exclusive borrow stands in for "only one core is running".
    pub fn init_early(&mut self, range: PhysicalRange) {
        debug!("kmem: early range {}..{}", range.start, range.end);
        self.index.get_mut().add_range(range);
    }

    /// Second boot phase: indexes the remaining `range` under the lock.
    pub fn init_late(&self, range: PhysicalRange) {
        debug!("kmem: late range {}..{}", range.start, range.end);
        self.index.with_lock(|index| index.add_range(range));
    }

    /// Hands out one page.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when no free block holds a full page.
    pub fn allocate(&self) -> Result<PhysicalAddress, AllocError> {
        let pa = self.index.with_lock(|index| {
            let pa = index.take(PAGE)?;
            index.allocated_pages += 1;
            Ok::<_, AllocError>(pa)
        })?;
        trace!("kalloc {pa}");
        Ok(pa)
    }

    /// Like [`allocate`](Self::allocate), but the page is zero-filled.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] when no free block holds a full page.
    pub fn allocate_zeroed(&self) -> Result<PhysicalAddress, AllocError> {
        let pa = self.allocate()?;
        // SAFETY: the page was just taken out of the index; we own it.
        unsafe { self.mapper.fill_page(pa, 0) };
        Ok(pa)
    }

    /// Returns one page to the index.
    ///
    /// # Panics
    /// If `pa` is not page-aligned or not inside the managed range. Either
    /// means a caller is corrupting kernel memory; the kernel halts.
    pub fn release(&self, pa: PhysicalAddress) {
        if !pa.is_aligned::<Size4K>() || !self.managed.contains(pa, PAGE) {
            error!(
                "kfree: {pa} is not a page inside {}..{}",
                self.managed.start, self.managed.end
            );
            panic!("kfree: invalid page {pa}");
        }

        // SAFETY: the caller gives up the page; nobody else may reference it.
        unsafe { self.mapper.fill_page(pa, JUNK) };

        self.index.with_lock(|index| {
            index.allocated_pages = index.allocated_pages.saturating_sub(1);
            index.give_back(FreeBlock::new(pa, PAGE));
        });
        trace!("kfree {pa}");
    }

    /// Returns every whole page inside `range`, as a single merged block.
    ///
    /// # Panics
    /// If the page-aligned part of `range` leaves the managed range.
    pub fn release_range(&self, range: PhysicalRange) {
        let range = range.page_aligned::<Size4K>();
        if range.is_empty() {
            return;
        }
        assert!(
            self.managed.contains(range.start, range.len()),
            "kfree: range {}..{} outside managed memory",
            range.start,
            range.end
        );
        let mut page = range.start;
        while page < range.end {
            // SAFETY: the caller gives up every page in the range.
            unsafe { self.mapper.fill_page(page, JUNK) };
            page += PAGE;
        }
        self.index.with_lock(|index| index.add_range(range));
    }

    /// Total bytes currently indexed as free.
    pub fn free_bytes(&self) -> u64 {
        self.index.with_lock(|index| index.free_bytes)
    }

    /// Number of free blocks in the index.
    pub fn free_blocks(&self) -> usize {
        self.index.with_lock(|index| index.tree.len())
    }

    pub fn stats(&self) -> AllocStats {
        self.index.with_lock(|index| index.stats())
    }

    /// Free blocks in index order, for diagnostics and tests.
    #[cfg(any(test, feature = "host"))]
    pub fn blocks(&self) -> alloc::vec::Vec<FreeBlock> {
        self.index.with_lock(|index| index.tree.iter().collect())
    }
}

impl<M: PhysMapper, const N: usize> FrameAlloc for PageAllocator<M, N> {
    fn alloc_4k(&self) -> Option<PhysicalAddress> {
        self.allocate().ok()
    }

    fn free_4k(&self, pa: PhysicalAddress) {
        self.release(pa);
    }
}
