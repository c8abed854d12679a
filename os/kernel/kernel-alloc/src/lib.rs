//! # Kernel Physical Page Allocation
//!
//! This crate provides the physical page allocator of the kernel: a best-fit
//! allocator that keeps free memory as maximal contiguous runs, indexed by
//! size in a binary search tree, and coalesces neighbouring runs on release.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Page Allocator                      │
//! │    • allocate / release of 4 KiB pages              │
//! │    • split on allocate, coalesce on release         │
//! │    • two-phase boot, statistics                     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Free-Block Index                       │
//! │    • BST keyed by (size, address)                   │
//! │    • best-fit search, three-case delete             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Node Pool                           │
//! │    • fixed-capacity arena of tree nodes             │
//! │    • leak (default) or recycle removed nodes        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Page contents are only ever touched through a [`PhysMapper`], which makes
//! the allocator usable both in-kernel and, with the `host` feature, on top of
//! heap memory ([`HostRam`]).
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::{AllocatorConfig, FrameAlloc, HostRam, PageAllocator};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let ram = HostRam::new(PhysicalAddress::new(0x10_0000), 4);
//! let range = ram.range();
//! let mut kmem: PageAllocator<_> = PageAllocator::new(ram, range, AllocatorConfig::default());
//! kmem.init_early(range);
//!
//! let page = kmem.alloc_4k().expect("four free pages");
//! assert_eq!(kmem.free_bytes(), 3 * 4096);
//! kmem.free_4k(page);
//! assert_eq!(kmem.free_blocks(), 1);
//! ```

#![cfg_attr(not(any(test, doctest, feature = "host")), no_std)]
#![allow(unsafe_code)]

#[cfg(any(test, feature = "host"))]
extern crate alloc;

pub mod free_tree;
mod node_pool;
pub mod page_alloc;
pub mod phys_mapper;

pub use free_tree::FreeBlock;
pub use node_pool::{NodeId, NodeRecycling};
pub use page_alloc::{AllocStats, AllocatorConfig, CoalescePolicy, DEFAULT_NODES, JUNK, PageAllocator};
#[cfg(any(test, feature = "host"))]
pub use phys_mapper::HostRam;
pub use phys_mapper::PhysMapper;

use kernel_memory_addresses::PhysicalAddress;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("no free block large enough")]
    OutOfMemory,
    #[error("free-block node pool exhausted")]
    PoolExhausted,
}

/// Source of 4 KiB physical frames.
///
/// Shared by reference: implementations synchronize internally, so kernel
/// stacks and user pages can be requested from any core.
pub trait FrameAlloc {
    /// Allocate one page-aligned 4 KiB frame.
    fn alloc_4k(&self) -> Option<PhysicalAddress>;

    /// Give a frame obtained from [`alloc_4k`](Self::alloc_4k) back.
    fn free_4k(&self, pa: PhysicalAddress);
}
