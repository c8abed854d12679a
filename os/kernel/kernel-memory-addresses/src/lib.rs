//! # Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw physical addresses handed around by the
//! page allocator and the process layer.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address (RAM or MMIO). |
//! | [`PhysicalRange`] | A half-open range `[start, end)` of physical memory. |
//! | [`PageSize`] / [`Size4K`] | Page size marker used for alignment math. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let range = PhysicalRange::from_pages::<Size4K>(PhysicalAddress::new(0x10_0000), 4);
//! assert_eq!(range.len(), 4 * Size4K::SIZE);
//! assert!(range.contains(PhysicalAddress::new(0x10_1000), Size4K::SIZE));
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`, and
//!   `Hash`, making them suitable as ordering keys.
//! - All alignment calculations are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;

pub use page_size::{PAGE_SIZE, PageSize, Size4K};
pub use physical_address::{PhysicalAddress, PhysicalRange};
