use crate::PageSize;
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical memory address.
///
/// A thin wrapper around a raw `u64` that denotes **physical** addresses
/// (host RAM / MMIO). The type carries intent: free blocks, kernel stacks and
/// user pages are all identified by their physical base.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x0010_2042);
/// assert_eq!(pa.align_down::<Size4K>().as_u64(), 0x0010_2000);
/// assert_eq!(pa.align_up::<Size4K>().as_u64(), 0x0010_3000);
/// assert!(!pa.is_aligned::<Size4K>());
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the address sits on a page boundary of size `S`.
    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0 & (S::SIZE - 1) == 0
    }

    /// Align down to page boundary `S`.
    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !(S::SIZE - 1))
    }

    /// Align up to page boundary `S`.
    #[inline]
    #[must_use]
    pub const fn align_up<S: PageSize>(self) -> Self {
        Self((self.0 + (S::SIZE - 1)) & !(S::SIZE - 1))
    }

    /// Byte distance from `base` to `self`, or `None` if `self` lies below `base`.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u64 {
    #[inline]
    fn from(a: PhysicalAddress) -> Self {
        a.as_u64()
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// A half-open physical range `[start, end)`.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct PhysicalRange {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

impl PhysicalRange {
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self { start, end }
    }

    /// Range of `pages` pages of size `S` starting at `start`.
    #[inline]
    #[must_use]
    pub const fn from_pages<S: PageSize>(start: PhysicalAddress, pages: u64) -> Self {
        Self {
            start,
            end: PhysicalAddress::new(start.as_u64() + pages * S::SIZE),
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64().saturating_sub(self.start.as_u64())
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `[addr, addr + len)` lies entirely inside this range.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress, len: u64) -> bool {
        match addr.as_u64().checked_add(len) {
            Some(end) => addr.as_u64() >= self.start.as_u64() && end <= self.end.as_u64(),
            None => false,
        }
    }

    /// Shrinks the range inwards to whole pages of size `S`.
    #[inline]
    #[must_use]
    pub const fn page_aligned<S: PageSize>(&self) -> Self {
        let start = self.start.align_up::<S>();
        let end = self.end.align_down::<S>();
        if end.as_u64() < start.as_u64() {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }
}

impl fmt::Debug for PhysicalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Size4K;

    #[test]
    fn alignment_helpers() {
        let pa = PhysicalAddress::new(0x1000);
        assert!(pa.is_aligned::<Size4K>());
        assert_eq!(pa.align_up::<Size4K>(), pa);
        assert_eq!((pa + 1).align_up::<Size4K>(), PhysicalAddress::new(0x2000));
        assert_eq!(
            PhysicalAddress::new(0x2000).offset_from(pa),
            Some(0x1000)
        );
        assert_eq!(pa.offset_from(PhysicalAddress::new(0x2000)), None);
    }

    #[test]
    fn range_page_alignment_shrinks_inwards() {
        let r = PhysicalRange::new(PhysicalAddress::new(0x0FFF), PhysicalAddress::new(0x5001));
        let a = r.page_aligned::<Size4K>();
        assert_eq!(a.start.as_u64(), 0x1000);
        assert_eq!(a.end.as_u64(), 0x5000);
        assert_eq!(a.len(), 4 * 4096);

        let tiny = PhysicalRange::new(PhysicalAddress::new(0x1001), PhysicalAddress::new(0x1FFF));
        assert!(tiny.page_aligned::<Size4K>().is_empty());
    }

    #[test]
    fn range_contains_checks_both_ends() {
        let r = PhysicalRange::from_pages::<Size4K>(PhysicalAddress::new(0x10_0000), 4);
        assert!(r.contains(PhysicalAddress::new(0x10_0000), 4096));
        assert!(r.contains(PhysicalAddress::new(0x10_3000), 4096));
        assert!(!r.contains(PhysicalAddress::new(0x10_4000), 4096));
        assert!(!r.contains(PhysicalAddress::new(0x0F_F000), 4096));
        assert!(!r.contains(PhysicalAddress::new(u64::MAX), 4096));
    }
}
