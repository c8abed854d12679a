use crate::{RawLock, RawUnlock};
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr;

pub struct Mutex<T, R> {
    raw: R,
    cell: UnsafeCell<T>,
    _no_send_sync: PhantomData<*mut ()>, // !Send/!Sync by default; we implement below
}

unsafe impl<T: Send, R: Sync> Sync for Mutex<T, R> {}
unsafe impl<T: Send, R: Send> Send for Mutex<T, R> {}

impl<T, R> Mutex<T, R> {
    pub const fn from_raw(raw: R, value: T) -> Self {
        Self {
            raw,
            cell: UnsafeCell::new(value),
            _no_send_sync: PhantomData,
        }
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    fn id(&self) -> usize {
        ptr::from_ref(self).cast::<()>().addr()
    }
}

pub struct MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    m: &'a Mutex<T, R>,
}

impl<'a, T, R> MutexGuard<'a, T, R>
where
    R: RawUnlock,
{
    /// Gives up the guard **without** releasing the lock.
    ///
    /// The returned [`Baton`] is the only evidence that the lock is held. It
    /// must eventually be turned back into a guard with [`Mutex::adopt`] on the
    /// same mutex, possibly by another thread, which then releases it.
    #[inline]
    pub fn hand_off(self) -> Baton<R> {
        let lock = self.m.id();
        core::mem::forget(self);
        Baton {
            lock,
            _raw: PhantomData,
        }
    }

    /// The mutex this guard belongs to.
    #[inline]
    #[must_use]
    pub const fn mutex(&self) -> &'a Mutex<T, R> {
        self.m
    }
}

/// Ownership of a held lock in transit between two execution contexts.
///
/// A baton is created by [`MutexGuard::hand_off`] and consumed by
/// [`Mutex::adopt`]. It is `Send` regardless of `T`, because it grants no
/// access to the protected data by itself.
#[must_use = "a baton stands for a held lock; dropping it leaves the lock held forever"]
pub struct Baton<R> {
    lock: usize,
    _raw: PhantomData<fn() -> R>,
}

impl<R> core::fmt::Debug for Baton<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Baton(0x{:x})", self.lock)
    }
}

impl<T, R> Deref for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.m.cell.get() }
    }
}

impl<T, R> DerefMut for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.m.cell.get() }
    }
}

impl<T, R> Drop for MutexGuard<'_, T, R>
where
    R: RawUnlock,
{
    fn drop(&mut self) {
        unsafe { self.m.raw.raw_unlock() }
    }
}

impl<T, R> Mutex<T, R>
where
    R: RawLock + RawUnlock,
{
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T, R> {
        self.raw.raw_lock();
        MutexGuard { m: self }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T, R>> {
        if self.raw.raw_try_lock() {
            Some(MutexGuard { m: self })
        } else {
            None
        }
    }

    /// Turns a baton for this mutex back into a guard.
    ///
    /// # Panics
    /// If the baton was handed off by a different mutex.
    #[inline]
    pub fn adopt(&self, baton: Baton<R>) -> MutexGuard<'_, T, R> {
        assert_eq!(baton.lock, self.id(), "baton belongs to a different lock");
        debug_assert!(self.raw.raw_is_locked());
        MutexGuard { m: self }
    }

    /// Whether the lock is currently held by anyone.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.raw_is_locked()
    }
}
