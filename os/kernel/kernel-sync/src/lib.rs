//! # Kernel synchronization primitives
//!
//! Spin-based locks shared by the page allocator and the process table.
//!
//! * [`SpinLock`] is a test-and-test-and-set lock with an RAII guard. The page
//!   allocator keeps its free-block index behind one.
//! * [`Mutex`] is generic over a raw lock, here the FIFO [`RawTicket`]. Its
//!   guard can be converted into a [`Baton`], a token proving the lock is held
//!   while no guard exists. The baton travels with a context switch and is
//!   turned back into a guard on the other side via [`Mutex::adopt`], so
//!   exactly one logical holder exists across the switch.
//! * [`SyncOnceCell`] is a spin-waiting once-cell for values published once
//!   (e.g. the thread that backs an execution context).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_ticket;
mod spin_lock;
mod sync_once_cell;

pub use mutex::{Baton, Mutex, MutexGuard};
pub use raw_ticket::RawTicket;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;

pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> TicketMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

pub trait RawLock {
    fn raw_lock(&self);
    fn raw_try_lock(&self) -> bool;
    /// Whether some holder currently owns the lock. Only meaningful as a
    /// sanity check; the answer may be stale by the time it is used.
    fn raw_is_locked(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The lock must be held, by the caller or by a baton the caller owns.
    unsafe fn raw_unlock(&self);
}
