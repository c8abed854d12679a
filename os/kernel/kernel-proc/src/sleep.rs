//! Sleep and wakeup.
//!
//! A sleeper marks itself SLEEPING on a channel and enters the scheduler in
//! one critical section of the table lock. `wakeup` takes the same lock, so a
//! wakeup can never slip in between the decision to sleep and the sleep.
//! Waking only makes a process runnable: every sleeper re-checks its own
//! condition afterwards.

use crate::proc::{Channel, ProcState};
use crate::process::Process;
use crate::table::TableGuard;

impl Process {
    /// Sleeps on `chan` until woken (or killed). The table lock is held on
    /// entry and again on return.
    pub(crate) fn sleep_locked<'a>(&'a self, mut table: TableGuard<'a>, chan: Channel) -> TableGuard<'a> {
        let p = table.proc_mut(self.slot);
        p.chan = Some(chan);
        p.state = ProcState::Sleeping;

        let mut table = self.sched(table);
        table.proc_mut(self.slot).chan = None;
        table
    }

    /// Sleeps for at least `ticks` timer ticks.
    ///
    /// Returns early only by exiting, when the process is killed.
    pub fn sleep(&self, ticks: u64) {
        let mut table = self.lock();
        let start = table.ticks();
        while table.ticks() - start < ticks {
            if table.proc(self.slot).killed {
                drop(table);
                self.exit();
            }
            table = self.sleep_locked(table, Channel::Ticks);
        }
        drop(table);
        self.trap_return();
    }

    /// Sleeps on user channel `chan` until `ready` holds.
    ///
    /// `ready` is evaluated with the table lock held, and [`wakeup`] takes the
    /// same lock, so a waker that makes `ready` true before calling `wakeup`
    /// is never missed. Spurious wakeups just re-evaluate `ready`.
    ///
    /// [`wakeup`]: Process::wakeup
    pub fn sleep_until(&self, chan: u64, ready: impl Fn() -> bool) {
        let mut table = self.lock();
        while !ready() {
            if table.proc(self.slot).killed {
                drop(table);
                self.exit();
            }
            table = self.sleep_locked(table, Channel::User(chan));
        }
        drop(table);
        self.trap_return();
    }

    /// Wakes every process sleeping on user channel `chan`.
    pub fn wakeup(&self, chan: u64) {
        self.lock().wakeup(Channel::User(chan));
        self.trap_return();
    }
}
