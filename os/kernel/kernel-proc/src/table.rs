//! The process table: a fixed array of [`Proc`] slots behind one lock.

use crate::error::ProcError;
use crate::proc::{Channel, Pid, Priority, Proc, ProcInfo, ProcState};
use crate::vm::AddressSpace;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::{MutexGuard, RawTicket};
use log::{debug, trace};

pub(crate) type TableGuard<'a> = MutexGuard<'a, ProcTable, RawTicket>;

pub(crate) struct ProcTable {
    procs: Box<[Proc]>,
    next_pid: u32,
    /// Timer ticks since boot.
    ticks: u64,
}

/// What a wait-style scan of a parent's children found.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ChildScan {
    /// Slot of a child that has exited.
    Zombie(usize),
    /// Children exist, none has exited yet.
    Alive,
    NoChildren,
}

/// Memory of a reaped process, released after the table lock is dropped.
pub(crate) struct Remains {
    pub pid: Pid,
    pub kstack: Option<PhysicalAddress>,
    pub vm: AddressSpace,
}

impl ProcTable {
    pub fn new(nproc: usize) -> Self {
        Self {
            procs: (0..nproc).map(|_| Proc::default()).collect(),
            next_pid: 1,
            ticks: 0,
        }
    }

    #[inline]
    pub fn proc(&self, slot: usize) -> &Proc {
        &self.procs[slot]
    }

    #[inline]
    pub fn proc_mut(&mut self, slot: usize) -> &mut Proc {
        &mut self.procs[slot]
    }

    #[inline]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn find(&self, pid: Pid) -> Option<usize> {
        self.procs.iter().position(|p| p.is(pid))
    }

    /// Claims an unused slot for a new process: EMBRYO, fresh pid, top
    /// priority, no ticks used.
    pub fn claim(&mut self) -> Result<(usize, Pid), ProcError> {
        let slot = self
            .procs
            .iter()
            .position(|p| p.state == ProcState::Unused)
            .ok_or(ProcError::OutOfProcessSlots)?;
        let pid = Pid::new(self.next_pid);
        self.next_pid += 1;

        self.procs[slot] = Proc {
            pid: Some(pid),
            state: ProcState::Embryo,
            priority: Priority::High,
            ticks_used: 0,
            ..Proc::default()
        };
        Ok((slot, pid))
    }

    /// Slot of the process the scheduler should run next.
    ///
    /// The first RUNNABLE process at priority 0 in table order; only when
    /// there is none, the first RUNNABLE process at priority 1.
    pub fn pick_next(&self) -> Option<usize> {
        let runnable_at = |level: Priority| {
            self.procs
                .iter()
                .position(|p| p.state == ProcState::Runnable && p.priority == level)
        };
        runnable_at(Priority::High).or_else(|| runnable_at(Priority::Low))
    }

    /// Makes every process sleeping on `chan` runnable.
    pub fn wakeup(&mut self, chan: Channel) {
        let mut woken = 0;
        for p in self.procs.iter_mut() {
            if p.state == ProcState::Sleeping && p.chan == Some(chan) {
                p.state = ProcState::Runnable;
                woken += 1;
            }
        }
        if woken > 0 {
            trace!("wakeup {chan:?}: {woken} woken");
        }
    }

    /// Advances the clock by one tick and wakes the tick sleepers.
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.wakeup(Channel::Ticks);
    }

    /// Flags `pid` as killed; a sleeper is made runnable so it notices.
    pub fn kill(&mut self, pid: Pid) -> Result<(), ProcError> {
        let slot = self.find(pid).ok_or(ProcError::NotFound)?;
        let p = &mut self.procs[slot];
        p.killed = true;
        if p.state == ProcState::Sleeping {
            p.state = ProcState::Runnable;
        }
        debug!("kill {pid}");
        Ok(())
    }

    /// Hands every child of `from` to `to`. Returns whether one of them has
    /// already exited.
    pub fn reparent(&mut self, from: Pid, to: Pid) -> bool {
        let mut zombie = false;
        for p in self.procs.iter_mut() {
            if p.state != ProcState::Unused && p.parent == Some(from) {
                p.parent = Some(to);
                zombie |= p.state == ProcState::Zombie;
            }
        }
        zombie
    }

    pub fn scan_children(&self, parent: Pid) -> ChildScan {
        let mut alive = false;
        for (slot, p) in self.procs.iter().enumerate() {
            if p.state == ProcState::Unused || p.parent != Some(parent) {
                continue;
            }
            if p.state == ProcState::Zombie {
                return ChildScan::Zombie(slot);
            }
            alive = true;
        }
        if alive {
            ChildScan::Alive
        } else {
            ChildScan::NoChildren
        }
    }

    /// Clears a ZOMBIE slot back to UNUSED and hands out what it owned.
    ///
    /// # Panics
    /// If the slot is not a zombie, e.g. when it was reaped already.
    pub fn reap(&mut self, slot: usize) -> Remains {
        let p = &mut self.procs[slot];
        assert_eq!(p.state, ProcState::Zombie, "reaping a slot that is not a zombie");
        let Some(pid) = p.pid else {
            panic!("zombie without pid in slot {slot}");
        };
        let remains = Remains {
            pid,
            kstack: p.kstack.take(),
            vm: core::mem::take(&mut p.vm),
        };
        *p = Proc::default();
        remains
    }

    /// Puts an EMBRYO slot back to UNUSED after a failed creation.
    pub fn discard(&mut self, slot: usize) -> (Option<PhysicalAddress>, AddressSpace) {
        let p = &mut self.procs[slot];
        assert_eq!(p.state, ProcState::Embryo, "discarding a live process");
        let kstack = p.kstack.take();
        let vm = core::mem::take(&mut p.vm);
        *p = Proc::default();
        (kstack, vm)
    }

    pub fn snapshot(&self) -> Vec<ProcInfo> {
        self.procs.iter().filter_map(Proc::info).collect()
    }
}
