//! The handle a process body uses to enter the kernel.
//!
//! Apart from `pid` and `cpu`, every method is a system call: it runs on the
//! calling process's thread, takes the table lock where it needs to, and
//! checks the killed flag on the way back out, exiting the process if it was
//! set.

use crate::context::{Context, Resume};
use crate::error::ProcError;
use crate::file::{self, Fd, File};
use crate::kernel::{Halted, Kernel};
use crate::proc::{Pid, ProcInfo, ProcState};
use crate::table::TableGuard;
use crate::vm;
use kernel_alloc::AllocStats;
use std::cell::Cell;
use std::panic::resume_unwind;
use std::sync::Arc;

/// A running process, as seen from its own body.
pub struct Process {
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) pid: Pid,
    pub(crate) slot: usize,
    pub(crate) context: Arc<Context>,
    /// CPU the process was last dispatched on.
    pub(crate) cpu: Cell<usize>,
}

impl Process {
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// CPU currently running this process.
    #[must_use]
    pub fn cpu(&self) -> usize {
        self.cpu.get()
    }

    #[inline]
    pub(crate) fn lock(&self) -> TableGuard<'_> {
        self.kernel.table()
    }

    /// Gives the CPU back to the scheduler and returns once dispatched again.
    ///
    /// The caller holds the table lock and has already moved itself out of
    /// RUNNING; the lock travels to the scheduler and comes back with the
    /// next dispatch, possibly on another CPU.
    pub(crate) fn sched<'a>(&'a self, table: TableGuard<'a>) -> TableGuard<'a> {
        let state = table.proc(self.slot).state;
        assert_ne!(state, ProcState::Running, "sched running");

        let scheduler = &self.kernel.cpus[self.cpu.get()].scheduler;
        match self.context.switch(scheduler, Resume::Run(table.hand_off())) {
            Resume::Run(baton) => {
                let table = self.kernel.ptable.adopt(baton);
                if let Some(cpu) = table.proc(self.slot).cpu {
                    self.cpu.set(cpu);
                }
                table
            }
            Resume::Halt => resume_unwind(Box::new(Halted)),
        }
    }

    /// Exits if the process was killed while in the kernel.
    pub(crate) fn trap_return(&self) {
        let killed = self.lock().proc(self.slot).killed;
        if killed {
            self.exit();
        }
    }

    /// Gives up the CPU for one scheduling round.
    pub fn yield_now(&self) {
        let mut table = self.lock();
        table.proc_mut(self.slot).state = ProcState::Runnable;
        drop(self.sched(table));
        self.trap_return();
    }

    /// Ticks elapsed since boot.
    #[must_use]
    pub fn uptime(&self) -> u64 {
        let ticks = self.lock().ticks();
        self.trap_return();
        ticks
    }

    /// Marks `pid` as killed. The target exits at its next return from the
    /// kernel.
    pub fn kill(&self, pid: Pid) -> Result<(), ProcError> {
        let result = self.lock().kill(pid);
        self.trap_return();
        result
    }

    /// Grows (or with a negative `delta`, shrinks) user memory. Returns the
    /// previous size.
    pub fn grow(&self, delta: i64) -> Result<u64, ProcError> {
        let result = self.resize(delta);
        self.trap_return();
        result
    }

    fn resize(&self, delta: i64) -> Result<u64, ProcError> {
        let (old, new, missing) = {
            let table = self.lock();
            let space = &table.proc(self.slot).vm;
            let old = space.size();
            let new = old.checked_add_signed(delta).ok_or(ProcError::BadAddress)?;
            (old, new, space.missing_pages(new))
        };

        // only this process resizes its own memory, so `old` still holds
        // once the pages are in hand
        let fresh = vm::reserve_pages(&self.kernel.kmem, missing)?;
        let surplus = self.lock().proc_mut(self.slot).vm.resize(new, fresh);
        vm::release_pages(&self.kernel.kmem, surplus);
        Ok(old)
    }

    /// Copies `data` into user memory at `addr`.
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<(), ProcError> {
        let span = self.lock().proc(self.slot).vm.span(addr, data.len());
        let result = span.map(|span| vm::write(&self.kernel.kmem, &span, data));
        self.trap_return();
        result
    }

    /// Fills `buf` from user memory at `addr`.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), ProcError> {
        let span = self.lock().proc(self.slot).vm.span(addr, buf.len());
        let result = span.map(|span| vm::read(&self.kernel.kmem, &span, buf));
        self.trap_return();
        result
    }

    /// Opens a new handle named `name` in the lowest free descriptor.
    pub fn open(&self, name: &str) -> Result<Fd, ProcError> {
        let handle = Arc::new(File::new(name));
        let result = file::install(&mut self.lock().proc_mut(self.slot).files, handle);
        self.trap_return();
        result
    }

    pub fn close(&self, fd: Fd) -> Result<(), ProcError> {
        let handle = file::remove(&mut self.lock().proc_mut(self.slot).files, fd);
        // the last reference closes outside the table lock
        let result = handle.map(drop);
        self.trap_return();
        result
    }

    /// The handle open at `fd`, if any.
    #[must_use]
    pub fn file(&self, fd: Fd) -> Option<Arc<File>> {
        let handle = self.lock().proc(self.slot).files.get(fd).cloned().flatten();
        self.trap_return();
        handle
    }

    /// Snapshot of this process.
    ///
    /// # Panics
    /// Never for a live process: its own slot cannot be unused.
    #[must_use]
    pub fn info(&self) -> ProcInfo {
        let info = self.lock().proc(self.slot).info();
        self.trap_return();
        match info {
            Some(info) => info,
            None => panic!("process {} lost its slot", self.pid),
        }
    }

    /// Snapshots of every process in the table.
    #[must_use]
    pub fn ps(&self) -> Vec<ProcInfo> {
        let procs = self.lock().snapshot();
        self.trap_return();
        procs
    }

    /// Statistics of the physical page allocator.
    #[must_use]
    pub fn mem_stats(&self) -> AllocStats {
        let stats = self.kernel.kmem.stats();
        self.trap_return();
        stats
    }
}
