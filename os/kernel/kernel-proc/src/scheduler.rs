//! The per-CPU scheduler loop.
//!
//! Each CPU repeatedly locks the table, picks the next process under the
//! two-level policy, and switches to it with the table lock as the baton. The
//! process hands the lock back when it enters the scheduler again; only then
//! is the lock released and the scan restarted from priority 0.

use crate::context::Resume;
use crate::kernel::Kernel;
use crate::proc::ProcState;
use log::{debug, trace};
use std::sync::atomic::Ordering;
use std::thread;

/// Runs the scheduler of CPU `id` on the calling thread until power-off.
pub(crate) fn run_cpu(kernel: &Kernel, id: usize) {
    let cpu = &kernel.cpus[id];
    cpu.scheduler.bind_current();
    debug!("cpu{id}: scheduler started");

    while let Some(mut table) = kernel.lock_table() {
        let Some(slot) = table.pick_next() else {
            // Nothing to run. CPU 0 still owns the clock, so sleepers
            // waiting on ticks make progress.
            if id == 0 {
                table.tick();
            }
            drop(table);
            thread::yield_now();
            continue;
        };

        let p = table.proc_mut(slot);
        p.state = ProcState::Running;
        p.cpu = Some(id);
        let Some(context) = p.context.clone() else {
            panic!("runnable process {:?} has no context", p.pid);
        };
        trace!("cpu{id}: dispatch {:?} at p{}", p.pid, p.priority.level());
        cpu.dispatches.fetch_add(1, Ordering::Relaxed);

        match cpu.scheduler.switch(&context, Resume::Run(table.hand_off())) {
            Resume::Run(baton) => {
                let mut table = kernel.ptable.adopt(baton);
                table.proc_mut(slot).cpu = None;
            }
            Resume::Halt => break,
        }
    }
    debug!("cpu{id}: scheduler stopped");
}
