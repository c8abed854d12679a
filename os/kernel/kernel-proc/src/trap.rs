//! Timer interrupts.
//!
//! A process body burns CPU time in whole ticks with [`Process::compute`].
//! Every tick is delivered as a timer trap to the running process: CPU 0
//! advances the clock, the tick is charged to the process's quantum, and the
//! process is forced back into the scheduler.

use crate::process::Process;
use crate::proc::ProcState;
use log::debug;

impl Process {
    /// Runs for `ticks` timer ticks without blocking.
    pub fn compute(&self, ticks: u32) {
        for _ in 0..ticks {
            self.timer_trap();
        }
    }

    fn timer_trap(&self) {
        let mut table = self.lock();
        if self.cpu.get() == 0 {
            table.tick();
        }

        let p = table.proc_mut(self.slot);
        if p.account_tick() {
            debug!("pid {} used its quantum, demoted to p1", self.pid);
        }
        p.state = ProcState::Runnable;
        drop(self.sched(table));

        self.trap_return();
    }
}
