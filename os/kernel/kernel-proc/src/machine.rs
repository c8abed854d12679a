//! The simulated machine: boots the kernel, runs the root process on every
//! CPU until it powers off, and reports what happened.

use crate::error::ProcError;
use crate::kernel::{Kernel, describe};
use crate::param::KernelConfig;
use crate::proc::ProcInfo;
use crate::process::Process;
use crate::scheduler;
use kernel_alloc::AllocStats;
use log::{info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

/// State of the machine after power-off.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RunReport {
    /// Timer ticks since boot.
    pub ticks: u64,
    /// Processes dispatched, per CPU.
    pub dispatches: Vec<u64>,
    pub alloc: AllocStats,
    /// Slots still in use; unreaped children of the root show up here.
    pub procs: Vec<ProcInfo>,
}

pub struct Machine {
    kernel: Arc<Kernel>,
}

impl Machine {
    /// Boots physical memory and an empty process table.
    #[must_use]
    pub fn boot(config: KernelConfig) -> Self {
        Self {
            kernel: Kernel::boot(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> KernelConfig {
        self.kernel.config
    }

    /// Statistics of the physical page allocator.
    #[must_use]
    pub fn mem_stats(&self) -> AllocStats {
        self.kernel.kmem.stats()
    }

    /// Runs `init` as the root process and returns once it finishes.
    ///
    /// # Errors
    /// When the root process cannot be created.
    ///
    /// # Panics
    /// Re-raises the panic of any context that halted the kernel.
    pub fn run(self, init: impl FnOnce(&Process) + Send + 'static) -> Result<RunReport, ProcError> {
        let kernel = self.kernel;
        kernel.userinit(init)?;

        let mut cpus = Vec::with_capacity(kernel.cpus.len());
        let mut failed = None;
        for id in 0..kernel.cpus.len() {
            let spawned = {
                let kernel = Arc::clone(&kernel);
                thread::Builder::new().name(format!("cpu{id}")).spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| scheduler::run_cpu(&kernel, id)));
                    if let Err(payload) = outcome {
                        kernel.halt(id, payload);
                    }
                })
            };
            match spawned {
                Ok(handle) => cpus.push(handle),
                Err(e) => {
                    warn!("cpu{id}: cannot start: {e}");
                    kernel.power_off();
                    failed = Some(ProcError::OutOfMemory);
                    break;
                }
            }
        }
        for cpu in cpus {
            // scheduler panics were caught above
            let _ = cpu.join();
        }
        kernel.reap_threads();

        if let Some(payload) = kernel.take_halt() {
            info!("machine halted: {}", describe(payload.as_ref()));
            panic::resume_unwind(payload);
        }
        if let Some(e) = failed {
            return Err(e);
        }

        let Some(table) = kernel.ptable.try_lock() else {
            panic!("process table still locked after power-off");
        };
        let report = RunReport {
            ticks: table.ticks(),
            dispatches: kernel
                .cpus
                .iter()
                .map(|cpu| cpu.dispatches.load(Ordering::Relaxed))
                .collect(),
            alloc: kernel.kmem.stats(),
            procs: table.snapshot(),
        };
        drop(table);
        procdump(&report.procs);
        Ok(report)
    }
}

/// Logs one line per process.
pub(crate) fn procdump(procs: &[ProcInfo]) {
    for p in procs {
        info!("{p}");
    }
}
