//! Kernel-wide state shared by every CPU and process context.

use crate::context::{Context, Resume};
use crate::param::{KernelConfig, PHYS_BASE};
use crate::proc::Pid;
use crate::table::{ProcTable, TableGuard};
use crate::vm::Kmem;
use kernel_alloc::{HostRam, PageAllocator};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalRange, Size4K};
use kernel_sync::{SpinLock, SyncOnceCell, TicketMutex};
use log::{debug, error};
use std::any::Any;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

/// Per-CPU state.
pub(crate) struct Cpu {
    /// Where the scheduler loop of this CPU parks while a process runs.
    pub scheduler: Arc<Context>,
    pub dispatches: AtomicU64,
}

/// Payload of the unwind that ends a process thread after `exit`.
pub(crate) struct Exited;

/// Payload of the unwind that ends a process thread when the machine stops.
pub(crate) struct Halted;

pub(crate) struct Kernel {
    pub config: KernelConfig,
    pub ptable: TicketMutex<ProcTable>,
    pub kmem: Kmem,
    pub cpus: Box<[Cpu]>,
    /// Pid of the root process, set once by `userinit`.
    pub init: SyncOnceCell<Pid>,
    shutdown: AtomicBool,
    /// First fatal panic payload, re-raised by the machine.
    halted: SpinLock<Option<Box<dyn Any + Send>>>,
    /// Every process thread ever spawned, for teardown.
    threads: SpinLock<Vec<(Arc<Context>, JoinHandle<()>)>>,
}

impl Kernel {
    /// Builds physical memory, the page allocator and an empty table.
    ///
    /// The allocator is filled in two phases: the first `early_pages` before
    /// the kernel is shared (no locking), the rest afterwards.
    pub fn boot(config: KernelConfig) -> Arc<Self> {
        let ram = HostRam::new(PhysicalAddress::new(PHYS_BASE), config.phys_pages);
        let managed = ram.range();
        let split = managed.start + Size4K::SIZE * config.early_pages.min(config.phys_pages) as u64;

        let mut kmem = PageAllocator::new(ram, managed, config.alloc);
        kmem.init_early(PhysicalRange::new(managed.start, split));
        debug!("boot: early phase indexed {} bytes", kmem.free_bytes());

        let kernel = Arc::new(Self {
            config,
            ptable: TicketMutex::new(ProcTable::new(config.nproc)),
            kmem,
            cpus: (0..config.ncpu)
                .map(|_| Cpu {
                    scheduler: Arc::new(Context::new()),
                    dispatches: AtomicU64::new(0),
                })
                .collect(),
            init: SyncOnceCell::new(),
            shutdown: AtomicBool::new(false),
            halted: SpinLock::new(None),
            threads: SpinLock::new(Vec::new()),
        });

        kernel.kmem.init_late(PhysicalRange::new(split, managed.end));
        debug!(
            "boot: {} cpus, {} slots, {} bytes free in {} blocks",
            config.ncpu,
            config.nproc,
            kernel.kmem.free_bytes(),
            kernel.kmem.free_blocks()
        );
        kernel
    }

    /// Locks the process table, or gives up once the machine stops.
    ///
    /// A lock left held by a crashed context is never released, so waiters
    /// poll instead of spinning blind.
    pub fn lock_table(&self) -> Option<TableGuard<'_>> {
        loop {
            if self.is_shut_down() {
                return None;
            }
            if let Some(guard) = self.ptable.try_lock() {
                return Some(guard);
            }
            thread::yield_now();
        }
    }

    /// Locks the process table from a process context, unwinding the
    /// process once the machine stops.
    pub fn table(&self) -> TableGuard<'_> {
        self.lock_table()
            .unwrap_or_else(|| resume_unwind(Box::new(Halted)))
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stops every CPU at its next scheduling decision.
    pub fn power_off(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!("power off");
        }
    }

    /// Fatal path: records `payload`, stops the machine and releases the
    /// scheduler of `cpu`, whose process just died.
    pub fn halt(&self, cpu: usize, payload: Box<dyn Any + Send>) {
        error!("kernel halt on cpu{cpu}: {}", describe(payload.as_ref()));
        self.halted.with_lock(|slot| {
            if slot.is_none() {
                *slot = Some(payload);
            }
        });
        self.power_off();
        if let Some(cpu) = self.cpus.get(cpu) {
            cpu.scheduler.halt();
        }
    }

    pub fn take_halt(&self) -> Option<Box<dyn Any + Send>> {
        self.halted.with_lock(Option::take)
    }

    pub fn register(&self, context: Arc<Context>, handle: JoinHandle<()>) {
        self.threads.with_lock(|threads| threads.push((context, handle)));
    }

    /// Ends every process thread. Only called once all CPUs have stopped.
    pub fn reap_threads(&self) {
        let threads = self.threads.with_lock(core::mem::take);
        for (context, _) in &threads {
            context.halt();
        }
        for (_, handle) in threads {
            // panics of process bodies were caught and recorded already
            let _ = handle.join();
        }
    }

    pub fn resume(&self, cpu: usize, msg: Resume) {
        self.cpus[cpu].scheduler.deliver(msg);
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn describe(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_indexes_all_memory() {
        let config = KernelConfig::default().with_phys_pages(64).with_early_pages(16);
        let kernel = Kernel::boot(config);
        assert_eq!(kernel.kmem.free_bytes(), 64 * 4096);
        assert_eq!(kernel.cpus.len(), 1);
        assert!(!kernel.ptable.is_locked());
    }

    #[test]
    fn early_phase_may_cover_everything() {
        let config = KernelConfig::default().with_phys_pages(8).with_early_pages(100);
        let kernel = Kernel::boot(config);
        assert_eq!(kernel.kmem.free_bytes(), 8 * 4096);
    }

    #[test]
    fn lock_table_gives_up_after_power_off() {
        let kernel = Kernel::boot(KernelConfig::default().with_phys_pages(4));
        let held = kernel.ptable.lock();
        kernel.power_off();
        assert!(kernel.lock_table().is_none());
        drop(held);
    }

    #[test]
    fn first_halt_payload_wins() {
        let kernel = Kernel::boot(KernelConfig::default().with_phys_pages(4));
        kernel.cpus[0].scheduler.bind_current();
        kernel.halt(0, Box::new("first"));
        kernel.halt(0, Box::new(String::from("second")));
        assert!(kernel.is_shut_down());
        let payload = kernel.take_halt().unwrap();
        assert_eq!(describe(payload.as_ref()), "first");
    }
}
