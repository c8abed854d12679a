//! Kernel parameters and the boot-time configuration built from them.

use kernel_alloc::{AllocatorConfig, CoalescePolicy, NodeRecycling};

/// Maximum number of processes.
pub const NPROC: usize = 64;
/// Number of CPUs booted by default.
pub const NCPU: usize = 1;
/// Open files per process.
pub const NOFILE: usize = 16;
/// Timer ticks a priority-0 process may run before it is demoted.
pub const QUANTUM_TICKS: u32 = 5;
/// Base of simulated physical memory.
pub const PHYS_BASE: u64 = 0x0010_0000;
/// Pages of simulated physical memory.
pub const PHYS_PAGES: usize = 1024;
/// Pages indexed by the lock-free first allocator phase.
pub const EARLY_PAGES: usize = 256;
/// Capacity of the allocator's node pool. Removed nodes leak by default, so
/// this bounds the number of releases before freed pages start to be dropped.
pub const KMEM_NODES: usize = 2048;

/// Boot configuration of a [`Machine`](crate::Machine).
///
/// ```
/// use kernel_proc::KernelConfig;
/// let config = KernelConfig::default().with_cpus(2).with_nproc(8);
/// assert_eq!(config.ncpu, 2);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelConfig {
    pub nproc: usize,
    pub ncpu: usize,
    pub phys_pages: usize,
    /// Pages handed to the early allocator phase; the rest goes to the late
    /// phase. Clamped to `phys_pages`.
    pub early_pages: usize,
    pub alloc: AllocatorConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            nproc: NPROC,
            ncpu: NCPU,
            phys_pages: PHYS_PAGES,
            early_pages: EARLY_PAGES,
            alloc: AllocatorConfig::default(),
        }
    }
}

impl KernelConfig {
    #[must_use]
    pub const fn with_nproc(mut self, nproc: usize) -> Self {
        self.nproc = nproc;
        self
    }

    #[must_use]
    pub const fn with_cpus(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu;
        self
    }

    #[must_use]
    pub const fn with_phys_pages(mut self, pages: usize) -> Self {
        self.phys_pages = pages;
        self
    }

    #[must_use]
    pub const fn with_early_pages(mut self, pages: usize) -> Self {
        self.early_pages = pages;
        self
    }

    #[must_use]
    pub const fn with_coalesce(mut self, policy: CoalescePolicy) -> Self {
        self.alloc.coalesce = policy;
        self
    }

    #[must_use]
    pub const fn with_recycling(mut self, recycling: NodeRecycling) -> Self {
        self.alloc.recycling = recycling;
        self
    }
}
