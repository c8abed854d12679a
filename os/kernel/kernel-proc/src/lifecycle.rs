//! Process creation and teardown: `fork`, `exit`, `wait` and the root process.
//!
//! Page allocation and release happen with the table lock dropped; the two
//! locks are never held together. A slot under construction stays EMBRYO,
//! invisible to the scheduler, until it is complete.

use crate::context::{Context, Resume};
use crate::error::ProcError;
use crate::kernel::{Exited, Halted, Kernel};
use crate::proc::{Channel, Pid, ProcState};
use crate::process::Process;
use crate::table::ChildScan;
use crate::vm::AddressSpace;
use kernel_memory_addresses::{PageSize, Size4K};
use log::{debug, warn};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe, resume_unwind};
use std::sync::Arc;
use std::thread;

/// Code run by a process. It receives the process's own handle.
pub(crate) type Body = Box<dyn FnOnce(&Process) + Send + 'static>;

impl Kernel {
    /// Claims a slot and gives it a kernel stack.
    fn alloc_proc(&self) -> Result<(usize, Pid), ProcError> {
        let (slot, pid) = self.table().claim()?;
        match self.kmem.allocate_zeroed() {
            Ok(kstack) => {
                self.table().proc_mut(slot).kstack = Some(kstack);
                Ok((slot, pid))
            }
            Err(e) => {
                debug!("pid {pid}: no kernel stack: {e}");
                self.discard_embryo(slot);
                Err(e.into())
            }
        }
    }

    /// Rolls a half-built slot back to UNUSED and frees what it got so far.
    fn discard_embryo(&self, slot: usize) {
        let (kstack, vm) = self.table().discard(slot);
        if let Some(kstack) = kstack {
            self.kmem.release(kstack);
        }
        vm.free(&self.kmem);
    }

    /// Starts the thread that will run `body` once the slot is dispatched.
    fn spawn(self: &Arc<Self>, slot: usize, pid: Pid, name: &str, body: Body) -> Result<Arc<Context>, ProcError> {
        let context = Arc::new(Context::new());
        let handle = {
            let (kernel, context) = (Arc::clone(self), Arc::clone(&context));
            thread::Builder::new()
                .name(format!("{name}-{pid}"))
                .spawn(move || process_main(kernel, slot, pid, context, body))
        };
        let handle = handle.map_err(|e| {
            warn!("pid {pid}: cannot start thread: {e}");
            ProcError::OutOfMemory
        })?;
        context.bind(handle.thread().clone());
        self.register(Arc::clone(&context), handle);
        Ok(context)
    }

    /// Creates the root process. Orphans are reparented to it, and the
    /// machine powers off once `init` returns.
    pub fn userinit(self: &Arc<Self>, init: impl FnOnce(&Process) + Send + 'static) -> Result<Pid, ProcError> {
        let (slot, pid) = self.alloc_proc()?;
        let vm = match AddressSpace::with_size(&self.kmem, Size4K::SIZE) {
            Ok(vm) => vm,
            Err(e) => {
                self.discard_embryo(slot);
                return Err(e);
            }
        };
        let body: Body = Box::new(move |p| {
            init(p);
            p.power_off();
        });
        let context = match self.spawn(slot, pid, "init", body) {
            Ok(context) => context,
            Err(e) => {
                vm.free(&self.kmem);
                self.discard_embryo(slot);
                return Err(e);
            }
        };
        if self.init.set(pid).is_err() {
            panic!("userinit called twice");
        }

        let mut table = self.table();
        let p = table.proc_mut(slot);
        p.name = String::from("init");
        p.vm = vm;
        p.context = Some(context);
        p.state = ProcState::Runnable;
        debug!("userinit: pid {pid}");
        Ok(pid)
    }
}

/// Entry point of every process thread.
fn process_main(kernel: Arc<Kernel>, slot: usize, pid: Pid, context: Arc<Context>, body: Body) {
    // the first dispatch arrives with the table lock, released right away
    let Resume::Run(baton) = context.await_resume() else {
        return;
    };
    let table = kernel.ptable.adopt(baton);
    let cpu = table.proc(slot).cpu.unwrap_or_default();
    drop(table);

    let p = Process {
        kernel: Arc::clone(&kernel),
        pid,
        slot,
        context,
        cpu: Cell::new(cpu),
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        p.trap_return();
        body(&p);
        p.exit();
    }));
    match outcome {
        Ok(()) => {}
        Err(payload) if payload.is::<Exited>() => {}
        // the machine stopped under our feet; let our scheduler go too
        Err(payload) if payload.is::<Halted>() => kernel.cpus[p.cpu.get()].scheduler.halt(),
        Err(payload) => kernel.halt(p.cpu.get(), payload),
    }
}

impl Process {
    /// Creates a child running `body` with a copy of this process's memory
    /// and open files. Returns the child's pid.
    pub fn fork(&self, body: impl FnOnce(&Process) + Send + 'static) -> Result<Pid, ProcError> {
        let result = self.fork_child(Box::new(body));
        self.trap_return();
        result
    }

    fn fork_child(&self, body: Body) -> Result<Pid, ProcError> {
        let kernel = &self.kernel;
        let (slot, pid) = kernel.alloc_proc()?;

        let (name, pages, size, files) = {
            let table = self.lock();
            let parent = table.proc(self.slot);
            (
                parent.name.clone(),
                parent.vm.pages().to_vec(),
                parent.vm.size(),
                parent.files.clone(),
            )
        };
        let vm = match AddressSpace::duplicate(&kernel.kmem, &pages, size) {
            Ok(vm) => vm,
            Err(e) => {
                kernel.discard_embryo(slot);
                return Err(e);
            }
        };
        let context = match kernel.spawn(slot, pid, &name, body) {
            Ok(context) => context,
            Err(e) => {
                vm.free(&kernel.kmem);
                kernel.discard_embryo(slot);
                return Err(e);
            }
        };

        let mut table = self.lock();
        let child = table.proc_mut(slot);
        child.parent = Some(self.pid);
        child.name = name;
        child.vm = vm;
        child.files = files;
        child.context = Some(context);
        child.state = ProcState::Runnable;
        debug!("fork: {} -> {pid}", self.pid);
        Ok(pid)
    }

    /// Terminates the calling process. Never returns.
    ///
    /// Open files are closed, children go to the root process and the parent
    /// is woken. The slot stays ZOMBIE until the parent reaps it.
    ///
    /// # Panics
    /// When called by the root process, which halts the kernel.
    pub fn exit(&self) -> ! {
        let Some(&init) = self.kernel.init.get() else {
            panic!("exit before userinit");
        };
        if init == self.pid {
            panic!("init exiting");
        }

        let files = core::mem::take(&mut self.lock().proc_mut(self.slot).files);
        drop(files);

        let mut table = self.lock();
        if let Some(parent) = table.proc(self.slot).parent {
            table.wakeup(Channel::Proc(parent));
        }
        if table.reparent(self.pid, init) {
            table.wakeup(Channel::Proc(init));
        }
        table.proc_mut(self.slot).state = ProcState::Zombie;
        debug!("exit: {}", self.pid);

        // the scheduler takes the lock; this thread only unwinds from here
        self.kernel.resume(self.cpu.get(), Resume::Run(table.hand_off()));
        resume_unwind(Box::new(Exited))
    }

    /// Waits for a child to exit and reclaims it. Returns the child's pid.
    pub fn wait(&self) -> Result<Pid, ProcError> {
        let result = self.reap_child();
        self.trap_return();
        result
    }

    fn reap_child(&self) -> Result<Pid, ProcError> {
        let mut table = self.lock();
        loop {
            match table.scan_children(self.pid) {
                ChildScan::Zombie(slot) => {
                    let remains = table.reap(slot);
                    drop(table);
                    if let Some(kstack) = remains.kstack {
                        self.kernel.kmem.release(kstack);
                    }
                    remains.vm.free(&self.kernel.kmem);
                    debug!("wait: {} reaped {}", self.pid, remains.pid);
                    return Ok(remains.pid);
                }
                ChildScan::NoChildren => return Err(ProcError::NoChildren),
                ChildScan::Alive => {
                    if table.proc(self.slot).killed {
                        return Err(ProcError::Killed);
                    }
                    table = self.sleep_locked(table, Channel::Proc(self.pid));
                }
            }
        }
    }

    /// Ends the root process and stops the machine.
    fn power_off(&self) -> ! {
        let mut table = self.lock();
        table.proc_mut(self.slot).state = ProcState::Zombie;
        self.kernel.power_off();
        self.kernel.resume(self.cpu.get(), Resume::Run(table.hand_off()));
        resume_unwind(Box::new(Exited))
    }
}
