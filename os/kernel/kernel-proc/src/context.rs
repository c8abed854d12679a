//! # Execution contexts
//!
//! Every CPU scheduler and every process runs on its own host thread, but at
//! most one of them per CPU is ever *active*. Control moves between them with
//! an explicit two-sided hand-off: the running side delivers a [`Resume`]
//! message to the target context and parks until a message arrives for
//! itself.
//!
//! ```text
//!   scheduler (cpu0)                       process 7
//!   ────────────────                       ─────────
//!   lock table, pick 7
//!   switch(7, Run(baton)) ──────────────▶  adopt(baton) … runs …
//!        (parked)                          state = RUNNABLE
//!   adopt(baton) ◀────────────────────────  switch(cpu0, Run(baton))
//!   unlock table                                (parked)
//! ```
//!
//! The table lock travels inside the message as a [`Baton`], so it is held
//! continuously across the switch.

use kernel_sync::{Baton, RawTicket, SpinLock, SyncOnceCell};
use std::thread::{self, Thread};

/// Message that resumes a parked context.
#[derive(Debug)]
pub(crate) enum Resume {
    /// Continue; the receiver now holds the process-table lock.
    Run(Baton<RawTicket>),
    /// The machine stopped; unwind and let the thread end.
    Halt,
}

pub(crate) struct Context {
    thread: SyncOnceCell<Thread>,
    inbox: SpinLock<Option<Resume>>,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            thread: SyncOnceCell::new(),
            inbox: SpinLock::new(None),
        }
    }

    /// Ties the context to the thread that will wait on it.
    ///
    /// Must happen before anyone can deliver to the context.
    pub fn bind(&self, thread: Thread) {
        if self.thread.set(thread).is_err() {
            panic!("context bound twice");
        }
    }

    pub fn bind_current(&self) {
        self.bind(thread::current());
    }

    /// Hands `msg` to the context and wakes its thread.
    ///
    /// # Panics
    /// If the context already has an undelivered message, or was never bound.
    pub fn deliver(&self, msg: Resume) {
        let pending = self.inbox.with_lock(|slot| slot.replace(msg));
        assert!(pending.is_none(), "context resumed twice");
        self.wake();
    }

    /// Overwrites whatever is pending with [`Resume::Halt`].
    pub fn halt(&self) {
        // a pending Run baton is dropped here, the lock is dead anyway
        self.inbox.with_lock(|slot| *slot = Some(Resume::Halt));
        if self.thread.get().is_some() {
            self.wake();
        }
    }

    /// Parks the calling thread until a message arrives.
    pub fn await_resume(&self) -> Resume {
        loop {
            if let Some(msg) = self.inbox.with_lock(Option::take) {
                return msg;
            }
            thread::park();
        }
    }

    /// Transfers control to `to` and waits for control to come back.
    pub fn switch(&self, to: &Self, msg: Resume) -> Resume {
        to.deliver(msg);
        self.await_resume()
    }

    fn wake(&self) {
        match self.thread.get() {
            Some(t) => t.unpark(),
            None => panic!("resuming a context without a thread"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_sync::TicketMutex;
    use std::sync::Arc;

    #[test]
    fn ping_pong_carries_the_lock() {
        let counter = Arc::new(TicketMutex::new(0_u32));
        let main = Arc::new(Context::new());
        let other = Arc::new(Context::new());
        main.bind_current();

        let worker = {
            let (main, other, counter) = (Arc::clone(&main), Arc::clone(&other), Arc::clone(&counter));
            thread::spawn(move || {
                for _ in 0..3 {
                    let Resume::Run(baton) = other.await_resume() else {
                        return;
                    };
                    let mut guard = counter.adopt(baton);
                    *guard += 1;
                    main.deliver(Resume::Run(guard.hand_off()));
                }
            })
        };
        other.bind(worker.thread().clone());

        for round in 1..=3 {
            let guard = counter.lock();
            let Resume::Run(baton) = main.switch(&other, Resume::Run(guard.hand_off())) else {
                panic!("unexpected halt");
            };
            let guard = counter.adopt(baton);
            assert_eq!(*guard, round);
        }
        worker.join().unwrap();
        assert!(!counter.is_locked());
    }

    #[test]
    fn halt_wakes_a_parked_context() {
        let ctx = Arc::new(Context::new());
        let waiter = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || matches!(ctx.await_resume(), Resume::Halt))
        };
        ctx.bind(waiter.thread().clone());
        ctx.halt();
        assert!(waiter.join().unwrap());
    }
}
