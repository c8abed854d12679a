//! Process records: one slot of the process table.

use crate::context::Context;
use crate::file::File;
use crate::param::{NOFILE, QUANTUM_TICKS};
use crate::vm::AddressSpace;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;
use std::sync::Arc;

/// Process identifier. Assigned from a counter starting at 1 and never reused
/// within one boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u32);

impl Pid {
    #[inline]
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Life-cycle state of a slot.
///
/// ```text
/// UNUSED → EMBRYO → RUNNABLE ⇄ RUNNING → ZOMBIE → UNUSED
///                      ↑          ↓
///                      └─ SLEEPING ┘
/// ```
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum ProcState {
    #[default]
    Unused,
    /// Being built; invisible to the scheduler.
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl ProcState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Embryo => "embryo",
            Self::Sleeping => "sleep",
            Self::Runnable => "runble",
            Self::Running => "run",
            Self::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Scheduling level. `High` always runs before `Low`.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    /// Level 0: new work, limited to [`QUANTUM_TICKS`] before demotion.
    #[default]
    High,
    /// Level 1: no quantum limit, no promotion back.
    Low,
}

impl Priority {
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Low => 1,
        }
    }
}

/// What a sleeping process waits for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Channel {
    /// A child of this process changing state; used by `wait`.
    Proc(Pid),
    /// The global tick counter advancing.
    Ticks,
    /// Any other token agreed on by the processes involved.
    User(u64),
}

/// Read-only snapshot of a process, as printed by `ps`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub name: String,
    pub state: ProcState,
    pub priority: Priority,
    pub ticks_used: u32,
    pub parent: Option<Pid>,
    pub killed: bool,
    /// Bytes of user memory.
    pub size: u64,
    pub open_files: usize,
}

impl fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<6} {} p{} t{} {}B",
            self.pid,
            self.state,
            self.name,
            self.priority.level(),
            self.ticks_used,
            self.size
        )?;
        if self.killed {
            f.write_str(" killed")?;
        }
        Ok(())
    }
}

/// One slot of the process table. Every field is protected by the table lock.
#[derive(Default)]
pub(crate) struct Proc {
    pub pid: Option<Pid>,
    pub name: String,
    pub state: ProcState,
    pub priority: Priority,
    /// Ticks consumed at the current level.
    pub ticks_used: u32,
    pub parent: Option<Pid>,
    pub killed: bool,
    /// Valid only while `Sleeping`.
    pub chan: Option<Channel>,
    /// CPU that dispatched the process, while it is `Running`.
    pub cpu: Option<usize>,
    pub kstack: Option<PhysicalAddress>,
    pub vm: AddressSpace,
    pub files: [Option<Arc<File>>; NOFILE],
    pub context: Option<Arc<Context>>,
}

impl Proc {
    #[inline]
    pub fn is(&self, pid: Pid) -> bool {
        self.state != ProcState::Unused && self.pid == Some(pid)
    }

    /// Timer-tick accounting for the process running on the ticking CPU.
    ///
    /// Returns `true` when the tick used up the quantum and demoted the
    /// process.
    pub fn account_tick(&mut self) -> bool {
        if self.state != ProcState::Running {
            return false;
        }
        self.ticks_used += 1;
        if self.priority == Priority::High && self.ticks_used >= QUANTUM_TICKS {
            self.priority = Priority::Low;
            self.ticks_used = 0;
            return true;
        }
        false
    }

    pub fn info(&self) -> Option<ProcInfo> {
        if self.state == ProcState::Unused {
            return None;
        }
        Some(ProcInfo {
            pid: self.pid?,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            ticks_used: self.ticks_used,
            parent: self.parent,
            killed: self.killed,
            size: self.vm.size(),
            open_files: self.files.iter().flatten().count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(priority: Priority) -> Proc {
        Proc {
            pid: Some(Pid::new(3)),
            state: ProcState::Running,
            priority,
            ..Proc::default()
        }
    }

    #[test]
    fn fifth_tick_demotes_and_resets() {
        let mut p = running(Priority::High);
        for tick in 1..QUANTUM_TICKS {
            assert!(!p.account_tick());
            assert_eq!(p.ticks_used, tick);
            assert_eq!(p.priority, Priority::High);
        }
        assert!(p.account_tick());
        assert_eq!(p.priority, Priority::Low);
        assert_eq!(p.ticks_used, 0);
    }

    #[test]
    fn low_priority_has_no_quantum() {
        let mut p = running(Priority::Low);
        for _ in 0..3 * QUANTUM_TICKS {
            assert!(!p.account_tick());
        }
        assert_eq!(p.priority, Priority::Low);
        assert_eq!(p.ticks_used, 3 * QUANTUM_TICKS);
    }

    #[test]
    fn ticks_only_count_while_running() {
        let mut p = running(Priority::High);
        p.state = ProcState::Runnable;
        assert!(!p.account_tick());
        assert_eq!(p.ticks_used, 0);
    }

    #[test]
    fn unused_slots_have_no_info() {
        assert!(Proc::default().info().is_none());
        let info = running(Priority::Low).info().unwrap();
        assert_eq!(info.pid, Pid::new(3));
        assert_eq!(info.to_string(), "3 run     p1 t0 0B");
    }
}
