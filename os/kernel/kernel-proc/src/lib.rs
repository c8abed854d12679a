//! # Kernel Processes and Scheduling
//!
//! A process table with a two-level feedback-priority scheduler, running on a
//! simulated multi-CPU machine.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Machine                         │
//! │    • boots memory, starts one thread per CPU        │
//! │    • runs the root process until it powers off      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │             Scheduler loop (per CPU)                │
//! │    • first RUNNABLE at p0, else first at p1         │
//! │    • table lock passed as a baton on every switch   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Process table + system calls               │
//! │    • fork / exit / wait / kill, sleep / wakeup      │
//! │    • timer tick: quantum of 5 ticks, then p1        │
//! │    • user memory and kernel stacks from kernel-alloc│
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Process bodies are Rust closures that call into the kernel through their
//! [`Process`] handle. Each one runs on its own host thread, but a CPU only
//! ever runs one context at a time, and control moves between a CPU's
//! scheduler and its process by explicit hand-off.
//!
//! ## Usage
//! ```rust
//! use kernel_proc::{KernelConfig, Machine};
//!
//! let machine = Machine::boot(KernelConfig::default());
//! let report = machine
//!     .run(|init| {
//!         let child = init.fork(|p| p.compute(3)).expect("room for a child");
//!         assert_eq!(init.wait(), Ok(child));
//!     })
//!     .expect("init starts");
//! assert!(report.ticks >= 3);
//! ```

mod context;
mod error;
mod file;
mod kernel;
mod lifecycle;
mod machine;
pub mod param;
mod proc;
mod process;
mod scheduler;
mod sleep;
mod table;
mod trap;
mod vm;

pub use error::ProcError;
pub use file::{Fd, File};
pub use machine::{Machine, RunReport};
pub use param::KernelConfig;
pub use proc::{Channel, Pid, Priority, ProcInfo, ProcState};
pub use process::Process;

pub use kernel_alloc::{AllocStats, CoalescePolicy, NodeRecycling};
