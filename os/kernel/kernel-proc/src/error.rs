use kernel_alloc::AllocError;

/// Failures reported to callers of process operations.
///
/// Invariant violations are not errors; they halt the kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcError {
    #[error("process table full")]
    OutOfProcessSlots,
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("no children to wait for")]
    NoChildren,
    #[error("no such process")]
    NotFound,
    #[error("process was killed")]
    Killed,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("too many open files")]
    TooManyOpenFiles,
    /// An access or resize outside the process's memory.
    #[error("address outside process memory")]
    BadAddress,
}

impl From<AllocError> for ProcError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}
