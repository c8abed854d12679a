//! Open-resource handles.
//!
//! The kernel does not implement a file system; a [`File`] is an opaque
//! named resource that is shared by reference. `fork` duplicates the
//! descriptor table (one more reference per handle), `exit` and `close` drop
//! references. The resource closes when its last reference goes.

use crate::error::ProcError;
use crate::param::NOFILE;
use log::trace;
use std::sync::Arc;

#[derive(Debug, Eq, PartialEq)]
pub struct File {
    name: Box<str>,
}

impl File {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for File {
    fn drop(&mut self) {
        trace!("file {} closed", self.name);
    }
}

/// File descriptor: index into the per-process table.
pub type Fd = usize;

/// Puts `file` into the lowest free descriptor slot.
pub(crate) fn install(
    files: &mut [Option<Arc<File>>; NOFILE],
    file: Arc<File>,
) -> Result<Fd, ProcError> {
    let (fd, slot) = files
        .iter_mut()
        .enumerate()
        .find(|(_, slot)| slot.is_none())
        .ok_or(ProcError::TooManyOpenFiles)?;
    *slot = Some(file);
    Ok(fd)
}

/// Takes the handle out of slot `fd`.
pub(crate) fn remove(
    files: &mut [Option<Arc<File>>; NOFILE],
    fd: Fd,
) -> Result<Arc<File>, ProcError> {
    files
        .get_mut(fd)
        .and_then(Option::take)
        .ok_or(ProcError::BadDescriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_free_descriptor_is_reused() {
        let mut files: [Option<Arc<File>>; NOFILE] = Default::default();
        assert_eq!(install(&mut files, Arc::new(File::new("a"))), Ok(0));
        assert_eq!(install(&mut files, Arc::new(File::new("b"))), Ok(1));
        assert_eq!(remove(&mut files, 0).unwrap().name(), "a");
        assert_eq!(install(&mut files, Arc::new(File::new("c"))), Ok(0));
    }

    #[test]
    fn table_limits() {
        let mut files: [Option<Arc<File>>; NOFILE] = Default::default();
        let shared = Arc::new(File::new("console"));
        for fd in 0..NOFILE {
            assert_eq!(install(&mut files, Arc::clone(&shared)), Ok(fd));
        }
        assert_eq!(
            install(&mut files, Arc::clone(&shared)),
            Err(ProcError::TooManyOpenFiles)
        );
        assert_eq!(Arc::strong_count(&shared), NOFILE + 1);
        assert_eq!(remove(&mut files, NOFILE).unwrap_err(), ProcError::BadDescriptor);
        drop(files);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
