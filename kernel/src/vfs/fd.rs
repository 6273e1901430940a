//! Per-process file descriptor table.
//!
//! Maps integer descriptors to open files. Descriptors 0 and 1 belong to the
//! console and are never handed out; user files start at
//! [`FIRST_USER_FD`](crate::config::FIRST_USER_FD).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;

use crate::config::FIRST_USER_FD;
use crate::platform::File;

/// Maximum number of open files per process.
pub const MAX_FDS: usize = 128;

/// Descriptor table errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdError {
    /// No file by that name
    NotFound,
    /// The descriptor is not open in this table
    InvalidFd,
    /// The table is full
    TooManyOpenFiles,
}

impl fmt::Display for FdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no such file"),
            Self::InvalidFd => write!(f, "invalid file descriptor"),
            Self::TooManyOpenFiles => write!(f, "too many open files"),
        }
    }
}

/// Open files of one process.
pub struct FileTable<F: File> {
    entries: BTreeMap<i32, F>,
    next_fd: i32,
}

impl<F: File> FileTable<F> {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_fd: FIRST_USER_FD,
        }
    }

    /// Insert an open file and return its descriptor.
    ///
    /// On a full table the file is handed back so the caller can close it.
    pub fn insert(&mut self, file: F) -> Result<i32, (FdError, F)> {
        if self.entries.len() >= MAX_FDS {
            return Err((FdError::TooManyOpenFiles, file));
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        self.entries.insert(fd, file);
        Ok(fd)
    }

    /// Remove `fd` from the table, returning its file.
    pub fn remove(&mut self, fd: i32) -> Result<F, FdError> {
        self.entries.remove(&fd).ok_or(FdError::InvalidFd)
    }

    /// Remove every open file, lowest descriptor first.
    pub fn drain(&mut self) -> Vec<(i32, F)> {
        core::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Number of open files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no file is open.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F: File> Default for FileTable<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FileError;

    struct NullFile;

    impl File for NullFile {
        fn read(&mut self, _buf: &mut [u8]) -> usize {
            0
        }
        fn seek(&mut self, _pos: u32) {}
        fn length(&self) -> u32 {
            0
        }
        fn deny_write(&mut self) {}
        fn close(self) -> Result<(), FileError> {
            Ok(())
        }
    }

    #[test]
    fn test_descriptors_start_after_console() {
        let mut table = FileTable::new();
        let a = table.insert(NullFile).ok().unwrap();
        let b = table.insert(NullFile).ok().unwrap();
        assert_eq!(a, FIRST_USER_FD);
        assert_eq!(b, FIRST_USER_FD + 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_and_reuse() {
        let mut table = FileTable::new();
        let fd = table.insert(NullFile).ok().unwrap();
        assert!(table.remove(fd).is_ok());
        assert_eq!(table.remove(fd).err(), Some(FdError::InvalidFd));
        // Descriptors are not recycled.
        assert_eq!(table.insert(NullFile).ok(), Some(fd + 1));
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = FileTable::new();
        for _ in 0..3 {
            assert!(table.insert(NullFile).is_ok());
        }
        let drained = table.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].0, FIRST_USER_FD);
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_limit() {
        let mut table = FileTable::new();
        for _ in 0..MAX_FDS {
            assert!(table.insert(NullFile).is_ok());
        }
        match table.insert(NullFile) {
            Err((e, _file)) => assert_eq!(e, FdError::TooManyOpenFiles),
            Ok(_) => panic!("table accepted more than MAX_FDS files"),
        }
    }
}
