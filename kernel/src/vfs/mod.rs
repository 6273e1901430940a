//! File-system glue for user processes.
//!
//! The file layer underneath is not reentrant. Every call into it from this
//! crate goes through [`with_fs_lock`], which holds one global lock for the
//! duration of a single operation and never across a blocking wait.

pub mod fd;

use spin::Mutex;

pub use fd::{FdError, FileTable};

/// Serializes every call into the file layer.
static FS_LOCK: Mutex<()> = Mutex::new(());

/// Run one file-layer operation under the global file-system lock.
pub fn with_fs_lock<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = FS_LOCK.lock();
    f()
}
