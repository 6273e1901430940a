//! Kernel services the user-program subsystem is built on.
//!
//! The page allocator, page tables, scheduler, file system and semaphores
//! live elsewhere in the kernel. This module names what is needed from each
//! of them; [`Platform`] ties them together.

use alloc::boxed::Box;
use core::fmt;

use crate::config::UserAddr;
use crate::process::{Process, UserFrame};

bitflags::bitflags! {
    /// Flags for user page allocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Take the frame from the user pool.
        const USER = 0x0001;
        /// Zero the frame before mapping it.
        const ZERO = 0x0002;
        /// Map the page writable from user mode.
        const WRITABLE = 0x0004;
    }
}

/// An open file.
///
/// Not reentrant: every call must be made with the file-system lock held
/// (see [`crate::vfs::with_fs_lock`]).
pub trait File: Send {
    /// Read up to `buf.len()` bytes at the current position, returning the
    /// number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Move the current position to `pos` bytes from the start.
    fn seek(&mut self, pos: u32);

    /// File length in bytes.
    fn length(&self) -> u32;

    /// Refuse writes to the underlying inode while this handle is open.
    fn deny_write(&mut self);

    /// Close the handle, re-allowing writes if this handle denied them.
    fn close(self) -> Result<(), FileError>;
}

/// A user page table together with the pages mapped into it.
pub trait AddressSpace: Send {
    /// Allocate a page and map it at `upage` (page-aligned).
    ///
    /// Returns the kernel view of the new page, `PAGE_SIZE` bytes long.
    /// Returns `None` when memory is exhausted or `upage` is already mapped.
    fn alloc_page(&mut self, upage: UserAddr, flags: PageFlags) -> Option<&mut [u8]>;

    /// Unmap the page at `upage` and return its frame to the allocator.
    fn free_page(&mut self, upage: UserAddr);
}

/// Counting semaphore.
pub trait CountingSignal: Send + Sync {
    /// Block until the count is positive, then decrement it.
    fn down(&self);

    /// Increment the count, waking one blocked waiter.
    fn up(&self);
}

/// Kernel thread identifier returned by [`Platform::spawn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// No memory for the thread control block or kernel stack
    OutOfMemory,
    /// The scheduler refused the thread
    Rejected,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Rejected => write!(f, "rejected by scheduler"),
        }
    }
}

/// Failure reported by the file layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// The underlying device reported an error
    Io,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "I/O error"),
        }
    }
}

/// How a process left user mode for the last time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process called `exit(status)`
    Exit(i32),
    /// The kernel killed the process (fault, bad system call argument)
    Fault,
}

/// The kernel services a process runs on.
pub trait Platform: Send + Sync + Sized + 'static {
    /// Open file handle.
    type File: File + 'static;
    /// Per-process page table.
    type AddressSpace: AddressSpace + 'static;
    /// Counting semaphore.
    type Signal: CountingSignal + 'static;

    /// Create an empty user address space (kernel mappings only).
    fn create_address_space(&self) -> Option<Self::AddressSpace>;

    /// Install `space` as the running page table, or the kernel-only table
    /// for `None`.
    fn activate(&self, space: Option<&Self::AddressSpace>);

    /// Free the page table and every page still mapped in it.
    fn destroy_address_space(&self, space: Self::AddressSpace);

    /// Open a file by name.
    fn open(&self, name: &str) -> Option<Self::File>;

    /// Create a counting semaphore with an initial count of zero.
    fn new_signal(&self) -> Self::Signal;

    /// Create a kernel thread running `entry`.
    fn spawn(
        &self,
        name: &str,
        priority: u8,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<ThreadId, SpawnError>;

    /// Transfer control to user mode with `frame`, the process's address
    /// space already active.
    ///
    /// Returns once the process will never run user code again; the caller
    /// tears it down.
    fn enter_user(&self, process: &mut Process<Self>, frame: UserFrame) -> Termination;
}
