//! KPIO user-program subsystem
//!
//! Loads 32-bit x86 ELF executables into fresh address spaces, builds the
//! initial `main(argc, argv)` stack and tracks the parent/child lifecycle of
//! the resulting processes (`exec`, `wait`, `exit`).
//!
//! # Layout
//!
//! - [`loader`]: ELF validation, segment mapping, initial stack
//! - [`process`]: process records, child sets and the lifecycle manager
//! - [`platform`]: traits for the collaborators the kernel provides
//!   (page allocator, page tables, threads, files, counting signals)
//! - [`vfs`]: file-system lock and per-process file table
//! - [`syscall`]: integer-returning entry points used by the syscall layer
//! - [`console`]: console output and the `log` backend
//!
//! The crate is `no_std` + `alloc`. Under `cfg(test)` or the `std` feature
//! the [`hosted`] module supplies an in-memory platform.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[macro_use]
pub mod console;

pub mod config;
pub mod error;
pub mod loader;
pub mod platform;
pub mod process;
pub mod syscall;
pub mod vfs;

#[cfg(any(test, feature = "std"))]
pub mod hosted;

#[cfg(test)]
mod tests;

pub use error::{CreationError, LoadError, StackBuildError, WaitError};
pub use platform::{AddressSpace, CountingSignal, File, Platform, Termination};
pub use process::{Process, ProcessId, ProcessState};
