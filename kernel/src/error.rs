//! Error types for loading and process lifecycle.

use core::fmt;

use crate::platform::SpawnError;

/// Why an executable could not be loaded into a new process.
///
/// Never leaves the executing process: it collapses into the boolean load
/// outcome the creator observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// No memory for the address space or one of its pages
    OutOfMemory,
    /// The executable could not be opened
    Open,
    /// Header identification, type, machine, version or table geometry rejected
    BadHeader,
    /// A program header lies outside the file or could not be read in full
    BadSegmentTable,
    /// Dynamic linking is not supported (PT_DYNAMIC, PT_INTERP, PT_SHLIB)
    UnsupportedSegment,
    /// A loadable segment failed validation
    InvalidSegment,
    /// The file ended before a segment's bytes were read
    ShortRead,
    /// The initial stack could not be built
    Stack(StackBuildError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Open => write!(f, "open failed"),
            Self::BadHeader => write!(f, "bad executable header"),
            Self::BadSegmentTable => write!(f, "bad program header table"),
            Self::UnsupportedSegment => write!(f, "dynamic linking not supported"),
            Self::InvalidSegment => write!(f, "invalid loadable segment"),
            Self::ShortRead => write!(f, "segment data truncated"),
            Self::Stack(e) => write!(f, "stack setup failed: {}", e),
        }
    }
}

impl From<StackBuildError> for LoadError {
    fn from(e: StackBuildError) -> Self {
        LoadError::Stack(e)
    }
}

/// Initial stack construction errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackBuildError {
    /// The stack page could not be allocated
    OutOfMemory,
    /// Arguments do not fit in one page above the safety margin
    Overflow,
}

impl fmt::Display for StackBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Overflow => write!(f, "arguments overflow the stack page"),
        }
    }
}

/// `wait` outcome when there is nothing to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Not a direct child, or already waited for
    NoSuchChild,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchChild => write!(f, "no such child"),
        }
    }
}

/// Process creation errors, as seen by the creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationError {
    /// The command line names no program
    EmptyCommand,
    /// The command line does not fit in a page
    CommandTooLong,
    /// The command line could not be duplicated
    OutOfMemory,
    /// No process ID left that user programs can represent
    PidsExhausted,
    /// The executing thread could not be created
    Spawn(SpawnError),
    /// The child started but failed to load its executable
    LoadFailed,
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command line"),
            Self::CommandTooLong => write!(f, "command line too long"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::PidsExhausted => write!(f, "process IDs exhausted"),
            Self::Spawn(e) => write!(f, "thread creation failed: {}", e),
            Self::LoadFailed => write!(f, "load failed"),
        }
    }
}

impl From<SpawnError> for CreationError {
    fn from(e: SpawnError) -> Self {
        CreationError::Spawn(e)
    }
}
