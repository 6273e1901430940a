//! Process Table
//!
//! Process identifiers, the record a parent shares with each child, and the
//! per-parent table of children.
//!
//! A [`ProcessRecord`] is owned by its parent: first by the creating call
//! while the child loads, then by the parent's [`ChildSet`]. The child only
//! holds a `Weak` to it and upgrades it briefly to publish its load outcome
//! and exit status. Once the parent reaps the child or exits, the record is
//! gone and a still-running child simply finds nothing to publish to.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use hashbrown::HashMap;
use spin::Mutex;

use crate::config::EXIT_ABNORMAL;
use crate::platform::CountingSignal;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl ProcessId {
    /// Initial process ID (always 1)
    pub const INIT: ProcessId = ProcessId(1);

    /// Generate a new unique process ID
    pub fn new() -> Self {
        static NEXT_PID: AtomicU64 = AtomicU64::new(2);
        ProcessId(NEXT_PID.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The ID as user programs see it, if it fits in a syscall result.
    pub fn as_user(&self) -> Option<i32> {
        i32::try_from(self.0).ok()
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state, as seen by the parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Thread created, executable not yet loaded
    Spawning,
    /// Executable loaded, about to enter user mode
    Loaded,
    /// Running user code
    Running,
    /// Exited; status available to the parent
    Exited,
    /// Status collected by the parent
    Reaped,
    /// The executable could not be loaded
    LoadFailed,
}

impl ProcessState {
    /// Whether the process may still run user code.
    pub fn is_live(&self) -> bool {
        matches!(self, ProcessState::Loaded | ProcessState::Running)
    }
}

/// State a parent shares with one child.
pub struct ProcessRecord<S: CountingSignal> {
    pid: ProcessId,
    name: String,
    state: Mutex<ProcessState>,
    exit_status: Mutex<Option<i32>>,
    loaded: AtomicBool,
    waited: AtomicBool,
    /// Raised once when the load outcome is known
    load_signal: S,
    /// Raised once when the child has exited
    exit_signal: S,
}

impl<S: CountingSignal> ProcessRecord<S> {
    /// Create a record for a child that is about to be spawned.
    pub fn new(pid: ProcessId, name: String, load_signal: S, exit_signal: S) -> Self {
        Self {
            pid,
            name,
            state: Mutex::new(ProcessState::Spawning),
            exit_status: Mutex::new(None),
            loaded: AtomicBool::new(false),
            waited: AtomicBool::new(false),
            load_signal,
            exit_signal,
        }
    }

    /// Child's process ID
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Child's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    /// Move to `state`.
    pub fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Exit status, once the child has exited.
    pub fn exit_status(&self) -> Option<i32> {
        *self.exit_status.lock()
    }

    /// Whether the load succeeded. Only meaningful after [`Self::wait_loaded`].
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Child side: publish the load outcome and wake the creator.
    pub fn publish_load(&self, success: bool) {
        self.loaded.store(success, Ordering::Release);
        self.set_state(if success {
            ProcessState::Loaded
        } else {
            ProcessState::LoadFailed
        });
        self.load_signal.up();
    }

    /// Creator side: block until the load outcome is published.
    pub fn wait_loaded(&self) -> bool {
        self.load_signal.down();
        self.is_loaded()
    }

    /// Child side: publish the exit status and wake a waiting parent.
    pub fn publish_exit(&self, status: i32) {
        *self.exit_status.lock() = Some(status);
        self.set_state(ProcessState::Exited);
        self.exit_signal.up();
    }

    /// Parent side: mark the child as waited for. Returns `false` if it
    /// already was.
    pub fn claim_wait(&self) -> bool {
        !self.waited.swap(true, Ordering::AcqRel)
    }

    /// Parent side: block until the child exits and return its status.
    pub fn wait_exit(&self) -> i32 {
        self.exit_signal.down();
        self.exit_status().unwrap_or(EXIT_ABNORMAL)
    }
}

impl<S: CountingSignal> Drop for ProcessRecord<S> {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state.is_live() {
            log::debug!("orphaning {} (pid {})", self.name, self.pid);
        }
    }
}

/// Children of one process that loaded successfully and were not reaped.
pub struct ChildSet<S: CountingSignal> {
    children: HashMap<ProcessId, Arc<ProcessRecord<S>>>,
}

impl<S: CountingSignal> ChildSet<S> {
    /// Create an empty child set
    pub fn new() -> Self {
        Self {
            children: HashMap::new(),
        }
    }

    /// Add a child record
    pub fn insert(&mut self, record: Arc<ProcessRecord<S>>) {
        self.children.insert(record.pid(), record);
    }

    /// Get a child by PID
    pub fn get(&self, pid: ProcessId) -> Option<&Arc<ProcessRecord<S>>> {
        self.children.get(&pid)
    }

    /// Remove a child
    pub fn remove(&mut self, pid: ProcessId) -> Option<Arc<ProcessRecord<S>>> {
        self.children.remove(&pid)
    }

    /// Check whether `pid` is a child in this set
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.children.contains_key(&pid)
    }

    /// Remove every child, returning their records
    pub fn drain(&mut self) -> Vec<Arc<ProcessRecord<S>>> {
        self.children.drain().map(|(_, record)| record).collect()
    }

    /// Get count of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether there are no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl<S: CountingSignal> Default for ChildSet<S> {
    fn default() -> Self {
        Self::new()
    }
}
