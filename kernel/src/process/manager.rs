//! Process Manager
//!
//! Creation, waiting and teardown of user processes.
//!
//! A [`Process`] is the kernel-side state of one user program and lives on
//! the kernel thread that runs it. [`Process::execute`] spawns a new thread
//! for the child and blocks until the child reports whether its executable
//! loaded; [`Process::wait`] blocks until a direct child exits;
//! [`Process::exit`] releases everything the process holds.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use super::context::UserFrame;
use super::table::{ChildSet, ProcessId, ProcessRecord, ProcessState};
use crate::config::{EXIT_ABNORMAL, MAX_COMMAND_LINE, PRI_DEFAULT, THREAD_NAME_MAX};
use crate::error::{CreationError, LoadError, WaitError};
use crate::loader;
use crate::platform::{File, Platform, Termination};
use crate::vfs::{with_fs_lock, FdError, FileTable};

/// A user process.
pub struct Process<P: Platform> {
    platform: Arc<P>,
    /// Thread name: the program name, truncated
    name: String,
    pid: ProcessId,
    /// Shared with the parent; dangling once the parent is gone
    record: Weak<ProcessRecord<P::Signal>>,
    children: ChildSet<P::Signal>,
    files: FileTable<P::File>,
    /// Open and write-denied for as long as the process runs
    executable: Option<P::File>,
    space: Option<P::AddressSpace>,
    exit_status: Option<i32>,
}

impl<P: Platform> Process<P> {
    /// The initial process: no parent, no address space. Processes it
    /// creates become its children.
    pub fn init(platform: Arc<P>, name: &str) -> Self {
        Self::new(platform, thread_name(name), ProcessId::INIT, Weak::new())
    }

    fn new(
        platform: Arc<P>,
        name: String,
        pid: ProcessId,
        record: Weak<ProcessRecord<P::Signal>>,
    ) -> Self {
        Self {
            platform,
            name,
            pid,
            record,
            children: ChildSet::new(),
            files: FileTable::new(),
            executable: None,
            space: None,
            exit_status: None,
        }
    }

    /// Process ID
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Process name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The platform this process runs on
    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    /// The process's address space, once it has one.
    pub fn address_space(&self) -> Option<&P::AddressSpace> {
        self.space.as_ref()
    }

    /// Whether `pid` is a direct child that has not been waited for.
    pub fn has_child(&self, pid: ProcessId) -> bool {
        self.children.contains(pid)
    }

    /// Number of children not yet waited for.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Number of open file descriptors.
    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }

    /// Exit status recorded so far.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Record the exit status. The first status recorded is kept.
    pub fn set_exit_status(&mut self, status: i32) {
        if self.exit_status.is_none() {
            self.exit_status = Some(status);
        }
    }

    /// Start a new process running `cmd_line` as a child of this one.
    ///
    /// The first whitespace-separated word names the executable; the words
    /// become its `argv`. Blocks until the child has either loaded its
    /// executable or failed to.
    pub fn execute(&mut self, cmd_line: &str) -> Result<ProcessId, CreationError> {
        if cmd_line.len() > MAX_COMMAND_LINE {
            return Err(CreationError::CommandTooLong);
        }
        let program = cmd_line
            .split_ascii_whitespace()
            .next()
            .ok_or(CreationError::EmptyCommand)?;

        // The child gets its own copy; ours may not outlive the call.
        let mut command = String::new();
        command
            .try_reserve_exact(cmd_line.len())
            .map_err(|_| CreationError::OutOfMemory)?;
        command.push_str(cmd_line);

        let name = thread_name(program);
        let pid = ProcessId::new();
        // A child whose PID exec cannot return could never be waited for.
        if pid.as_user().is_none() {
            return Err(CreationError::PidsExhausted);
        }
        let record = Arc::new(ProcessRecord::new(
            pid,
            name.clone(),
            self.platform.new_signal(),
            self.platform.new_signal(),
        ));

        let entry = {
            let platform = Arc::clone(&self.platform);
            let record = Arc::downgrade(&record);
            let name = name.clone();
            Box::new(move || run_process(platform, name, pid, record, command))
        };

        let tid = self.platform.spawn(&name, PRI_DEFAULT, entry)?;
        log::debug!("{}: spawned {} (pid {}) on thread {}", self.name, name, pid, tid);

        if !record.wait_loaded() {
            log::debug!("{}: {} failed to load", self.name, name);
            return Err(CreationError::LoadFailed);
        }

        self.children.insert(record);
        Ok(pid)
    }

    /// Wait for direct child `pid` to exit and return its exit status.
    ///
    /// Each child can be waited for once. Children killed by the kernel
    /// report -1.
    pub fn wait(&mut self, pid: ProcessId) -> Result<i32, WaitError> {
        let record = self
            .children
            .get(pid)
            .cloned()
            .ok_or(WaitError::NoSuchChild)?;
        if !record.claim_wait() {
            return Err(WaitError::NoSuchChild);
        }

        let status = record.wait_exit();
        record.set_state(ProcessState::Reaped);
        self.children.remove(pid);
        log::debug!("{}: reaped {} (pid {}): {}", self.name, record.name(), pid, status);
        Ok(status)
    }

    /// Open `name` and return its descriptor.
    pub fn open(&mut self, name: &str) -> Result<i32, FdError> {
        let platform = &self.platform;
        let file = with_fs_lock(|| platform.open(name)).ok_or(FdError::NotFound)?;
        match self.files.insert(file) {
            Ok(fd) => Ok(fd),
            Err((e, file)) => {
                close_file(&self.name, file);
                Err(e)
            }
        }
    }

    /// Close descriptor `fd`.
    pub fn close(&mut self, fd: i32) -> Result<(), FdError> {
        let file = self.files.remove(fd)?;
        close_file(&self.name, file);
        Ok(())
    }

    /// Terminate the process.
    ///
    /// Prints the exit line, closes every file, releases the children,
    /// reports the status to the parent and destroys the address space.
    pub fn exit(mut self) {
        let status = *self.exit_status.get_or_insert(EXIT_ABNORMAL);
        console_println!("{}: exit({})", self.name, status);

        if let Some(executable) = self.executable.take() {
            close_file(&self.name, executable);
        }
        for (_fd, file) in self.files.drain() {
            close_file(&self.name, file);
        }

        // Children that are still running carry on without a parent.
        let children = self.children.drain();
        if !children.is_empty() {
            log::debug!("{}: releasing {} children", self.name, children.len());
        }
        drop(children);

        if let Some(record) = self.record.upgrade() {
            record.publish_exit(status);
        }

        self.platform.activate(None);
        if let Some(space) = self.space.take() {
            self.platform.destroy_address_space(space);
        }
    }

    fn publish_load(&self, success: bool) {
        if let Some(record) = self.record.upgrade() {
            record.publish_load(success);
        }
    }

    fn publish_state(&self, state: ProcessState) {
        if let Some(record) = self.record.upgrade() {
            record.set_state(state);
        }
    }

    /// Create and activate an address space and load `argv[0]` into it.
    fn load(&mut self, argv: &[&str]) -> Result<UserFrame, LoadError> {
        let space = self
            .platform
            .create_address_space()
            .ok_or(LoadError::OutOfMemory)?;
        self.platform.activate(Some(&space));
        let space = self.space.insert(space);

        let program = loader::load(&*self.platform, argv, space)?;
        self.executable = Some(program.executable);
        Ok(UserFrame::new_user(program.entry, program.stack_pointer))
    }
}

/// Body of a new process's thread.
fn run_process<P: Platform>(
    platform: Arc<P>,
    name: String,
    pid: ProcessId,
    record: Weak<ProcessRecord<P::Signal>>,
    command: String,
) {
    let mut process = Process::new(platform, name, pid, record);
    let argv: Vec<&str> = command.split_ascii_whitespace().collect();

    let frame = match process.load(&argv) {
        Ok(frame) => frame,
        Err(e) => {
            log::debug!("{}: load failed: {}", process.name, e);
            process.publish_load(false);
            process.exit();
            return;
        }
    };
    process.publish_load(true);

    log::debug!(
        "{}: entering user mode at {:#010x}, esp {:#010x}",
        process.name,
        frame.eip,
        frame.esp
    );
    process.publish_state(ProcessState::Running);

    let platform = Arc::clone(&process.platform);
    match platform.enter_user(&mut process, frame) {
        Termination::Exit(status) => process.set_exit_status(status),
        Termination::Fault => log::debug!("{}: killed", process.name),
    }
    process.exit();
}

fn close_file<F: File>(owner: &str, file: F) {
    if let Err(e) = with_fs_lock(|| file.close()) {
        log::warn!("{}: close failed: {}", owner, e);
    }
}

/// Program name as a thread name: at most [`THREAD_NAME_MAX`] bytes,
/// cut on a character boundary.
pub fn thread_name(program: &str) -> String {
    let mut end = program.len().min(THREAD_NAME_MAX);
    while !program.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&program[..end])
}
