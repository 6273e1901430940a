//! System call entry points for process management.
//!
//! The trap handler decodes arguments from the user stack and calls these.
//! Each returns the value placed in `eax`; every failure becomes -1.

use crate::platform::{Platform, Termination};
use crate::process::{Process, ProcessId};

/// Value returned to user space on failure.
pub const SYSCALL_ERROR: i32 = -1;

/// `exec(cmd_line)`: start a child, returning its PID.
pub fn sys_exec<P: Platform>(process: &mut Process<P>, cmd_line: &str) -> i32 {
    match process.execute(cmd_line) {
        Ok(pid) => pid.as_user().unwrap_or(SYSCALL_ERROR),
        Err(e) => {
            log::debug!("{}: exec \"{}\": {}", process.name(), cmd_line, e);
            SYSCALL_ERROR
        }
    }
}

/// `wait(pid)`: exit status of direct child `pid`.
pub fn sys_wait<P: Platform>(process: &mut Process<P>, pid: i32) -> i32 {
    let Ok(raw) = u64::try_from(pid) else {
        return SYSCALL_ERROR;
    };
    process.wait(ProcessId(raw)).unwrap_or(SYSCALL_ERROR)
}

/// `exit(status)`: record the status. The caller stops running user code
/// and returns the result from [`Platform::enter_user`].
pub fn sys_exit<P: Platform>(process: &mut Process<P>, status: i32) -> Termination {
    process.set_exit_status(status);
    Termination::Exit(status)
}

/// `open(name)`: new file descriptor.
pub fn sys_open<P: Platform>(process: &mut Process<P>, name: &str) -> i32 {
    process.open(name).unwrap_or(SYSCALL_ERROR)
}

/// `close(fd)`.
pub fn sys_close<P: Platform>(process: &mut Process<P>, fd: i32) -> i32 {
    match process.close(fd) {
        Ok(()) => 0,
        Err(_) => SYSCALL_ERROR,
    }
}
