//! User-program configuration constants.
//!
//! Compile-time layout and limits for the 32-bit user ABI. Values here
//! affect the address-space layout, the stack builder and the loader.

/// A user virtual address. User space is 32 bits wide.
pub type UserAddr = u32;

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Mask of the offset-within-page bits.
pub const PAGE_MASK: UserAddr = (PAGE_SIZE as UserAddr) - 1;

/// First kernel virtual address. User space is `[0, PHYS_BASE)`.
pub const PHYS_BASE: UserAddr = 0xC000_0000;

/// Size of a user pointer in bytes.
pub const POINTER_SIZE: usize = 4;

/// Upper bound on the program-header count accepted by the loader.
pub const MAX_PROGRAM_HEADERS: u16 = 1024;

/// Bytes of a thread name (the program name is truncated to this).
pub const THREAD_NAME_MAX: usize = 15;

/// Space kept free at the bottom of the stack page for the argv pointer,
/// argc and the fake return address.
pub const STACK_SAFETY_MARGIN: usize = 3 * POINTER_SIZE;

/// Longest accepted command line, in bytes. The command line has to fit in
/// one page together with its terminator.
pub const MAX_COMMAND_LINE: usize = PAGE_SIZE - 1;

/// Scheduler priority of user-process threads.
pub const PRI_DEFAULT: u8 = 31;

/// Exit status recorded when a process terminates without calling `exit`.
pub const EXIT_ABNORMAL: i32 = -1;

/// First descriptor handed out by the per-process file table.
/// 0 and 1 belong to the console.
pub const FIRST_USER_FD: i32 = 2;

/// Default log level for the kernel logger.
pub const LOG_LEVEL: log::LevelFilter = if cfg!(debug_assertions) {
    log::LevelFilter::Debug
} else {
    log::LevelFilter::Info
};

/// Round `value` down to a multiple of `align` (a power of two).
pub const fn round_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Round `value` up to a multiple of `align` (a power of two).
pub const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Whether `addr` lies in user space.
pub const fn is_user_vaddr(addr: UserAddr) -> bool {
    addr < PHYS_BASE
}

/// Base address of the single initial stack page.
pub const fn stack_page() -> UserAddr {
    PHYS_BASE - PAGE_SIZE as UserAddr
}
