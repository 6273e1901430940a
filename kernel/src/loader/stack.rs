//! Initial user stack.
//!
//! Builds the `main(argc, argv)` frame the 32-bit C runtime expects in the
//! single page just below [`PHYS_BASE`](crate::config::PHYS_BASE):
//!
//! ```text
//!   PHYS_BASE
//!   +-------------------+
//!   | argv[n-1] .. "\0" |  strings, last argument highest
//!   | argv[0]   .. "\0" |
//!   +-------------------+
//!   | padding (align 4) |
//!   +-------------------+
//!   | 0                 |  argv[argc]
//!   | &argv[n-1]        |
//!   | ...               |
//!   | &argv[0]          |  <- argv
//!   +-------------------+
//!   | argv              |
//!   | argc              |
//!   | 0                 |  fake return address, <- esp
//!   +-------------------+
//!   page base
//! ```

use alloc::vec::Vec;

use crate::config::{
    round_down, stack_page, UserAddr, PAGE_SIZE, POINTER_SIZE, STACK_SAFETY_MARGIN,
};
use crate::console;
use crate::error::StackBuildError;
use crate::platform::{AddressSpace, PageFlags};

/// Downward-growing writer over one stack page.
struct StackWriter<'a> {
    page: &'a mut [u8],
    base: UserAddr,
    /// Offset of the current stack pointer within the page
    sp: usize,
    /// Lowest offset a push may reach
    floor: usize,
}

impl<'a> StackWriter<'a> {
    fn new(page: &'a mut [u8], base: UserAddr) -> Self {
        Self {
            sp: page.len(),
            page,
            base,
            floor: STACK_SAFETY_MARGIN,
        }
    }

    fn reserve(&mut self, len: usize) -> Result<usize, StackBuildError> {
        let sp = self
            .sp
            .checked_sub(len)
            .filter(|&sp| sp >= self.floor)
            .ok_or(StackBuildError::Overflow)?;
        self.sp = sp;
        Ok(sp)
    }

    /// Push a NUL-terminated copy of `s`, returning its user address.
    fn push_str(&mut self, s: &str) -> Result<UserAddr, StackBuildError> {
        let at = self.reserve(s.len() + 1)?;
        self.page[at..at + s.len()].copy_from_slice(s.as_bytes());
        self.page[at + s.len()] = 0;
        Ok(self.addr())
    }

    fn push_u32(&mut self, value: u32) -> Result<(), StackBuildError> {
        let at = self.reserve(POINTER_SIZE)?;
        self.page[at..at + POINTER_SIZE].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn align(&mut self) {
        self.sp = round_down(self.sp, POINTER_SIZE);
    }

    /// Open the reserved margin for the last three words.
    fn release_margin(&mut self) {
        self.floor = 0;
    }

    fn addr(&self) -> UserAddr {
        self.base + self.sp as UserAddr
    }
}

/// Lay out `argv` in `page`, which is mapped at user address `page_base`.
///
/// Returns the initial stack pointer. Fails with
/// [`StackBuildError::Overflow`] when the strings and pointer array would
/// reach into the bottom [`STACK_SAFETY_MARGIN`] bytes of the page.
pub fn build_stack(
    page: &mut [u8],
    page_base: UserAddr,
    argv: &[&str],
) -> Result<UserAddr, StackBuildError> {
    debug_assert_eq!(page.len(), PAGE_SIZE);

    let mut stack = StackWriter::new(page, page_base);

    // Strings in reverse, so argv[0] ends up lowest.
    let mut addrs: Vec<UserAddr> = Vec::new();
    addrs
        .try_reserve_exact(argv.len())
        .map_err(|_| StackBuildError::OutOfMemory)?;
    for arg in argv.iter().rev() {
        addrs.push(stack.push_str(arg)?);
    }

    stack.align();

    // argv[argc] sentinel, then the pointers last to first.
    stack.push_u32(0)?;
    for &addr in &addrs {
        stack.push_u32(addr)?;
    }
    let argv_ptr = stack.addr();

    stack.release_margin();
    stack.push_u32(argv_ptr)?;
    stack.push_u32(argv.len() as u32)?;
    stack.push_u32(0)?;

    Ok(stack.addr())
}

/// Allocate the stack page in `space` and build the initial frame in it.
///
/// The page is freed again if the arguments do not fit.
pub fn setup_stack<S: AddressSpace>(
    space: &mut S,
    argv: &[&str],
) -> Result<UserAddr, StackBuildError> {
    let base = stack_page();
    let page = space
        .alloc_page(base, PageFlags::USER | PageFlags::ZERO | PageFlags::WRITABLE)
        .ok_or(StackBuildError::OutOfMemory)?;

    match build_stack(page, base, argv) {
        Ok(esp) => {
            log::debug!("initial stack: esp={:#010x}, argc={}", esp, argv.len());
            console::hex_dump(esp, &page[(esp - base) as usize..]);
            Ok(esp)
        }
        Err(e) => {
            space.free_page(base);
            Err(e)
        }
    }
}
