//! ELF Binary Loader
//!
//! Turns an executable on disk into a runnable user image: a populated
//! address space plus the entry point and initial stack pointer.
//!
//! # ELF32 Format Support
//!
//! - ELF32 header validation (i386, executable, version 1)
//! - Program headers: PT_LOAD mapped, dynamic linking rejected
//! - Initial `main(argc, argv)` stack in the page below PHYS_BASE
//!
//! # Security
//!
//! - Validates every program header before mapping any page
//! - Keeps page 0 and kernel space out of reach of loadable segments
//! - Denies writes to the executable while it is loaded

pub mod elf;
pub mod segment_loader;
pub mod stack;

pub use elf::{validate_and_open, ExecutableImage, SegmentDescriptor, SegmentFlags, SegmentMapping};
pub use segment_loader::{map_image, map_segment};
pub use stack::{build_stack, setup_stack};

use crate::config::UserAddr;
use crate::error::LoadError;
use crate::platform::{File, Platform};
use crate::vfs::with_fs_lock;

/// A program ready to enter user mode.
pub struct LoadedProgram<F: File> {
    /// Entry point virtual address
    pub entry: UserAddr,
    /// Initial stack pointer
    pub stack_pointer: UserAddr,
    /// The executable, kept open and write-denied until exit
    pub executable: F,
}

/// Load `argv[0]` into `space` and build its initial stack.
///
/// `space` must be the active address space. On failure the executable is
/// closed again; pages already mapped stay in `space` for its owner to
/// destroy.
pub fn load<P: Platform>(
    platform: &P,
    argv: &[&str],
    space: &mut P::AddressSpace,
) -> Result<LoadedProgram<P::File>, LoadError> {
    let Some(&name) = argv.first() else {
        return Err(LoadError::Open);
    };

    let mut image = validate_and_open(platform, name)?;

    let result = map_image(&mut image, space).and_then(|pages| {
        log::debug!("{}: mapped {} pages", name, pages);
        setup_stack(space, argv).map_err(LoadError::from)
    });

    match result {
        Ok(stack_pointer) => Ok(LoadedProgram {
            entry: image.entry,
            stack_pointer,
            executable: image.into_file(),
        }),
        Err(e) => {
            log::warn!("{}: {}", name, e);
            let file = image.into_file();
            if let Err(close_err) = with_fs_lock(|| file.close()) {
                log::warn!("{}: close after failed load: {}", name, close_err);
            }
            Err(e)
        }
    }
}
