//! ELF Segment Memory Loader
//!
//! Maps the loadable segments of a validated [`ExecutableImage`] into a
//! process address space, one page at a time.
//!
//! # Process
//!
//! For each PT_LOAD segment:
//! 1. Seek to the page-aligned file offset
//! 2. Allocate a user page at each page of the segment's range
//! 3. Read the file-backed part of the page
//! 4. Zero the remainder (BSS and page tails)

use alloc::vec::Vec;

use super::elf::{ExecutableImage, SegmentDescriptor, SegmentMapping};
use crate::config::{PAGE_MASK, PAGE_SIZE};
use crate::error::LoadError;
use crate::platform::{AddressSpace, File, PageFlags};
use crate::vfs::with_fs_lock;

/// Map one segment, returning the number of pages mapped.
///
/// `mapping.read_bytes + mapping.zero_bytes` must be a whole number of pages
/// and both addresses page-aligned. On failure the page being filled is
/// freed; earlier pages stay mapped and go away with the address space.
pub fn map_segment<F: File, S: AddressSpace>(
    file: &mut F,
    space: &mut S,
    mapping: &SegmentMapping,
) -> Result<usize, LoadError> {
    debug_assert_eq!((mapping.read_bytes + mapping.zero_bytes) % PAGE_SIZE, 0);
    debug_assert_eq!(mapping.mem_page & PAGE_MASK, 0);
    debug_assert_eq!(mapping.file_page & PAGE_MASK, 0);

    let mut flags = PageFlags::USER;
    if mapping.writable {
        flags |= PageFlags::WRITABLE;
    }

    with_fs_lock(|| file.seek(mapping.file_page));

    let mut read_bytes = mapping.read_bytes;
    let mut zero_bytes = mapping.zero_bytes;
    let mut upage = mapping.mem_page;
    let mut pages_mapped = 0;

    while read_bytes > 0 || zero_bytes > 0 {
        let page_read_bytes = read_bytes.min(PAGE_SIZE);
        let page_zero_bytes = PAGE_SIZE - page_read_bytes;

        let kpage = space
            .alloc_page(upage, flags)
            .ok_or(LoadError::OutOfMemory)?;

        let read = with_fs_lock(|| file.read(&mut kpage[..page_read_bytes]));
        if read != page_read_bytes {
            space.free_page(upage);
            log::warn!(
                "segment page {:#010x}: read {} of {} bytes",
                upage,
                read,
                page_read_bytes
            );
            return Err(LoadError::ShortRead);
        }
        kpage[page_read_bytes..].fill(0);

        read_bytes -= page_read_bytes;
        zero_bytes -= page_zero_bytes;
        upage += PAGE_SIZE as u32;
        pages_mapped += 1;
    }

    Ok(pages_mapped)
}

/// Map every loadable segment of `image`, returning the total page count.
pub fn map_image<F: File, S: AddressSpace>(
    image: &mut ExecutableImage<F>,
    space: &mut S,
) -> Result<usize, LoadError> {
    let segments: Vec<SegmentDescriptor> = image.loadable().copied().collect();
    let mut pages_mapped = 0;
    for segment in segments {
        let mapping = segment.mapping();
        pages_mapped += map_segment(image.file_mut(), space, &mapping)?;
        log::trace!(
            "mapped segment {:#010x}+{:#x} ({}{})",
            segment.vaddr,
            segment.mem_size,
            if mapping.writable { "rw" } else { "ro" },
            if segment.file_size == 0 { ", bss" } else { "" }
        );
    }
    Ok(pages_mapped)
}
