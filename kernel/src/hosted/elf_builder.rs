//! ELF32 executable builder for hosted runs.

use alloc::vec::Vec;

use crate::config::{round_up, UserAddr, PAGE_MASK, PAGE_SIZE};
use crate::loader::elf::{
    SegmentFlags, ELF_IDENT, EM_386, ET_EXEC, HEADER_SIZE, PROGRAM_HEADER_SIZE, PT_LOAD,
};

/// Entry point of [`ElfBuilder::sample`].
pub const SAMPLE_ENTRY: UserAddr = 0x0804_8080;

/// Text segment contents of [`ElfBuilder::sample`].
pub const SAMPLE_TEXT: &[u8] = b"\x55\x89\xe5\x83\xec\x08\xc9\xc3sample text";

/// Data segment contents of [`ElfBuilder::sample`].
pub const SAMPLE_DATA: &[u8] = b"initialized data";

enum Entry {
    /// Data laid out by the builder at a page-compatible offset
    Segment {
        vaddr: UserAddr,
        data: Vec<u8>,
        mem_size: u32,
        flags: SegmentFlags,
    },
    /// Program header written exactly as given
    Raw([u32; 8]),
}

/// Builds little-endian i386 executables.
pub struct ElfBuilder {
    entry: UserAddr,
    entries: Vec<Entry>,
}

impl ElfBuilder {
    /// An executable with no program headers.
    pub fn new(entry: UserAddr) -> Self {
        Self {
            entry,
            entries: Vec::new(),
        }
    }

    /// A small program: a read-only text segment and a writable data
    /// segment followed by a page and a half of BSS.
    pub fn sample() -> Self {
        Self::new(SAMPLE_ENTRY)
            .segment(
                0x0804_8080,
                SAMPLE_TEXT,
                SAMPLE_TEXT.len() as u32,
                SegmentFlags::R | SegmentFlags::X,
            )
            .segment(
                0x0804_9F00,
                SAMPLE_DATA,
                0x1900,
                SegmentFlags::R | SegmentFlags::W,
            )
    }

    /// Add a loadable segment holding `data`, `mem_size` bytes in memory.
    pub fn segment(
        mut self,
        vaddr: UserAddr,
        data: &[u8],
        mem_size: u32,
        flags: SegmentFlags,
    ) -> Self {
        self.entries.push(Entry::Segment {
            vaddr,
            data: data.to_vec(),
            mem_size,
            flags,
        });
        self
    }

    /// Add a program header with arbitrary field values.
    pub fn program_header(
        mut self,
        p_type: u32,
        offset: u32,
        vaddr: UserAddr,
        file_size: u32,
        mem_size: u32,
        flags: SegmentFlags,
    ) -> Self {
        self.entries.push(Entry::Raw([
            p_type,
            offset,
            vaddr,
            vaddr,
            file_size,
            mem_size,
            flags.bits(),
            PAGE_SIZE as u32,
        ]));
        self
    }

    /// Serialize the executable.
    pub fn build(&self) -> Vec<u8> {
        let table_end = HEADER_SIZE + self.entries.len() * PROGRAM_HEADER_SIZE;
        let mut image = Vec::with_capacity(round_up(table_end, PAGE_SIZE));

        image.extend_from_slice(&ELF_IDENT);
        image.resize(16, 0);
        put_u16(&mut image, ET_EXEC);
        put_u16(&mut image, EM_386);
        put_u32(&mut image, 1); // e_version
        put_u32(&mut image, self.entry);
        put_u32(&mut image, HEADER_SIZE as u32); // e_phoff
        put_u32(&mut image, 0); // e_shoff
        put_u32(&mut image, 0); // e_flags
        put_u16(&mut image, HEADER_SIZE as u16);
        put_u16(&mut image, PROGRAM_HEADER_SIZE as u16);
        put_u16(&mut image, self.entries.len() as u16);
        put_u16(&mut image, 0); // e_shentsize
        put_u16(&mut image, 0); // e_shnum
        put_u16(&mut image, 0); // e_shstrndx
        debug_assert_eq!(image.len(), HEADER_SIZE);

        // Segment data starts on the first page after the table, at the
        // same page offset as its virtual address.
        let mut data_end = round_up(table_end, PAGE_SIZE);
        let mut payload: Vec<(usize, &[u8])> = Vec::new();
        for entry in &self.entries {
            let fields = match entry {
                Entry::Raw(fields) => *fields,
                Entry::Segment {
                    vaddr,
                    data,
                    mem_size,
                    flags,
                } => {
                    let offset = data_end + (*vaddr & PAGE_MASK) as usize;
                    data_end = round_up(offset + data.len().max(1), PAGE_SIZE);
                    payload.push((offset, data.as_slice()));
                    [
                        PT_LOAD,
                        offset as u32,
                        *vaddr,
                        *vaddr,
                        data.len() as u32,
                        *mem_size,
                        flags.bits(),
                        PAGE_SIZE as u32,
                    ]
                }
            };
            for field in fields {
                put_u32(&mut image, field);
            }
        }

        for (offset, data) in payload {
            if image.len() < offset {
                image.resize(offset, 0);
            }
            image.extend_from_slice(data);
        }
        image
    }
}

fn put_u16(image: &mut Vec<u8>, value: u16) {
    image.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut Vec<u8>, value: u32) {
    image.extend_from_slice(&value.to_le_bytes());
}
