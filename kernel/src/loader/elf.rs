//! ELF32 Parser and Validator
//!
//! Reads and checks the header and program-header table of a 32-bit x86
//! executable. Nothing is mapped here: the whole table is validated first so
//! a rejected image never leaves pages behind in the address space.

use alloc::vec::Vec;
use core::mem::size_of;

use crate::config::{is_user_vaddr, round_up, UserAddr, MAX_PROGRAM_HEADERS, PAGE_MASK, PAGE_SIZE};
use crate::error::LoadError;
use crate::platform::{File, Platform};
use crate::vfs::with_fs_lock;

/// ELF identification: magic, 32-bit class, little endian, version 1.
pub const ELF_IDENT: [u8; 7] = [0x7F, b'E', b'L', b'F', ELFCLASS32, ELFDATA2LSB, EV_CURRENT];

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF version: current
pub const EV_CURRENT: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// Machine type: Intel 80386
pub const EM_386: u16 = 3;

/// Program header type: unused entry
pub const PT_NULL: u32 = 0;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: dynamic linking info
pub const PT_DYNAMIC: u32 = 2;

/// Program header type: interpreter path
pub const PT_INTERP: u32 = 3;

/// Program header type: auxiliary info
pub const PT_NOTE: u32 = 4;

/// Program header type: reserved, unspecified semantics
pub const PT_SHLIB: u32 = 5;

/// Program header type: program header table
pub const PT_PHDR: u32 = 6;

/// Program header type: GNU stack permissions hint
pub const PT_GNU_STACK: u32 = 0x6474_e551;

/// Size of the ELF32 file header.
pub const HEADER_SIZE: usize = size_of::<Elf32Header>();

/// Size of one ELF32 program header.
pub const PROGRAM_HEADER_SIZE: usize = size_of::<Elf32ProgramHeader>();

const _: () = assert!(HEADER_SIZE == 52);
const _: () = assert!(PROGRAM_HEADER_SIZE == 32);

bitflags::bitflags! {
    /// Segment permission flags (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Executable
        const X = 1;
        /// Writable
        const W = 2;
        /// Readable
        const R = 4;
    }
}

/// ELF32 file header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Header {
    /// Magic number and other info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u32,
    /// Program header table file offset
    pub e_phoff: u32,
    /// Section header table file offset
    pub e_shoff: u32,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Decode a header from its on-disk bytes.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        // SAFETY: the buffer is exactly HEADER_SIZE bytes and Elf32Header is
        // repr(C, packed) with only integer fields, so any bit pattern is valid.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Elf32Header) }
    }

    /// Check identification, type, machine, version and table geometry.
    pub fn validate(&self) -> Result<(), LoadError> {
        let ident = self.e_ident;
        if ident[..ELF_IDENT.len()] != ELF_IDENT {
            return Err(LoadError::BadHeader);
        }
        if self.e_type != ET_EXEC || self.e_machine != EM_386 || self.e_version != 1 {
            return Err(LoadError::BadHeader);
        }
        if self.e_phentsize as usize != PROGRAM_HEADER_SIZE {
            return Err(LoadError::BadHeader);
        }
        if self.e_phnum > MAX_PROGRAM_HEADERS {
            return Err(LoadError::BadHeader);
        }
        Ok(())
    }
}

/// ELF32 program header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment file offset
    pub p_offset: u32,
    /// Segment virtual address
    pub p_vaddr: u32,
    /// Segment physical address (unused)
    pub p_paddr: u32,
    /// Segment size in file
    pub p_filesz: u32,
    /// Segment size in memory
    pub p_memsz: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment alignment
    pub p_align: u32,
}

impl Elf32ProgramHeader {
    /// Decode a program header from its on-disk bytes.
    pub fn from_bytes(bytes: &[u8; PROGRAM_HEADER_SIZE]) -> Self {
        // SAFETY: same argument as Elf32Header::from_bytes.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Elf32ProgramHeader) }
    }
}

/// How the loader treats a program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Mapped into the address space
    Load,
    /// Skipped (null, note, phdr, stack hint, unknown types)
    Ignored(u32),
    /// Requires dynamic linking; the image is rejected
    Dynamic(u32),
}

impl SegmentKind {
    /// Classify a raw `p_type`.
    pub fn from_raw(p_type: u32) -> Self {
        match p_type {
            PT_LOAD => SegmentKind::Load,
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => SegmentKind::Dynamic(p_type),
            // PT_NULL, PT_NOTE, PT_PHDR, PT_GNU_STACK and anything unknown
            other => SegmentKind::Ignored(other),
        }
    }
}

/// One accepted program-header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Segment type
    pub kind: SegmentKind,
    /// File offset of segment data
    pub file_offset: u32,
    /// Virtual address of the segment
    pub vaddr: UserAddr,
    /// Size of segment data in file
    pub file_size: u32,
    /// Size of segment in memory
    pub mem_size: u32,
    /// Permission flags
    pub flags: SegmentFlags,
}

/// Page-granular mapping parameters of a loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMapping {
    /// Page-aligned file offset to start reading at
    pub file_page: u32,
    /// Page-aligned virtual address of the first page
    pub mem_page: UserAddr,
    /// Bytes to read from the file
    pub read_bytes: usize,
    /// Bytes to zero after the read bytes
    pub zero_bytes: usize,
    /// Map the pages writable
    pub writable: bool,
}

impl SegmentDescriptor {
    fn from_header(ph: &Elf32ProgramHeader) -> Self {
        SegmentDescriptor {
            kind: SegmentKind::from_raw(ph.p_type),
            file_offset: ph.p_offset,
            vaddr: ph.p_vaddr,
            file_size: ph.p_filesz,
            mem_size: ph.p_memsz,
            flags: SegmentFlags::from_bits_truncate(ph.p_flags),
        }
    }

    /// Check if segment is writable
    pub fn is_writable(&self) -> bool {
        self.flags.contains(SegmentFlags::W)
    }

    /// Validate a loadable segment against a file of `file_len` bytes.
    pub fn validate(&self, file_len: u32) -> Result<(), LoadError> {
        // p_offset and p_vaddr must have the same page offset.
        if self.file_offset & PAGE_MASK != self.vaddr & PAGE_MASK {
            return Err(LoadError::InvalidSegment);
        }

        if self.file_offset > file_len {
            return Err(LoadError::InvalidSegment);
        }

        if self.mem_size < self.file_size || self.mem_size == 0 {
            return Err(LoadError::InvalidSegment);
        }

        // Start and end must be user addresses with no wraparound.
        let end = self
            .vaddr
            .checked_add(self.mem_size)
            .ok_or(LoadError::InvalidSegment)?;
        if !is_user_vaddr(self.vaddr) || !is_user_vaddr(end) {
            return Err(LoadError::InvalidSegment);
        }

        // Page 0 stays unmapped so null pointers keep faulting.
        if (self.vaddr as usize) < PAGE_SIZE {
            return Err(LoadError::InvalidSegment);
        }

        Ok(())
    }

    /// Mapping parameters. Only meaningful for a validated loadable segment.
    pub fn mapping(&self) -> SegmentMapping {
        let page_offset = (self.vaddr & PAGE_MASK) as usize;
        let (read_bytes, zero_bytes) = if self.file_size > 0 {
            // Read the initial part from the file and zero the rest.
            let read = page_offset + self.file_size as usize;
            (read, round_up(page_offset + self.mem_size as usize, PAGE_SIZE) - read)
        } else {
            // Entirely zero.
            (0, round_up(page_offset + self.mem_size as usize, PAGE_SIZE))
        };

        SegmentMapping {
            file_page: self.file_offset & !PAGE_MASK,
            mem_page: self.vaddr & !PAGE_MASK,
            read_bytes,
            zero_bytes,
            writable: self.is_writable(),
        }
    }
}

/// A validated executable, still open and write-denied.
pub struct ExecutableImage<F: File> {
    file: F,
    /// Entry point virtual address
    pub entry: UserAddr,
    /// Program header table file offset
    pub phoff: u32,
    /// Program header entry size
    pub phentsize: u16,
    /// Program header count
    pub phnum: u16,
    /// Accepted program headers, in file order
    pub segments: Vec<SegmentDescriptor>,
}

impl<F: File> ExecutableImage<F> {
    /// Parse and validate the executable behind `file`.
    ///
    /// The caller keeps ownership of `file` only on success.
    pub fn parse(mut file: F) -> Result<Self, (LoadError, F)> {
        match read_image(&mut file) {
            Ok((header, segments)) => Ok(ExecutableImage {
                file,
                entry: header.e_entry,
                phoff: header.e_phoff,
                phentsize: header.e_phentsize,
                phnum: header.e_phnum,
                segments,
            }),
            Err(e) => Err((e, file)),
        }
    }

    /// Loadable segments, in file order.
    pub fn loadable(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::Load)
    }

    /// The open executable.
    pub fn file_mut(&mut self) -> &mut F {
        &mut self.file
    }

    /// Give up the image, keeping the file open.
    pub fn into_file(self) -> F {
        self.file
    }
}

fn read_image<F: File>(file: &mut F) -> Result<(Elf32Header, Vec<SegmentDescriptor>), LoadError> {
    let mut raw = [0u8; HEADER_SIZE];
    if with_fs_lock(|| file.read(&mut raw)) != HEADER_SIZE {
        return Err(LoadError::BadHeader);
    }
    let header = Elf32Header::from_bytes(&raw);
    header.validate()?;

    let file_len = with_fs_lock(|| file.length());
    let mut segments = Vec::with_capacity(header.e_phnum as usize);
    let mut file_ofs = header.e_phoff;

    for index in 0..header.e_phnum {
        if file_ofs > file_len {
            return Err(LoadError::BadSegmentTable);
        }

        let mut raw = [0u8; PROGRAM_HEADER_SIZE];
        let read = with_fs_lock(|| {
            file.seek(file_ofs);
            file.read(&mut raw)
        });
        if read != PROGRAM_HEADER_SIZE {
            return Err(LoadError::BadSegmentTable);
        }
        file_ofs = file_ofs
            .checked_add(PROGRAM_HEADER_SIZE as u32)
            .ok_or(LoadError::BadSegmentTable)?;

        let segment = SegmentDescriptor::from_header(&Elf32ProgramHeader::from_bytes(&raw));
        match segment.kind {
            SegmentKind::Ignored(_) => {}
            SegmentKind::Dynamic(p_type) => {
                log::warn!("program header {}: unsupported type {:#x}", index, p_type);
                return Err(LoadError::UnsupportedSegment);
            }
            SegmentKind::Load => {
                if let Err(e) = segment.validate(file_len) {
                    log::warn!(
                        "program header {}: rejected segment at {:#010x} (memsz {:#x})",
                        index,
                        segment.vaddr,
                        segment.mem_size
                    );
                    return Err(e);
                }
            }
        }
        segments.push(segment);
    }

    Ok((header, segments))
}

/// Open `name`, deny writes to it and validate it as an executable.
///
/// On failure the file is closed again before returning.
pub fn validate_and_open<P: Platform>(
    platform: &P,
    name: &str,
) -> Result<ExecutableImage<P::File>, LoadError> {
    let mut file = match with_fs_lock(|| platform.open(name)) {
        Some(file) => file,
        None => {
            console_println!("load: {}: open failed", name);
            return Err(LoadError::Open);
        }
    };
    with_fs_lock(|| file.deny_write());

    match ExecutableImage::parse(file) {
        Ok(image) => {
            log::debug!(
                "{}: entry {:#010x}, {} program headers",
                name,
                image.entry,
                image.phnum
            );
            Ok(image)
        }
        Err((e, file)) => {
            if e == LoadError::BadHeader {
                console_println!("load: {}: error loading executable", name);
            }
            log::warn!("{}: {}", name, e);
            if let Err(close_err) = with_fs_lock(|| file.close()) {
                log::warn!("{}: close after failed load: {}", name, close_err);
            }
            Err(e)
        }
    }
}
