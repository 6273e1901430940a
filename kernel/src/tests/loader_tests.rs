//! Loader Unit Tests
//!
//! Loading executables into hosted address spaces: what gets mapped, and
//! that rejected images map nothing.

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec;
    use alloc::vec::Vec;

    use crate::config::{stack_page, PAGE_SIZE, PHYS_BASE};
    use crate::error::{LoadError, StackBuildError};
    use crate::hosted::elf_builder::{SAMPLE_DATA, SAMPLE_ENTRY, SAMPLE_TEXT};
    use crate::hosted::{capture_console, ElfBuilder, Hosted, HostedFile, HostedSpace};
    use crate::loader::elf::{SegmentFlags, PT_DYNAMIC, PT_GNU_STACK, PT_INTERP, PT_NOTE};
    use crate::loader::{self, LoadedProgram};
    use crate::platform::File;

    type LoadOutcome = (Result<LoadedProgram<HostedFile>, LoadError>, HostedSpace, bool);

    /// Load `image`, installed as `name`, into a fresh address space.
    /// Also reports whether `name` is write-denied afterwards.
    fn load_bytes(name: &str, image: Vec<u8>, argv: &[&str]) -> LoadOutcome {
        let platform = Hosted::new();
        platform.install(name, image);
        let mut space = HostedSpace::new();
        let result = loader::load(&*platform, argv, &mut space);
        (result, space, platform.is_write_denied(name))
    }

    fn expect_rejected(name: &str, image: Vec<u8>, expected: LoadError) {
        let (result, space, denied) = load_bytes(name, image, &[name]);
        assert_eq!(result.err(), Some(expected), "{}", name);
        assert_eq!(space.page_count(), 0, "{}: pages left behind", name);
        assert!(!denied, "{}: executable still write-denied", name);
    }

    fn set_u16(image: &mut [u8], at: usize, value: u16) {
        image[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn set_u32(image: &mut [u8], at: usize, value: u32) {
        image[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    // ========================================
    // Successful Loads
    // ========================================

    #[test]
    fn test_sample_image_mapping() {
        let (result, space, denied) =
            load_bytes("sample", ElfBuilder::sample().build(), &["sample"]);
        let program = result.unwrap();

        assert_eq!(program.entry, SAMPLE_ENTRY);
        assert!(denied);
        assert_eq!(
            space.mapped_pages(),
            vec![0x0804_8000, 0x0804_9000, 0x0804_A000, 0x0804_B000, stack_page()]
        );

        // Text: read-only, file bytes at the segment address.
        let mut text = vec![0u8; SAMPLE_TEXT.len()];
        assert!(space.read_user(0x0804_8080, &mut text));
        assert_eq!(text, SAMPLE_TEXT);
        assert!(!space.is_writable(0x0804_8000));

        // Data and BSS: writable, data bytes followed by zeros.
        let mut data = vec![0u8; 0x1900];
        assert!(space.read_user(0x0804_9F00, &mut data));
        assert_eq!(&data[..SAMPLE_DATA.len()], SAMPLE_DATA);
        assert!(data[SAMPLE_DATA.len()..].iter().all(|&b| b == 0));
        assert!(space.is_writable(0x0804_B000));

        // Tail of the last BSS page is zeroed too.
        let mut tail = vec![0xFFu8; PAGE_SIZE - 0x800];
        assert!(space.read_user(0x0804_B800, &mut tail));
        assert!(tail.iter().all(|&b| b == 0));

        assert!(program.stack_pointer < PHYS_BASE);
        assert_eq!(space.read_u32(program.stack_pointer + 4), Some(1));
    }

    #[test]
    fn test_closing_executable_allows_writes() {
        let platform = Hosted::new();
        platform.install("rewritable", ElfBuilder::sample().build());
        let mut space = HostedSpace::new();

        let program = loader::load(&*platform, &["rewritable"], &mut space).unwrap();
        assert!(!platform.write_file("rewritable", vec![0]));

        assert!(program.executable.close().is_ok());
        assert!(platform.write_file("rewritable", vec![0]));
    }

    #[test]
    fn test_arguments_on_stack() {
        let argv = ["args", "-l", "foo", "bar"];
        let (result, space, _) = load_bytes("args", ElfBuilder::sample().build(), &argv);
        let esp = result.unwrap().stack_pointer;

        assert_eq!(space.read_u32(esp), Some(0));
        assert_eq!(space.read_u32(esp + 4), Some(4));
        let argv_ptr = space.read_u32(esp + 8).unwrap();
        let args: Vec<String> = (0..4)
            .map(|i| {
                let ptr = space.read_u32(argv_ptr + 4 * i).unwrap();
                space.read_c_str(ptr).unwrap()
            })
            .collect();
        assert_eq!(args, argv);
        assert_eq!(space.read_u32(argv_ptr + 16), Some(0));
    }

    #[test]
    fn test_ignored_segment_types() {
        let image = ElfBuilder::sample()
            .program_header(PT_NOTE, 0, 0, 0, 0, SegmentFlags::R)
            .program_header(PT_GNU_STACK, 0, 0, 0, 0, SegmentFlags::R | SegmentFlags::W)
            .program_header(0x6FFF_FFF0, 0, 0, 0, 0, SegmentFlags::empty())
            .build();
        let (result, space, _) = load_bytes("notes", image, &["notes"]);
        assert!(result.is_ok());
        assert_eq!(space.page_count(), 5);
    }

    // ========================================
    // Rejected Images
    // ========================================

    #[test]
    fn test_header_corruption_maps_nothing() {
        let good = ElfBuilder::sample().build();

        let mut bad_magic = good.clone();
        bad_magic[1] = b'X';
        expect_rejected("bad-magic", bad_magic, LoadError::BadHeader);

        let mut elf64 = good.clone();
        elf64[4] = 2;
        expect_rejected("elf64", elf64, LoadError::BadHeader);

        let mut shared_object = good.clone();
        set_u16(&mut shared_object, 16, 3);
        expect_rejected("shared-object", shared_object, LoadError::BadHeader);

        let mut wrong_machine = good.clone();
        set_u16(&mut wrong_machine, 18, 62);
        expect_rejected("wrong-machine", wrong_machine, LoadError::BadHeader);

        let mut phentsize = good.clone();
        set_u16(&mut phentsize, 42, 40);
        expect_rejected("phentsize", phentsize, LoadError::BadHeader);

        let mut too_many = good.clone();
        set_u16(&mut too_many, 44, 1025);
        expect_rejected("too-many-phdrs", too_many, LoadError::BadHeader);

        expect_rejected("truncated", good[..40].to_vec(), LoadError::BadHeader);
    }

    #[test]
    fn test_bad_program_header_table() {
        let good = ElfBuilder::sample().build();
        let len = good.len() as u32;

        let mut past_end = good.clone();
        set_u32(&mut past_end, 28, len + 1);
        expect_rejected("phoff-past-end", past_end, LoadError::BadSegmentTable);

        let mut short = good.clone();
        set_u32(&mut short, 28, len - 10);
        expect_rejected("phdr-short", short, LoadError::BadSegmentTable);
    }

    #[test]
    fn test_dynamic_segments_rejected_before_mapping() {
        // The loadable segments come first; nothing may be mapped anyway.
        for p_type in [PT_DYNAMIC, PT_INTERP, 5] {
            let image = ElfBuilder::sample()
                .program_header(p_type, 0, 0, 0, 0, SegmentFlags::R)
                .build();
            expect_rejected("dynamic", image, LoadError::UnsupportedSegment);
        }
    }

    #[test]
    fn test_invalid_segments_rejected_before_mapping() {
        let rw = SegmentFlags::R | SegmentFlags::W;
        let cases = [
            ("page-zero", ElfBuilder::sample().segment(0x0000_0100, b"x", 1, rw)),
            ("kernel-space", ElfBuilder::sample().segment(0xC000_0000, b"x", 1, rw)),
            ("crosses-phys-base", ElfBuilder::sample().segment(0xBFFF_F000, b"", 0x2000, rw)),
            (
                "misaligned",
                ElfBuilder::sample().program_header(1, 0x10, 0x0810_0000, 0, 0x10, rw),
            ),
            (
                "memsz-lt-filesz",
                ElfBuilder::sample().program_header(1, 0, 0x0810_0000, 0x20, 0x10, rw),
            ),
            (
                "empty-segment",
                ElfBuilder::sample().program_header(1, 0, 0x0810_0000, 0, 0, rw),
            ),
            (
                "offset-past-end",
                ElfBuilder::sample().program_header(1, 0x10_0000, 0x0810_0000, 0, 0x10, rw),
            ),
            (
                "wraps-around",
                ElfBuilder::sample().program_header(1, 0, 0x0810_0000, 0, 0xFFFF_0000, rw),
            ),
        ];

        for (name, builder) in cases {
            expect_rejected(name, builder.build(), LoadError::InvalidSegment);
        }
    }

    #[test]
    fn test_truncated_segment_data() {
        let mut image = ElfBuilder::sample().build();
        image.truncate(image.len() - 8);
        let (result, _space, denied) =
            load_bytes("truncated-data", image, &["truncated-data"]);
        assert_eq!(result.err(), Some(LoadError::ShortRead));
        assert!(!denied);
    }

    #[test]
    fn test_argument_overflow() {
        let long = String::from_utf8(vec![b'z'; PAGE_SIZE]).unwrap();
        let (result, space, denied) =
            load_bytes("overflow", ElfBuilder::sample().build(), &["overflow", &long]);
        assert_eq!(
            result.err(),
            Some(LoadError::Stack(StackBuildError::Overflow))
        );
        assert!(!space.is_mapped(stack_page()));
        assert!(!denied);
    }

    #[test]
    fn test_out_of_memory() {
        let platform = Hosted::new();
        platform.install("hungry", ElfBuilder::sample().build());

        // Four segment pages fit, the stack page does not.
        let mut space = HostedSpace::with_page_limit(4);
        let result = loader::load(&*platform, &["hungry"], &mut space);
        assert_eq!(
            result.err(),
            Some(LoadError::Stack(StackBuildError::OutOfMemory))
        );

        let mut space = HostedSpace::with_page_limit(2);
        let result = loader::load(&*platform, &["hungry"], &mut space);
        assert_eq!(result.err(), Some(LoadError::OutOfMemory));
    }

    // ========================================
    // Console Messages
    // ========================================

    #[test]
    fn test_load_failure_messages() {
        let console = capture_console();

        let (result, _, _) =
            load_bytes("present", ElfBuilder::sample().build(), &["missing-exe"]);
        assert_eq!(result.err(), Some(LoadError::Open));
        assert!(console.has_line("load: missing-exe: open failed"));

        let (result, _, _) = load_bytes("garbage-exe", vec![0u8; 100], &["garbage-exe"]);
        assert_eq!(result.err(), Some(LoadError::BadHeader));
        assert!(console.has_line("load: garbage-exe: error loading executable"));
    }

    #[test]
    fn test_logged_load_and_stack_dump() {
        let console = capture_console();
        crate::console::init_logger(log::LevelFilter::Trace);

        let (result, _, _) =
            load_bytes("dumpme", ElfBuilder::sample().build(), &["dumpme", "q"]);
        assert_eq!(result.unwrap().stack_pointer, PHYS_BASE - 36);

        assert!(console.has_line("[DEBUG] userprog::loader: dumpme: mapped 4 pages"));

        // Return address, argc, argv, then argv[0].
        assert!(console.has_line(
            "[TRACE] userprog::console: bfffffdc  \
             00 00 00 00 02 00 00 00 e8 ff ff bf f7 ff ff bf  |................|"
        ));
        // Tail of "dumpme\0" and "q\0" at the top of the page.
        let tail = format!(
            "[TRACE] userprog::console: bffffffc  65 00 71 00{}  |e.q.|",
            " ".repeat(36)
        );
        assert!(console.has_line(&tail));
    }
}
