//! Hosted platform
//!
//! An in-memory [`Platform`] backed by std threads, for running the process
//! subsystem outside the kernel: files live in a name -> bytes map, address
//! spaces are page arenas, kernel threads are `std::thread`s and user
//! programs are Rust closures registered by name.

pub mod elf_builder;

pub use elf_builder::ElfBuilder;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, Once, PoisonError};
use std::thread::JoinHandle;

use crate::config::{UserAddr, LOG_LEVEL, PAGE_MASK, PAGE_SIZE};
use crate::console::{self, ConsoleSink};
use crate::platform::{
    AddressSpace, CountingSignal, File, FileError, PageFlags, Platform, SpawnError, Termination,
    ThreadId,
};
use crate::process::{Process, UserFrame};

/// Byte written to freshly allocated pages that were not asked to be zeroed.
pub const POISON_BYTE: u8 = 0xCC;

/// A user program: runs "in user mode" and reports how it stopped.
pub type Program = Arc<dyn Fn(&mut Process<Hosted>, &UserFrame) -> Termination + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========================================
// Files
// ========================================

struct Inode {
    data: Mutex<Vec<u8>>,
    deny_write_count: AtomicUsize,
}

impl Inode {
    fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            deny_write_count: AtomicUsize::new(0),
        })
    }
}

/// An open in-memory file.
pub struct HostedFile {
    inode: Arc<Inode>,
    pos: u32,
    denying: bool,
    fail_close: bool,
}

impl HostedFile {
    fn open(inode: Arc<Inode>, fail_close: bool) -> Self {
        Self {
            inode,
            pos: 0,
            denying: false,
            fail_close,
        }
    }

    /// A file that is not in any file system.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::open(Inode::new(data), false)
    }
}

impl File for HostedFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = lock(&self.inode.data);
        let start = (self.pos as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        self.pos += len as u32;
        len
    }

    fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    fn length(&self) -> u32 {
        lock(&self.inode.data).len() as u32
    }

    fn deny_write(&mut self) {
        if !self.denying {
            self.denying = true;
            self.inode.deny_write_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn close(self) -> Result<(), FileError> {
        if self.denying {
            self.inode.deny_write_count.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail_close {
            Err(FileError::Io)
        } else {
            Ok(())
        }
    }
}

// ========================================
// Address spaces
// ========================================

struct HostedPage {
    data: Box<[u8; PAGE_SIZE]>,
    writable: bool,
}

/// A user address space: the pages mapped into it, by user address.
#[derive(Default)]
pub struct HostedSpace {
    pages: BTreeMap<UserAddr, HostedPage>,
    page_limit: Option<usize>,
}

impl HostedSpace {
    /// An empty address space with no page limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty address space that runs out of memory after `limit` pages.
    pub fn with_page_limit(limit: usize) -> Self {
        Self {
            pages: BTreeMap::new(),
            page_limit: Some(limit),
        }
    }

    /// Whether the page containing `addr` is mapped.
    pub fn is_mapped(&self, addr: UserAddr) -> bool {
        self.pages.contains_key(&(addr & !PAGE_MASK))
    }

    /// Whether the page containing `addr` is mapped writable.
    pub fn is_writable(&self, addr: UserAddr) -> bool {
        self.pages
            .get(&(addr & !PAGE_MASK))
            .is_some_and(|page| page.writable)
    }

    /// Number of mapped pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Addresses of the mapped pages, lowest first.
    pub fn mapped_pages(&self) -> Vec<UserAddr> {
        self.pages.keys().copied().collect()
    }

    /// Copy user memory at `addr` into `buf`. Fails if any byte is unmapped.
    pub fn read_user(&self, addr: UserAddr, buf: &mut [u8]) -> bool {
        let mut addr = addr as usize;
        let mut done = 0;
        while done < buf.len() {
            let upage = (addr as UserAddr) & !PAGE_MASK;
            let Some(page) = self.pages.get(&upage) else {
                return false;
            };
            let offset = addr - upage as usize;
            let len = (PAGE_SIZE - offset).min(buf.len() - done);
            buf[done..done + len].copy_from_slice(&page.data[offset..offset + len]);
            done += len;
            addr += len;
        }
        true
    }

    /// Read a little-endian word of user memory.
    pub fn read_u32(&self, addr: UserAddr) -> Option<u32> {
        let mut word = [0u8; 4];
        self.read_user(addr, &mut word)
            .then(|| u32::from_le_bytes(word))
    }

    /// Read a NUL-terminated string of user memory.
    pub fn read_c_str(&self, addr: UserAddr) -> Option<String> {
        let mut bytes = Vec::new();
        let mut addr = addr;
        loop {
            let mut byte = [0u8; 1];
            if !self.read_user(addr, &mut byte) {
                return None;
            }
            if byte[0] == 0 {
                return String::from_utf8(bytes).ok();
            }
            bytes.push(byte[0]);
            addr = addr.checked_add(1)?;
        }
    }
}

impl AddressSpace for HostedSpace {
    fn alloc_page(&mut self, upage: UserAddr, flags: PageFlags) -> Option<&mut [u8]> {
        debug_assert_eq!(upage & PAGE_MASK, 0);
        if self.pages.contains_key(&upage) {
            return None;
        }
        if self.page_limit.is_some_and(|limit| self.pages.len() >= limit) {
            return None;
        }

        let fill = if flags.contains(PageFlags::ZERO) {
            0
        } else {
            POISON_BYTE
        };
        let page = self.pages.entry(upage).or_insert(HostedPage {
            data: Box::new([fill; PAGE_SIZE]),
            writable: flags.contains(PageFlags::WRITABLE),
        });
        Some(&mut page.data[..])
    }

    fn free_page(&mut self, upage: UserAddr) {
        self.pages.remove(&upage);
    }
}

// ========================================
// Counting signals
// ========================================

/// Counting semaphore on a std mutex and condition variable.
pub struct HostedSignal {
    count: Mutex<usize>,
    cond: Condvar,
}

impl HostedSignal {
    /// A semaphore with a count of zero.
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cond: Condvar::new(),
        }
    }
}

impl Default for HostedSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingSignal for HostedSignal {
    fn down(&self) {
        let mut count = lock(&self.count);
        while *count == 0 {
            count = self
                .cond
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    fn up(&self) {
        *lock(&self.count) += 1;
        self.cond.notify_one();
    }
}

// ========================================
// Platform
// ========================================

/// The hosted platform.
pub struct Hosted {
    files: Mutex<BTreeMap<String, Arc<Inode>>>,
    programs: Mutex<BTreeMap<String, Program>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Pages still mapped in each address space at destruction, in order
    destroyed: Mutex<Vec<Vec<UserAddr>>>,
    page_limit: Mutex<Option<usize>>,
    fail_spawn: AtomicBool,
    fail_address_space: AtomicBool,
    fail_close: AtomicBool,
    next_thread: AtomicU64,
}

impl Hosted {
    /// A platform with an empty file system and no programs.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(BTreeMap::new()),
            programs: Mutex::new(BTreeMap::new()),
            threads: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            page_limit: Mutex::new(None),
            fail_spawn: AtomicBool::new(false),
            fail_address_space: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            next_thread: AtomicU64::new(1),
        })
    }

    /// Create or replace file `name`.
    pub fn install(&self, name: &str, data: Vec<u8>) {
        lock(&self.files).insert(String::from(name), Inode::new(data));
    }

    /// Overwrite the contents of `name`. Fails while writes are denied or
    /// if there is no such file.
    pub fn write_file(&self, name: &str, data: Vec<u8>) -> bool {
        let files = lock(&self.files);
        let Some(inode) = files.get(name) else {
            return false;
        };
        if inode.deny_write_count.load(Ordering::SeqCst) > 0 {
            return false;
        }
        *lock(&inode.data) = data;
        true
    }

    /// Whether an open handle currently denies writes to `name`.
    pub fn is_write_denied(&self, name: &str) -> bool {
        lock(&self.files)
            .get(name)
            .is_some_and(|inode| inode.deny_write_count.load(Ordering::SeqCst) > 0)
    }

    /// Run `program` whenever a process named `name` enters user mode.
    ///
    /// Processes without a registered program exit with status 0.
    pub fn register<F>(&self, name: &str, program: F)
    where
        F: Fn(&mut Process<Hosted>, &UserFrame) -> Termination + Send + Sync + 'static,
    {
        lock(&self.programs).insert(String::from(name), Arc::new(program));
    }

    /// Limit every address space created from now on to `limit` pages.
    pub fn set_page_limit(&self, limit: Option<usize>) {
        *lock(&self.page_limit) = limit;
    }

    /// Make thread creation fail.
    pub fn set_spawn_failure(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Make address-space creation fail.
    pub fn set_address_space_failure(&self, fail: bool) {
        self.fail_address_space.store(fail, Ordering::SeqCst);
    }

    /// Make closing files opened from now on report an error.
    pub fn set_close_failure(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Pages mapped in each destroyed address space, in destruction order.
    pub fn destroyed_spaces(&self) -> Vec<Vec<UserAddr>> {
        lock(&self.destroyed).clone()
    }

    /// Join every spawned thread, including threads spawned while joining.
    pub fn join_all(&self) {
        loop {
            let handles = core::mem::take(&mut *lock(&self.threads));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    log::warn!("process thread panicked");
                }
            }
        }
    }
}

impl Platform for Hosted {
    type File = HostedFile;
    type AddressSpace = HostedSpace;
    type Signal = HostedSignal;

    fn create_address_space(&self) -> Option<HostedSpace> {
        if self.fail_address_space.load(Ordering::SeqCst) {
            return None;
        }
        Some(match *lock(&self.page_limit) {
            Some(limit) => HostedSpace::with_page_limit(limit),
            None => HostedSpace::new(),
        })
    }

    fn activate(&self, space: Option<&HostedSpace>) {
        log::trace!(
            "activate {}",
            if space.is_some() { "user space" } else { "kernel space" }
        );
    }

    fn destroy_address_space(&self, space: HostedSpace) {
        lock(&self.destroyed).push(space.mapped_pages());
    }

    fn open(&self, name: &str) -> Option<HostedFile> {
        let inode = lock(&self.files).get(name).cloned()?;
        Some(HostedFile::open(inode, self.fail_close.load(Ordering::SeqCst)))
    }

    fn new_signal(&self) -> HostedSignal {
        HostedSignal::new()
    }

    fn spawn(
        &self,
        name: &str,
        _priority: u8,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> Result<ThreadId, SpawnError> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SpawnError::Rejected);
        }
        let handle = std::thread::Builder::new()
            .name(String::from(name))
            .spawn(entry)
            .map_err(|_| SpawnError::OutOfMemory)?;
        lock(&self.threads).push(handle);
        Ok(ThreadId(self.next_thread.fetch_add(1, Ordering::SeqCst)))
    }

    fn enter_user(&self, process: &mut Process<Self>, frame: UserFrame) -> Termination {
        let program = lock(&self.programs).get(process.name()).cloned();
        match program {
            Some(program) => program(process, &frame),
            None => Termination::Exit(0),
        }
    }
}

// ========================================
// Console capture
// ========================================

/// Console sink that keeps everything written to it.
pub struct CaptureConsole {
    buffer: Mutex<String>,
}

impl CaptureConsole {
    /// Everything printed so far.
    pub fn contents(&self) -> String {
        lock(&self.buffer).clone()
    }

    /// Whether a full line equal to `line` was printed.
    pub fn has_line(&self, line: &str) -> bool {
        lock(&self.buffer).lines().any(|l| l == line)
    }

    /// Number of printed lines equal to `line`.
    pub fn count_lines(&self, line: &str) -> usize {
        lock(&self.buffer).lines().filter(|l| *l == line).count()
    }
}

impl ConsoleSink for CaptureConsole {
    fn write_str(&self, s: &str) {
        lock(&self.buffer).push_str(s);
    }
}

static CAPTURE: CaptureConsole = CaptureConsole {
    buffer: Mutex::new(String::new()),
};

/// Install the capturing console and the kernel logger at [`LOG_LEVEL`]
/// (once) and return the console.
pub fn capture_console() -> &'static CaptureConsole {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        console::init(&CAPTURE);
        console::init_logger(LOG_LEVEL);
    });
    &CAPTURE
}
