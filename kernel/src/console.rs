//! Kernel console output.
//!
//! User-visible kernel messages (`load: ...: open failed`,
//! `<name>: exit(<n>)`) go through [`console_println!`]. Diagnostics go
//! through the `log` facade; [`KernelLogger`] forwards them to the same
//! console with a level prefix.

use alloc::string::String;
use core::fmt;
use core::fmt::Write;
use spin::Mutex;

/// Destination for console bytes (serial port, VGA text buffer, test capture).
pub trait ConsoleSink: Sync {
    /// Write a string fragment. Must not block on anything but the device.
    fn write_str(&self, s: &str);
}

/// Installed console sink. Output is dropped until one is installed.
static CONSOLE: Mutex<Option<&'static dyn ConsoleSink>> = Mutex::new(None);

/// Install the console sink, replacing any previous one.
pub fn init(sink: &'static dyn ConsoleSink) {
    *CONSOLE.lock() = Some(sink);
}

/// Console writer for formatting. Holds the console lock so a whole
/// formatted message reaches the sink without interleaving.
struct ConsoleWriter<'a> {
    sink: &'a dyn ConsoleSink,
}

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.sink.write_str(s);
        Ok(())
    }
}

/// Print macro for console output.
#[macro_export]
macro_rules! console_print {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*));
    };
}

/// Println macro for console output.
#[macro_export]
macro_rules! console_println {
    () => ($crate::console_print!("\n"));
    ($($arg:tt)*) => {
        $crate::console_print!("{}\n", format_args!($($arg)*));
    };
}

/// Internal print function.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let guard = CONSOLE.lock();
    if let Some(sink) = *guard {
        // ConsoleWriter never fails; a formatting error from a Display impl
        // only truncates the message.
        let _ = ConsoleWriter { sink }.write_fmt(args);
    }
}

/// `log` backend writing `[LEVEL] target: message` lines to the console.
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            console_println!("[{:<5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install [`KernelLogger`] as the `log` backend.
///
/// Only the first call installs the logger; later calls just adjust the
/// maximum level.
pub fn init_logger(level: log::LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Dump `bytes`, which live at user address `base`, to the trace log.
///
/// Sixteen bytes per line, offset first, printable ASCII at the end.
pub fn hex_dump(base: u32, bytes: &[u8]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }

    for (row, chunk) in bytes.chunks(16).enumerate() {
        let mut line = String::with_capacity(80);
        let _ = write!(line, "{:08x} ", base as usize + row * 16);
        for byte in chunk {
            let _ = write!(line, " {:02x}", byte);
        }
        for _ in chunk.len()..16 {
            line.push_str("   ");
        }
        line.push_str("  |");
        for &byte in chunk {
            line.push(if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            });
        }
        line.push('|');
        log::trace!("{}", line);
    }
}
