/*
 * Buffered Kernel Logger
 *
 * Backend for the `log` macros. Records are formatted into an in-memory
 * ring buffer; the embedder drains the buffer to its console whenever it
 * likes. Logging therefore works from any context, interrupt handlers
 * included, and the core never depends on a device to say something.
 *
 * When the buffer wraps, the oldest bytes are the ones lost.
 */

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use alloc::string::String;
use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

use crate::interrupt;

const LOG_BUFFER_CAP: usize = 32 * 1024;

struct RingBuffer {
    buf: [u8; LOG_BUFFER_CAP],
    head: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> RingBuffer {
        RingBuffer { buf: [0; LOG_BUFFER_CAP], head: 0, len: 0 }
    }

    fn push(&mut self, byte: u8) {
        let tail = (self.head + self.len) % LOG_BUFFER_CAP;
        self.buf[tail] = byte;
        if self.len == LOG_BUFFER_CAP {
            // Full: the new byte just overwrote the oldest one.
            self.head = (self.head + 1) % LOG_BUFFER_CAP;
        } else {
            self.len += 1;
        }
    }

    fn drain(&mut self) -> String {
        let mut bytes = alloc::vec::Vec::with_capacity(self.len);
        for i in 0..self.len {
            bytes.push(self.buf[(self.head + i) % LOG_BUFFER_CAP]);
        }
        self.head = 0;
        self.len = 0;
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

static LOG_BUFFER: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());
static INITIALIZED: AtomicBool = AtomicBool::new(false);

struct BufferWriter<'a>(&'a mut RingBuffer);

impl Write for BufferWriter<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &b in s.as_bytes() {
            self.0.push(b);
        }
        Ok(())
    }
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Masked so a timer tick cannot log into a half-taken buffer lock.
        let _m = interrupt::scoped_mask();
        let mut buffer = LOG_BUFFER.lock();
        let _ = writeln!(BufferWriter(&mut buffer), "[{}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the kernel logger. Safe to call more than once; only the
/// first installation takes.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
    INITIALIZED.store(true, Ordering::SeqCst);
}

/// Takes everything logged so far out of the buffer.
pub fn drain() -> String {
    let _m = interrupt::scoped_mask();
    LOG_BUFFER.lock().drain()
}

/// Whether `init` ran.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}
