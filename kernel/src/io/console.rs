/*
 * Console Collaborator Hooks
 *
 * The console and keyboard are devices; the core only forwards bytes.
 * Descriptor 1 writes land in `putbuf`, descriptor 0 reads pull one byte
 * at a time from `getc`. With no console registered, writes disappear and
 * reads return NUL, which keeps the core runnable without any device.
 */

use alloc::boxed::Box;
use spin::Mutex;

pub trait Console: Send + Sync {
    /// Writes a buffer to the console in one piece.
    fn putbuf(&self, bytes: &[u8]);

    /// Blocks for the next keyboard byte.
    fn getc(&self) -> u8;
}

static CONSOLE: Mutex<Option<Box<dyn Console>>> = Mutex::new(None);

/// Installs the console implementation. Kernel bring-up only.
pub fn set_console(console: Box<dyn Console>) {
    *CONSOLE.lock() = Some(console);
}

/// Writes to the console, if one is registered.
pub(crate) fn putbuf(bytes: &[u8]) {
    if let Some(c) = CONSOLE.lock().as_deref() {
        c.putbuf(bytes);
    }
}

/// Next keyboard byte; NUL without a console.
pub(crate) fn getc() -> u8 {
    CONSOLE.lock().as_deref().map(|c| c.getc()).unwrap_or(0)
}

#[cfg(test)]
pub(crate) fn reset() {
    *CONSOLE.lock() = None;
}
