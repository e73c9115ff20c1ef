/*
 * File and Filesystem Collaborator Traits
 *
 * The filesystem is outside the core; files are opaque handles. The
 * syscall layer only needs positioned reads and writes, seek/tell, and a
 * length. Handles are shared through Arc: the descriptor table holds one
 * reference per descriptor, and dropping the last reference closes the
 * file as far as the core is concerned.
 */

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Mutex;

/// An open file. Implementations synchronize internally; the position
/// cursor advances under `read` and `write` like a Unix file offset.
pub trait File: Send + Sync {
    /// Reads at the cursor into `buf`, advancing it. Returns bytes read;
    /// 0 at end of file.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Writes `buf` at the cursor, advancing it. Returns bytes written.
    fn write(&self, buf: &[u8]) -> usize;

    /// Moves the cursor to an absolute byte offset.
    fn seek(&self, pos: u32);

    /// Current cursor position.
    fn tell(&self) -> u32;

    /// File length in bytes.
    fn len(&self) -> u32;
}

/// The filesystem operations the syscall layer dispatches to.
pub trait FileSys: Send + Sync {
    /// Creates a file of the given initial size. False on failure.
    fn create(&self, name: &str, initial_size: u32) -> bool;

    /// Removes a file by name. False on failure.
    fn remove(&self, name: &str) -> bool;

    /// Opens an existing file.
    fn open(&self, name: &str) -> Option<Arc<dyn File>>;
}

static FILESYS: Mutex<Option<Box<dyn FileSys>>> = Mutex::new(None);

/// Installs the filesystem implementation. Kernel bring-up only.
pub fn set_filesys(fs: Box<dyn FileSys>) {
    *FILESYS.lock() = Some(fs);
}

/// Runs a closure against the installed filesystem; None when no
/// filesystem was registered.
pub(crate) fn with_filesys<R>(f: impl FnOnce(&dyn FileSys) -> R) -> Option<R> {
    let guard = FILESYS.lock();
    guard.as_deref().map(f)
}

#[cfg(test)]
pub(crate) fn reset() {
    *FILESYS.lock() = None;
}
