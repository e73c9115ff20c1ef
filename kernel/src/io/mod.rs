/*
 * I/O Layer
 *
 * The pieces of I/O the scheduling core owns: the per-process file
 * descriptor table, the opaque file handle the filesystem collaborator
 * hands out, and the console hooks the syscall layer writes through.
 * Filesystem internals and device drivers live behind the traits defined
 * here.
 */

pub mod console;
pub mod fd;
pub mod file;

pub use console::Console;
pub use fd::{FdTable, FD_MAX, FD_MIN};
pub use file::{File, FileSys};
