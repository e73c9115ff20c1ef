/*
 * System Call Numbers
 *
 * Numbers 0 through 12 are implemented; the table reserves room up to 19
 * for growth. An out-of-range or reserved number is a user-program fault
 * and terminates the process with status -1.
 */

/// Power off the machine.
pub const SYS_HALT: u32 = 0;

/// Terminate the calling process, reporting a status to its parent.
///
/// Arguments: (status: i32) -> never returns
pub const SYS_EXIT: u32 = 1;

/// Load and run a program. Returns the child tid, or -1 on load failure.
///
/// Arguments: (name: *const c_char) -> i32
pub const SYS_EXEC: u32 = 2;

/// Wait for a child process; returns its exit status, once, or -1.
///
/// Arguments: (tid: i32) -> i32
pub const SYS_WAIT: u32 = 3;

/// Create a file. Returns true on success.
///
/// Arguments: (name: *const c_char, initial_size: u32) -> bool
pub const SYS_CREATE: u32 = 4;

/// Remove a file. Returns true on success.
///
/// Arguments: (name: *const c_char) -> bool
pub const SYS_REMOVE: u32 = 5;

/// Open a file. Returns a descriptor, or -1.
///
/// Arguments: (name: *const c_char) -> i32
pub const SYS_OPEN: u32 = 6;

/// Length of an open file in bytes.
///
/// Arguments: (fd: i32) -> i32
pub const SYS_FILESIZE: u32 = 7;

/// Read from a descriptor. Descriptor 0 reads one keyboard byte;
/// descriptor 1 reads nothing.
///
/// Arguments: (fd: i32, buf: *mut u8, size: u32) -> i32
pub const SYS_READ: u32 = 8;

/// Write to a descriptor. Descriptor 1 goes to the console in one piece;
/// descriptor 0 writes nothing.
///
/// Arguments: (fd: i32, buf: *const u8, size: u32) -> i32
pub const SYS_WRITE: u32 = 9;

/// Move a file's cursor to an absolute offset.
///
/// Arguments: (fd: i32, position: u32) -> ()
pub const SYS_SEEK: u32 = 10;

/// Current cursor position of a file.
///
/// Arguments: (fd: i32) -> u32
pub const SYS_TELL: u32 = 11;

/// Close a descriptor and the file under it.
///
/// Arguments: (fd: i32) -> ()
pub const SYS_CLOSE: u32 = 12;

/// Dispatch table size; entries past SYS_CLOSE are reserved.
pub const SYSCALL_TABLE_SIZE: usize = 20;
