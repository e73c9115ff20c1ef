/*
 * System Call Handlers
 *
 * One function per implemented syscall plus the dispatch table. Handlers
 * receive the marshaled argument words and the caller's address space;
 * anything that smells like a fault (unmapped buffer, stale descriptor)
 * ends the process with status -1 instead of returning an error code.
 * Expected failures (file table full, open of a missing file) come back
 * as -1 in eax.
 */

use alloc::format;
use alloc::sync::Arc;

use super::{
    check_user_range, kill_current, power_off, read_user_buf, read_user_cstr, write_user_buf,
    SysOutcome,
};
use crate::io::{console, file, File};
use crate::memory::AddressSpace;
use crate::process;
use crate::scheduler::thread;
use crate::scheduler::types::Tid;

pub(crate) type Handler = fn(&[u32; 3], &dyn AddressSpace) -> SysOutcome;

pub(crate) struct SyscallEntry {
    pub handler: Option<Handler>,
    pub argc: usize,
}

const fn entry(handler: Handler, argc: usize) -> SyscallEntry {
    SyscallEntry { handler: Some(handler), argc }
}

const RESERVED: SyscallEntry = SyscallEntry { handler: None, argc: 0 };

/// Dispatch table, indexed by syscall number.
pub(crate) static TABLE: [SyscallEntry; super::numbers::SYSCALL_TABLE_SIZE] = [
    entry(sys_halt, 0),
    entry(sys_exit, 1),
    entry(sys_exec, 1),
    entry(sys_wait, 1),
    entry(sys_create, 2),
    entry(sys_remove, 1),
    entry(sys_open, 1),
    entry(sys_filesize, 1),
    entry(sys_read, 3),
    entry(sys_write, 3),
    entry(sys_seek, 2),
    entry(sys_tell, 1),
    entry(sys_close, 1),
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
    RESERVED,
];

/// A live descriptor, or death for the caller. Stale and out-of-range
/// descriptors are user-program faults, not error returns.
fn file_or_kill(fd: i32) -> Result<Arc<dyn File>, SysOutcome> {
    let found = process::with_current_fd_table(|t| t.search(fd)).flatten();
    found.ok_or_else(|| kill_current())
}

fn sys_halt(_args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    log::info!("halt: powering off");
    power_off();
    SysOutcome::Terminated
}

fn sys_exit(args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    let status = args[0] as i32;
    let line = format!("{}: exit({})\n", thread::name(), status);
    console::putbuf(line.as_bytes());
    process::notify(status);
    thread::exit();
    SysOutcome::Terminated
}

fn sys_exec(args: &[u32; 3], space: &dyn AddressSpace) -> SysOutcome {
    let Some(name) = read_user_cstr(space, args[0]) else {
        return kill_current();
    };
    let tid = match process::execute_sync(&name) {
        Ok(Tid(raw)) => raw,
        Err(_) => -1,
    };
    SysOutcome::Value(tid as u32)
}

fn sys_wait(args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    SysOutcome::Value(process::wait(Tid(args[0] as i32)) as u32)
}

fn sys_create(args: &[u32; 3], space: &dyn AddressSpace) -> SysOutcome {
    let Some(name) = read_user_cstr(space, args[0]) else {
        return kill_current();
    };
    let ok = file::with_filesys(|fs| fs.create(&name, args[1])).unwrap_or(false);
    SysOutcome::Value(ok as u32)
}

fn sys_remove(args: &[u32; 3], space: &dyn AddressSpace) -> SysOutcome {
    let Some(name) = read_user_cstr(space, args[0]) else {
        return kill_current();
    };
    let ok = file::with_filesys(|fs| fs.remove(&name)).unwrap_or(false);
    SysOutcome::Value(ok as u32)
}

fn sys_open(args: &[u32; 3], space: &dyn AddressSpace) -> SysOutcome {
    let Some(name) = read_user_cstr(space, args[0]) else {
        return kill_current();
    };
    let opened = file::with_filesys(|fs| fs.open(&name)).flatten();
    let fd = match opened {
        Some(f) => process::with_current_fd_table(|t| t.insert(f))
            .flatten()
            .unwrap_or(-1),
        None => -1,
    };
    SysOutcome::Value(fd as u32)
}

fn sys_filesize(args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    match file_or_kill(args[0] as i32) {
        Ok(f) => SysOutcome::Value(f.len()),
        Err(dead) => dead,
    }
}

fn sys_read(args: &[u32; 3], space: &dyn AddressSpace) -> SysOutcome {
    let (fd, buf, size) = (args[0] as i32, args[1], args[2]);
    match fd {
        0 => {
            // One keyboard byte at a time.
            if size == 0 {
                return SysOutcome::Value(0);
            }
            let byte = console::getc();
            if !write_user_buf(space, buf, &[byte]) {
                return kill_current();
            }
            SysOutcome::Value(1)
        }
        1 => SysOutcome::Value(0),
        _ => {
            let f = match file_or_kill(fd) {
                Ok(f) => f,
                Err(dead) => return dead,
            };
            if !check_user_range(space, buf, size) {
                return kill_current();
            }
            let mut data = alloc::vec![0u8; size as usize];
            let n = f.read(&mut data);
            if !write_user_buf(space, buf, &data[..n]) {
                return kill_current();
            }
            SysOutcome::Value(n as u32)
        }
    }
}

fn sys_write(args: &[u32; 3], space: &dyn AddressSpace) -> SysOutcome {
    let (fd, buf, size) = (args[0] as i32, args[1], args[2]);
    if fd < 0 {
        return kill_current();
    }
    let Some(data) = read_user_buf(space, buf, size) else {
        return kill_current();
    };
    match fd {
        0 => SysOutcome::Value(0),
        1 => {
            console::putbuf(&data);
            SysOutcome::Value(size)
        }
        _ => {
            let f = match file_or_kill(fd) {
                Ok(f) => f,
                Err(dead) => return dead,
            };
            SysOutcome::Value(f.write(&data) as u32)
        }
    }
}

fn sys_seek(args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    match file_or_kill(args[0] as i32) {
        Ok(f) => {
            f.seek(args[1]);
            SysOutcome::Value(0)
        }
        Err(dead) => dead,
    }
}

fn sys_tell(args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    match file_or_kill(args[0] as i32) {
        Ok(f) => SysOutcome::Value(f.tell()),
        Err(dead) => dead,
    }
}

fn sys_close(args: &[u32; 3], _space: &dyn AddressSpace) -> SysOutcome {
    let fd = args[0] as i32;
    let removed = process::with_current_fd_table(|t| t.remove(fd)).flatten();
    match removed {
        // Dropping the last reference closes the file.
        Some(f) => {
            drop(f);
            SysOutcome::Value(0)
        }
        None => kill_current(),
    }
}
