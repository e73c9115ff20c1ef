/*
 * Syscall Gateway
 *
 * User traps arrive here through the platform's trap stub with the i386
 * trap frame laid out below. The syscall number sits at the user stack
 * pointer, arguments in the following words. Dispatch is a fixed table of
 * {handler, argc} entries indexed by number.
 *
 * VALIDATION:
 * ==========
 *
 * Nothing from user space is trusted. The stack pointer, the number slot
 * and every argument slot must be user addresses mapped to present pages
 * in the current address space; buffer arguments are additionally checked
 * at both ends of the accessed range, and strings byte-by-byte up to the
 * NUL. Any failure terminates the process with exit status -1; the
 * parent sees the status and the kernel keeps running.
 */

pub mod handlers;
pub mod numbers;

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::memory::{is_user_vaddr, AddressSpace};
use crate::process;
use crate::scheduler::thread;

/// The i386-class trap frame the platform stub pushes. The layout is the
/// wire format between the assembly stub and this module; reordering a
/// field breaks the contract.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    // Pushed by the stub (pushal order).
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    // Segment registers.
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,

    // Interrupt identity.
    pub vec_no: u32,
    pub error_code: u32,

    // Pushed by the CPU.
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub user_ss: u32,
}

/// What a handler tells the gateway to do with the trap frame.
pub(crate) enum SysOutcome {
    /// Write this into the frame's eax.
    Value(u32),
    /// The process died; the frame is dead weight.
    Terminated,
}

static POWER_OFF: Mutex<Option<fn()>> = Mutex::new(None);

/// Installs the machine power-off hook used by the halt syscall.
pub fn set_power_off(hook: fn()) {
    *POWER_OFF.lock() = Some(hook);
}

pub(crate) fn power_off() {
    let hook = *POWER_OFF.lock();
    match hook {
        Some(f) => f(),
        None => log::warn!("halt: no power-off hook installed"),
    }
}

/// Terminates the current process for a fault: status -1 to the parent,
/// then the thread is gone.
pub(crate) fn kill_current() -> SysOutcome {
    log::warn!("process '{}' killed: bad syscall", thread::name());
    process::notify(-1);
    thread::exit();
    SysOutcome::Terminated
}

/// Reads one 32-bit word from user space, every byte validated.
fn read_user_word(space: &dyn AddressSpace, vaddr: u32) -> Option<u32> {
    if !is_user_vaddr(vaddr) || !is_user_vaddr(vaddr.checked_add(3)?) {
        return None;
    }
    crate::memory::read_u32(space, vaddr)
}

/// Validates a user buffer at both ends of the accessed range.
pub(crate) fn check_user_range(space: &dyn AddressSpace, base: u32, len: u32) -> bool {
    if len == 0 {
        return is_user_vaddr(base) && space.is_mapped(base);
    }
    let Some(last) = base.checked_add(len - 1) else {
        return false;
    };
    is_user_vaddr(base)
        && is_user_vaddr(last)
        && space.is_mapped(base)
        && space.is_mapped(last)
}

/// Copies a user buffer into the kernel, validating every byte.
pub(crate) fn read_user_buf(space: &dyn AddressSpace, base: u32, len: u32) -> Option<Vec<u8>> {
    if !check_user_range(space, base, len) {
        return None;
    }
    let mut out = Vec::with_capacity(len as usize);
    for i in 0..len {
        out.push(space.read_byte(base + i)?);
    }
    Some(out)
}

/// Copies kernel bytes out to a user buffer, validating every byte.
pub(crate) fn write_user_buf(space: &dyn AddressSpace, base: u32, bytes: &[u8]) -> bool {
    if !check_user_range(space, base, bytes.len() as u32) {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        if !space.write_byte(base + i as u32, b) {
            return false;
        }
    }
    true
}

/// Reads a NUL-terminated user string, byte-by-byte. None on any
/// unmapped byte or non-UTF-8 content.
pub(crate) fn read_user_cstr(space: &dyn AddressSpace, base: u32) -> Option<String> {
    let mut bytes = Vec::new();
    let mut at = base;
    loop {
        if !is_user_vaddr(at) {
            return None;
        }
        let b = space.read_byte(at)?;
        if b == 0 {
            break;
        }
        bytes.push(b);
        at = at.checked_add(1)?;
    }
    String::from_utf8(bytes).ok()
}

/// Dispatches one trap. The platform stub calls this with the frame it
/// pushed; the return value for the user lands in the frame's eax.
pub fn handle(frame: &mut TrapFrame) {
    // A trap without a user address space cannot be validated at all.
    let Some(space) = process::current_space() else {
        kill_current();
        return;
    };

    let esp = frame.user_esp;
    let Some(number) = read_user_word(&*space, esp) else {
        kill_current();
        return;
    };

    let entry = match handlers::TABLE.get(number as usize) {
        Some(e) => e,
        None => {
            kill_current();
            return;
        }
    };
    let Some(handler) = entry.handler else {
        kill_current();
        return;
    };
    debug_assert!(entry.argc <= 3);

    let mut args = [0u32; 3];
    for (i, arg) in args.iter_mut().enumerate().take(entry.argc) {
        let slot = esp.wrapping_add(4 * (i as u32 + 1));
        match read_user_word(&*space, slot) {
            Some(w) => *arg = w,
            None => {
                kill_current();
                return;
            }
        }
    }

    match handler(&args, &*space) {
        SysOutcome::Value(v) => frame.eax = v,
        SysOutcome::Terminated => {}
    }
}

/// Builds a trap frame the way the platform stub would for a syscall
/// trap: only the user stack pointer matters to the gateway.
pub fn syscall_frame(user_esp: u32) -> TrapFrame {
    TrapFrame {
        vec_no: 0x30,
        user_esp,
        ..TrapFrame::default()
    }
}

#[cfg(test)]
pub(crate) fn reset() {
    *POWER_OFF.lock() = None;
}
