/*
 * Scenario Tests
 *
 * These drive the whole core, scheduler through syscalls, via the
 * hosted context switch: schedule() rebooks which thread is
 * current without moving the machine stack, so a test script acts as
 * whichever thread the scheduler picked and can assert every transition.
 *
 * Kernel state is a process-wide singleton, so each test takes the
 * fixture lock and reboots the kernel from scratch.
 */

mod alarm;
mod mlfqs_policy;
mod scheduling;
pub(crate) mod support;

use std::sync::{Mutex, MutexGuard};

use crate::scheduler::types::{SchedPolicy, ThreadStatus, Tid};
use crate::{interrupt, io, logger, process, scheduler, sync, syscall, timer};

static KERNEL: Mutex<()> = Mutex::new(());

pub(crate) struct Kernel {
    _guard: MutexGuard<'static, ()>,
}

/// Serializes access to the kernel's global state. Unit tests that poke
/// the interrupt level or the run queue take this too: the test binary
/// runs tests in parallel threads, and the kernel is one singleton.
pub(crate) fn lock_kernel() -> MutexGuard<'static, ()> {
    KERNEL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Boots a fresh kernel under the fixture lock: every module's global
/// state is reset, then init + start run as they would at bring-up.
pub(crate) fn boot(policy: SchedPolicy) -> Kernel {
    let guard = lock_kernel();

    interrupt::reset();
    scheduler::reset();
    timer::reset();
    process::reset();
    syscall::reset();
    io::file::reset();
    io::console::reset();
    sync::reset_lock_ids();
    logger::init();
    let _ = logger::drain();

    crate::init(policy);
    crate::start();

    Kernel { _guard: guard }
}

/// The running thread.
pub(crate) fn cur() -> Tid {
    scheduler::current_tid()
}

pub(crate) fn prio(tid: Tid) -> i32 {
    scheduler::thread_priority(tid).expect("unknown tid")
}

pub(crate) fn status(tid: Tid) -> ThreadStatus {
    scheduler::thread_status(tid).expect("unknown tid")
}

/// Placeholder thread body. Scenario threads never run their bodies
/// under the hosted switch; the scripts act in their stead.
pub(crate) fn nop() {}

/// Advances the timer `n` ticks.
pub(crate) fn run_ticks(n: i64) {
    for _ in 0..n {
        timer::tick();
    }
}
