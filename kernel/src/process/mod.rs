/*
 * Process Lifecycle Glue
 *
 * A user process is one thread plus the resources the kernel tracks for
 * it: a file descriptor table, a user address space, and the exit-status
 * channel its parent waits on. Program loading itself (ELF parsing,
 * segment mapping) is a collaborator behind the ProgramLoader trait.
 *
 * EXIT PROTOCOL:
 * =============
 *
 * A process announces its exit status through `notify`; the first status
 * recorded wins and releases the parent's wait semaphore. `wait` returns
 * the status exactly once: the record is reaped on the way out, so a
 * second wait on the same child reports -1, as does waiting on a process
 * that is not the caller's child.
 *
 * The synchronous exec resolves the load outcome before the child is
 * first dispatched: the parent runs the loader, and only a successfully
 * loaded image gets a thread. The asynchronous exec pushes the load into
 * the child, which reports -1 through the exit channel when it fails.
 */

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::io::fd::FdTable;
use crate::memory::AddressSpace;
use crate::scheduler;
use crate::scheduler::thread;
use crate::scheduler::types::{Tid, PRI_DEFAULT};
use crate::sync::Semaphore;

/// Loads a named program image into a fresh address space.
pub trait ProgramLoader: Send + Sync {
    fn load(&self, name: &str) -> Option<Arc<dyn AddressSpace>>;
}

static LOADER: Mutex<Option<Box<dyn ProgramLoader>>> = Mutex::new(None);

/// Installs the program loader. Kernel bring-up only.
pub fn set_loader(loader: Box<dyn ProgramLoader>) {
    *LOADER.lock() = Some(loader);
}

/// Errors reported by `execute` and `execute_sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// No program loader registered.
    NoLoader,
    /// The loader rejected the image.
    LoadFailed,
    /// Thread slots exhausted.
    NoThreadSlots,
}

struct ProcInner {
    exit_status: Option<i32>,
    fd_table: FdTable,
}

struct Process {
    parent: Tid,
    /// Upped exactly once, when the exit status is first recorded.
    exit_sema: Semaphore,
    inner: Mutex<ProcInner>,
}

impl Process {
    fn new(parent: Tid) -> Process {
        Process {
            parent,
            exit_sema: Semaphore::new(0),
            inner: Mutex::new(ProcInner { exit_status: None, fd_table: FdTable::new() }),
        }
    }

    /// Records the exit status; only the first report sticks, and it is
    /// the one that releases the waiting parent.
    fn record_exit(&self, status: i32) {
        let first = {
            let mut inner = self.inner.lock();
            if inner.exit_status.is_none() {
                inner.exit_status = Some(status);
                true
            } else {
                false
            }
        };
        if first {
            self.exit_sema.up();
        }
    }
}

static PROCESSES: Mutex<BTreeMap<Tid, Arc<Process>>> = Mutex::new(BTreeMap::new());

/// Registers the current thread as a user process whose parent is
/// `parent`. Gives the thread an exit channel and an empty descriptor
/// table; exec does this for the threads it spawns.
pub fn init(parent: Tid) {
    let cur = scheduler::current_tid();
    PROCESSES.lock().insert(cur, Arc::new(Process::new(parent)));
}

fn run_loader(name: &str) -> Result<Arc<dyn AddressSpace>, ExecError> {
    let guard = LOADER.lock();
    let loader = guard.as_deref().ok_or(ExecError::NoLoader)?;
    loader.load(name).ok_or(ExecError::LoadFailed)
}

/// Dispatch stub for a loaded process. Entering the image belongs to the
/// context-switch collaborator; when the image returns control (in a
/// core-only build, immediately) the process reports a clean exit.
fn user_process_body(shared: Arc<Process>) {
    shared.record_exit(0);
    thread::exit();
}

/// Spawns a thread that loads and runs `name`, returning its tid without
/// waiting for the load. A failed load surfaces as exit status -1.
pub fn execute(name: &str) -> Result<Tid, ExecError> {
    let parent = scheduler::current_tid();
    let shared = Arc::new(Process::new(parent));
    let child_shared = shared.clone();
    let image: String = name.into();

    let tid = thread::create(name, PRI_DEFAULT, move || {
        let loaded = {
            let guard = LOADER.lock();
            guard.as_deref().and_then(|l| l.load(&image))
        };
        match loaded {
            Some(space) => {
                thread::attach_user_space(scheduler::current_tid(), space);
                user_process_body(child_shared);
            }
            None => {
                child_shared.record_exit(-1);
                thread::exit();
            }
        }
    })
    .map_err(|_| ExecError::NoThreadSlots)?;

    PROCESSES.lock().insert(tid, shared);
    log::debug!("exec '{}' -> {}", name, tid);
    Ok(tid)
}

/// Loads `name` and spawns a thread for it, reporting load failure to the
/// caller instead of spawning. The returned tid is already attached to
/// the loaded address space.
pub fn execute_sync(name: &str) -> Result<Tid, ExecError> {
    let space = run_loader(name)?;

    let parent = scheduler::current_tid();
    let shared = Arc::new(Process::new(parent));
    let child_shared = shared.clone();

    let tid = thread::create(name, PRI_DEFAULT, move || user_process_body(child_shared))
        .map_err(|_| ExecError::NoThreadSlots)?;

    thread::attach_user_space(tid, space);
    PROCESSES.lock().insert(tid, shared);
    log::debug!("exec (sync) '{}' -> {}", name, tid);
    Ok(tid)
}

/// Waits for a child process and returns its exit status.
///
/// Returns -1 when `child` is unknown, is not the caller's child, or has
/// already been waited for. The status can be collected exactly once.
pub fn wait(child: Tid) -> i32 {
    let cur = scheduler::current_tid();
    let shared = {
        let procs = PROCESSES.lock();
        match procs.get(&child) {
            Some(s) if s.parent == cur => s.clone(),
            _ => return -1,
        }
    };

    shared.exit_sema.down();

    let status = shared.inner.lock().exit_status.unwrap_or(-1);
    PROCESSES.lock().remove(&child);
    status
}

/// Records the calling process's exit status for its parent. Threads that
/// are not processes have no parent to tell; for them this is a no-op.
pub fn notify(status: i32) {
    let cur = scheduler::current_tid();
    let shared = PROCESSES.lock().get(&cur).cloned();
    if let Some(s) = shared {
        s.record_exit(status);
    }
}

/// Releases the calling process's resources: every live descriptor is
/// closed and the descriptor table freed. Runs on every thread exit; the
/// address space itself is dropped by the thread teardown. A process that
/// dies without notifying reports -1.
pub(crate) fn exit_current() {
    let cur = scheduler::current_tid();
    let shared = PROCESSES.lock().get(&cur).cloned();
    if let Some(s) = shared {
        {
            let mut inner = s.inner.lock();
            let mut close = |f: Arc<dyn crate::io::File>| drop(f);
            inner.fd_table.destroy(Some(&mut close));
        }
        s.record_exit(-1);
    }
}

/// Runs a closure against the current process's descriptor table; None
/// when the current thread is not a process.
pub(crate) fn with_current_fd_table<R>(f: impl FnOnce(&mut FdTable) -> R) -> Option<R> {
    let cur = scheduler::current_tid();
    let shared = PROCESSES.lock().get(&cur).cloned()?;
    let mut inner = shared.inner.lock();
    Some(f(&mut inner.fd_table))
}

/// The current thread's address space, if it has one.
pub(crate) fn current_space() -> Option<Arc<dyn AddressSpace>> {
    thread::current_user_space()
}

#[cfg(test)]
pub(crate) fn reset() {
    PROCESSES.lock().clear();
    *LOADER.lock() = None;
}
