/*
 * Thread Object and Lifecycle
 *
 * A thread is one kernel stack plus the bookkeeping the scheduler needs:
 * status, effective and base priority, MLFQS accounting, sleep counter,
 * and the donation links that let the strict-priority policy walk chains
 * of blocked waiters. Threads are created Blocked, become Ready through
 * `unblock`, Running when the scheduler picks them, and Dying on exit;
 * a Dying thread's resources are freed lazily by the next thread during
 * schedule-tail.
 *
 * All state transitions happen with interrupts off. Public entry points
 * take the mask themselves; `_locked` variants expect the caller to hold
 * it already.
 */

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;

use spin::Mutex;

use super::policies::{mlfqs, priority as prio_policy};
use super::types::{
    is_valid_priority, SchedPolicy, ThreadStatus, Tid, MAX_THREADS, NICE_DEFAULT, NICE_MAX,
    NICE_MIN, THREAD_MAGIC, THREAD_NAME_MAX, THREAD_STACK_SIZE,
};
use crate::fixed::Fixed;
use crate::interrupt;
use crate::memory::AddressSpace;
use crate::sync::LockId;

/// Room reserved at the stack top for the three first-dispatch frames:
/// the register frame the context-switch collaborator pops, the entry
/// trampoline frame that lands in `run_current_entry`, and the call frame
/// for the thread function. The collaborator defines the exact layout;
/// the core only guarantees the space and the resulting top-of-stack.
const FIRST_DISPATCH_RESERVE: usize = 36;

/// A lock held by a thread, annotated with its highest-priority waiter.
/// The annotation is what lock release consults when it recomputes the
/// holder's effective priority.
#[derive(Debug, Clone, Copy)]
pub struct HeldLock {
    pub lock: LockId,
    pub top_waiter: Option<Tid>,
}

/// Per-thread state.
pub struct Thread {
    pub tid: Tid,
    pub name: heapless::String<THREAD_NAME_MAX>,
    pub status: ThreadStatus,

    /// Current effective priority, donations included.
    pub priority: i32,
    /// Base priority: last value requested by the thread (strict mode) or
    /// recorded at creation (MLFQS). Survives donations.
    pub saved_priority: i32,

    /// Niceness, MLFQS only.
    pub nice: i32,
    /// Recent-CPU estimate, MLFQS only. 17.14 fixed-point.
    pub rcpu: Fixed,

    /// Remaining ticks before a timed sleep ends; 0 when not sleeping.
    pub sleep_time: i64,
    /// True while blocked on a synchronization primitive. Distinguishes an
    /// indefinite wait from a timed sleep: the timer never wakes a waiter.
    pub is_waiting: bool,

    /// While blocked on a lock: the lock's holder and the lock itself.
    /// Weak links only, used to walk the donation chain; the chain ends at
    /// a holder that is Running or Ready.
    pub parent_thread: Option<Tid>,
    pub parent_lock: Option<LockId>,

    /// Locks this thread holds. Fixed capacity; overflow is reported to
    /// `Lock::acquire` callers as an error.
    pub locks: heapless::Vec<HeldLock, { super::types::THREAD_LOCKS }>,

    /// Kernel stack, one page.
    pub stack: Box<[u8]>,
    /// Offset of the top of the saved register frame within `stack`, per
    /// the context-switch contract.
    pub stack_top: usize,
    /// Thread function, consumed by `run_current_entry` on first dispatch.
    pub entry: Option<Box<dyn FnOnce() + Send>>,

    /// The user address space this thread runs in, if any. Activated during
    /// schedule-tail; also how the tick driver tells user from kernel time.
    pub user_space: Option<Arc<dyn AddressSpace>>,

    /// Stack-overflow sentinel; checked on every lookup.
    pub magic: u32,
}

impl Thread {
    fn raw(tid: Tid, name: &str, effective: i32, base: i32, rcpu: Fixed) -> Thread {
        let stack = vec![0u8; THREAD_STACK_SIZE].into_boxed_slice();
        let stack_top = stack.len() - FIRST_DISPATCH_RESERVE;
        Thread {
            tid,
            name: truncated_name(name),
            status: ThreadStatus::Blocked,
            priority: effective,
            saved_priority: base,
            nice: NICE_DEFAULT,
            rcpu,
            sleep_time: 0,
            is_waiting: false,
            parent_thread: None,
            parent_lock: None,
            locks: heapless::Vec::new(),
            stack,
            stack_top,
            entry: None,
            user_space: None,
            magic: THREAD_MAGIC,
        }
    }

    /// Asserts the structure still looks like a thread. A tripped magic
    /// means a thread overflowed its stack into the structure.
    pub(crate) fn check(&self) -> &Thread {
        assert!(self.magic == THREAD_MAGIC, "thread magic corrupted");
        self
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name.as_str())
            .field("status", &self.status)
            .field("priority", &self.priority)
            .finish()
    }
}

fn truncated_name(name: &str) -> heapless::String<THREAD_NAME_MAX> {
    let mut s = heapless::String::new();
    for ch in name.chars() {
        if s.push(ch).is_err() {
            break;
        }
    }
    s
}

/// Errors reported by `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// All thread slots are in use; no page for another kernel stack.
    OutOfSlots,
}

/// TID allocation is guarded by a lock, not by interrupt masking: creation
/// never runs in interrupt context and the counter has no ordering
/// relationship with the run queue.
static NEXT_TID: Mutex<i32> = Mutex::new(1);

fn allocate_tid() -> Tid {
    let mut next = NEXT_TID.lock();
    let tid = Tid(*next);
    *next += 1;
    tid
}

#[cfg(test)]
pub(crate) fn reset_tids() {
    *NEXT_TID.lock() = 1;
}

/// Creates the bootstrap thread during kernel init: the code that is
/// already running becomes the "main" thread. Under MLFQS its priority is
/// computed from the formula (rcpu and nice both start at zero).
pub(crate) fn bootstrap(policy: SchedPolicy, base: i32) -> Thread {
    let tid = allocate_tid();
    let effective = match policy {
        SchedPolicy::Strict => base,
        SchedPolicy::Mlfqs => mlfqs::priority_for(Fixed::ZERO, NICE_DEFAULT),
    };
    let mut t = Thread::raw(tid, "main", effective, base, Fixed::ZERO);
    t.status = ThreadStatus::Running;
    t
}

/// Creates the idle thread. It is never queued; the scheduler returns it
/// from `schedule()` as a special case when the run queue is empty.
pub(crate) fn make_idle() -> Thread {
    let mut t = Thread::raw(allocate_tid(), "idle", super::types::PRI_MIN,
        super::types::PRI_MIN, Fixed::ZERO);
    t.entry = Some(Box::new(idle_loop));
    t
}

/// Body of the idle thread: let someone else run, then wait for the next
/// interrupt. The platform layer parks the CPU between wakeups.
fn idle_loop() {
    loop {
        interrupt::disable();
        block();
        interrupt::enable();
        core::hint::spin_loop();
    }
}

/// Creates a new kernel thread and makes it Ready.
///
/// The new thread inherits the creator's rcpu. Under MLFQS the effective
/// priority comes from the formula and `priority` is only recorded as the
/// base. If the new thread outranks the creator, the creator yields at
/// once so the preemption is observable before `create` returns.
pub fn create<F>(name: &str, priority: i32, entry: F) -> Result<Tid, CreateError>
where
    F: FnOnce() + Send + 'static,
{
    assert!(is_valid_priority(priority), "priority out of range");
    let tid = allocate_tid();

    let prev = interrupt::disable();
    let outranks_creator = super::with_state(|st| {
        if st.threads.len() >= MAX_THREADS {
            return Err(CreateError::OutOfSlots);
        }
        let cur = super::current_tid();
        let rcpu = st.find(cur).map(|t| t.rcpu).unwrap_or(Fixed::ZERO);
        let effective = match st.policy {
            SchedPolicy::Strict => priority,
            SchedPolicy::Mlfqs => mlfqs::priority_for(rcpu, NICE_DEFAULT),
        };
        let mut t = Thread::raw(tid, name, effective, priority, rcpu);
        t.entry = Some(Box::new(entry));
        st.threads.push(t);
        unblock_locked(st, tid);

        let cur_priority = st.priority_of(cur).expect("creator vanished");
        Ok(effective > cur_priority)
    });
    interrupt::set(prev);

    match outranks_creator {
        Err(e) => {
            log::warn!("thread '{}' not created: out of thread slots", name);
            Err(e)
        }
        Ok(preempt) => {
            log::debug!("created thread '{}' ({tid})", name);
            if preempt {
                yield_now();
            }
            Ok(tid)
        }
    }
}

/// Runs the current thread's entry function. This is where the platform's
/// first-dispatch trampoline lands: the scheduler handed over with
/// interrupts off, the thread function runs with them on, and a returning
/// function means the thread is done.
pub fn run_current_entry() {
    let entry = {
        let _m = interrupt::scoped_mask();
        super::with_state(|st| {
            let cur = super::current_tid();
            st.find_mut(cur).and_then(|t| t.entry.take())
        })
    };
    interrupt::enable();
    if let Some(f) = entry {
        f();
    }
    exit();
}

/// Deschedules and destroys the current thread.
///
/// The dying thread's page cannot be freed under its own feet; the next
/// thread frees it in schedule-tail. With the platform switch installed
/// this never returns; under the hosted switch the call returns on the
/// old stack with another thread current.
pub fn exit() {
    assert!(!interrupt::in_context(), "exit from interrupt context");

    crate::process::exit_current();

    let prev = interrupt::disable();
    super::with_state(|st| {
        let cur = super::current_tid();
        assert!(Some(cur) != st.idle, "idle thread cannot exit");
        {
            let t = st.find_mut(cur).expect("exiting thread not in table");
            t.user_space = None;
            t.status = ThreadStatus::Dying;
        }
        log::debug!("thread {cur} exiting");
        super::schedule(st);
    });
    interrupt::set(prev);
}

/// Yields the CPU. The current thread goes to the back of its priority
/// band and may be picked again immediately if it is still the best.
pub fn yield_now() {
    assert!(!interrupt::in_context(), "yield from interrupt context");

    let prev = interrupt::disable();
    super::with_state(|st| {
        let cur = super::current_tid();
        let (pri, is_idle) = {
            let t = st.find(cur).expect("running thread not in table");
            (t.priority, Some(cur) == st.idle)
        };
        if !is_idle {
            st.runq.push(cur, pri);
        }
        st.find_mut(cur).expect("running thread not in table").status = ThreadStatus::Ready;
        super::schedule(st);
    });
    interrupt::set(prev);
}

/// Blocks the current thread until someone calls `unblock` on it.
///
/// Interrupts must already be off; the synchronization primitives are
/// usually the better interface.
pub fn block() {
    assert!(!interrupt::in_context(), "block from interrupt context");
    interrupt::assert_off();

    super::with_state(|st| {
        let cur = super::current_tid();
        st.find_mut(cur).expect("running thread not in table").status = ThreadStatus::Blocked;
        super::schedule(st);
    });
}

/// Transitions a Blocked thread to Ready and enqueues it.
///
/// Threads still sleeping or waiting on a primitive stay Blocked. Does not
/// preempt: the caller decides whether the wakeup warrants a yield, which
/// matters to callers that need to unblock atomically with other updates.
pub fn unblock(tid: Tid) {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| unblock_locked(st, tid));
}

pub(crate) fn unblock_locked(st: &mut super::SchedState, tid: Tid) {
    interrupt::assert_off();
    let idle = st.idle;
    let t = st.find_mut(tid).expect("unblock of unknown thread");
    if t.sleep_time <= 0 && !t.is_waiting {
        assert!(t.status == ThreadStatus::Blocked, "unblock of non-blocked thread");
        t.sleep_time = 0;
        t.status = ThreadStatus::Ready;
        let pri = t.priority;
        if Some(tid) != idle {
            st.runq.push(tid, pri);
        }
    }
}

/// Sets the current thread's base priority. Strict-priority mode only;
/// under MLFQS priorities are owned by the formula and this is a no-op.
///
/// The effective priority becomes the maximum of the new base and any
/// outstanding donation. If it dropped, the thread yields so a
/// newly-better thread can run.
pub fn set_priority(new_priority: i32) {
    assert!(is_valid_priority(new_priority), "priority out of range");

    let prev = interrupt::disable();
    let dropped = super::with_state(|st| {
        if st.policy != SchedPolicy::Strict {
            return false;
        }
        let cur = super::current_tid();
        let old = st.find(cur).expect("running thread not in table").priority;
        let inherited = prio_policy::max_inherited(st, cur);
        let effective = new_priority.max(inherited.unwrap_or(i32::MIN));
        {
            let t = st.find_mut(cur).expect("running thread not in table");
            t.saved_priority = new_priority;
        }
        if effective != old {
            st.runq.rebucket(cur, old, effective);
            st.find_mut(cur).expect("running thread not in table").priority = effective;
        }
        effective < old
    });
    interrupt::set(prev);

    if dropped {
        yield_now();
    }
}

/// Returns the current thread's effective priority.
pub fn get_priority() -> i32 {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| {
        st.find(super::current_tid())
            .expect("running thread not in table")
            .priority
    })
}

/// Sets the current thread's nice value and recomputes its priority.
/// MLFQS only.
pub fn set_nice(nice: i32) {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| {
        if st.policy != SchedPolicy::Mlfqs {
            return;
        }
        assert!((NICE_MIN..=NICE_MAX).contains(&nice), "nice out of range");
        let cur = super::current_tid();
        st.find_mut(cur).expect("running thread not in table").nice = nice;
        mlfqs::recompute_priority(st, cur);
        let t = st.find_mut(cur).expect("running thread not in table");
        t.saved_priority = t.priority;
    });
}

/// Returns the current thread's nice value.
pub fn get_nice() -> i32 {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| {
        st.find(super::current_tid())
            .expect("running thread not in table")
            .nice
    })
}

/// Name of the current thread.
pub fn name() -> alloc::string::String {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| {
        st.find(super::current_tid())
            .expect("running thread not in table")
            .name
            .as_str()
            .into()
    })
}

/// Attaches a user address space to a thread. The space is activated each
/// time the thread is dispatched and released again on exit.
pub(crate) fn attach_user_space(tid: Tid, space: Arc<dyn AddressSpace>) {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| {
        if let Some(t) = st.find_mut(tid) {
            t.user_space = Some(space);
        }
    });
}

/// Clones the current thread's address-space handle, if it has one.
pub(crate) fn current_user_space() -> Option<Arc<dyn AddressSpace>> {
    let _m = interrupt::scoped_mask();
    super::with_state(|st| st.find(super::current_tid()).and_then(|t| t.user_space.clone()))
}
