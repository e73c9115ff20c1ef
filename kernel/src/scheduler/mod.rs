/*
 * Preemptive Priority Scheduler
 *
 * This module owns the scheduler singleton: the thread table, the 64-band
 * run queue, the identity of the running thread, and the schedule() /
 * schedule_tail() pair that every state transition funnels through.
 *
 * INVARIANT:
 * =========
 *
 * At every scheduling decision the runnable thread of maximum effective
 * priority runs. Ties within a band break FIFO, which yields round-robin
 * among equals. The two policies only differ in where priorities come
 * from: strict mode takes them from the threads (raised by donation),
 * MLFQS recomputes them from recent CPU usage and nice values.
 *
 * CONCURRENCY MODEL:
 * =================
 *
 * Uniprocessor. The timer interrupt is the only source of asynchrony, so
 * interrupt masking is the only exclusion primitive on scheduling paths:
 * every mutation of the run queue, thread status, load_avg or rcpu happens
 * with interrupts off. The spin lock around the singleton is the access
 * path to the state, not the exclusion mechanism; it is never contended
 * once the masking discipline is followed.
 *
 * SCHEDULING FLOW:
 * ===============
 *
 * A thread stops running by exactly one of: yielding, blocking, dying, or
 * slice expiry (the timer arms a deferred yield executed on interrupt
 * return). Whoever takes the CPU away moves the current thread's status
 * off Running and calls schedule(), which picks the next thread (or idle),
 * asks the context-switch collaborator to swap stacks, and finishes in
 * schedule_tail(): mark Running, reset the slice, activate the incoming
 * address space, and lazily free the previous thread if it was dying.
 */

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use spin::Mutex;

pub mod context;
pub mod policies;
pub(crate) mod run_queue;
pub mod thread;
pub mod types;

pub use thread::{CreateError, HeldLock, Thread};
pub use types::{
    SchedPolicy, ThreadStatus, Tid, NICE_DEFAULT, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX,
    PRI_MIN, THREAD_LOCKS, TIME_SLICE,
};

use crate::fixed::Fixed;
use crate::interrupt;
use run_queue::RunQueue;

/// The scheduler singleton's state.
pub(crate) struct SchedState {
    /// Every live thread, the running and dying ones included.
    pub(crate) threads: Vec<Thread>,
    /// Ready threads, bucketed by priority band.
    pub(crate) runq: RunQueue,
    /// The idle thread; runs when the queue is empty, never queued itself.
    pub(crate) idle: Option<Tid>,
    /// The bootstrap thread; its stack is not ours to free.
    pub(crate) initial: Option<Tid>,
    /// Scheduling policy, immutable after init.
    pub(crate) policy: SchedPolicy,

    /// Ticks the running thread has had since it was last scheduled.
    pub(crate) slice_ticks: u32,
    /// System load average, MLFQS. 17.14 fixed-point.
    pub(crate) load_avg: Fixed,

    // Tick statistics.
    pub(crate) idle_ticks: u64,
    pub(crate) kernel_ticks: u64,
    pub(crate) user_ticks: u64,
    pub(crate) context_switches: u64,
}

impl SchedState {
    fn new(policy: SchedPolicy) -> Self {
        SchedState {
            threads: Vec::new(),
            runq: RunQueue::new(),
            idle: None,
            initial: None,
            policy,
            slice_ticks: 0,
            load_avg: Fixed::ZERO,
            idle_ticks: 0,
            kernel_ticks: 0,
            user_ticks: 0,
            context_switches: 0,
        }
    }

    pub(crate) fn find(&self, tid: Tid) -> Option<&Thread> {
        self.threads.iter().find(|t| t.tid == tid).map(Thread::check)
    }

    pub(crate) fn find_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        let t = self.threads.iter_mut().find(|t| t.tid == tid)?;
        t.check();
        Some(t)
    }

    pub(crate) fn priority_of(&self, tid: Tid) -> Option<i32> {
        self.find(tid).map(|t| t.priority)
    }

    /// Ready plus running threads, the idle thread excepted. Feeds the
    /// MLFQS load average.
    pub(crate) fn active_count(&self) -> i32 {
        let running = if Some(current_tid()) != self.idle { 1 } else { 0 };
        self.runq.len() as i32 + running
    }
}

static SCHED: Mutex<Option<SchedState>> = Mutex::new(None);

/// TID of the running thread. Atomic so `current_tid` is O(1) and safe in
/// interrupt context; 0 means the scheduler is not up yet.
static CURRENT: AtomicI32 = AtomicI32::new(0);

/// Runs a closure against the scheduler state. Panics before `init`.
pub(crate) fn with_state<R>(f: impl FnOnce(&mut SchedState) -> R) -> R {
    let mut guard = SCHED.lock();
    let st = guard.as_mut().expect("scheduler not initialized");
    f(st)
}

/// The running thread's TID.
pub fn current_tid() -> Tid {
    let raw = CURRENT.load(Ordering::SeqCst);
    assert!(raw != 0, "no running thread");
    Tid(raw)
}

/// Initializes the threading system by turning the running code into the
/// "main" thread. Must be called with interrupts off, before any other
/// scheduler operation; the policy choice is frozen here.
///
/// The hosted context switch is installed as a default; a platform layer
/// replaces it via `context::set_context_switch` before calling `start`.
pub fn init(policy: SchedPolicy) {
    interrupt::assert_off();
    let mut guard = SCHED.lock();
    assert!(guard.is_none(), "scheduler already initialized");

    let mut st = SchedState::new(policy);
    let main = thread::bootstrap(policy, PRI_DEFAULT);
    let tid = main.tid;
    st.initial = Some(tid);
    st.threads.push(main);
    *guard = Some(st);
    drop(guard);

    CURRENT.store(tid.0, Ordering::SeqCst);
    context::set_context_switch(Box::new(context::HostedSwitch));

    log::info!("scheduler initialized, policy: {}", policy.name());
}

/// Starts preemptive scheduling: creates the idle thread and enables
/// interrupts. From here on the timer preempts freely.
pub fn start() {
    {
        let _m = interrupt::scoped_mask();
        with_state(|st| {
            assert!(st.idle.is_none(), "scheduler already started");
            let idle = thread::make_idle();
            let tid = idle.tid;
            st.threads.push(idle);
            st.idle = Some(tid);
        });
    }
    interrupt::enable();
    log::info!("preemptive scheduling enabled");
}

/// Picks and dispatches the next thread.
///
/// Preconditions: interrupts off, the current thread's status already
/// moved off Running. Pops the best ready thread (idle if none), switches
/// to it through the context collaborator, and completes in
/// `schedule_tail`.
pub(crate) fn schedule(st: &mut SchedState) {
    interrupt::assert_off();
    let cur = current_tid();
    {
        let t = st.find(cur).expect("running thread not in table");
        assert!(t.status != ThreadStatus::Running, "schedule with current still RUNNING");
    }

    let next = st
        .runq
        .pop()
        .or(st.idle)
        .expect("no runnable thread and no idle thread");

    if next != cur {
        st.context_switches += 1;
        CURRENT.store(next.0, Ordering::SeqCst);
        context::switch_threads(cur, next);
    }
    schedule_tail(st, cur);
}

/// Completes a thread switch in the new thread's context: marks it
/// Running, starts a fresh time slice, activates its address space, and
/// destroys the previous thread if it was dying. The bootstrap thread is
/// never destroyed; its stack was not allocated by us.
pub(crate) fn schedule_tail(st: &mut SchedState, prev: Tid) {
    interrupt::assert_off();
    let cur = current_tid();

    st.find_mut(cur).expect("switched to unknown thread").status = ThreadStatus::Running;
    st.slice_ticks = 0;

    if let Some(space) = st.find(cur).and_then(|t| t.user_space.clone()) {
        space.activate();
    }

    if prev != cur {
        if let Some(pos) = st.threads.iter().position(|t| t.tid == prev) {
            if st.threads[pos].status == ThreadStatus::Dying && Some(prev) != st.initial {
                // Frees the dying thread's page. Deferred to here so that
                // exit() did not pull the stack out from under itself.
                let dead = st.threads.remove(pos);
                drop(dead);
            }
        }
    }
}

// ============================================================================
// INTROSPECTION
// ============================================================================

/// The scheduling policy in effect.
pub fn policy() -> SchedPolicy {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.policy)
}

/// A thread's lifecycle status, or None for an unknown TID.
pub fn thread_status(tid: Tid) -> Option<ThreadStatus> {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.find(tid).map(|t| t.status))
}

/// A thread's effective priority, or None for an unknown TID.
pub fn thread_priority(tid: Tid) -> Option<i32> {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.priority_of(tid))
}

/// Ready threads in scheduling order: highest band first, FIFO within.
pub fn ready_queue() -> Vec<Tid> {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.runq.snapshot())
}

/// Tick and switch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
    pub context_switches: u64,
}

pub fn stats() -> SchedStats {
    let _m = interrupt::scoped_mask();
    with_state(|st| SchedStats {
        idle_ticks: st.idle_ticks,
        kernel_ticks: st.kernel_ticks,
        user_ticks: st.user_ticks,
        context_switches: st.context_switches,
    })
}

/// Per-thread snapshot for diagnostics.
#[derive(Debug, Clone)]
pub struct ThreadStat {
    pub tid: Tid,
    pub name: String,
    pub status: ThreadStatus,
    pub priority: i32,
    pub nice: i32,
}

pub fn thread_stats() -> Vec<ThreadStat> {
    let _m = interrupt::scoped_mask();
    with_state(|st| {
        st.threads
            .iter()
            .map(|t| ThreadStat {
                tid: t.tid,
                name: t.name.as_str().into(),
                status: t.status,
                priority: t.priority,
                nice: t.nice,
            })
            .collect()
    })
}

/// 100 times the system load average, rounded. MLFQS diagnostic.
pub fn load_avg_x100() -> i32 {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.load_avg.mul_int(100).to_int_round())
}

/// 100 times the current thread's recent CPU estimate, rounded.
pub fn recent_cpu_x100() -> i32 {
    let _m = interrupt::scoped_mask();
    with_state(|st| {
        st.find(current_tid())
            .expect("running thread not in table")
            .rcpu
            .mul_int(100)
            .to_int_round()
    })
}

#[cfg(test)]
pub(crate) fn load_avg_fixed() -> Fixed {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.load_avg)
}

#[cfg(test)]
pub(crate) fn rcpu_of(tid: Tid) -> Option<Fixed> {
    let _m = interrupt::scoped_mask();
    with_state(|st| st.find(tid).map(|t| t.rcpu))
}

#[cfg(test)]
pub(crate) fn reset() {
    *SCHED.lock() = None;
    CURRENT.store(0, Ordering::SeqCst);
    thread::reset_tids();
    context::reset();
}
