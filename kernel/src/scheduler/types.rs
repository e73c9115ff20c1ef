/*
 * Scheduler Type Definitions
 *
 * This module defines the core types and tunables used throughout the
 * scheduler subsystem. These types are lightweight and Copy-able so they can
 * travel freely between the mechanism layer and the scheduling policies.
 */

use core::fmt;

/// Lowest thread priority (idle threads).
pub const PRI_MIN: i32 = 0;

/// Highest thread priority.
pub const PRI_MAX: i32 = 63;

/// Default priority for threads that do not ask for anything special.
pub const PRI_DEFAULT: i32 = 31;

/// Number of priority bands in the run queue.
pub const PRI_BANDS: usize = (PRI_MAX - PRI_MIN + 1) as usize;

/// Lowest nice value (MLFQS only).
pub const NICE_MIN: i32 = -20;

/// Highest nice value (MLFQS only).
pub const NICE_MAX: i32 = 20;

/// Default nice value.
pub const NICE_DEFAULT: i32 = 0;

/// Consecutive ticks a thread may run before forced preemption.
pub const TIME_SLICE: u32 = 4;

/// Upper bound on concurrently live threads. Each thread owns one
/// kernel-stack page; running out of slots is reported to `create` callers
/// as an error value, never as a panic.
pub const MAX_THREADS: usize = 64;

/// Kernel stack size per thread (one page).
pub const THREAD_STACK_SIZE: usize = 4096;

/// Fixed upper bound on thread names.
pub const THREAD_NAME_MAX: usize = 16;

/// Fixed capacity of the per-thread held-locks set.
pub const THREAD_LOCKS: usize = 8;

/// Sentinel stored in every thread structure. A lookup that finds anything
/// else stumbled over a corrupted or overflowed thread and aborts.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Thread identifier. Monotonically assigned, positive, process-wide unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub i32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid {}", self.0)
    }
}

/// Thread lifecycle state.
///
/// Exactly one thread is `Running` at any time (the idle thread when nothing
/// else is ready). A thread sits in the run queue iff it is `Ready`.
/// `Dying` threads are reaped lazily by the next thread during schedule-tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Ready,
    Blocked,
    Dying,
}

/// The scheduling policy in effect, chosen once at kernel bring-up
/// (the `-o mlfqs` kernel option) and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Strict priority scheduling with priority donation through lock
    /// chains. Priorities are set by the threads themselves.
    Strict,

    /// Multi-level feedback queue scheduling. Priorities are recomputed
    /// periodically from recent CPU usage and nice values.
    Mlfqs,
}

impl SchedPolicy {
    /// Policy name for logging.
    pub fn name(self) -> &'static str {
        match self {
            SchedPolicy::Strict => "strict-priority",
            SchedPolicy::Mlfqs => "mlfqs",
        }
    }
}

/// Checks that a priority lies in `[PRI_MIN, PRI_MAX]`. Used by the
/// programmer-error assertions across the scheduler.
pub fn is_valid_priority(priority: i32) -> bool {
    (PRI_MIN..=PRI_MAX).contains(&priority)
}
