/*
 * Timer Tick Driver
 *
 * The platform's periodic timer interrupt lands in `tick()`, TIMER_FREQ
 * times a second. Each tick, in interrupt context:
 *
 * 1. The running thread's rcpu grows by one.
 * 2. The idle/kernel/user tick statistics advance.
 * 3. Once a second (MLFQS) the load average folds in the active count,
 *    and then every thread's rcpu decays.
 * 4. Sleeping threads count down and wake when they reach zero; threads
 *    waiting on a primitive are left alone.
 * 5. Every four ticks (MLFQS) non-blocked threads get fresh priorities.
 * 6. When the running thread's slice expires, a yield is armed and
 *    executed on interrupt return.
 *
 * Timed sleep is just a tick-down counter on the blocked thread; there is
 * no cancel API, and waiters on primitives are released only by up/signal.
 */

use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, Ordering};

use crate::interrupt;
use crate::scheduler;
use crate::scheduler::policies::mlfqs;
use crate::scheduler::thread;
use crate::scheduler::types::{SchedPolicy, ThreadStatus, Tid, TIME_SLICE};

/// Timer interrupts per second.
pub const TIMER_FREQ: i64 = 100;

static TICKS: AtomicI64 = AtomicI64::new(0);

/// Ticks since kernel bring-up.
pub fn ticks() -> i64 {
    TICKS.load(Ordering::SeqCst)
}

/// Ticks elapsed since `then`, which should be a value of `ticks()`.
pub fn elapsed(then: i64) -> i64 {
    ticks() - then
}

/// The timer interrupt handler. The platform's interrupt stub calls this
/// once per tick; the hosted scenario tests drive it directly.
pub fn tick() {
    let prev = interrupt::disable();
    interrupt::enter_context();
    let now = TICKS.fetch_add(1, Ordering::SeqCst) + 1;

    scheduler::with_state(|st| {
        let cur = scheduler::current_tid();

        if let Some(t) = st.find_mut(cur) {
            t.rcpu = t.rcpu.inc();
        }

        if Some(cur) == st.idle {
            st.idle_ticks += 1;
        } else if st.find(cur).is_some_and(|t| t.user_space.is_some()) {
            st.user_ticks += 1;
        } else {
            st.kernel_ticks += 1;
        }

        let is_mlfqs = st.policy == SchedPolicy::Mlfqs;
        let second_boundary = now % TIMER_FREQ == 0;

        // The load average must be current before the rcpu decay reads it.
        if is_mlfqs && second_boundary {
            mlfqs::recompute_load_avg(st);
        }

        let tids: Vec<Tid> = st.threads.iter().map(|t| t.tid).collect();
        for tid in tids {
            if is_mlfqs && second_boundary {
                mlfqs::recompute_rcpu(st, tid);
            }

            if st.find(tid).map(|t| t.status) == Some(ThreadStatus::Blocked) {
                let wake = {
                    let t = st.find_mut(tid).expect("thread vanished mid-tick");
                    if t.sleep_time > 0 {
                        t.sleep_time -= 1;
                    }
                    t.sleep_time <= 0 && !t.is_waiting
                };
                if wake {
                    thread::unblock_locked(st, tid);
                }
            }

            if is_mlfqs
                && now % mlfqs::PRIORITY_PERIOD == 0
                && st.find(tid).map(|t| t.status) != Some(ThreadStatus::Blocked)
            {
                mlfqs::recompute_priority(st, tid);
            }
        }

        st.slice_ticks += 1;
        if st.slice_ticks >= TIME_SLICE {
            interrupt::yield_on_return();
        }
    });

    interrupt::leave_context();
    interrupt::set(prev);

    // Deferred preemption, executed before the interrupt is dismissed.
    if interrupt::take_yield_request() {
        thread::yield_now();
    }
}

/// Blocks the calling thread for at least `duration` ticks. Resolution is
/// one tick; the wakeup lands on the first tick at or after the deadline.
pub fn sleep(duration: i64) {
    assert!(!interrupt::in_context(), "sleep in interrupt context");
    if duration <= 0 {
        return;
    }

    let prev = interrupt::disable();
    scheduler::with_state(|st| {
        let cur = scheduler::current_tid();
        assert!(Some(cur) != st.idle, "idle thread cannot sleep");
        let t = st.find_mut(cur).expect("running thread not in table");
        t.sleep_time = duration;
        t.status = ThreadStatus::Blocked;
        scheduler::schedule(st);
    });
    interrupt::set(prev);
}

#[cfg(test)]
pub(crate) fn reset() {
    TICKS.store(0, Ordering::SeqCst);
}
