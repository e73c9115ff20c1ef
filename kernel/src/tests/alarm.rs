/*
 * Timed Sleep Scenarios
 *
 * Wakeups are ordered by deadline and land on the deadline tick; waiters
 * on synchronization primitives are never woken by the timer.
 */

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use super::{boot, cur, nop, status};
use crate::scheduler::thread;
use crate::scheduler::types::{SchedPolicy, ThreadStatus, Tid};
use crate::sync::Semaphore;
use crate::{scheduler, timer};

#[test]
fn sleepers_wake_in_deadline_order_on_the_deadline_tick() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();

    // Each sleeper outranks main, runs at creation, and goes to sleep.
    let mut deadline = BTreeMap::new();
    for (name, ticks) in [("s10", 10i64), ("s20", 20), ("s30", 30), ("s40", 40)] {
        let t = thread::create(name, 32, nop).unwrap();
        assert_eq!(cur(), t);
        timer::sleep(ticks); // as the sleeper
        assert_eq!(cur(), main);
        assert_eq!(status(t), ThreadStatus::Blocked);
        deadline.insert(t, ticks);
    }

    let mut woke_at: BTreeMap<Tid, i64> = BTreeMap::new();
    for now in 1..=45i64 {
        timer::tick();
        for (&t, _) in deadline.iter() {
            if status(t) != ThreadStatus::Blocked && !woke_at.contains_key(&t) {
                woke_at.insert(t, now);
            }
        }
    }

    for (&t, &d) in deadline.iter() {
        assert_eq!(woke_at.get(&t), Some(&d), "{t} missed its deadline");
    }
}

#[test]
fn sleep_of_zero_or_negative_returns_immediately() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();
    timer::sleep(0);
    timer::sleep(-5);
    assert_eq!(cur(), main);
    assert_eq!(status(main), ThreadStatus::Running);
}

#[test]
fn timer_never_wakes_primitive_waiters() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();
    let sema = Arc::new(Semaphore::new(0));

    let w = thread::create("waiter", 40, nop).unwrap();
    assert_eq!(cur(), w);
    sema.down(); // as w: indefinite wait
    assert_eq!(cur(), main);
    assert_eq!(status(w), ThreadStatus::Blocked);

    super::run_ticks(50);
    assert_eq!(status(w), ThreadStatus::Blocked, "timer woke a semaphore waiter");

    sema.up(); // only up releases it
    assert_eq!(cur(), w);
    thread::exit();
    assert_eq!(cur(), main);
}

#[test]
fn ticks_advance_and_elapsed_measures() {
    let _k = boot(SchedPolicy::Strict);
    let t0 = timer::ticks();
    super::run_ticks(7);
    assert_eq!(timer::elapsed(t0), 7);
    let _ = scheduler::stats(); // counters exist and are reachable
}
