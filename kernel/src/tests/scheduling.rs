/*
 * Scheduler Scenarios
 *
 * Priority preemption, band ordering, round-robin fairness under slice
 * expiry, and thread-slot exhaustion.
 */

use super::{boot, cur, nop, prio, run_ticks, status};
use crate::scheduler::context::{clear_switch_log, switch_log};
use crate::scheduler::thread;
use crate::scheduler::types::{SchedPolicy, ThreadStatus, MAX_THREADS, TIME_SLICE};
use crate::scheduler::{self, ready_queue, CreateError};

#[test]
fn higher_priority_creation_preempts_creator() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();
    assert_eq!(prio(main), 31);

    clear_switch_log();
    let high = thread::create("high", 32, nop).unwrap();

    // The new thread ran before create's caller got another word in.
    assert_eq!(cur(), high);
    assert_eq!(status(main), ThreadStatus::Ready);
    assert!(switch_log().contains(&(main, high)));
    assert!(ready_queue().contains(&main));

    // When it finishes, the creator resumes and the thread is reaped.
    thread::exit();
    assert_eq!(cur(), main);
    assert_eq!(scheduler::thread_status(high), None);
}

#[test]
fn lower_and_equal_priority_creations_do_not_preempt() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();

    let low = thread::create("low", 30, nop).unwrap();
    assert_eq!(cur(), main);
    let equal = thread::create("equal", 31, nop).unwrap();
    assert_eq!(cur(), main);

    assert_eq!(status(low), ThreadStatus::Ready);
    assert_eq!(status(equal), ThreadStatus::Ready);
    // Scheduling order prefers the higher band.
    assert_eq!(ready_queue(), alloc::vec![equal, low]);
}

#[test]
fn yield_rotates_fifo_within_a_band() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();
    let t1 = thread::create("t1", 31, nop).unwrap();
    let t2 = thread::create("t2", 31, nop).unwrap();

    thread::yield_now();
    assert_eq!(cur(), t1);
    thread::yield_now();
    assert_eq!(cur(), t2);
    thread::yield_now();
    assert_eq!(cur(), main);
}

#[test]
fn yield_never_passes_cpu_to_a_lower_band() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();
    thread::create("low", 5, nop).unwrap();

    // The only equal-or-better thread is the yielder itself.
    thread::yield_now();
    assert_eq!(cur(), main);
}

#[test]
fn slice_expiry_gives_equal_band_threads_equal_shares() {
    let _k = boot(SchedPolicy::Strict);
    let main = cur();
    thread::set_priority(30);
    let a = thread::create("a", 30, nop).unwrap();
    let b = thread::create("b", 30, nop).unwrap();

    clear_switch_log();
    run_ticks(10 * TIME_SLICE as i64);

    // One rotation per expired slice, round-robin through the band.
    let mut turns = [1u32, 0, 0]; // main is already running
    for (_, next) in switch_log() {
        for (i, t) in [main, a, b].iter().enumerate() {
            if next == *t {
                turns[i] += 1;
            }
        }
    }
    let max = *turns.iter().max().unwrap();
    let min = *turns.iter().min().unwrap();
    assert!(max - min <= 1, "unfair shares: {turns:?}");
    assert!(max >= 3, "rotation never happened: {turns:?}");
}

#[test]
fn ready_set_equals_run_queue_contents() {
    let _k = boot(SchedPolicy::Strict);
    let idle_aware_ready = |tid| {
        scheduler::thread_stats()
            .into_iter()
            .find(|t| t.tid == tid)
            .map(|t| t.status == ThreadStatus::Ready)
            .unwrap_or(false)
    };

    thread::create("x", 20, nop).unwrap();
    thread::create("y", 40, nop).unwrap(); // preempts; main goes Ready
    thread::yield_now();                   // as y: rotate within band 40

    let queued = ready_queue();
    for t in scheduler::thread_stats() {
        let is_idle = t.name == "idle";
        if t.status == ThreadStatus::Ready && !is_idle {
            assert!(queued.contains(&t.tid), "ready {} not queued", t.tid);
        }
        if queued.contains(&t.tid) {
            assert!(idle_aware_ready(t.tid), "queued {} not ready", t.tid);
        }
    }
}

#[test]
fn create_reports_slot_exhaustion() {
    let _k = boot(SchedPolicy::Strict);

    // main and idle occupy two slots.
    for i in 0..(MAX_THREADS - 2) {
        assert!(thread::create("filler", 1, nop).is_ok(), "slot {i}");
    }
    assert_eq!(thread::create("straw", 1, nop), Err(CreateError::OutOfSlots));
}
