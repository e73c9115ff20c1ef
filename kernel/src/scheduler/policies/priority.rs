/*
 * Strict-Priority Policy: Donation Through Lock Chains
 *
 * When a thread blocks on a lock whose holder has lower priority, the
 * holder inherits the waiter's priority for as long as it holds the lock,
 * and the inheritance propagates: if the holder is itself blocked on
 * another lock, that lock's holder is raised too, and so on up the chain.
 *
 * Each thread keeps, per held lock, the highest-priority waiter seen for
 * it. Releasing a lock recomputes the holder's effective priority from its
 * base and the recorded waiters of the locks it still holds.
 *
 * The chain walk is iterative with an explicit bound. The lock-holder
 * relation is acyclic (a thread cannot wait for a lock it transitively
 * holds), so running into the bound means corrupted state and aborts.
 */

use super::super::types::{SchedPolicy, Tid};
use super::super::SchedState;
use crate::scheduler::thread::HeldLock;
use crate::sync::LockId;

/// Upper bound on donation-chain length: each of MAX_THREADS threads can
/// appear at most once per chain, and a chain step consumes one of the
/// holder's THREAD_LOCKS slots.
const DONATION_DEPTH_MAX: usize =
    super::super::types::THREAD_LOCKS * super::super::types::MAX_THREADS;

/// Notes `waiter` against `holder`'s record of `lock`, keeping the
/// highest-priority waiter. Called when a thread starts waiting, before
/// any donation: release consults this record even when no raise happened.
pub(crate) fn record_waiter(st: &mut SchedState, holder: Tid, lock: LockId, waiter: Tid) {
    let wp = st.priority_of(waiter).expect("waiter not in thread table");
    let current_top = st
        .find(holder)
        .and_then(|t| t.locks.iter().find(|h| h.lock == lock))
        .and_then(|h| h.top_waiter);
    let replace = match current_top {
        None => true,
        Some(top) => st.priority_of(top).is_none_or(|p| p < wp),
    };
    if replace {
        let t = st.find_mut(holder).expect("holder not in thread table");
        let entry = t
            .locks
            .iter_mut()
            .find(|h| h.lock == lock)
            .expect("holder does not record held lock");
        entry.top_waiter = Some(waiter);
    }
}

/// Walks the holder chain starting at `holder` (which holds `lock`),
/// raising every node below `child`'s priority and recording `child` as
/// the top waiter of the lock each node is stuck behind. Stops at the
/// first node that is already at least as high, or when the chain ends at
/// a runnable thread.
pub(crate) fn donate(st: &mut SchedState, holder: Tid, lock: LockId, child: Tid) {
    assert!(st.policy == SchedPolicy::Strict, "donation outside strict mode");
    crate::interrupt::assert_off();

    let donated = st.priority_of(child).expect("donor not in thread table");
    let mut node = Some((holder, lock));
    let mut depth = 0usize;

    while let Some((tid, lk)) = node {
        depth += 1;
        assert!(depth <= DONATION_DEPTH_MAX, "lock-holder chain cycle");

        let (old, parents) = {
            let t = st.find(tid).expect("donation chain hit unknown thread");
            if t.priority >= donated {
                break;
            }
            (t.priority, (t.parent_thread, t.parent_lock))
        };

        st.runq.rebucket(tid, old, donated);
        {
            let t = st.find_mut(tid).expect("donation chain hit unknown thread");
            t.priority = donated;
            let entry = t
                .locks
                .iter_mut()
                .find(|h| h.lock == lk)
                .expect("chain node does not record held lock");
            entry.top_waiter = Some(child);
        }

        node = match parents {
            (Some(pt), Some(pl)) => Some((pt, pl)),
            _ => None,
        };
    }
}

/// Highest priority among the recorded top waiters of all locks `tid`
/// still holds, or None when nothing is waiting on it.
pub(crate) fn max_inherited(st: &SchedState, tid: Tid) -> Option<i32> {
    let t = st.find(tid)?;
    let mut best: Option<i32> = None;
    for held in t.locks.iter() {
        if let Some(w) = held.top_waiter {
            if let Some(p) = st.priority_of(w) {
                best = Some(best.map_or(p, |b| b.max(p)));
            }
        }
    }
    best
}

/// Recomputes `tid`'s effective priority as the maximum of its base and
/// its inherited priority, re-bucketing on change.
pub(crate) fn refresh_effective(st: &mut SchedState, tid: Tid) {
    let (saved, old) = {
        let t = st.find(tid).expect("thread not in table");
        (t.saved_priority, t.priority)
    };
    let effective = max_inherited(st, tid).map_or(saved, |p| p.max(saved));
    if effective != old {
        st.runq.rebucket(tid, old, effective);
        st.find_mut(tid).expect("thread not in table").priority = effective;
    }
}

/// Whether `tid` has a free held-lock slot.
pub(crate) fn can_hold_more(st: &SchedState, tid: Tid) -> bool {
    st.find(tid).map(|t| !t.locks.is_full()).unwrap_or(false)
}

/// Records a lock as held by `tid`. The capacity was checked before the
/// thread committed to acquiring, so the push cannot fail here.
pub(crate) fn add_held(st: &mut SchedState, tid: Tid, lock: LockId, top_waiter: Option<Tid>) {
    let t = st.find_mut(tid).expect("thread not in table");
    t.locks
        .push(HeldLock { lock, top_waiter })
        .unwrap_or_else(|_| panic!("held-lock slots exhausted past the acquire check"));
}

/// Drops `lock` from `tid`'s held set.
pub(crate) fn remove_held(st: &mut SchedState, tid: Tid, lock: LockId) {
    let t = st.find_mut(tid).expect("thread not in table");
    let pos = t
        .locks
        .iter()
        .position(|h| h.lock == lock)
        .expect("releasing a lock that is not held");
    t.locks.swap_remove(pos);
}
