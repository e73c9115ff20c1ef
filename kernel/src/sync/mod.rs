/*
 * Synchronization Primitives
 *
 * Semaphores, locks and condition variables for kernel threads. All three
 * block through the scheduler; none of them spins. Waiter lists and thread
 * status are mutated with interrupts off, which is the core's only
 * exclusion primitive; the spin mutexes around the waiter lists are the
 * access path, not the protection.
 *
 * WAKE ORDER:
 * ==========
 *
 * An up/release/signal always wakes the highest-priority waiter, ties
 * broken FIFO. If the woken thread outranks the runner and the caller is
 * not in interrupt context, the runner yields immediately, so priority
 * inversions resolve at the wake point.
 *
 * HANDOFF:
 * =======
 *
 * A semaphore permit travels with the wakeup: `up` increments the count
 * and, when it wakes somebody, consumes the count again on the woken
 * thread's behalf. The woken thread returns from `down` without touching
 * the count. Locks extend the handoff to ownership: `release` installs the
 * woken thread as the new holder, so a resumed `acquire` has nothing left
 * to do and priority donation state is updated in one atomic step.
 *
 * DONATION (strict-priority mode only):
 * ====================================
 *
 * `acquire` against a held lock records the acquirer as a waiter of the
 * holder, then walks the holder chain raising every thread below the
 * acquirer's priority. `release` recomputes the holder's effective
 * priority from its base and the waiters of the locks it still holds.
 */

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::interrupt;
use crate::scheduler;
use crate::scheduler::policies::priority;
use crate::scheduler::thread;
use crate::scheduler::types::{SchedPolicy, ThreadStatus, Tid, PRI_MIN};

/// Identity of a lock, used by the donation bookkeeping to name locks
/// without owning them. Unique for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(u64);

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

fn allocate_lock_id() -> LockId {
    LockId(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
}

/// Index of the highest-priority waiter; the first of equals wins, which
/// preserves FIFO order within a priority.
fn pick_waiter(st: &scheduler::SchedState, waiters: &[Tid]) -> usize {
    debug_assert!(!waiters.is_empty());
    let mut best = 0;
    let mut best_priority = st.priority_of(waiters[0]).unwrap_or(PRI_MIN);
    for (i, &w) in waiters.iter().enumerate().skip(1) {
        let p = st.priority_of(w).unwrap_or(PRI_MIN);
        if p > best_priority {
            best = i;
            best_priority = p;
        }
    }
    best
}

struct SemaInner {
    /// Non-negative permit count. Positive implies no waiters.
    value: usize,
    /// Blocked downers, FIFO. A thread sits in at most one waiter list.
    waiters: Vec<Tid>,
}

/// Counting semaphore.
pub struct Semaphore {
    inner: Mutex<SemaInner>,
}

impl Semaphore {
    pub const fn new(value: usize) -> Semaphore {
        Semaphore {
            inner: Mutex::new(SemaInner { value, waiters: Vec::new() }),
        }
    }

    /// Current permit count. Racy the instant it returns; diagnostics only.
    pub fn value(&self) -> usize {
        self.inner.lock().value
    }

    /// Down or "P": waits until a permit is available, then takes it.
    ///
    /// May block, so it must not be called in interrupt context. When the
    /// calling thread is resumed the permit has already been transferred
    /// by `up` on its behalf.
    pub fn down(&self) {
        assert!(!interrupt::in_context(), "down in interrupt context");

        let prev = interrupt::disable();
        let took_fast = {
            let mut s = self.inner.lock();
            if s.value > 0 {
                s.value -= 1;
                true
            } else {
                s.waiters.push(scheduler::current_tid());
                false
            }
        };
        if !took_fast {
            scheduler::with_state(|st| {
                let cur = scheduler::current_tid();
                let t = st.find_mut(cur).expect("running thread not in table");
                t.is_waiting = true;
                t.status = ThreadStatus::Blocked;
                scheduler::schedule(st);
            });
        }
        interrupt::set(prev);
    }

    /// Takes a permit only if one is available right now.
    pub fn try_down(&self) -> bool {
        let _m = interrupt::scoped_mask();
        let mut s = self.inner.lock();
        if s.value > 0 {
            s.value -= 1;
            true
        } else {
            false
        }
    }

    /// Up or "V": releases a permit and wakes the best waiter, if any.
    ///
    /// Safe in interrupt context; the immediate yield in favor of a
    /// higher-priority wakeup is skipped there and the timer's deferred
    /// yield takes over.
    pub fn up(&self) {
        let prev = interrupt::disable();

        let woken = {
            let mut s = self.inner.lock();
            s.value += 1;
            if s.waiters.is_empty() {
                None
            } else {
                let idx = scheduler::with_state(|st| pick_waiter(st, &s.waiters));
                let w = s.waiters.remove(idx);
                s.value -= 1;
                Some(w)
            }
        };

        let mut should_yield = false;
        if let Some(w) = woken {
            should_yield = scheduler::with_state(|st| {
                st.find_mut(w).expect("semaphore waiter vanished").is_waiting = false;
                thread::unblock_locked(st, w);
                let cur = scheduler::current_tid();
                st.priority_of(w).expect("woken thread vanished")
                    > st.priority_of(cur).expect("running thread not in table")
            });
        }

        interrupt::set(prev);
        if should_yield && !interrupt::in_context() {
            thread::yield_now();
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.inner.lock();
        f.debug_struct("Semaphore")
            .field("value", &s.value)
            .field("waiters", &s.waiters.len())
            .finish()
    }
}

/// Errors reported by `Lock::acquire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The acquiring thread's held-lock slots are exhausted.
    TooManyLocks,
}

struct LockState {
    holder: Option<Tid>,
}

/// A mutual-exclusion lock: a binary semaphore plus an owner.
///
/// Only the holder may release. In strict-priority mode waiters donate
/// their priority through chains of holders.
pub struct Lock {
    id: LockId,
    state: Mutex<LockState>,
    sema: Semaphore,
}

impl Lock {
    pub fn new() -> Lock {
        Lock {
            id: allocate_lock_id(),
            state: Mutex::new(LockState { holder: None }),
            sema: Semaphore::new(1),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<Tid> {
        self.state.lock().holder
    }

    /// Whether the calling thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        self.holder() == Some(scheduler::current_tid())
    }

    /// Acquires the lock, blocking until it is free.
    ///
    /// Fails fast with `TooManyLocks` when the calling thread has no free
    /// held-lock slot, before any waiting happens. Re-acquiring a lock the
    /// caller already holds is a programmer error.
    pub fn acquire(&self) -> Result<(), AcquireError> {
        assert!(!interrupt::in_context(), "acquire in interrupt context");
        assert!(!self.held_by_current(), "recursive lock acquire");

        let prev = interrupt::disable();
        let result = self.acquire_masked();
        interrupt::set(prev);
        result
    }

    fn acquire_masked(&self) -> Result<(), AcquireError> {
        let cur = scheduler::current_tid();
        let strict = scheduler::with_state(|st| {
            if st.policy == SchedPolicy::Strict && !priority::can_hold_more(st, cur) {
                None
            } else {
                Some(st.policy == SchedPolicy::Strict)
            }
        });
        let Some(strict) = strict else {
            return Err(AcquireError::TooManyLocks);
        };

        let holder = self.state.lock().holder;
        match holder {
            None => {
                // Uncontended: take the semaphore's only permit and own it.
                {
                    let mut s = self.sema.inner.lock();
                    debug_assert!(s.value > 0, "free lock with exhausted semaphore");
                    s.value -= 1;
                }
                self.state.lock().holder = Some(cur);
                if strict {
                    scheduler::with_state(|st| priority::add_held(st, cur, self.id, None));
                }
            }
            Some(holder) => {
                if strict {
                    scheduler::with_state(|st| {
                        {
                            let t = st.find_mut(cur).expect("running thread not in table");
                            t.parent_thread = Some(holder);
                            t.parent_lock = Some(self.id);
                        }
                        priority::record_waiter(st, holder, self.id, cur);
                        priority::donate(st, holder, self.id, cur);
                    });
                }
                // Wait. Ownership and donation state are handed over by
                // release(); by the time this thread resumes, the lock is
                // already its and there is nothing left to update.
                self.sema.inner.lock().waiters.push(cur);
                scheduler::with_state(|st| {
                    let t = st.find_mut(cur).expect("running thread not in table");
                    t.is_waiting = true;
                    t.status = ThreadStatus::Blocked;
                    scheduler::schedule(st);
                });
            }
        }
        Ok(())
    }

    /// Acquires the lock only if it is free right now.
    pub fn try_acquire(&self) -> bool {
        assert!(!self.held_by_current(), "recursive lock acquire");

        let _m = interrupt::scoped_mask();
        let cur = scheduler::current_tid();
        let strict = scheduler::with_state(|st| st.policy == SchedPolicy::Strict);
        if strict && !scheduler::with_state(|st| priority::can_hold_more(st, cur)) {
            return false;
        }
        if !self.sema.try_down() {
            return false;
        }
        self.state.lock().holder = Some(cur);
        if strict {
            scheduler::with_state(|st| priority::add_held(st, cur, self.id, None));
        }
        true
    }

    /// Releases the lock, handing it to the highest-priority waiter if one
    /// exists. In strict mode the releaser's effective priority falls back
    /// to its base plus whatever its other held locks still donate.
    pub fn release(&self) {
        assert!(self.held_by_current(), "release of a lock not held");

        let prev = interrupt::disable();
        let cur = scheduler::current_tid();
        let strict = scheduler::with_state(|st| st.policy == SchedPolicy::Strict);

        if strict {
            scheduler::with_state(|st| {
                priority::remove_held(st, cur, self.id);
                priority::refresh_effective(st, cur);
            });
        }

        // Hand the lock to the best waiter, or free it.
        let woken = {
            let mut s = self.sema.inner.lock();
            if s.waiters.is_empty() {
                s.value += 1;
                self.state.lock().holder = None;
                None
            } else {
                let (idx, next_top) = scheduler::with_state(|st| {
                    let idx = pick_waiter(st, &s.waiters);
                    let next_top = best_excluding(st, &s.waiters, idx);
                    (idx, next_top)
                });
                let w = s.waiters.remove(idx);
                self.state.lock().holder = Some(w);
                Some((w, next_top))
            }
        };

        let mut should_yield = false;
        if let Some((w, next_top)) = woken {
            should_yield = scheduler::with_state(|st| {
                {
                    let t = st.find_mut(w).expect("lock waiter vanished");
                    t.is_waiting = false;
                    t.parent_thread = None;
                    t.parent_lock = None;
                }
                if strict {
                    priority::add_held(st, w, self.id, next_top);
                }
                thread::unblock_locked(st, w);
                st.priority_of(w).expect("woken thread vanished")
                    > st.priority_of(cur).expect("running thread not in table")
            });
        }

        interrupt::set(prev);
        if should_yield && !interrupt::in_context() {
            thread::yield_now();
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Lock::new()
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("id", &self.id)
            .field("holder", &self.holder())
            .finish()
    }
}

/// Highest-priority waiter other than the one at `skip`, FIFO on ties.
fn best_excluding(st: &scheduler::SchedState, waiters: &[Tid], skip: usize) -> Option<Tid> {
    let mut best: Option<(Tid, i32)> = None;
    for (i, &w) in waiters.iter().enumerate() {
        if i == skip {
            continue;
        }
        let p = st.priority_of(w).unwrap_or(PRI_MIN);
        if best.is_none_or(|(_, bp)| p > bp) {
            best = Some((w, p));
        }
    }
    best.map(|(w, _)| w)
}

struct CondWaiter {
    tid: Tid,
    sema: Arc<Semaphore>,
}

/// Condition variable. Always used with a lock; each waiter parks on its
/// own one-shot semaphore so signal can pick exactly one thread to wake.
pub struct Condvar {
    waiters: Mutex<Vec<CondWaiter>>,
}

impl Condvar {
    pub const fn new() -> Condvar {
        Condvar { waiters: Mutex::new(Vec::new()) }
    }

    /// Atomically releases `lock` and waits to be signalled, then
    /// reacquires `lock` before returning.
    pub fn wait(&self, lock: &Lock) {
        assert!(!interrupt::in_context(), "condvar wait in interrupt context");
        assert!(lock.held_by_current(), "condvar wait without the lock");

        let sema = Arc::new(Semaphore::new(0));
        self.waiters.lock().push(CondWaiter {
            tid: scheduler::current_tid(),
            sema: sema.clone(),
        });
        lock.release();
        sema.down();
        // The held-lock slot freed by the release above cannot have been
        // taken by anyone else: only this thread fills its own slots.
        lock.acquire().expect("reacquire after condvar wait");
    }

    /// Wakes the highest-priority waiter, if any. The caller must hold the
    /// lock it pairs with this condition.
    pub fn signal(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "condvar signal without the lock");

        let woken = {
            let _m = interrupt::scoped_mask();
            let mut ws = self.waiters.lock();
            if ws.is_empty() {
                None
            } else {
                let tids: Vec<Tid> = ws.iter().map(|w| w.tid).collect();
                let idx = scheduler::with_state(|st| pick_waiter(st, &tids));
                Some(ws.remove(idx))
            }
        };
        if let Some(w) = woken {
            w.sema.up();
        }
    }

    /// Wakes every waiter.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(lock.held_by_current(), "condvar broadcast without the lock");
        while !self.waiters.lock().is_empty() {
            self.signal(lock);
        }
    }

    /// Number of threads currently parked on this condition.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Condvar::new()
    }
}

#[cfg(test)]
pub(crate) fn reset_lock_ids() {
    NEXT_LOCK_ID.store(1, Ordering::Relaxed);
}
