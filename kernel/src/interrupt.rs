/*
 * Interrupt Masking Primitive
 *
 * The core is uniprocessor and interrupt masking is its only exclusion
 * primitive: every mutation of the run queue, waiter lists, thread status
 * fields, load_avg and rcpu happens with interrupts off. This module owns
 * the interrupt-enable level, the in-interrupt-context flag, and the
 * deferred yield that the timer arms when a time slice expires.
 *
 * The level lives in a module-global flag with the same contract the
 * hardware flag has on the target: the platform layer mirrors it into the
 * real CPU state when it installs its interrupt stubs. Holding the level Off
 * must be scoped; `scoped_mask()` returns a guard that restores the previous
 * level on every exit path, including unwinding.
 */

use core::sync::atomic::{AtomicBool, Ordering};

/// Whether external interrupts are deliverable.
static ENABLED: AtomicBool = AtomicBool::new(false);

/// True while the tick handler runs. Blocking and yielding are forbidden in
/// interrupt context; preemption is deferred through `yield_on_return`.
static IN_HANDLER: AtomicBool = AtomicBool::new(false);

/// Deferred yield, executed after the handler leaves interrupt context and
/// before the interrupt is dismissed.
static YIELD_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Interrupt-enable level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Interrupts deliverable.
    On,
    /// Interrupts masked.
    Off,
}

/// Returns the current interrupt level.
pub fn level() -> Level {
    if ENABLED.load(Ordering::SeqCst) {
        Level::On
    } else {
        Level::Off
    }
}

/// Masks interrupts and returns the previous level.
pub fn disable() -> Level {
    let was = ENABLED.swap(false, Ordering::SeqCst);
    if was { Level::On } else { Level::Off }
}

/// Unmasks interrupts and returns the previous level.
///
/// Re-enabling from inside an interrupt handler is a kernel bug.
pub fn enable() -> Level {
    assert!(!in_context(), "cannot enable interrupts in interrupt context");
    let was = ENABLED.swap(true, Ordering::SeqCst);
    if was { Level::On } else { Level::Off }
}

/// Restores a previously saved level, returning the level it replaced.
pub fn set(level: Level) -> Level {
    match level {
        Level::On => enable(),
        Level::Off => disable(),
    }
}

/// Scoped interrupt mask. Restores the saved level when dropped.
#[must_use = "dropping the guard immediately re-enables interrupts"]
pub struct IntrGuard {
    prev: Level,
}

impl Drop for IntrGuard {
    fn drop(&mut self) {
        set(self.prev);
    }
}

/// Masks interrupts for the lifetime of the returned guard.
pub fn scoped_mask() -> IntrGuard {
    IntrGuard { prev: disable() }
}

/// True while executing the timer tick handler.
pub fn in_context() -> bool {
    IN_HANDLER.load(Ordering::SeqCst)
}

/// Marks entry into interrupt context. Tick driver only.
pub(crate) fn enter_context() {
    let was = IN_HANDLER.swap(true, Ordering::SeqCst);
    assert!(!was, "nested interrupt context");
}

/// Marks exit from interrupt context. Tick driver only.
pub(crate) fn leave_context() {
    IN_HANDLER.store(false, Ordering::SeqCst);
}

/// Arms a yield to be executed just before the current interrupt returns.
/// The tick driver calls this when the running thread's slice expires.
pub fn yield_on_return() {
    assert!(in_context(), "yield_on_return outside interrupt context");
    YIELD_REQUESTED.store(true, Ordering::SeqCst);
}

/// Consumes a pending deferred-yield request.
pub(crate) fn take_yield_request() -> bool {
    YIELD_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Asserts that interrupts are off. Scheduler-internal mutations call this
/// on entry; a violation is a programmer error and aborts the kernel.
pub(crate) fn assert_off() {
    assert!(level() == Level::Off, "interrupts must be off");
}

#[cfg(test)]
pub(crate) fn reset() {
    ENABLED.store(false, Ordering::SeqCst);
    IN_HANDLER.store(false, Ordering::SeqCst);
    YIELD_REQUESTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::lock_kernel;

    #[test]
    fn disable_enable_report_previous_level() {
        let _t = lock_kernel();
        reset();
        assert_eq!(level(), Level::Off);
        assert_eq!(enable(), Level::Off);
        assert_eq!(level(), Level::On);
        assert_eq!(disable(), Level::On);
        assert_eq!(disable(), Level::Off);
    }

    #[test]
    fn guard_restores_on_drop() {
        let _t = lock_kernel();
        reset();
        enable();
        {
            let _g = scoped_mask();
            assert_eq!(level(), Level::Off);
            {
                let _inner = scoped_mask();
                assert_eq!(level(), Level::Off);
            }
            // Inner guard restores Off, not On.
            assert_eq!(level(), Level::Off);
        }
        assert_eq!(level(), Level::On);
        reset();
    }

    #[test]
    fn deferred_yield_is_consumed_once() {
        let _t = lock_kernel();
        reset();
        enter_context();
        yield_on_return();
        leave_context();
        assert!(take_yield_request());
        assert!(!take_yield_request());
    }
}
