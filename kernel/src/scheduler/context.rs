/*
 * Context-Switch Collaborator Contract
 *
 * The low-level context switch is not part of the scheduling core; it is
 * provided by the platform layer through the ContextSwitch trait defined
 * here. The contract mirrors the classic switch_threads primitive: save the
 * callee-saved registers of `prev` onto its kernel stack, restore `next`'s,
 * and resume in `next`'s context. Both threads' `stack_top` fields point at
 * the top of their saved register frames while they are switched out.
 *
 * The core installs HostedSwitch by default: a bookkeeping implementation
 * that records transitions without touching machine state. It is what the
 * scenario tests observe, and what a platform replaces via
 * `set_context_switch` before enabling preemption.
 */

use alloc::boxed::Box;
use alloc::vec::Vec;
use spin::Mutex;

use super::types::Tid;

/// Transitions the HostedSwitch implementation keeps, newest last. Bounded
/// so a long-running embedder does not leak.
const SWITCH_LOG_CAP: usize = 1024;

/// The low-level switch primitive.
///
/// Invoked by `schedule()` with interrupts off and the scheduler state
/// locked; implementations must only swap machine context and must not call
/// back into the scheduler.
pub trait ContextSwitch: Send {
    /// Switches from `prev`'s context to `next`'s. When `prev` is later
    /// switched back to, the call returns in `prev`'s context.
    fn switch(&self, prev: Tid, next: Tid);
}

static SWITCHER: Mutex<Option<Box<dyn ContextSwitch>>> = Mutex::new(None);

/// Installs the platform's context-switch implementation. The core starts
/// with HostedSwitch installed; a bare-metal platform replaces it during
/// bring-up, before preemption is enabled.
pub fn set_context_switch(switcher: Box<dyn ContextSwitch>) {
    *SWITCHER.lock() = Some(switcher);
}

/// Dispatches a switch to the installed implementation.
pub(crate) fn switch_threads(prev: Tid, next: Tid) {
    crate::interrupt::assert_off();
    let guard = SWITCHER.lock();
    let switcher = guard.as_ref().expect("no context-switch implementation installed");
    switcher.switch(prev, next);
}

/// Bookkeeping context switch: records each transition and otherwise lets
/// execution continue on the caller's stack. The scheduling core's state
/// machine is exercised exactly as with a real switch; only the machine
/// context stays put.
pub struct HostedSwitch;

static SWITCH_LOG: Mutex<Vec<(Tid, Tid)>> = Mutex::new(Vec::new());

impl ContextSwitch for HostedSwitch {
    fn switch(&self, prev: Tid, next: Tid) {
        let mut log = SWITCH_LOG.lock();
        if log.len() == SWITCH_LOG_CAP {
            log.remove(0);
        }
        log.push((prev, next));
    }
}

/// The transitions HostedSwitch has recorded, oldest first.
pub fn switch_log() -> Vec<(Tid, Tid)> {
    SWITCH_LOG.lock().clone()
}

/// Drops recorded transitions. Lets a test observe only its own activity.
pub fn clear_switch_log() {
    SWITCH_LOG.lock().clear();
}

#[cfg(test)]
pub(crate) fn reset() {
    *SWITCHER.lock() = None;
    SWITCH_LOG.lock().clear();
}
