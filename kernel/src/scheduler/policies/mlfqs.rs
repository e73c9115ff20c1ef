/*
 * Multi-Level Feedback Queue Policy
 *
 * Priorities are computed, not requested:
 *
 *   priority = PRI_MAX - round(rcpu / 4) - 2 * nice,  clamped to the range
 *
 * where rcpu is an exponentially decaying estimate of recent CPU time and
 * nice is the thread's self-reported generosity. The running thread's rcpu
 * grows by 1.0 every tick; once a second every thread's rcpu decays by
 * 2*load_avg / (2*load_avg + 1) and the system load average folds in the
 * current number of active threads. Priorities are refreshed every four
 * ticks so CPU hogs sink and I/O-bound threads bubble up.
 *
 * All of it runs in the tick handler with interrupts off.
 */

use super::super::types::{SchedPolicy, Tid, PRI_MAX, PRI_MIN};
use super::super::SchedState;
use crate::fixed::Fixed;
use crate::interrupt;

/// Ticks between priority recomputations.
pub(crate) const PRIORITY_PERIOD: i64 = 4;

/// The priority formula.
pub(crate) fn priority_for(rcpu: Fixed, nice: i32) -> i32 {
    let raw = PRI_MAX - rcpu.div_int(4).to_int_round() - nice * 2;
    raw.clamp(PRI_MIN, PRI_MAX)
}

/// Recomputes one thread's priority and re-buckets it in the run queue.
pub(crate) fn recompute_priority(st: &mut SchedState, tid: Tid) {
    assert!(st.policy == SchedPolicy::Mlfqs, "mlfqs recompute outside mlfqs mode");
    interrupt::assert_off();

    let (rcpu, nice, old) = {
        let t = st.find(tid).expect("thread not in table");
        (t.rcpu, t.nice, t.priority)
    };
    let new = priority_for(rcpu, nice);
    if new != old {
        st.runq.rebucket(tid, old, new);
        st.find_mut(tid).expect("thread not in table").priority = new;
    }
}

/// The once-per-second rcpu decay:
/// rcpu = (2*load_avg / (2*load_avg + 1)) * rcpu + nice.
pub(crate) fn recompute_rcpu(st: &mut SchedState, tid: Tid) {
    interrupt::assert_off();
    let load2 = st.load_avg.mul_int(2);
    let coeff = load2.div(load2.inc());
    let t = st.find_mut(tid).expect("thread not in table");
    t.rcpu = coeff.mul(t.rcpu) + Fixed::from_int(t.nice);
}

/// The once-per-second load-average fold:
/// load_avg = (59/60)*load_avg + (1/60)*active_count.
pub(crate) fn recompute_load_avg(st: &mut SchedState) {
    interrupt::assert_off();
    let decay = Fixed::from_int(59).div(Fixed::from_int(60));
    let gain = Fixed::ONE.div(Fixed::from_int(60));
    st.load_avg = decay.mul(st.load_avg) + gain.mul_int(st.active_count());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_formula_clamps() {
        assert_eq!(priority_for(Fixed::ZERO, 0), PRI_MAX);
        // Heavy CPU use with maximum nice pins to the floor.
        assert_eq!(priority_for(Fixed::from_int(400), 20), PRI_MIN);
        // Negative nice raises, but never past the ceiling.
        assert_eq!(priority_for(Fixed::ZERO, -20), PRI_MAX);
    }

    #[test]
    fn priority_formula_rounds_rcpu_quarter() {
        // rcpu = 10 -> round(10/4) = round(2.5) = 3.
        assert_eq!(priority_for(Fixed::from_int(10), 0), PRI_MAX - 3);
        // rcpu = 9 -> round(2.25) = 2.
        assert_eq!(priority_for(Fixed::from_int(9), 0), PRI_MAX - 2);
    }

    #[test]
    fn nice_costs_two_bands_per_step() {
        let base = priority_for(Fixed::from_int(8), 0);
        assert_eq!(priority_for(Fixed::from_int(8), 1), base - 2);
        assert_eq!(priority_for(Fixed::from_int(8), -1), base + 2);
    }
}
