/*
 * Scheduling Policies
 *
 * The mechanism in scheduler::mod is shared; the two policies only decide
 * where priorities come from:
 *
 * - `priority`: strict priority with donation. Threads own their base
 *   priority; lock waiters temporarily raise their holders.
 * - `mlfqs`: multi-level feedback queue. Priorities are recomputed from
 *   recent CPU usage and nice values on a fixed cadence.
 *
 * The policy is chosen once at kernel bring-up and never changes.
 */

pub mod mlfqs;
pub mod priority;
