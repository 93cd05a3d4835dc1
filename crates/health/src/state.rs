use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Outcome of an observation that crossed a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ejected,
    Recovered,
}

#[derive(Debug, Default)]
struct Counters {
    consec_success: u32,
    consec_failure: u32,
    last_checked: Option<Instant>,
}

/// Flap-damped health flag for one backend.
///
/// Readers (the balancer) take an atomic load; all writes go through
/// `observe` or `set_healthy`, with the rolling counters serialized behind a
/// mutex so active probes and passive reports interleave safely.
#[derive(Debug)]
pub struct HealthState {
    healthy: AtomicBool,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
    counters: Mutex<Counters>,
}

impl HealthState {
    /// Backends start healthy (optimistic start).
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn last_checked(&self) -> Option<Instant> {
        self.counters.lock().expect("health counters").last_checked
    }

    /// Applies one probe or passive observation to the state machine.
    pub fn observe(&self, success: bool) -> Option<Transition> {
        let mut counters = self.counters.lock().expect("health counters");
        counters.last_checked = Some(Instant::now());

        if self.healthy.load(Ordering::Acquire) {
            if success {
                counters.consec_failure = 0;
                counters.consec_success = counters.consec_success.saturating_add(1);
                None
            } else {
                counters.consec_success = 0;
                counters.consec_failure += 1;
                if counters.consec_failure >= self.unhealthy_threshold {
                    counters.consec_failure = 0;
                    counters.consec_success = 0;
                    self.healthy.store(false, Ordering::Release);
                    Some(Transition::Ejected)
                } else {
                    None
                }
            }
        } else if success {
            counters.consec_failure = 0;
            counters.consec_success += 1;
            if counters.consec_success >= self.healthy_threshold {
                counters.consec_success = 0;
                counters.consec_failure = 0;
                self.healthy.store(true, Ordering::Release);
                Some(Transition::Recovered)
            } else {
                None
            }
        } else {
            counters.consec_success = 0;
            None
        }
    }

    /// Manual override; resets both rolling counters.
    pub fn set_healthy(&self, healthy: bool) {
        let mut counters = self.counters.lock().expect("health counters");
        counters.consec_success = 0;
        counters.consec_failure = 0;
        self.healthy.store(healthy, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(state: &HealthState, outcomes: &str) -> Vec<Option<Transition>> {
        outcomes
            .chars()
            .map(|c| state.observe(c == 'S'))
            .collect()
    }

    #[test]
    fn three_failures_eject() {
        let state = HealthState::new(2, 3);
        let transitions = apply(&state, "FFF");
        assert_eq!(transitions[2], Some(Transition::Ejected));
        assert!(!state.is_healthy());
    }

    #[test]
    fn interleaved_success_resets_failure_streak() {
        let state = HealthState::new(2, 3);
        apply(&state, "FFS");
        assert!(state.is_healthy());

        // streak starts over after the success
        apply(&state, "FF");
        assert!(state.is_healthy());
        state.observe(false);
        assert!(!state.is_healthy());
    }

    #[test]
    fn two_successes_recover() {
        let state = HealthState::new(2, 3);
        apply(&state, "FFF");
        assert!(!state.is_healthy());

        let transitions = apply(&state, "SS");
        assert_eq!(transitions[1], Some(Transition::Recovered));
        assert!(state.is_healthy());
    }

    #[test]
    fn recovery_requires_consecutive_successes() {
        let state = HealthState::new(2, 3);
        apply(&state, "FFF");
        assert!(!state.is_healthy());

        apply(&state, "SFS");
        assert!(!state.is_healthy());

        state.observe(true);
        assert!(state.is_healthy());
    }

    #[test]
    fn manual_override_resets_counters() {
        let state = HealthState::new(2, 3);
        apply(&state, "FF");
        state.set_healthy(false);
        assert!(!state.is_healthy());

        state.set_healthy(true);
        assert!(state.is_healthy());

        // counters were cleared, so a fresh streak is needed to eject
        apply(&state, "FF");
        assert!(state.is_healthy());
    }

    #[test]
    fn observations_stamp_last_checked() {
        let state = HealthState::new(2, 3);
        assert!(state.last_checked().is_none());
        state.observe(true);
        assert!(state.last_checked().is_some());
    }
}
