//! In-flight power-state transitions.
//!
//! Power-state commands are fire-and-forget. Until the engine reports the
//! state change complete, the target machine is off limits: a machine going
//! to sleep takes no new work, and no second command is issued for it.

use std::collections::HashMap;

use wattgrid_core::{MachineId, SState};

#[derive(Debug, Clone, Default)]
pub struct TransitionTracker {
    pending: HashMap<MachineId, SState>,
}

impl TransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `machine` was asked to move to `target`.
    pub fn begin(&mut self, machine: MachineId, target: SState) {
        self.pending.insert(machine, target);
    }

    /// Clear the marker for `machine`, returning the state it was headed to.
    pub fn complete(&mut self, machine: MachineId) -> Option<SState> {
        self.pending.remove(&machine)
    }

    pub fn target(&self, machine: MachineId) -> Option<SState> {
        self.pending.get(&machine).copied()
    }

    pub fn is_pending(&self, machine: MachineId) -> bool {
        self.pending.contains_key(&machine)
    }

    pub fn is_powering_down(&self, machine: MachineId) -> bool {
        self.target(machine).is_some_and(|s| s != SState::S0)
    }

    pub fn is_waking(&self, machine: MachineId) -> bool {
        self.target(machine) == Some(SState::S0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_direction_of_transition() {
        let mut tracker = TransitionTracker::new();
        tracker.begin(1, SState::S3);
        tracker.begin(2, SState::S0);

        assert!(tracker.is_powering_down(1));
        assert!(!tracker.is_waking(1));
        assert!(tracker.is_waking(2));
        assert!(!tracker.is_pending(3));
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.complete(1), Some(SState::S3));
        assert_eq!(tracker.complete(1), None);
        assert!(!tracker.is_pending(1));
    }
}
