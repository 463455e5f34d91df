use serde::{Deserialize, Serialize};
use strum::Display;

use crate::domain::FaultSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactorState {
    Closed,
    Open,
}

/// Transition produced by one latch update, for the logging boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactorEvent {
    Unchanged,
    /// Closed -> Open on a fault
    Opened,
    /// Open -> Closed on an accepted reset
    Reclosed,
    /// Reset requested while faults were still active; contactors stay open
    ResetRejected,
}

/// Latch owning the single contactor bit.
///
/// Closed -> Open on any fault unless bypassed. Open -> Closed only through
/// an explicit reset evaluated against a clear fault set. Never recloses on
/// its own.
#[derive(Debug, Clone)]
pub struct ContactorController {
    state: ContactorState,
    bypass: bool,
}

impl Default for ContactorController {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactorController {
    pub fn new() -> Self {
        Self {
            state: ContactorState::Closed,
            bypass: false,
        }
    }

    pub fn state(&self) -> ContactorState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ContactorState::Closed
    }

    pub fn bypass_active(&self) -> bool {
        self.bypass
    }

    pub fn set_bypass(&mut self, active: bool) {
        self.bypass = active;
    }

    /// Apply this tick's freshly computed fault set.
    ///
    /// A reset requested in the same tick is evaluated against `faults`
    /// before the open check, so a clear set recloses and a faulted set
    /// keeps the latch open.
    pub fn update(&mut self, faults: &FaultSet, reset_requested: bool) -> ContactorEvent {
        match self.state {
            ContactorState::Open if reset_requested => {
                if faults.is_empty() {
                    self.state = ContactorState::Closed;
                    ContactorEvent::Reclosed
                } else {
                    ContactorEvent::ResetRejected
                }
            }
            ContactorState::Open => ContactorEvent::Unchanged,
            ContactorState::Closed if !faults.is_empty() && !self.bypass => {
                self.state = ContactorState::Open;
                ContactorEvent::Opened
            }
            ContactorState::Closed => ContactorEvent::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FaultCode;

    fn faulted() -> FaultSet {
        [FaultCode::Overvoltage].into_iter().collect()
    }

    #[test]
    fn test_initially_closed() {
        let contactor = ContactorController::new();
        assert!(contactor.is_closed());
        assert!(!contactor.bypass_active());
    }

    #[test]
    fn test_opens_on_fault() {
        let mut contactor = ContactorController::new();
        assert_eq!(contactor.update(&faulted(), false), ContactorEvent::Opened);
        assert_eq!(contactor.state(), ContactorState::Open);
    }

    #[test]
    fn test_latch_holds_after_fault_clears() {
        let mut contactor = ContactorController::new();
        contactor.update(&faulted(), false);

        assert_eq!(contactor.update(&FaultSet::empty(), false), ContactorEvent::Unchanged);
        assert!(!contactor.is_closed());
    }

    #[test]
    fn test_reset_with_clear_faults_recloses() {
        let mut contactor = ContactorController::new();
        contactor.update(&faulted(), false);

        assert_eq!(contactor.update(&FaultSet::empty(), true), ContactorEvent::Reclosed);
        assert!(contactor.is_closed());
    }

    #[test]
    fn test_reset_with_active_fault_is_rejected() {
        let mut contactor = ContactorController::new();
        contactor.update(&faulted(), false);

        assert_eq!(contactor.update(&faulted(), true), ContactorEvent::ResetRejected);
        assert!(!contactor.is_closed());
    }

    #[test]
    fn test_reset_while_closed_is_noop() {
        let mut contactor = ContactorController::new();
        assert_eq!(contactor.update(&FaultSet::empty(), true), ContactorEvent::Unchanged);
        assert!(contactor.is_closed());
    }

    #[test]
    fn test_bypass_keeps_contactors_closed() {
        let mut contactor = ContactorController::new();
        contactor.set_bypass(true);

        assert_eq!(contactor.update(&faulted(), false), ContactorEvent::Unchanged);
        assert!(contactor.is_closed());
    }

    #[test]
    fn test_bypass_does_not_reclose_open_latch() {
        let mut contactor = ContactorController::new();
        contactor.update(&faulted(), false);
        contactor.set_bypass(true);

        contactor.update(&FaultSet::empty(), false);
        assert!(!contactor.is_closed());
    }
}
