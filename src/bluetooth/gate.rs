//! Radio precondition gate.
//!
//! Every scan, connect, disconnect and write entry point consults the gate
//! synchronously before acting and fails as a no-op when it denies. The
//! user-facing remediation flow (enable-Bluetooth prompts, permission
//! dialogs) lives outside this crate and feeds its outcome back in through
//! [`PlatformGate::update`].

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// May the radio be used right now?
pub trait RadioGate: Send + Sync {
    fn radio_ready(&self) -> bool;
}

/// Snapshot of the platform preconditions the gate is a conjunction of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioPreconditions {
    pub powered_on: bool,
    pub location_permission: bool,
    pub scan_permission: bool,
    pub connect_permission: bool,
    pub location_service: bool,
}

impl RadioPreconditions {
    /// All preconditions satisfied.
    pub fn granted() -> Self {
        Self {
            powered_on: true,
            location_permission: true,
            scan_permission: true,
            connect_permission: true,
            location_service: true,
        }
    }

    pub fn satisfied(&self) -> bool {
        self.powered_on
            && self.location_permission
            && self.scan_permission
            && self.connect_permission
            && self.location_service
    }
}

impl Default for RadioPreconditions {
    fn default() -> Self {
        Self {
            powered_on: false,
            location_permission: false,
            scan_permission: false,
            connect_permission: false,
            location_service: false,
        }
    }
}

/// Gate fed by the platform permission flow.
pub struct PlatformGate {
    preconditions: Mutex<RadioPreconditions>,
}

impl PlatformGate {
    pub fn new(preconditions: RadioPreconditions) -> Self {
        Self {
            preconditions: Mutex::new(preconditions),
        }
    }

    /// Replaces the precondition snapshot, e.g. after a permission prompt
    /// resolved or the adapter powered off.
    pub fn update(&self, preconditions: RadioPreconditions) {
        *self.preconditions.lock().unwrap() = preconditions;
    }

    pub fn snapshot(&self) -> RadioPreconditions {
        *self.preconditions.lock().unwrap()
    }
}

impl RadioGate for PlatformGate {
    fn radio_ready(&self) -> bool {
        self.preconditions.lock().unwrap().satisfied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_denies_until_every_precondition_holds() {
        let gate = PlatformGate::new(RadioPreconditions::default());
        assert!(!gate.radio_ready());

        let mut preconditions = RadioPreconditions::granted();
        preconditions.scan_permission = false;
        gate.update(preconditions);
        assert!(!gate.radio_ready());

        gate.update(RadioPreconditions::granted());
        assert!(gate.radio_ready());
    }
}
