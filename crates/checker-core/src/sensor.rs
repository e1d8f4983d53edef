//! Device state source abstraction.
//!
//! Door sensing and battery sampling live outside the connection core. The
//! core only takes snapshots through [`DeviceStateSource`] at the moment a
//! frame is encoded, so it never holds a stale copy between sends.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::model::{BatteryLevel, DoorState};

/// Read-only view of the door sensor and battery.
pub trait DeviceStateSource: Send + Sync {
    /// Current door state and the time of its last transition.
    fn door_state(&self) -> DoorState;

    /// Battery charge as a percentage, 0-100.
    fn battery_percent(&self) -> u8;

    /// Battery charge on the wire scale.
    fn battery_level(&self) -> BatteryLevel {
        BatteryLevel::from_percent(self.battery_percent())
    }
}

#[derive(Debug)]
struct Readings {
    door: DoorState,
    battery_percent: u8,
}

/// In-memory device state, written by a sensor driver or simulator.
#[derive(Debug)]
pub struct SharedDeviceState {
    readings: Mutex<Readings>,
}

impl SharedDeviceState {
    pub fn new(open: bool, battery_percent: u8) -> Self {
        Self {
            readings: Mutex::new(Readings {
                door: DoorState::new(open, Instant::now()),
                battery_percent,
            }),
        }
    }

    /// Record a door reading.
    ///
    /// The transition time only moves when the open flag actually changes.
    /// Returns the new snapshot if it did.
    pub fn set_open(&self, open: bool) -> Option<DoorState> {
        let mut readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        if readings.door.open == open {
            return None;
        }
        readings.door = DoorState::new(open, Instant::now());
        Some(readings.door)
    }

    pub fn set_battery_percent(&self, percent: u8) {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .battery_percent = percent;
    }
}

impl DeviceStateSource for SharedDeviceState {
    fn door_state(&self) -> DoorState {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .door
    }

    fn battery_percent(&self) -> u8 {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .battery_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_open_only_reports_transitions() {
        let state = SharedDeviceState::new(false, 80);
        let before = state.door_state();

        assert_eq!(state.set_open(false), None);
        assert_eq!(state.door_state(), before);

        let opened = state.set_open(true).expect("transition");
        assert!(opened.open);
        assert!(opened.update_time >= before.update_time);
        assert_eq!(state.door_state(), opened);
    }

    #[test]
    fn test_battery_level_mapping() {
        let state = SharedDeviceState::new(false, 100);
        assert_eq!(state.battery_level().value(), 15);

        state.set_battery_percent(20);
        assert_eq!(state.battery_percent(), 20);
        assert_eq!(state.battery_level().value(), 3);
    }
}
