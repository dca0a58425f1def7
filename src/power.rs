use log::info;

/// Sleep between routine wakes while live tracking.
pub const LIVE_TRACKING_SLEEP_MS: u32 = 15_000;
/// Sleep between routine wakes in power saving mode (5 minutes).
pub const POWER_SAVING_SLEEP_MS: u32 = 300_000;
/// Sleep between routine wakes in extreme power saving mode (10 minutes).
pub const EXTREME_POWER_SAVING_SLEEP_MS: u32 = 600_000;

/// Commanded power mode of the harness.
///
/// The discriminants are the values carried in the `mode` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PowerMode {
    #[default]
    LiveTracking = 0,
    PowerSaving = 1,
    ExtremePowerSaving = 2,
}

/// How the GPS receiver is powered between fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsDutyCycle {
    /// Receiver stays powered across sleeps.
    Continuous,
    /// Receiver is woken before acquisition and powered off once the fix is used.
    PowerCycled,
}

impl PowerMode {
    pub const fn sleep_ms(self) -> u32 {
        match self {
            PowerMode::LiveTracking => LIVE_TRACKING_SLEEP_MS,
            PowerMode::PowerSaving => POWER_SAVING_SLEEP_MS,
            PowerMode::ExtremePowerSaving => EXTREME_POWER_SAVING_SLEEP_MS,
        }
    }

    pub const fn gps_duty_cycle(self) -> GpsDutyCycle {
        match self {
            PowerMode::LiveTracking => GpsDutyCycle::Continuous,
            PowerMode::PowerSaving | PowerMode::ExtremePowerSaving => GpsDutyCycle::PowerCycled,
        }
    }

    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(PowerMode::LiveTracking),
            1 => Some(PowerMode::PowerSaving),
            2 => Some(PowerMode::ExtremePowerSaving),
            _ => None,
        }
    }

    pub const fn as_wire(self) -> u8 {
        self as u8
    }

    pub const fn label(self) -> &'static str {
        match self {
            PowerMode::LiveTracking => "live tracking",
            PowerMode::PowerSaving => "power saving",
            PowerMode::ExtremePowerSaving => "extreme power saving",
        }
    }
}

/// Tracks the mode the tracker loop is acting on.
///
/// The mode only changes through an explicit [`PowerModeMachine::transition`],
/// which the loop calls with the session's commanded mode once per cycle.
/// There is no timeout based transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerModeMachine {
    active: PowerMode,
    transitions: u32,
}

impl PowerModeMachine {
    pub const fn new() -> Self {
        Self {
            active: PowerMode::LiveTracking,
            transitions: 0,
        }
    }

    pub const fn active(&self) -> PowerMode {
        self.active
    }

    /// Number of mode changes since boot.
    pub const fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Moves to `requested`. Returns the previous mode when it changed.
    pub fn transition(&mut self, requested: PowerMode) -> Option<PowerMode> {
        if requested == self.active {
            return None;
        }
        let previous = self.active;
        self.active = requested;
        self.transitions = self.transitions.wrapping_add(1);
        info!(
            "Power mode: {} -> {} (sleep {} ms)",
            previous.label(),
            requested.label(),
            requested.sleep_ms()
        );
        Some(previous)
    }

    pub const fn sleep_ms(&self) -> u32 {
        self.active.sleep_ms()
    }

    pub const fn gps_duty_cycle(&self) -> GpsDutyCycle {
        self.active.gps_duty_cycle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_durations() {
        assert_eq!(PowerMode::LiveTracking.sleep_ms(), 15_000);
        assert_eq!(PowerMode::PowerSaving.sleep_ms(), 300_000);
        assert_eq!(PowerMode::ExtremePowerSaving.sleep_ms(), 600_000);
    }

    #[test]
    fn test_gps_policy() {
        assert_eq!(
            PowerMode::LiveTracking.gps_duty_cycle(),
            GpsDutyCycle::Continuous
        );
        assert_eq!(
            PowerMode::PowerSaving.gps_duty_cycle(),
            GpsDutyCycle::PowerCycled
        );
        assert_eq!(
            PowerMode::ExtremePowerSaving.gps_duty_cycle(),
            GpsDutyCycle::PowerCycled
        );
    }

    #[test]
    fn test_wire_values() {
        for mode in [
            PowerMode::LiveTracking,
            PowerMode::PowerSaving,
            PowerMode::ExtremePowerSaving,
        ] {
            assert_eq!(PowerMode::from_wire(mode.as_wire()), Some(mode));
        }
        assert_eq!(PowerMode::from_wire(3), None);
        assert_eq!(PowerMode::from_wire(10), None);
    }

    #[test]
    fn test_transition_only_on_change() {
        let mut machine = PowerModeMachine::new();
        assert_eq!(machine.active(), PowerMode::LiveTracking);
        assert_eq!(machine.transition(PowerMode::LiveTracking), None);
        assert_eq!(machine.transitions(), 0);

        assert_eq!(
            machine.transition(PowerMode::PowerSaving),
            Some(PowerMode::LiveTracking)
        );
        assert_eq!(machine.sleep_ms(), 300_000);
        assert_eq!(machine.gps_duty_cycle(), GpsDutyCycle::PowerCycled);
        assert_eq!(machine.transitions(), 1);
    }
}
