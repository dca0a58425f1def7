use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::power::PowerMode;
use crate::protocol::{Heartbeat, Message, MessageKind};

/// GNSS position in degrees, altitude in feet.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixQuality {
    pub satellites_in_view: u8,
    /// HDOP scaled by 100.
    pub horizontal_dilution: u16,
}

/// UTC time of day from the GNSS, no calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Link metrics of the last received radio packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkQuality {
    pub rssi: i16,
    pub snr: i8,
}

/// Battery levels in percent (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Battery {
    pub harness_percent: u8,
    pub receiver_percent: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn is_off(&self) -> bool {
        self.r == 0 && self.g == 0 && self.b == 0
    }
}

/// Actionable intents set by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Commands {
    pub led_rgb: Rgb,
    pub rainbow_enabled: bool,
    pub buzzer_enabled: bool,
    pub acknowledged: bool,
}

/// Most recently known device facts.
///
/// `message_kind` names the last decoded or locally originated message.
/// Fields belonging to other kinds keep their last-known values: a Led
/// message does not clear the buzzer flag, and an AllData report still
/// carries the last commanded colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionState {
    pub message_kind: MessageKind,
    pub mode: PowerMode,
    pub position: Position,
    pub has_fix: bool,
    pub fix_quality: FixQuality,
    pub time_of_day: TimeOfDay,
    pub link_quality: LinkQuality,
    pub battery: Battery,
    pub commands: Commands,
}

impl SessionState {
    /// Boot state: live tracking, everything else zeroed.
    pub const fn new() -> Self {
        Self {
            message_kind: MessageKind::WakeTimer,
            mode: PowerMode::LiveTracking,
            position: Position {
                latitude: 0.0,
                longitude: 0.0,
                altitude: 0.0,
            },
            has_fix: false,
            fix_quality: FixQuality {
                satellites_in_view: 0,
                horizontal_dilution: 0,
            },
            time_of_day: TimeOfDay {
                hour: 0,
                minute: 0,
                second: 0,
            },
            link_quality: LinkQuality { rssi: 0, snr: 0 },
            battery: Battery {
                harness_percent: 0,
                receiver_percent: 0,
            },
            commands: Commands {
                led_rgb: Rgb::OFF,
                rainbow_enabled: false,
                buzzer_enabled: false,
                acknowledged: false,
            },
        }
    }

    /// Writes the fields carried by `message` and makes its kind current.
    ///
    /// `link` is only present for packets that came in over the radio.
    /// Only plain field assignment happens here so it is safe to call
    /// from receive callbacks.
    pub fn apply(&mut self, message: &Message, link: Option<LinkQuality>) {
        self.message_kind = message.kind();
        if let Some(link) = link {
            self.link_quality = link;
        }

        match message {
            Message::AllData(report) => {
                self.position = report.position;
                self.time_of_day = report.time_of_day;
                self.fix_quality = report.fix_quality;
                self.battery.harness_percent = report.harness_battery;
                if let Some(receiver) = report.receiver_battery {
                    self.battery.receiver_percent = receiver;
                }
                if let Some(heartbeat) = report.heartbeat {
                    self.apply_heartbeat(heartbeat);
                }
            }
            Message::Acknowledgement {
                ack,
                heartbeat,
                harness_battery,
            } => {
                self.commands.acknowledged = *ack;
                if let Some(heartbeat) = heartbeat {
                    self.apply_heartbeat(*heartbeat);
                }
                if let Some(harness) = harness_battery {
                    self.battery.harness_percent = *harness;
                }
            }
            Message::Buzzer { enabled } => self.commands.buzzer_enabled = *enabled,
            Message::Led { rgb } => self.commands.led_rgb = *rgb,
            Message::RainbowLed { enabled } => self.commands.rainbow_enabled = *enabled,
            Message::PowerMode { mode } => self.mode = *mode,
        }
    }

    fn apply_heartbeat(&mut self, heartbeat: Heartbeat) {
        self.mode = heartbeat.mode;
        self.commands.led_rgb = heartbeat.led_rgb;
        self.commands.rainbow_enabled = heartbeat.rainbow_enabled;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide owner of the [`SessionState`].
///
/// Every access is a short critical section over a copy of the record, so
/// receive callbacks and the tracker loop never observe a half-written state.
pub struct Session {
    state: Mutex<CriticalSectionRawMutex, Cell<SessionState>>,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(SessionState::new())),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock(|cell| cell.get())
    }

    /// Runs `f` on the state inside one critical section.
    pub fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        self.state.lock(|cell| {
            let mut state = cell.get();
            let result = f(&mut state);
            cell.set(state);
            result
        })
    }

    pub fn apply(&self, message: &Message, link: Option<LinkQuality>) {
        self.update(|state| state.apply(message, link));
    }

    /// Makes WakeTimer current and returns the kind that was current before.
    pub fn take_message_kind(&self) -> MessageKind {
        self.update(|state| core::mem::replace(&mut state.message_kind, MessageKind::WakeTimer))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
