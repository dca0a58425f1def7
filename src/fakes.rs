//! Recording collaborators for unit tests.

use std::vec::Vec;

use embedded_hal_async::delay::DelayNs;

use crate::peripherals::{BatteryMonitor, Ble, Buzzer, Gps, LinkError, Radio, RgbLed};
use crate::session::Rgb;

#[derive(Default)]
pub struct FakeRadio {
    pub sent: Vec<Vec<u8>>,
    pub fail_with: Option<LinkError>,
}

impl Radio for FakeRadio {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if let Some(err) = self.fail_with {
            return Err(err);
        }
        self.sent.push(payload.to_vec());
        Ok(())
    }
}

impl FakeRadio {
    pub fn sent_text(&self, index: usize) -> &str {
        core::str::from_utf8(&self.sent[index]).unwrap()
    }
}

#[derive(Default)]
pub struct FakeBle {
    pub connected: bool,
    pub sent: Vec<Vec<u8>>,
}

impl Ble for FakeBle {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::Disconnected);
        }
        self.sent.push(payload.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCall {
    Color(Rgb),
    Off,
    Rainbow(bool),
}

#[derive(Default)]
pub struct FakeLed {
    pub calls: Vec<LedCall>,
}

impl RgbLed for FakeLed {
    fn set_color(&mut self, rgb: Rgb) {
        self.calls.push(LedCall::Color(rgb));
    }

    fn off(&mut self) {
        self.calls.push(LedCall::Off);
    }

    fn set_rainbow(&mut self, enabled: bool) {
        self.calls.push(LedCall::Rainbow(enabled));
    }
}

#[derive(Default)]
pub struct FakeBuzzer {
    pub calls: Vec<bool>,
}

impl Buzzer for FakeBuzzer {
    fn on(&mut self) {
        self.calls.push(true);
    }

    fn off(&mut self) {
        self.calls.push(false);
    }
}

pub struct FakeBattery(pub f32);

impl BatteryMonitor for FakeBattery {
    fn read_millivolts(&mut self) -> f32 {
        self.0
    }
}

/// GPS that reports a fix after a set number of updates.
pub struct FakeGps {
    /// Failing `begin()` calls before it answers.
    pub begin_failures: u32,
    pub begins: u32,
    pub updates: u32,
    /// Updates needed for a fix. `None` never fixes.
    pub fix_after: Option<u32>,
    pub power_offs: u32,
}

impl FakeGps {
    pub fn fixing_after(updates: u32) -> Self {
        Self {
            begin_failures: 0,
            begins: 0,
            updates: 0,
            fix_after: Some(updates),
            power_offs: 0,
        }
    }
}

impl Gps for FakeGps {
    fn begin(&mut self) -> bool {
        self.begins += 1;
        if self.begin_failures > 0 {
            self.begin_failures -= 1;
            return false;
        }
        true
    }

    fn update(&mut self) {
        self.updates += 1;
    }

    fn has_fix(&self) -> bool {
        self.fix_after.is_some_and(|needed| self.updates >= needed)
    }

    fn latitude(&self) -> f64 {
        36.0822134
    }

    fn longitude(&self) -> f64 {
        -94.1719
    }

    fn altitude(&self) -> f64 {
        1427.5
    }

    fn hour(&self) -> u8 {
        14
    }

    fn minute(&self) -> u8 {
        5
    }

    fn second(&self) -> u8 {
        59
    }

    fn satellites_in_view(&self) -> u8 {
        9
    }

    fn horizontal_dilution(&self) -> u16 {
        87
    }

    fn power_off(&mut self) {
        self.power_offs += 1;
    }
}

/// Zero-time delay that records every requested millisecond wait.
#[derive(Default)]
pub struct NoDelay {
    pub waits_ms: Vec<u32>,
}

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}

    async fn delay_ms(&mut self, ms: u32) {
        self.waits_ms.push(ms);
    }
}
