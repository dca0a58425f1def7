//! Collaborator interfaces the core drives.
//!
//! The firmware crate implements these over the real GNSS, LoRa, BLE,
//! ADC and GPIO drivers. All of them are polling style: the loop calls in,
//! nothing calls back except through [`crate::tracker::Context`].

use thiserror::Error;

use crate::protocol::Payload;
use crate::session::{LinkQuality, Rgb};

/// Battery voltage treated as full.
pub const BATTERY_FULL_MV: f32 = 4200.0;
/// Battery voltage treated as empty.
pub const BATTERY_EMPTY_MV: f32 = 3050.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("outbound queue is full")]
    Busy,
    #[error("no peer connected")]
    Disconnected,
    #[error("payload exceeds one frame")]
    TooLarge,
}

/// GNSS receiver.
pub trait Gps {
    /// Powers up and configures the receiver. `false` when it did not answer.
    fn begin(&mut self) -> bool;
    /// Pulls whatever the receiver has produced since the last call.
    fn update(&mut self);
    fn has_fix(&self) -> bool;
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
    /// Feet above mean sea level.
    fn altitude(&self) -> f64;
    fn hour(&self) -> u8;
    fn minute(&self) -> u8;
    fn second(&self) -> u8;
    fn satellites_in_view(&self) -> u8;
    /// HDOP scaled by 100.
    fn horizontal_dilution(&self) -> u16;
    fn power_off(&mut self);
}

/// LoRa transmitter. Received packets arrive through
/// [`crate::tracker::Context::on_radio_receive`].
pub trait Radio {
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}

/// BLE link to the phone. Writes arrive through
/// [`crate::tracker::Context::on_ble_write`].
pub trait Ble {
    fn is_connected(&self) -> bool;
    fn send(&mut self, payload: &[u8]) -> Result<(), LinkError>;
}

pub trait BatteryMonitor {
    fn read_millivolts(&mut self) -> f32;

    fn read_percent(&mut self) -> u8 {
        millivolts_to_percent(self.read_millivolts())
    }
}

pub trait RgbLed {
    fn set_color(&mut self, rgb: Rgb);
    fn off(&mut self);
    fn set_rainbow(&mut self, enabled: bool);
}

pub trait Buzzer {
    fn on(&mut self);
    fn off(&mut self);
}

/// One packet taken off the air, with the link metrics it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioPacket {
    pub payload: Payload,
    pub link: LinkQuality,
}

/// Linear cell voltage to charge mapping, clamped to 0..=100.
///
/// 3050 mV and below is empty, 4200 mV and above is full, and in between
/// every 12 mV above 3000 mV counts one percent.
pub fn millivolts_to_percent(millivolts: f32) -> u8 {
    if millivolts >= BATTERY_FULL_MV {
        return 100;
    }
    if millivolts <= BATTERY_EMPTY_MV {
        return 0;
    }
    let percent = (millivolts - 3000.0) / 12.0;
    if percent >= 100.0 { 100 } else { percent as u8 }
}
