//! Receiver unit: bridges the LoRa link and the phone's BLE connection.

use log::{debug, info, warn};

use crate::peripherals::{BatteryMonitor, Ble, LinkError, Radio};
use crate::protocol::{self, CodecError, Message, MessageKind};
use crate::session::{LinkQuality, Session};

/// How often the receiver samples its own battery.
pub const BATTERY_SAMPLE_INTERVAL_MS: u32 = 10_000;

/// What happened to a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relayed {
    Forwarded(MessageKind),
    /// No phone connected, the message only updated the session.
    PeerAbsent(MessageKind),
    /// Informational message from the phone, kept local.
    Local(MessageKind),
    Failed(MessageKind, LinkError),
}

pub struct Relay<'a> {
    session: &'a Session,
}

impl<'a> Relay<'a> {
    pub const fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Harness packet off the air: record it and pass it on to the phone
    /// with the link metrics attached.
    pub fn on_radio_packet<B: Ble>(
        &self,
        ble: &mut B,
        payload: &[u8],
        link: LinkQuality,
    ) -> Result<Relayed, CodecError> {
        let message = Message::decode(payload).inspect_err(|e| {
            warn!("Dropping LoRa packet (RSSI {}): {}", link.rssi, e);
        })?;
        let kind = message.kind();
        self.session.apply(&message, Some(link));
        info!(
            "LoRa {:?} received (RSSI {}, SNR {})",
            kind, link.rssi, link.snr
        );

        if !ble.is_connected() {
            debug!("No phone connected, not relaying {:?}", kind);
            return Ok(Relayed::PeerAbsent(kind));
        }
        let payload = protocol::encode_relay(&self.session.snapshot(), kind)?;
        Ok(match ble.send(&payload) {
            Ok(()) => Relayed::Forwarded(kind),
            Err(e) => {
                warn!("BLE notify of {:?} failed: {}", kind, e);
                Relayed::Failed(kind, e)
            }
        })
    }

    /// Phone wrote the characteristic: record it and transmit commands to
    /// the harness.
    pub fn on_ble_write<R: Radio>(
        &self,
        radio: &mut R,
        payload: &[u8],
    ) -> Result<Relayed, CodecError> {
        let message = Message::decode(payload).inspect_err(|e| {
            warn!("Dropping BLE write: {}", e);
        })?;
        let kind = message.kind();
        self.session.apply(&message, None);

        if !kind.is_command() {
            debug!("{:?} from phone kept local", kind);
            return Ok(Relayed::Local(kind));
        }
        let payload = protocol::encode(&self.session.snapshot(), kind)?;
        Ok(match radio.send(&payload) {
            Ok(()) => {
                info!("Sent {:?} to harness ({} bytes)", kind, payload.len());
                Relayed::Forwarded(kind)
            }
            Err(e) => {
                warn!("LoRa send of {:?} failed: {}", kind, e);
                Relayed::Failed(kind, e)
            }
        })
    }

    /// Stores the receiver's own battery level.
    pub fn sample_battery<B: BatteryMonitor>(&self, battery: &mut B) -> u8 {
        let percent = battery.read_percent();
        self.session
            .update(|state| state.battery.receiver_percent = percent);
        percent
    }
}
