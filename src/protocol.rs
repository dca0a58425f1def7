use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::power::PowerMode;
use crate::session::{FixQuality, Position, Rgb, SessionState, TimeOfDay};

/// Largest payload accepted on the LoRa link and the BLE characteristic.
pub const MAX_PAYLOAD_LEN: usize = 200;

/// Encoded message, ready to hand to the radio or the BLE stack.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

/// Latitude/longitude resolution on the wire (1e-7 degrees, the GNSS resolution).
const DEGREE_SCALE: f64 = 10_000_000.0;
/// Altitude resolution on the wire (0.1 ft).
const ALTITUDE_SCALE: f64 = 10.0;

/// Message kinds. The discriminant is the `msgType` value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    AllData = 0,
    Acknowledgement = 1,
    Buzzer = 2,
    Led = 3,
    RainbowLed = 4,
    PowerMode = 5,
    /// Idle kind of a plain timer wake. Never transmitted.
    WakeTimer = 6,
}

impl MessageKind {
    /// Parses a `msgType` value. WakeTimer is local-only and rejected.
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageKind::AllData),
            1 => Some(MessageKind::Acknowledgement),
            2 => Some(MessageKind::Buzzer),
            3 => Some(MessageKind::Led),
            4 => Some(MessageKind::RainbowLed),
            5 => Some(MessageKind::PowerMode),
            _ => None,
        }
    }

    pub const fn as_wire(self) -> u8 {
        self as u8
    }

    pub const fn is_transmittable(self) -> bool {
        !matches!(self, MessageKind::WakeTimer)
    }

    /// Kinds that ask the harness to change something.
    pub const fn is_command(self) -> bool {
        matches!(
            self,
            MessageKind::Buzzer | MessageKind::Led | MessageKind::RainbowLed | MessageKind::PowerMode
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed payload")]
    Malformed,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` out of range")]
    OutOfRange(&'static str),
    #[error("unknown message type {0}")]
    UnknownKind(u8),
    #[error("unknown power mode {0}")]
    UnknownMode(u8),
    #[error("{0:?} is not sent on the wire")]
    NotTransmittable(MessageKind),
    #[error("encoded payload of {0} bytes exceeds the frame limit")]
    Oversize(usize),
}

/// The always-included mode and LED intent attached to outbound reports
/// and acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    pub mode: PowerMode,
    pub led_rgb: Rgb,
    pub rainbow_enabled: bool,
}

/// Routine position report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub position: Position,
    pub time_of_day: TimeOfDay,
    pub fix_quality: FixQuality,
    pub harness_battery: u8,
    /// Only present on reports relayed by the receiver.
    pub receiver_battery: Option<u8>,
    pub heartbeat: Option<Heartbeat>,
}

/// A decoded message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    AllData(Report),
    Acknowledgement {
        ack: bool,
        heartbeat: Option<Heartbeat>,
        harness_battery: Option<u8>,
    },
    Buzzer {
        enabled: bool,
    },
    Led {
        rgb: Rgb,
    },
    RainbowLed {
        enabled: bool,
    },
    PowerMode {
        mode: PowerMode,
    },
}

impl Message {
    pub const fn kind(&self) -> MessageKind {
        match self {
            Message::AllData(_) => MessageKind::AllData,
            Message::Acknowledgement { .. } => MessageKind::Acknowledgement,
            Message::Buzzer { .. } => MessageKind::Buzzer,
            Message::Led { .. } => MessageKind::Led,
            Message::RainbowLed { .. } => MessageKind::RainbowLed,
            Message::PowerMode { .. } => MessageKind::PowerMode,
        }
    }

    /// Parses a payload. Trailing NUL padding is ignored, unknown keys are
    /// skipped, and a missing key required by the message kind is an error.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let buf = &buf[..end];
        if buf.is_empty() {
            return Err(CodecError::Malformed);
        }

        let frame: Frame = serde_json::from_slice(buf).map_err(|e| {
            debug!("JSON parse failed: {}", e);
            CodecError::Malformed
        })?;
        frame.into_message()
    }
}

/// Encodes the fields of `kind` from `state` for transmission.
///
/// AllData and Acknowledgement always carry the heartbeat (mode, LED,
/// rainbow, harness battery) whatever triggered them.
///
/// Positions go out at 1e-7 degree resolution (about 1 cm) and altitude at
/// 0.1 ft, so decoding returns the state rounded to those steps. Every
/// other field round-trips exactly.
pub fn encode(state: &SessionState, kind: MessageKind) -> Result<Payload, CodecError> {
    write_frame(&Frame::outbound(state, kind)?)
}

/// Encodes `kind` for the phone, adding the link metrics of the packet
/// being relayed.
///
/// Relayed reports trade the heartbeat for the receiver battery so the
/// frame stays under [`MAX_PAYLOAD_LEN`]; the phone gets mode and LED
/// state from relayed acknowledgements.
pub fn encode_relay(state: &SessionState, kind: MessageKind) -> Result<Payload, CodecError> {
    let mut frame = Frame::outbound(state, kind)?;
    frame.rssi = Some(state.link_quality.rssi);
    frame.snr = Some(state.link_quality.snr);
    if kind == MessageKind::AllData {
        frame.mode = None;
        frame.rb_led = None;
        frame.r = None;
        frame.g = None;
        frame.b = None;
        frame.r_batt = Some(state.battery.receiver_percent);
    }
    write_frame(&frame)
}

/// Decodes `buf` and applies it to `state`. On error `state` is untouched.
pub fn decode_into(
    state: &mut SessionState,
    buf: &[u8],
    link: Option<crate::session::LinkQuality>,
) -> Result<Message, CodecError> {
    let message = Message::decode(buf)?;
    state.apply(&message, link);
    Ok(message)
}

fn write_frame(frame: &Frame) -> Result<Payload, CodecError> {
    let bytes = serde_json::to_vec(frame).map_err(|_| CodecError::Malformed)?;
    Payload::from_slice(&bytes).map_err(|_| CodecError::Oversize(bytes.len()))
}

/// Flat keyed object as it travels on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Frame {
    #[serde(rename = "msgType")]
    msg_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hour: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sec: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    siv: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hdop: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rssi: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snr: Option<i8>,
    #[serde(rename = "hBatt", default, skip_serializing_if = "Option::is_none")]
    h_batt: Option<u8>,
    #[serde(rename = "rBatt", default, skip_serializing_if = "Option::is_none")]
    r_batt: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ack: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buzzer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    g: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    b: Option<u8>,
    #[serde(rename = "rbLed", default, skip_serializing_if = "Option::is_none")]
    rb_led: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<u8>,
}

impl Frame {
    fn outbound(state: &SessionState, kind: MessageKind) -> Result<Self, CodecError> {
        let commands = &state.commands;
        let mut frame = Frame {
            msg_type: kind.as_wire(),
            ..Frame::default()
        };
        match kind {
            MessageKind::AllData => {
                frame.lat = Some(quantize(state.position.latitude, DEGREE_SCALE));
                frame.lon = Some(quantize(state.position.longitude, DEGREE_SCALE));
                frame.hour = Some(state.time_of_day.hour);
                frame.min = Some(state.time_of_day.minute);
                frame.sec = Some(state.time_of_day.second);
                frame.siv = Some(state.fix_quality.satellites_in_view);
                frame.hdop = Some(state.fix_quality.horizontal_dilution);
                frame.alt = Some(quantize(state.position.altitude, ALTITUDE_SCALE));
                frame.with_heartbeat(state);
            }
            MessageKind::Acknowledgement => {
                frame.ack = Some(commands.acknowledged);
                frame.with_heartbeat(state);
            }
            MessageKind::Buzzer => frame.buzzer = Some(commands.buzzer_enabled),
            MessageKind::Led => frame.with_rgb(commands.led_rgb),
            MessageKind::RainbowLed => frame.rb_led = Some(commands.rainbow_enabled),
            MessageKind::PowerMode => frame.mode = Some(state.mode.as_wire()),
            MessageKind::WakeTimer => return Err(CodecError::NotTransmittable(kind)),
        }
        Ok(frame)
    }

    fn with_heartbeat(&mut self, state: &SessionState) {
        self.mode = Some(state.mode.as_wire());
        self.rb_led = Some(state.commands.rainbow_enabled);
        self.with_rgb(state.commands.led_rgb);
        self.h_batt = Some(state.battery.harness_percent);
    }

    fn with_rgb(&mut self, rgb: Rgb) {
        self.r = Some(rgb.r);
        self.g = Some(rgb.g);
        self.b = Some(rgb.b);
    }

    fn into_message(self) -> Result<Message, CodecError> {
        let kind =
            MessageKind::from_wire(self.msg_type).ok_or(CodecError::UnknownKind(self.msg_type))?;

        let message = match kind {
            MessageKind::AllData => Message::AllData(Report {
                position: Position {
                    latitude: required(self.lat, "lat")?,
                    longitude: required(self.lon, "lon")?,
                    altitude: required(self.alt, "alt")?,
                },
                time_of_day: TimeOfDay {
                    hour: bounded(self.hour, "hour", 23)?,
                    minute: bounded(self.min, "min", 59)?,
                    second: bounded(self.sec, "sec", 59)?,
                },
                fix_quality: FixQuality {
                    satellites_in_view: required(self.siv, "siv")?,
                    horizontal_dilution: required(self.hdop, "hdop")?,
                },
                harness_battery: bounded(self.h_batt, "hBatt", 100)?,
                receiver_battery: optional_bounded(self.r_batt, "rBatt", 100)?,
                heartbeat: self.heartbeat()?,
            }),
            MessageKind::Acknowledgement => Message::Acknowledgement {
                ack: required(self.ack, "ack")?,
                heartbeat: self.heartbeat()?,
                harness_battery: optional_bounded(self.h_batt, "hBatt", 100)?,
            },
            MessageKind::Buzzer => Message::Buzzer {
                enabled: required(self.buzzer, "buzzer")?,
            },
            MessageKind::Led => Message::Led {
                rgb: Rgb::new(
                    required(self.r, "r")?,
                    required(self.g, "g")?,
                    required(self.b, "b")?,
                ),
            },
            MessageKind::RainbowLed => Message::RainbowLed {
                enabled: required(self.rb_led, "rbLed")?,
            },
            MessageKind::PowerMode => Message::PowerMode {
                mode: power_mode(required(self.mode, "mode")?)?,
            },
            MessageKind::WakeTimer => return Err(CodecError::UnknownKind(self.msg_type)),
        };
        Ok(message)
    }

    /// Heartbeat fields count only when all of them are present.
    fn heartbeat(&self) -> Result<Option<Heartbeat>, CodecError> {
        match (self.mode, self.r, self.g, self.b, self.rb_led) {
            (Some(mode), Some(r), Some(g), Some(b), Some(rainbow_enabled)) => Ok(Some(Heartbeat {
                mode: power_mode(mode)?,
                led_rgb: Rgb::new(r, g, b),
                rainbow_enabled,
            })),
            _ => Ok(None),
        }
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, CodecError> {
    value.ok_or(CodecError::MissingField(field))
}

fn bounded(value: Option<u8>, field: &'static str, max: u8) -> Result<u8, CodecError> {
    let value = required(value, field)?;
    if value > max {
        return Err(CodecError::OutOfRange(field));
    }
    Ok(value)
}

fn optional_bounded(
    value: Option<u8>,
    field: &'static str,
    max: u8,
) -> Result<Option<u8>, CodecError> {
    value.map(|v| bounded(Some(v), field, max)).transpose()
}

fn power_mode(value: u8) -> Result<PowerMode, CodecError> {
    PowerMode::from_wire(value).ok_or(CodecError::UnknownMode(value))
}

/// Rounds `value` to `1 / scale` so the shortest decimal form stays short.
fn quantize(value: f64, scale: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let scaled = value * scale;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5) as i64
    } else {
        (scaled - 0.5) as i64
    };
    rounded as f64 / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LinkQuality;

    fn tracked_state() -> SessionState {
        let mut state = SessionState::new();
        state.position = Position {
            latitude: 36.0822134,
            longitude: -94.1719,
            altitude: 1427.5,
        };
        state.has_fix = true;
        state.time_of_day = TimeOfDay {
            hour: 23,
            minute: 59,
            second: 7,
        };
        state.fix_quality = FixQuality {
            satellites_in_view: 11,
            horizontal_dilution: 92,
        };
        state.battery.harness_percent = 77;
        state.battery.receiver_percent = 41;
        state.mode = PowerMode::PowerSaving;
        state.commands.led_rgb = Rgb::new(12, 200, 0);
        state.commands.rainbow_enabled = true;
        state.commands.buzzer_enabled = true;
        state.commands.acknowledged = true;
        state
    }

    fn text(payload: &Payload) -> &str {
        core::str::from_utf8(payload).unwrap()
    }

    #[test]
    fn test_all_data_round_trip() {
        let state = tracked_state();
        let payload = encode(&state, MessageKind::AllData).unwrap();
        let decoded = Message::decode(&payload).unwrap();

        let Message::AllData(report) = decoded else {
            panic!("expected AllData, got {:?}", decoded);
        };
        assert_eq!(report.position, state.position);
        assert_eq!(report.time_of_day, state.time_of_day);
        assert_eq!(report.fix_quality, state.fix_quality);
        assert_eq!(report.harness_battery, 77);
        assert_eq!(report.receiver_battery, None);
        assert_eq!(
            report.heartbeat,
            Some(Heartbeat {
                mode: PowerMode::PowerSaving,
                led_rgb: Rgb::new(12, 200, 0),
                rainbow_enabled: true,
            })
        );
    }

    #[test]
    fn test_position_round_trips_at_wire_resolution() {
        let mut state = tracked_state();
        state.position = Position {
            latitude: 36.082_213_449_9,
            longitude: -94.171_923_46,
            altitude: 1427.46,
        };
        let payload = encode(&state, MessageKind::AllData).unwrap();
        let Message::AllData(report) = Message::decode(&payload).unwrap() else {
            panic!("expected AllData");
        };

        assert_ne!(report.position, state.position);
        assert_eq!(report.position.latitude, 36.0822134);
        assert_eq!(report.position.longitude, -94.1719235);
        assert_eq!(report.position.altitude, 1427.5);
        assert!((report.position.latitude - state.position.latitude).abs() <= 0.5e-7);
        assert!((report.position.longitude - state.position.longitude).abs() <= 0.5e-7);
        assert_eq!(report.time_of_day, state.time_of_day);
        assert_eq!(report.fix_quality, state.fix_quality);
    }

    #[test]
    fn test_command_kinds_round_trip() {
        let state = tracked_state();
        let cases = [
            (MessageKind::Buzzer, Message::Buzzer { enabled: true }),
            (
                MessageKind::Led,
                Message::Led {
                    rgb: Rgb::new(12, 200, 0),
                },
            ),
            (MessageKind::RainbowLed, Message::RainbowLed { enabled: true }),
            (
                MessageKind::PowerMode,
                Message::PowerMode {
                    mode: PowerMode::PowerSaving,
                },
            ),
        ];

        for (kind, expected) in cases {
            let payload = encode(&state, kind).unwrap();
            assert_eq!(Message::decode(&payload).unwrap(), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_acknowledgement_carries_heartbeat() {
        let state = tracked_state();
        let payload = encode(&state, MessageKind::Acknowledgement).unwrap();
        let json = text(&payload);
        for key in ["\"ack\":true", "\"mode\":1", "\"rbLed\":true", "\"hBatt\":77", "\"g\":200"] {
            assert!(json.contains(key), "{} missing from {}", key, json);
        }
        assert!(!json.contains("rssi"), "outbound frames carry no link metrics");

        assert_eq!(
            Message::decode(&payload).unwrap(),
            Message::Acknowledgement {
                ack: true,
                heartbeat: Some(Heartbeat {
                    mode: PowerMode::PowerSaving,
                    led_rgb: Rgb::new(12, 200, 0),
                    rainbow_enabled: true,
                }),
                harness_battery: Some(77),
            }
        );
    }

    #[test]
    fn test_command_frames_carry_only_their_fields() {
        let state = tracked_state();
        let payload = encode(&state, MessageKind::Buzzer).unwrap();
        assert_eq!(text(&payload), r#"{"msgType":2,"buzzer":true}"#);

        let payload = encode(&state, MessageKind::PowerMode).unwrap();
        assert_eq!(text(&payload), r#"{"msgType":5,"mode":1}"#);
    }

    #[test]
    fn test_relay_adds_link_metrics() {
        let mut state = tracked_state();
        state.link_quality = LinkQuality { rssi: -112, snr: -6 };

        let payload = encode_relay(&state, MessageKind::AllData).unwrap();
        let json = text(&payload);
        assert!(json.contains("\"rssi\":-112"));
        assert!(json.contains("\"snr\":-6"));
        assert!(json.contains("\"rBatt\":41"));
        assert!(json.contains("\"hBatt\":77"));
        assert!(!json.contains("rbLed"));
        assert!(matches!(
            Message::decode(&payload),
            Ok(Message::AllData(Report {
                receiver_battery: Some(41),
                heartbeat: None,
                ..
            }))
        ));

        let payload = encode_relay(&state, MessageKind::Led).unwrap();
        assert!(!text(&payload).contains("rBatt"));
    }

    #[test]
    fn test_worst_case_fits_frame() {
        let mut state = tracked_state();
        state.position = Position {
            latitude: -89.123456789123,
            longitude: -179.987654321987,
            altitude: -12345.678912345,
        };
        state.fix_quality = FixQuality {
            satellites_in_view: 255,
            horizontal_dilution: u16::MAX,
        };
        state.link_quality = LinkQuality { rssi: -137, snr: -20 };
        state.commands.led_rgb = Rgb::new(255, 255, 255);
        state.battery.harness_percent = 100;
        state.battery.receiver_percent = 100;

        let payload = encode(&state, MessageKind::AllData).unwrap();
        assert!(payload.len() <= MAX_PAYLOAD_LEN, "{}", text(&payload));
        let payload = encode_relay(&state, MessageKind::AllData).unwrap();
        assert!(payload.len() <= MAX_PAYLOAD_LEN, "{}", text(&payload));
    }

    #[test]
    fn test_wake_timer_not_transmittable() {
        let state = tracked_state();
        assert_eq!(
            encode(&state, MessageKind::WakeTimer),
            Err(CodecError::NotTransmittable(MessageKind::WakeTimer))
        );
        assert_eq!(
            Message::decode(br#"{"msgType":6}"#),
            Err(CodecError::UnknownKind(6))
        );
    }

    #[test]
    fn test_decode_power_mode_from_phone() {
        let decoded = Message::decode(br#"{"msgType":5,"mode":1}"#).unwrap();
        assert_eq!(
            decoded,
            Message::PowerMode {
                mode: PowerMode::PowerSaving
            }
        );
        assert_eq!(
            Message::decode(br#"{"msgType":5,"mode":10}"#),
            Err(CodecError::UnknownMode(10))
        );
    }

    #[test]
    fn test_decode_ignores_unknown_fields_and_padding() {
        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let json = br#"{"msgType":3,"r":1,"g":2,"b":3,"blink":true,"note":"hi"}"#;
        buf[..json.len()].copy_from_slice(json);

        assert_eq!(
            Message::decode(&buf).unwrap(),
            Message::Led {
                rgb: Rgb::new(1, 2, 3)
            }
        );
    }

    #[test]
    fn test_decode_missing_field() {
        assert_eq!(
            Message::decode(br#"{"msgType":3,"r":1,"b":3}"#),
            Err(CodecError::MissingField("g"))
        );
        assert_eq!(
            Message::decode(br#"{"r":1,"g":2,"b":3}"#),
            Err(CodecError::Malformed)
        );
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        let json = br#"{"msgType":0,"lat":1.0,"lon":2.0,"hour":24,"min":0,"sec":0,"siv":4,"hdop":120,"alt":10,"hBatt":50}"#;
        assert_eq!(Message::decode(json), Err(CodecError::OutOfRange("hour")));
    }

    #[test]
    fn test_decode_truncated_leaves_state_untouched() {
        let mut state = tracked_state();
        let before = state;
        let result = decode_into(&mut state, br#"{"msgType":2,"buzz"#, None);
        assert_eq!(result, Err(CodecError::Malformed));
        assert_eq!(state, before);

        assert_eq!(Message::decode(&[]), Err(CodecError::Malformed));
        assert_eq!(Message::decode(&[0u8; 16]), Err(CodecError::Malformed));
    }

    #[test]
    fn test_decode_into_applies_power_mode() {
        let mut state = SessionState::new();
        let message = decode_into(
            &mut state,
            br#"{"msgType":5,"mode":1}"#,
            Some(LinkQuality { rssi: -80, snr: 5 }),
        )
        .unwrap();
        assert_eq!(message.kind(), MessageKind::PowerMode);
        assert_eq!(state.mode, PowerMode::PowerSaving);
        assert_eq!(state.message_kind, MessageKind::PowerMode);
        assert_eq!(state.link_quality, LinkQuality { rssi: -80, snr: 5 });
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(36.08221344, DEGREE_SCALE), 36.0822134);
        assert_eq!(quantize(-94.17192346, DEGREE_SCALE), -94.1719235);
        assert_eq!(quantize(1427.46, ALTITUDE_SCALE), 1427.5);
    }
}
