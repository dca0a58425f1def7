//! NMEA 0183 GGA/RMC sentence parsing for UART GNSS receivers.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use heapless::Vec;
use thiserror::Error;

use crate::session::TimeOfDay;

const FEET_PER_METRE: f64 = 3.280_84;
/// Longest sentence allowed by NMEA 0183, including `$` and CRLF.
pub const MAX_SENTENCE_LEN: usize = 82;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NmeaError {
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("invalid sentence data")]
    InvalidData,
}

/// Latest navigation solution assembled from GGA and RMC sentences.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NmeaFix {
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// Feet above mean sea level.
    pub altitude_ft: f64,
    pub time: TimeOfDay,
    pub satellites: u8,
    /// HDOP scaled by 100.
    pub hdop_x100: u16,
}

impl NmeaFix {
    /// Nothing heard yet.
    pub const NONE: NmeaFix = NmeaFix {
        valid: false,
        latitude: 0.0,
        longitude: 0.0,
        altitude_ft: 0.0,
        time: TimeOfDay {
            hour: 0,
            minute: 0,
            second: 0,
        },
        satellites: 0,
        hdop_x100: 0,
    };
}

pub fn validate_checksum(line: &[u8]) -> bool {
    let mut parts = line.split(|&b| b == b'*');
    let payload = parts.next().unwrap_or(&[]);
    let checksum_hex = parts.next().unwrap_or(&[]);
    if payload.is_empty() || checksum_hex.len() < 2 {
        return false;
    }

    let start = if payload.starts_with(b"$") { 1 } else { 0 };
    let calc = payload[start..].iter().fold(0u8, |acc, &b| acc ^ b);

    core::str::from_utf8(&checksum_hex[..2])
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
        .is_some_and(|provided| provided == calc)
}

/// Folds one sentence into `fix`. Sentences other than GGA and RMC are
/// accepted and ignored.
pub fn process_line(line: &[u8], fix: &mut NmeaFix) -> Result<(), NmeaError> {
    let line = line.trim_ascii_end();
    if !validate_checksum(line) {
        return Err(NmeaError::InvalidChecksum);
    }
    let Ok(sentence) = core::str::from_utf8(line) else {
        return Err(NmeaError::InvalidData);
    };
    let body = sentence.split('*').next().unwrap_or("");
    let fields: Vec<&str, 20> = body.split(',').take(20).collect();
    let header = fields.first().copied().unwrap_or("");
    if !header.is_ascii() || !header.starts_with('$') || header.len() != 6 {
        return Err(NmeaError::InvalidData);
    }

    // Every field is parsed before `fix` is touched, so a rejected
    // sentence leaves it as it was.
    match &header[3..] {
        "GGA" => {
            if fields.len() < 10 {
                return Err(NmeaError::InvalidData);
            }
            let valid = !matches!(fields[6], "" | "0");
            let located = if valid {
                let altitude_ft = fields[9]
                    .parse::<f64>()
                    .map_err(|_| NmeaError::InvalidData)?
                    * FEET_PER_METRE;
                Some((
                    parse_degrees(fields[2], fields[3])?,
                    parse_degrees(fields[4], fields[5])?,
                    altitude_ft,
                ))
            } else {
                None
            };
            if let Some(time) = parse_time(fields[1]) {
                fix.time = time;
            }
            fix.valid = valid;
            fix.satellites = fields[7].parse().unwrap_or(0);
            fix.hdop_x100 = parse_hdop(fields[8]);
            if let Some((latitude, longitude, altitude_ft)) = located {
                fix.latitude = latitude;
                fix.longitude = longitude;
                fix.altitude_ft = altitude_ft;
            }
        }
        "RMC" => {
            if fields.len() < 7 {
                return Err(NmeaError::InvalidData);
            }
            let valid = fields[2] == "A";
            let located = if valid {
                Some((
                    parse_degrees(fields[3], fields[4])?,
                    parse_degrees(fields[5], fields[6])?,
                ))
            } else {
                None
            };
            if let Some(time) = parse_time(fields[1]) {
                fix.time = time;
            }
            fix.valid = valid;
            if let Some((latitude, longitude)) = located {
                fix.latitude = latitude;
                fix.longitude = longitude;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Fix shared between the task reading the receiver and its consumers.
///
/// Sentences are folded into the shared copy inside one critical section,
/// so an [`SharedFix::invalidate`] on power-down is never undone by a
/// stale copy held elsewhere.
pub struct SharedFix {
    fix: Mutex<CriticalSectionRawMutex, Cell<NmeaFix>>,
    sentences: AtomicU32,
}

impl SharedFix {
    pub const fn new() -> Self {
        Self {
            fix: Mutex::new(Cell::new(NmeaFix::NONE)),
            sentences: AtomicU32::new(0),
        }
    }

    /// Folds one sentence into the shared fix and counts it when accepted.
    pub fn feed(&self, line: &[u8]) -> Result<(), NmeaError> {
        self.fix.lock(|cell| {
            let mut fix = cell.get();
            process_line(line, &mut fix)?;
            cell.set(fix);
            Ok(())
        })?;
        self.sentences.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn latest(&self) -> NmeaFix {
        self.fix.lock(Cell::get)
    }

    /// Sentences accepted since the last [`SharedFix::invalidate`].
    pub fn sentences(&self) -> u32 {
        self.sentences.load(Ordering::Relaxed)
    }

    /// Receiver lost power: the fix is no longer current. The last
    /// position is kept but reported as invalid until a new solution.
    pub fn invalidate(&self) {
        self.sentences.store(0, Ordering::Relaxed);
        self.fix.lock(|cell| {
            let mut fix = cell.get();
            fix.valid = false;
            cell.set(fix);
        });
    }
}

impl Default for SharedFix {
    fn default() -> Self {
        Self::new()
    }
}

/// `hhmmss.ss`
fn parse_time(raw: &str) -> Option<TimeOfDay> {
    let hour = raw.get(0..2)?.parse::<u8>().ok()?;
    let minute = raw.get(2..4)?.parse::<u8>().ok()?;
    let second = raw.get(4..6)?.parse::<u8>().ok()?;
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    Some(TimeOfDay {
        hour,
        minute,
        second,
    })
}

/// `dddmm.mmmm` plus hemisphere to signed decimal degrees.
fn parse_degrees(raw: &str, hemisphere: &str) -> Result<f64, NmeaError> {
    let value = raw.parse::<f64>().map_err(|_| NmeaError::InvalidData)?;
    let degrees = (value / 100.0) as u32 as f64;
    let minutes = value - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Ok(decimal),
        "S" | "W" => Ok(-decimal),
        _ => Err(NmeaError::InvalidData),
    }
}

fn parse_hdop(raw: &str) -> u16 {
    match raw.parse::<f32>() {
        Ok(hdop) if hdop >= 0.0 => (hdop * 100.0 + 0.5) as u16,
        _ => 0,
    }
}
