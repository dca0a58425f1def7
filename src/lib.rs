//! Shared core of the MountainCat wildlife tracker.
//!
//! Both units run the same pieces: a [`session::Session`] holding the last
//! known device facts, the keyed JSON [`protocol`] spoken over LoRa and BLE,
//! a bounded [`command::CommandQueue`], the [`wake::WakeScheduler`] and the
//! [`power::PowerMode`] state machine. The harness drives them from
//! [`tracker::TrackerLoop`]; the receiver bridges LoRa and BLE through
//! [`receiver::Relay`].
//!
//! Hardware lives behind the traits in [`peripherals`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod command;
pub mod config;
pub mod dispatch;
#[cfg(test)]
mod fakes;
pub mod nmea;
pub mod peripherals;
pub mod power;
/// Keyed message protocol shared by the LoRa link and the BLE characteristic.
pub mod protocol;
pub mod receiver;
pub mod session;
pub mod tracker;
pub mod wake;

pub use command::{Command, CommandQueue};
pub use config::TrackerConfig;
pub use power::PowerMode;
pub use protocol::{CodecError, Message, MessageKind};
pub use session::{Session, SessionState};
pub use tracker::{Context, TrackerLoop};
pub use wake::{WakeCause, WakeScheduler};
