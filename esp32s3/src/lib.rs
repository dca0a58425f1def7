#![no_std]

extern crate alloc;

pub mod ble;
pub mod board;
/// Compile-time settings read from the build environment.
pub mod config;
pub mod gps;
pub mod lora;
