#![cfg_attr(not(test), no_std)]

// PS4 authentication passthrough over a CH375-style USB host bridge.
//
// The crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware specifics (UART, timers, shared state with the
// device-side USB stack) are injected through the traits in `link`, `bridge`
// and `exchange`.

pub mod addon;
pub mod bridge;
pub mod config;
pub mod control;
pub mod engine;
pub mod exchange;
pub mod link;
pub mod report;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod telemetry;
