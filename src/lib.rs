//! zprobe: Z-height probing, endstop detection and delta calibration.
//!
//! Exposes the pure-logic modules for the host simulator and integration
//! testing.  Hardware reaches the core only through the port traits in
//! [`app::ports`] and the `embedded-hal` traits used by [`adapters`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod calibration;
pub mod config;
pub mod endstops;
pub mod error;
pub mod kinematics;
pub mod probe;
