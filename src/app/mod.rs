//! Application core: probing and calibration logic, zero I/O.
//!
//! This module holds the command surface of the probing core: the
//! [`ProbeService`](service::ProbeService) that turns parsed G-/M-codes into
//! measurements and calibration runs, and the status lines it reports.
//! All interaction with the machine happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real hardware.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
