//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the mock machine or the simulated delta.  All tests run on the
//! host with no real hardware required.

mod calibration_tests;
mod probe_engine_tests;
mod service_tests;
