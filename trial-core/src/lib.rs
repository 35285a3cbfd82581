// Host-side trial lifecycle logic for serial-driven behavior rigs.
//
// This crate owns no I/O: the host binary supplies the serial transport, the
// on-disk log, and any terminal output through the traits exposed here.

pub mod controller;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod protocol;
pub mod scheduler;
pub mod summary;
pub mod trialspeak;
