//! # Configuration Modules
//!
//! Beacon configuration records and the errors raised while loading them.

/// Beacon configuration records, directory and bundle loading, `ConfigError`.
pub mod config_beacons;

pub use config_beacons::{BeaconRecord, ConfigError};
