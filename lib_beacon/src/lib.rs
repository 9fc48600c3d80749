//! # lib_beacon
//!
//! Aggregates genomic beacon queries: one generic variant query is translated
//! into each beacon's protocol dialect, sent to every configured beacon at
//! once, and the replies are normalized into one uniform result shape.
//!
//! Modules are gated by folder, the same way across the workspace:
//!
//! - `beacons` (always on): query/result model, descriptors and the versioned
//!   protocol adapters.
//! - `configs`: beacon configuration records and `ConfigError`.
//! - `retrieve`: the outbound HTTP client.
//! - `core` (`configs` + `retrieve`): registry and dispatcher.

#![forbid(unsafe_code)]

pub mod beacons;

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(all(feature = "configs", feature = "retrieve"))]
pub mod core;

pub use beacons::{
    adapter_for, AggregateResponse, BeaconDescriptor, Credentials, GenericQuery, NormalizedResult,
    ProtocolAdapter, ProtocolVersion, ResultError,
};

#[cfg(feature = "configs")]
pub use configs::{BeaconRecord, ConfigError};

#[cfg(feature = "retrieve")]
pub use retrieve::BeaconClient;

#[cfg(all(feature = "configs", feature = "retrieve"))]
pub use crate::core::{BeaconRegistry, DispatchOutcome, DispatchState, QueryDispatcher, RegisteredBeacon};
