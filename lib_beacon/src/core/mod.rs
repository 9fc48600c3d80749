//! # Core Engine Module
//!
//! The query path of the engine: the registry of configured beacons and the
//! dispatcher that fans a query out to them.
//!
//! ## Core Components:
//!
//! - **`registry`**: Loads beacon configurations, selects the adapter for
//!   each protocol version and keeps the resulting set read-only for the life
//!   of the process.
//!
//! - **`dispatcher`**: Queries every registered beacon concurrently under one
//!   deadline, in batch mode (aggregate response) or stream mode (one result
//!   at a time into a caller-owned sink).

#![forbid(unsafe_code)]

/// The set of configured beacons, each paired with its protocol adapter.
pub mod registry;
/// Deadline-bounded fan-out of one query to every registered beacon.
pub mod dispatcher;

// --- Public API Re-exports ---
pub use registry::{friendly_query, BeaconRegistry, RegisteredBeacon};
pub use dispatcher::{DispatchOutcome, DispatchState, QueryDispatcher};
