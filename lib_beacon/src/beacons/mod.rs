//! # Beacons Module
//!
//! Everything that is specific to talking with an individual beacon:
//!
//! - **`model`**: the canonical query, credentials and the normalized result
//!   shapes returned to callers.
//! - **`descriptor`**: the per-beacon configuration shared by all versions and
//!   the canonical field names.
//! - **`adapter`**: the `ProtocolAdapter` trait, the version table and the
//!   query-string and failure policies shared by every version.
//! - **`v02`** / **`v03`**: one adapter per supported protocol version.

/// The per-protocol-version adapter trait and its version table.
pub mod adapter;
/// Static per-beacon configuration and canonical field names.
pub mod descriptor;
/// Canonical query, credentials and normalized result shapes.
pub mod model;
/// Beacon API 0.2 adapter.
pub mod v02;
/// Beacon API 0.3 adapter.
pub mod v03;

pub use adapter::{adapter_for, ProtocolAdapter, ProtocolVersion};
pub use descriptor::BeaconDescriptor;
pub use model::{AggregateResponse, Credentials, GenericQuery, NormalizedResult, ResultError};
