//! # Data Retrieval Module
//!
//! Outbound networking for the engine.
//!
//! - **`ky_http`**: `BeaconClient`, the shared `reqwest`-based client that
//!   performs one GET per beacon per dispatch and carries the caller's
//!   credentials through untouched.

/// Shared HTTP client used to query beacons.
pub mod ky_http;

pub use ky_http::{BeaconClient, RawReply, ID_TOKEN_HEADER};
