//! # HTTP Retrieval Utilities
//!
//! The asynchronous client every dispatch shares to reach beacons. It wraps a
//! single `reqwest::Client` (cloning it is cheap and shares the connection
//! pool) and returns raw replies; interpreting them is the adapters' job.
//!
//! No retries: a failing beacon yields an error result for that dispatch.

use std::time::Duration;

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};

use crate::beacons::Credentials;

/// Header carrying the OpenID Connect identity token to beacons.
pub const ID_TOKEN_HEADER: &str = "X-ID-Token";

/// A beacon's reply before any interpretation.
#[derive(Debug, Clone)]
pub struct RawReply {
    /// The numeric HTTP status code.
    pub status: u16,
    /// The full response body.
    pub body: Vec<u8>,
}

/// Shared outbound HTTP client for beacon queries.
#[derive(Debug, Clone)]
pub struct BeaconClient {
    inner: reqwest::Client,
}

impl BeaconClient {
    /// Creates a client. `request_timeout` caps a single request; the dispatch
    /// deadline applies independently of it.
    ///
    /// # Errors
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(request_timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(concat!("bob/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            inner: builder.build()?,
        })
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    /// Performs `GET url` with `Accept: application/json` and, when given,
    /// the caller's bearer and identity tokens, forwarded verbatim.
    ///
    /// # Errors
    /// Returns the transport error if the request could not be sent or the
    /// body could not be read. Non-2xx statuses are not errors here.
    pub async fn get(&self, url: &str, credentials: Option<&Credentials>) -> Result<RawReply, reqwest::Error> {
        let mut req = self
            .inner
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(creds) = credentials {
            req = req
                .header(AUTHORIZATION, format!("Bearer {}", creds.access_token))
                .header(ID_TOKEN_HEADER, creds.id_token.as_str());
        }

        let response = req.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(RawReply { status, body })
    }
}
