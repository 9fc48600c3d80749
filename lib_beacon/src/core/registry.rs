//! # Beacon Registry
//!
//! The set of configured beacons, each paired with the adapter for its
//! protocol version. Built once at startup, then shared read-only (behind an
//! `Arc`) by every dispatch and every server handler.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::beacons::adapter::{adapter_for, known_versions};
use crate::beacons::descriptor::{ALTERNATE_BASES, CHROMOSOME, REFERENCE_BASES, START};
use crate::beacons::{BeaconDescriptor, Credentials, GenericQuery, NormalizedResult, ProtocolAdapter};
use crate::configs::config_beacons::{read_bundle, read_config_dir, BeaconRecord, ConfigError};
use crate::retrieve::BeaconClient;

/// A configured beacon: its descriptor and the adapter that speaks its protocol.
pub struct RegisteredBeacon {
    descriptor: BeaconDescriptor,
    adapter: Box<dyn ProtocolAdapter>,
}

impl std::fmt::Debug for RegisteredBeacon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBeacon")
            .field("descriptor", &self.descriptor)
            .field("version", &self.adapter.version())
            .finish()
    }
}

impl RegisteredBeacon {
    /// The beacon's static configuration.
    pub fn descriptor(&self) -> &BeaconDescriptor {
        &self.descriptor
    }

    /// The adapter for the beacon's protocol version.
    pub fn adapter(&self) -> &dyn ProtocolAdapter {
        self.adapter.as_ref()
    }

    /// The beacon's unique name.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Full request URL for `query`: endpoint, `?`, adapter-built query string.
    pub fn request_url(&self, query: &GenericQuery) -> String {
        format!(
            "{}?{}",
            self.descriptor.endpoint,
            self.adapter.build_request_uri(&self.descriptor, query)
        )
    }

    /// Queries the beacon once and normalizes whatever comes back. Never
    /// fails: transport and protocol problems become error results.
    pub async fn query(
        &self,
        client: &BeaconClient,
        query: &GenericQuery,
        credentials: Option<&Credentials>,
    ) -> NormalizedResult {
        let url = self.request_url(query);
        let result = match client.get(&url, credentials).await {
            Ok(reply) => self.adapter.parse_response(&self.descriptor, reply.status, &reply.body, None),
            Err(e) => {
                let reason = e.to_string();
                self.adapter.parse_response(&self.descriptor, 0, &[], Some(reason.as_str()))
            }
        };
        log::info!(
            "[{}][{}][{}] {}",
            self.descriptor.name,
            friendly_query(query),
            result.status(),
            url
        );
        result
    }
}

/// `chr:start ref>alt`, for log lines.
pub fn friendly_query(query: &GenericQuery) -> String {
    format!(
        "{}:{} {}>{}",
        query.get(CHROMOSOME).unwrap_or(""),
        query.get(START).unwrap_or(""),
        query.get(REFERENCE_BASES).unwrap_or(""),
        query.get(ALTERNATE_BASES).unwrap_or("")
    )
}

/// # Beacon Registry
///
/// Registration happens through `&mut self` before the registry is shared;
/// once wrapped in an `Arc` it can no longer change.
#[derive(Debug, Default)]
pub struct BeaconRegistry {
    beacons: Vec<Arc<RegisteredBeacon>>,
    names: HashSet<String>,
}

impl BeaconRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from every `*.json` file in `dir`, in file-name order.
    ///
    /// # Errors
    /// The first `ConfigError` encountered; callers treat it as fatal.
    pub fn from_config_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (path, raw) in read_config_dir(dir)? {
            registry.register_from_config(&raw, &path.display().to_string())?;
        }
        log::info!("Loaded {} beacon(s) from {}", registry.count(), dir.display());
        Ok(registry)
    }

    /// Builds a registry from a `{"beacons": [...]}` bundle, in array order.
    ///
    /// # Errors
    /// The first `ConfigError` encountered.
    pub fn from_bundle(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (entry_origin, record) in read_bundle(raw, origin)? {
            registry.register_record(record, &entry_origin)?;
        }
        Ok(registry)
    }

    /// Registers one beacon from its raw JSON configuration.
    ///
    /// The version tag selects the adapter through the version table, the
    /// adapter writes its defaults, and the record is overlaid on top.
    ///
    /// # Errors
    /// Malformed JSON, a missing or unknown version, missing name/endpoint,
    /// an invalid endpoint, or a name that is already registered.
    pub fn register_from_config(&mut self, raw: &str, origin: &str) -> Result<(), ConfigError> {
        let record = BeaconRecord::from_json(raw, origin)?;
        self.register_record(record, origin)
    }

    /// Registers an already-decoded record.
    ///
    /// # Errors
    /// See `register_from_config`.
    pub fn register_record(&mut self, record: BeaconRecord, origin: &str) -> Result<(), ConfigError> {
        let tag = record.version_tag(origin)?;
        let adapter = adapter_for(&tag).ok_or_else(|| ConfigError::UnknownVersion {
            origin: origin.to_string(),
            version: tag.clone(),
            known: known_versions(),
        })?;

        let mut descriptor = BeaconDescriptor::blank(adapter.version());
        adapter.initialize_defaults(&mut descriptor);
        record.apply_to(&mut descriptor, origin)?;
        if let Some(field) = descriptor.missing_required_key() {
            return Err(ConfigError::MissingField {
                origin: origin.to_string(),
                field,
            });
        }

        if !self.names.insert(descriptor.name.clone()) {
            return Err(ConfigError::DuplicateName { name: descriptor.name });
        }

        log::debug!(
            "Registered beacon '{}' (v{}) at {} from {}",
            descriptor.name,
            descriptor.version,
            descriptor.endpoint,
            origin
        );
        self.beacons.push(Arc::new(RegisteredBeacon { descriptor, adapter }));
        Ok(())
    }

    /// Number of registered beacons.
    pub fn count(&self) -> usize {
        self.beacons.len()
    }

    /// `true` when no beacon is registered.
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Registered beacons in registration order.
    pub fn list(&self) -> &[Arc<RegisteredBeacon>] {
        &self.beacons
    }

    /// Registered beacon names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.beacons.iter().map(|b| b.descriptor.name.clone()).collect()
    }

    /// Looks a beacon up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<RegisteredBeacon>> {
        self.beacons.iter().find(|b| b.descriptor.name == name)
    }

    /// Registers a descriptor with an arbitrary adapter, skipping config checks.
    #[cfg(test)]
    pub(crate) fn register_raw(&mut self, descriptor: BeaconDescriptor, adapter: Box<dyn ProtocolAdapter>) {
        self.names.insert(descriptor.name.clone());
        self.beacons.push(Arc::new(RegisteredBeacon { descriptor, adapter }));
    }
}
