//! # Protocol Adapters
//!
//! Each beacon protocol version gets one `ProtocolAdapter`. The adapter knows
//! the version's default field names, how to turn a `GenericQuery` into that
//! version's query string, and how to read that version's JSON reply.
//!
//! The trait is synchronous so it stays object-safe; the network round trip
//! lives in `core::registry::RegisteredBeacon::query`, which drives the
//! adapter on either side of the request.
//!
//! Adapters are instantiated through `ADAPTERS`, an explicit table keyed by
//! the version tag found in configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::descriptor::{BeaconDescriptor, ASSEMBLY_ID, DATASET_IDS};
use super::model::{GenericQuery, NormalizedResult, MSG_BEACON_ERROR, MSG_MALFORMED, MSG_UNREACHABLE};
use super::{v02::V02Adapter, v03::V03Adapter};

/// Closed set of supported beacon protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Beacon API 0.2.
    #[serde(rename = "0.2")]
    V0_2,
    /// Beacon API 0.3.
    #[serde(rename = "0.3")]
    V0_3,
}

impl ProtocolVersion {
    /// The tag used in configuration files.
    pub fn tag(&self) -> &'static str {
        match self {
            ProtocolVersion::V0_2 => "0.2",
            ProtocolVersion::V0_3 => "0.3",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Constructor stored in the version table.
pub type AdapterConstructor = fn() -> Box<dyn ProtocolAdapter>;

fn new_v02() -> Box<dyn ProtocolAdapter> {
    Box::new(V02Adapter)
}

fn new_v03() -> Box<dyn ProtocolAdapter> {
    Box::new(V03Adapter)
}

/// Version tag -> adapter constructor.
pub const ADAPTERS: &[(&str, AdapterConstructor)] = &[("0.2", new_v02), ("0.3", new_v03)];

/// Looks up the adapter for a version tag. `None` for unknown tags.
pub fn adapter_for(tag: &str) -> Option<Box<dyn ProtocolAdapter>> {
    ADAPTERS
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, construct)| construct())
}

/// Tags accepted by `adapter_for`, for error messages.
pub fn known_versions() -> Vec<&'static str> {
    ADAPTERS.iter().map(|(tag, _)| *tag).collect()
}

/// Version-specific request building and reply parsing.
pub trait ProtocolAdapter: Send + Sync {
    /// The version this adapter speaks.
    fn version(&self) -> ProtocolVersion;

    /// Writes this version's default field names and assembly aliases into
    /// `descriptor`. Called before configuration overrides are applied.
    fn initialize_defaults(&self, descriptor: &mut BeaconDescriptor);

    /// Decodes a 2xx body. Transport and status failures never reach here.
    fn parse_body(&self, descriptor: &BeaconDescriptor, status: u16, body: &[u8]) -> NormalizedResult;

    /// Builds the query string sent to the beacon (without the leading `?`).
    fn build_request_uri(&self, descriptor: &BeaconDescriptor, query: &GenericQuery) -> String {
        build_query_string(descriptor, query)
    }

    /// Applies the shared failure policy, then hands 2xx bodies to
    /// `parse_body`.
    fn parse_response(
        &self,
        descriptor: &BeaconDescriptor,
        status: u16,
        body: &[u8],
        transport_error: Option<&str>,
    ) -> NormalizedResult {
        let result = if let Some(reason) = transport_error {
            log::debug!("[{}] transport failure: {}", descriptor.name, reason);
            NormalizedResult::failure(&descriptor.name, 400, MSG_UNREACHABLE)
        } else if !(200..300).contains(&status) {
            NormalizedResult::failure(&descriptor.name, i32::from(status), MSG_BEACON_ERROR)
        } else {
            self.parse_body(descriptor, status, body)
        };
        result.with_icon(descriptor.icon.clone())
    }
}

/// The malformed-reply result, shared by every version.
pub(crate) fn malformed(descriptor: &BeaconDescriptor, err: &serde_json::Error) -> NormalizedResult {
    log::debug!("[{}] undecodable reply: {}", descriptor.name, err);
    NormalizedResult::failure(&descriptor.name, 400, MSG_MALFORMED)
}

/// An `exists` flag as beacons actually send it: a JSON boolean, or a
/// string such as `"true"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ExistsFlag {
    Flag(bool),
    Text(String),
}

impl ExistsFlag {
    /// Renders the flag as the string stored in a success mapping.
    pub(crate) fn render(&self) -> String {
        match self {
            ExistsFlag::Flag(true) => "true".to_string(),
            ExistsFlag::Flag(false) => "false".to_string(),
            ExistsFlag::Text(text) => text.clone(),
        }
    }

    /// The flag as a boolean. Text is accepted only when it spells
    /// `true`/`false` (any case).
    pub(crate) fn as_bool(&self) -> Option<bool> {
        match self {
            ExistsFlag::Flag(flag) => Some(*flag),
            ExistsFlag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }
}

/// Builds `dataset pairs & query pairs & extra pairs`.
///
/// Query pairs iterate in canonical-name order and extra pairs in key order,
/// both inherited from the underlying `BTreeMap`s.
pub fn build_query_string(descriptor: &BeaconDescriptor, query: &GenericQuery) -> String {
    let mut pairs = url::form_urlencoded::Serializer::new(String::new());

    let dataset_field = descriptor.field_name(DATASET_IDS);
    for dataset in &descriptor.dataset_ids {
        pairs.append_pair(dataset_field, dataset);
    }

    for (canonical, value) in query.iter() {
        let value = if canonical == ASSEMBLY_ID {
            descriptor.assembly_alias(value)
        } else {
            value
        };
        pairs.append_pair(descriptor.field_name(canonical), value);
    }

    for (key, value) in &descriptor.extra_fields {
        pairs.append_pair(key, value);
    }

    pairs.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacons::descriptor::{CHROMOSOME, GRCH37, START};
    use std::collections::BTreeMap;

    fn descriptor(version: &str) -> BeaconDescriptor {
        let adapter = adapter_for(version).unwrap();
        let mut d = BeaconDescriptor::blank(adapter.version());
        adapter.initialize_defaults(&mut d);
        d.name = "demo".into();
        d.endpoint = "http://beacon.test/query".into();
        d
    }

    fn reparse(qs: &str) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(qs.as_bytes()).into_owned().collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn table_resolves_known_tags_only() {
        assert_eq!(adapter_for("0.2").unwrap().version(), ProtocolVersion::V0_2);
        assert_eq!(adapter_for("0.3").unwrap().version(), ProtocolVersion::V0_3);
        assert!(adapter_for("1.0").is_none());
        assert!(adapter_for("").is_none());
        assert_eq!(known_versions(), vec!["0.2", "0.3"]);
    }

    #[test]
    fn defaults_cover_required_keys() {
        for tag in known_versions() {
            assert_eq!(descriptor(tag).missing_required_key(), None, "version {}", tag);
        }
    }

    #[test]
    fn query_string_contains_exactly_datasets_fields_and_extras() {
        let mut d = descriptor("0.3");
        d.dataset_ids = vec!["ds1".into(), "ds2".into()];
        d.extra_fields = BTreeMap::from([("includeDatasetResponses".to_string(), "ALL".to_string())]);
        d.assembly_aliases.insert(GRCH37.into(), "hg19".into());

        let query = GenericQuery::new()
            .with(CHROMOSOME, "1")
            .with(START, "10000")
            .with(ASSEMBLY_ID, GRCH37);

        let qs = adapter_for("0.3").unwrap().build_request_uri(&d, &query);
        let mut expected = vec![
            ("datasetIds".to_string(), "ds1".to_string()),
            ("datasetIds".to_string(), "ds2".to_string()),
            ("chromosome".to_string(), "1".to_string()),
            ("start".to_string(), "10000".to_string()),
            ("assemblyId".to_string(), "hg19".to_string()),
            ("includeDatasetResponses".to_string(), "ALL".to_string()),
        ];
        expected.sort();
        assert_eq!(reparse(&qs), expected);
    }

    #[test]
    fn query_string_groups_are_ordered() {
        let mut d = descriptor("0.3");
        d.dataset_ids = vec!["z".into()];
        d.extra_fields = BTreeMap::from([("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())]);
        let query = GenericQuery::new().with(START, "5").with(CHROMOSOME, "2");

        let qs = build_query_string(&d, &query);
        assert_eq!(qs, "datasetIds=z&chromosome=2&start=5&a=1&b=2");
    }

    #[test]
    fn client_supplied_extras_are_not_forwarded() {
        let d = descriptor("0.2");
        let query = GenericQuery::from_pairs([("chromosome", "1"), ("callback", "evil"), ("token", "secret")]);
        assert_eq!(build_query_string(&d, &query), "chromosome=1");
    }

    #[test]
    fn v02_default_maps_translate_assembly_field() {
        let d = descriptor("0.2");
        let query = GenericQuery::new().with(ASSEMBLY_ID, GRCH37);
        assert_eq!(build_query_string(&d, &query), "reference=GRCh37");
    }

    #[test]
    fn unknown_assembly_passes_through() {
        let d = descriptor("0.2");
        let query = GenericQuery::new().with(ASSEMBLY_ID, "CHM13");
        assert_eq!(build_query_string(&d, &query), "reference=CHM13");
    }

    #[test]
    fn values_are_encoded_and_survive_reparse() {
        let mut d = descriptor("0.2");
        d.extra_fields.insert("note".into(), "a b&c".into());
        let qs = build_query_string(&d, &GenericQuery::new());
        assert_eq!(reparse(&qs), vec![("note".to_string(), "a b&c".to_string())]);
    }

    #[test]
    fn non_success_status_maps_to_beacon_error() {
        for tag in known_versions() {
            let d = descriptor(tag);
            let adapter = adapter_for(tag).unwrap();
            for status in [100u16, 199, 300, 302, 404, 500, 503] {
                let r = adapter.parse_response(&d, status, b"{}", None);
                let err = r.error().unwrap();
                assert_eq!((err.code, err.message.as_str()), (i32::from(status), MSG_BEACON_ERROR));
                assert_eq!(r.status(), i32::from(status));
                assert!(r.responses().is_empty());
            }
        }
    }

    #[test]
    fn transport_failure_maps_to_unreachable() {
        for tag in known_versions() {
            let d = descriptor(tag);
            let adapter = adapter_for(tag).unwrap();
            let r = adapter.parse_response(&d, 0, b"", Some("connection refused"));
            let err = r.error().unwrap();
            assert_eq!((err.code, err.message.as_str()), (400, MSG_UNREACHABLE));
        }
    }

    #[test]
    fn malformed_json_is_reported_for_every_version() {
        for tag in known_versions() {
            let d = descriptor(tag);
            let adapter = adapter_for(tag).unwrap();
            let r = adapter.parse_response(&d, 200, b"{not json", None);
            let err = r.error().unwrap();
            assert_eq!((err.code, err.message.as_str()), (400, MSG_MALFORMED));
        }
    }

    #[test]
    fn icon_is_carried_on_every_result() {
        let mut d = descriptor("0.2");
        d.icon = Some("demo.png".into());
        let adapter = adapter_for("0.2").unwrap();
        let r = adapter.parse_response(&d, 500, b"", None);
        assert_eq!(r.icon(), Some("demo.png"));
    }
}
