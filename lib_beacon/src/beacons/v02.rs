//! Beacon API 0.2.
//!
//! Replies look like `{"response": {"exists": "true", "error": ""}}` and carry
//! a single flag for the beacon as a whole, so the success mapping is keyed by
//! the beacon's own name.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::adapter::{malformed, ExistsFlag, ProtocolAdapter, ProtocolVersion};
use super::descriptor::{
    fill_defaults, BeaconDescriptor, ALTERNATE_BASES, ASSEMBLY_ID, CHROMOSOME, DATASET_IDS, GRCH37, GRCH38,
    REFERENCE_BASES, START,
};
use super::model::NormalizedResult;

const FIELD_DEFAULTS: [(&str, &str); 6] = [
    (CHROMOSOME, "chromosome"),
    (START, "position"),
    (ALTERNATE_BASES, "allele"),
    (REFERENCE_BASES, "referenceBases"),
    (DATASET_IDS, "dataset"),
    (ASSEMBLY_ID, "reference"),
];

const ASSEMBLY_DEFAULTS: [(&str, &str); 2] = [(GRCH37, "GRCh37"), (GRCH38, "GRCh38")];

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    response: Option<ReplyBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyBody {
    #[serde(default)]
    exists: Option<ExistsFlag>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ReplyBody {
    /// The beacon-declared error, if any. Strings are used as-is; structured
    /// errors contribute their `message` when they have one.
    fn declared_error(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(o) => Some(
                o.get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| serde_json::Value::Object(o.clone()).to_string()),
            ),
            other => Some(other.to_string()),
        }
    }
}

/// Adapter for Beacon API 0.2.
#[derive(Debug, Clone, Copy, Default)]
pub struct V02Adapter;

impl ProtocolAdapter for V02Adapter {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V0_2
    }

    fn initialize_defaults(&self, descriptor: &mut BeaconDescriptor) {
        fill_defaults(&mut descriptor.field_names, &FIELD_DEFAULTS);
        fill_defaults(&mut descriptor.assembly_aliases, &ASSEMBLY_DEFAULTS);
    }

    fn parse_body(&self, descriptor: &BeaconDescriptor, status: u16, body: &[u8]) -> NormalizedResult {
        let reply: Reply = match serde_json::from_slice(body) {
            Ok(reply) => reply,
            Err(e) => return malformed(descriptor, &e),
        };
        let body = reply.response.unwrap_or_default();

        if let Some(message) = body.declared_error() {
            return NormalizedResult::failure(&descriptor.name, 400, message);
        }

        let exists = body.exists.map(|flag| flag.render()).unwrap_or_default();
        let mut responses = BTreeMap::new();
        responses.insert(descriptor.name.clone(), exists);
        NormalizedResult::success(&descriptor.name, i32::from(status), responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon() -> BeaconDescriptor {
        let mut d = BeaconDescriptor::blank(ProtocolVersion::V0_2);
        V02Adapter.initialize_defaults(&mut d);
        d.name = "amplab".into();
        d
    }

    #[test]
    fn exists_string_is_keyed_by_beacon_name() {
        let r = V02Adapter.parse_response(&beacon(), 200, br#"{"response":{"exists":"true"}}"#, None);
        assert!(r.is_success());
        assert_eq!(r.status(), 200);
        assert_eq!(r.responses().len(), 1);
        assert_eq!(r.responses().get("amplab").map(String::as_str), Some("true"));
    }

    #[test]
    fn boolean_exists_is_rendered() {
        let r = V02Adapter.parse_response(&beacon(), 200, br#"{"response":{"exists":false,"error":""}}"#, None);
        assert_eq!(r.responses().get("amplab").map(String::as_str), Some("false"));
    }

    #[test]
    fn declared_error_becomes_400() {
        let r = V02Adapter.parse_response(
            &beacon(),
            200,
            br#"{"response":{"exists":"","error":"unsupported reference"}}"#,
            None,
        );
        let err = r.error().unwrap();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "unsupported reference");
        assert!(r.responses().is_empty());
    }

    #[test]
    fn structured_error_uses_its_message() {
        let r = V02Adapter.parse_response(
            &beacon(),
            200,
            br#"{"response":{"error":{"name":"x","message":"bad allele"}}}"#,
            None,
        );
        assert_eq!(r.error().unwrap().message, "bad allele");
    }

    #[test]
    fn missing_response_object_yields_empty_flag() {
        let r = V02Adapter.parse_response(&beacon(), 200, b"{}", None);
        assert!(r.is_success());
        assert_eq!(r.responses().get("amplab").map(String::as_str), Some(""));
    }

    #[test]
    fn defaults_match_the_version_layout() {
        let d = beacon();
        assert_eq!(d.field_name(START), "position");
        assert_eq!(d.field_name(ALTERNATE_BASES), "allele");
        assert_eq!(d.field_name(DATASET_IDS), "dataset");
        assert_eq!(d.field_name(ASSEMBLY_ID), "reference");
        assert_eq!(d.assembly_alias(GRCH38), "GRCh38");
    }
}
