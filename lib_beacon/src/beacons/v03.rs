//! Beacon API 0.3.
//!
//! Replies carry one entry per dataset in `datasetAlleleResponses`, or an
//! `error` object with its own numeric code.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::adapter::{malformed, ExistsFlag, ProtocolAdapter, ProtocolVersion};
use super::descriptor::{
    fill_defaults, BeaconDescriptor, ALTERNATE_BASES, ASSEMBLY_ID, CHROMOSOME, DATASET_IDS, GRCH37, GRCH38,
    REFERENCE_BASES, START,
};
use super::model::{NormalizedResult, MSG_MALFORMED};

const FIELD_DEFAULTS: [(&str, &str); 6] = [
    (CHROMOSOME, "chromosome"),
    (START, "start"),
    (ALTERNATE_BASES, "alternateBases"),
    (REFERENCE_BASES, "referenceBases"),
    (DATASET_IDS, "datasetIds"),
    (ASSEMBLY_ID, "assemblyId"),
];

const ASSEMBLY_DEFAULTS: [(&str, &str); 2] = [(GRCH37, "GRCh37"), (GRCH38, "GRCh38")];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reply {
    #[serde(default)]
    error: Option<ReplyError>,
    #[serde(default)]
    dataset_allele_responses: Option<Vec<DatasetAnswer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyError {
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

impl ReplyError {
    /// `errorCode` may be sent as a number or a numeric string; anything else
    /// counts as 0.
    fn code(&self) -> i32 {
        match &self.error_code {
            Some(serde_json::Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()).unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetAnswer {
    #[serde(default, alias = "id")]
    dataset_id: Option<String>,
    #[serde(default)]
    exists: Option<ExistsFlag>,
}

/// Adapter for Beacon API 0.3.
#[derive(Debug, Clone, Copy, Default)]
pub struct V03Adapter;

impl ProtocolAdapter for V03Adapter {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V0_3
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

        if let Some(error) = reply.error {
            return NormalizedResult::failure(&descriptor.name, error.code(), error.message.unwrap_or_default());
        }

        let mut responses = BTreeMap::new();
        for answer in reply.dataset_allele_responses.unwrap_or_default() {
            let Some(id) = answer.dataset_id else {
                log::warn!("[{}] dataset response without an id skipped", descriptor.name);
                continue;
            };
            // A null flag means the dataset could not answer; report it as absent.
            let exists = match answer.exists.as_ref().map(ExistsFlag::as_bool) {
                None => false,
                Some(Some(flag)) => flag,
                Some(None) => {
                    log::debug!("[{}] dataset {} sent a non-boolean exists flag", descriptor.name, id);
                    return NormalizedResult::failure(&descriptor.name, 400, MSG_MALFORMED);
                }
            };
            responses.insert(id, exists.to_string());
        }
        NormalizedResult::success(&descriptor.name, i32::from(status), responses)
    }
}
