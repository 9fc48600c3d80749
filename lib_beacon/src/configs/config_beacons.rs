//! # Beacon Configuration
//!
//! One JSON record per beacon, either one record per file in a configuration
//! directory or many records in a `{"beacons": [...]}` bundle. Records are
//! overlaid on top of the protocol defaults written by the adapter, so a
//! record only needs to name what differs from the standard layout.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::beacons::BeaconDescriptor;

/// Errors raised while building the beacon registry. All of them are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration {origin}: {source}")]
    Malformed {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no protocol version in configuration {origin}")]
    MissingVersion { origin: String },

    #[error("bad version {version:?} in configuration {origin}; specify one of {known:?}")]
    UnknownVersion {
        origin: String,
        version: String,
        known: Vec<&'static str>,
    },

    #[error("configuration {origin} is missing required field {field:?}")]
    MissingField { origin: String, field: &'static str },

    #[error("beacon {name:?} has an invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        name: String,
        endpoint: String,
        reason: String,
    },

    #[error("beacon name {name:?} is configured more than once")]
    DuplicateName { name: String },
}

/// # Beacon Record
///
/// The raw configuration of one beacon. PascalCase keys are accepted as
/// aliases of the camelCase ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconRecord {
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "Version")]
    pub version: Option<serde_json::Value>,
    #[serde(default, alias = "Endpoint")]
    pub endpoint: Option<String>,
    #[serde(default, alias = "datasets", alias = "Datasets", alias = "DatasetIds")]
    pub dataset_ids: Option<Vec<String>>,
    #[serde(default, alias = "QueryMap")]
    pub query_map: BTreeMap<String, String>,
    #[serde(default, alias = "AssemblyMap")]
    pub assembly_map: BTreeMap<String, String>,
    #[serde(default, alias = "AdditionalFields")]
    pub additional_fields: BTreeMap<String, String>,
    #[serde(default, alias = "Icon")]
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Bundle {
    #[serde(default, alias = "Beacons")]
    beacons: Vec<serde_json::Value>,
}

impl BeaconRecord {
    /// Decodes one record from JSON text. `origin` names the source in errors.
    pub fn from_json(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Malformed {
            origin: origin.to_string(),
            source,
        })
    }

    /// Decodes one record from an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|source| ConfigError::Malformed {
            origin: origin.to_string(),
            source,
        })
    }

    /// The protocol version tag. Numbers such as `0.3` are read as their
    /// decimal spelling.
    pub fn version_tag(&self, origin: &str) -> Result<String, ConfigError> {
        match &self.version {
            Some(serde_json::Value::String(tag)) => Ok(tag.trim().to_string()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            _ => Err(ConfigError::MissingVersion {
                origin: origin.to_string(),
            }),
        }
    }

    /// Overlays this record on a descriptor already holding protocol defaults.
    ///
    /// Scalars and the dataset list replace the defaults; the three maps are
    /// merged key by key.
    pub fn apply_to(self, descriptor: &mut BeaconDescriptor, origin: &str) -> Result<(), ConfigError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                origin: origin.to_string(),
                field: "name",
            })?;
        let endpoint = self
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                origin: origin.to_string(),
                field: "endpoint",
            })?;
        validate_endpoint(&name, &endpoint)?;

        descriptor.name = name;
        descriptor.endpoint = endpoint;
        if let Some(datasets) = self.dataset_ids {
            descriptor.dataset_ids = datasets;
        }
        descriptor.field_names.extend(self.query_map);
        descriptor.assembly_aliases.extend(self.assembly_map);
        descriptor.extra_fields.extend(self.additional_fields);
        if self.icon.is_some() {
            descriptor.icon = self.icon;
        }
        Ok(())
    }
}

fn validate_endpoint(name: &str, endpoint: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        reason,
    };
    let parsed = url::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {:?}", other))),
    }
}

/// Reads every `*.json` file of `dir`, sorted by file name, and returns
/// `(path, contents)` pairs. Directory listing order is platform dependent,
/// so the sort is what makes registration order reproducible.
pub fn read_config_dir(dir: &Path) -> Result<Vec<(PathBuf, String)>, ConfigError> {
    let io_err = |path: &Path, source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    paths
        .into_iter()
        .map(|path| {
            let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            Ok((path, contents))
        })
        .collect()
}

/// Splits a `{"beacons": [...]}` bundle into its records, in array order.
pub fn read_bundle(raw: &str, origin: &str) -> Result<Vec<(String, BeaconRecord)>, ConfigError> {
    let bundle: Bundle = serde_json::from_str(raw).map_err(|source| ConfigError::Malformed {
        origin: origin.to_string(),
        source,
    })?;
    bundle
        .beacons
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let entry_origin = format!("{}#beacons[{}]", origin, i);
            let record = BeaconRecord::from_value(value, &entry_origin)?;
            Ok((entry_origin, record))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacons::{adapter_for, ProtocolVersion};
    use std::io::Write;

    fn v02_defaults() -> BeaconDescriptor {
        let mut d = BeaconDescriptor::blank(ProtocolVersion::V0_2);
        adapter_for("0.2").unwrap().initialize_defaults(&mut d);
        d
    }

    #[test]
    fn overrides_merge_key_by_key() {
        let record = BeaconRecord::from_json(
            r#"{
                "name": "ucsc",
                "version": "0.2",
                "endpoint": "https://beacon.example.org/query",
                "datasets": ["hg19"],
                "queryMap": {"start": "pos"},
                "assemblyMap": {"GRCh37": "hg19"},
                "additionalFields": {"format": "json"}
            }"#,
            "ucsc.json",
        )
        .unwrap();

        let mut d = v02_defaults();
        record.apply_to(&mut d, "ucsc.json").unwrap();

        assert_eq!(d.name, "ucsc");
        assert_eq!(d.dataset_ids, vec!["hg19".to_string()]);
        assert_eq!(d.field_name("start"), "pos");
        assert_eq!(d.field_name("alternateBases"), "allele");
        assert_eq!(d.assembly_alias("GRCh37"), "hg19");
        assert_eq!(d.assembly_alias("GRCh38"), "GRCh38");
        assert_eq!(d.extra_fields.get("format").map(String::as_str), Some("json"));
        assert_eq!(d.missing_required_key(), None);
    }

    #[test]
    fn pascal_case_keys_are_accepted() {
        let record = BeaconRecord::from_json(
            r#"{"Name": "old", "Version": "0.3", "Endpoint": "http://old.test/", "DatasetIds": ["a"]}"#,
            "old.json",
        )
        .unwrap();
        assert_eq!(record.version_tag("old.json").unwrap(), "0.3");
        assert_eq!(record.dataset_ids, Some(vec!["a".to_string()]));
    }

    #[test]
    fn numeric_version_reads_as_decimal() {
        let record = BeaconRecord::from_json(r#"{"version": 0.3}"#, "n.json").unwrap();
        assert_eq!(record.version_tag("n.json").unwrap(), "0.3");
    }

    #[test]
    fn missing_version_is_reported() {
        let record = BeaconRecord::from_json(r#"{"name": "x"}"#, "x.json").unwrap();
        assert!(matches!(record.version_tag("x.json"), Err(ConfigError::MissingVersion { .. })));
    }

    #[test]
    fn missing_name_and_bad_endpoint_are_rejected() {
        let no_name = BeaconRecord::from_json(r#"{"endpoint": "http://a.test/"}"#, "a.json").unwrap();
        assert!(matches!(
            no_name.apply_to(&mut v02_defaults(), "a.json"),
            Err(ConfigError::MissingField { field: "name", .. })
        ));

        let relative = BeaconRecord::from_json(r#"{"name": "b", "endpoint": "/query"}"#, "b.json").unwrap();
        assert!(matches!(
            relative.apply_to(&mut v02_defaults(), "b.json"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));

        let ftp = BeaconRecord::from_json(r#"{"name": "c", "endpoint": "ftp://c.test/"}"#, "c.json").unwrap();
        assert!(matches!(
            ftp.apply_to(&mut v02_defaults(), "c.json"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            BeaconRecord::from_json("{broken", "z.json"),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn directory_is_read_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["20-b.json", "10-a.json", "30-c.json", "notes.txt"] {
            let mut f = fs::File::create(dir.path().join(name)).unwrap();
            write!(f, "{{\"name\": \"{}\"}}", name).unwrap();
        }

        let files = read_config_dir(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["10-a.json", "20-b.json", "30-c.json"]);
    }

    #[test]
    fn unreadable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(read_config_dir(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn bundle_entries_keep_array_order() {
        let entries = read_bundle(
            r#"{"beacons": [{"name": "one", "version": "0.2"}, {"name": "two", "version": "0.3"}]}"#,
            "bob.conf",
        )
        .unwrap();
        let names: Vec<_> = entries.iter().map(|(_, r)| r.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(entries[1].0, "bob.conf#beacons[1]");
    }
}
