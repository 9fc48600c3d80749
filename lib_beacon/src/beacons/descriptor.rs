//! # Beacon Descriptor
//!
//! Static configuration of one beacon, shared by every protocol version. The
//! descriptor is filled in two passes: the adapter writes its protocol
//! defaults, then the configuration record is overlaid on top.

use std::collections::BTreeMap;

use super::adapter::ProtocolVersion;

/// Canonical field: chromosome name.
pub const CHROMOSOME: &str = "chromosome";
/// Canonical field: 0- or 1-based start position, depending on the beacon.
pub const START: &str = "start";
/// Canonical field: alternate bases.
pub const ALTERNATE_BASES: &str = "alternateBases";
/// Canonical field: reference bases.
pub const REFERENCE_BASES: &str = "referenceBases";
/// Canonical field: dataset identifiers.
pub const DATASET_IDS: &str = "datasetIds";
/// Canonical field: reference assembly.
pub const ASSEMBLY_ID: &str = "assemblyId";

/// Canonical assembly name for GRCh37.
pub const GRCH37: &str = "GRCh37";
/// Canonical assembly name for GRCh38.
pub const GRCH38: &str = "GRCh38";

/// Canonical fields every field map must cover.
pub const REQUIRED_FIELDS: [&str; 6] = [
    CHROMOSOME,
    START,
    ALTERNATE_BASES,
    REFERENCE_BASES,
    DATASET_IDS,
    ASSEMBLY_ID,
];

/// Canonical fields a caller may put in a query. Datasets always come from
/// the beacon's own configuration.
pub const QUERY_FIELDS: [&str; 5] = [CHROMOSOME, START, ALTERNATE_BASES, REFERENCE_BASES, ASSEMBLY_ID];

/// `true` for the fields listed in `QUERY_FIELDS`.
pub fn is_query_field(field: &str) -> bool {
    QUERY_FIELDS.contains(&field)
}

/// Canonical assemblies every alias map must cover.
pub const REQUIRED_ASSEMBLIES: [&str; 2] = [GRCH37, GRCH38];

/// # Beacon Descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconDescriptor {
    /// Unique name within a registry.
    pub name: String,
    /// Wire protocol spoken by the beacon.
    pub version: ProtocolVersion,
    /// Absolute URL the query string is appended to.
    pub endpoint: String,
    /// Datasets to ask about, in configuration order.
    pub dataset_ids: Vec<String>,
    /// Canonical field name -> beacon field name.
    pub field_names: BTreeMap<String, String>,
    /// Canonical assembly name -> beacon spelling.
    pub assembly_aliases: BTreeMap<String, String>,
    /// Static fields appended to every request.
    pub extra_fields: BTreeMap<String, String>,
    /// Display icon, echoed into every result.
    pub icon: Option<String>,
}

impl BeaconDescriptor {
    /// An unnamed descriptor for `version` with empty maps. Adapters fill the
    /// maps in `ProtocolAdapter::initialize_defaults`.
    pub fn blank(version: ProtocolVersion) -> Self {
        Self {
            name: String::new(),
            version,
            endpoint: String::new(),
            dataset_ids: Vec::new(),
            field_names: BTreeMap::new(),
            assembly_aliases: BTreeMap::new(),
            extra_fields: BTreeMap::new(),
            icon: None,
        }
    }

    /// The beacon-specific name for a canonical field. Fields without a
    /// mapping are sent under their canonical name.
    pub fn field_name<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.field_names.get(canonical).map(String::as_str).unwrap_or(canonical)
    }

    /// The beacon-specific spelling of an assembly. Unknown assemblies pass
    /// through unchanged.
    pub fn assembly_alias<'a>(&'a self, assembly: &'a str) -> &'a str {
        self.assembly_aliases.get(assembly).map(String::as_str).unwrap_or(assembly)
    }

    /// Returns the first required canonical key missing from either map.
    pub fn missing_required_key(&self) -> Option<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .find(|k| !self.field_names.contains_key(**k))
            .or_else(|| REQUIRED_ASSEMBLIES.iter().find(|k| !self.assembly_aliases.contains_key(**k)))
            .copied()
    }
}

/// Fills `map` from a static table of defaults.
pub(crate) fn fill_defaults(map: &mut BTreeMap<String, String>, defaults: &[(&str, &str)]) {
    for (canonical, mapped) in defaults {
        map.insert((*canonical).to_string(), (*mapped).to_string());
    }
}
