//! # Response Model
//!
//! The shapes that flow out of the engine: the canonical `GenericQuery` going in,
//! one `NormalizedResult` per beacon coming back, and the `AggregateResponse`
//! that collects them for a single dispatch.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::descriptor::is_query_field;

/// Message used when the beacon could not be contacted at all.
pub const MSG_UNREACHABLE: &str = "could not reach beacon";
/// Message used when the beacon answered with a non-2xx status.
pub const MSG_BEACON_ERROR: &str = "beacon error";
/// Message used when a 2xx body could not be decoded.
pub const MSG_MALFORMED: &str = "malformed reply from beacon";

/// # Generic Query
///
/// A version-independent variant query: canonical field name to one value.
/// Only the fields in `descriptor::QUERY_FIELDS` are kept; anything else a
/// client sends never reaches a beacon. Backed by a `BTreeMap`, so iteration
/// is always sorted by canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GenericQuery {
    fields: BTreeMap<String, String>,
}

impl GenericQuery {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a query from `(field, value)` pairs, such as decoded URL query
    /// parameters. The first non-empty value seen for a field wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut query = Self::new();
        for (field, value) in pairs {
            let (field, value) = (field.into(), value.into());
            if value.is_empty() {
                continue;
            }
            if !is_query_field(&field) {
                log::debug!("Ignoring non-canonical query field {:?}", field);
                continue;
            }
            query.fields.entry(field).or_insert(value);
        }
        query
    }

    /// Builds a query from a multi-valued mapping. Only the first value of each
    /// field is kept.
    pub fn from_multi(raw: HashMap<String, Vec<String>>) -> Self {
        Self::from_pairs(
            raw.into_iter()
                .filter_map(|(field, values)| values.into_iter().find(|v| !v.is_empty()).map(|v| (field, v))),
        )
    }

    /// Sets a field, replacing any previous value. Empty values remove the
    /// field; non-canonical fields are ignored.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        let field = field.into();
        let value = value.into();
        if !is_query_field(&field) {
            return self;
        }
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
        self
    }

    /// Returns the value of a canonical field, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Iterates `(field, value)` pairs in canonical-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields carried.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` when no field is set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One query field as it arrives over the wire: either a single string or a
/// list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValues {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for GenericQuery {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = HashMap::<String, RawValues>::deserialize(deserializer)?;
        let multi = raw
            .into_iter()
            .map(|(field, values)| match values {
                RawValues::One(v) => (field, vec![v]),
                RawValues::Many(vs) => (field, vs),
            })
            .collect();
        Ok(Self::from_multi(multi))
    }
}

/// # Credentials
///
/// Opaque bearer strings handed over by the auth collaborator. They are
/// forwarded verbatim and never inspected.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth2 access token, sent as `Authorization: Bearer <token>`.
    pub access_token: String,
    /// OpenID Connect identity token, sent in the identity-token header.
    pub id_token: String,
}

impl Credentials {
    /// Wraps the two tokens.
    pub fn new(access_token: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: id_token.into(),
        }
    }
}

// Tokens must never end up in log lines.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("id_token", &"<redacted>")
            .finish()
    }
}

/// Error half of a `NormalizedResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    /// Numeric code: an HTTP status, 400 for local failures, or the beacon's own code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

/// # Normalized Result
///
/// The answer of one beacon to one query. Exactly one side is populated:
/// either the per-dataset existence mapping, or an error. The constructors
/// are the only way to build one, which keeps the two sides exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedResult {
    name: String,
    status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    responses: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ResultError>,
}

impl NormalizedResult {
    /// A successful answer carrying `dataset id -> "true"/"false"` entries.
    pub fn success(name: impl Into<String>, status: i32, responses: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            status,
            icon: None,
            responses,
            error: None,
        }
    }

    /// A failed answer. The status mirrors the error code.
    pub fn failure(name: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: code,
            icon: None,
            responses: BTreeMap::new(),
            error: Some(ResultError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Attaches the beacon's display icon.
    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    /// Name of the beacon that produced this result.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Status code (HTTP status on success, error code on failure).
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Display icon of the beacon, when configured.
    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    /// Dataset existence flags. Empty for failures.
    pub fn responses(&self) -> &BTreeMap<String, String> {
        &self.responses
    }

    /// The error, for failures.
    pub fn error(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }

    /// `true` when the beacon answered without error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// # Aggregate Response
///
/// Results of one dispatch in arrival order. At most one entry per beacon.
/// Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateResponse {
    results: Vec<NormalizedResult>,
}

impl AggregateResponse {
    /// Creates an empty aggregate with room for `capacity` results.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
        }
    }

    /// Appends a result in arrival order.
    pub fn push(&mut self, result: NormalizedResult) {
        self.results.push(result);
    }

    /// Number of results collected.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// `true` when nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Borrowed view of the results.
    pub fn results(&self) -> &[NormalizedResult] {
        &self.results
    }

    /// Consumes the aggregate, yielding the results.
    pub fn into_results(self) -> Vec<NormalizedResult> {
        self.results
    }

    /// Returns `true` if a result from `name` was collected.
    pub fn contains(&self, name: &str) -> bool {
        self.results.iter().any(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_value_wins_and_empty_values_are_dropped() {
        let mut raw = HashMap::new();
        raw.insert("chromosome".to_string(), vec!["1".to_string(), "2".to_string()]);
        raw.insert("start".to_string(), vec![]);
        raw.insert("referenceBases".to_string(), vec!["".to_string(), "A".to_string()]);

        let query = GenericQuery::from_multi(raw);
        assert_eq!(query.get("chromosome"), Some("1"));
        assert_eq!(query.get("start"), None);
        assert_eq!(query.get("referenceBases"), Some("A"));
        assert_eq!(query.len(), 2);
    }

    #[test]
    fn unknown_fields_are_never_kept() {
        let query = GenericQuery::from_pairs([
            ("chromosome", "1"),
            ("callback", "evil"),
            ("token", "secret"),
            ("datasetIds", "d9"),
        ]);
        assert_eq!(query.iter().collect::<Vec<_>>(), vec![("chromosome", "1")]);

        let decoded: GenericQuery = serde_json::from_value(json!({"start": "5", "foo": ["bar"]})).unwrap();
        assert_eq!(decoded.iter().collect::<Vec<_>>(), vec![("start", "5")]);

        assert!(GenericQuery::new().with("foo", "bar").is_empty());
    }

    #[test]
    fn query_decodes_lists_and_single_strings() {
        let query: GenericQuery =
            serde_json::from_value(json!({"chromosome": ["X", "Y"], "start": "1000"})).unwrap();
        assert_eq!(query.get("chromosome"), Some("X"));
        assert_eq!(query.get("start"), Some("1000"));
    }

    #[test]
    fn success_serializes_without_error_side() {
        let mut responses = BTreeMap::new();
        responses.insert("d1".to_string(), "true".to_string());
        let value = serde_json::to_value(NormalizedResult::success("b", 200, responses)).unwrap();
        assert_eq!(value, json!({"name": "b", "status": 200, "responses": {"d1": "true"}}));
    }

    #[test]
    fn failure_serializes_without_responses_side() {
        let result = NormalizedResult::failure("b", 503, MSG_BEACON_ERROR).with_icon(Some("b.png".into()));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"name": "b", "status": 503, "icon": "b.png", "error": {"code": 503, "message": "beacon error"}})
        );
        assert!(!result.is_success());
    }

    #[test]
    fn credentials_are_redacted_in_debug_output() {
        let creds = Credentials::new("secret-access", "secret-id");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret"));
    }
}
