use serde::{Deserialize, Serialize};

/// Reply of `GET /beacons`: what the query page shows before a search.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BeaconsInfo {
    pub count: usize,
    pub timeout_secs: u64,
    pub names: Vec<String>,
}

/// Sent over the WebSocket when the opening query cannot be decoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub r#type: String,
    pub error: Option<String>,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            error: Some(message.into()),
        }
    }
}
