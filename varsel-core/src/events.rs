//! Wire types for consumed events and produced alarm records.

use serde::{Deserialize, Serialize};

/// Decoded inbound event for the address-matching worker.
///
/// One instance per consumed message; fields beyond these are ignored by the
/// address worker (the rule worker decodes the full JSON object instead).
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub logsource: String,
    pub srcip: String,
    pub dstip: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
}

impl InboundEvent {
    /// Decodes an event from raw message bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Outbound alarm record, serialized and handed to the producer on match.
///
/// Field names on the wire are fixed by the downstream alarm consumers and
/// must not change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlarmRecord {
    pub logsource: String,
    pub class: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub orgid: String,
    pub message: String,
    pub summary: String,
    #[serde(rename = "desc")]
    pub description: String,
    pub srcip: String,
    pub dstip: String,
}

impl AlarmRecord {
    /// Serializes the alarm to its wire representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
