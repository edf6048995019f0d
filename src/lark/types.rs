use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One Bitable row: an opaque id plus schema-free fields in server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub record_id: String,
    #[serde(default)]
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(record_id: impl Into<String>, fields: IndexMap<String, Value>) -> Self {
        Self {
            record_id: record_id.into(),
            fields,
        }
    }
}

/// Payload of one page of `GET .../records`.
#[derive(Debug, Deserialize)]
pub(crate) struct RecordPage {
    #[serde(default)]
    pub items: Option<Vec<Record>>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// Column definitions returned by `GET .../fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub items: Vec<FieldSchema>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(default)]
    pub field_id: String,
    #[serde(default)]
    pub field_name: String,
    #[serde(rename = "type", default)]
    pub field_type: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Value>,
}

/// Payload of `GET /wiki/v2/spaces/get_node`.
#[derive(Debug, Deserialize)]
pub(crate) struct WikiNodeResponse {
    pub node: Option<WikiNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WikiNode {
    pub obj_token: Option<String>,
}

/// Aggregate request statistics for one client.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub auth_refreshes: u64,
    pub auth_token_valid: bool,
    pub rate_limit_hits: u64,
    pub rate_limit_utilization: f64,
    pub uptime: f64,
}
