//! Wire types for the Feishu bitable and drive APIs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub tenant_access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expire: u64,
}

#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableField {
    pub field_id: String,
    pub field_name: String,
    /// Numeric field type tag as reported by the bitable API.
    #[serde(rename = "type")]
    pub field_type: i64,
}

#[derive(Debug, Deserialize)]
pub struct FieldListData {
    #[serde(default)]
    pub items: Vec<TableField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub record_id: String,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct RecordListData {
    #[serde(default)]
    pub items: Vec<RawRecord>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub page_token: Option<String>,
}

/// One page of records as returned to callers.
#[derive(Debug)]
pub struct RecordsPage {
    pub records: Vec<RawRecord>,
    pub has_more: bool,
    pub page_token: Option<String>,
}

/// Options for `get_table_records` / `get_all_records`.
#[derive(Debug, Clone, Default)]
pub struct ListRecordsOptions {
    /// Capped at 500 (upstream maximum); defaults to 500.
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
    pub filter: Option<String>,
    pub sort: Option<Vec<String>>,
    pub field_names: Option<Vec<String>>,
}

impl ListRecordsOptions {
    pub fn effective_page_size(&self) -> usize {
        self.page_size.unwrap_or(500).min(500).max(1)
    }
}

/// An upstream attachment reference extracted from a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub file_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Tagged decode of the loose field bag the upstream sends. Records carry a
/// key -> value map of mixed JSON shapes; this variant is what the field
/// mapper pattern-matches over.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(chrono::DateTime<chrono::Utc>),
    Select(String),
    MultiSelect(Vec<String>),
    Attachment(Vec<AttachmentRef>),
    Null,
}

impl FieldValue {
    /// Structural classification of a raw JSON field value. Declared-type
    /// refinement (text -> select, number -> date) happens in the mapper.
    pub fn classify(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Text(b.to_string()),
            Value::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
            Value::String(s) => {
                if s.trim().is_empty() {
                    FieldValue::Null
                } else {
                    FieldValue::Text(s.clone())
                }
            }
            Value::Array(items) => Self::classify_array(items),
            Value::Object(map) => {
                // Url fields arrive as {link, text}; rich text cells as {text}.
                if let Some(link) = map.get("link").and_then(Value::as_str) {
                    FieldValue::Text(link.to_string())
                } else if let Some(text) = map.get("text").and_then(Value::as_str) {
                    FieldValue::Text(text.to_string())
                } else {
                    FieldValue::Null
                }
            }
        }
    }

    fn classify_array(items: &[Value]) -> FieldValue {
        if items.is_empty() {
            return FieldValue::Null;
        }

        // Attachment cells: [{file_token, name, url, ...}]
        if items.iter().all(|v| v.get("file_token").is_some()) {
            let refs = items
                .iter()
                .filter_map(|v| {
                    Some(AttachmentRef {
                        file_token: v.get("file_token")?.as_str()?.to_string(),
                        name: v.get("name").and_then(Value::as_str).map(str::to_string),
                        url: v.get("url").and_then(Value::as_str).map(str::to_string),
                    })
                })
                .collect::<Vec<_>>();
            return FieldValue::Attachment(refs);
        }

        // Rich-text cells: [{text, type}] segments, concatenated in order.
        if items.iter().all(|v| v.get("text").is_some()) {
            let joined = items
                .iter()
                .filter_map(|v| v.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("");
            return if joined.trim().is_empty() {
                FieldValue::Null
            } else {
                FieldValue::Text(joined)
            };
        }

        // Multi-select cells: [string]
        let labels = items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !labels.is_empty() {
            return FieldValue::MultiSelect(labels);
        }

        FieldValue::Null
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

/// Outcome of a batched media download: per-token bytes plus per-token
/// failures. A failed token never aborts its peers.
#[derive(Debug, Default)]
pub struct BatchDownloadResult {
    pub downloaded: HashMap<String, Vec<u8>>,
    pub failed: Vec<(String, String)>,
}
