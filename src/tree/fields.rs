use serde_json::Value;

/// A Bitable cell decoded once at ingestion.
///
/// Lark returns the same logical column in several shapes depending on the
/// column type: plain strings, rich-text segment lists
/// (`[{"type": "text", "text": "..."}]`), link columns
/// (`[{"record_ids": ["rec..."], ...}]`) and scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Absent,
    Scalar(String),
    Text(Vec<String>),
    Reference(Vec<String>),
    Other(Value),
}

impl FieldValue {
    pub fn decode(value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return Self::Absent;
        };

        match value {
            Value::Null => Self::Absent,
            Value::String(s) if s.trim().is_empty() => Self::Absent,
            Value::String(s) => Self::Scalar(s.clone()),
            Value::Number(n) => Self::Scalar(n.to_string()),
            Value::Bool(b) => Self::Scalar(b.to_string()),
            Value::Array(items) if items.is_empty() => Self::Absent,
            Value::Array(items) => decode_list(items).unwrap_or_else(|| Self::Other(value.clone())),
            Value::Object(map) => match map.get("text").and_then(Value::as_str) {
                Some(text) if !text.trim().is_empty() => Self::Text(vec![text.to_string()]),
                _ => Self::Other(value.clone()),
            },
        }
    }

    /// The whole value as one string: scalars as-is, text segments joined.
    pub fn as_text(&self) -> Option<String> {
        let text = match self {
            Self::Scalar(s) => s.clone(),
            Self::Text(parts) => parts.concat(),
            _ => return None,
        };
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// The first text element only, for single-token columns.
    pub fn first_text(&self) -> Option<String> {
        match self {
            Self::Scalar(s) => Some(s.trim().to_string()),
            Self::Text(parts) => parts
                .iter()
                .map(|p| p.trim())
                .find(|p| !p.is_empty())
                .map(ToString::to_string),
            _ => None,
        }
        .filter(|s| !s.is_empty())
    }

    /// A referenced record id: the string itself, or the first linked id.
    pub fn first_reference(&self) -> Option<String> {
        match self {
            Self::Scalar(s) => Some(s.trim().to_string()),
            Self::Reference(ids) => ids.first().map(|id| id.trim().to_string()),
            _ => None,
        }
        .filter(|s| !s.is_empty())
    }
}

fn decode_list(items: &[Value]) -> Option<FieldValue> {
    let first = items.first()?;

    if let Some(ids) = first.get("record_ids").and_then(Value::as_array) {
        let ids: Vec<String> = ids
            .iter()
            .filter_map(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .collect();
        return Some(if ids.is_empty() {
            FieldValue::Absent
        } else {
            FieldValue::Reference(ids)
        });
    }

    let texts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect();

    (!texts.is_empty()).then_some(FieldValue::Text(texts))
}
