use crate::error::{CairnError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum nesting depth accepted by structural validation.
pub const MAX_DOCUMENT_DEPTH: usize = 100;

static NULL_ID: Value = Value::Null;

/// A single stored document: a JSON object that carries an `_id` field.
///
/// Serializes as the bare object; deserialization goes through
/// [`Document::from_value`] so the `_id` invariant always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Document(Map<String, Value>);

impl Document {
    /// Wrap a JSON value, requiring it to be an object with an `_id`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                if !map.contains_key("_id") {
                    return Err(CairnError::ValidationFailed(
                        "document has no _id field".into(),
                    ));
                }
                Ok(Self(map))
            }
            other => Err(CairnError::ValidationFailed(format!(
                "expected a JSON object, found {}",
                type_name(&other)
            ))),
        }
    }

    /// Decode from raw JSON bytes (as stored in a collection file).
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CairnError::ValidationFailed(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn id(&self) -> &Value {
        self.0.get("_id").unwrap_or(&NULL_ID)
    }

    /// Canonical string form of `_id`, used as a storage key.
    ///
    /// serde_json keeps object keys sorted, so equal ids always render
    /// identically.
    pub fn id_key(&self) -> String {
        id_key(self.id())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Structural checks performed in strict (objcheck) mode.
    ///
    /// - `_id` must not be an array
    /// - field names must be non-empty, must not contain NUL and must not
    ///   start with `$`
    /// - nesting depth is bounded by [`MAX_DOCUMENT_DEPTH`]
    pub fn validate(&self) -> Result<()> {
        if self.id().is_array() {
            return Err(CairnError::ValidationFailed(
                "_id cannot be an array".into(),
            ));
        }
        validate_object(&self.0, 1)
    }
}

impl TryFrom<Value> for Document {
    type Error = CairnError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

pub fn id_key(id: &Value) -> String {
    // Serializing a Value cannot fail
    serde_json::to_string(id).unwrap_or_default()
}

fn validate_object(map: &Map<String, Value>, depth: usize) -> Result<()> {
    if depth > MAX_DOCUMENT_DEPTH {
        return Err(CairnError::ValidationFailed(format!(
            "document nesting exceeds {} levels",
            MAX_DOCUMENT_DEPTH
        )));
    }
    for (key, value) in map {
        if key.is_empty() {
            return Err(CairnError::ValidationFailed("empty field name".into()));
        }
        if key.starts_with('$') {
            return Err(CairnError::ValidationFailed(format!(
                "field name '{}' starts with '$'",
                key
            )));
        }
        if key.contains('\0') {
            return Err(CairnError::ValidationFailed(
                "field name contains a NUL byte".into(),
            ));
        }
        validate_value(value, depth)?;
    }
    Ok(())
}

fn validate_value(value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Object(map) => validate_object(map, depth + 1),
        Value::Array(items) => {
            if depth + 1 > MAX_DOCUMENT_DEPTH {
                return Err(CairnError::ValidationFailed(format!(
                    "document nesting exceeds {} levels",
                    MAX_DOCUMENT_DEPTH
                )));
            }
            items.iter().try_for_each(|item| validate_value(item, depth + 1))
        }
        _ => Ok(()),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
