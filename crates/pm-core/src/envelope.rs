//! Success/error envelope returned by every operation
//!
//! `success == false` always comes with a non-empty `error`, and a successful
//! result never carries one. The fields are private so the only way to build
//! an envelope is through the constructors below.

use serde::Serialize;
use serde_json::{Map, Value};

const RESERVED_KEYS: [&str; 3] = ["success", "data", "error"];

/// Normalized outcome of an operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl OperationResult {
    /// Successful result without payload
    pub fn success() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            fields: Map::new(),
        }
    }

    /// Failed result. A blank message is replaced so the error is never empty.
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Operation failed".to_string()
        } else {
            message
        };

        Self {
            success: false,
            data: None,
            error: Some(message),
            fields: Map::new(),
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach an operation-specific field.
    ///
    /// `data` is routed to [`OperationResult::with_data`]; `success` and
    /// `error` cannot be overridden and are ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        match key.as_str() {
            "data" => self.data = Some(value.into()),
            k if RESERVED_KEYS.contains(&k) => {
                tracing::debug!("Ignoring reserved envelope field: {}", k);
            }
            _ => {
                self.fields.insert(key, value.into());
            }
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Operation-specific field by name
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// JSON object with `success`, `data`, `error` first, then the extra fields
    pub fn into_value(self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 3);
        map.insert("success".to_string(), Value::Bool(self.success));
        if let Some(data) = self.data {
            map.insert("data".to_string(), data);
        }
        if let Some(error) = self.error {
            map.insert("error".to_string(), Value::String(error));
        }
        map.extend(self.fields);
        Value::Object(map)
    }
}

impl From<OperationResult> for Value {
    fn from(result: OperationResult) -> Self {
        result.into_value()
    }
}
