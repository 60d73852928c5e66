//! The LXD response envelope.
//!
//! Every LXD reply is a JSON object of the shape
//!
//! ```text
//! { "type": "sync" | "async" | "error",
//!   "status": "...", "status_code": 200,
//!   "operation": "/1.0/operations/<id>",
//!   "error": "...", "error_code": 0,
//!   "metadata": { ... } }
//! ```
//!
//! Accessors are lenient: a missing or mistyped field reads as its empty
//! value, matching how the daemon omits fields it does not use.

use serde_json::{Map, Value};

static NULL: Value = Value::Null;

/// A parsed LXD reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Wrap an already parsed JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Raw field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Reply class: `sync`, `async` or `error`.
    pub fn kind(&self) -> &str {
        self.str_field("type")
    }

    /// Top-level status text.
    pub fn status(&self) -> &str {
        self.str_field("status")
    }

    /// Top-level status code (0 when absent).
    pub fn status_code(&self) -> i64 {
        self.int_field("status_code")
    }

    /// Error text (empty when absent).
    pub fn error(&self) -> &str {
        self.str_field("error")
    }

    /// Error code (0 when absent).
    pub fn error_code(&self) -> i64 {
        self.int_field("error_code")
    }

    /// The `metadata` member, `null` when absent.
    pub fn metadata(&self) -> &Value {
        self.0.get("metadata").unwrap_or(&NULL)
    }

    /// Whether this reply describes a background operation that has to be
    /// waited on.
    pub fn is_async(&self) -> bool {
        self.kind() == "async" || self.status_code() == 100
    }

    /// Operation id, from `metadata.id` or the last segment of `operation`.
    pub fn operation_id(&self) -> Option<&str> {
        if let Some(id) = self.metadata().get("id").and_then(Value::as_str) {
            if !id.is_empty() {
                return Some(id);
            }
        }

        self.0
            .get("operation")
            .and_then(Value::as_str)
            .and_then(|op| op.rsplit('/').next())
            .filter(|id| !id.is_empty())
    }

    fn str_field(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    fn int_field(&self, key: &str) -> i64 {
        self.0.get(key).and_then(Value::as_i64).unwrap_or_default()
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}
