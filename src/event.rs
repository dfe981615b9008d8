//! The query-executed notification handed to the tracer by the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single SQL execution as reported by the host's database layer.
///
/// The tracer treats this as opaque input: it does not care how the host
/// sourced the fields, only that bindings arrive in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryEvent {
    /// Host (or address) of the database connection that ran the query.
    pub host: String,
    /// The SQL text as executed, placeholders included.
    pub sql: String,
    /// Bound parameter values, in placeholder order.
    #[serde(default)]
    pub bindings: Vec<Value>,
    /// Wall-clock execution time in milliseconds.
    pub elapsed_ms: f64,
}

impl QueryEvent {
    pub fn new(host: impl Into<String>, sql: impl Into<String>, bindings: Vec<Value>, elapsed_ms: f64) -> Self {
        QueryEvent {
            host: host.into(),
            sql: sql.into(),
            bindings,
            elapsed_ms,
        }
    }

    /// Render the bindings as a single `", "`-joined string for the record
    /// sinks and the push hook.
    pub fn bindings_joined(&self) -> String {
        self.bindings
            .iter()
            .map(scalar_to_string)
            .collect::<Vec<String>>()
            .join(", ")
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
