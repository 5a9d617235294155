//! Tool result envelope.
//!
//! Tools return `Result<Value, ToolError>`; the boundary renders that into
//! `{"status": "success", ...}` or
//! `{"status": "error", "error": <kind>, "message": <text>}`.

use gworkspace_auth::{AuthError, UpstreamApiError};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upstream(#[from] UpstreamApiError),

    #[error("invalid arguments: {0}")]
    InvalidArgument(String),

    /// An error plus extra fields for the envelope (e.g. available sheets).
    #[error("{note}")]
    Detailed {
        note: String,
        inner: Box<ToolError>,
        details: Map<String, Value>,
    },
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Auth(e) => e.kind(),
            ToolError::Upstream(_) => "upstream_api_error",
            ToolError::InvalidArgument(_) => "invalid_argument",
            ToolError::Detailed { inner, .. } => inner.kind(),
        }
    }

    fn remedy(&self) -> Option<&'static str> {
        match self {
            ToolError::Auth(e) => e.remedy(),
            ToolError::Detailed { inner, .. } => inner.remedy(),
            _ => None,
        }
    }

    pub fn with_details(self, note: String, details: Map<String, Value>) -> Self {
        ToolError::Detailed {
            note,
            inner: Box::new(self),
            details,
        }
    }
}

pub type ToolResult = Result<Value, ToolError>;

/// Tag a success payload. Non-object payloads are wrapped under `data`.
pub fn success(payload: Value) -> Value {
    let mut out = Map::new();
    out.insert("status".into(), json!("success"));
    match payload {
        Value::Object(fields) => out.extend(fields),
        other => {
            out.insert("data".into(), other);
        }
    }
    Value::Object(out)
}

/// Render a failure. `action` names what was attempted ("Failed to search Drive").
pub fn failure(err: &ToolError, action: &str) -> Value {
    let mut message = format!("{}: {}", action, err);
    if let Some(remedy) = err.remedy() {
        message.push(' ');
        message.push_str(remedy);
    }

    let mut out = Map::new();
    out.insert("status".into(), json!("error"));
    out.insert("error".into(), json!(err.kind()));
    out.insert("message".into(), json!(message));
    if let ToolError::Detailed { details, .. } = err {
        for (key, value) in details {
            out.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Value::Object(out)
}

pub fn render(result: ToolResult, action: &str) -> Value {
    match result {
        Ok(payload) => success(payload),
        Err(err) => failure(&err, action),
    }
}

pub fn is_success(envelope: &Value) -> bool {
    envelope.get("status").and_then(|v| v.as_str()) == Some("success")
}
