//! Error types and RFC 9457-style problem details for the MCP server
//!
//! Tool failures are reported to the client as a tool result with
//! `isError: true` whose text is the serialized [`Error`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Result type for MCP operations
pub type Result<T> = std::result::Result<T, Error>;

const TYPE_BASE: &str = "https://geonl.local/errors";

/// MCP Server error type implementing RFC 9457 Problem Details
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[error("{message}")]
pub struct Error {
    /// HTTP status-like code (e.g., 400, 404, 500)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Machine-readable problem type URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// Additional error context (parameter name, failed sources)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Error {
    /// Create a new error with a code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            r#type: None,
            context: None,
        }
    }

    /// Add a problem type URI
    pub fn with_type(mut self, type_uri: impl Into<String>) -> Self {
        self.r#type = Some(type_uri.into());
        self
    }

    /// Add context information as JSON
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Invalid parameter error
    pub fn invalid_param(param: impl Into<String>, reason: impl Into<String>) -> Self {
        let p = param.into();
        Self::new(400, format!("Invalid parameter: {}", p))
            .with_type(format!("{TYPE_BASE}/invalid-parameter"))
            .with_context(json!({
                "parameter": p,
                "reason": reason.into()
            }))
    }

    /// Tool name not known to this server
    pub fn unknown_tool(name: impl Into<String>, available: &[&str]) -> Self {
        let name = name.into();
        Self::new(404, format!("Unknown tool '{}'", name))
            .with_type(format!("{TYPE_BASE}/unknown-tool"))
            .with_context(json!({
                "tool": name,
                "available": available,
            }))
    }

    /// The client cancelled the request or the server is shutting down
    pub fn cancelled() -> Self {
        Self::new(499, "Request cancelled").with_type(format!("{TYPE_BASE}/cancelled"))
    }

    /// Every upstream consulted for a tool failed
    pub fn all_sources_failed(tool: impl Into<String>, sources: Value) -> Self {
        let tool = tool.into();
        Self::new(502, format!("All upstream sources failed for '{}'", tool))
            .with_type(format!("{TYPE_BASE}/all-sources-failed"))
            .with_context(json!({
                "tool": tool,
                "sources": sources,
            }))
    }

    /// Internal server error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(500, format!("Internal server error: {}", reason.into()))
            .with_type(format!("{TYPE_BASE}/internal-error"))
    }
}

impl From<geonl_lib::Error> for Error {
    fn from(err: geonl_lib::Error) -> Self {
        match err {
            geonl_lib::Error::Cancelled => Error::cancelled(),
            geonl_lib::Error::InvalidQuery(reason) => Error::invalid_param("query", reason),
            other => Error::internal(other.to_string()),
        }
    }
}
