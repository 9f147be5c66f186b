//! MCP server state and JSON-RPC method dispatch
//!
//! [`McpServerState`] owns the aggregator and answers one request at a time;
//! framing, concurrency and cancellation live in [`crate::transport`].

use std::sync::Arc;

use geonl_lib::{Aggregator, AggregatorConfig, CancellationToken};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::resources::{CoverageResource, SourcesResource};
use crate::tools;
use crate::Error;

/// Protocol version answered when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const SOURCES_URI: &str = "geonl://sources";
pub const COVERAGE_URI: &str = "geonl://coverage";

/// Main server state shared by every request handler
pub struct McpServerState {
    aggregator: Arc<Aggregator>,

    /// Server initialization timestamp for metadata
    pub initialized_at: chrono::DateTime<chrono::Utc>,
}

/// Descriptor for MCP resources exposed by the server
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

/// JSON-RPC level failure; tool failures are reported as tool results instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "Invalid request".to_string(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Unknown method: {}", method),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

/// Shape of one decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// A reply to something we sent; the server never sends requests.
    Response,
    Invalid {
        id: Value,
    },
}

impl Incoming {
    pub fn classify(message: Value) -> Self {
        let Value::Object(mut object) = message else {
            return Incoming::Invalid { id: Value::Null };
        };
        let id = object.remove("id");
        let params = object.remove("params").unwrap_or(Value::Null);
        match (object.remove("method"), id) {
            (Some(Value::String(method)), Some(id)) => Incoming::Request { id, method, params },
            (Some(Value::String(method)), None) => Incoming::Notification { method, params },
            (None, _) if object.contains_key("result") || object.contains_key("error") => {
                Incoming::Response
            }
            (_, id) => Incoming::Invalid {
                id: id.unwrap_or(Value::Null),
            },
        }
    }
}

/// Build the JSON-RPC envelope for a request outcome.
pub fn response(id: Value, outcome: std::result::Result<Value, RpcError>) -> Value {
    match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
    }
}

impl McpServerState {
    /// Build the aggregator from `config` and wrap it.
    pub fn new(config: AggregatorConfig) -> crate::Result<Self> {
        let aggregator = Aggregator::new(config).map_err(Error::from)?;
        Ok(Self::with_aggregator(aggregator))
    }

    pub fn with_aggregator(aggregator: Aggregator) -> Self {
        info!(
            upstreams = aggregator.config().policies().count(),
            "MCP server state ready"
        );
        Self {
            aggregator: Arc::new(aggregator),
            initialized_at: chrono::Utc::now(),
        }
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// List MCP resources exposed by this server
    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        vec![
            ResourceDescriptor {
                uri: SOURCES_URI,
                name: "Upstream sources",
                description: "Configured upstream services with their timeout, retry and concurrency policies",
                mime_type: "application/json",
            },
            ResourceDescriptor {
                uri: COVERAGE_URI,
                name: "Coordinate coverage",
                description: "RD coverage envelope, projection origin and conversion tolerance",
                mime_type: "application/json",
            },
        ]
    }

    /// Answer one JSON-RPC request.
    ///
    /// `cancel` aborts upstream work started by `tools/call`.
    pub async fn handle_request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, RpcError> {
        debug!(method, "handling request");
        match method {
            "initialize" => Ok(self.initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({"tools": tools::tool_definitions()})),
            "tools/call" => self.call_tool(params, cancel).await,
            "resources/list" => Ok(json!({"resources": self.resources()})),
            "resources/read" => self.read_resource(&params),
            "prompts/list" => Ok(json!({"prompts": []})),
            other => {
                warn!(method = other, "unknown method");
                Err(RpcError::method_not_found(other))
            }
        }
    }

    /// Notifications never get a reply; cancellation is handled by the transport.
    pub fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => info!("Client finished initialization"),
            other => debug!(method = other, "ignoring notification"),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        info!(protocol_version, "Client initializing");
        json!({
            "protocolVersion": protocol_version,
            "serverInfo": {"name": "geonl", "version": env!("CARGO_PKG_VERSION")},
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}}
        })
    }

    async fn call_tool(
        &self,
        params: Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<Value, RpcError> {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Err(RpcError::invalid_params("tools/call requires a tool name"));
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = tools::call_tool(&self.aggregator, name, arguments, cancel).await;
        Ok(tool_result(result))
    }

    fn read_resource(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return Err(RpcError::invalid_params("resources/read requires a uri"));
        };
        let text = match uri {
            SOURCES_URI => SourcesResource::read(self),
            COVERAGE_URI => CoverageResource::read(),
            other => return Err(RpcError::invalid_params(format!("Unknown resource: {}", other))),
        }
        .map_err(|e| RpcError {
            code: -32603,
            message: e.to_string(),
        })?;
        Ok(json!({
            "contents": [{"uri": uri, "mimeType": "application/json", "text": text}]
        }))
    }
}

fn tool_result(result: crate::Result<Value>) -> Value {
    let (body, is_error) = match result {
        Ok(output) => (output, false),
        Err(problem) => (json!(problem), true),
    };
    let text = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> McpServerState {
        McpServerState::with_aggregator(Aggregator::with_adapters(
            AggregatorConfig::default(),
            Vec::new(),
        ))
    }

    #[test]
    fn test_classify_messages() {
        assert_eq!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})),
            Incoming::Request {
                id: json!(1),
                method: "ping".into(),
                params: Value::Null
            }
        );
        assert!(matches!(
            Incoming::classify(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            Incoming::Notification { .. }
        ));
        assert_eq!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": 7, "result": {}})),
            Incoming::Response
        );
        assert_eq!(
            Incoming::classify(json!({"jsonrpc": "2.0", "id": 3})),
            Incoming::Invalid { id: json!(3) }
        );
        assert_eq!(
            Incoming::classify(json!([1, 2])),
            Incoming::Invalid { id: Value::Null }
        );
    }

    #[tokio::test]
    async fn test_initialize_echoes_protocol_version() {
        let state = state();
        let cancel = CancellationToken::new();
        let result = state
            .handle_request("initialize", json!({"protocolVersion": "2025-03-26"}), &cancel)
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "geonl");

        let result = state
            .handle_request("initialize", Value::Null, &cancel)
            .await
            .unwrap();
        assert_eq!(result["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let err = state()
            .handle_request("sampling/createMessage", Value::Null, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[tokio::test]
    async fn test_tool_errors_are_tool_results() {
        let result = state()
            .handle_request(
                "tools/call",
                json!({"name": "nope", "arguments": {}}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["isError"], true);
        let text = result["content"][0]["text"].as_str().unwrap();
        let problem: Error = serde_json::from_str(text).unwrap();
        assert_eq!(problem.code, 404);
    }

    #[test]
    fn test_resources_listed() {
        let uris: Vec<_> = state().resources().iter().map(|r| r.uri).collect();
        assert_eq!(uris, vec![SOURCES_URI, COVERAGE_URI]);
    }

    #[test]
    fn test_response_envelope() {
        let ok = response(json!(1), Ok(json!({})));
        assert_eq!(ok["jsonrpc"], "2.0");
        assert!(ok.get("error").is_none());
        let err = response(json!("a"), Err(RpcError::method_not_found("x")));
        assert_eq!(err["error"]["code"], -32601);
        assert_eq!(err["id"], "a");
    }
}
