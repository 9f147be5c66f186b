//! MCP (Model Context Protocol) server for Dutch geodata
//!
//! This crate provides a stdio-based MCP server that exposes the geonl
//! aggregator (PDOK, BAG and Kadaster services) and the RD/WGS84 coordinate
//! transformer to AI assistants via the Model Context Protocol.
//!
//! # Architecture
//!
//! The MCP server is organized into the following submodules:
//! - `server`: Server state and JSON-RPC method dispatch
//! - `tools`: Tool implementations (search_location, get_bag_address, ...)
//! - `resources`: Resource implementations (upstream sources, coordinate coverage)
//! - `transport`: Line-framed stdio transport and the concurrent server loop
//! - `types`: Tool input and output types with JSON schemas
//! - `error`: Error types and RFC 9457 problem details
//!
//! # Transport
//!
//! The server communicates via stdio using JSON-RPC 2.0 message format
//! as defined by the Model Context Protocol. All logging is redirected to
//! stderr to prevent stdout protocol corruption.

pub mod error;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use server::McpServerState;
pub use transport::{run_server_loop, StdioTransport, Transport};
