//! geonl library entry points.
//!
//! This crate converts between the Dutch national grid (RD, EPSG:28992) and
//! WGS84, wraps the public Dutch geodata services in source adapters, and
//! aggregates their answers into canonical features that always carry both
//! coordinate systems. Front ends (the MCP server, the CLI) should only
//! depend on the items exported here.

pub mod adapters;
pub mod aggregator;
pub mod config;
pub mod coords;
pub mod error;
pub mod http;
pub mod model;
pub mod query;

pub use adapters::{default_adapters, SourceAdapter};
pub use aggregator::{
    AggregateRequest, AggregationResult, Aggregator, Outcome, SourceReport, SourceStatus,
    ToolIntent,
};
pub use config::{AggregatorConfig, UpstreamPolicy};
pub use coords::{
    to_rd, to_wgs84, Confidence, Coordinate, CoordinateSystem, RdCoordinate, Transformed,
    Wgs84Coordinate, RD_ENVELOPE,
};
pub use error::{Error, FailureKind, Result, SourceError};
pub use http::UpstreamClient;
pub use model::{
    AttributeValue, Attributes, Feature, FeatureKind, Geometry, Shape, SourceFeature, SourceId,
};
pub use query::{
    AdminLevel, BoundingBox, CadastralLayer, NoiseType, SourceParams, SourceQuery,
    TopographyLayer,
};

pub use tokio_util::sync::CancellationToken;
