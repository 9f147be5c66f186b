//! MCP resource implementations
//!
//! - geonl://sources: configured upstreams and their policies
//! - geonl://coverage: RD coverage envelope and projection origin

use geonl_lib::coords::rd_origin;
use geonl_lib::{CoordinateSystem, SourceId, UpstreamPolicy, RD_ENVELOPE};
use serde::Serialize;
use serde_json::json;

use crate::server::McpServerState;
use crate::Result;

/// Largest RD -> WGS84 -> RD drift accepted inside the envelope, in metres.
const ROUND_TRIP_TOLERANCE_M: f64 = 0.01;

/// Upstream sources resource
pub struct SourcesResource;

impl SourcesResource {
    pub fn read(state: &McpServerState) -> Result<String> {
        #[derive(Serialize)]
        struct Upstream<'a> {
            source: SourceId,
            description: &'a str,
            #[serde(flatten)]
            policy: &'a UpstreamPolicy,
        }

        let config = state.aggregator().config();
        let upstreams: Vec<_> = config
            .policies()
            .map(|(source, policy)| Upstream {
                source,
                description: source.description(),
                policy,
            })
            .collect();

        let body = json!({
            "upstreams": upstreams,
            "retry_backoff_ms": config.retry_backoff.as_millis() as u64,
            "bag_api_key_configured": config.bag_api_key.is_some(),
            "user_agent": config.user_agent,
            "started_at": state.initialized_at.to_rfc3339(),
        });
        serde_json::to_string_pretty(&body).map_err(|e| crate::Error::internal(e.to_string()))
    }
}

/// Coordinate coverage resource
pub struct CoverageResource;

impl CoverageResource {
    pub fn read() -> Result<String> {
        let (rd, wgs84) = rd_origin();
        let body = json!({
            "grid": CoordinateSystem::Rd.to_string(),
            "geodetic": CoordinateSystem::Wgs84.to_string(),
            "envelope": RD_ENVELOPE,
            "origin": {"rd": rd, "wgs84": wgs84},
            "round_trip_tolerance_m": ROUND_TRIP_TOLERANCE_M,
        });
        serde_json::to_string_pretty(&body).map_err(|e| crate::Error::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonl_lib::{Aggregator, AggregatorConfig};
    use serde_json::Value;

    #[test]
    fn test_sources_resource_lists_every_upstream() {
        let state = McpServerState::with_aggregator(Aggregator::with_adapters(
            AggregatorConfig::default(),
            Vec::new(),
        ));
        let body: Value = serde_json::from_str(&SourcesResource::read(&state).unwrap()).unwrap();
        let upstreams = body["upstreams"].as_array().unwrap();
        assert_eq!(upstreams.len(), SourceId::ALL.len());
        assert!(upstreams.iter().all(|u| u["timeout_ms"].as_u64().is_some()));
        assert_eq!(body["bag_api_key_configured"], false);
    }

    #[test]
    fn test_coverage_resource() {
        let body: Value = serde_json::from_str(&CoverageResource::read().unwrap()).unwrap();
        assert_eq!(body["grid"], "EPSG:28992");
        assert_eq!(body["origin"]["rd"]["x"], 155000.0);
        assert_eq!(body["envelope"]["max_y"], 625000.0);
    }
}
