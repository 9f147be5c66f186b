//! Upstream adapters.
//!
//! Each adapter translates one upstream service into [`SourceFeature`]s in
//! that upstream's native coordinate system. Adapters never convert
//! coordinates: the aggregator reprojects the query before calling
//! [`SourceAdapter::fetch`] and backfills the other system afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use geo::Point;
use serde_json::{Map, Value};

use crate::config::AggregatorConfig;
use crate::coords::CoordinateSystem;
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{AttributeValue, Attributes, SourceId};
use crate::query::{SourceParams, SourceQuery};

pub mod bag;
pub mod boundaries;
pub mod cadastral;
pub mod height;
pub mod location;
pub mod noise;
pub mod topography;
pub(crate) mod wfs;

pub use bag::BuildingRegistryAdapter;
pub use boundaries::BoundariesAdapter;
pub use cadastral::CadastralAdapter;
pub use height::HeightAdapter;
pub use location::LocationSearchAdapter;
pub use noise::NoiseAdapter;
pub use topography::TopographyAdapter;

pub use crate::model::SourceFeature;

/// Translator of one upstream into canonical features.
///
/// Implementations hold only immutable endpoint configuration and are safe
/// to call concurrently.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> SourceId;

    /// Coordinate system the upstream expects in queries and returns in
    /// geometries.
    fn native_system(&self) -> CoordinateSystem {
        CoordinateSystem::Rd
    }

    /// Whether this adapter can answer the query target at all.
    fn supports(&self, query: &SourceQuery) -> bool;

    async fn fetch(
        &self,
        query: &SourceQuery,
        params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError>;
}

/// The production adapter set, one per [`SourceId`].
pub fn default_adapters(
    config: &AggregatorConfig,
    client: UpstreamClient,
) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(LocationSearchAdapter::new(
            config.policy(SourceId::LocationSearch).base(),
            client.clone(),
        )),
        Arc::new(
            BuildingRegistryAdapter::new(
                config.policy(SourceId::BuildingRegistry).base(),
                client.clone(),
            )
            .with_api_key(config.bag_api_key.clone()),
        ),
        Arc::new(CadastralAdapter::new(
            config.policy(SourceId::Cadastral).base(),
            client.clone(),
        )),
        Arc::new(HeightAdapter::new(
            config.policy(SourceId::Height).base(),
            client.clone(),
        )),
        Arc::new(NoiseAdapter::new(
            config.policy(SourceId::Noise).base(),
            client.clone(),
        )),
        Arc::new(TopographyAdapter::new(
            config.policy(SourceId::Topography).base(),
            client.clone(),
        )),
        Arc::new(BoundariesAdapter::new(
            config.policy(SourceId::Boundaries).base(),
            client,
        )),
    ]
}

/// Canonical attribute names for one upstream payload.
///
/// `canonical` pairs are `(canonical_key, upstream_key)`. Upstream keys that
/// are mapped or listed in `skip` are not passed through again.
pub(crate) struct FieldMap {
    pub canonical: &'static [(&'static str, &'static str)],
    pub skip: &'static [&'static str],
}

impl FieldMap {
    /// Canonical keys first, then `extra`, then every remaining scalar
    /// upstream property under its own name.
    pub fn apply(&self, properties: &Map<String, Value>, extra: Attributes) -> Attributes {
        let mut attributes = Attributes::new();
        for (canonical, upstream) in self.canonical {
            if let Some(value) = properties.get(*upstream).and_then(canonical_value) {
                attributes.insert(*canonical, value);
            }
        }
        for (key, value) in extra.iter() {
            attributes.insert(key.clone(), value.clone());
        }
        for (key, value) in properties {
            if self.is_consumed(key) {
                continue;
            }
            if let Some(value) = AttributeValue::from_json(value) {
                attributes.insert_upstream(key, value);
            }
        }
        attributes
    }

    fn is_consumed(&self, key: &str) -> bool {
        self.skip.contains(&key) || self.canonical.iter().any(|(_, upstream)| *upstream == key)
    }
}

/// Scalars as-is; single-element arrays unwrap; arrays of text join with
/// `", "`.
pub(crate) fn canonical_value(value: &Value) -> Option<AttributeValue> {
    match value {
        Value::Array(items) => {
            let scalars: Vec<AttributeValue> =
                items.iter().filter_map(AttributeValue::from_json).collect();
            match scalars.as_slice() {
                [] => None,
                [single] => Some(single.clone()),
                many => {
                    let texts: Option<Vec<&str>> = many.iter().map(AttributeValue::as_str).collect();
                    match texts {
                        Some(texts) => Some(AttributeValue::Text(texts.join(", "))),
                        None => Some(many[0].clone()),
                    }
                }
            }
        }
        other => AttributeValue::from_json(other),
    }
}

/// Text of a property, accepting numeric identifiers too.
pub(crate) fn text_property(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reject a non-empty upstream list of which not a single entry could be
/// read: the upstream changed its encoding.
pub(crate) fn require_usable<T>(
    parsed: Vec<T>,
    received: usize,
    what: &str,
) -> Result<Vec<T>, SourceError> {
    if parsed.is_empty() && received > 0 {
        return Err(SourceError::malformed(format!(
            "none of {received} {what} could be read"
        )));
    }
    Ok(parsed)
}

/// Parse a WKT `POINT(a b)` as used by the location server.
pub(crate) fn parse_wkt_point(wkt: &str) -> Option<Point<f64>> {
    let inner = wkt
        .trim()
        .strip_prefix("POINT")?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let mut parts = inner.split_whitespace().map(str::parse::<f64>);
    let a = parts.next()?.ok()?;
    let b = parts.next()?.ok()?;
    Some(Point::new(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAP: FieldMap = FieldMap {
        canonical: &[("name", "naam"), ("code", "code")],
        skip: &["geometrie"],
    };

    fn properties(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_field_map_inserts_canonical_then_passes_through() {
        let props = properties(json!({
            "naam": "Utrecht",
            "code": "0344",
            "name": "utrecht-alt",
            "geometrie": "POINT(1 2)",
            "nested": {"a": 1},
            "empty": null,
            "jaar": 2022
        }));
        let attributes = MAP.apply(&props, Attributes::new());

        assert_eq!(attributes.get("name"), Some(&AttributeValue::from("Utrecht")));
        assert_eq!(attributes.get("code"), Some(&AttributeValue::from("0344")));
        assert_eq!(
            attributes.get("upstream_name"),
            Some(&AttributeValue::from("utrecht-alt"))
        );
        assert_eq!(attributes.get("jaar"), Some(&AttributeValue::Integer(2022)));
        assert!(!attributes.contains_key("geometrie"));
        assert!(!attributes.contains_key("nested"));
        assert!(!attributes.contains_key("empty"));
        assert!(!attributes.contains_key("naam"));
    }

    #[test]
    fn test_extra_attributes_win_over_pass_through() {
        let props = properties(json!({"layer": "upstream"}));
        let mut extra = Attributes::new();
        extra.insert("layer", "bgt");
        let attributes = MAP.apply(&props, extra);
        assert_eq!(attributes.get("layer"), Some(&AttributeValue::from("bgt")));
        assert_eq!(
            attributes.get("upstream_layer"),
            Some(&AttributeValue::from("upstream"))
        );
    }

    #[test]
    fn test_canonical_value_flattens_arrays() {
        assert_eq!(
            canonical_value(&json!(["1920"])),
            Some(AttributeValue::from("1920"))
        );
        assert_eq!(
            canonical_value(&json!(["woonfunctie", "winkelfunctie"])),
            Some(AttributeValue::from("woonfunctie, winkelfunctie"))
        );
        assert_eq!(canonical_value(&json!([])), None);
    }

    #[test]
    fn test_require_usable() {
        assert!(require_usable(Vec::<u8>::new(), 0, "docs").unwrap().is_empty());
        assert_eq!(require_usable(vec![1], 3, "docs").unwrap(), vec![1]);
        let err = require_usable(Vec::<u8>::new(), 2, "docs").unwrap_err();
        assert_eq!(err.to_string(), "upstream error: malformed payload: none of 2 docs could be read");
    }

    #[test]
    fn test_parse_wkt_point() {
        assert_eq!(
            parse_wkt_point("POINT(121000.5 487000)"),
            Some(Point::new(121_000.5, 487_000.0))
        );
        assert_eq!(
            parse_wkt_point("POINT (4.9 52.37)"),
            Some(Point::new(4.9, 52.37))
        );
        assert_eq!(parse_wkt_point("LINESTRING(1 2, 3 4)"), None);
        assert_eq!(parse_wkt_point("POINT(a b)"), None);
    }
}
