use async_trait::async_trait;

use super::wfs::{self, GetFeature, WfsFeature};
use super::{text_property, FieldMap, SourceAdapter};
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, SourceFeature, SourceId};
use crate::query::{SourceParams, SourceQuery, TopographyLayer};

const DEFAULT_COUNT: u32 = 100;
pub const DEFAULT_RADIUS_M: f64 = 500.0;

const FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("feature_id", "gml_id"),
        ("object_end_time", "objecteindtijd"),
    ],
    skip: &[],
};

/// Topographic objects from BGT (large scale) or TOP10NL (base map).
#[derive(Debug, Clone)]
pub struct TopographyAdapter {
    base_url: String,
    client: UpstreamClient,
}

impl TopographyAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            base_url: base_url.to_string(),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for TopographyAdapter {
    fn source(&self) -> SourceId {
        SourceId::Topography
    }

    fn supports(&self, query: &SourceQuery) -> bool {
        matches!(query, SourceQuery::Point { .. })
    }

    async fn fetch(
        &self,
        query: &SourceQuery,
        params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError> {
        let Some((point, radius)) = query.rd_point() else {
            return Ok(Vec::new());
        };
        let layer = params.topography_layer;
        let request = GetFeature::new(
            layer.type_name(),
            wfs::within(point, radius.unwrap_or(DEFAULT_RADIUS_M)),
            params.limit.unwrap_or(DEFAULT_COUNT),
        );
        let url = format!("{}{}", self.base_url, layer.path());
        let features = request.send(&self.client, &url, self.source()).await?;
        Ok(features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| element(layer, index, feature))
            .collect())
    }
}

fn element(layer: TopographyLayer, index: usize, feature: WfsFeature) -> SourceFeature {
    let mut extra = Attributes::new();
    extra.insert("layer", layer.as_str());
    // BGT carries the maintaining authority, TOP10NL the area type.
    if let Some(kind) = text_property(&feature.properties, "bronhouder")
        .or_else(|| text_property(&feature.properties, "typegebied"))
    {
        extra.insert("feature_type", kind);
    }

    let id = feature
        .id
        .or_else(|| text_property(&feature.properties, "gml_id"))
        .unwrap_or_else(|| format!("{layer}-{}", index + 1));
    SourceFeature {
        id,
        kind: FeatureKind::TopographyElement,
        attributes: FIELDS.apply(&feature.properties, extra),
        geometry: feature.geometry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeValue;
    use serde_json::json;

    #[test]
    fn test_element_mapping() {
        let body = json!({
            "features": [{
                "properties": {"gml_id": "bgt.wegdeel.1", "bronhouder": "G0363", "objecteindtijd": null},
                "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [3.0, 4.0]]}
            }]
        });
        let mut features = wfs::parse_feature_collection(&body, SourceId::Topography).unwrap();
        let element = element(TopographyLayer::Bgt, 0, features.remove(0));
        assert_eq!(element.id, "bgt.wegdeel.1");
        assert_eq!(element.kind, FeatureKind::TopographyElement);
        assert_eq!(element.attributes.get("layer"), Some(&AttributeValue::from("bgt")));
        assert_eq!(
            element.attributes.get("feature_type"),
            Some(&AttributeValue::from("G0363"))
        );
        assert!(!element.attributes.contains_key("object_end_time"));
    }
}
