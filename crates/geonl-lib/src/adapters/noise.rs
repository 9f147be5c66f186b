use async_trait::async_trait;

use super::wfs::{self, GetFeature, WfsFeature};
use super::{FieldMap, SourceAdapter};
use crate::coords::RdCoordinate;
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, Geometry, SourceFeature, SourceId};
use crate::query::{NoiseType, SourceParams, SourceQuery};

const WFS_PATH: &str = "/rvo/geluid3d/wfs/v1_0";
const DEFAULT_COUNT: u32 = 10;

const FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("noise_level_lden", "lden"),
        ("noise_level_lnight", "lnight"),
        ("year", "jaar"),
        ("source_description", "omschrijving"),
        ("zone_type", "zonetype"),
    ],
    skip: &[],
};

/// Modelled noise levels (Lden, Lnight) at a point.
#[derive(Debug, Clone)]
pub struct NoiseAdapter {
    url: String,
    client: UpstreamClient,
}

impl NoiseAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            url: format!("{base_url}{WFS_PATH}"),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for NoiseAdapter {
    fn source(&self) -> SourceId {
        SourceId::Noise
    }

    fn supports(&self, query: &SourceQuery) -> bool {
        matches!(query, SourceQuery::Point { .. })
    }

    async fn fetch(
        &self,
        query: &SourceQuery,
        params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError> {
        let Some((point, _)) = query.rd_point() else {
            return Ok(Vec::new());
        };
        let request = GetFeature::new(
            format!("geluid3d:{}", params.noise_type),
            wfs::intersects(point),
            params.limit.unwrap_or(DEFAULT_COUNT),
        );
        let features = request.send(&self.client, &self.url, self.source()).await?;
        Ok(features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| sample(point, params.noise_type, index, feature))
            .collect())
    }
}

/// A sample sits at the queried point; the contour geometry is not kept.
fn sample(point: RdCoordinate, noise_type: NoiseType, index: usize, feature: WfsFeature) -> SourceFeature {
    let mut extra = Attributes::new();
    extra.insert("noise_type", noise_type.as_str());
    SourceFeature {
        id: feature
            .id
            .unwrap_or_else(|| format!("{}-{}", noise_type, index + 1)),
        kind: FeatureKind::NoiseSample,
        geometry: Geometry::rd_point(point),
        attributes: FIELDS.apply(&feature.properties, extra),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeValue, Shape};
    use serde_json::json;

    #[test]
    fn test_sample_uses_query_point() {
        let body = json!({
            "features": [{
                "properties": {"lden": 63.5, "lnight": 54, "jaar": 2021, "zonetype": "weg"},
                "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}
            }]
        });
        let mut features = wfs::parse_feature_collection(&body, SourceId::Noise).unwrap();
        let point = RdCoordinate::new(121_000.0, 487_000.0);
        let sample = sample(point, NoiseType::Rail, 0, features.remove(0));

        assert_eq!(sample.id, "railverkeerslawaai-1");
        assert_eq!(
            sample.geometry.shape,
            Shape::Point(geo::Point::new(121_000.0, 487_000.0))
        );
        assert_eq!(
            sample.attributes.get("noise_type"),
            Some(&AttributeValue::from("railverkeerslawaai"))
        );
        assert_eq!(
            sample.attributes.get("noise_level_lden"),
            Some(&AttributeValue::Number(63.5))
        );
        assert_eq!(sample.attributes.get("year"), Some(&AttributeValue::Integer(2021)));
    }
}
