use async_trait::async_trait;

use super::wfs::{self, cql_contains, GetFeature, WfsFeature, WfsFilter};
use super::{text_property, FieldMap, SourceAdapter};
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, SourceFeature, SourceId};
use crate::query::{AdminLevel, SourceParams, SourceQuery};

const WFS_PATH: &str = "/kadaster/bestuurlijkegebieden/wfs/v1_0";
const DEFAULT_COUNT: u32 = 50;

const FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("code", "code"),
        ("name", "naam"),
        ("province", "provincienaam"),
    ],
    skip: &[],
};

/// Municipality, province and water board boundaries.
#[derive(Debug, Clone)]
pub struct BoundariesAdapter {
    url: String,
    client: UpstreamClient,
}

impl BoundariesAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            url: format!("{base_url}{WFS_PATH}"),
            client,
        }
    }
}

fn filter_for(query: &SourceQuery) -> WfsFilter {
    match query {
        SourceQuery::Text { text } => {
            WfsFilter::Cql(format!("naam ILIKE {}", cql_contains(text.trim())))
        }
        SourceQuery::Point { .. } => query
            .rd_point()
            .map(|(point, _)| wfs::intersects(point))
            .unwrap_or(WfsFilter::None),
        SourceQuery::BoundingBox { bbox } => {
            bbox.rd_extent().map(WfsFilter::Bbox).unwrap_or(WfsFilter::None)
        }
        _ => WfsFilter::None,
    }
}

#[async_trait]
impl SourceAdapter for BoundariesAdapter {
    fn source(&self) -> SourceId {
        SourceId::Boundaries
    }

    fn supports(&self, query: &SourceQuery) -> bool {
        matches!(
            query,
            SourceQuery::Text { .. }
                | SourceQuery::Point { .. }
                | SourceQuery::BoundingBox { .. }
                | SourceQuery::Any
        )
    }

    async fn fetch(
        &self,
        query: &SourceQuery,
        params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError> {
        let level = params.admin_level;
        let request = GetFeature::new(
            level.type_name(),
            filter_for(query),
            params.limit.unwrap_or(DEFAULT_COUNT),
        );
        let features = request.send(&self.client, &self.url, self.source()).await?;
        Ok(features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| boundary(level, index, feature))
            .collect())
    }
}

fn boundary(level: AdminLevel, index: usize, feature: WfsFeature) -> SourceFeature {
    let mut extra = Attributes::new();
    extra.insert("admin_type", level.as_str());
    let id = text_property(&feature.properties, "code")
        .map(|code| format!("{level}:{code}"))
        .or(feature.id)
        .unwrap_or_else(|| format!("{level}-{}", index + 1));
    SourceFeature {
        id,
        kind: FeatureKind::Boundary,
        attributes: FIELDS.apply(&feature.properties, extra),
        geometry: feature.geometry,
    }
}
