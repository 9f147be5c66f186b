use async_trait::async_trait;

use super::wfs::{self, GetFeature, WfsFeature};
use super::{text_property, FieldMap, SourceAdapter};
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, SourceFeature, SourceId};
use crate::query::{SourceParams, SourceQuery};

const WFS_PATH: &str = "/lv/3d-basisvoorziening/wfs/v1_0";
const TYPE_NAME: &str = "basisvoorziening:lod12";
const DEFAULT_COUNT: u32 = 50;
pub const DEFAULT_RADIUS_M: f64 = 100.0;

/// Prefix of BAG building identifiers in the 3D datasets.
const PAND_PREFIX: &str = "NL.IMBAG.Pand.";

const FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("building_id", "gml_id"),
        ("height_ground", "h_maaiveld"),
        ("height_roof", "h_dak_max"),
        ("height_relative", "relatievehoogte"),
        ("lod_level", "lod"),
    ],
    skip: &["identificatie"],
};

/// Building heights from the 3D Basisvoorziening LOD 1.2 layer.
///
/// Features are keyed by BAG building id so they fold together with
/// building registry results.
#[derive(Debug, Clone)]
pub struct HeightAdapter {
    url: String,
    client: UpstreamClient,
}

impl HeightAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            url: format!("{base_url}{WFS_PATH}"),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for HeightAdapter {
    fn source(&self) -> SourceId {
        SourceId::Height
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
        let request = GetFeature::new(
            TYPE_NAME,
            wfs::within(point, radius.unwrap_or(DEFAULT_RADIUS_M)),
            params.limit.unwrap_or(DEFAULT_COUNT),
        );
        let features = request.send(&self.client, &self.url, self.source()).await?;
        Ok(features.into_iter().filter_map(building_feature).collect())
    }
}

fn building_feature(feature: WfsFeature) -> Option<SourceFeature> {
    let pand_id = text_property(&feature.properties, "identificatie")
        .map(|id| id.trim_start_matches(PAND_PREFIX).to_string());

    let mut extra = Attributes::new();
    if let Some(pand_id) = &pand_id {
        extra.insert("pand_id", pand_id.clone());
    }
    let mut attributes = FIELDS.apply(&feature.properties, extra);
    if !attributes.contains_key("building_id") {
        if let Some(id) = &feature.id {
            attributes.insert("building_id", id.clone());
        }
    }

    Some(SourceFeature {
        id: pand_id.or(feature.id)?,
        kind: FeatureKind::Building,
        geometry: feature.geometry,
        attributes,
    })
}
