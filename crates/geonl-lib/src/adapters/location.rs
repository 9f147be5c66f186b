use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::{parse_wkt_point, require_usable, text_property, FieldMap, SourceAdapter};
use crate::coords::CoordinateSystem;
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, Geometry, Shape, SourceFeature, SourceId};
use crate::query::{SourceParams, SourceQuery};

const SEARCH_PATH: &str = "/bzk/locatieserver/search/v3_1/free";
const DEFAULT_ROWS: u32 = 20;

const FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("display_name", "weergavenaam"),
        ("street", "straatnaam"),
        ("house_number", "huis_nlt"),
        ("postal_code", "postcode"),
        ("city", "woonplaatsnaam"),
        ("municipality", "gemeentenaam"),
        ("province", "provincienaam"),
        ("result_type", "type"),
        ("score", "score"),
    ],
    skip: &["id", "centroide_rd", "centroide_ll"],
};

/// Free-text search against the PDOK location server.
#[derive(Debug, Clone)]
pub struct LocationSearchAdapter {
    url: String,
    client: UpstreamClient,
}

impl LocationSearchAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            url: format!("{base_url}{SEARCH_PATH}"),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for LocationSearchAdapter {
    fn source(&self) -> SourceId {
        SourceId::LocationSearch
    }

    fn supports(&self, query: &SourceQuery) -> bool {
        matches!(query, SourceQuery::Text { .. })
    }

    async fn fetch(
        &self,
        query: &SourceQuery,
        params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError> {
        let SourceQuery::Text { text } = query else {
            return Ok(Vec::new());
        };

        let mut request = vec![
            ("q", text.clone()),
            ("rows", params.limit.unwrap_or(DEFAULT_ROWS).to_string()),
        ];
        if let Some(kind) = &params.location_type {
            request.push(("fq", format!("type:{kind}")));
        }

        let body = self
            .client
            .get_json(&self.url, &request, HeaderMap::new())
            .await?;
        let features = parse_response(&body)?;
        debug!(query = %text, features = features.len(), "location search answered");
        Ok(features)
    }
}

fn parse_response(body: &Value) -> Result<Vec<SourceFeature>, SourceError> {
    let docs = body
        .get("response")
        .and_then(|response| response.get("docs"))
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::malformed("missing 'response.docs' array"))?;

    let parsed = docs
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|doc| {
            let id = text_property(doc, "id")?;
            let Some(geometry) = doc_geometry(doc) else {
                warn!(source = %SourceId::LocationSearch, id = %id, "document without centroid");
                return None;
            };
            let kind = kind_for(text_property(doc, "type").as_deref());
            Some(SourceFeature {
                id,
                kind,
                geometry,
                attributes: FIELDS.apply(doc, Attributes::new()),
            })
        })
        .collect();
    require_usable(parsed, docs.len(), "documents")
}

/// RD centroid when present, WGS84 (`lon lat`) otherwise.
fn doc_geometry(doc: &serde_json::Map<String, Value>) -> Option<Geometry> {
    let centroid = |key: &str| {
        doc.get(key)
            .and_then(Value::as_str)
            .and_then(parse_wkt_point)
    };
    centroid("centroide_rd")
        .map(|p| Geometry::new(CoordinateSystem::Rd, Shape::Point(p)))
        .or_else(|| {
            centroid("centroide_ll").map(|p| Geometry::new(CoordinateSystem::Wgs84, Shape::Point(p)))
        })
}

fn kind_for(result_type: Option<&str>) -> FeatureKind {
    match result_type {
        Some("perceel") => FeatureKind::Parcel,
        Some("gemeente" | "woonplaats" | "provincie" | "waterschap") => FeatureKind::Boundary,
        _ => FeatureKind::Address,
    }
}
