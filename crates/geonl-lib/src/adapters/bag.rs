use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Url;
use serde_json::{Map, Value};
use tracing::warn;

use super::wfs::parse_shape;
use super::{require_usable, text_property, FieldMap, SourceAdapter};
use crate::coords::CoordinateSystem;
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, Geometry, SourceFeature, SourceId};
use crate::query::{SourceParams, SourceQuery};

const API_PATH: &str = "/lvbag/individuelebevragingen/v2";

const ADDRESS_FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("bag_id", "nummeraanduidingIdentificatie"),
        ("street", "openbareRuimteNaam"),
        ("house_number", "huisnummer"),
        ("postal_code", "postcode"),
        ("city", "woonplaatsNaam"),
        ("status", "adresseerbaarObjectStatus"),
        ("construction_year", "oorspronkelijkBouwjaar"),
        ("surface_area", "oppervlakte"),
        ("usage", "gebruiksdoelen"),
        ("pand_id", "pandIdentificaties"),
    ],
    skip: &["adresseerbaarObjectGeometrie", "geolocatie", "_links"],
};

const BUILDING_FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("pand_id", "identificatie"),
        ("status", "status"),
        ("construction_year", "oorspronkelijkBouwjaar"),
    ],
    skip: &["geometrie", "_links"],
};

/// BAG Individuele Bevragingen: addresses by id or postal code, buildings
/// by location.
#[derive(Debug, Clone)]
pub struct BuildingRegistryAdapter {
    base_url: String,
    api_key: Option<String>,
    client: UpstreamClient,
}

impl BuildingRegistryAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            base_url: format!("{base_url}{API_PATH}"),
            api_key: None,
            client,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Accept-Crs", HeaderValue::from_static("epsg:28992"));
        if let Some(key) = &self.api_key {
            match HeaderValue::from_str(key) {
                Ok(value) => {
                    headers.insert("X-Api-Key", value);
                }
                Err(_) => warn!("BAG API key contains invalid header characters; sending without"),
            }
        }
        headers
    }

    /// API URL with `segments` appended, each percent-encoded as a single
    /// path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let invalid = || SourceError::Unreachable(format!("invalid base URL {}", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn addresses(&self, url: Url, query: &[(&str, String)]) -> Result<Vec<SourceFeature>, SourceError> {
        let body = self.client.get_json(url.as_str(), query, self.headers()).await?;
        parse_addresses(&body)
    }
}

#[async_trait]
impl SourceAdapter for BuildingRegistryAdapter {
    fn source(&self) -> SourceId {
        SourceId::BuildingRegistry
    }

    fn supports(&self, query: &SourceQuery) -> bool {
        matches!(
            query,
            SourceQuery::Identifier { .. }
                | SourceQuery::PostalAddress { .. }
                | SourceQuery::Point { .. }
        )
    }

    async fn fetch(
        &self,
        query: &SourceQuery,
        _params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError> {
        match query {
            SourceQuery::Identifier { id } => {
                let url = self.endpoint(&["adressenuitgebreid", id.trim()])?;
                self.addresses(url, &[]).await
            }
            SourceQuery::PostalAddress {
                postal_code,
                house_number,
            } => {
                let url = self.endpoint(&["adressenuitgebreid"])?;
                self.addresses(
                    url,
                    &[
                        ("postcode", postal_code.clone()),
                        ("huisnummer", house_number.to_string()),
                    ],
                )
                .await
            }
            SourceQuery::Point { .. } => {
                let Some((point, _)) = query.rd_point() else {
                    return Ok(Vec::new());
                };
                let url = self.endpoint(&["panden"])?;
                let body = self
                    .client
                    .get_json(url.as_str(), &[("locatie", format!("{},{}", point.x, point.y))], self.headers())
                    .await?;
                parse_buildings(&body)
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Either a HAL list under `_embedded.adressen` or a single address object.
fn parse_addresses(body: &Value) -> Result<Vec<SourceFeature>, SourceError> {
    let items: Vec<&Value> = match body.get("_embedded") {
        Some(embedded) => embedded
            .get("adressen")
            .and_then(Value::as_array)
            .map(|list| list.iter().collect())
            .unwrap_or_default(),
        None => match body.as_object() {
            Some(item) if item.contains_key("nummeraanduidingIdentificatie") => vec![body],
            Some(item) if matches!(item.get("_links"), Some(Value::Object(_))) => {
                return Ok(Vec::new())
            }
            _ => return Err(SourceError::malformed("neither '_embedded' nor an address object")),
        },
    };

    let parsed = items
        .iter()
        .filter_map(|item| item.as_object())
        .filter_map(address_feature)
        .collect();
    require_usable(parsed, items.len(), "addresses")
}

fn address_feature(item: &Map<String, Value>) -> Option<SourceFeature> {
    let id = text_property(item, "nummeraanduidingIdentificatie")
        .or_else(|| text_property(item, "identificatie"))?;
    let shape = ["adresseerbaarObjectGeometrie", "geolocatie"]
        .iter()
        .filter_map(|key| item.get(*key))
        .find_map(|geometry| parse_shape(geometry.get("punt").unwrap_or(geometry)));
    let Some(shape) = shape else {
        warn!(source = %SourceId::BuildingRegistry, id = %id, "address without geometry");
        return None;
    };
    Some(SourceFeature {
        id,
        kind: FeatureKind::Address,
        geometry: Geometry::new(CoordinateSystem::Rd, shape),
        attributes: ADDRESS_FIELDS.apply(item, Attributes::new()),
    })
}

fn parse_buildings(body: &Value) -> Result<Vec<SourceFeature>, SourceError> {
    let Some(embedded) = body.get("_embedded") else {
        // An empty HAL result omits `_embedded` but keeps `_links`.
        return match body.get("_links") {
            Some(Value::Object(_)) => Ok(Vec::new()),
            _ => Err(SourceError::malformed("expected a HAL object with '_embedded' or '_links'")),
        };
    };
    let panden = embedded
        .get("panden")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::malformed("missing '_embedded.panden' array"))?;

    let parsed = panden
        .iter()
        .filter_map(|entry| entry.get("pand").unwrap_or(entry).as_object())
        .filter_map(|pand| {
            let id = text_property(pand, "identificatie")?;
            let Some(shape) = pand.get("geometrie").and_then(parse_shape) else {
                warn!(source = %SourceId::BuildingRegistry, id = %id, "building without geometry");
                return None;
            };
            Some(SourceFeature {
                id,
                kind: FeatureKind::Building,
                geometry: Geometry::new(CoordinateSystem::Rd, shape),
                attributes: BUILDING_FIELDS.apply(pand, Attributes::new()),
            })
        })
        .collect();
    require_usable(parsed, panden.len(), "panden")
}
