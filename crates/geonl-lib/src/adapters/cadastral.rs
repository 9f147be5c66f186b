use async_trait::async_trait;

use super::wfs::{self, cql_string, GetFeature, WfsFeature, WfsFilter};
use super::{text_property, FieldMap, SourceAdapter};
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Attributes, FeatureKind, SourceFeature, SourceId};
use crate::query::{SourceParams, SourceQuery};

const WFS_PATH: &str = "/kadaster/kadastralekaart/wfs/v5_0";
const DEFAULT_COUNT: u32 = 10;

const FIELDS: FieldMap = FieldMap {
    canonical: &[
        ("parcel_id", "identificatie"),
        ("municipality", "gemeentenaam"),
        ("section", "sectie"),
        ("parcel_number", "perceelnummer"),
        ("area_m2", "oppervlakte"),
        ("cadastral_designation", "kadastraleaanduiding"),
    ],
    skip: &[],
};

/// Parcels and parcel boundaries from the cadastral map WFS.
#[derive(Debug, Clone)]
pub struct CadastralAdapter {
    url: String,
    client: UpstreamClient,
}

impl CadastralAdapter {
    pub fn new(base_url: &str, client: UpstreamClient) -> Self {
        Self {
            url: format!("{base_url}{WFS_PATH}"),
            client,
        }
    }
}

fn filter_for(query: &SourceQuery) -> Option<WfsFilter> {
    match query {
        SourceQuery::Identifier { id } => Some(WfsFilter::Cql(format!(
            "identificatie={}",
            cql_string(id.trim())
        ))),
        SourceQuery::Point { .. } => query.rd_point().map(|(point, _)| wfs::intersects(point)),
        SourceQuery::BoundingBox { bbox } => bbox.rd_extent().map(WfsFilter::Bbox),
        _ => None,
    }
}

#[async_trait]
impl SourceAdapter for CadastralAdapter {
    fn source(&self) -> SourceId {
        SourceId::Cadastral
    }

    fn supports(&self, query: &SourceQuery) -> bool {
        matches!(
            query,
            SourceQuery::Identifier { .. } | SourceQuery::Point { .. } | SourceQuery::BoundingBox { .. }
        )
    }

    async fn fetch(
        &self,
        query: &SourceQuery,
        params: &SourceParams,
    ) -> Result<Vec<SourceFeature>, SourceError> {
        let Some(filter) = filter_for(query) else {
            return Ok(Vec::new());
        };
        let request = GetFeature::new(
            params.cadastral_layer.type_name(),
            filter,
            params.limit.unwrap_or(DEFAULT_COUNT),
        );
        let features = request.send(&self.client, &self.url, self.source()).await?;
        Ok(features.into_iter().filter_map(parcel_feature).collect())
    }
}

fn parcel_feature(feature: WfsFeature) -> Option<SourceFeature> {
    let id = text_property(&feature.properties, "identificatie").or(feature.id)?;
    Some(SourceFeature {
        id,
        kind: FeatureKind::Parcel,
        attributes: FIELDS.apply(&feature.properties, Attributes::new()),
        geometry: feature.geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::RdCoordinate;
    use crate::model::AttributeValue;
    use crate::query::BoundingBox;
    use serde_json::json;

    #[test]
    fn test_filters() {
        assert_eq!(
            filter_for(&SourceQuery::identifier("ASD01-A-1234")),
            Some(WfsFilter::Cql("identificatie='ASD01-A-1234'".into()))
        );
        assert_eq!(
            filter_for(&SourceQuery::point(RdCoordinate::new(121_000.0, 487_000.0), None)),
            Some(WfsFilter::Cql(
                "INTERSECTS(geometrie, POINT(121000 487000))".into()
            ))
        );
        assert_eq!(
            filter_for(&SourceQuery::BoundingBox {
                bbox: BoundingBox::rd(1.0, 2.0, 3.0, 4.0)
            }),
            Some(WfsFilter::Bbox([1.0, 2.0, 3.0, 4.0]))
        );
        assert_eq!(filter_for(&SourceQuery::text("Dam")), None);
    }

    #[test]
    fn test_parcel_mapping() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [{
                "id": "perceel.1",
                "properties": {
                    "identificatie": "NL.IMKAD.KadastraalObject.12345",
                    "sectie": "A",
                    "perceelnummer": 1234,
                    "oppervlakte": 250,
                    "kadastraleGemeenteCode": "ASD01"
                },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [10.0, 0.0], [10.0, 25.0], [0.0, 25.0], [0.0, 0.0]]]
                }
            }]
        });
        let features = wfs::parse_feature_collection(&body, SourceId::Cadastral).unwrap();
        let parcel = parcel_feature(features.into_iter().next().unwrap()).unwrap();
        assert_eq!(parcel.id, "NL.IMKAD.KadastraalObject.12345");
        assert_eq!(parcel.kind, FeatureKind::Parcel);
        assert_eq!(parcel.attributes.get("area_m2"), Some(&AttributeValue::Integer(250)));
        assert_eq!(
            parcel.attributes.get("kadastraleGemeenteCode"),
            Some(&AttributeValue::from("ASD01"))
        );
    }
}
