//! WFS 2.0 `GetFeature` requests and GeoJSON parsing shared by the PDOK
//! adapters.

use reqwest::header::HeaderMap;
use geo::{Coord, LineString, MultiPolygon, Point, Polygon};
use serde_json::{Map, Value};
use tracing::warn;

use crate::coords::{CoordinateSystem, RdCoordinate};
use crate::error::SourceError;
use crate::http::UpstreamClient;
use crate::model::{Geometry, Shape, SourceId};

use super::require_usable;

/// Spatial or attribute restriction of a `GetFeature` request.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WfsFilter {
    Cql(String),
    /// `[min_x, min_y, max_x, max_y]` on the RD grid.
    Bbox([f64; 4]),
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GetFeature {
    pub type_name: String,
    pub filter: WfsFilter,
    pub count: u32,
}

impl GetFeature {
    pub fn new(type_name: impl Into<String>, filter: WfsFilter, count: u32) -> Self {
        Self {
            type_name: type_name.into(),
            filter,
            count,
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("service", "WFS".to_string()),
            ("version", "2.0.0".to_string()),
            ("request", "GetFeature".to_string()),
            ("typeName", self.type_name.clone()),
            ("outputFormat", "json".to_string()),
            ("srsName", CoordinateSystem::Rd.to_string()),
            ("count", self.count.to_string()),
        ];
        match &self.filter {
            WfsFilter::Cql(cql) => params.push(("CQL_FILTER", cql.clone())),
            WfsFilter::Bbox([min_x, min_y, max_x, max_y]) => params.push((
                "bbox",
                format!("{min_x},{min_y},{max_x},{max_y},{}", CoordinateSystem::Rd),
            )),
            WfsFilter::None => {}
        }
        params
    }

    pub async fn send(
        &self,
        client: &UpstreamClient,
        url: &str,
        source: SourceId,
    ) -> Result<Vec<WfsFeature>, SourceError> {
        let body = client.get_json(url, &self.params(), HeaderMap::new()).await?;
        parse_feature_collection(&body, source)
    }
}

/// String literal for a CQL filter, single quotes doubled.
pub(crate) fn cql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `LIKE` pattern matching `value` as a literal substring. Wildcards and the
/// escape character in `value` are escaped with a backslash.
pub(crate) fn cql_contains(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    cql_string(&pattern)
}

pub(crate) fn point_wkt(point: RdCoordinate) -> String {
    format!("POINT({} {})", point.x, point.y)
}

pub(crate) fn intersects(point: RdCoordinate) -> WfsFilter {
    WfsFilter::Cql(format!("INTERSECTS(geometrie, {})", point_wkt(point)))
}

pub(crate) fn within(point: RdCoordinate, radius_m: f64) -> WfsFilter {
    WfsFilter::Cql(format!(
        "DWithin(geometrie, {}, {radius_m}, meters)",
        point_wkt(point)
    ))
}

/// One GeoJSON feature of a WFS response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WfsFeature {
    pub id: Option<String>,
    pub properties: Map<String, Value>,
    pub geometry: Geometry,
}

/// Parse a GeoJSON `FeatureCollection`. A body without a `features` array,
/// or one where no feature has a readable geometry, is a malformed payload.
pub(crate) fn parse_feature_collection(
    body: &Value,
    source: SourceId,
) -> Result<Vec<WfsFeature>, SourceError> {
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::malformed("missing 'features' array"))?;

    let parsed = features
        .iter()
        .filter_map(|feature| {
            let properties = match feature.get("properties") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            let id = match feature.get("id") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            };
            let Some(shape) = feature.get("geometry").and_then(parse_shape) else {
                warn!(source = %source, id = ?id, "skipping feature without usable geometry");
                return None;
            };
            Some(WfsFeature {
                id,
                properties,
                geometry: Geometry::new(CoordinateSystem::Rd, shape),
            })
        })
        .collect();
    require_usable(parsed, features.len(), "features")
}

/// GeoJSON geometry to a [`Shape`]. Extra ordinates (heights) are dropped;
/// multi-points and multi-lines keep their first member.
pub(crate) fn parse_shape(geometry: &Value) -> Option<Shape> {
    let coordinates = geometry.get("coordinates")?;
    match geometry.get("type")?.as_str()? {
        "Point" => position(coordinates).map(|c| Point::from(c).into()),
        "MultiPoint" => positions(coordinates)?
            .first()
            .map(|c| Point::from(*c).into()),
        "LineString" => positions(coordinates)
            .filter(|line| !line.is_empty())
            .map(|line| LineString::new(line).into()),
        "MultiLineString" => coordinates
            .as_array()?
            .iter()
            .filter_map(positions)
            .find(|line| !line.is_empty())
            .map(|line| LineString::new(line).into()),
        "Polygon" => polygon(rings(coordinates)?).map(Shape::Polygon),
        "MultiPolygon" => {
            let polygons: Vec<Polygon<f64>> = coordinates
                .as_array()?
                .iter()
                .filter_map(rings)
                .filter_map(polygon)
                .collect();
            (!polygons.is_empty()).then(|| Shape::MultiPolygon(MultiPolygon::new(polygons)))
        }
        _ => None,
    }
}

/// Outer ring first; empty rings are dropped and open rings get closed.
fn polygon(rings: Vec<Vec<Coord<f64>>>) -> Option<Polygon<f64>> {
    let mut rings = rings
        .into_iter()
        .filter(|ring| !ring.is_empty())
        .map(LineString::new);
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

fn position(value: &Value) -> Option<Coord<f64>> {
    let ordinates = value.as_array()?;
    let x = ordinates.first()?.as_f64()?;
    let y = ordinates.get(1)?.as_f64()?;
    Some(Coord { x, y })
}

fn positions(value: &Value) -> Option<Vec<Coord<f64>>> {
    value.as_array()?.iter().map(position).collect()
}

fn rings(value: &Value) -> Option<Vec<Vec<Coord<f64>>>> {
    value.as_array()?.iter().map(positions).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_carry_common_wfs_fields() {
        let request = GetFeature::new(
            "geluid3d:wegverkeerslawaai",
            intersects(RdCoordinate::new(121_000.0, 487_000.0)),
            10,
        );
        let params = request.params();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("service"), Some("WFS"));
        assert_eq!(get("version"), Some("2.0.0"));
        assert_eq!(get("srsName"), Some("EPSG:28992"));
        assert_eq!(get("count"), Some("10"));
        assert_eq!(
            get("CQL_FILTER"),
            Some("INTERSECTS(geometrie, POINT(121000 487000))")
        );
        assert_eq!(get("bbox"), None);
    }

    #[test]
    fn test_bbox_filter() {
        let request = GetFeature::new("x", WfsFilter::Bbox([1.0, 2.0, 3.0, 4.0]), 5);
        assert!(request
            .params()
            .contains(&("bbox", "1,2,3,4,EPSG:28992".to_string())));
    }

    #[test]
    fn test_cql_string_doubles_quotes() {
        assert_eq!(cql_string("'s-Hertogenbosch"), "'''s-Hertogenbosch'");
    }

    #[test]
    fn test_within_filter() {
        let WfsFilter::Cql(cql) = within(RdCoordinate::new(1.5, 2.0), 100.0) else {
            panic!("expected cql");
        };
        assert_eq!(cql, "DWithin(geometrie, POINT(1.5 2), 100, meters)");
    }

    #[test]
    fn test_missing_features_is_malformed() {
        let err = parse_feature_collection(&json!({"type": "error"}), SourceId::Noise).unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::UpstreamError);
    }

    #[test]
    fn test_parse_collection_drops_heights_and_geometryless_features() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "id": "lod12.1",
                    "properties": {"h_dak_max": 12.5},
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0, 1.0], [10.0, 0.0, 1.0], [10.0, 10.0, 1.0], [0.0, 10.0, 1.0]]]
                    }
                },
                {"id": "lod12.2", "properties": {}, "geometry": null}
            ]
        });
        let features = parse_feature_collection(&body, SourceId::Height).expect("features");
        assert_eq!(features.len(), 1);
        let Shape::Polygon(polygon) = &features[0].geometry.shape else {
            panic!("expected polygon");
        };
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!(polygon.exterior().is_closed());
        assert_eq!(polygon.exterior().0[1], Coord { x: 10.0, y: 0.0 });
    }

    #[test]
    fn test_unreadable_geometries_are_malformed() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {"id": "p.1", "properties": {}, "geometry": "POLYGON((0 0,1 0,1 1,0 0))"},
                {"id": "p.2", "properties": {}, "geometry": "POLYGON((2 2,3 2,3 3,2 2))"}
            ]
        });
        let err = parse_feature_collection(&body, SourceId::Cadastral).unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::UpstreamError);
    }

    #[test]
    fn test_empty_collection_is_an_answer() {
        let body = json!({"type": "FeatureCollection", "features": []});
        assert!(parse_feature_collection(&body, SourceId::Cadastral)
            .expect("empty result")
            .is_empty());
    }

    #[test]
    fn test_cql_contains_escapes_wildcards() {
        assert_eq!(cql_contains("Utrecht"), "'%Utrecht%'");
        assert_eq!(cql_contains("50%_a\\b"), "'%50\\%\\_a\\\\b%'");
        assert_eq!(cql_contains("'s-Gravenhage"), "'%''s-Gravenhage%'");
    }

    #[test]
    fn test_parse_shape_variants() {
        assert_eq!(
            parse_shape(&json!({"type": "Point", "coordinates": [1.0, 2.0, 3.0]})),
            Some(Shape::Point(Point::new(1.0, 2.0)))
        );
        assert_eq!(
            parse_shape(&json!({"type": "MultiLineString", "coordinates": [[], [[1.0, 2.0], [3.0, 4.0]]]})),
            Some(Shape::LineString(LineString::from(vec![(1.0, 2.0), (3.0, 4.0)])))
        );
        assert_eq!(
            parse_shape(&json!({"type": "GeometryCollection", "geometries": []})),
            None
        );
        assert_eq!(
            parse_shape(&json!({"type": "Polygon", "coordinates": []})),
            None
        );
    }
}
