//! Canonical feature model shared by every adapter.
//!
//! Adapters produce [`SourceFeature`]s: geometry in the upstream's native
//! coordinate system plus kind-specific attributes. The aggregator turns them
//! into [`Feature`]s, which always carry the representative point in both RD
//! and WGS84.

use std::collections::BTreeMap;
use std::fmt;

use geo::{Area, Centroid, Coord, CoordsIter, LineString, MultiPolygon, Point, Polygon};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::coords::{Confidence, Coordinate, CoordinateSystem, RdCoordinate, Wgs84Coordinate};

/// Upstream services known to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    LocationSearch,
    BuildingRegistry,
    Cadastral,
    Height,
    Noise,
    Topography,
    Boundaries,
}

impl SourceId {
    pub const ALL: [SourceId; 7] = [
        SourceId::LocationSearch,
        SourceId::BuildingRegistry,
        SourceId::Cadastral,
        SourceId::Height,
        SourceId::Noise,
        SourceId::Topography,
        SourceId::Boundaries,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::LocationSearch => "location_search",
            SourceId::BuildingRegistry => "building_registry",
            SourceId::Cadastral => "cadastral",
            SourceId::Height => "height",
            SourceId::Noise => "noise",
            SourceId::Topography => "topography",
            SourceId::Boundaries => "boundaries",
        }
    }

    /// Human readable attribution of the upstream.
    pub fn description(&self) -> &'static str {
        match self {
            SourceId::LocationSearch => "PDOK Locatieserver v3.1",
            SourceId::BuildingRegistry => "BAG Individuele Bevragingen v2",
            SourceId::Cadastral => "PDOK Kadastrale Kaart WFS v5.0",
            SourceId::Height => "PDOK 3D Basisvoorziening WFS v1.0",
            SourceId::Noise => "PDOK 3D Geluid WFS v1.0",
            SourceId::Topography => "PDOK BGT / TOP10NL WFS v1.0",
            SourceId::Boundaries => "PDOK Bestuurlijke Gebieden WFS v1.0",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a feature represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Address,
    Parcel,
    Building,
    Boundary,
    TopographyElement,
    NoiseSample,
}

impl FeatureKind {
    /// Fixed representative-point policy for this kind.
    pub fn anchor_policy(self) -> AnchorPolicy {
        match self {
            FeatureKind::Address | FeatureKind::NoiseSample => AnchorPolicy::Point,
            FeatureKind::Parcel | FeatureKind::Building | FeatureKind::TopographyElement => {
                AnchorPolicy::Centroid
            }
            FeatureKind::Boundary => AnchorPolicy::FirstVertex,
        }
    }
}

/// How the representative point of a geometry is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorPolicy {
    /// The point itself; first vertex for anything else.
    Point,
    /// Area-weighted centroid of the outer rings; first vertex for lines
    /// and degenerate rings.
    Centroid,
    /// First vertex of the first ring.
    FirstVertex,
}

/// Geometry shapes the upstreams return. Vertices follow the order of their
/// system: `x, y` on the RD grid, `lon, lat` in WGS84 (GeoJSON order).
pub type Shape = geo::Geometry<f64>;

fn first_vertex(shape: &Shape) -> Option<(f64, f64)> {
    shape.coords_iter().next().map(|coord| coord.x_y())
}

/// Area-weighted centroid of the outer rings. Holes are ignored; lines,
/// points and zero-area rings have none.
fn outer_centroid(shape: &Shape) -> Option<(f64, f64)> {
    let outer = |polygon: &Polygon<f64>| Polygon::new(polygon.exterior().clone(), Vec::new());
    let outers: MultiPolygon<f64> = match shape {
        Shape::Polygon(polygon) => MultiPolygon::new(vec![outer(polygon)]),
        Shape::MultiPolygon(polygons) => polygons.iter().map(outer).collect(),
        _ => return None,
    };
    if outers.unsigned_area() <= f64::EPSILON {
        return None;
    }
    outers.centroid().map(|point| point.x_y())
}

/// Geometry together with the system its vertices are expressed in.
///
/// Serializes as a GeoJSON geometry object with an extra `system` member.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub system: CoordinateSystem,
    pub shape: Shape,
}

impl Geometry {
    pub fn new(system: CoordinateSystem, shape: Shape) -> Self {
        Self { system, shape }
    }

    pub fn rd_point(point: RdCoordinate) -> Self {
        Self::new(CoordinateSystem::Rd, Point::new(point.x, point.y).into())
    }

    /// Representative point under `policy`, tagged with this geometry's system.
    pub fn representative_point(&self, policy: AnchorPolicy) -> Option<Coordinate> {
        let position = match policy {
            AnchorPolicy::Point | AnchorPolicy::FirstVertex => first_vertex(&self.shape),
            AnchorPolicy::Centroid => {
                outer_centroid(&self.shape).or_else(|| first_vertex(&self.shape))
            }
        }?;
        Some(self.tag(position))
    }

    fn tag(&self, (a, b): (f64, f64)) -> Coordinate {
        match self.system {
            CoordinateSystem::Rd => Coordinate::Rd(RdCoordinate::new(a, b)),
            CoordinateSystem::Wgs84 => Coordinate::Wgs84(Wgs84Coordinate::new(b, a)),
        }
    }
}

impl Serialize for Geometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("system", &self.system)?;
        for (key, value) in geojson(&self.shape) {
            map.serialize_entry(&key, &value)?;
        }
        map.end()
    }
}

/// GeoJSON geometry object for a shape.
fn geojson(shape: &Shape) -> Map<String, Value> {
    let position = |coord: &Coord<f64>| json!([coord.x, coord.y]);
    let line = |line: &LineString<f64>| Value::Array(line.coords().map(position).collect());
    let rings = |polygon: &Polygon<f64>| {
        Value::Array(
            std::iter::once(polygon.exterior())
                .chain(polygon.interiors())
                .map(line)
                .collect(),
        )
    };

    let (kind, coordinates) = match shape {
        Shape::Point(point) => ("Point", position(&point.0)),
        Shape::MultiPoint(points) => (
            "MultiPoint",
            Value::Array(points.iter().map(|point| position(&point.0)).collect()),
        ),
        Shape::Line(segment) => (
            "LineString",
            json!([position(&segment.start), position(&segment.end)]),
        ),
        Shape::LineString(string) => ("LineString", line(string)),
        Shape::MultiLineString(strings) => (
            "MultiLineString",
            Value::Array(strings.iter().map(line).collect()),
        ),
        Shape::Polygon(polygon) => ("Polygon", rings(polygon)),
        Shape::MultiPolygon(polygons) => (
            "MultiPolygon",
            Value::Array(polygons.iter().map(rings).collect()),
        ),
        Shape::Rect(rect) => ("Polygon", rings(&rect.to_polygon())),
        Shape::Triangle(triangle) => ("Polygon", rings(&triangle.to_polygon())),
        Shape::GeometryCollection(collection) => {
            let mut object = Map::new();
            object.insert("type".into(), "GeometryCollection".into());
            object.insert(
                "geometries".into(),
                Value::Array(collection.iter().map(|g| Value::Object(geojson(g))).collect()),
            );
            return object;
        }
    };

    let mut object = Map::new();
    object.insert("type".into(), kind.into());
    object.insert("coordinates".into(), coordinates);
    object
}

/// Scalar attribute value copied from an upstream payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Scalar JSON values only; null, arrays and objects yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(AttributeValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Integer)
                .or_else(|| n.as_f64().map(AttributeValue::Number)),
            Value::String(s) => Some(AttributeValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Attribute map of a feature.
///
/// Keys are whatever the adapter and upstream provide. The only rewriting is
/// collision avoidance: a pass-through key that is already taken is stored
/// as `upstream_<key>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a canonical key, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert an upstream key, renaming it when it collides. Returns the key
    /// the value was stored under.
    pub fn insert_upstream(&mut self, key: &str, value: AttributeValue) -> String {
        let key = self.free_key(key);
        self.0.insert(key.clone(), value);
        key
    }

    fn free_key(&self, key: &str) -> String {
        if !self.0.contains_key(key) {
            return key.to_string();
        }
        let renamed = format!("upstream_{key}");
        if !self.0.contains_key(&renamed) {
            return renamed;
        }
        (2..)
            .map(|n| format!("upstream_{key}_{n}"))
            .find(|candidate| !self.0.contains_key(candidate))
            .unwrap_or(renamed)
    }

    /// Fold `other` into `self`; equal values are kept once, conflicting
    /// values go through the collision rename.
    pub fn merge(&mut self, other: Attributes) {
        for (key, value) in other.0 {
            match self.0.get(&key) {
                Some(existing) if *existing == value => {}
                Some(_) => {
                    self.insert_upstream(&key, value);
                }
                None => {
                    self.0.insert(key, value);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }
}

/// Feature as produced by an adapter: native geometry only.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    pub id: String,
    pub kind: FeatureKind,
    pub geometry: Geometry,
    pub attributes: Attributes,
}

/// Canonical, coordinate-complete feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    pub id: String,
    pub kind: FeatureKind,
    pub geometry: Geometry,
    pub attributes: Attributes,
    /// Representative point on the RD grid.
    pub rd: RdCoordinate,
    /// Representative point in WGS84.
    pub wgs84: Wgs84Coordinate,
    pub confidence: Confidence,
    /// Upstreams that contributed to this feature, in merge order.
    pub sources: Vec<SourceId>,
}

impl Feature {
    /// Complete a source feature with both coordinate systems.
    ///
    /// Returns `None` when the geometry has no vertex to anchor on.
    pub fn from_source(source: SourceId, feature: SourceFeature) -> Option<Self> {
        let anchor = feature
            .geometry
            .representative_point(feature.kind.anchor_policy())?;
        let rd = anchor.to_rd();
        let wgs84 = anchor.to_wgs84();

        Some(Self {
            id: feature.id,
            kind: feature.kind,
            geometry: feature.geometry,
            attributes: feature.attributes,
            rd: rd.value,
            wgs84: wgs84.value,
            confidence: rd.confidence,
            sources: vec![source],
        })
    }

    /// Fold a feature with the same identifier from another source into this one.
    pub fn absorb(&mut self, other: Feature) {
        self.attributes.merge(other.attributes);
        for source in other.sources {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size)
        ]
    }

    #[test]
    fn test_centroid_of_grid_square() {
        let geometry = Geometry::new(
            CoordinateSystem::Rd,
            square(121_000.0, 487_000.0, 20.0).into(),
        );
        let Some(Coordinate::Rd(point)) = geometry.representative_point(AnchorPolicy::Centroid)
        else {
            panic!("expected RD anchor");
        };
        assert!((point.x - 121_010.0).abs() < 1e-6);
        assert!((point.y - 487_010.0).abs() < 1e-6);
    }

    #[test]
    fn test_multipolygon_centroid_is_area_weighted() {
        let shape: Shape =
            MultiPolygon::new(vec![square(0.0, 0.0, 2.0), square(10.0, 0.0, 1.0)]).into();
        let (x, _) = outer_centroid(&shape).expect("centroid");
        // (1 * 4 + 10.5 * 1) / 5
        assert!((x - 2.9).abs() < 1e-9);
    }

    #[test]
    fn test_centroid_ignores_holes() {
        let mut parcel = square(0.0, 0.0, 10.0);
        parcel.interiors_push(square(0.0, 0.0, 5.0).exterior().clone());
        let (x, y) = outer_centroid(&parcel.into()).expect("centroid");
        assert!((x - 5.0).abs() < 1e-9);
        assert!((y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_ring_falls_back_to_first_vertex() {
        let geometry = Geometry::new(
            CoordinateSystem::Rd,
            polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 6.0), (x: 7.0, y: 7.0)].into(),
        );
        assert_eq!(
            geometry.representative_point(AnchorPolicy::Centroid),
            Some(Coordinate::Rd(RdCoordinate::new(5.0, 5.0)))
        );
    }

    #[test]
    fn test_boundary_anchors_on_first_ring_vertex() {
        let geometry = Geometry::new(CoordinateSystem::Rd, square(3.0, 4.0, 2.0).into());
        assert_eq!(
            geometry.representative_point(AnchorPolicy::FirstVertex),
            Some(Coordinate::Rd(RdCoordinate::new(3.0, 4.0)))
        );
    }

    #[test]
    fn test_wgs84_positions_are_lon_lat() {
        let geometry = Geometry::new(CoordinateSystem::Wgs84, Point::new(4.9, 52.37).into());
        assert_eq!(
            geometry.representative_point(AnchorPolicy::Point),
            Some(Coordinate::Wgs84(Wgs84Coordinate::new(52.37, 4.9)))
        );
    }

    #[test]
    fn test_attribute_value_from_json() {
        assert_eq!(
            AttributeValue::from_json(&json!(1998)),
            Some(AttributeValue::Integer(1998))
        );
        assert_eq!(
            AttributeValue::from_json(&json!(2.5)),
            Some(AttributeValue::Number(2.5))
        );
        assert_eq!(AttributeValue::from_json(&json!(null)), None);
        assert_eq!(AttributeValue::from_json(&json!(["a"])), None);
    }

    #[test]
    fn test_upstream_key_collision_is_renamed() {
        let mut attributes = Attributes::new();
        attributes.insert("name", "Amsterdam");
        let first = attributes.insert_upstream("name", "Gemeente Amsterdam".into());
        let second = attributes.insert_upstream("name", "other".into());

        assert_eq!(first, "upstream_name");
        assert_eq!(second, "upstream_name_2");
        assert_eq!(attributes.get("name"), Some(&AttributeValue::from("Amsterdam")));
    }

    #[test]
    fn test_merge_keeps_equal_values_once() {
        let mut left = Attributes::new();
        left.insert("pand_id", "0363100012345678");
        left.insert("status", "in gebruik");

        let mut right = Attributes::new();
        right.insert("pand_id", "0363100012345678");
        right.insert("status", "verbouwing");
        right.insert("construction_year", 1912_i64);

        left.merge(right);
        assert_eq!(left.len(), 4);
        assert_eq!(
            left.get("upstream_status"),
            Some(&AttributeValue::from("verbouwing"))
        );
    }

    #[test]
    fn test_feature_from_source_backfills_both_systems() {
        let source = SourceFeature {
            id: "adr-1".into(),
            kind: FeatureKind::Address,
            geometry: Geometry::rd_point(RdCoordinate::new(121_000.0, 487_000.0)),
            attributes: Attributes::new(),
        };
        let feature = Feature::from_source(SourceId::LocationSearch, source).expect("anchor");
        assert_eq!(feature.rd, RdCoordinate::new(121_000.0, 487_000.0));
        assert!((feature.wgs84.lat - 52.369_83).abs() < 1e-4);
        assert_eq!(feature.confidence, Confidence::WithinEnvelope);
        assert_eq!(feature.sources, vec![SourceId::LocationSearch]);
    }

    #[test]
    fn test_feature_serializes_geometry_as_geojson() {
        let geometry = Geometry::rd_point(RdCoordinate::new(1.0, 2.0));
        let json = serde_json::to_value(&geometry).unwrap();
        assert_eq!(json["system"], "rd");
        assert_eq!(json["type"], "Point");
        assert_eq!(json["coordinates"], json!([1.0, 2.0]));
    }

    #[test]
    fn test_polygon_serializes_closed_rings() {
        let geometry = Geometry::new(CoordinateSystem::Rd, square(0.0, 0.0, 1.0).into());
        let json = serde_json::to_value(&geometry).unwrap();
        assert_eq!(json["type"], "Polygon");
        assert_eq!(
            json["coordinates"],
            json!([[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]])
        );
    }
}
