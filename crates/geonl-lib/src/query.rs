//! Normalized request types handed to the adapters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coords::{Coordinate, CoordinateSystem, RdCoordinate, Wgs84Coordinate};
use crate::error::{Error, Result};

/// Rectangle given by two opposite corners in the same system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lower: Coordinate,
    pub upper: Coordinate,
}

impl BoundingBox {
    pub fn rd(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            lower: Coordinate::Rd(RdCoordinate::new(min_x, min_y)),
            upper: Coordinate::Rd(RdCoordinate::new(max_x, max_y)),
        }
    }

    /// Re-express both corners in `system` and restore min/max ordering.
    pub fn in_system(&self, system: CoordinateSystem) -> BoundingBox {
        let a = self.lower.in_system(system);
        let b = self.upper.in_system(system);
        match (a, b) {
            (Coordinate::Rd(a), Coordinate::Rd(b)) => BoundingBox::rd(
                a.x.min(b.x),
                a.y.min(b.y),
                a.x.max(b.x),
                a.y.max(b.y),
            ),
            (Coordinate::Wgs84(a), Coordinate::Wgs84(b)) => BoundingBox {
                lower: Coordinate::Wgs84(Wgs84Coordinate::new(
                    a.lat.min(b.lat),
                    a.lon.min(b.lon),
                )),
                upper: Coordinate::Wgs84(Wgs84Coordinate::new(
                    a.lat.max(b.lat),
                    a.lon.max(b.lon),
                )),
            },
            _ => *self,
        }
    }

    /// `[min_x, min_y, max_x, max_y]` when both corners are on the RD grid.
    pub fn rd_extent(&self) -> Option<[f64; 4]> {
        match (self.lower, self.upper) {
            (Coordinate::Rd(a), Coordinate::Rd(b)) => Some([a.x, a.y, b.x, b.y]),
            _ => None,
        }
    }
}

/// What a single adapter call should look for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum SourceQuery {
    /// Free-text search.
    Text { text: String },
    /// Everything inside a rectangle.
    BoundingBox { bbox: BoundingBox },
    /// Everything at (or within `radius_m` of) a point.
    Point { at: Coordinate, radius_m: Option<f64> },
    /// Lookup by upstream identifier (BAG id, parcel id).
    Identifier { id: String },
    /// BAG lookup by postal code and house number.
    PostalAddress { postal_code: String, house_number: u32 },
    /// Unfiltered listing, bounded by the upstream's page size.
    Any,
}

impl SourceQuery {
    pub fn text(text: impl Into<String>) -> Self {
        SourceQuery::Text { text: text.into() }
    }

    pub fn point(at: impl Into<Coordinate>, radius_m: Option<f64>) -> Self {
        SourceQuery::Point {
            at: at.into(),
            radius_m,
        }
    }

    pub fn identifier(id: impl Into<String>) -> Self {
        SourceQuery::Identifier { id: id.into() }
    }

    /// Postal codes are normalized to `1234AB`.
    pub fn postal_address(postal_code: &str, house_number: u32) -> Self {
        SourceQuery::PostalAddress {
            postal_code: postal_code
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
            house_number,
        }
    }

    /// Reject queries no upstream could answer.
    pub fn validate(&self) -> Result<()> {
        match self {
            SourceQuery::Text { text } if text.trim().is_empty() => {
                Err(Error::InvalidQuery("search text cannot be empty".into()))
            }
            SourceQuery::Identifier { id } if id.trim().is_empty() => {
                Err(Error::InvalidQuery("identifier cannot be empty".into()))
            }
            SourceQuery::Point { at, radius_m } => {
                if !coordinate_is_finite(at) {
                    return Err(Error::InvalidQuery("point must be finite".into()));
                }
                match radius_m {
                    Some(r) if !r.is_finite() || *r <= 0.0 => {
                        Err(Error::InvalidQuery("radius must be positive".into()))
                    }
                    _ => Ok(()),
                }
            }
            SourceQuery::BoundingBox { bbox } => {
                if coordinate_is_finite(&bbox.lower) && coordinate_is_finite(&bbox.upper) {
                    Ok(())
                } else {
                    Err(Error::InvalidQuery("bounding box must be finite".into()))
                }
            }
            SourceQuery::PostalAddress {
                postal_code,
                house_number,
            } => {
                if !is_postal_code(postal_code) {
                    return Err(Error::InvalidQuery(format!(
                        "'{postal_code}' is not a Dutch postal code (expected 1234AB)"
                    )));
                }
                if *house_number == 0 {
                    return Err(Error::InvalidQuery("house number must be positive".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-express any coordinates of the query in `system`.
    pub fn in_system(&self, system: CoordinateSystem) -> SourceQuery {
        match self {
            SourceQuery::Point { at, radius_m } => SourceQuery::Point {
                at: at.in_system(system),
                radius_m: *radius_m,
            },
            SourceQuery::BoundingBox { bbox } => SourceQuery::BoundingBox {
                bbox: bbox.in_system(system),
            },
            other => other.clone(),
        }
    }

    /// The query point when it is expressed on the RD grid.
    pub fn rd_point(&self) -> Option<(RdCoordinate, Option<f64>)> {
        match self {
            SourceQuery::Point {
                at: Coordinate::Rd(rd),
                radius_m,
            } => Some((*rd, *radius_m)),
            _ => None,
        }
    }
}

fn coordinate_is_finite(coordinate: &Coordinate) -> bool {
    match coordinate {
        Coordinate::Rd(c) => c.x.is_finite() && c.y.is_finite(),
        Coordinate::Wgs84(c) => c.lat.is_finite() && c.lon.is_finite(),
    }
}

fn is_postal_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 6
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4..].iter().all(u8::is_ascii_uppercase)
}

macro_rules! upstream_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $wire)] $variant),+
        }

        impl $name {
            /// Value as the upstream spells it.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($wire $(| $alias)* => Ok($name::$variant),)+
                    other => Err(Error::InvalidQuery(format!(
                        "unknown {} '{}'; valid: {}",
                        $what,
                        other,
                        [$($wire),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

upstream_enum! {
    /// Cadastral map layer.
    #[derive(Default)]
    CadastralLayer, "cadastral layer" {
        #[default]
        Parcel => "perceel" | "parcel",
        Boundary => "grens" | "boundary",
    }
}

upstream_enum! {
    /// Noise source modelled by the 3D noise service.
    #[derive(Default)]
    NoiseType, "noise type" {
        #[default]
        Road => "wegverkeerslawaai" | "road",
        Rail => "railverkeerslawaai" | "rail",
        Industry => "industrielawaai" | "industry",
    }
}

upstream_enum! {
    /// Topography base map.
    #[derive(Default)]
    TopographyLayer, "topography layer" {
        #[default]
        Bgt => "bgt",
        Top10nl => "top10nl",
    }
}

upstream_enum! {
    /// Administrative level of a boundary.
    #[derive(Default)]
    AdminLevel, "administrative level" {
        #[default]
        Municipality => "gemeente" | "municipality",
        Province => "provincie" | "province",
        WaterBoard => "waterschap" | "water_board",
    }
}

impl CadastralLayer {
    pub fn type_name(&self) -> &'static str {
        match self {
            CadastralLayer::Parcel => "kadastralekaart:Perceel",
            CadastralLayer::Boundary => "kadastralekaart:KadastraleGrens",
        }
    }
}

impl TopographyLayer {
    pub fn path(&self) -> &'static str {
        match self {
            TopographyLayer::Bgt => "/lv/bgt/wfs/v1_0",
            TopographyLayer::Top10nl => "/brt/top10nl/wfs/v1_0",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TopographyLayer::Bgt => "bgt:bgt_all",
            TopographyLayer::Top10nl => "top10nl:top10nl_all",
        }
    }
}

impl AdminLevel {
    pub fn type_name(&self) -> &'static str {
        match self {
            AdminLevel::Municipality => "bestuurlijkegebieden:gemeenten",
            AdminLevel::Province => "bestuurlijkegebieden:provincies",
            AdminLevel::WaterBoard => "bestuurlijkegebieden:waterschappen",
        }
    }
}

/// Upstream-specific parameters travelling next to the query. Each adapter
/// reads only the fields that concern it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceParams {
    /// Locatieserver `type` filter (adres, perceel, postcode, gemeente, ...).
    pub location_type: Option<String>,
    pub cadastral_layer: CadastralLayer,
    pub noise_type: NoiseType,
    pub topography_layer: TopographyLayer,
    pub admin_level: AdminLevel,
    /// Page size override; adapters fall back to their own default.
    pub limit: Option<u32>,
}

impl SourceParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(kind) = &self.location_type {
            if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                return Err(Error::InvalidQuery(format!(
                    "location type '{kind}' must be a lowercase word"
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidQuery("limit must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postal_address_is_normalized() {
        let query = SourceQuery::postal_address("1012 js", 1);
        assert_eq!(
            query,
            SourceQuery::PostalAddress {
                postal_code: "1012JS".into(),
                house_number: 1
            }
        );
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_invalid_queries_are_rejected() {
        assert!(SourceQuery::text("  ").validate().is_err());
        assert!(SourceQuery::postal_address("ABCDEF", 1).validate().is_err());
        assert!(SourceQuery::postal_address("1012JS", 0).validate().is_err());
        assert!(SourceQuery::point(RdCoordinate::new(1.0, 2.0), Some(-5.0))
            .validate()
            .is_err());
        assert!(SourceQuery::point(RdCoordinate::new(f64::NAN, 2.0), None)
            .validate()
            .is_err());
    }

    #[test]
    fn test_point_is_reprojected_to_rd() {
        let query = SourceQuery::point(Wgs84Coordinate::new(52.369_828, 4.887_973), Some(50.0));
        let (rd, radius) = query
            .in_system(CoordinateSystem::Rd)
            .rd_point()
            .expect("rd point");
        assert!(rd.distance_to(RdCoordinate::new(121_000.0, 487_000.0)) < 1.0);
        assert_eq!(radius, Some(50.0));
        assert!(query.rd_point().is_none());
    }

    #[test]
    fn test_bbox_reprojection_keeps_ordering() {
        let bbox = BoundingBox {
            lower: Coordinate::Wgs84(Wgs84Coordinate::new(52.40, 4.95)),
            upper: Coordinate::Wgs84(Wgs84Coordinate::new(52.35, 4.85)),
        };
        let [min_x, min_y, max_x, max_y] =
            bbox.in_system(CoordinateSystem::Rd).rd_extent().expect("rd");
        assert!(min_x < max_x);
        assert!(min_y < max_y);
    }

    #[test]
    fn test_upstream_enums_parse_dutch_and_english() {
        assert_eq!("wegverkeerslawaai".parse::<NoiseType>().unwrap(), NoiseType::Road);
        assert_eq!("RAIL".parse::<NoiseType>().unwrap(), NoiseType::Rail);
        assert_eq!("provincie".parse::<AdminLevel>().unwrap(), AdminLevel::Province);
        assert_eq!("top10nl".parse::<TopographyLayer>().unwrap(), TopographyLayer::Top10nl);
        assert_eq!("grens".parse::<CadastralLayer>().unwrap(), CadastralLayer::Boundary);

        let err = "vliegverkeer".parse::<NoiseType>().unwrap_err();
        assert!(err.to_string().contains("wegverkeerslawaai"));
    }

    #[test]
    fn test_location_type_must_be_a_word() {
        let params = SourceParams {
            location_type: Some("adres OR 1=1".into()),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
