//! Conversion between the Dutch national grid (RD, EPSG:28992) and WGS84.
//!
//! RD is not a conformal projection of the ellipsoid we can invert
//! analytically, so both directions use a fixed-origin polynomial series:
//! offsets from the Amersfoort origin are scaled, every tabulated term
//! contributes `coefficient * a^p * b^q`, and the sum is added back to the
//! origin in the target system.
//!
//! The forward and inverse tables are two independently fitted
//! approximations. Composing them is therefore not exact, but inside the
//! coverage envelope the round trip stays well below one centimetre.
//!
//! ```text
//! RD  -> WGS84:  dX = (X - X0) * 1e-5,  dY = (Y - Y0) * 1e-5
//!                lat = lat0 + sum(K[p,q] * dX^p * dY^q) / 3600
//!                lon = lon0 + sum(L[p,q] * dX^p * dY^q) / 3600
//! WGS84 -> RD:   dLat = 0.36 * (lat - lat0),  dLon = 0.36 * (lon - lon0)
//!                X = X0 + sum(R[p,q] * dLat^p * dLon^q)
//!                Y = Y0 + sum(S[p,q] * dLat^p * dLon^q)
//! ```
//!
//! Both functions are total. Non-finite input propagates into the output,
//! and points outside the envelope are still converted but flagged with
//! [`Confidence::OutsideEnvelope`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// RD false origin (Amersfoort) in grid metres.
const X0: f64 = 155_000.0;
const Y0: f64 = 463_000.0;

/// WGS84 position of the RD origin in decimal degrees.
const LAT0: f64 = 52.155_174_40;
const LON0: f64 = 5.387_206_21;

/// One series term: exponent of the first offset, exponent of the second
/// offset, coefficient.
type Term = (i32, i32, f64);

/// Latitude terms in arc seconds, indexed by powers of (dX, dY).
const LAT_TERMS: [Term; 11] = [
    (0, 1, 3235.653_89),
    (2, 0, -32.582_97),
    (0, 2, -0.247_50),
    (2, 1, -0.849_78),
    (0, 3, -0.065_50),
    (2, 2, -0.017_09),
    (1, 0, -0.007_38),
    (4, 0, 0.005_30),
    (2, 3, -0.000_39),
    (4, 1, 0.000_33),
    (1, 1, -0.000_12),
];

/// Longitude terms in arc seconds, indexed by powers of (dX, dY).
const LON_TERMS: [Term; 12] = [
    (1, 0, 5260.529_16),
    (1, 1, 105.946_84),
    (1, 2, 2.456_56),
    (3, 0, -0.818_85),
    (1, 3, 0.055_94),
    (3, 1, -0.056_07),
    (0, 1, 0.011_99),
    (3, 2, -0.002_56),
    (1, 4, 0.001_28),
    (0, 2, 0.000_22),
    (2, 0, -0.000_22),
    (5, 0, 0.000_26),
];

/// Easting terms in metres, indexed by powers of (dLat, dLon).
const X_TERMS: [Term; 9] = [
    (0, 1, 190_094.945),
    (1, 1, -11_832.228),
    (2, 1, -114.221),
    (0, 3, -32.391),
    (1, 0, -0.705),
    (3, 1, -2.340),
    (1, 3, -0.608),
    (0, 2, -0.008),
    (2, 3, 0.148),
];

/// Northing terms in metres, indexed by powers of (dLat, dLon).
const Y_TERMS: [Term; 10] = [
    (1, 0, 309_056.544),
    (0, 2, 3638.893),
    (2, 0, 73.077),
    (1, 2, -157.984),
    (3, 0, 59.788),
    (0, 1, 0.433),
    (2, 2, -6.439),
    (1, 1, -0.032),
    (0, 4, 0.092),
    (1, 4, -0.054),
];

/// Region of the RD grid inside which conversion accuracy is guaranteed.
pub const RD_ENVELOPE: Envelope = Envelope {
    min_x: 0.0,
    max_x: 280_000.0,
    min_y: 300_000.0,
    max_y: 625_000.0,
};

/// Axis-aligned rectangle in RD grid metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Whether `point` lies inside the envelope. NaN is never inside.
    pub fn contains(&self, point: RdCoordinate) -> bool {
        (self.min_x..=self.max_x).contains(&point.x) && (self.min_y..=self.max_y).contains(&point.y)
    }
}

/// Reference system a coordinate pair is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSystem {
    /// Dutch national grid (Rijksdriehoekstelsel), EPSG:28992.
    Rd,
    /// Geodetic WGS84 latitude/longitude, EPSG:4326.
    Wgs84,
}

impl CoordinateSystem {
    pub fn epsg(self) -> u32 {
        match self {
            CoordinateSystem::Rd => 28992,
            CoordinateSystem::Wgs84 => 4326,
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Point on the RD grid, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RdCoordinate {
    pub x: f64,
    pub y: f64,
}

impl RdCoordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Planar distance in metres.
    pub fn distance_to(&self, other: RdCoordinate) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn in_envelope(&self) -> bool {
        RD_ENVELOPE.contains(*self)
    }
}

/// Geodetic WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wgs84Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Wgs84Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A coordinate pair tagged with its reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum Coordinate {
    Rd(RdCoordinate),
    Wgs84(Wgs84Coordinate),
}

impl Coordinate {
    pub fn system(&self) -> CoordinateSystem {
        match self {
            Coordinate::Rd(_) => CoordinateSystem::Rd,
            Coordinate::Wgs84(_) => CoordinateSystem::Wgs84,
        }
    }

    /// Express this coordinate on the RD grid, converting if needed.
    pub fn to_rd(&self) -> Transformed<RdCoordinate> {
        match *self {
            Coordinate::Rd(rd) => Transformed::new(rd, Confidence::for_rd(rd)),
            Coordinate::Wgs84(wgs) => to_rd(wgs),
        }
    }

    /// Express this coordinate in WGS84, converting if needed.
    pub fn to_wgs84(&self) -> Transformed<Wgs84Coordinate> {
        match *self {
            Coordinate::Rd(rd) => to_wgs84(rd),
            Coordinate::Wgs84(wgs) => {
                let confidence = to_rd(wgs).confidence;
                Transformed::new(wgs, confidence)
            }
        }
    }

    /// Re-express the coordinate in `system`.
    pub fn in_system(&self, system: CoordinateSystem) -> Coordinate {
        match system {
            CoordinateSystem::Rd => Coordinate::Rd(self.to_rd().value),
            CoordinateSystem::Wgs84 => Coordinate::Wgs84(self.to_wgs84().value),
        }
    }
}

impl From<RdCoordinate> for Coordinate {
    fn from(value: RdCoordinate) -> Self {
        Coordinate::Rd(value)
    }
}

impl From<Wgs84Coordinate> for Coordinate {
    fn from(value: Wgs84Coordinate) -> Self {
        Coordinate::Wgs84(value)
    }
}

/// Whether a converted point carries the accuracy guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    WithinEnvelope,
    OutsideEnvelope,
}

impl Confidence {
    fn for_rd(point: RdCoordinate) -> Self {
        if point.in_envelope() {
            Confidence::WithinEnvelope
        } else {
            Confidence::OutsideEnvelope
        }
    }

    pub fn is_guaranteed(self) -> bool {
        self == Confidence::WithinEnvelope
    }
}

/// Result of a conversion together with its confidence flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transformed<T> {
    pub value: T,
    pub confidence: Confidence,
}

impl<T> Transformed<T> {
    fn new(value: T, confidence: Confidence) -> Self {
        Self { value, confidence }
    }
}

fn series(terms: &[Term], a: f64, b: f64) -> f64 {
    terms
        .iter()
        .map(|&(p, q, coefficient)| coefficient * a.powi(p) * b.powi(q))
        .sum()
}

/// Convert an RD grid point to WGS84.
pub fn to_wgs84(rd: RdCoordinate) -> Transformed<Wgs84Coordinate> {
    let dx = (rd.x - X0) * 1e-5;
    let dy = (rd.y - Y0) * 1e-5;

    let lat = LAT0 + series(&LAT_TERMS, dx, dy) / 3600.0;
    let lon = LON0 + series(&LON_TERMS, dx, dy) / 3600.0;

    Transformed::new(Wgs84Coordinate { lat, lon }, Confidence::for_rd(rd))
}

/// Convert a WGS84 point to the RD grid.
///
/// Confidence is judged on the produced grid point.
pub fn to_rd(wgs: Wgs84Coordinate) -> Transformed<RdCoordinate> {
    let dlat = 0.36 * (wgs.lat - LAT0);
    let dlon = 0.36 * (wgs.lon - LON0);

    let x = X0 + series(&X_TERMS, dlat, dlon);
    let y = Y0 + series(&Y_TERMS, dlat, dlon);
    let rd = RdCoordinate { x, y };

    Transformed::new(rd, Confidence::for_rd(rd))
}

/// RD origin, exposed for coverage metadata.
pub fn rd_origin() -> (RdCoordinate, Wgs84Coordinate) {
    (
        RdCoordinate { x: X0, y: Y0 },
        Wgs84Coordinate {
            lat: LAT0,
            lon: LON0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Metres per degree of latitude, good enough to express geodetic error.
    const METRES_PER_DEGREE: f64 = 111_320.0;

    fn geodetic_error_m(a: Wgs84Coordinate, b: Wgs84Coordinate) -> f64 {
        let dlat = (a.lat - b.lat) * METRES_PER_DEGREE;
        let dlon = (a.lon - b.lon) * METRES_PER_DEGREE * a.lat.to_radians().cos();
        dlat.hypot(dlon)
    }

    #[test]
    fn test_origin_maps_to_origin() {
        let (rd, wgs) = rd_origin();
        let out = to_wgs84(rd).value;
        assert!((out.lat - wgs.lat).abs() < 1e-12);
        assert!((out.lon - wgs.lon).abs() < 1e-12);

        let back = to_rd(wgs).value;
        assert!(back.distance_to(rd) < 1e-9);
    }

    #[test]
    fn test_amsterdam_fixture() {
        let converted = to_wgs84(RdCoordinate::new(121_000.0, 487_000.0));
        assert!((converted.value.lat - 52.369_828).abs() < 1e-5);
        assert!((converted.value.lon - 4.887_973).abs() < 1e-5);
        assert_eq!(converted.confidence, Confidence::WithinEnvelope);
    }

    #[test]
    fn test_grid_round_trip_within_one_centimetre() {
        let mut worst: f64 = 0.0;
        for x in (0..=280_000).step_by(5_000) {
            for y in (300_000..=625_000).step_by(5_000) {
                let original = RdCoordinate::new(x as f64, y as f64);
                let back = to_rd(to_wgs84(original).value).value;
                worst = worst.max(original.distance_to(back));
            }
        }
        assert!(worst <= 0.01, "worst grid round-trip error {worst} m");
    }

    #[test]
    fn test_geodetic_round_trip_within_one_centimetre() {
        let mut worst: f64 = 0.0;
        let mut checked = 0;
        for i in 0..=40 {
            for j in 0..=50 {
                let original = Wgs84Coordinate::new(50.7 + i as f64 * 0.07, 3.3 + j as f64 * 0.08);
                let grid = to_rd(original);
                if !grid.confidence.is_guaranteed() {
                    continue;
                }
                let back = to_wgs84(grid.value).value;
                worst = worst.max(geodetic_error_m(original, back));
                checked += 1;
            }
        }
        assert!(checked > 500);
        assert!(worst <= 0.01, "worst geodetic round-trip error {worst} m");
    }

    #[test]
    fn test_outside_envelope_still_converts() {
        let far = RdCoordinate::new(-50_000.0, 700_000.0);
        let converted = to_wgs84(far);
        assert_eq!(converted.confidence, Confidence::OutsideEnvelope);
        assert!(converted.value.lat.is_finite());
        assert!(converted.value.lon.is_finite());
    }

    #[test]
    fn test_non_finite_input_propagates() {
        let converted = to_wgs84(RdCoordinate::new(f64::NAN, 463_000.0));
        assert!(converted.value.lat.is_nan() || converted.value.lon.is_nan());
        assert_eq!(converted.confidence, Confidence::OutsideEnvelope);

        let converted = to_rd(Wgs84Coordinate::new(52.0, f64::INFINITY));
        assert!(!converted.value.x.is_finite());
    }

    #[test]
    fn test_tagged_coordinate_conversion() {
        let rd = Coordinate::Rd(RdCoordinate::new(121_000.0, 487_000.0));
        let wgs = rd.in_system(CoordinateSystem::Wgs84);
        assert_eq!(wgs.system(), CoordinateSystem::Wgs84);

        let back = wgs.to_rd().value;
        assert!(back.distance_to(RdCoordinate::new(121_000.0, 487_000.0)) < 0.01);
    }

    #[test]
    fn test_system_display() {
        assert_eq!(CoordinateSystem::Rd.to_string(), "EPSG:28992");
        assert_eq!(CoordinateSystem::Wgs84.to_string(), "EPSG:4326");
    }
}
