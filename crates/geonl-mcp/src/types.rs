//! Type definitions for MCP tool inputs and outputs
//!
//! Inputs derive `JsonSchema` so `tools/list` can advertise them; outputs are
//! what the tool result text holds.

use geonl_lib::{
    AggregationResult, Confidence, Coordinate, Feature, Outcome, SourceReport,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ============================================================================
// TOOL INPUTS
// ============================================================================

/// Input for the search_location tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchLocationInput {
    /// Free text: address, place, postal code or parcel designation (required)
    pub query: String,

    /// Restrict results to one type: adres, perceel, postcode, gemeente,
    /// woonplaats, weg, ...
    #[serde(default)]
    pub filter_type: Option<String>,
}

/// Input for the get_bag_address tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BagAddressInput {
    /// BAG nummeraanduiding identifier (16 digits)
    #[serde(default)]
    pub bag_id: Option<String>,

    /// Postal code such as "1012JS"; needs house_number
    #[serde(default)]
    pub postal_code: Option<String>,

    /// House number; needs postal_code
    #[serde(default)]
    pub house_number: Option<u32>,
}

/// Input for the get_cadastral_parcel tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CadastralParcelInput {
    /// Cadastral parcel identifier
    #[serde(default)]
    pub parcel_id: Option<String>,

    /// RD x coordinate in metres
    #[serde(default)]
    pub x: Option<f64>,

    /// RD y coordinate in metres
    #[serde(default)]
    pub y: Option<f64>,

    /// Map layer: "perceel" or "grens" (default: "perceel")
    #[serde(default = "default_cadastral_layer")]
    pub layer: String,
}

/// Input for the get_3d_building_data tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BuildingDataInput {
    /// RD x coordinate in metres (required)
    pub x: f64,

    /// RD y coordinate in metres (required)
    pub y: f64,

    /// Search radius in metres (default: 100)
    #[serde(default = "default_building_radius")]
    pub radius: f64,
}

/// Input for the get_noise_data tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NoiseDataInput {
    /// RD x coordinate in metres (required)
    pub x: f64,

    /// RD y coordinate in metres (required)
    pub y: f64,

    /// wegverkeerslawaai, railverkeerslawaai or industrielawaai
    /// (default: "wegverkeerslawaai")
    #[serde(default = "default_noise_type")]
    pub noise_type: String,
}

/// Input for the get_topography tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TopographyInput {
    /// RD x coordinate in metres (required)
    pub x: f64,

    /// RD y coordinate in metres (required)
    pub y: f64,

    /// Search radius in metres (default: 500)
    #[serde(default = "default_topography_radius")]
    pub radius: f64,

    /// Base map: "bgt" or "top10nl" (default: "bgt")
    #[serde(default = "default_topography_layer")]
    pub layer: String,
}

/// Input for the get_administrative_boundaries tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AdministrativeBoundariesInput {
    /// Level: gemeente, provincie or waterschap (required)
    pub admin_type: String,

    /// Name filter, matched case-insensitively as a substring
    #[serde(default)]
    pub name: Option<String>,
}

/// Input for the validate_coordinates tool
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ValidateCoordinatesInput {
    /// RD x coordinate in metres
    #[serde(default)]
    pub x: Option<f64>,

    /// RD y coordinate in metres
    #[serde(default)]
    pub y: Option<f64>,

    /// WGS84 latitude in degrees
    #[serde(default)]
    pub lat: Option<f64>,

    /// WGS84 longitude in degrees
    #[serde(default)]
    pub lon: Option<f64>,
}

fn default_cadastral_layer() -> String {
    "perceel".to_string()
}

fn default_building_radius() -> f64 {
    100.0
}

fn default_noise_type() -> String {
    "wegverkeerslawaai".to_string()
}

fn default_topography_radius() -> f64 {
    500.0
}

fn default_topography_layer() -> String {
    "bgt".to_string()
}

// ============================================================================
// TOOL OUTPUTS
// ============================================================================

/// Output of every upstream-backed tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub tool: String,
    pub outcome: Outcome,
    pub features: Vec<Feature>,
    pub sources: Vec<SourceReport>,
}

impl ToolOutput {
    pub fn new(tool: &str, result: AggregationResult) -> Self {
        Self {
            tool: tool.to_string(),
            outcome: result.outcome,
            features: result.features,
            sources: result.sources,
        }
    }
}

/// Output from the validate_coordinates tool
#[derive(Debug, Clone, Serialize)]
pub struct CoordinateReport {
    pub input: Coordinate,
    pub output: Coordinate,
    pub validation: CoordinateValidation,
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinateValidation {
    /// Whether the point lies inside the RD coverage envelope
    pub in_bounds: bool,
    pub confidence: Confidence,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_apply() {
        let input: TopographyInput =
            serde_json::from_value(json!({"x": 121000.0, "y": 487000.0})).unwrap();
        assert_eq!(input.radius, 500.0);
        assert_eq!(input.layer, "bgt");

        let input: NoiseDataInput = serde_json::from_value(json!({"x": 1.0, "y": 2.0})).unwrap();
        assert_eq!(input.noise_type, "wegverkeerslawaai");

        let input: CadastralParcelInput = serde_json::from_value(json!({})).unwrap();
        assert_eq!(input.layer, "perceel");
    }

    #[test]
    fn test_required_fields_enforced() {
        let missing = serde_json::from_value::<AdministrativeBoundariesInput>(json!({"name": "Utrecht"}));
        assert!(missing.is_err());
    }
}
