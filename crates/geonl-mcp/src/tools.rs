//! MCP tool implementations
//!
//! Seven tools route to the aggregator, one per upstream intent:
//! - search_location: Locatieserver free-text search
//! - get_bag_address: BAG address by id or postal code + house number
//! - get_cadastral_parcel: cadastral parcel by id or RD point
//! - get_3d_building_data: building heights joined with BAG buildings
//! - get_noise_data: modelled noise levels at an RD point
//! - get_topography: BGT / TOP10NL objects around an RD point
//! - get_administrative_boundaries: municipalities, provinces, water boards
//!
//! validate_coordinates is answered by the coordinate transformer alone.

use std::str::FromStr;

use geonl_lib::{
    AdminLevel, AggregateRequest, Aggregator, CadastralLayer, CancellationToken, Coordinate,
    NoiseType, Outcome, RdCoordinate, SourceParams, SourceQuery, ToolIntent, TopographyLayer,
    Wgs84Coordinate,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::types::*;
use crate::Error;

pub const SEARCH_LOCATION: &str = "search_location";
pub const GET_BAG_ADDRESS: &str = "get_bag_address";
pub const GET_CADASTRAL_PARCEL: &str = "get_cadastral_parcel";
pub const GET_3D_BUILDING_DATA: &str = "get_3d_building_data";
pub const GET_NOISE_DATA: &str = "get_noise_data";
pub const GET_TOPOGRAPHY: &str = "get_topography";
pub const GET_ADMINISTRATIVE_BOUNDARIES: &str = "get_administrative_boundaries";
pub const VALIDATE_COORDINATES: &str = "validate_coordinates";

/// Tool names in the order `tools/list` reports them.
pub const TOOL_NAMES: [&str; 8] = [
    SEARCH_LOCATION,
    GET_BAG_ADDRESS,
    GET_CADASTRAL_PARCEL,
    GET_3D_BUILDING_DATA,
    GET_NOISE_DATA,
    GET_TOPOGRAPHY,
    GET_ADMINISTRATIVE_BOUNDARIES,
    VALIDATE_COORDINATES,
];

const TRANSFORM_SOURCE: &str = "RD polynomial approximation (EPSG:28992 <-> EPSG:4326)";

/// Descriptors for `tools/list`, with JSON schemas generated from the input types.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        definition::<SearchLocationInput>(
            SEARCH_LOCATION,
            "Search Dutch addresses, places, postal codes and parcels by free text (PDOK Locatieserver).",
        ),
        definition::<BagAddressInput>(
            GET_BAG_ADDRESS,
            "Look up a BAG address by identifier or by postal code and house number.",
        ),
        definition::<CadastralParcelInput>(
            GET_CADASTRAL_PARCEL,
            "Get cadastral parcels by parcel id or at an RD coordinate.",
        ),
        definition::<BuildingDataInput>(
            GET_3D_BUILDING_DATA,
            "Get building heights around an RD coordinate, joined with BAG building data.",
        ),
        definition::<NoiseDataInput>(
            GET_NOISE_DATA,
            "Get modelled road, rail or industry noise levels at an RD coordinate.",
        ),
        definition::<TopographyInput>(
            GET_TOPOGRAPHY,
            "Get BGT or TOP10NL topographic objects around an RD coordinate.",
        ),
        definition::<AdministrativeBoundariesInput>(
            GET_ADMINISTRATIVE_BOUNDARIES,
            "List municipalities, provinces or water boards, optionally filtered by name.",
        ),
        definition::<ValidateCoordinatesInput>(
            VALIDATE_COORDINATES,
            "Convert between RD (EPSG:28992) and WGS84 and report whether the point is inside the RD coverage area.",
        ),
    ]
}

fn definition<T: schemars::JsonSchema>(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": schemars::schema_for!(T),
    })
}

/// Run the tool called `name` and serialize its output.
pub async fn call_tool(
    aggregator: &Aggregator,
    name: &str,
    arguments: Value,
    cancel: &CancellationToken,
) -> crate::Result<Value> {
    debug!(tool = name, "calling tool");
    match name {
        SEARCH_LOCATION => {
            to_value(SearchLocationTool::execute(aggregator, parse_args(arguments)?, cancel).await?)
        }
        GET_BAG_ADDRESS => {
            to_value(BagAddressTool::execute(aggregator, parse_args(arguments)?, cancel).await?)
        }
        GET_CADASTRAL_PARCEL => to_value(
            CadastralParcelTool::execute(aggregator, parse_args(arguments)?, cancel).await?,
        ),
        GET_3D_BUILDING_DATA => {
            to_value(BuildingDataTool::execute(aggregator, parse_args(arguments)?, cancel).await?)
        }
        GET_NOISE_DATA => {
            to_value(NoiseDataTool::execute(aggregator, parse_args(arguments)?, cancel).await?)
        }
        GET_TOPOGRAPHY => {
            to_value(TopographyTool::execute(aggregator, parse_args(arguments)?, cancel).await?)
        }
        GET_ADMINISTRATIVE_BOUNDARIES => to_value(
            AdministrativeBoundariesTool::execute(aggregator, parse_args(arguments)?, cancel)
                .await?,
        ),
        VALIDATE_COORDINATES => to_value(ValidateCoordinatesTool::execute(parse_args(arguments)?)?),
        other => Err(Error::unknown_tool(other, &TOOL_NAMES)),
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> crate::Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| Error::invalid_param("arguments", e.to_string()))
}

fn to_value<T: Serialize>(output: T) -> crate::Result<Value> {
    serde_json::to_value(output).map_err(|e| Error::internal(e.to_string()))
}

/// Run an aggregation and turn a total failure into a problem.
async fn aggregate(
    aggregator: &Aggregator,
    tool: &str,
    request: AggregateRequest,
    cancel: &CancellationToken,
) -> crate::Result<ToolOutput> {
    let result = aggregator.aggregate(&request, cancel).await?;
    if result.outcome == Outcome::Failed {
        warn!(tool, "no upstream source answered");
        return Err(Error::all_sources_failed(tool, json!(result.sources)));
    }
    info!(
        tool,
        features = result.features.len(),
        outcome = ?result.outcome,
        "tool call complete"
    );
    Ok(ToolOutput::new(tool, result))
}

fn rd_point(x: f64, y: f64) -> crate::Result<RdCoordinate> {
    if !x.is_finite() {
        return Err(Error::invalid_param("x", "Must be a finite number"));
    }
    if !y.is_finite() {
        return Err(Error::invalid_param("y", "Must be a finite number"));
    }
    Ok(RdCoordinate::new(x, y))
}

fn radius(value: f64) -> crate::Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::invalid_param("radius", "Must be positive"));
    }
    Ok(value)
}

fn parse_choice<T>(param: &str, value: &str) -> crate::Result<T>
where
    T: FromStr<Err = geonl_lib::Error>,
{
    value.parse().map_err(|e: geonl_lib::Error| match e {
        geonl_lib::Error::InvalidQuery(reason) => Error::invalid_param(param, reason),
        other => Error::invalid_param(param, other.to_string()),
    })
}

/// Free-text location search tool handler
pub struct SearchLocationTool;

impl SearchLocationTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: SearchLocationInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        info!("Searching location: {}", input.query);
        Self::validate_input(&input)?;

        let params = SourceParams {
            location_type: input.filter_type.clone(),
            ..Default::default()
        };
        let request = AggregateRequest::new(ToolIntent::SearchLocation, SourceQuery::text(input.query))
            .with_params(params);
        aggregate(aggregator, SEARCH_LOCATION, request, cancel).await
    }

    fn validate_input(input: &SearchLocationInput) -> crate::Result<()> {
        if input.query.trim().is_empty() {
            return Err(Error::invalid_param("query", "Cannot be empty"));
        }
        if let Some(kind) = &input.filter_type {
            if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                return Err(Error::invalid_param(
                    "filter_type",
                    "Must be a lowercase type such as adres, postcode or gemeente",
                ));
            }
        }
        Ok(())
    }
}

/// BAG address lookup tool handler
pub struct BagAddressTool;

impl BagAddressTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: BagAddressInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        let query = Self::query(&input)?;
        info!("BAG address lookup: {:?}", query);
        let request = AggregateRequest::new(ToolIntent::BagAddress, query);
        aggregate(aggregator, GET_BAG_ADDRESS, request, cancel).await
    }

    /// The identifier wins when both forms are given.
    fn query(input: &BagAddressInput) -> crate::Result<SourceQuery> {
        if let Some(id) = input.bag_id.as_deref().map(str::trim) {
            if id.is_empty() {
                return Err(Error::invalid_param("bag_id", "Cannot be empty"));
            }
            if !id.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::invalid_param("bag_id", "Must contain only digits"));
            }
            return Ok(SourceQuery::identifier(id));
        }
        match (&input.postal_code, input.house_number) {
            (Some(postal_code), Some(house_number)) => {
                let query = SourceQuery::postal_address(postal_code, house_number);
                query.validate().map_err(|e| match e {
                    geonl_lib::Error::InvalidQuery(reason) => {
                        Error::invalid_param("postal_code", reason)
                    }
                    other => Error::from(other),
                })?;
                Ok(query)
            }
            _ => Err(Error::invalid_param(
                "bag_id",
                "Provide bag_id, or postal_code together with house_number",
            )),
        }
    }
}

/// Cadastral parcel tool handler
pub struct CadastralParcelTool;

impl CadastralParcelTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: CadastralParcelInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        let layer: CadastralLayer = parse_choice("layer", &input.layer)?;
        let query = match (&input.parcel_id, input.x, input.y) {
            (Some(id), _, _) if !id.trim().is_empty() => SourceQuery::identifier(id.trim()),
            (_, Some(x), Some(y)) => SourceQuery::point(rd_point(x, y)?, None),
            _ => {
                return Err(Error::invalid_param(
                    "parcel_id",
                    "Provide parcel_id, or x and y in RD coordinates",
                ))
            }
        };
        info!("Cadastral lookup: {:?} on layer {}", query, layer);

        let params = SourceParams {
            cadastral_layer: layer,
            ..Default::default()
        };
        let request = AggregateRequest::new(ToolIntent::CadastralParcel, query).with_params(params);
        aggregate(aggregator, GET_CADASTRAL_PARCEL, request, cancel).await
    }
}

/// 3D building tool handler
pub struct BuildingDataTool;

impl BuildingDataTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: BuildingDataInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        info!("Building data around ({}, {}) r={}", input.x, input.y, input.radius);
        let point = rd_point(input.x, input.y)?;
        let radius = radius(input.radius)?;
        let request = AggregateRequest::new(
            ToolIntent::BuildingDetails,
            SourceQuery::point(point, Some(radius)),
        );
        aggregate(aggregator, GET_3D_BUILDING_DATA, request, cancel).await
    }
}

/// Noise tool handler
pub struct NoiseDataTool;

impl NoiseDataTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: NoiseDataInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        info!("Noise data at ({}, {})", input.x, input.y);
        let point = rd_point(input.x, input.y)?;
        let params = SourceParams {
            noise_type: parse_choice::<NoiseType>("noise_type", &input.noise_type)?,
            ..Default::default()
        };
        let request =
            AggregateRequest::new(ToolIntent::Noise, SourceQuery::point(point, None)).with_params(params);
        aggregate(aggregator, GET_NOISE_DATA, request, cancel).await
    }
}

/// Topography tool handler
pub struct TopographyTool;

impl TopographyTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: TopographyInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        info!("Topography around ({}, {}) r={}", input.x, input.y, input.radius);
        let point = rd_point(input.x, input.y)?;
        let radius = radius(input.radius)?;
        let params = SourceParams {
            topography_layer: parse_choice::<TopographyLayer>("layer", &input.layer)?,
            ..Default::default()
        };
        let request = AggregateRequest::new(
            ToolIntent::Topography,
            SourceQuery::point(point, Some(radius)),
        )
        .with_params(params);
        aggregate(aggregator, GET_TOPOGRAPHY, request, cancel).await
    }
}

/// Administrative boundaries tool handler
pub struct AdministrativeBoundariesTool;

impl AdministrativeBoundariesTool {
    pub async fn execute(
        aggregator: &Aggregator,
        input: AdministrativeBoundariesInput,
        cancel: &CancellationToken,
    ) -> crate::Result<ToolOutput> {
        let level: AdminLevel = parse_choice("admin_type", &input.admin_type)?;
        info!("Boundaries: {} named {:?}", level, input.name);

        let query = match input.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => SourceQuery::text(name),
            _ => SourceQuery::Any,
        };
        let params = SourceParams {
            admin_level: level,
            ..Default::default()
        };
        let request =
            AggregateRequest::new(ToolIntent::AdministrativeBoundaries, query).with_params(params);
        aggregate(aggregator, GET_ADMINISTRATIVE_BOUNDARIES, request, cancel).await
    }
}

/// Coordinate conversion tool handler
pub struct ValidateCoordinatesTool;

impl ValidateCoordinatesTool {
    pub fn execute(input: ValidateCoordinatesInput) -> crate::Result<CoordinateReport> {
        let coordinate = Self::validate_input(&input)?;
        let (output, confidence) = match coordinate {
            Coordinate::Rd(_) => {
                let converted = coordinate.to_wgs84();
                (Coordinate::Wgs84(converted.value), converted.confidence)
            }
            Coordinate::Wgs84(_) => {
                let converted = coordinate.to_rd();
                (Coordinate::Rd(converted.value), converted.confidence)
            }
        };
        debug!(?coordinate, ?output, "converted coordinate");

        Ok(CoordinateReport {
            input: coordinate,
            output,
            validation: CoordinateValidation {
                in_bounds: confidence.is_guaranteed(),
                confidence,
            },
            source: TRANSFORM_SOURCE,
        })
    }

    fn validate_input(input: &ValidateCoordinatesInput) -> crate::Result<Coordinate> {
        match (input.x, input.y, input.lat, input.lon) {
            (Some(x), Some(y), None, None) => Ok(Coordinate::Rd(rd_point(x, y)?)),
            (None, None, Some(lat), Some(lon)) => {
                if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                    return Err(Error::invalid_param("lat", "Must be between -90 and 90"));
                }
                if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                    return Err(Error::invalid_param("lon", "Must be between -180 and 180"));
                }
                Ok(Coordinate::Wgs84(Wgs84Coordinate::new(lat, lon)))
            }
            _ => Err(Error::invalid_param(
                "x",
                "Provide either x and y (RD) or lat and lon (WGS84)",
            )),
        }
    }
}
