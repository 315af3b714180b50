//! HTTP request handlers for the popgrid service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use geojson::Geometry;
use popgrid::{
    population_in,
    query::{self, check_size, parse_polygon},
    GridError, IndicatorResult, ResultKey,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::AppState;

/// Query parameters for the region catalogue.
#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RegionsQuery {
    /// Return a GeoJSON FeatureCollection instead of `{id, name}` pairs.
    #[serde(default)]
    pub as_geojson: bool,
}

/// Zonal population of a polygon.
#[derive(Debug, Serialize, ToSchema)]
pub struct PopulationResponse {
    /// Population sum, null if no raster covers the polygon.
    pub population: Option<f64>,
    /// Geodesic area in km².
    pub area_sqkm: f64,
    /// Population density, null if population is unknown.
    pub population_per_sqkm: Option<f64>,
}

/// Body of `PUT /results`.
#[derive(Debug, Deserialize)]
pub struct PutResultRequest {
    pub key: ResultKey,
    pub result: IndicatorResult,
}

/// Error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Service statistics response.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    /// Number of results in cache.
    pub cached_results: u64,
    /// Cache hit count.
    pub cache_hits: u64,
    /// Cache miss count.
    pub cache_misses: u64,
    /// Cache hit rate (0.0 to 1.0).
    pub hit_rate: f64,
    /// Raster tiles currently loaded.
    pub raster_tiles: usize,
    /// Hex cells in the grid.
    pub hex_cells: usize,
    /// Regions in the catalogue.
    pub regions: usize,
}

/// Map a library error to a status code and `{error}` body.
fn error_response(e: GridError) -> Response {
    let status = if e.is_bad_request() {
        StatusCode::BAD_REQUEST
    } else {
        match e {
            GridError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    };

    if status.is_server_error() {
        tracing::error!(error = %e, "Request failed");
    } else {
        tracing::warn!(error = %e, "Request rejected");
    }

    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message })).into_response()
}

/// Hex cells intersecting a polygon.
///
/// Accepts a GeoJSON Polygon or MultiPolygon in lon/lat and returns every
/// intersecting hex cell as a FeatureCollection with `cell_id` and
/// `tile_id` properties.
#[utoipa::path(
    post,
    path = "/cells",
    tag = "grid",
    request_body(content = Object, description = "GeoJSON Polygon or MultiPolygon"),
    responses(
        (status = 200, description = "Intersecting hex cells", body = Object),
        (status = 400, description = "Invalid or oversized geometry", body = ErrorResponse)
    )
)]
pub async fn post_cells(
    State(state): State<Arc<AppState>>,
    Json(geometry): Json<Geometry>,
) -> Response {
    let area = match parse_polygon(&geometry)
        .and_then(|area| check_size(&area, state.settings.size_limit_sqkm()).map(|_| area))
    {
        Ok(area) => area,
        Err(e) => return error_response(e),
    };

    let fc = query::cells_as_feature_collection(&state.grid, &area);
    tracing::info!(cells = fc.features.len(), "Cells query");
    (StatusCode::OK, Json(fc)).into_response()
}

/// Population and area of a polygon.
#[utoipa::path(
    post,
    path = "/population",
    tag = "grid",
    request_body(content = Object, description = "GeoJSON Polygon or MultiPolygon"),
    responses(
        (status = 200, description = "Zonal population", body = PopulationResponse),
        (status = 400, description = "Invalid or oversized geometry", body = ErrorResponse)
    )
)]
pub async fn post_population(
    State(state): State<Arc<AppState>>,
    Json(geometry): Json<Geometry>,
) -> Response {
    let area = match parse_polygon(&geometry)
        .and_then(|area| check_size(&area, state.settings.size_limit_sqkm()).map(|_| area))
    {
        Ok(area) => area,
        Err(e) => return error_response(e),
    };

    let stats = population_in(&state.rasters, &area);
    tracing::info!(
        population = ?stats.population,
        area_sqkm = stats.area_sqkm,
        "Population query"
    );
    (
        StatusCode::OK,
        Json(PopulationResponse {
            population: stats.population,
            area_sqkm: stats.area_sqkm,
            population_per_sqkm: stats.population_per_sqkm,
        }),
    )
        .into_response()
}

/// Region catalogue.
#[utoipa::path(
    get,
    path = "/regions",
    tag = "regions",
    params(RegionsQuery),
    responses(
        (status = 200, description = "`{id, name}` pairs, or a FeatureCollection", body = Object)
    )
)]
pub async fn list_regions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegionsQuery>,
) -> Response {
    if params.as_geojson {
        Json(query::regions_as_feature_collection(&state.regions)).into_response()
    } else {
        Json(query::region_catalogue(&state.regions)).into_response()
    }
}

/// One region as a GeoJSON Feature with its population and area.
#[utoipa::path(
    get,
    path = "/regions/{region_id}",
    tag = "regions",
    params(("region_id" = String, Path, description = "Region identifier")),
    responses(
        (status = 200, description = "Region feature with population and area_sqkm", body = Object),
        (status = 404, description = "Unknown region", body = ErrorResponse)
    )
)]
pub async fn get_region(
    State(state): State<Arc<AppState>>,
    Path(region_id): Path<String>,
) -> Response {
    match query::find_region(&state.regions, &region_id) {
        Some(region) => Json(query::region_summary_feature(&state.grid, region)).into_response(),
        None => not_found(format!("Region not found: {region_id}")),
    }
}

/// Load a stored indicator result.
#[utoipa::path(
    get,
    path = "/results/{indicator}/{layer}/{dataset}/{feature_id}",
    tag = "results",
    params(
        ("indicator" = String, Path, description = "Indicator name"),
        ("layer" = String, Path, description = "Layer name"),
        ("dataset" = String, Path, description = "Dataset name"),
        ("feature_id" = String, Path, description = "Feature identifier")
    ),
    responses(
        (status = 200, description = "Stored result", body = Object),
        (status = 404, description = "No result for this key", body = ErrorResponse)
    )
)]
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path((indicator, layer, dataset, feature_id)): Path<(String, String, String, String)>,
) -> Response {
    let key = ResultKey::new(indicator, layer, dataset, feature_id);
    match state.results.load_result(&key) {
        Ok(Some(result)) => Json(result.as_ref().clone()).into_response(),
        Ok(None) => not_found(format!("No result for {key}")),
        Err(e) => error_response(e),
    }
}

/// Insert or replace an indicator result.
#[utoipa::path(
    put,
    path = "/results",
    tag = "results",
    request_body(content = Object, description = "`{key, result}`"),
    responses(
        (status = 204, description = "Stored"),
        (status = 500, description = "Store failure", body = ErrorResponse)
    )
)]
pub async fn put_result(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PutResultRequest>,
) -> Response {
    match state.results.upsert(&body.key, &body.result) {
        Ok(()) => {
            tracing::info!(key = %body.key, "Result stored");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Feature ids with stored results in a dataset.
#[utoipa::path(
    get,
    path = "/datasets/{dataset}/feature-ids",
    tag = "results",
    params(("dataset" = String, Path, description = "Dataset name")),
    responses(
        (status = 200, description = "Feature identifiers", body = Vec<String>)
    )
)]
pub async fn get_feature_ids(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<String>,
) -> Response {
    match state.results.feature_ids(&dataset) {
        Ok(ids) => Json(ids).into_response(),
        Err(e) => error_response(e),
    }
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Get service statistics.
///
/// Returns result cache usage and the size of the loaded data.
#[utoipa::path(
    get,
    path = "/stats",
    tag = "system",
    responses((status = 200, description = "Service statistics", body = StatsResponse))
)]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.results.cache_stats();

    Json(StatsResponse {
        cached_results: stats.entry_count,
        cache_hits: stats.hit_count,
        cache_misses: stats.miss_count,
        hit_rate: stats.hit_rate(),
        raster_tiles: state.rasters.tile_count(),
        hex_cells: state.grid.len(),
        regions: state.regions.len(),
    })
}
