//! popgrid Service Library
//!
//! HTTP handlers, shared state and the router for the popgrid service.
//! This library is used by both the popgrid-service binary and integration
//! tests.

pub mod handlers;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use popgrid::{
    aggregate_population, import, resolve_all, AggregationStats, HdiTable, HexGrid, RasterStore,
    Region, ResultStore, Settings,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers.
pub struct AppState {
    /// Deployment settings.
    pub settings: Settings,
    /// Hex grid with the current cell populations.
    pub grid: HexGrid,
    /// Population raster tiles.
    pub rasters: RasterStore,
    /// Regions with their resolved SHDI.
    pub regions: Vec<Region>,
    /// Computed indicator results.
    pub results: ResultStore,
}

impl AppState {
    /// Assemble state from already loaded parts.
    pub fn new(settings: Settings, grid: HexGrid, regions: Vec<Region>, results: ResultStore) -> Self {
        Self {
            settings,
            grid,
            rasters: RasterStore::new(),
            regions,
            results,
        }
    }

    /// Load everything the settings point at.
    ///
    /// Generates the hex grid, opens the result database and, when both
    /// region and HDI files are configured, imports them and resolves SHDI.
    /// The raster is not ingested here; see [`AppState::refresh_population`].
    pub fn load(settings: Settings) -> popgrid::Result<Self> {
        let grid = HexGrid::generate(settings.resolution())?;
        let results = ResultStore::open(settings.db_path(), settings.cache_capacity())?;

        let mut regions = match settings.regions_path() {
            Some(path) => import::load_regions(path)?,
            None => Vec::new(),
        };
        if let Some(path) = settings.hdi_path() {
            let table: HdiTable = import::load_hdi_table(path)?;
            resolve_all(&mut regions, &table);
        }

        Ok(Self::new(settings, grid, regions, results))
    }

    /// Ingest `raster` and recompute every cell population.
    ///
    /// Blocking; queries keep answering from the previous tiles and
    /// populations until each swap completes.
    pub fn refresh_population(&self, raster: &Path) -> popgrid::Result<AggregationStats> {
        let start = Instant::now();
        self.rasters.ingest(raster, self.settings.tile_size_px())?;
        let stats = aggregate_population(&self.grid, &self.rasters);
        tracing::info!(
            raster = %raster.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Population refresh complete"
        );
        Ok(stats)
    }
}

/// OpenAPI documentation for the popgrid service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "popgrid Service",
        version = "0.1.0",
        description = "Hex-grid population, region and indicator result queries.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Pedro Sanz Martinez", url = "https://github.com/pedrosanzmtz/popgrid")
    ),
    paths(
        handlers::post_cells,
        handlers::post_population,
        handlers::list_regions,
        handlers::get_region,
        handlers::get_result,
        handlers::put_result,
        handlers::get_feature_ids,
        handlers::health_check,
        handlers::get_stats,
    ),
    components(
        schemas(
            handlers::RegionsQuery,
            handlers::PopulationResponse,
            handlers::ErrorResponse,
            handlers::HealthResponse,
            handlers::StatsResponse,
        )
    ),
    tags(
        (name = "grid", description = "Hex grid and population queries"),
        (name = "regions", description = "Region catalogue"),
        (name = "results", description = "Indicator result store"),
        (name = "system", description = "System and health endpoints")
    )
)]
pub struct ApiDoc;

/// Build the service router, docs included.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/cells", post(handlers::post_cells))
        .route("/population", post(handlers::post_population))
        .route("/regions", get(handlers::list_regions))
        .route("/regions/:region_id", get(handlers::get_region))
        .route("/results", axum::routing::put(handlers::put_result))
        .route(
            "/results/:indicator/:layer/:dataset/:feature_id",
            get(handlers::get_result),
        )
        .route("/datasets/:dataset/feature-ids", get(handlers::get_feature_ids))
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        .with_state(state)
}

// Re-export commonly used types for convenience
pub use handlers::{
    ErrorResponse, HealthResponse, PopulationResponse, PutResultRequest, RegionsQuery,
    StatsResponse,
};
