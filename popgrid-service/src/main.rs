//! popgrid Service - HTTP microservice for hex-grid population queries.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `POPGRID_DATA_DIR` | Raster sources and results database | current directory |
//! | `POPGRID_DB_PATH` | SQLite results database | `<data_dir>/results.db` |
//! | `POPGRID_RASTER` | Population raster ingested at startup | None |
//! | `POPGRID_REGIONS` | Regions GeoJSON | None |
//! | `POPGRID_HDI` | HDI GeoJSON | None |
//! | `POPGRID_TILE_SIZE` | Raster tile size in pixels | 100 |
//! | `POPGRID_H3_RESOLUTION` | Hex grid resolution | 4 |
//! | `POPGRID_CACHE_SIZE` | Result cache capacity | 1000 |
//! | `POPGRID_GEOM_SIZE_LIMIT` | Maximum query area in km² | 1000000 |
//! | `POPGRID_PORT` | HTTP server port | 8080 |
//! | `RUST_LOG` | Log level (e.g., "info", "debug") | "info" |
//!
//! ## Endpoints
//!
//! - `POST /cells` - Hex cells intersecting a GeoJSON polygon
//! - `POST /population` - Population and area of a GeoJSON polygon
//! - `GET /regions[?as_geojson=true]` - Region catalogue
//! - `GET /regions/:region_id` - One region as a GeoJSON Feature
//! - `GET /results/:indicator/:layer/:dataset/:feature_id` - Stored result
//! - `PUT /results` - Store a result
//! - `GET /datasets/:dataset/feature-ids` - Feature ids with results
//! - `GET /health` - Health check
//! - `GET /stats` - Cache and data statistics
//! - `GET /docs` - OpenAPI documentation (Swagger UI)

use std::net::SocketAddr;
use std::sync::Arc;

use popgrid::Settings;
use popgrid_service::{router, AppState};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "popgrid_service=info,popgrid=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            // Fallback: POPGRID_DATA_DIR not set or invalid, use current directory
            tracing::warn!(error = %e, "Falling back to current directory");
            Settings::new(".")
        }
    };
    let port = settings.listen_port();
    let raster = settings.raster_path().map(|p| p.to_path_buf());

    tracing::info!(
        data_dir = %settings.data_dir().display(),
        db_path = %settings.db_path().display(),
        h3_resolution = settings.resolution(),
        tile_size = settings.tile_size_px(),
        port = port,
        "Starting popgrid service"
    );

    let state = Arc::new(tokio::task::spawn_blocking(move || AppState::load(settings)).await??);

    // Ingest and aggregate in the background; queries see the previous
    // snapshot until each swap completes
    if let Some(raster) = raster {
        let state = state.clone();
        tokio::task::spawn_blocking(move || match state.refresh_population(&raster) {
            Ok(stats) => tracing::info!(
                cells_total = stats.cells_total,
                cells_populated = stats.cells_populated,
                cells_skipped_extent = stats.cells_skipped_extent,
                "Startup aggregation complete"
            ),
            Err(e) => tracing::error!(error = %e, "Startup aggregation failed"),
        });
    }

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
