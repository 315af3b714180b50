//! Integration tests for the HTTP API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use geo::{LineString, Polygon};
use popgrid::{aggregate_population, HexCell, HexGrid, RasterTile, Region, ResultStore, Settings};
use popgrid_service::{router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;

fn square(lon: f64, lat: f64, size: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (lon, lat),
            (lon + size, lat),
            (lon + size, lat + size),
            (lon, lat + size),
            (lon, lat),
        ]),
        vec![],
    )
}

fn square_json(lon: f64, lat: f64, size: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [lon, lat],
            [lon + size, lat],
            [lon + size, lat + size],
            [lon, lat + size],
            [lon, lat]
        ]]
    })
}

/// Grid over a 2x2 degree raster with pixel values 1, 2 (top) and 3, 4 (bottom).
fn create_state(settings: Settings) -> AppState {
    let grid = HexGrid::from_cells(vec![
        HexCell::new("a", square(0.0, 1.0, 1.0), None),
        HexCell::new("b", square(1.0, 1.0, 1.0), Some("0".to_string())),
        HexCell::new("c", square(0.0, 0.0, 2.0), None),
        HexCell::new("far", square(50.0, 50.0, 1.0), None),
    ])
    .unwrap();

    let mut capital = Region::new(
        "2",
        "Capital",
        Some("Testland".to_string()),
        square(0.0, 0.0, 1.0).into(),
    );
    capital.shdi = Some(0.8);
    let regions = vec![
        Region::new(
            "1",
            "Testland",
            Some("Testland".to_string()),
            square(0.0, 0.0, 2.0).into(),
        ),
        capital,
    ];

    let state = AppState::new(settings, grid, regions, ResultStore::open_in_memory(10).unwrap());

    let tile = RasterTile::new(0, 0.0, 2.0, 1.0, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    state.rasters.replace_tiles(vec![tile]).unwrap();
    aggregate_population(&state.grid, &state.rasters);
    state
}

/// Create a test server over the in-memory fixture.
fn create_test_server(temp_dir: &TempDir) -> TestServer {
    create_test_server_with(Settings::new(temp_dir.path()))
}

fn create_test_server_with(settings: Settings) -> TestServer {
    let state = Arc::new(create_state(settings));
    TestServer::new(router(state)).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/health").await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_cells_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.post("/cells").json(&square_json(0.2, 1.2, 0.6)).await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json["type"], "FeatureCollection");
    let features = json["features"].as_array().unwrap();
    // "a" and the large "c" both cover the query square
    assert_eq!(features.len(), 2);
    assert_eq!(features[0]["type"], "Feature");
    assert_eq!(features[0]["properties"]["cell_id"], "a");
    assert_eq!(features[1]["properties"]["cell_id"], "c");
    // Null tile_id is stripped
    assert!(features[0]["properties"].get("tile_id").is_none());
    assert_eq!(features[0]["geometry"]["type"], "Polygon");
}

#[tokio::test]
async fn test_cells_endpoint_keeps_tile_id() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.post("/cells").json(&square_json(1.2, 1.2, 0.6)).await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json["features"][0]["properties"]["cell_id"], "b");
    assert_eq!(json["features"][0]["properties"]["tile_id"], "0");
}

#[tokio::test]
async fn test_cells_endpoint_rejects_non_polygon() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server
        .post("/cells")
        .json(&json!({"type": "Point", "coordinates": [0.5, 0.5]}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("Polygon"));
}

#[tokio::test]
async fn test_cells_endpoint_rejects_unclosed_ring() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server
        .post("/cells")
        .json(&json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1]]]
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cells_endpoint_size_restriction() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server_with(Settings::new(temp_dir.path()).geom_size_limit(100.0));

    let response = server.post("/cells").json(&square_json(0.0, 0.0, 2.0)).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("too big"));
}

#[tokio::test]
async fn test_population_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.post("/population").json(&square_json(0.0, 0.0, 2.0)).await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json["population"], 10.0);
    assert!(json["area_sqkm"].as_f64().unwrap() > 40_000.0);
    assert!(json["population_per_sqkm"].is_f64());
}

#[tokio::test]
async fn test_population_endpoint_no_coverage() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.post("/population").json(&square_json(50.0, 50.0, 1.0)).await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert!(json["population"].is_null());
    assert!(json["population_per_sqkm"].is_null());
}

#[tokio::test]
async fn test_regions_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/regions").await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json, json!([{"id": "1", "name": "Testland"}, {"id": "2", "name": "Capital"}]));
}

#[tokio::test]
async fn test_regions_endpoint_as_geojson() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/regions?as_geojson=true").await;
    response.assert_status_ok();

    let json: Value = response.json();
    assert_eq!(json["type"], "FeatureCollection");
    let features = json["features"].as_array().unwrap();
    assert_eq!(features.len(), 2);
    assert!(features[0]["properties"].get("shdi").is_none());
    assert_eq!(features[1]["properties"]["shdi"], 0.8);
}

#[tokio::test]
async fn test_region_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/regions/2").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["properties"]["name"], "Capital");
    assert_eq!(json["geometry"]["type"], "MultiPolygon");
    assert!(json["properties"]["area_sqkm"].as_f64().unwrap() > 0.0);

    let response = server.get("/regions/99").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_region_endpoint_sums_cell_population() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/regions/1").await;
    response.assert_status_ok();
    let json: Value = response.json();

    // Centroids of a (1), b (2) and c (10) lie inside Testland
    assert_eq!(json["properties"]["population"], 13.0);
    let area = json["properties"]["area_sqkm"].as_f64().unwrap();
    assert!(area > 49_000.0 && area < 50_000.0, "{area}");
}

#[tokio::test]
async fn test_result_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let body = json!({
        "key": {
            "indicator_name": "GhsPopComparisonBuildings",
            "layer_name": "building_count",
            "dataset_name": "regions",
            "feature_id": "3"
        },
        "result": {
            "timestamp_oqt": "2021-03-01T12:00:00Z",
            "label": "green",
            "value": 0.9,
            "description": "Enough buildings for the population"
        }
    });
    let response = server.put("/results").json(&body).await;
    response.assert_status(StatusCode::NO_CONTENT);

    let response = server
        .get("/results/GhsPopComparisonBuildings/building_count/regions/3")
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["label"], "green");
    assert_eq!(json["value"], 0.9);
    assert!(json["timestamp_osm"].is_null());

    let response = server.get("/datasets/regions/feature-ids").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json, json!(["3"]));
}

#[tokio::test]
async fn test_result_upsert_replaces() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    for (label, value) in [("green", 0.9), ("red", 0.1)] {
        let body = json!({
            "key": {
                "indicator_name": "Density",
                "layer_name": "population",
                "dataset_name": "regions",
                "feature_id": "1"
            },
            "result": {"timestamp_oqt": "2021-03-01T12:00:00Z", "label": label, "value": value}
        });
        server.put("/results").json(&body).await.assert_status(StatusCode::NO_CONTENT);
    }

    let json: Value = server
        .get("/results/Density/population/regions/1")
        .await
        .json();
    assert_eq!(json["label"], "red");
}

#[tokio::test]
async fn test_result_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/results/Density/population/regions/404").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let json: Value = response.json();
    assert!(json["error"].as_str().unwrap().contains("Density/population/regions/404"));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let temp_dir = TempDir::new().unwrap();
    let server = create_test_server(&temp_dir);

    let response = server.get("/stats").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["cache_hits"], 0);
    assert_eq!(json["cache_misses"], 0);
    assert_eq!(json["raster_tiles"], 1);
    assert_eq!(json["hex_cells"], 4);
    assert_eq!(json["regions"], 2);

    // A miss goes to the database
    server.get("/results/Density/population/regions/1").await;

    let response = server.get("/stats").await;
    let json: Value = response.json();
    assert_eq!(json["cache_misses"], 1);
}

#[test]
fn test_fixture_populations() {
    let temp_dir = TempDir::new().unwrap();
    let state = create_state(Settings::new(temp_dir.path()));

    assert_eq!(state.grid.population("a"), Some(1.0));
    assert_eq!(state.grid.population("b"), Some(2.0));
    assert_eq!(state.grid.population("c"), Some(10.0));
    assert_eq!(state.grid.population("far"), None);
}
