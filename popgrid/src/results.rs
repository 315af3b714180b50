//! Persistent store of computed indicator results.
//!
//! Results live in SQLite under the natural key
//! `(indicator_name, layer_name, dataset_name, feature_id)`. Writes are
//! upserts that replace the previous row; no history is kept. Reads go
//! through an in-memory cache that every write refreshes.
//!
//! # Example
//!
//! ```ignore
//! use popgrid::results::{ResultKey, ResultStore};
//!
//! let store = ResultStore::open("results.db", 1000)?;
//! let key = ResultKey::new("GhsPopComparisonBuildings", "building_count", "regions", "3");
//! match store.load_result(&key)? {
//!     Some(result) => println!("{:?} {:?}", result.label, result.value),
//!     None => println!("not computed yet"),
//! }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use geojson::{Feature, JsonObject};
use moka::sync::Cache;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

const RESULTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS results (
    indicator_name     TEXT NOT NULL,
    layer_name         TEXT NOT NULL,
    dataset_name       TEXT NOT NULL,
    fid                TEXT NOT NULL,
    timestamp_oqt      TEXT NOT NULL,
    timestamp_osm      TEXT,
    result_label       TEXT NOT NULL,
    result_value       REAL,
    result_description TEXT NOT NULL,
    result_svg         TEXT NOT NULL,
    data               TEXT NOT NULL,
    feature            TEXT,
    PRIMARY KEY (indicator_name, layer_name, dataset_name, fid)
);
CREATE INDEX IF NOT EXISTS idx_results_dataset ON results(dataset_name, fid);
";

/// Natural key of a stored result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub indicator_name: String,
    pub layer_name: String,
    pub dataset_name: String,
    pub feature_id: String,
}

impl ResultKey {
    pub fn new(
        indicator_name: impl Into<String>,
        layer_name: impl Into<String>,
        dataset_name: impl Into<String>,
        feature_id: impl Into<String>,
    ) -> Self {
        Self {
            indicator_name: indicator_name.into(),
            layer_name: layer_name.into(),
            dataset_name: dataset_name.into(),
            feature_id: feature_id.into(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.indicator_name, self.layer_name, self.dataset_name, self.feature_id
        )
    }
}

/// Traffic-light quality label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultLabel {
    Green,
    Yellow,
    Red,
    #[default]
    Undefined,
}

impl ResultLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultLabel::Green => "green",
            ResultLabel::Yellow => "yellow",
            ResultLabel::Red => "red",
            ResultLabel::Undefined => "undefined",
        }
    }
}

impl FromStr for ResultLabel {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "green" => Ok(ResultLabel::Green),
            "yellow" => Ok(ResultLabel::Yellow),
            "red" => Ok(ResultLabel::Red),
            "undefined" => Ok(ResultLabel::Undefined),
            other => Err(GridError::Config {
                message: format!("unknown result label '{other}'"),
            }),
        }
    }
}

/// One computed indicator result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub timestamp_oqt: DateTime<Utc>,
    #[serde(default)]
    pub timestamp_osm: Option<DateTime<Utc>>,
    #[serde(default)]
    pub label: ResultLabel,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub svg: String,
    /// Indicator-specific intermediate figures.
    #[serde(default)]
    pub data: JsonObject,
    /// The input feature the result was computed for.
    #[serde(default)]
    pub feature: Option<Feature>,
}

impl IndicatorResult {
    /// An undefined result stamped with the current time.
    pub fn undefined(description: impl Into<String>) -> Self {
        Self {
            timestamp_oqt: Utc::now(),
            timestamp_osm: None,
            label: ResultLabel::Undefined,
            value: None,
            description: description.into(),
            svg: String::new(),
            data: JsonObject::new(),
            feature: None,
        }
    }
}

/// Statistics about result cache usage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of results currently cached.
    pub entry_count: u64,
    /// Lookups answered from the cache.
    pub hit_count: u64,
    /// Lookups that went to the database.
    pub miss_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Row as stored, before JSON columns are decoded.
struct RawRow {
    timestamp_oqt: DateTime<Utc>,
    timestamp_osm: Option<DateTime<Utc>>,
    label: String,
    value: Option<f64>,
    description: String,
    svg: String,
    data: String,
    feature: Option<String>,
}

impl RawRow {
    fn decode(self) -> Result<IndicatorResult> {
        let feature = match self.feature {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        Ok(IndicatorResult {
            timestamp_oqt: self.timestamp_oqt,
            timestamp_osm: self.timestamp_osm,
            label: self.label.parse()?,
            value: self.value,
            description: self.description,
            svg: self.svg,
            data: serde_json::from_str(&self.data)?,
            feature,
        })
    }
}

/// SQLite-backed result store with a read cache.
pub struct ResultStore {
    conn: Mutex<Connection>,
    cache: Cache<ResultKey, Arc<IndicatorResult>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl ResultStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, cache_size: u64) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Opening result database");

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, cache_size)
    }

    /// Open an in-memory database.
    pub fn open_in_memory(cache_size: u64) -> Result<Self> {
        tracing::debug!("Opening in-memory result database");
        Self::with_connection(Connection::open_in_memory()?, cache_size)
    }

    fn with_connection(conn: Connection, cache_size: u64) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: Cache::builder().max_capacity(cache_size).build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    /// Insert or replace the result stored under `key`.
    pub fn upsert(&self, key: &ResultKey, result: &IndicatorResult) -> Result<()> {
        let data = serde_json::to_string(&result.data)?;
        let feature = result
            .feature
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO results (
                indicator_name, layer_name, dataset_name, fid,
                timestamp_oqt, timestamp_osm, result_label, result_value,
                result_description, result_svg, data, feature
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT (indicator_name, layer_name, dataset_name, fid) DO UPDATE SET
                timestamp_oqt = excluded.timestamp_oqt,
                timestamp_osm = excluded.timestamp_osm,
                result_label = excluded.result_label,
                result_value = excluded.result_value,
                result_description = excluded.result_description,
                result_svg = excluded.result_svg,
                data = excluded.data,
                feature = excluded.feature",
            params![
                key.indicator_name,
                key.layer_name,
                key.dataset_name,
                key.feature_id,
                result.timestamp_oqt,
                result.timestamp_osm,
                result.label.as_str(),
                result.value,
                result.description,
                result.svg,
                data,
                feature,
            ],
        )?;
        // Refreshed under the connection lock so a concurrent read cannot
        // put the old row back
        self.cache.insert(key.clone(), Arc::new(result.clone()));

        tracing::debug!(key = %key, "Result stored");
        Ok(())
    }

    /// Load the result stored under `key`; `Ok(None)` if there is none.
    pub fn load_result(&self, key: &ResultKey) -> Result<Option<Arc<IndicatorResult>>> {
        if let Some(result) = self.cache.get(key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(result));
        }
        self.miss_count.fetch_add(1, Ordering::Relaxed);

        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT timestamp_oqt, timestamp_osm, result_label, result_value,
                        result_description, result_svg, data, feature
                 FROM results
                 WHERE indicator_name = ?1 AND layer_name = ?2
                   AND dataset_name = ?3 AND fid = ?4",
                params![
                    key.indicator_name,
                    key.layer_name,
                    key.dataset_name,
                    key.feature_id
                ],
                |row| {
                    Ok(RawRow {
                        timestamp_oqt: row.get(0)?,
                        timestamp_osm: row.get(1)?,
                        label: row.get(2)?,
                        value: row.get(3)?,
                        description: row.get(4)?,
                        svg: row.get(5)?,
                        data: row.get(6)?,
                        feature: row.get(7)?,
                    })
                },
            )
            .optional()?;

        match raw {
            Some(raw) => {
                let result = Arc::new(raw.decode()?);
                self.cache.insert(key.clone(), result.clone());
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Distinct feature ids with at least one result in `dataset_name`.
    pub fn feature_ids(&self, dataset_name: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT fid FROM results WHERE dataset_name = ?1 ORDER BY fid")?;
        let ids = stmt
            .query_map(params![dataset_name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Number of stored results.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.cache.entry_count(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;

    match version {
        None => {
            tracing::info!(version = SCHEMA_VERSION, "Creating result schema");
            conn.execute_batch(RESULTS_SCHEMA)?;
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(GridError::Config {
                message: format!("result database schema v{v} is newer than supported v{SCHEMA_VERSION}"),
            });
        }
        Some(v) => tracing::debug!(version = v, "Result schema is up to date"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn key(fid: &str) -> ResultKey {
        ResultKey::new("GhsPopComparisonBuildings", "building_count", "regions", fid)
    }

    fn result(label: ResultLabel, value: f64) -> IndicatorResult {
        let mut data = JsonObject::new();
        data.insert("pop_count".to_string(), serde_json::json!(5000.0));
        IndicatorResult {
            timestamp_oqt: Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap(),
            timestamp_osm: Some(Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap()),
            label,
            value: Some(value),
            description: "Buildings per inhabitant".to_string(),
            svg: "<svg/>".to_string(),
            data,
            feature: None,
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let store = ResultStore::open_in_memory(10).unwrap();
        assert!(store.load_result(&key("1")).unwrap().is_none());
    }

    #[test]
    fn test_upsert_and_load() {
        let store = ResultStore::open_in_memory(10).unwrap();
        let stored = result(ResultLabel::Green, 0.9);
        store.upsert(&key("1"), &stored).unwrap();

        let loaded = store.load_result(&key("1")).unwrap().unwrap();
        assert_eq!(*loaded, stored);
        assert!(store.load_result(&key("2")).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let store = ResultStore::open_in_memory(10).unwrap();
        store.upsert(&key("1"), &result(ResultLabel::Green, 0.9)).unwrap();
        store.upsert(&key("1"), &result(ResultLabel::Red, 0.1)).unwrap();

        let loaded = store.load_result(&key("1")).unwrap().unwrap();
        assert_eq!(loaded.label, ResultLabel::Red);
        assert_eq!(loaded.value, Some(0.1));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.db");
        let stored = IndicatorResult {
            feature: Some(
                r#"{"type": "Feature", "properties": {"name": "Heidelberg"},
                    "geometry": {"type": "Point", "coordinates": [8.7, 49.4]}}"#
                    .parse()
                    .unwrap(),
            ),
            ..result(ResultLabel::Yellow, 0.5)
        };

        {
            let store = ResultStore::open(&path, 10).unwrap();
            store.upsert(&key("7"), &stored).unwrap();
        }

        let store = ResultStore::open(&path, 10).unwrap();
        let loaded = store.load_result(&key("7")).unwrap().unwrap();
        assert_eq!(*loaded, stored);
    }

    #[test]
    fn test_feature_ids() {
        let store = ResultStore::open_in_memory(10).unwrap();
        store.upsert(&key("2"), &result(ResultLabel::Green, 1.0)).unwrap();
        store.upsert(&key("1"), &result(ResultLabel::Green, 1.0)).unwrap();
        store
            .upsert(
                &ResultKey::new("Other", "building_count", "regions", "1"),
                &result(ResultLabel::Red, 0.0),
            )
            .unwrap();
        store
            .upsert(
                &ResultKey::new("Other", "building_count", "countries", "9"),
                &result(ResultLabel::Red, 0.0),
            )
            .unwrap();

        assert_eq!(store.feature_ids("regions").unwrap(), vec!["1", "2"]);
        assert!(store.feature_ids("missing").unwrap().is_empty());
    }

    #[test]
    fn test_cache_stats() {
        let store = ResultStore::open_in_memory(10).unwrap();
        store.upsert(&key("1"), &result(ResultLabel::Green, 0.9)).unwrap();

        store.load_result(&key("1")).unwrap();
        store.load_result(&key("2")).unwrap();

        let stats = store.cache_stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_label_parse() {
        assert_eq!("yellow".parse::<ResultLabel>().unwrap(), ResultLabel::Yellow);
        assert!("blue".parse::<ResultLabel>().is_err());
        assert_eq!(
            serde_json::to_string(&ResultLabel::Undefined).unwrap(),
            "\"undefined\""
        );
    }
}
