use anyhow::{bail, Context, Result};
use clap::Subcommand;
use popgrid::{config::DEFAULT_CACHE_SIZE, IndicatorResult, ResultKey, ResultStore};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Action {
    /// Print the result stored under a key
    Get {
        indicator: String,
        layer: String,
        dataset: String,
        feature_id: String,
    },

    /// Store results from a JSON file of `{key, result}` objects
    Put {
        /// JSON file with one object or an array of objects
        input: PathBuf,
    },

    /// List feature ids with stored results in a dataset
    Ids { dataset: String },
}

#[derive(Deserialize)]
struct Entry {
    key: ResultKey,
    result: IndicatorResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Entries {
    One(Entry),
    Many(Vec<Entry>),
}

pub fn run(data_dir: Option<PathBuf>, db: Option<PathBuf>, action: Action) -> Result<()> {
    let db_path = match (db, data_dir) {
        (Some(db), _) => db,
        (None, Some(dir)) => dir.join("results.db"),
        (None, None) => bail!(
            "No results database. Use --db, --data-dir, or set POPGRID_DB_PATH / POPGRID_DATA_DIR"
        ),
    };
    let store = ResultStore::open(&db_path, DEFAULT_CACHE_SIZE)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;

    match action {
        Action::Get {
            indicator,
            layer,
            dataset,
            feature_id,
        } => {
            let key = ResultKey::new(indicator, layer, dataset, feature_id);
            match store.load_result(&key)? {
                Some(result) => println!("{}", serde_json::to_string_pretty(result.as_ref())?),
                None => bail!("No result for {}", key),
            }
        }
        Action::Put { input } => {
            let text = fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let entries = match serde_json::from_str(&text).context("Failed to parse results")? {
                Entries::One(entry) => vec![entry],
                Entries::Many(entries) => entries,
            };
            for entry in &entries {
                store
                    .upsert(&entry.key, &entry.result)
                    .with_context(|| format!("Failed to store {}", entry.key))?;
            }
            println!("Stored {} results in {}", entries.len(), db_path.display());
        }
        Action::Ids { dataset } => {
            for id in store.feature_ids(&dataset)? {
                println!("{id}");
            }
        }
    }
    Ok(())
}
