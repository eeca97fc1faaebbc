//! dataset_compact - rewrite the pothole dataset in canonical form
//!
//! Validates every row, migrates the legacy four-column layout, and replaces
//! the file atomically. Row order is preserved.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use pothole_watch::{config::PotholeConfig, store::DatasetStore};

#[derive(Parser, Debug)]
#[command(name = "dataset_compact", about = "Validate and rewrite the pothole dataset")]
struct Args {
    /// Dataset CSV to compact (overrides config)
    #[arg(long, env = "POTHOLE_DATASET", value_name = "PATH")]
    dataset: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let dataset = match args.dataset {
        Some(path) => path,
        None => PotholeConfig::load()?.dataset_path,
    };
    let store = DatasetStore::new(&dataset);
    if !store.path().exists() {
        println!("dataset_compact: {} does not exist; nothing to do", dataset.display());
        return Ok(());
    }
    let rows = store.compact()?;
    println!("dataset_compact: {} rewritten with {} record(s)", dataset.display(), rows);
    Ok(())
}
