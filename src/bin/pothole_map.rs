//! pothole_map - render the pothole dataset as an interactive map
//!
//! Reads the dataset (never modifies it), optionally locates the viewer, and
//! writes a self-contained Leaflet page. `--geojson` also exports the points.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use pothole_watch::{
    config::PotholeConfig,
    geo::GeoLocator,
    map::{load_map_points, render_html, to_geojson, MapOptions},
};

#[path = "../ui.rs"]
#[allow(dead_code)]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "pothole_map", about = "Render recorded potholes on a map")]
struct Args {
    /// Dataset CSV to read (overrides config)
    #[arg(long, env = "POTHOLE_DATASET", value_name = "PATH")]
    dataset: Option<PathBuf>,

    /// HTML output path (overrides config)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Also write the points as GeoJSON
    #[arg(long, value_name = "PATH")]
    geojson: Option<PathBuf>,

    /// Do not look up the viewer's location
    #[arg(long)]
    no_locate: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let config = PotholeConfig::load()?;
    let dataset = args.dataset.unwrap_or(config.dataset_path.clone());
    let output = args.output.unwrap_or(config.map.output.clone());

    let points = {
        let _stage = ui.stage("Load dataset");
        load_map_points(&dataset)?
    };
    println!("Loaded {} pothole records from {}", points.len(), dataset.display());

    let user = if args.no_locate {
        None
    } else {
        let _stage = ui.stage("Locate viewer");
        let located = GeoLocator::from_settings(&config.location).try_locate();
        match located {
            Some(located) => {
                println!(
                    "Detected user location: {} (from {})",
                    located.coordinate, located.source
                );
                Some(located.coordinate)
            }
            None => {
                println!("Could not detect user location, using pothole data center");
                None
            }
        }
    };

    let options = MapOptions {
        zoom: config.map.zoom,
        fallback_center: config.location.default,
        ..MapOptions::default()
    };
    {
        let _stage = ui.stage("Render map");
        let html = render_html(&points, user, &options)?;
        std::fs::write(&output, html)
            .with_context(|| format!("failed to write map {}", output.display()))?;
    }
    println!("Map saved to: {}", output.display());

    if let Some(path) = args.geojson {
        let geojson = serde_json::to_string_pretty(&to_geojson(&points))?;
        std::fs::write(&path, geojson)
            .with_context(|| format!("failed to write GeoJSON {}", path.display()))?;
        println!("GeoJSON saved to: {}", path.display());
    }
    Ok(())
}
