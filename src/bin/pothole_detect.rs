//! pothole_detect - detect potholes and append them to the dataset
//!
//! Subcommands:
//! - `image <path>`: one still image, every detection is recorded
//! - `video <path>`: a local video file, repeats suppressed within the run
//! - `camera`: a live camera until Ctrl-C or `--max-frames`
//!
//! `video` and `camera` accept `--annotated-dir` to keep outlined copies of
//! the frames that had detections.
//!
//! Location is resolved once per run. Records are written once, at the end.

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use pothole_watch::{
    config::PotholeConfig,
    detect::load_backend,
    geo::{Coordinate, GeoLocator},
    ingest::{load_image, CameraSource, FileConfig, FileSource, FrameSource},
    pipeline::{annotate, FrameDump, Pipeline, PipelineSettings, StopSignal, StreamEnd},
    store::{DatasetStore, PersistOutcome},
    PotholeRecord,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "pothole_detect",
    about = "Detect potholes in images, videos or a live camera and record them"
)]
struct Cli {
    #[command(flatten)]
    shared: SharedArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SharedArgs {
    /// Dataset CSV to append to (overrides config)
    #[arg(long, global = true, env = "POTHOLE_DATASET", value_name = "PATH")]
    dataset: Option<PathBuf>,

    /// Device-reported latitude; used before any IP lookup
    #[arg(long, global = true, requires = "longitude", allow_hyphen_values = true)]
    latitude: Option<f64>,

    /// Device-reported longitude; used before any IP lookup
    #[arg(long, global = true, requires = "latitude", allow_hyphen_values = true)]
    longitude: Option<f64>,

    /// Skip IP geolocation; fall back straight to the default coordinate
    #[arg(long, global = true)]
    no_ip_lookup: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, global = true, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one image
    Image {
        path: PathBuf,
        /// Save a copy of the image with detections outlined
        #[arg(long, value_name = "PATH")]
        annotated_out: Option<PathBuf>,
    },

    /// Process a local video file
    Video {
        path: String,
        #[arg(long)]
        max_frames: Option<u64>,
        /// Save frames with detections, outlined, into this directory
        #[arg(long, value_name = "DIR")]
        annotated_dir: Option<PathBuf>,
    },

    /// Process a live camera feed until Ctrl-C
    Camera {
        /// Camera device (overrides config)
        #[arg(long, env = "POTHOLE_CAMERA_DEVICE")]
        device: Option<String>,
        #[arg(long)]
        max_frames: Option<u64>,
        /// Save frames with detections, outlined, into this directory
        #[arg(long, value_name = "DIR")]
        annotated_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let ui = ui::Ui::from_args(Some(&cli.shared.ui), std::io::stderr().is_terminal());

    let mut config = {
        let _stage = ui.stage("Load configuration");
        PotholeConfig::load()?
    };
    apply_cli(&mut config, &cli.shared)?;

    let location = {
        let _stage = ui.stage("Resolve location");
        let located = GeoLocator::from_settings(&config.location).locate();
        log::info!("location {} (from {})", located.coordinate, located.source);
        located.coordinate
    };

    let detector = {
        let _stage = ui.stage("Load detector");
        load_backend(&config.detector)?
    };
    let settings = PipelineSettings::from_config(&config);
    let mut pipeline = Pipeline::new(detector, settings);
    let store = DatasetStore::new(&config.dataset_path);

    match cli.command {
        Command::Image {
            path,
            annotated_out,
        } => run_image(&ui, &mut pipeline, &store, location, &path, annotated_out),
        Command::Video {
            path,
            max_frames,
            annotated_dir,
        } => {
            let source = FileSource::new(FileConfig::new(path))?;
            let dump = annotated_dir.map(FrameDump::create).transpose()?;
            run_stream(&ui, &mut pipeline, &store, location, source, max_frames, dump)
        }
        Command::Camera {
            device,
            max_frames,
            annotated_dir,
        } => {
            let mut camera = config.camera.clone();
            if let Some(device) = device {
                camera.device = device;
            }
            let source = CameraSource::new(camera)?;
            let dump = annotated_dir.map(FrameDump::create).transpose()?;
            run_stream(&ui, &mut pipeline, &store, location, source, max_frames, dump)
        }
    }
}

fn apply_cli(config: &mut PotholeConfig, args: &SharedArgs) -> Result<()> {
    if let Some(dataset) = &args.dataset {
        config.dataset_path = dataset.clone();
    }
    if let (Some(latitude), Some(longitude)) = (args.latitude, args.longitude) {
        config.location.fix = Some(Coordinate::new(latitude, longitude)?);
    }
    if args.no_ip_lookup {
        config.location.ip_lookup = false;
    }
    Ok(())
}

fn run_image(
    ui: &ui::Ui,
    pipeline: &mut Pipeline,
    store: &DatasetStore,
    location: Coordinate,
    path: &std::path::Path,
    annotated_out: Option<PathBuf>,
) -> Result<()> {
    let mut frame = {
        let _stage = ui.stage("Load image");
        load_image(path)?
    };
    let report = {
        let _stage = ui.stage("Detect potholes");
        pipeline.process_image(&frame, location)?
    };

    for (idx, c) in report.detections.iter().enumerate() {
        println!(
            "Pothole #{}: {} ({:.0}% confidence, {} px)",
            idx + 1,
            c.severity,
            c.detection.confidence * 100.0,
            c.detection.bbox.area()
        );
    }
    println!("Area % to maintain: {:.2}%", report.area_percent);

    if let Some(out) = annotated_out {
        annotate(&mut frame, &report.detections);
        frame.save(&out)?;
        println!("Annotated image saved to {}", out.display());
    }

    persist(ui, store, &report.records)
}

fn run_stream<S: FrameSource>(
    ui: &ui::Ui,
    pipeline: &mut Pipeline,
    store: &DatasetStore,
    location: Coordinate,
    mut source: S,
    max_frames: Option<u64>,
    mut dump: Option<FrameDump>,
) -> Result<()> {
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        handler_stop.stop();
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    pipeline.set_max_frames(max_frames);
    let report = {
        let mut progress = ui.frames(max_frames);
        pipeline.process_stream(&mut source, location, &stop, &mut |p| {
            progress.update(p.frames_processed, p.total_records);
            if let Some(writer) = dump.as_mut() {
                if let Err(e) = writer.write(p) {
                    log::warn!("annotated output disabled: {:#}", e);
                    dump = None;
                }
            }
        })?
    };

    println!(
        "Processed {} frame(s) ({} skipped), {} detection(s), {} duplicate(s) suppressed",
        report.frames_processed,
        report.frames_skipped,
        report.detections_seen,
        report.duplicates_suppressed
    );
    if let Some(dump) = &dump {
        println!(
            "Saved {} annotated frame(s) to {}",
            dump.written(),
            dump.dir().display()
        );
    }
    persist(ui, store, &report.records)?;

    match report.end {
        StreamEnd::Stalled(stalled) => Err(anyhow::Error::new(stalled)),
        StreamEnd::DetectorLost(lost) => Err(anyhow::Error::new(lost)),
        StreamEnd::ReadError(message) => {
            log::warn!("stream ended early: {}", message);
            Ok(())
        }
        StreamEnd::Exhausted | StreamEnd::Stopped | StreamEnd::FrameLimit => Ok(()),
    }
}

fn persist(ui: &ui::Ui, store: &DatasetStore, records: &[PotholeRecord]) -> Result<()> {
    let outcome = {
        let _stage = ui.stage("Save records");
        store.persist(records)?
    };
    match outcome {
        PersistOutcome::Created { rows } => {
            println!("Created new dataset with {} pothole records", rows)
        }
        PersistOutcome::Appended { rows, total } => println!(
            "Added {} new pothole records ({} total in {})",
            rows,
            total,
            store.path().display()
        ),
        PersistOutcome::NoChange => println!("No potholes detected; dataset unchanged"),
    }
    Ok(())
}
