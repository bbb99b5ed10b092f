//! zone_count - run the zone occupancy pipeline on a local video file.
//!
//! Prints one occupancy line per frame and the total, and writes the
//! annotated video plus its `_inference.jpg` snapshot.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use clap::Parser;

use zone_occupancy::config::ServiceConfig;
use zone_occupancy::pipeline::Pipeline;
use zone_occupancy::video::VideoStreamAdapter;
use zone_occupancy::zone::{SiteType, ZoneLayout};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "zone_count",
    about = "Count people per zone in a local video file"
)]
struct Args {
    /// Site layout (grocery_store|subway|market_square)
    #[arg(long, value_name = "TYPE")]
    site: SiteType,

    /// Input video
    #[arg(long, value_name = "PATH")]
    input: PathBuf,

    /// Annotated output video (default: result_<input name> next to the input)
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Video backend override (ffmpeg|synthetic)
    #[arg(long, env = "ZONED_VIDEO_BACKEND")]
    video_backend: Option<String>,

    /// Detector backend override
    #[arg(long, env = "ZONED_DETECTOR")]
    detector: Option<String>,

    /// Only print the total
    #[arg(short, long)]
    quiet: bool,

    /// Progress reporting on stderr
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(
        args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );

    let mut cfg = ServiceConfig::load()?;
    if let Some(backend) = args.video_backend.clone() {
        cfg.video_backend = backend;
    }
    if let Some(detector) = args.detector.clone() {
        cfg.detector.backend = detector;
    }
    let output = match &args.output {
        Some(path) => path.clone(),
        None => default_output(&args.input)?,
    };

    let (video, pipeline) = {
        let _stage = ui.step("Load backends");
        let video = cfg.video()?;
        let pipeline = Pipeline::new(cfg.detector()?, cfg.annotator()?);
        (video, pipeline)
    };

    let layout = ZoneLayout::for_site(args.site)?;
    let mut adapter = {
        let _stage = ui.step("Open video");
        let mut adapter = VideoStreamAdapter::open(video.as_ref(), &args.input)?;
        adapter.open_writer(video.as_ref(), &output)?;
        adapter
    };
    let (width, height) = adapter.dimensions();
    log::info!("{}x{} @ {:.2} fps", width, height, adapter.frame_rate());

    let outcome = {
        let step = ui.step("Count people");
        let pipeline = pipeline.with_progress(step.frame_counter());
        pipeline.run(&layout, &mut adapter, layout.confidence_threshold())?
    };

    if !args.quiet {
        for (index, line) in outcome.logs.iter().enumerate() {
            println!("frame {:>5}: {}", index + 1, line);
        }
        println!();
    }
    println!(
        "{}: {} frames, total count {}",
        args.site, outcome.frames_processed, outcome.total_count
    );
    match (&outcome.output_path, &outcome.snapshot_path) {
        (Some(video), Some(snapshot)) => {
            println!("video:    {}", video.display());
            println!("snapshot: {}", snapshot.display());
        }
        _ => println!("no frames written; no output produced"),
    }
    Ok(())
}

fn default_output(input: &Path) -> Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| anyhow!("input path {} has no file name", input.display()))?;
    Ok(input.with_file_name(format!("result_{}", name.to_string_lossy())))
}
