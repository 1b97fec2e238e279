use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use firewatch::annotate::Annotator;
use firewatch::artifacts::OutputLayout;
use firewatch::detector::{DetectorConfig, ReplayDetector};
use firewatch::source::{FrameSource, ImageSequenceSource};
use firewatch::{ClipWriter, Config, EventLog, IncidentState, Pipeline, StateSettings};

#[derive(Parser, Debug)]
#[command(version, about = "Records fire and smoke incidents from a video stream")]
struct Args {
    /// YAML configuration; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Video file, or a directory of still frames.
    #[arg(short, long)]
    input: PathBuf,

    /// Recorded classifier output, one `<frame>: [...]` line per frame.
    #[arg(short, long)]
    detections: PathBuf,

    /// Wipe the output directory and event log before starting.
    #[arg(long)]
    reset: bool,

    /// Override the source frame rate.
    #[arg(long)]
    fps: Option<f64>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(not(feature = "opencv"))]
fn open_source(args: &Args, fallback_fps: f64) -> anyhow::Result<Box<dyn FrameSource>> {
    let fps = args.fps.unwrap_or(fallback_fps);
    Ok(Box::new(ImageSequenceSource::open(&args.input, fps)?))
}

#[cfg(feature = "opencv")]
fn open_source(args: &Args, fallback_fps: f64) -> anyhow::Result<Box<dyn FrameSource>> {
    if args.input.is_dir() {
        let fps = args.fps.unwrap_or(fallback_fps);
        return Ok(Box::new(ImageSequenceSource::open(&args.input, fps)?));
    }

    Ok(Box::new(firewatch::video::VideoFileSource::open(&args.input)?))
}

#[cfg(not(feature = "opencv"))]
fn clip_writer() -> Box<dyn ClipWriter> {
    Box::new(firewatch::MjpegClipWriter::default())
}

#[cfg(feature = "opencv")]
fn clip_writer() -> Box<dyn ClipWriter> {
    Box::new(firewatch::video::OpenCvClipWriter::default())
}

#[cfg(not(feature = "opencv"))]
fn annotator(threshold: f32) -> Arc<dyn Annotator> {
    Arc::new(firewatch::annotate::BoxAnnotator::new(threshold))
}

#[cfg(feature = "opencv")]
fn annotator(threshold: f32) -> Arc<dyn Annotator> {
    Arc::new(firewatch::video::TextAnnotator::new(threshold))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            Config::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };

    init_tracing(&config.logging.level);

    let layout = OutputLayout::new(&config.output);
    let log = EventLog::default();

    if args.reset || config.output.reset_on_start {
        layout.reset_session(&log)?;
    }
    layout.ensure()?;

    let source = open_source(&args, config.recording.fallback_fps)?;
    let fps = match args.fps.unwrap_or_else(|| source.fps()) {
        fps if fps.is_finite() && fps > 0.0 => fps,
        reported => {
            warn!(
                reported,
                fallback = config.recording.fallback_fps,
                "source frame rate unknown"
            );
            config.recording.fallback_fps
        }
    };

    let detector = ReplayDetector::open(&args.detections, &DetectorConfig::default())
        .with_context(|| format!("loading {}", args.detections.display()))?;
    info!(frames = detector.len(), "detections loaded");

    let state = IncidentState::new(
        StateSettings::from_config(&config, fps),
        layout,
        clip_writer(),
        log,
    );

    let mut pipeline = Pipeline::new(
        state,
        Arc::new(detector),
        annotator(config.detection.confidence_threshold),
        &config.pipeline,
    );

    let summary = pipeline.run(source).await?;
    if let Some(id) = summary.cut_short {
        warn!(incident = id, "incident closed early by end of stream");
    }

    info!(
        frames = summary.frames,
        incidents = summary.incidents,
        classifier_errors = summary.classifier_errors,
        "done"
    );

    Ok(())
}
