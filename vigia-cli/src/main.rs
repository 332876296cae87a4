// Vigia command line interface
// Replays recorded detection streams through the capture engine and line counter

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use image::RgbImage;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigia_eye::{
    CaptureEngine, CaptureWriter, Detection, DiskCaptureWriter, EventFileSink, FanOutSink, Frame,
    LineCounter, LogSink, TracingSink, VigiaConfig,
};

/// Upper bound for the counter worker to finish one replayed batch
const BATCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "vigia")]
#[command(about = "Capture decisions and line-crossing counts for tracked detections", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines detection recording
    Replay {
        /// Configuration file (JSON)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// One `{"width", "height", "detections"}` object per line
        #[arg(long, short)]
        input: PathBuf,
    },

    /// Write the default configuration
    InitConfig {
        path: PathBuf,
    },
}

#[derive(Deserialize)]
struct ReplayFrame {
    width: u32,
    height: u32,
    #[serde(default)]
    detections: Vec<Detection>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Replay { config, input } => replay(config, input).await,
        Commands::InitConfig { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            VigiaConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn replay(config_path: Option<PathBuf>, input: PathBuf) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => VigiaConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => VigiaConfig::default(),
    };

    let camera = config.camera.camera.clone();
    let mut sinks: Vec<Box<dyn LogSink>> = vec![Box::new(TracingSink::new(camera.clone()))];
    if let Some(path) = &config.event_log {
        sinks.push(Box::new(EventFileSink::new(camera.clone(), path)));
    }
    let log: Arc<dyn LogSink> = Arc::new(FanOutSink::new(sinks));

    let writer: Arc<dyn CaptureWriter> = Arc::new(DiskCaptureWriter::new(&config.capture_dir));
    let mut engine = CaptureEngine::new(
        config.camera.clone(),
        writer,
        Arc::clone(&log),
        tokio::runtime::Handle::current(),
    )?;
    let counter = LineCounter::new(config.counter.clone(), Arc::clone(&log))?;
    counter.start()?;

    let reader = BufReader::new(
        File::open(&input).with_context(|| format!("Failed to open {}", input.display()))?,
    );

    let mut blank: Option<Frame> = None;
    let mut frames = 0usize;
    let mut approved = 0usize;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ReplayFrame = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping line {}: {}", number + 1, e);
                continue;
            }
        };

        let size = (record.width, record.height);
        let frame = match &blank {
            Some(frame) if frame.dimensions() == size => Arc::clone(frame),
            _ => {
                let frame: Frame = Arc::new(RgbImage::new(record.width, record.height));
                blank = Some(Arc::clone(&frame));
                frame
            }
        };

        approved += engine.evaluate(&record.detections, size, Some(&frame)).len();
        let active: HashSet<u64> = record.detections.iter().filter_map(|d| d.track_id).collect();
        engine.prune_inactive(&active);

        // Replay waits for each batch; live callers never do
        let before = counter.processed_batches();
        if counter.update(record.detections, size) {
            wait_for_batch(&counter, before).await?;
        }
        frames += 1;
    }

    let flushed = engine.flush().await;
    counter.join();

    let stats = engine.stats();
    info!(
        "Replayed {} frames, {} captures approved ({} awaited), budget remaining {}",
        frames, approved, flushed, stats.budget_remaining
    );
    println!("{}", serde_json::to_string_pretty(&counter.counts())?);
    Ok(())
}

async fn wait_for_batch(counter: &LineCounter, before: u64) -> anyhow::Result<()> {
    let deadline = Instant::now() + BATCH_TIMEOUT;
    while counter.processed_batches() <= before {
        if Instant::now() >= deadline {
            bail!("Line counter did not process a batch within {:?}", BATCH_TIMEOUT);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    Ok(())
}
