use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::preprocess::{preprocess_file, preprocess_frame};
use faceid_core::{
    DirectoryGallery, GallerySource, OnnxSiameseModel, SimilarityModel, StatusText,
    VerificationResult,
};
use faceid_hw::Camera;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{EngineError, Session};

#[derive(Parser)]
#[command(name = "faceid", about = "Webcam face verification against a reference gallery")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one frame and verify it against the gallery
    Verify {
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Live preview; press Enter to verify, Ctrl-C to quit
    Run,
    /// Score two image files with the similarity model
    Score { a: PathBuf, b: PathBuf },
    /// List the reference images that would be scored
    Gallery,
    /// Run camera diagnostics
    Test {
        /// Save the cropped capture region to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    status: StatusText,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Verify { json } => verify_once(&config, json).await,
        Commands::Run => run_live(&config).await,
        Commands::Score { a, b } => score_pair(&config, a, b),
        Commands::Gallery => list_gallery(&config),
        Commands::Test { save } => camera_test(&config, save),
    }
}

async fn verify_once(config: &Config, json: bool) -> Result<()> {
    let session = Session::open(config).context("failed to start session")?;
    let outcome = session.handle().verify().await;
    session.close().await;

    if json {
        let report = Report {
            status: StatusText::from_outcome(&outcome),
            result: outcome.as_ref().ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render(&outcome);
    }

    if !matches!(&outcome, Ok(result) if result.verified) {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_live(config: &Config) -> Result<()> {
    let session = Session::open(config).context("failed to start session")?;
    let handle = session.handle();
    print_status(&StatusText::default());

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(
        1.0 / f64::from(config.preview_fps),
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let (mut shown, mut skipped) = (0u64, 0u64);
    loop {
        tokio::select! {
            _ = ticker.tick() => match handle.preview().await? {
                Some(frame) => {
                    shown += 1;
                    tracing::trace!(
                        seq = frame.sequence,
                        brightness = frame.avg_brightness(),
                        "preview frame"
                    );
                }
                None => skipped += 1,
            },
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(_) => render(&handle.verify().await),
                None => break,
            },
            _ = &mut ctrl_c => break,
        }
    }

    tracing::info!(shown, skipped, "preview stopped");
    session.close().await;
    Ok(())
}

fn score_pair(config: &Config, a: PathBuf, b: PathBuf) -> Result<()> {
    let mut model = OnnxSiameseModel::load(&config.model_path, config.model_layout)
        .context("failed to load similarity model")?;
    let ta = preprocess_file(&a).with_context(|| format!("failed to load {}", a.display()))?;
    let tb = preprocess_file(&b).with_context(|| format!("failed to load {}", b.display()))?;

    let score = model.predict(&ta, &tb)?;
    let verdict = if score > config.thresholds.detection {
        "match"
    } else {
        "no match"
    };
    println!("{score:.4} ({verdict})");
    Ok(())
}

fn list_gallery(config: &Config) -> Result<()> {
    let gallery = DirectoryGallery::new(config.gallery_dir());
    let entries = gallery.entries()?;
    if entries.is_empty() {
        println!("No reference images in {}", gallery.dir().display());
        return Ok(());
    }
    for entry in &entries {
        println!("{}", entry.name);
    }
    println!("{} reference image(s)", entries.len());
    Ok(())
}

fn camera_test(config: &Config, save: Option<PathBuf>) -> Result<()> {
    println!("Running camera diagnostics...");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    let camera = engine::open_camera(config)?;
    let frame = camera.capture_frame()?;
    println!(
        "Captured {}x{} frame (seq {}), mean brightness {:.1}",
        frame.width,
        frame.height,
        frame.sequence,
        frame.avg_brightness()
    );

    let crop = config.geometry.apply(&frame)?;
    let tensor = preprocess_frame(&crop)?;
    println!(
        "Capture region {}x{} -> tensor {:?}, mean {:.3}",
        crop.width,
        crop.height,
        tensor.shape(),
        tensor.mean()
    );
    if let Some(path) = save {
        crop.to_rgb_image()
            .save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved {}x{} crop to {}", crop.width, crop.height, path.display());
    }
    Ok(())
}

fn render(outcome: &Result<VerificationResult, EngineError>) {
    match outcome {
        Ok(result) if result.verified => tracing::info!("user verified"),
        Ok(_) => tracing::info!("user not verified"),
        Err(e) => tracing::warn!(error = %e, "verification failed"),
    }
    print_status(&StatusText::from_outcome(outcome));
}

fn print_status(status: &StatusText) {
    println!("{}", status.verification);
    if !status.message.is_empty() {
        println!("{}", status.message);
    }
}
