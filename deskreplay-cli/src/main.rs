use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deskreplay::{
    create_device, validate_steps, ClientRect, FeatureCatalog, FixedWindow, PlaybackConfig,
    PlaybackEngine, RepeatController, WindowBinding,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

mod utils;

use utils::{forward_events, init_logging, parse_rect};

#[derive(Parser)]
#[command(name = "deskreplay")]
#[command(version)]
#[command(about = "Replay recorded desktop input against a window", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play one feature from a catalog file
    Play {
        /// Path to the feature catalog (JSON array of features)
        file: PathBuf,

        /// Feature name, or its 0-based index in the catalog
        #[arg(short, long)]
        feature: String,

        /// Client rectangle of the target window as LEFT,TOP,RIGHT,BOTTOM.
        /// Without it, step positions are used as absolute pixels.
        #[arg(long, value_parser = parse_rect)]
        rect: Option<ClientRect>,

        /// Number of times to play the feature
        #[arg(short, long, default_value_t = 1)]
        repeat: u32,

        /// Seconds to wait between runs
        #[arg(short, long, default_value_t = 1.0)]
        interval: f64,

        /// Playback timing configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Log the input that would be sent instead of sending it
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// List the features of a catalog
    List {
        file: PathBuf,

        /// Also print every step
        #[arg(short, long, default_value = "false")]
        verbose: bool,

        /// Print the catalog as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Check every step of every feature in a catalog
    Validate { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            file,
            feature,
            rect,
            repeat,
            interval,
            config,
            dry_run,
        } => play(file, feature, rect, repeat, interval, config, dry_run).await,
        Commands::List {
            file,
            verbose,
            json,
        } => list(file, verbose, json),
        Commands::Validate { file } => validate(file),
    }
}

fn load_catalog(file: &Path) -> Result<FeatureCatalog> {
    let catalog = FeatureCatalog::load(file)
        .with_context(|| format!("Failed to read catalog {}", file.display()))?;
    if catalog.is_empty() {
        warn!(path = %file.display(), "Catalog is empty or missing");
    }
    Ok(catalog)
}

async fn play(
    file: PathBuf,
    feature: String,
    rect: Option<ClientRect>,
    repeat: u32,
    interval: f64,
    config: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let catalog = load_catalog(&file)?;
    let feature = catalog
        .resolve(&feature)
        .cloned()
        .with_context(|| format!("No feature named or numbered '{}' in {}", feature, file.display()))?;

    let config = config.map(PlaybackConfig::load).unwrap_or_default();
    let window: Arc<dyn WindowBinding> = match rect {
        Some(rect) => Arc::new(FixedWindow::new(rect)),
        None => {
            warn!("No --rect given, step positions are treated as absolute pixels");
            Arc::new(FixedWindow::without_geometry())
        }
    };
    let device = create_device(dry_run)?;
    let engine = Arc::new(PlaybackEngine::new(window, device, config));
    let controller = Arc::new(RepeatController::new(Arc::clone(&engine)));

    let events = engine.event_stream();
    let (done_tx, done_rx) = watch::channel(false);
    let printer = tokio::spawn(forward_events(events, done_rx, |line| println!("{}", line)));

    let controller_ctrlc = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        println!("\nCtrl+C detected, stopping playback...");
        controller_ctrlc.stop();
    })?;

    info!(
        feature = %feature.name,
        steps = feature.steps.len(),
        repeat,
        interval,
        "Starting playback"
    );
    let mut handle = controller.run_repeated(feature.steps, repeat, interval)?;
    let summary = handle.finished().await;
    done_tx.send_replace(true);
    printer.await?;

    println!("{}", summary.message);
    if !summary.success {
        bail!("playback of '{}' did not complete", feature.name);
    }
    Ok(())
}

fn list(file: PathBuf, verbose: bool, json: bool) -> Result<()> {
    let catalog = load_catalog(&file)?;
    if json {
        println!("{}", deskreplay::step::features_to_json(catalog.features())?);
        return Ok(());
    }
    for (index, feature) in catalog.features().iter().enumerate() {
        match &feature.group {
            Some(group) => println!(
                "{:>3}  {}  ({} steps, group {})",
                index,
                feature.name,
                feature.steps.len(),
                group
            ),
            None => println!("{:>3}  {}  ({} steps)", index, feature.name, feature.steps.len()),
        }
        if verbose {
            for (n, step) in feature.steps.iter().enumerate() {
                println!("       {:>3}. {} (delay {}s)", n + 1, step.describe(), step.delay_after);
            }
        }
    }
    Ok(())
}

fn validate(file: PathBuf) -> Result<()> {
    let catalog = load_catalog(&file)?;
    let mut invalid = 0usize;
    for feature in catalog.features() {
        match validate_steps(&feature.steps) {
            Ok(()) => println!("ok       {}", feature.name),
            Err(e) => {
                invalid += 1;
                println!("invalid  {}: {}", feature.name, e);
            }
        }
    }
    if invalid > 0 {
        bail!("{} of {} features are invalid", invalid, catalog.len());
    }
    println!("{} features valid", catalog.len());
    Ok(())
}
