use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emocap_core::labels::SAVE_KEY;
use emocap_core::{dataset, CaptureSession, CsvDataset, FaceMesh, LabelRegistry, SampleCounter};
use emocap_hw::Camera;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use config::Config;
use terminal::TerminalUi;

#[derive(Parser)]
#[command(name = "emocap", about = "Collect emotion-labeled face mesh samples")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive capture session
    Collect {
        /// Dataset CSV to append to
        #[arg(short, long)]
        dataset: Option<PathBuf>,
        /// V4L2 device path (e.g., /dev/video0)
        #[arg(long)]
        device: Option<String>,
        /// Directory with face_detector.onnx and face_landmark.onnx
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Start counters from the rows already in the dataset
        #[arg(long)]
        seed_counts: bool,
    },
    /// Show per-label row counts of a dataset file
    Summary {
        /// Dataset CSV to read
        #[arg(short, long)]
        dataset: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the label key bindings
    Labels,
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    // stdout belongs to the terminal preview while a session runs.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(log_writer)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect {
            dataset,
            device,
            model_dir,
            seed_counts,
        } => {
            if let Some(path) = dataset {
                config.dataset_path = path;
            }
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(dir) = model_dir {
                config.model_dir = dir;
            }
            config.seed_counts_from_dataset |= seed_counts;
            collect(&config)
        }
        Commands::Summary { dataset, json } => {
            let path = dataset.unwrap_or(config.dataset_path);
            let counts = dataset::label_counts(&path)
                .with_context(|| format!("failed to read dataset {}", path.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                print_counts(&path, &counts);
            }
            Ok(())
        }
        Commands::Labels => {
            print_key_help();
            Ok(())
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

fn collect(config: &Config) -> Result<()> {
    let writer = CsvDataset::ensure_initialized(&config.dataset_path).with_context(|| {
        format!(
            "failed to initialize dataset {}",
            config.dataset_path.display()
        )
    })?;

    let counter = if config.seed_counts_from_dataset {
        let existing = dataset::label_counts(writer.path())
            .context("failed to read existing dataset for counter seeding")?;
        tracing::info!(?existing, "seeding counters from dataset");
        SampleCounter::seeded(&existing)
    } else {
        SampleCounter::new()
    };

    let provider = FaceMesh::load(&config.model_dir, config.mesh_options()).with_context(|| {
        format!(
            "failed to load face mesh models from {}",
            config.model_dir.display()
        )
    })?;

    let camera = Camera::open(
        &config.camera_device,
        config.frame_width,
        config.frame_height,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;

    print_key_help();

    let ui = TerminalUi::open().context("failed to set up terminal")?;
    let mut session = CaptureSession::new(
        camera,
        provider,
        writer,
        ui,
        counter,
        config.session_options(),
    );
    let outcome = session.run();
    // Camera and terminal are released by now; dropping is a no-op.
    drop(session);
    let report = outcome?;

    println!("Saved this session:");
    if report.saved.is_empty() {
        println!("  (none)");
    }
    for (label, n) in &report.saved {
        println!("  {label:<10} {n}");
    }

    if config.print_summary {
        let counts = dataset::label_counts(&config.dataset_path)?;
        print_counts(&config.dataset_path, &counts);
    }
    Ok(())
}

fn log_writer() -> io::Stderr {
    io::stderr()
}

fn key_help() -> Vec<String> {
    let mut lines = vec![format!("Press keys to set label and '{SAVE_KEY}' to save a sample:")];
    for (key, label) in LabelRegistry::bindings() {
        lines.push(format!("  Press '{key}' for {label}"));
    }
    lines.push(format!("Press '{SAVE_KEY}' to save a sample with the current label."));
    lines.push("Press ESC to exit.".to_string());
    lines
}

fn print_key_help() {
    for line in key_help() {
        println!("{line}");
    }
}

fn print_counts(path: &Path, counts: &BTreeMap<String, u64>) {
    println!("Label counts in {}:", path.display());
    if counts.is_empty() {
        println!("  (no samples)");
    }
    for (label, n) in counts {
        println!("  {label:<10} {n}");
    }
}
