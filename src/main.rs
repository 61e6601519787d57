use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecam::{annotate, config, gallery::Gallery, live, Pipeline};
use log::info;

#[derive(Parser)]
#[command(name = "facecam")]
#[command(version, about = "Real-time face recognition from a camera feed")]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of reference face images (one person per file)
    #[arg(long, global = true)]
    faces: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces from the camera and show them in a window
    Watch {
        /// Camera device, e.g. /dev/video0
        #[arg(short, long)]
        camera: Option<String>,
        /// Recognize only every Nth frame
        #[arg(long)]
        skip: Option<u32>,
        /// Downscale factor applied before detection, in (0, 1]
        #[arg(long)]
        scale: Option<f32>,
        /// Run recognition on a background thread
        #[arg(long)]
        background: bool,
    },
    /// Load the reference faces and list the identities found
    Gallery {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Recognize faces in a single image and save an annotated copy
    Annotate {
        input: PathBuf,
        /// Output image (defaults to <input>_annotated.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(faces) = cli.faces {
        cfg.faces_dir = faces;
    }

    match cli.command {
        Commands::Watch {
            camera,
            skip,
            scale,
            background,
        } => {
            if let Some(camera) = camera {
                cfg.camera = camera;
            }
            if let Some(skip) = skip {
                cfg.process_every = Some(skip);
            }
            if let Some(scale) = scale {
                cfg.detect_scale = scale;
            }
            cfg.background |= background;
            live::run(&cfg)
        }
        Commands::Gallery { json } => list_gallery(&cfg, json),
        Commands::Annotate { input, output } => annotate::run(&cfg, &input, output.as_deref()),
        Commands::Config => open_config(cli.config),
    }
}

fn list_gallery(cfg: &config::Config, json: bool) -> Result<()> {
    let mut pipeline = Pipeline::new(&cfg.detector_model, &cfg.recognizer_model)
        .context("Failed to initialize face recognition pipeline")?;
    let gallery = Gallery::load(
        &cfg.faces_dir,
        &mut pipeline,
        &cfg.detection(),
        cfg.color_mode,
    )?;

    let entries = gallery.entries();
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    info!(
        "{} known face(s) in {}",
        entries.len(),
        cfg.faces_dir.display()
    );
    for entry in entries {
        let [r, g, b] = entry.color;
        println!("{:<24} #{:02x}{:02x}{:02x}", entry.name, r, g, b);
    }
    Ok(())
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.clone());
    if !config_path.exists() {
        info!("Writing default config to {}", config_path.display());
        config::save_config(&config::Config::default(), Some(&config_path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
