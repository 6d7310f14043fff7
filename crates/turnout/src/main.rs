use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use turnout_core::models::missing_models;
use turnout_core::OnnxEmbedder;
use turnout_hw::{Camera, V4lOpener};

mod config;
mod engine;
mod export;
mod presenter;
mod session;
mod setup;
mod store;
mod users;

use config::Config;
use export::ExportFormat;
use presenter::ConsolePresenter;
use session::{LocalClock, RecognitionLoop, SessionSettings};
use store::Storage;

#[derive(Parser)]
#[command(name = "turnout", version, about = "Face-recognition attendance tracker")]
struct Cli {
    /// Config file (overrides TURNOUT_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Run live recognition until Ctrl-C; SIGHUP reloads the user directory
    Session,
    /// Inspect or maintain the attendance log
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Export the attendance log
    Export {
        /// Output file; the format follows the extension unless --format is given
        path: PathBuf,
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
    },
    /// Show configuration and store status as JSON
    Status,
    /// List V4L2 capture devices
    Devices,
    /// Download and verify the ONNX models
    Setup {
        /// Target directory (defaults to the configured model_dir)
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a user from a name and a photo
    Add {
        name: String,
        /// Image file with the user's face
        photo: PathBuf,
    },
    /// Remove a registered user
    Remove { name: String },
    /// List registered users
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print every attendance record
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete every attendance record
    Clear,
    /// Renumber record ids 1..N in their current order
    Renumber,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::User { action } => user_command(&config, action).await,
        Commands::Session => run_session(&config).await,
        Commands::History { action } => history_command(&config, action).await,
        Commands::Export { path, format } => {
            let format = match format {
                Some(f) => f,
                None => ExportFormat::from_path(&path)?,
            };
            let store = open_store(&config).await?;
            let events = store.list_attendance().await?;
            export::export(&events, format, &path)
                .with_context(|| format!("failed to export to {}", path.display()))?;
            println!("Exported {} record(s) to {}", events.len(), path.display());
            Ok(())
        }
        Commands::Status => status(&config).await,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Setup { model_dir } => {
            let dir = model_dir.unwrap_or_else(|| config.model_dir.clone());
            setup::run(&dir)
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let explicit = explicit.map(|p| p.to_string_lossy().into_owned());
    Config::from_lookup(|key| match (key, &explicit) {
        ("TURNOUT_CONFIG", Some(path)) => Some(path.clone()),
        _ => std::env::var(key).ok(),
    })
    .context("failed to load configuration")
}

async fn open_store(config: &Config) -> Result<Arc<dyn Storage>> {
    store::open_store(config)
        .await
        .with_context(|| format!("failed to open {} store", config.store))
}

async fn user_command(config: &Config, action: UserAction) -> Result<()> {
    let store = open_store(config).await?;
    match action {
        UserAction::Add { name, photo } => {
            let bytes = std::fs::read(&photo)
                .with_context(|| format!("failed to read {}", photo.display()))?;
            let name = users::register_user(store.as_ref(), &name, &bytes).await?;
            println!("Registered {name}");
        }
        UserAction::Remove { name } => {
            if !store.remove_user(name.trim()).await? {
                bail!("no user named {:?}", name.trim());
            }
            println!("Removed {}", name.trim());
        }
        UserAction::List { json } => {
            let users = store.list_users().await?;
            if json {
                let rows: Vec<_> = users
                    .iter()
                    .map(|u| serde_json::json!({ "name": u.identity, "photo_bytes": u.photo.len() }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if users.is_empty() {
                println!("No users registered");
            } else {
                for user in &users {
                    println!("{}", user.identity);
                }
            }
        }
    }
    Ok(())
}

async fn history_command(config: &Config, action: HistoryAction) -> Result<()> {
    let store = open_store(config).await?;
    match action {
        HistoryAction::List { json } => {
            let events = store.list_attendance().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No attendance records");
            } else {
                println!("{:<6} {:<24} {:<10} {}", "ID", "NAME", "DATE", "TIME");
                for e in &events {
                    println!("{:<6} {:<24} {:<10} {}", e.id, e.identity, e.date, e.time);
                }
            }
        }
        HistoryAction::Clear => {
            let removed = store.clear_attendance().await?;
            println!("Cleared {removed} record(s)");
        }
        HistoryAction::Renumber => {
            let count = store.renumber_attendance().await?;
            println!("Renumbered {count} record(s)");
        }
    }
    Ok(())
}

async fn run_session(config: &Config) -> Result<()> {
    let missing = missing_models(&config.model_dir);
    if !missing.is_empty() {
        bail!(
            "missing model file(s) in {}: {} (run `turnout setup`)",
            config.model_dir.display(),
            missing.join(", ")
        );
    }

    let store = open_store(config).await?;
    let embedder = OnnxEmbedder::load(&config.model_dir).context("failed to load ONNX models")?;
    tracing::info!(model_dir = %config.model_dir.display(), "models loaded");
    let engine = engine::spawn_engine(Box::new(embedder))?;

    let opener = Arc::new(V4lOpener {
        device: config.camera_device.clone(),
        width: config.frame_width,
        height: config.frame_height,
    });
    let mut session = RecognitionLoop::new(
        SessionSettings::from(config),
        opener,
        engine,
        store,
        Arc::new(LocalClock),
        Box::new(ConsolePresenter::stdout()),
    );

    let refresh = forward_hangups()?;
    println!(
        "Recognition running on {} (pid {}), press Ctrl-C to stop, send SIGHUP after adding users",
        config.camera_device,
        std::process::id()
    );
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let summary = session.run(shutdown, refresh).await?;

    println!(
        "Session ended after {:.0}s: {} recorded, {} unrecognized, {} frames",
        summary.duration.as_secs_f64(),
        summary.recorded,
        summary.unrecognized,
        summary.frames
    );
    Ok(())
}

/// Turn SIGHUP into directory refresh requests.
fn forward_hangups() -> Result<mpsc::Receiver<()>> {
    let mut hangup = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received");
            // A request already queued covers this one
            if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(()) {
                break;
            }
        }
    });
    Ok(rx)
}

async fn status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let status = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "store": config.store.to_string(),
        "users": store.count_users().await?,
        "attendance_records": store.list_attendance().await?.len(),
        "camera": {
            "device": config.camera_device,
            "present": Path::new(&config.camera_device).exists(),
        },
        "tolerance": config.tolerance,
        "match_policy": config.match_policy,
        "model_dir": config.model_dir,
        "models_missing": missing_models(&config.model_dir),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
