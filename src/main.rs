// Command-line entry point: session maintenance and editing

use manga_translator::{core::Config, services::storage::write_png, ServiceRegistry};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "manga-translator", version, about = "Manga page translation and session editing")]
struct Cli {
    /// Print this run's metrics in Prometheus text format when done
    #[arg(long, global = true)]
    metrics: bool,

    /// With --metrics, print the JSON snapshot instead
    #[arg(long, global = true, requires = "metrics")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect and maintain editing sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Delete sessions older than the given age
    Reap {
        /// Maximum age in hours (defaults to SESSION_MAX_AGE_HOURS)
        #[arg(long)]
        hours: Option<u64>,
    },
    /// Print a session and its group as JSON
    Show {
        id: String,
        /// Bypass the cache and rescan the group
        #[arg(long)]
        reload: bool,
    },
    /// Render the session's current text to a PNG file
    Preview {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Save the edited page to the output directory
    Export {
        id: String,
        /// File name (defaults to edited_<source>.png)
        #[arg(long)]
        name: Option<String>,
    },
    /// Rebuild the group index from a full scan
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    let filter = EnvFilter::new(format!("manga_translator={}", level_name(config.log_level())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registry = ServiceRegistry::new(config.clone());

    match cli.command {
        Command::Sessions { action } => run_sessions(&registry, action).await?,
    }

    if cli.metrics {
        let metrics = registry.metrics();
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
        } else {
            print!("{}", metrics.to_prometheus());
        }
    }
    Ok(())
}

async fn run_sessions(registry: &ServiceRegistry, action: SessionAction) -> Result<()> {
    let store = registry
        .session_store()
        .await
        .context("Failed to open session store")?;

    match action {
        SessionAction::Reap { hours } => {
            let hours = hours.unwrap_or(registry.config().session.max_age_hours);
            let report = store.cleanup_older_than(hours).await?;
            for skipped in &report.skipped {
                warn!("Skipped {}: {}", skipped.key, skipped.reason);
            }
            println!(
                "Removed {} sessions older than {}h ({} unreadable skipped)",
                report.removed.len(),
                hours,
                report.skipped.len()
            );
        }
        SessionAction::Show { id, reload } => {
            let view = store
                .get_session(&id, reload)
                .await?
                .with_context(|| format!("Session {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        SessionAction::Preview { id, out } => {
            let editor = registry.editor().await?;
            let rendered = editor
                .render(&id)
                .await?
                .with_context(|| format!("Session {id} not found"))?;
            write_png(&out, DynamicImage::ImageRgba8(rendered))
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            info!("Preview written to {}", out.display());
        }
        SessionAction::Export { id, name } => {
            let editor = registry.editor().await?;
            let artifact = editor
                .save_edited_image(&id, name.as_deref())
                .await?
                .with_context(|| format!("Session {id} not found"))?;
            println!("{artifact}");
        }
        SessionAction::Reindex => {
            let report = store.rebuild_group_index().await?;
            for skipped in &report.skipped {
                warn!("Skipped {}: {}", skipped.key, skipped.reason);
            }
            println!(
                "Indexed {} sessions in {} groups ({} skipped)",
                report.sessions,
                report.groups,
                report.skipped.len()
            );
        }
    }
    Ok(())
}

fn level_name(level: tracing::Level) -> &'static str {
    match level {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    }
}
