use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use chat_nest::background::{BackgroundClient, BackgroundService, spawn_background};
use chat_nest::capture::{CaptureOutcome, CaptureSession, DocumentSource};
use chat_nest::config::{CaptureConfig, StorageConfig};
use chat_nest::protocol::{Request, Response};
use chat_nest::store::LibSqlBackend;
use chat_nest::transcript;

/// Capture and browse chat transcripts stored in a local archive.
#[derive(Parser)]
#[command(name = "chat-nest", version, about, long_about = None)]
struct Cli {
    /// Database file. Overrides CHAT_NEST_DB_PATH.
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a saved page and store the conversation
    Capture {
        /// Address the page was loaded from
        #[arg(long)]
        url: String,
        /// File holding the page's HTML
        #[arg(long, value_name = "FILE")]
        html: PathBuf,
    },
    /// List indexed conversations, most recent first
    List,
    /// Print one conversation as Markdown
    Show { id: String },
    /// Write conversations as Markdown files
    Export {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, value_name = "DIR", default_value = "./exports")]
        out: PathBuf,
    },
    /// Delete a conversation
    Delete { id: String },
    /// Replay conversations stashed while the archive was unreachable
    Recover,
    /// List stashed conversations without replaying them
    Pending,
    /// Rebuild the metadata index from stored conversations
    RebuildIndex,
}

/// A page snapshot read from disk.
struct SavedPage {
    url: String,
    html: String,
}

impl DocumentSource for SavedPage {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn html(&self) -> String {
        self.html.clone()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Daily rolling log file alongside stderr when a log directory is configured.
    let file_layer = std::env::var("CHAT_NEST_LOG_DIR").ok().map(|dir| {
        fmt::layer()
            .with_writer(tracing_appender::rolling::daily(dir, "chat-nest.log"))
            .with_ansi(false)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut storage = StorageConfig::from_env()?;
    if let Some(path) = cli.db {
        storage.db_path = path;
    }
    let capture = CaptureConfig::from_env()?;

    let db = LibSqlBackend::new_local(&storage.db_path)
        .await
        .with_context(|| format!("opening database at {}", storage.db_path.display()))?;
    let service = Arc::new(BackgroundService::from_backend(Arc::new(db), &storage));

    // Startup reconciliation of anything stashed by an earlier run.
    match service.on_startup().await {
        Ok(report) if report.recovered + report.superseded + report.remaining > 0 => info!(
            recovered = report.recovered,
            superseded = report.superseded,
            remaining = report.remaining,
            "Startup recovery"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Startup recovery failed"),
    }

    let (client, _background) = spawn_background(service.clone(), capture.response_timeout);

    match cli.command {
        Commands::Capture { url, html } => {
            let html = std::fs::read_to_string(&html)
                .with_context(|| format!("reading {}", html.display()))?;
            let page = Arc::new(SavedPage { url, html });
            let session = CaptureSession::new(page, client, service.recovery().clone())?;

            match session.capture_once().await {
                CaptureOutcome::Saved { id } => println!("Saved {id}"),
                CaptureOutcome::Stashed { id } => println!("Stashed {id} for recovery"),
                CaptureOutcome::Rejected { id, error } => bail!("{id} rejected: {error}"),
                CaptureOutcome::Lost { id, error } => bail!("{id} lost: {error}"),
                CaptureOutcome::NoContent(e) => bail!("Nothing captured: {e}"),
            }
        }
        Commands::List => {
            let response = request(&client, Request::GetConversationIndex).await?;
            for entry in response.data.unwrap_or_default() {
                println!(
                    "{}  {:<8}  {}  {}",
                    format_time(entry.timestamp),
                    entry.platform.to_string(),
                    entry.id,
                    entry.title
                );
            }
        }
        Commands::Show { id } => {
            let response = request(&client, Request::GetConversation { id: Some(id) }).await?;
            if let Some(conversation) = response.conversation {
                print!("{}", transcript::render(&conversation));
            }
        }
        Commands::Export { ids, out } => {
            let response = request(&client, Request::ExportConversations { ids }).await?;
            std::fs::create_dir_all(&out)
                .with_context(|| format!("creating {}", out.display()))?;
            for export in response.exports.unwrap_or_default() {
                let path = out.join(&export.file_name);
                std::fs::write(&path, &export.transcript)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("{}", path.display());
            }
        }
        Commands::Delete { id } => {
            request(&client, Request::DeleteConversation { id: Some(id.clone()) }).await?;
            println!("Deleted {id}");
        }
        Commands::Recover => {
            let response = request(&client, Request::RecoverPending).await?;
            let report = response.report.unwrap_or_default();
            println!(
                "Recovered {}, superseded {}, failed {}, remaining {}",
                report.recovered, report.superseded, report.failed, report.remaining
            );
        }
        Commands::Pending => {
            let response = request(&client, Request::GetPendingRecovery).await?;
            let pending = response.pending.unwrap_or_default();
            println!("{} unrecovered conversation(s)", pending.len());
            for conversation in pending {
                println!("  {}  {}", conversation.id, conversation.title);
            }
        }
        Commands::RebuildIndex => {
            let response = request(&client, Request::RebuildIndex).await?;
            println!("Index holds {} entries", response.data.unwrap_or_default().len());
        }
    }

    Ok(())
}

async fn request(client: &BackgroundClient, request: Request) -> anyhow::Result<Response> {
    let response = client.send(request).await?;
    if !response.success {
        bail!(response.error.unwrap_or_else(|| "request failed".to_string()));
    }
    Ok(response)
}

fn format_time(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}
