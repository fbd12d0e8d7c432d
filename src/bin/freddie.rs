//! CLI binary for freddie.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use freddie::chat::{ChatTurn, FileRef, FsKeyValue, PersistentChatStore};
use freddie::notify::BusEvent;
use freddie::registry::{DownloadState, HttpTransport, ModuleRegistryCache, PollSchedule};
use freddie::{DownloadMonitor, DownloadReconciler, FreddieConfig, NotificationBus};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Freddie: local AI assistant client.
#[derive(Parser)]
#[command(name = "freddie", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// List the backend's module catalog.
    Models,

    /// Start downloading a module.
    Download {
        /// Module id.
        id: String,
        /// Free space to allow for the download, in bytes. Unlimited if omitted.
        #[arg(long)]
        available_bytes: Option<u64>,
    },

    /// Cancel a running download.
    Cancel {
        /// Module id.
        id: String,
    },

    /// Delete a downloaded module.
    Delete {
        /// Module id.
        id: String,
    },

    /// Poll downloads and print notifications until Ctrl+C.
    Watch,

    /// List stored conversations.
    Chats,

    /// Send one chat message.
    Send {
        /// Module id to chat with.
        module: String,
        /// Message text.
        text: String,
        /// Continue the stored conversation with this id.
        #[arg(long)]
        chat: Option<String>,
        /// Attach a file.
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
}

/// Long-lived objects shared by the commands.
struct App {
    config: FreddieConfig,
    bus: NotificationBus,
    reconciler: Arc<DownloadReconciler>,
}

impl App {
    fn new(config: FreddieConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(&config.backend));
        let cache = Arc::new(ModuleRegistryCache::new(transport));
        let bus = NotificationBus::with_default_duration(std::time::Duration::from_millis(
            config.notifications.default_duration_ms,
        ));
        let reconciler = Arc::new(DownloadReconciler::new(cache, bus.clone()));
        Self {
            config,
            bus,
            reconciler,
        }
    }

    fn cache(&self) -> &Arc<ModuleRegistryCache> {
        self.reconciler.cache()
    }

    fn open_store(&self) -> anyhow::Result<Arc<PersistentChatStore>> {
        let dir = self.config.storage.resolved_data_dir();
        let backend = FsKeyValue::new(&dir)?;
        Ok(Arc::new(PersistentChatStore::with_capacity(
            Arc::new(backend),
            self.config.storage.max_conversations,
        )))
    }

    /// Seed the reconciler with the current catalog.
    async fn prime(&self) -> anyhow::Result<()> {
        let snapshot = self
            .cache()
            .refresh()
            .await
            .context("failed to fetch module catalog")?;
        self.reconciler.apply(&snapshot);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(FreddieConfig::default_config_path);
    let config = FreddieConfig::load_or_default(&config_path)?;

    let _log_guard = freddie::logging::init(&config.logging, &config.storage.resolved_data_dir())?;
    info!(config = %config_path.display(), backend = %config.backend.base_url, "freddie starting");

    let app = App::new(config);
    match cli.command {
        Command::Models => list_models(&app).await,
        Command::Download {
            id,
            available_bytes,
        } => {
            app.prime().await?;
            let ack = app
                .reconciler
                .request_download(&id, available_bytes.unwrap_or(u64::MAX))
                .await;
            print_notifications(&app.bus);
            println!("{:?}", ack?);
            Ok(())
        }
        Command::Cancel { id } => {
            app.prime().await?;
            let result = app.reconciler.request_cancel(&id).await;
            print_notifications(&app.bus);
            Ok(result?)
        }
        Command::Delete { id } => {
            app.prime().await?;
            let result = app.reconciler.request_delete(&id).await;
            print_notifications(&app.bus);
            Ok(result?)
        }
        Command::Watch => watch(&app).await,
        Command::Chats => list_chats(&app),
        Command::Send {
            module,
            text,
            chat,
            attachments,
        } => send(&app, &module, &text, chat.as_deref(), &attachments).await,
    }
}

async fn list_models(app: &App) -> anyhow::Result<()> {
    let snapshot = app
        .cache()
        .refresh()
        .await
        .context("failed to fetch module catalog")?;
    for module in &snapshot.modules {
        let marker = if module.downloaded { "*" } else { " " };
        println!(
            "{marker} {:<28} {:>9} {:<12} {}",
            module.id,
            format_bytes(module.size_bytes),
            module.category.as_deref().unwrap_or("-"),
            module.state
        );
    }
    Ok(())
}

async fn watch(app: &App) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut notes = app.bus.subscribe();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    app.reconciler.on_event(|event| {
        info!(module_id = %event.module_id(), "download event");
    });
    let schedule = PollSchedule::from(&app.config.polling);
    let monitor = DownloadMonitor::new(Arc::clone(&app.reconciler), schedule, cancel.child_token())
        .spawn();

    println!("Watching downloads. Press Ctrl+C to stop.\n");
    let mut last_progress = String::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = notes.recv() => {
                if let Some(BusEvent::Published(note)) = event {
                    println!("[{}] {}", note.severity, note.message);
                }
            }
            _ = tokio::time::sleep(schedule.active) => {
                let line = progress_line(app);
                if !line.is_empty() && line != last_progress {
                    println!("{line}");
                    last_progress = line;
                }
            }
        }
    }

    monitor.await.context("download monitor task failed")?;
    Ok(())
}

fn progress_line(app: &App) -> String {
    app.cache()
        .snapshot()
        .modules
        .iter()
        .filter_map(|m| match &m.state {
            DownloadState::Downloading(p) => Some(format!(
                "{} {:.1}% ({}/s, eta {:.0}s)",
                m.id,
                p.progress_pct,
                format_bytes(p.speed_bps as u64),
                p.eta_sec
            )),
            DownloadState::Retrying { attempt } => Some(format!("{} retrying #{attempt}", m.id)),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("  |  ")
}

fn list_chats(app: &App) -> anyhow::Result<()> {
    let store = app.open_store()?;
    for conv in store.load() {
        println!(
            "{}  {}  {:<50}  {}",
            conv.id,
            conv.updated_at.format("%Y-%m-%d %H:%M"),
            conv.title,
            conv.preview
        );
    }
    Ok(())
}

async fn send(
    app: &App,
    module: &str,
    text: &str,
    chat: Option<&str>,
    attachments: &[PathBuf],
) -> anyhow::Result<()> {
    let store = app.open_store()?;
    let conversation = match chat {
        Some(id) => Some(
            store
                .get(id)
                .with_context(|| format!("no stored conversation with id {id}"))?,
        ),
        None => None,
    };
    let files = attachments
        .iter()
        .map(|path| read_attachment(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    app.cache()
        .refresh()
        .await
        .context("failed to fetch module catalog")?;
    let turn = ChatTurn::new(Arc::clone(app.cache()), store, app.bus.clone());
    let outcome = turn.send(conversation, module, text, files).await?;

    if let Some(reply) = outcome
        .conversation
        .messages
        .last()
        .and_then(|m| m.content.as_text())
    {
        println!("{reply}");
    }
    eprintln!("conversation: {}", outcome.conversation.id);
    match outcome.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn read_attachment(path: &Path) -> anyhow::Result<FileRef> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(FileRef::from_bytes(name, mime_for(path), &bytes))
}

/// MIME type from the file extension.
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Print notifications that have not expired yet.
fn print_notifications(bus: &NotificationBus) {
    for note in bus.active() {
        eprintln!("[{}] {}", note.severity, note.message);
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
