//! Assistant Sync - CLI
//!
//! Sends messages to the assistant and follows replies from the terminal.

use anyhow::{Context, Result};
use assistant_sync::auth::StaticSessionProvider;
use assistant_sync::backend::{HttpBeacon, HttpChatBackend};
use assistant_sync::chat::{ChatEngine, ChatMessage, Role, SendOutcome};
use assistant_sync::lifecycle::LifecycleSignal;
use assistant_sync::poll::PollOutcome;
use assistant_sync::queue::FileStore;
use assistant_sync::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long an interrupted run waits for flushed beacons before exiting
const BEACON_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "assistant-sync")]
#[command(about = "Reliable message delivery for the assistant chat")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "SYNC_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and wait for the reply
    Send {
        /// Message text
        message: String,

        /// Existing thread to send to (a new thread is created otherwise)
        #[arg(short, long)]
        thread: Option<String>,

        /// Return right after dispatch instead of polling for the reply
        #[arg(long)]
        no_wait: bool,
    },

    /// Thread operations
    Threads {
        #[command(subcommand)]
        action: ThreadAction,
    },

    /// Show a thread's cleaned-up history (resumes polling if a reply is due)
    History {
        /// Thread ID
        thread: String,
    },

    /// Re-send messages left queued by an earlier run
    Flush,

    /// List messages not yet confirmed dispatched
    Pending,
}

#[derive(Subcommand)]
enum ThreadAction {
    /// List threads for the configured assistant
    List,

    /// Rename a thread
    Rename {
        /// Thread ID
        id: String,
        /// New title
        title: String,
    },

    /// Delete a thread
    Delete {
        /// Thread ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,assistant_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(Some(&cli.config))?;
    let (engine, beacon) = build_engine(&config)?;
    let engine = Arc::new(engine);

    match cli.command {
        Commands::Send {
            message,
            thread,
            no_wait,
        } => run_send(engine, &beacon, &message, thread.as_deref(), no_wait).await,
        Commands::Threads { action } => run_threads(&engine, action).await,
        Commands::History { thread } => run_history(engine, &beacon, &thread).await,
        Commands::Flush => {
            let report = engine.startup().await;
            println!(
                "Re-sent {} of {} pending message(s), {} still queued",
                report.removed, report.attempted, report.remaining
            );
            Ok(())
        }
        Commands::Pending => {
            let items = engine.pending();
            if items.is_empty() {
                println!("No pending messages.");
            }
            for item in items {
                println!(
                    "{}  {}  [{}] {}",
                    item.id,
                    item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                    item.payload.thread_id.as_deref().unwrap_or("-"),
                    item.payload.message
                );
            }
            Ok(())
        }
    }
}

fn build_engine(config: &Config) -> Result<(ChatEngine, Arc<HttpBeacon>)> {
    let sessions = Arc::new(StaticSessionProvider::from_parts(
        config.access_token.clone(),
        config.user_id.clone(),
    ));
    let backend = Arc::new(
        HttpChatBackend::new(&config.api_base_url, config.request_timeout, sessions.clone())
            .context("Failed to create backend client")?,
    );
    let beacon = Arc::new(HttpBeacon::new(&config.api_base_url, sessions.clone()));
    let storage = Arc::new(FileStore::new(&config.data_dir));

    tracing::debug!(data_dir = %config.data_dir.display(), "Using local storage");
    let engine = ChatEngine::new(
        config.chat.clone(),
        backend,
        beacon.clone(),
        sessions,
        storage,
    );
    Ok((engine, beacon))
}

async fn run_send(
    engine: Arc<ChatEngine>,
    beacon: &HttpBeacon,
    message: &str,
    thread: Option<&str>,
    no_wait: bool,
) -> Result<()> {
    engine.startup().await;

    if let Some(id) = thread {
        engine
            .select_thread(id)
            .await
            .with_context(|| format!("Failed to load thread {}", id))?;
    }

    let outcome = engine.send(message).await?;
    let SendOutcome::Sent {
        thread_id,
        client_message_id,
        dispatched,
    } = outcome
    else {
        println!("Nothing sent.");
        return Ok(());
    };

    println!(
        "Message {} {} (thread {})",
        client_message_id,
        if dispatched { "sent" } else { "queued" },
        thread_id.as_deref().unwrap_or("none")
    );

    if no_wait || thread_id.is_none() {
        report_pending(&engine);
        return Ok(());
    }
    follow_reply(engine, beacon).await
}

async fn run_history(engine: Arc<ChatEngine>, beacon: &HttpBeacon, thread: &str) -> Result<()> {
    engine
        .select_thread(thread)
        .await
        .with_context(|| format!("Failed to load thread {}", thread))?;

    if engine.is_polling().await {
        print_messages(&engine.messages().await);
        println!("Waiting for the assistant...");
        return follow_reply(engine, beacon).await;
    }
    print_messages(&engine.messages().await);
    Ok(())
}

/// Wait for the poll to finish.
///
/// Ctrl-C unloads: pending messages go out as beacons, which get
/// [`BEACON_GRACE`] to land before the process exits. A run that finishes
/// normally leaves pending messages queued for the next startup to re-send.
async fn follow_reply(engine: Arc<ChatEngine>, beacon: &HttpBeacon) -> Result<()> {
    let (signals_tx, signals_rx) = mpsc::channel(4);
    let lifecycle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_lifecycle(signals_rx).await })
    };

    let outcome = tokio::select! {
        outcome = engine.wait_for_reply() => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(outcome) = outcome else {
        tracing::info!("Interrupted, flushing pending messages");
        let _ = signals_tx.send(LifecycleSignal::Unload).await;
        lifecycle.await.context("Lifecycle task failed")?;
        if !beacon.settle(BEACON_GRACE).await {
            eprintln!(
                "{} message(s) may not have been delivered.",
                beacon.in_flight()
            );
        }
        return Ok(());
    };

    drop(signals_tx);
    lifecycle.await.context("Lifecycle task failed")?;

    match outcome {
        Some(PollOutcome::Resolved { .. }) => print_messages(&engine.messages().await),
        Some(PollOutcome::TimedOut { cycles }) => {
            println!("No reply after {} checks; try `history` later.", cycles)
        }
        Some(PollOutcome::Superseded) | None => {}
    }
    report_pending(&engine);
    Ok(())
}

fn report_pending(engine: &ChatEngine) {
    let count = engine.pending().len();
    if count > 0 {
        println!(
            "{} message(s) still queued; they will be re-sent on the next run.",
            count
        );
    }
}

async fn run_threads(engine: &ChatEngine, action: ThreadAction) -> Result<()> {
    match action {
        ThreadAction::List => {
            let threads = engine.list_threads().await?;
            if threads.is_empty() {
                println!("No threads.");
            }
            for t in threads {
                println!(
                    "{}  {}  {}",
                    t.id,
                    t.updated_at.format("%Y-%m-%d %H:%M"),
                    t.title
                );
            }
        }
        ThreadAction::Rename { id, title } => {
            let thread = engine.rename_thread(&id, &title).await?;
            println!("Renamed {} to \"{}\"", thread.id, thread.title);
        }
        ThreadAction::Delete { id } => {
            engine.delete_thread(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

fn print_messages(messages: &[ChatMessage]) {
    for m in messages {
        let who = match (m.role, m.is_error) {
            (_, true) => "error",
            (Role::User, _) => "you",
            (Role::Assistant, _) => "assistant",
            (Role::System, _) => "system",
        };
        if m.is_processing {
            println!("{:>9}: ...", who);
        } else {
            println!("{:>9}: {}", who, m.content);
        }
    }
}
