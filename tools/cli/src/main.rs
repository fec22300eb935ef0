//! tasksync CLI - Command line front end for the offline-first task store.
//!
//! Every command writes the local database first; remote propagation happens
//! in the background and is flushed before the process exits.

mod config;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tasksync_common::{LocalId, OwnerId, SyncState, TaskPatch, TaskRecord};
use tasksync_remote::{create_default_registry, OfflineRemote, RemoteStore};
use tasksync_store::{RecordStore, SqliteRecordStore};
use tasksync_sync::{ReconcileReport, StaticAuth, SyncEngine, SyncMode, SyncScheduler};

use crate::config::AppConfig;

/// Characters of the local id shown in listings.
const SHORT_ID_LEN: usize = 8;

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "tasksync - Offline-first task list")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config_dir>/tasksync/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Work without the remote; changes stay pending until the next online sync.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task.
    Add {
        /// Task title.
        title: String,

        /// Optional description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List tasks, newest first.
    List {
        /// Show sync state and last error for every task.
        #[arg(short, long)]
        long: bool,
    },

    /// Edit a task.
    Edit {
        /// Task id or unambiguous id prefix.
        id: String,

        /// New title.
        #[arg(short, long)]
        title: Option<String>,

        /// New description.
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,

        /// Remove the description.
        #[arg(long)]
        clear_description: bool,
    },

    /// Toggle a task's completion.
    Done {
        /// Task id or unambiguous id prefix.
        id: String,
    },

    /// Delete a task.
    Rm {
        /// Task id or unambiguous id prefix.
        id: String,
    },

    /// Push pending changes and pull remote ones.
    Sync,

    /// Show sync status.
    Status,

    /// Keep syncing and print the task list whenever it changes.
    Watch,

    /// Print shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // RUST_LOG, when set, overrides --verbose.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "tasksync", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::default_path().context("Cannot determine config directory")?,
    };
    let config = AppConfig::load(&config_path)?;
    let engine = open_engine(&config, cli.offline)?;

    let result = match cli.command {
        Commands::Add { title, description } => cmd_add(&engine, title, description),
        Commands::List { long } => cmd_list(&engine, long),
        Commands::Edit {
            id,
            title,
            description,
            clear_description,
        } => cmd_edit(&engine, &id, title, description, clear_description),
        Commands::Done { id } => cmd_done(&engine, &id),
        Commands::Rm { id } => cmd_rm(&engine, &id),
        Commands::Sync => cmd_sync(&engine).await,
        Commands::Status => cmd_status(&engine),
        Commands::Watch => cmd_watch(&engine, config.sync.sync_mode.clone()).await,
        Commands::Completions { .. } => Ok(()),
    };

    // Let background pushes finish or time out before exiting.
    engine.flush().await;
    result
}

/// Build the engine from configuration.
fn open_engine(config: &AppConfig, offline: bool) -> Result<SyncEngine> {
    let store = SqliteRecordStore::open(&config.database_path).with_context(|| {
        format!(
            "Failed to open database {}",
            config.database_path.display()
        )
    })?;

    let remote: Arc<dyn RemoteStore> = if offline {
        Arc::new(OfflineRemote)
    } else {
        create_default_registry()
            .resolve(&config.remote.provider, config.remote.config.clone())
            .with_context(|| format!("Failed to set up remote '{}'", config.remote.provider))?
    };
    debug!("Using {} store and {} remote", store.name(), remote.name());

    let auth = match &config.owner {
        Some(owner) => StaticAuth::signed_in(OwnerId::new(owner.as_str())?),
        None => StaticAuth::signed_out(),
    };

    Ok(SyncEngine::new(
        Arc::new(store),
        remote,
        Arc::new(auth),
        config.sync.clone(),
    ))
}

/// Visible tasks, with a hint when no owner is configured.
fn visible_tasks(engine: &SyncEngine) -> Result<Vec<TaskRecord>> {
    engine
        .tasks()
        .context("Cannot list tasks (is \"owner\" set in the config file?)")
}

/// Resolve a full id or unique prefix among the visible tasks.
fn resolve_id(engine: &SyncEngine, prefix: &str) -> Result<LocalId> {
    let matches: Vec<TaskRecord> = visible_tasks(engine)?
        .into_iter()
        .filter(|task| task.local_id.as_str().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => bail!("No task matches '{}'", prefix),
        [task] => Ok(task.local_id.clone()),
        _ => bail!(
            "'{}' matches {} tasks; use a longer prefix",
            prefix,
            matches.len()
        ),
    }
}

fn short_id(local_id: &LocalId) -> &str {
    let id = local_id.as_str();
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

fn state_label(task: &TaskRecord) -> &'static str {
    match task.sync_state {
        SyncState::Synced => "synced",
        SyncState::PendingPush if task.failure_count > 0 => "rejected",
        SyncState::PendingPush => "pending",
        SyncState::PendingDelete => "deleting",
    }
}

fn print_tasks(tasks: &[TaskRecord], long: bool) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }

    for task in tasks {
        let check = if task.is_completed { "x" } else { " " };
        if long {
            println!(
                "[{}] {}  {}  ({})",
                check,
                task.local_id,
                task.title,
                state_label(task)
            );
            if let Some(description) = &task.description {
                println!("      {}", description);
            }
            if let Some(error) = &task.last_error {
                println!("      last error: {}", error);
            }
        } else {
            let marker = if task.sync_state == SyncState::Synced {
                ""
            } else {
                " *"
            };
            println!("[{}] {}  {}{}", check, short_id(&task.local_id), task.title, marker);
        }
    }
}

fn print_report(report: &ReconcileReport) {
    if report.coalesced {
        println!("A sync is already running.");
        return;
    }

    println!("Sync finished in {:?}", report.duration);
    println!("  Pushed: {}", report.pushed);
    println!("  Deleted: {}", report.deleted);
    println!("  Pulled: {} new, {} updated", report.pulled_created, report.pulled_updated);
    if report.stalled > 0 {
        println!("  Stalled: {} (edit them to retry)", report.stalled);
    }
    for failure in &report.failures {
        let kind = if failure.permanent { "rejected" } else { "will retry" };
        println!("  {} {}: {}", short_id(&failure.local_id), kind, failure.message);
    }
    if let Some(error) = &report.pull_error {
        println!("  Pull failed: {}", error);
    }
}

/// Add a task.
fn cmd_add(engine: &SyncEngine, title: String, description: Option<String>) -> Result<()> {
    if title.trim().is_empty() {
        bail!("Title cannot be empty");
    }

    let task = engine
        .create_task(title, description)
        .context("Failed to add task")?;
    println!("Added {}  {}", short_id(&task.local_id), task.title);
    Ok(())
}

/// List tasks.
fn cmd_list(engine: &SyncEngine, long: bool) -> Result<()> {
    let tasks = visible_tasks(engine)?;
    print_tasks(&tasks, long);
    Ok(())
}

/// Edit a task.
fn cmd_edit(
    engine: &SyncEngine,
    id: &str,
    title: Option<String>,
    description: Option<String>,
    clear_description: bool,
) -> Result<()> {
    if title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        bail!("Title cannot be empty");
    }

    let patch = TaskPatch {
        title,
        description: if clear_description {
            Some(None)
        } else {
            description.map(Some)
        },
        is_completed: None,
    };
    if patch.is_empty() {
        bail!("Nothing to change; pass --title, --description or --clear-description");
    }

    let local_id = resolve_id(engine, id)?;
    let task = engine
        .update_task(&local_id, patch)
        .context("Failed to edit task")?;
    println!("Updated {}  {}", short_id(&task.local_id), task.title);
    Ok(())
}

/// Toggle completion.
fn cmd_done(engine: &SyncEngine, id: &str) -> Result<()> {
    let local_id = resolve_id(engine, id)?;
    let task = engine
        .toggle_completion(&local_id)
        .context("Failed to update task")?;
    let state = if task.is_completed { "done" } else { "not done" };
    println!("Marked {} {}", short_id(&task.local_id), state);
    Ok(())
}

/// Delete a task.
fn cmd_rm(engine: &SyncEngine, id: &str) -> Result<()> {
    let local_id = resolve_id(engine, id)?;
    engine
        .delete_task(&local_id)
        .context("Failed to delete task")?;
    println!("Deleted {}", short_id(&local_id));
    Ok(())
}

/// Run one reconciliation pass.
async fn cmd_sync(engine: &SyncEngine) -> Result<()> {
    let report = engine
        .reconcile()
        .await
        .context("Sync failed (is \"owner\" set in the config file?)")?;
    print_report(&report);
    Ok(())
}

/// Show status.
fn cmd_status(engine: &SyncEngine) -> Result<()> {
    let owner = engine
        .owner()
        .context("Not signed in (set \"owner\" in the config file)")?;
    let owner_tasks = engine.store().list_pending(&owner)?;
    let pending = owner_tasks
        .iter()
        .filter(|t| t.sync_state == SyncState::PendingPush)
        .count();
    let deleting = owner_tasks.len() - pending;
    let rejected = owner_tasks.iter().filter(|t| t.failure_count > 0).count();
    let stalled = owner_tasks
        .iter()
        .filter(|t| t.is_stalled(engine.config().max_permanent_failures))
        .count();

    println!("Sync Status:");
    println!("  Tasks: {}", visible_tasks(engine)?.len());
    println!("  Pending push: {}", pending);
    println!("  Pending delete: {}", deleting);
    println!("  Rejected: {} ({} stalled)", rejected, stalled);
    for task in &owner_tasks {
        if let Some(error) = &task.last_error {
            println!("    {} {}: {}", short_id(&task.local_id), task.title, error);
        }
    }
    Ok(())
}

/// Run the scheduler until interrupted, printing the list on every change.
async fn cmd_watch(engine: &SyncEngine, mode: SyncMode) -> Result<()> {
    let mut feed = engine
        .feed()
        .context("Cannot watch tasks (is \"owner\" set in the config file?)")?;
    let mut status = engine.watch_status();
    let scheduler = SyncScheduler::spawn(engine.clone(), mode);

    print_tasks(&feed.current(), false);
    info!("Watching for changes; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            tasks = feed.changed() => match tasks {
                Some(tasks) => {
                    println!();
                    print_tasks(&tasks, false);
                }
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.is_loading {
                    continue;
                }
                if let Some(error) = current.last_error {
                    println!("! {}", error);
                }
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
