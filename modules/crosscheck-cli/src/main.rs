use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crosscheck_client::{UploadFile, WorkflowStage};
use crosscheck_core::{Config, PollPhase, SessionStore};

mod view;

#[derive(Parser)]
#[command(name = "crosscheck")]
#[command(about = "Upload production documents and cross-check them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session
    New,

    /// List recent sessions
    History,

    /// Show a session with its files, status and results
    Show { session_id: String },

    /// Upload documents to a session
    Upload {
        session_id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Start analysis and follow it to the end
    Analyze {
        session_id: String,

        /// Run analysis inside the request instead of polling
        #[arg(long)]
        now: bool,

        /// Return as soon as analysis has started
        #[arg(long)]
        no_wait: bool,
    },

    /// Retry failed processing and follow it to the end
    Retry {
        session_id: String,

        #[arg(long)]
        no_wait: bool,
    },

    /// Show validation results
    Results {
        session_id: String,

        /// Delete the results instead
        #[arg(long)]
        clear: bool,
    },

    /// Delete one uploaded file
    DeleteFile {
        session_id: String,
        file_id: String,
    },

    /// Delete a session and everything in it
    DeleteSession { session_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crosscheck=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_summary();

    let store = SessionStore::from_config(&config).context("failed to build HTTP client")?;
    let outcome = dispatch(&store, cli.command).await;
    store.shutdown().await;
    outcome
}

async fn dispatch(store: &SessionStore, command: Commands) -> Result<()> {
    match command {
        Commands::New => {
            let Some(session) = store.create_session().await else {
                return failed(store);
            };
            println!("{}", session.id);
        }

        Commands::History => {
            ensure(store, store.load_sessions().await)?;
            print!("{}", view::history(&store.snapshot()));
        }

        Commands::Show { session_id } => {
            ensure(store, store.load_session(&session_id).await)?;
            let (status, results) = tokio::join!(
                store.load_workflow_status(&session_id),
                store.load_validation_results(&session_id)
            );
            ensure(store, status && results)?;
            print!("{}", view::session(&store.snapshot(), &session_id));
        }

        Commands::Upload { session_id, paths } => {
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                files.push(UploadFile::from_path(path).await?);
            }
            // Also fails when the upload was accepted but the refresh was not.
            ensure(store, store.upload_files(&session_id, &files).await)?;
            print!("{}", view::files(store.snapshot().files()));
        }

        Commands::Analyze {
            session_id,
            now,
            no_wait,
        } => {
            ensure(store, store.load_session(&session_id).await)?;
            if now {
                ensure(store, store.analyze_now(&session_id).await)?;
            } else {
                ensure(store, store.run_analysis(&session_id).await)?;
                if no_wait {
                    println!("Analysis started for {session_id}");
                    return Ok(());
                }
                follow(store, &session_id).await?;
            }
            print!("{}", view::session(&store.snapshot(), &session_id));
        }

        Commands::Retry {
            session_id,
            no_wait,
        } => {
            ensure(store, store.load_session(&session_id).await)?;
            if !store.snapshot().can_retry() {
                println!("Nothing failed in {session_id}; retrying anyway.");
            }
            ensure(store, store.retry_analysis(&session_id).await)?;
            if !no_wait {
                follow(store, &session_id).await?;
            }
            print!("{}", view::session(&store.snapshot(), &session_id));
        }

        Commands::Results { session_id, clear } => {
            if clear {
                ensure(store, store.clear_validation_results(&session_id).await)?;
                println!("Validation results cleared for {session_id}");
                return Ok(());
            }
            let (results, summary) = tokio::join!(
                store.load_validation_results(&session_id),
                store.load_validation_summary(&session_id)
            );
            ensure(store, results && summary)?;
            let snapshot = store.snapshot();
            match snapshot.scope(&session_id) {
                Some(scope) => print!("{}", view::results(scope)),
                None => println!("No results for {session_id}"),
            }
        }

        Commands::DeleteFile {
            session_id,
            file_id,
        } => {
            // Load first so a file still being processed is refused locally.
            ensure(store, store.load_session(&session_id).await)?;
            ensure(store, store.delete_file(&file_id).await)?;
            print!("{}", view::files(store.snapshot().files()));
        }

        Commands::DeleteSession { session_id } => {
            ensure(store, store.delete_session(&session_id).await)?;
            println!("Deleted {session_id}");
        }
    }
    Ok(())
}

/// Print stage transitions until the session's poll loop settles.
async fn follow(store: &SessionStore, session_id: &str) -> Result<()> {
    let mut rx = store.subscribe();
    let mut last_stage: Option<WorkflowStage> = None;

    loop {
        let (stage, line, phase) = {
            let snapshot = rx.borrow_and_update();
            let scope = snapshot.scope(session_id);
            let status = scope.and_then(|s| s.workflow_status.as_ref());
            (
                status.map(|s| s.workflow_stage),
                status.map(view::progress),
                scope.map(|s| s.poll),
            )
        };

        if stage != last_stage {
            if let Some(line) = line {
                println!("  {line}");
            }
            last_stage = stage;
        }

        match phase {
            Some(PollPhase::Polling) => {}
            Some(PollPhase::Completed) => {
                info!(session_id, "Analysis completed");
                return Ok(());
            }
            Some(PollPhase::Failed) => bail!("analysis of {session_id} failed"),
            Some(PollPhase::Idle) | None => return failed(store),
        }

        if rx.changed().await.is_err() {
            debug!("Store dropped while following");
            return Ok(());
        }
    }
}

/// Turn a recorded store error into a command failure.
fn ensure(store: &SessionStore, ok: bool) -> Result<()> {
    match store.snapshot().error_message() {
        Some(message) => bail!("{message}"),
        None if !ok => bail!("operation failed"),
        None => Ok(()),
    }
}

fn failed(store: &SessionStore) -> Result<()> {
    ensure(store, false)
}
