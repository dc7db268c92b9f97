use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use sync_engine::{
    FileCache, HttpBackend, LocalCache, ScenarioStore, SessionController, SessionServices, SyncSettings,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

mod console;

use console::{Command, parse_command};

#[derive(Parser)]
#[command(name = "beamsync")]
#[command(about = "Edit scenarios against a beamforming server with autosave")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an editing session; commands are read from stdin
    Run {
        #[arg(long, default_value = "http://localhost:8000")]
        server: String,

        /// TOML file overriding the timing settings
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Where the local configuration cache lives
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// List the scenarios on the server
    Catalog {
        #[arg(long, default_value = "http://localhost:8000")]
        server: String,
    },
    /// Print the default settings as TOML
    Settings,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Run {
            server,
            settings,
            cache_dir,
        } => run_session(&server, settings, cache_dir).await,
        Commands::Catalog { server } => print_catalog(&server).await,
        Commands::Settings => print_default_settings(),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn print_catalog(server: &str) -> anyhow::Result<()> {
    let backend = HttpBackend::new(server)?;
    let catalog = backend
        .fetch_catalog()
        .await
        .with_context(|| format!("Failed to fetch catalog from {}", server))?;
    for entry in catalog {
        println!("{}\t{}\t{}", entry.id, entry.label, entry.category);
    }
    Ok(())
}

fn print_default_settings() -> anyhow::Result<()> {
    print!("{}", SyncSettings::default().to_toml_string()?);
    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<SyncSettings> {
    match path {
        Some(path) => SyncSettings::load(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(SyncSettings::default()),
    }
}

async fn run_session(server: &str, settings: Option<PathBuf>, cache_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(settings)?;
    let backend = Arc::new(HttpBackend::new(server)?);
    let cache: Arc<dyn LocalCache> = match cache_dir {
        Some(dir) => Arc::new(FileCache::new(dir)),
        None => Arc::new(FileCache::default_location()?),
    };

    let services = SessionServices {
        scenarios: backend.clone(),
        compute: backend.clone(),
        jobs: backend.clone(),
        cache,
        transports: backend.termination_transports(),
    };
    let session = SessionController::new(services, settings.clone());
    session.on_termination(async {
        let _ = tokio::signal::ctrl_c().await;
    });
    let _reporters = spawn_reporters(&session);

    // Bootstrap in the background so a hanging server does not block input
    let bootstrap = {
        let session = session.clone();
        tokio::spawn(async move {
            match session.bootstrap().await {
                Ok(outcome) => log::info!("Session ready: {:?}", outcome),
                Err(e) => log::error!("Bootstrap failed: {}", e),
            }
        })
    };

    println!("{}", console::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => execute(&session, command).await,
                    Ok(None) => {}
                    Err(e) => log::warn!("{:#}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read input: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    bootstrap.abort();
    if let Some(outcome) = session.shutdown() {
        log::info!(
            "Final save: transport {:?}, local cache {}",
            outcome.transport,
            if outcome.local_written { "written" } else { "failed" }
        );
    }
    // Fire-and-forget writes need the runtime for a moment longer
    tokio::time::sleep(settings.termination_grace()).await;
    Ok(())
}

async fn execute(session: &SessionController, command: Command) {
    let outcome = match command {
        Command::Patch(patch) => {
            session.apply_patch(&patch);
            Ok(())
        }
        Command::Switch(item_id) => session.switch_item(&item_id).await,
        Command::Reset => session.reset_item().await,
        Command::ResetAll => session.reset_all().await,
        Command::Save => session.flush().await.map(|saved| {
            if !saved {
                log::info!("Nothing to save");
            }
        }),
        Command::Mix(params) => session.start_job(params).await.map(|job_id| {
            log::info!("Mixing job {} started", job_id);
        }),
        Command::Cancel => {
            session.cancel_job();
            Ok(())
        }
        Command::Dismiss => {
            session.errors().dismiss();
            Ok(())
        }
        Command::Status => {
            print_status(session);
            Ok(())
        }
        Command::Quit => Ok(()),
    };
    // Component errors are already in the error slot and logged by the reporter
    if let Err(e) = outcome {
        log::debug!("Command failed: {}", e);
    }
}

fn print_status(session: &SessionController) {
    let status = serde_json::json!({
        "session": session.session_id().to_string(),
        "item": session.item_id(),
        "dirty": session.is_dirty(),
        "saving": session.is_saving(),
        "initializing": session.is_initializing(),
        "suppressed": session.is_suppressed(),
        "scheduler": format!("{:?}", session.scheduler_state()),
        "settled_ticks": session.settled_ticks(),
        "has_result": session.result().is_some(),
        "job": session.job_status(),
        "error": session.errors().current().map(|surfaced| surfaced.error.to_string()),
        "configuration": session.configuration(),
    });
    match serde_json::to_string_pretty(&status) {
        Ok(text) => println!("{}", text),
        Err(e) => log::error!("Failed to render status: {}", e),
    }
}

/// Log observable session state as it changes.
fn spawn_reporters(session: &SessionController) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        report_changes(session.progress_signal(), |progress| {
            (*progress == 100).then(|| "Computation finished".to_string())
        }),
        report_changes(session.result_signal(), |result| {
            result.as_ref().map(|result| summarize("Result", &result.0))
        }),
        report_changes(session.job_progress_signal(), |progress| {
            (*progress > 0).then(|| format!("Mixing {}%", progress))
        }),
        report_changes(session.job_output_signal(), |output| {
            output.as_ref().map(|output| summarize(&format!("Mixing job {} result", output.job_id), &output.result))
        }),
        report_changes(session.dirty_signal(), |dirty| {
            Some(if *dirty { "Unsaved changes" } else { "All changes saved" }.to_string())
        }),
        report_changes(session.item_id_signal(), |item_id| {
            item_id.as_ref().map(|item_id| format!("Editing scenario {}", item_id))
        }),
        report_changes(session.errors().signal(), |surfaced| {
            surfaced
                .as_ref()
                .map(|surfaced| format!("{:?} error: {}", surfaced.origin, surfaced.error))
        }),
    ]
}

fn report_changes<T, F>(mut receiver: watch::Receiver<T>, describe: F) -> tokio::task::JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Option<String> + Send + 'static,
{
    tokio::spawn(async move {
        while receiver.changed().await.is_ok() {
            let line = describe(&receiver.borrow_and_update());
            if let Some(line) = line {
                log::info!("{}", line);
            }
        }
    })
}

fn summarize(label: &str, value: &impl Display) -> String {
    let text = value.to_string();
    if text.len() > 160 {
        let cut = text.char_indices().nth(160).map(|(index, _)| index).unwrap_or(text.len());
        format!("{}: {}...", label, &text[..cut])
    } else {
        format!("{}: {}", label, text)
    }
}
