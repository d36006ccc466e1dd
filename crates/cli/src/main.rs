use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use stepwise_engine::{
    ContextSnapshot, EchoExecutor, RunController, RunReport, SequenceInterpreter, parse_sequence_file,
};
use stepwise_types::{ProgressOutcome, RunEvent, RunState};
use stepwise_util::{CheckpointStore, JsonFileCheckpointStore};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_sequence_cmd(sub).await,
        Some(("checkpoints", sub)) => list_checkpoints_cmd(sub),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` when set, else `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
}

fn build_cli() -> Command {
    let checkpoint_dir = Arg::new("checkpoint-dir")
        .long("checkpoint-dir")
        .action(ArgAction::Set)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Directory holding checkpoints (defaults to $STEPWISE_CHECKPOINT_DIR or the config directory)");

    Command::new("stepwise")
        .about("Run declarative automation sequences")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(
            Command::new("run")
                .about("Run a sequence document against the echo executor")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .short('f')
                        .required(true)
                        .action(ArgAction::Set)
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Path to a sequence YAML/JSON document"),
                )
                .arg(
                    Arg::new("continue-on-error")
                        .long("continue-on-error")
                        .action(ArgAction::SetTrue)
                        .help("Record action failures and keep going"),
                )
                .arg(
                    Arg::new("checkpoint-id")
                        .long("checkpoint-id")
                        .action(ArgAction::Set)
                        .help("Save a checkpoint under this id when interrupted with Ctrl-C"),
                )
                .arg(
                    Arg::new("resume")
                        .long("resume")
                        .action(ArgAction::Set)
                        .value_name("ID")
                        .help("Resume from a previously saved checkpoint"),
                )
                .arg(checkpoint_dir.clone()),
        )
        .subcommand(
            Command::new("checkpoints")
                .about("List saved checkpoints")
                .arg(checkpoint_dir),
        )
}

fn checkpoint_store(matches: &ArgMatches) -> JsonFileCheckpointStore {
    JsonFileCheckpointStore::new(matches.get_one::<PathBuf>("checkpoint-dir").cloned())
}

fn list_checkpoints_cmd(matches: &ArgMatches) -> Result<()> {
    let store = checkpoint_store(matches);
    let identifiers = store
        .list()
        .with_context(|| format!("could not list checkpoints in {}", store.directory().display()))?;
    if identifiers.is_empty() {
        println!("No checkpoints found in {}", store.directory().display());
    }
    for identifier in identifiers {
        println!("{identifier}");
    }
    Ok(())
}

async fn run_sequence_cmd(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<PathBuf>("file").context("missing --file")?;
    let document = parse_sequence_file(file)?;
    let checkpoint_id = matches.get_one::<String>("checkpoint-id").cloned();

    let (event_tx, event_rx) = unbounded_channel();
    let store: Arc<dyn CheckpointStore> = Arc::new(checkpoint_store(matches));
    let controller = RunController::new(store).with_events(event_tx);

    let interpreter = match matches.get_one::<String>("resume") {
        Some(resume_id) => {
            let context = controller.load_checkpoint(resume_id, &document.actions)?;
            info!(checkpoint_id = %resume_id, "resuming sequence from checkpoint");
            SequenceInterpreter::from_context(document.actions.clone(), context, Arc::new(EchoExecutor), controller.clone())
        }
        None => {
            let options = document.run_options(matches.get_flag("continue-on-error"));
            SequenceInterpreter::new(document.actions.clone(), options, Arc::new(EchoExecutor), controller.clone())
        }
    };

    info!(sequence = document.display_name(), actions = document.actions.len(), "starting sequence");
    let progress = tokio::spawn(log_progress(event_rx));
    let mut run = tokio::spawn(interpreter.run());

    let report = tokio::select! {
        joined = &mut run => joined.context("sequence task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received; stopping at the next action boundary");
            controller.stop(false);
            let report = run.await.context("sequence task panicked")??;
            if let Some(id) = &checkpoint_id
                && let Some(snapshot) = save_interrupted_checkpoint(&controller, &report, id).await
            {
                println!(
                    "Saved checkpoint '{}' at action {}",
                    id, snapshot.context.instruction_pointer
                );
            }
            report
        }
    };

    drop(controller);
    let _ = progress.await;
    print_report(&report)
}

/// Persists the parked snapshot of a run halted by Ctrl-C. Runs that ended on their own
/// are reported as-is.
async fn save_interrupted_checkpoint(controller: &RunController, report: &RunReport, id: &str) -> Option<ContextSnapshot> {
    if report.state != RunState::Stopped {
        warn!(checkpoint_id = %id, state = %report.state, "run ended before the interrupt took effect; no checkpoint saved");
        return None;
    }
    match controller.save_checkpoint(id).await {
        Ok(snapshot) => Some(snapshot),
        Err(error) => {
            warn!(checkpoint_id = %id, error = %error, "failed to save checkpoint");
            None
        }
    }
}

async fn log_progress(mut events: UnboundedReceiver<RunEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::ActionFinished(update) => match update.outcome {
                ProgressOutcome::Output { key, .. } => {
                    info!(step = update.index + 1, total = update.total, output = %key, "action finished")
                }
                ProgressOutcome::Error { message } => {
                    warn!(step = update.index + 1, total = update.total, error = %message, "action failed")
                }
                ProgressOutcome::Control => {}
            },
            RunEvent::LoopExited { start_index, iterations } => info!(start_index, iterations, "loop exited"),
            RunEvent::StatusChanged { state, message } => {
                info!(state = %state, message = message.as_deref().unwrap_or(""), "run status changed")
            }
            RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. } => {}
        }
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if report.state == RunState::Failed {
        let reason = report
            .terminal_error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(anyhow!("sequence failed: {reason}"));
    }
    Ok(())
}
