//! Conversation conductor CLI.
//!
//! Replays recorded producer responses through the turn controller, checks
//! single responses against a phase, and maintains the conversation store
//! (`.conductor/conversations/` by default).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use conductor::controller::Controller;
use conductor::core::no_progress::NoProgressTracker;
use conductor::core::phase::Phase;
use conductor::core::state_machine::TransitionRecord;
use conductor::core::types::TurnOutcome;
use conductor::core::validator::ResponseValidator;
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, load_config};
use conductor::io::file_store::FileRepository;
use conductor::io::repository::ConversationRepository;
use conductor::io::transcript::{TranscriptProducer, load_transcript};
use conductor::logging;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Phase-driven supervisor for multi-turn patch generation"
)]
struct Cli {
    /// Path to the TOML config (missing file means defaults).
    #[arg(long, global = true, default_value = ".conductor/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a conversation with responses recorded in a transcript file.
    Replay {
        /// Responses separated by lines consisting of `---`.
        transcript: PathBuf,
        /// Conversation id in the store.
        #[arg(long, default_value = "replay")]
        id: String,
        /// Start from a fresh context even if the id is already stored.
        #[arg(long)]
        reset: bool,
        /// Leave transitions through AWAITING_INFO out of the printed history.
        #[arg(long)]
        hide_internal: bool,
    },
    /// Validate one response against a phase and print the verdict.
    Check {
        file: PathBuf,
        #[arg(long)]
        phase: Phase,
    },
    /// List stored conversation ids.
    List {
        #[arg(long)]
        phase: Option<Phase>,
    },
    /// Delete stored conversations idle for longer than the given window.
    Cleanup {
        #[arg(long)]
        older_than_hours: u64,
    },
}

#[derive(Serialize)]
struct TurnSummary {
    outcome: TurnOutcome,
    attempts: u32,
}

#[derive(Serialize)]
struct ReplayReport {
    conversation_id: String,
    final_phase: Phase,
    turns: Vec<TurnSummary>,
    unused_responses: usize,
    history: Vec<TransitionRecord>,
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            transcript,
            id,
            reset,
            hide_internal,
        } => cmd_replay(&cli.config, &transcript, &id, reset, hide_internal).await,
        Command::Check { file, phase } => cmd_check(&cli.config, &file, phase),
        Command::List { phase } => cmd_list(&cli.config, phase).await,
        Command::Cleanup { older_than_hours } => cmd_cleanup(&cli.config, older_than_hours).await,
    }
}

fn load(config_path: &Path) -> Result<ConductorConfig> {
    load_config(config_path).with_context(|| format!("load config {}", config_path.display()))
}

async fn cmd_replay(
    config_path: &Path,
    transcript: &Path,
    id: &str,
    reset: bool,
    hide_internal: bool,
) -> Result<i32> {
    let config = load(config_path)?;
    let responses = load_transcript(transcript)?;
    let controller = Controller::from_config(FileRepository::new(&config.store.dir), &config);
    let producer = TranscriptProducer::new(responses);

    if reset {
        controller.reset(id).await?;
    }
    let mut phase = controller.start(id).await?;
    let mut turns = Vec::new();
    while !phase.is_closed() && producer.remaining().await > 0 {
        if phase == Phase::AwaitingInfo {
            controller.info_received(id).await?;
        }
        let report = controller
            .process_turn(id, &producer)
            .await
            .with_context(|| format!("process turn for {id}"))?;
        turns.push(TurnSummary {
            outcome: report.outcome,
            attempts: report.attempts,
        });
        phase = controller.phase(id).await?;
    }

    let mut history = controller.history(id).await?;
    if hide_internal {
        history.retain(|record| !record.is_internal());
    }
    let report = ReplayReport {
        conversation_id: id.to_string(),
        final_phase: phase,
        turns,
        unused_responses: producer.remaining().await,
        history,
    };
    print_json(&report)?;
    Ok(if phase == Phase::Error {
        exit_codes::PROTOCOL_FAILURE
    } else {
        exit_codes::OK
    })
}

fn cmd_check(config_path: &Path, file: &Path, phase: Phase) -> Result<i32> {
    let config = load(config_path)?;
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let mut validator = ResponseValidator::new(
        NoProgressTracker::new(config.no_progress_threshold),
        config.auto_retry_on_invalid_tags,
    );
    let result = validator.validate(&text, phase);
    print_json(&result)?;
    Ok(if result.valid {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

async fn cmd_list(config_path: &Path, phase: Option<Phase>) -> Result<i32> {
    let config = load(config_path)?;
    let repository = FileRepository::new(&config.store.dir);
    let ids = match phase {
        Some(phase) => repository.find_by_phase(phase).await?,
        None => repository.list_ids().await?,
    };
    for id in ids {
        println!("{id}");
    }
    Ok(exit_codes::OK)
}

async fn cmd_cleanup(config_path: &Path, older_than_hours: u64) -> Result<i32> {
    let config = load(config_path)?;
    let controller = Controller::from_config(FileRepository::new(&config.store.dir), &config);
    let window = Duration::from_secs(older_than_hours.saturating_mul(60 * 60));
    let removed = controller.cleanup(window).await?;
    println!("{removed}");
    Ok(exit_codes::OK)
}

/// Print `value` to stdout as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_replay_defaults() {
        let cli = Cli::parse_from(["conductor", "replay", "t.txt"]);
        assert_eq!(cli.config, PathBuf::from(".conductor/config.toml"));
        match cli.command {
            Command::Replay {
                transcript,
                id,
                reset,
                hide_internal,
            } => {
                assert_eq!(transcript, PathBuf::from("t.txt"));
                assert_eq!(id, "replay");
                assert!(!reset);
                assert!(!hide_internal);
            }
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn parse_check_phase() {
        let cli = Cli::parse_from(["conductor", "check", "r.txt", "--phase", "ready_to_finish"]);
        assert!(matches!(
            cli.command,
            Command::Check {
                phase: Phase::ReadyToFinish,
                ..
            }
        ));
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["conductor", "list", "--phase", "ERROR", "--config", "c.toml"]);
        assert_eq!(cli.config, PathBuf::from("c.toml"));
        assert!(matches!(
            cli.command,
            Command::List {
                phase: Some(Phase::Error)
            }
        ));
    }

    #[test]
    fn parse_cleanup_window() {
        let cli = Cli::parse_from(["conductor", "cleanup", "--older-than-hours", "48"]);
        assert!(matches!(
            cli.command,
            Command::Cleanup {
                older_than_hours: 48
            }
        ));
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let result = Cli::try_parse_from(["conductor", "check", "r.txt", "--phase", "DONE"]);
        assert!(result.is_err());
    }
}
