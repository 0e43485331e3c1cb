//! Smithy CLI - replays streamed model transcripts against a local workspace.
//!
//! # Architecture
//!
//! ```text
//! transcript -> StreamTracker -> MessageParser -> RunnerHandle -> ActionRunner
//!                    |                                                 |
//!                    v                                                 v
//!              render text (stdout)                  RunnerEvent -> status lines
//! ```
//!
//! Each transcript is delivered as growing prefixes, the way a streaming
//! transport re-sends the full message text on every update. Actions start
//! as soon as their closing tag arrives, while the rest of the message is
//! still streaming.

mod args;
mod replay;

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::Mutex,
};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::args::Args;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_smithy_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_smithy_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let candidates = smithy_log_file_candidates();
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn smithy_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.smithy/logs/smithy.log
    if let Some(config_path) = smithy_config::config_path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("smithy.log"));
    }

    // Fallback: ./.smithy/logs/smithy.log
    candidates.push(PathBuf::from(".smithy").join("logs").join("smithy.log"));

    candidates
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match replay::run(args).await {
        Ok(summary) => {
            tracing::info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "replay finished"
            );
            if summary.failed > 0 {
                eprintln!("{} action(s) failed", summary.failed);
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
