//! Transcript replay: feeds growing prefixes of each transcript through the
//! parser, the way a streaming transport would, and reports what the runner
//! does with the actions it finds.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use smithy_config::SmithyConfig;
use smithy_parser::{MessageParser, StreamTracker};
use smithy_runner::{
    ActionRunner, ExecutionEnvironment, LocalEnvironment, ReadySignal, RunnerHandle, detect_shell,
};
use smithy_types::{ActionId, ActionKind, ArtifactKey, MessageId, RunnerEvent};
use tokio::sync::mpsc;

use crate::args::Args;

const DEFAULT_WORKDIR: &str = "smithy-workspace";
const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Totals reported once replay is over.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub async fn run(args: Args) -> Result<Summary> {
    let config = load_config(args.config.as_deref())?;

    let workdir = args
        .workdir
        .clone()
        .or_else(|| config.workspace_root.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKDIR));
    let env = Arc::new(
        LocalEnvironment::new(&workdir, ReadySignal::from_settings(&config.ready))
            .with_context(|| format!("failed to open workspace {}", workdir.display()))?,
    );
    if args.fresh {
        env.remove_tree(".")
            .await
            .with_context(|| format!("failed to clear workspace {}", env.root().display()))?;
        tracing::info!(root = %env.root().display(), "workspace cleared");
    }

    let shell = detect_shell(&config.shell);
    let (handle, events) = ActionRunner::spawn(Arc::clone(&env), config.runner, shell);
    let printer = tokio::spawn(print_events(events, args.json));

    let mut tracker = StreamTracker::new(MessageParser::with_settings(
        handle.clone(),
        config.parser.clone(),
    ));
    let mut messages = Vec::new();
    for (index, path) in args.transcripts.iter().enumerate() {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read transcript {}", path.display()))?;
        let message_id = message_id_for(path, index);
        tracing::info!(message_id = %message_id, path = %path.display(), "replaying transcript");
        replay_message(&mut tracker, &message_id, &text, &args)
            .await
            .context("failed to write render text")?;
        messages.push(message_id);
    }
    drop(tracker);

    handle.wait_idle().await;
    for message_id in &messages {
        handle.forget_message(message_id.clone());
    }
    wait_for_live_processes(&handle, &messages).await;
    handle.shutdown().await;
    drop(handle);

    match tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer).await {
        Ok(Ok(summary)) => Ok(summary),
        Ok(Err(err)) => Err(err).context("event printer panicked"),
        Err(_) => {
            tracing::warn!("event stream did not close after shutdown");
            Ok(Summary::default())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SmithyConfig> {
    match path {
        Some(path) => Ok(SmithyConfig::load_from(path)?.unwrap_or_default()),
        // The default location is optional; a broken file there is logged
        // by the loader and replaced with defaults.
        None => Ok(SmithyConfig::load().ok().flatten().unwrap_or_default()),
    }
}

fn message_id_for(path: &Path, index: usize) -> MessageId {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map_or_else(|| MessageId::new(format!("message-{index}")), MessageId::new)
}

async fn replay_message(
    tracker: &mut StreamTracker<RunnerHandle>,
    message_id: &MessageId,
    text: &str,
    args: &Args,
) -> std::io::Result<()> {
    let mut end = 0;
    while end < text.len() {
        end = next_boundary(text, end, args.chunk.get());
        let streaming = end < text.len();
        if let Some(fresh) = tracker.deliver(message_id, &text[..end], streaming)
            && !args.json
            && !fresh.is_empty()
        {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(fresh.as_bytes())?;
            stdout.flush()?;
        }
        if streaming && args.delay_ms > 0 {
            tokio::time::sleep(args.delay()).await;
        }
    }
    if !args.json {
        println!();
    }
    Ok(())
}

/// Advance `from` by at least `chunk` bytes, landing on a char boundary.
fn next_boundary(text: &str, from: usize, chunk: usize) -> usize {
    let mut end = (from + chunk).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    end
}

async fn wait_for_live_processes(handle: &RunnerHandle, messages: &[MessageId]) {
    let live = handle.live_processes().await;
    if live.is_empty() {
        return;
    }

    eprintln!(
        "{} process(es) still running. Press Ctrl-C to stop.",
        live.len()
    );
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {err}");
    }
    for message_id in messages {
        handle.abandon_message(message_id.clone());
    }
    handle.wait_idle().await;
}

async fn print_events(mut events: mpsc::UnboundedReceiver<RunnerEvent>, json: bool) -> Summary {
    let mut printer = EventPrinter::new(json);
    while let Some(event) = events.recv().await {
        if let Some(line) = printer.line(&event) {
            if json {
                println!("{line}");
            } else {
                eprintln!("{line}");
            }
        }
    }
    printer.summary
}

/// Formats runner events and keeps the tally.
#[derive(Debug, Default)]
struct EventPrinter {
    json: bool,
    kinds: HashMap<(ArtifactKey, ActionId), ActionKind>,
    summary: Summary,
}

impl EventPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            ..Self::default()
        }
    }

    fn line(&mut self, event: &RunnerEvent) -> Option<String> {
        match event {
            RunnerEvent::ActionQueued { key, action, kind } => {
                self.kinds
                    .insert((key.clone(), action.clone()), kind.clone());
            }
            RunnerEvent::ActionCompleted { .. } => self.summary.completed += 1,
            RunnerEvent::ActionFailed { .. } => self.summary.failed += 1,
            RunnerEvent::ActionSkipped { .. } => self.summary.skipped += 1,
            RunnerEvent::ActionStarted { .. }
            | RunnerEvent::Output { .. }
            | RunnerEvent::ProcessExited { .. } => {}
        }

        if self.json {
            return match serde_json::to_string(event) {
                Ok(line) => Some(line),
                Err(err) => {
                    tracing::warn!("Failed to serialize runner event: {err}");
                    None
                }
            };
        }

        let label = self.label(event.key(), event.action());
        match event {
            RunnerEvent::ActionQueued { .. } => None,
            RunnerEvent::ActionStarted { .. } => Some(format!("> {label}")),
            RunnerEvent::ActionCompleted {
                exit_code, ready, ..
            } => Some(match (ready, exit_code) {
                (true, _) => format!("ok {label} (ready)"),
                (false, Some(code)) if *code != 0 => format!("ok {label} (exit {code})"),
                _ => format!("ok {label}"),
            }),
            RunnerEvent::ActionFailed { error, .. } => Some(format!("FAILED {label}: {error}")),
            RunnerEvent::ActionSkipped { .. } => Some(format!("skipped {label}")),
            RunnerEvent::Output { chunk, .. } => {
                let body = chunk.trim_end_matches('\n');
                (!body.is_empty()).then(|| {
                    body.lines()
                        .map(|line| format!("  | {line}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
            }
            RunnerEvent::ProcessExited { exit_code, .. } => Some(match exit_code {
                Some(code) => format!("exited {label} (exit {code})"),
                None => format!("exited {label} (signal)"),
            }),
        }
    }

    fn label(&self, key: &ArtifactKey, action: &ActionId) -> String {
        match self.kinds.get(&(key.clone(), action.clone())) {
            Some(ActionKind::File { path }) => format!("[{key}] write {path}"),
            Some(ActionKind::Shell) => format!("[{key}] shell {action}"),
            None => format!("[{key}] {action}"),
        }
    }
}
