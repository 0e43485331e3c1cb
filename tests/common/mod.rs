//! Shared test utilities and fixtures
//!
//! A throwaway workspace wired to a real parser, runner and local
//! environment.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smithy_parser::{MessageParser, StreamTracker};
use smithy_runner::{ActionRunner, DetectedShell, LocalEnvironment, ReadySignal, RunnerHandle};
use smithy_types::{
    MessageId, ParserSettings, ReadySettings, RunnerEvent, RunnerSettings,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn sh() -> DetectedShell {
    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".into()],
        name: "sh".into(),
    }
}

pub struct Sandbox {
    pub dir: TempDir,
    pub env: Arc<LocalEnvironment>,
    pub handle: RunnerHandle,
    pub events: mpsc::UnboundedReceiver<RunnerEvent>,
}

impl Sandbox {
    pub fn new(settings: RunnerSettings) -> Self {
        Self::with_ready(settings, &ReadySettings::default())
    }

    pub fn with_ready(settings: RunnerSettings, ready: &ReadySettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(
            LocalEnvironment::new(dir.path().join("workspace"), ReadySignal::from_settings(ready))
                .unwrap(),
        );
        let (handle, events) = ActionRunner::spawn(Arc::clone(&env), settings, sh());
        Self {
            dir,
            env,
            handle,
            events,
        }
    }

    pub fn tracker(&self, settings: ParserSettings) -> StreamTracker<RunnerHandle> {
        StreamTracker::new(MessageParser::with_settings(self.handle.clone(), settings))
    }

    /// Wait for the runner to go idle and return everything it reported.
    pub async fn settle(&mut self) -> Vec<RunnerEvent> {
        tokio::time::timeout(WAIT, self.handle.wait_idle())
            .await
            .expect("runner never went idle");
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.env.root().join(path)).ok()
    }
}

/// Deliver `text` as growing prefixes of `chunk` bytes, returning the
/// accumulated render text.
pub fn stream(
    tracker: &mut StreamTracker<RunnerHandle>,
    message_id: &MessageId,
    text: &str,
    chunk: usize,
) -> String {
    let mut end = 0;
    while end < text.len() {
        end = (end + chunk).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        tracker.deliver(message_id, &text[..end], end < text.len());
    }
    tracker
        .transcript(message_id)
        .unwrap_or_default()
        .to_string()
}

/// Short form of an event for order assertions.
pub fn describe(event: &RunnerEvent) -> Option<String> {
    let action = event.action();
    match event {
        RunnerEvent::ActionStarted { .. } => Some(format!("start {action}")),
        RunnerEvent::ActionCompleted { ready, .. } => Some(if *ready {
            format!("ready {action}")
        } else {
            format!("done {action}")
        }),
        RunnerEvent::ActionFailed { .. } => Some(format!("fail {action}")),
        RunnerEvent::ActionSkipped { .. } => Some(format!("skip {action}")),
        RunnerEvent::ActionQueued { .. }
        | RunnerEvent::Output { .. }
        | RunnerEvent::ProcessExited { .. } => None,
    }
}
