//! Incremental parser for artifact and action tags embedded in streamed
//! model output.
//!
//! The transport re-delivers the full message text on every update.
//! [`MessageParser::parse`] scans only what it has not resolved yet and
//! returns the new render text, firing structural callbacks exactly once per
//! artifact and action as soon as each becomes unambiguous.

use std::collections::HashMap;

use smithy_types::{Action, Artifact, MessageId, ParserEvent, ParserSettings};

pub mod scanner;
mod session;
mod tags;
mod tracker;

use session::ParseSession;
pub use tracker::StreamTracker;

/// Receiver of parser events.
///
/// Every method has a no-op default. Open and close callbacks fire exactly
/// once per artifact and action, in document order. `on_action_progress`
/// streams body text for live display and is not part of that sequence.
pub trait ParserCallbacks {
    fn on_artifact_open(&mut self, _artifact: &Artifact) {}
    fn on_artifact_close(&mut self, _artifact: &Artifact) {}
    fn on_action_open(&mut self, _action: &Action) {}
    fn on_action_close(&mut self, _action: &Action) {}
    fn on_action_progress(&mut self, _action: &Action, _chunk: &str) {}
}

impl ParserCallbacks for () {}

/// Collects owned event snapshots.
impl ParserCallbacks for Vec<ParserEvent> {
    fn on_artifact_open(&mut self, artifact: &Artifact) {
        self.push(ParserEvent::ArtifactOpened(artifact.clone()));
    }

    fn on_artifact_close(&mut self, artifact: &Artifact) {
        self.push(ParserEvent::ArtifactClosed(artifact.clone()));
    }

    fn on_action_open(&mut self, action: &Action) {
        self.push(ParserEvent::ActionOpened(action.clone()));
    }

    fn on_action_close(&mut self, action: &Action) {
        self.push(ParserEvent::ActionClosed(action.clone()));
    }
}

impl<T: ParserCallbacks + ?Sized> ParserCallbacks for &mut T {
    fn on_artifact_open(&mut self, artifact: &Artifact) {
        (**self).on_artifact_open(artifact);
    }

    fn on_artifact_close(&mut self, artifact: &Artifact) {
        (**self).on_artifact_close(artifact);
    }

    fn on_action_open(&mut self, action: &Action) {
        (**self).on_action_open(action);
    }

    fn on_action_close(&mut self, action: &Action) {
        (**self).on_action_close(action);
    }

    fn on_action_progress(&mut self, action: &Action, chunk: &str) {
        (**self).on_action_progress(action, chunk);
    }
}

/// Fan out to two receivers, left first.
impl<A: ParserCallbacks, B: ParserCallbacks> ParserCallbacks for (A, B) {
    fn on_artifact_open(&mut self, artifact: &Artifact) {
        self.0.on_artifact_open(artifact);
        self.1.on_artifact_open(artifact);
    }

    fn on_artifact_close(&mut self, artifact: &Artifact) {
        self.0.on_artifact_close(artifact);
        self.1.on_artifact_close(artifact);
    }

    fn on_action_open(&mut self, action: &Action) {
        self.0.on_action_open(action);
        self.1.on_action_open(action);
    }

    fn on_action_close(&mut self, action: &Action) {
        self.0.on_action_close(action);
        self.1.on_action_close(action);
    }

    fn on_action_progress(&mut self, action: &Action, chunk: &str) {
        self.0.on_action_progress(action, chunk);
        self.1.on_action_progress(action, chunk);
    }
}

/// Parses many concurrent messages, one session per [`MessageId`].
#[derive(Debug)]
pub struct MessageParser<C> {
    sessions: HashMap<MessageId, ParseSession>,
    settings: ParserSettings,
    callbacks: C,
}

impl<C: ParserCallbacks> MessageParser<C> {
    #[must_use]
    pub fn new(callbacks: C) -> Self {
        Self::with_settings(callbacks, ParserSettings::default())
    }

    #[must_use]
    pub fn with_settings(callbacks: C, settings: ParserSettings) -> Self {
        Self {
            sessions: HashMap::new(),
            settings,
            callbacks,
        }
    }

    /// Feed the full text of `message_id` received so far.
    ///
    /// Returns only the render text produced by this call. `text` must extend
    /// the text of the previous call for the same id; a shorter buffer is
    /// logged and ignored.
    pub fn parse(&mut self, message_id: &MessageId, text: &str) -> String {
        let session = self
            .sessions
            .entry(message_id.clone())
            .or_insert_with(|| ParseSession::new(message_id.clone()));
        session.process(text, &self.settings, &mut self.callbacks)
    }

    /// End of stream for `message_id`: a partial tag left over from the last
    /// `parse` is emitted as literal text. Returns the render text it adds.
    pub fn flush(&mut self, message_id: &MessageId) -> String {
        match self.sessions.get_mut(message_id) {
            Some(session) => session.flush_pending(&mut self.callbacks),
            None => String::new(),
        }
    }

    /// Drop the session for one message. A later `parse` starts from scratch.
    pub fn reset(&mut self, message_id: &MessageId) {
        if self.sessions.remove(message_id).is_some() {
            tracing::debug!(message_id = %message_id, "parse session reset");
        }
    }

    /// Drop every session.
    pub fn reset_all(&mut self) {
        self.sessions.clear();
    }

    /// Byte offset scanned so far for `message_id`.
    #[must_use]
    pub fn cursor(&self, message_id: &MessageId) -> Option<usize> {
        self.sessions.get(message_id).map(ParseSession::cursor)
    }

    /// Unresolved partial tag left over from the last call, if any.
    #[must_use]
    pub fn pending_tag(&self, message_id: &MessageId) -> Option<&str> {
        self.sessions.get(message_id).and_then(ParseSession::pending_tag)
    }

    #[must_use]
    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    #[must_use]
    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    #[must_use]
    pub fn into_callbacks(self) -> C {
        self.callbacks
    }
}
