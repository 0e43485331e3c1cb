//! Transport adapter that tracks streamed messages until they finish.

use std::collections::{HashMap, HashSet};

use smithy_types::MessageId;

use crate::{MessageParser, ParserCallbacks};

/// Adapts a [`MessageParser`] to the transport contract
/// `(message_id, full_text, is_streaming)`.
///
/// Keeps the accumulated render transcript per message. Once a message has
/// been delivered with `is_streaming == false` it is finished, and later
/// deliveries of the same id are skipped.
#[derive(Debug)]
pub struct StreamTracker<C> {
    parser: MessageParser<C>,
    transcripts: HashMap<MessageId, String>,
    finished: HashSet<MessageId>,
}

impl<C: ParserCallbacks> StreamTracker<C> {
    #[must_use]
    pub fn new(parser: MessageParser<C>) -> Self {
        Self {
            parser,
            transcripts: HashMap::new(),
            finished: HashSet::new(),
        }
    }

    /// Deliver the current text of a message. Returns the render text added
    /// by this delivery, or `None` if the message was already finished.
    pub fn deliver(
        &mut self,
        message_id: &MessageId,
        text: &str,
        is_streaming: bool,
    ) -> Option<String> {
        if self.finished.contains(message_id) {
            tracing::trace!(message_id = %message_id, "message already finished; skipping");
            return None;
        }

        let mut fresh = self.parser.parse(message_id, text);
        if !is_streaming {
            fresh.push_str(&self.parser.flush(message_id));
        }
        self.transcripts
            .entry(message_id.clone())
            .or_default()
            .push_str(&fresh);

        if !is_streaming {
            tracing::debug!(message_id = %message_id, "message finished");
            self.finished.insert(message_id.clone());
        }
        Some(fresh)
    }

    /// Render text accumulated for `message_id` so far.
    #[must_use]
    pub fn transcript(&self, message_id: &MessageId) -> Option<&str> {
        self.transcripts.get(message_id).map(String::as_str)
    }

    #[must_use]
    pub fn is_finished(&self, message_id: &MessageId) -> bool {
        self.finished.contains(message_id)
    }

    /// Forget one message entirely, including its parse session.
    pub fn forget(&mut self, message_id: &MessageId) {
        self.transcripts.remove(message_id);
        self.finished.remove(message_id);
        self.parser.reset(message_id);
    }

    /// Clear the whole conversation.
    pub fn reset(&mut self) {
        self.transcripts.clear();
        self.finished.clear();
        self.parser.reset_all();
    }

    #[must_use]
    pub fn parser(&self) -> &MessageParser<C> {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut MessageParser<C> {
        &mut self.parser
    }

    #[must_use]
    pub fn into_parser(self) -> MessageParser<C> {
        self.parser
    }
}
