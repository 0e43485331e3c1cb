//! Per-message parse state.
//!
//! A session remembers how far into the message it has scanned so repeated
//! calls with a growing buffer only look at new bytes. The cursor never moves
//! past a token that has not been fully resolved, which is what makes
//! re-parsing after a mid-tag cut safe.

use smithy_types::{Action, ActionId, Artifact, ArtifactId, MessageId, ParserSettings};

use crate::ParserCallbacks;
use crate::scanner::{ScanContext, Scanner, TagName, Token};
use crate::tags::{ArtifactTag, resolve_action};

#[derive(Debug)]
pub(crate) struct ParseSession {
    message_id: MessageId,
    cursor: usize,
    tag_stack: Vec<TagName>,
    current_artifact: Option<Artifact>,
    current_action: Option<Action>,
    open_tag_buffer: Option<String>,
    next_action_seq: u32,
}

impl ParseSession {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            cursor: 0,
            tag_stack: Vec::new(),
            current_artifact: None,
            current_action: None,
            open_tag_buffer: None,
            next_action_seq: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Text of the tag that stopped the last call, if any.
    pub fn pending_tag(&self) -> Option<&str> {
        self.open_tag_buffer.as_deref()
    }

    /// Treat the unresolved partial tag as plain text. Used once the message
    /// has ended and the tag can no longer complete.
    pub fn flush_pending<C: ParserCallbacks + ?Sized>(&mut self, callbacks: &mut C) -> String {
        let mut render = String::new();
        if let Some(pending) = self.open_tag_buffer.take() {
            self.cursor += pending.len();
            self.text(&pending, &mut render, callbacks);
        }
        render
    }

    fn context(&self) -> ScanContext {
        match self.tag_stack.last() {
            Some(TagName::Action) => ScanContext::ActionBody,
            _ => ScanContext::Markup,
        }
    }

    /// Scan `text[cursor..]`, fire events, and return the render text
    /// produced by this call.
    pub fn process<C: ParserCallbacks + ?Sized>(
        &mut self,
        text: &str,
        settings: &ParserSettings,
        callbacks: &mut C,
    ) -> String {
        if text.len() < self.cursor || !text.is_char_boundary(self.cursor) {
            tracing::warn!(
                message_id = %self.message_id,
                cursor = self.cursor,
                len = text.len(),
                "parse called with a buffer that does not extend the previous one; ignoring"
            );
            return String::new();
        }

        let mut render = String::new();
        let mut scanner = Scanner::new(text, self.cursor);
        scanner.set_context(self.context());
        self.open_tag_buffer = None;

        while let Some(token) = scanner.next() {
            match token {
                Token::Text(span) => {
                    self.text(&text[span.clone()], &mut render, callbacks);
                    self.cursor = span.end;
                }
                Token::OpenTagStart { name, span } => {
                    let mut attrs = Vec::new();
                    let mut end = span.end;
                    for token in scanner.by_ref() {
                        match token {
                            Token::Attribute { key, value } => attrs.push((key, value)),
                            Token::TagEnd { end: tag_end } => {
                                end = tag_end;
                                break;
                            }
                            _ => break,
                        }
                    }
                    let raw = &text[span.start..end];
                    self.open_tag(name, &attrs, raw, settings, &mut render, callbacks);
                    self.cursor = end;
                    scanner.set_context(self.context());
                }
                Token::CloseTag { name, span } => {
                    self.close_tag(name, &text[span.clone()], &mut render, callbacks);
                    self.cursor = span.end;
                    scanner.set_context(self.context());
                }
                Token::Attribute { .. } | Token::TagEnd { .. } => {}
                Token::Incomplete { at } => {
                    self.open_tag_buffer = Some(text[at..].to_string());
                    break;
                }
            }
        }

        render
    }

    /// Route literal text by position: action body, suppressed artifact
    /// body, or prose.
    fn text<C: ParserCallbacks + ?Sized>(
        &mut self,
        chunk: &str,
        render: &mut String,
        callbacks: &mut C,
    ) {
        if chunk.is_empty() {
            return;
        }
        if let Some(action) = self.current_action.as_mut() {
            action.append_content(chunk);
            callbacks.on_action_progress(action, chunk);
        } else if self.current_artifact.is_none() {
            render.push_str(chunk);
        }
    }

    fn open_tag<C: ParserCallbacks + ?Sized>(
        &mut self,
        name: TagName,
        attrs: &[(&str, &str)],
        raw: &str,
        settings: &ParserSettings,
        render: &mut String,
        callbacks: &mut C,
    ) {
        match name {
            TagName::Artifact => {
                if self.current_artifact.is_some() {
                    tracing::debug!(message_id = %self.message_id, "nested artifact tag treated as text");
                    self.text(raw, render, callbacks);
                    return;
                }
                let Some(tag) = ArtifactTag::resolve(attrs) else {
                    tracing::debug!(message_id = %self.message_id, "artifact tag without id treated as text");
                    self.text(raw, render, callbacks);
                    return;
                };
                let artifact =
                    Artifact::open(self.message_id.clone(), ArtifactId::new(tag.id), tag.title);
                if let Some(placeholder) = settings.render_placeholder(tag.id, tag.title) {
                    render.push_str(&placeholder);
                }
                tracing::debug!(message_id = %self.message_id, artifact = tag.id, "artifact opened");
                callbacks.on_artifact_open(&artifact);
                self.tag_stack.push(TagName::Artifact);
                self.current_artifact = Some(artifact);
            }
            TagName::Action => {
                let Some(artifact) = self.current_artifact.as_mut() else {
                    tracing::debug!(message_id = %self.message_id, "action tag outside an artifact treated as text");
                    self.text(raw, render, callbacks);
                    return;
                };
                let Some(kind) = resolve_action(attrs) else {
                    tracing::debug!(
                        message_id = %self.message_id,
                        artifact = %artifact.id(),
                        "action tag with missing or unknown attributes treated as text"
                    );
                    return;
                };
                let id = ActionId::derive(artifact.id(), self.next_action_seq);
                self.next_action_seq += 1;
                artifact.push_action(id.clone());
                let action = Action::new(artifact, id, kind);
                tracing::debug!(
                    message_id = %self.message_id,
                    action = %action.id(),
                    kind = action.kind().label(),
                    "action opened"
                );
                callbacks.on_action_open(&action);
                self.tag_stack.push(TagName::Action);
                self.current_action = Some(action);
            }
        }
    }

    fn close_tag<C: ParserCallbacks + ?Sized>(
        &mut self,
        name: TagName,
        raw: &str,
        render: &mut String,
        callbacks: &mut C,
    ) {
        match name {
            TagName::Action => {
                let Some(mut action) = self.current_action.take() else {
                    self.text(raw, render, callbacks);
                    return;
                };
                self.tag_stack.pop();
                action.finalize();
                tracing::debug!(
                    message_id = %self.message_id,
                    action = %action.id(),
                    bytes = action.content().len(),
                    "action closed"
                );
                callbacks.on_action_close(&action);
            }
            TagName::Artifact => {
                let Some(mut artifact) = self.current_artifact.take() else {
                    tracing::debug!(message_id = %self.message_id, "stray artifact close treated as text");
                    self.text(raw, render, callbacks);
                    return;
                };
                self.tag_stack.pop();
                artifact.close();
                tracing::debug!(
                    message_id = %self.message_id,
                    artifact = %artifact.id(),
                    actions = artifact.actions().len(),
                    "artifact closed"
                );
                callbacks.on_artifact_close(&artifact);
            }
        }
    }
}
