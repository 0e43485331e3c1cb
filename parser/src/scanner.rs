//! Tag scanner: lexes a text buffer into literal spans and directive tags.
//!
//! Only two tag names are recognized, `artifact` and `action`. Anything else
//! between angle brackets is literal text. The scanner never guesses: when the
//! buffer ends inside something that may still become a recognized tag it
//! yields [`Token::Incomplete`] and stops, leaving the ambiguous bytes for the
//! next call.
//!
//! All offsets are byte offsets into the full buffer. Every split point sits
//! on an ASCII `<`, `>` or quote, so spans are always valid `str` ranges.

use std::collections::VecDeque;
use std::ops::Range;

/// An open tag whose `>` has not shown up within this many bytes is treated
/// as literal text instead of stalling the stream forever.
pub const MAX_TAG_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagName {
    Artifact,
    Action,
}

impl TagName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TagName::Artifact => "artifact",
            TagName::Action => "action",
        }
    }
}

/// Which tags the scanner is allowed to recognize at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanContext {
    /// Prose or artifact body: open and close tags of both names.
    #[default]
    Markup,
    /// Inside an action body: only `</action>`, so file content may contain
    /// markup literally.
    ActionBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Text(Range<usize>),
    /// `span` covers `<name`.
    OpenTagStart {
        name: TagName,
        span: Range<usize>,
    },
    Attribute {
        key: &'a str,
        value: &'a str,
    },
    /// Offset just past the `>` of the open tag.
    TagEnd {
        end: usize,
    },
    CloseTag {
        name: TagName,
        span: Range<usize>,
    },
    /// The buffer ends inside a possible tag starting at `at`.
    Incomplete {
        at: usize,
    },
}

enum TagMatch {
    Literal,
    Partial,
    Open { name: TagName, name_end: usize },
    Close { name: TagName, end: usize },
}

const OPEN_CANDIDATES: [(&str, TagName); 2] = [
    ("<artifact", TagName::Artifact),
    ("<action", TagName::Action),
];
const CLOSE_CANDIDATES: [(&str, TagName); 2] = [
    ("</artifact", TagName::Artifact),
    ("</action", TagName::Action),
];
const ACTION_BODY_CANDIDATES: [(&str, TagName); 1] = [("</action", TagName::Action)];

/// Lazy token stream over `buffer[start..]`.
pub struct Scanner<'a> {
    buffer: &'a str,
    pos: usize,
    context: ScanContext,
    queued: VecDeque<Token<'a>>,
    stopped: bool,
}

impl<'a> Scanner<'a> {
    #[must_use]
    pub fn new(buffer: &'a str, start: usize) -> Self {
        Self {
            buffer,
            pos: start.min(buffer.len()),
            context: ScanContext::Markup,
            queued: VecDeque::new(),
            stopped: false,
        }
    }

    /// Switch recognition rules. Takes effect at the next unscanned byte.
    pub fn set_context(&mut self, context: ScanContext) {
        self.context = context;
    }

    #[must_use]
    pub fn context(&self) -> ScanContext {
        self.context
    }

    /// Offset of the first byte not yet turned into a token.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn match_tag(&self, at: usize) -> TagMatch {
        let rest = &self.buffer[at..];
        let (opens, closes): (&[(&str, TagName)], &[(&str, TagName)]) = match self.context {
            ScanContext::Markup => (&OPEN_CANDIDATES, &CLOSE_CANDIDATES),
            ScanContext::ActionBody => (&[], &ACTION_BODY_CANDIDATES),
        };

        let mut partial = false;
        for &(pattern, name) in opens {
            match prefix_match(rest, pattern) {
                Prefix::Full => {
                    let name_end = at + pattern.len();
                    match self.buffer.as_bytes().get(name_end) {
                        None => partial = true,
                        Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {
                            return TagMatch::Open { name, name_end };
                        }
                        Some(_) => {}
                    }
                }
                Prefix::Partial => partial = true,
                Prefix::None => {}
            }
        }
        for &(pattern, name) in closes {
            match prefix_match(rest, pattern) {
                Prefix::Full => {
                    let after = at + pattern.len();
                    let bytes = self.buffer.as_bytes();
                    let mut i = after;
                    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    match bytes.get(i) {
                        None => partial = true,
                        Some(b'>') => return TagMatch::Close { name, end: i + 1 },
                        Some(_) => {}
                    }
                }
                Prefix::Partial => partial = true,
                Prefix::None => {}
            }
        }

        if partial {
            TagMatch::Partial
        } else {
            TagMatch::Literal
        }
    }

    /// Find the `>` closing an open tag, skipping quoted attribute values.
    fn find_tag_end(&self, from: usize) -> Option<usize> {
        let bytes = self.buffer.as_bytes();
        let mut quote: Option<u8> = None;
        let mut after_eq = false;
        let mut i = from;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None => match b {
                    b'>' => return Some(i),
                    b'"' | b'\'' if after_eq => quote = Some(b),
                    _ => {}
                },
            }
            if quote.is_none() && !b.is_ascii_whitespace() {
                after_eq = b == b'=';
            }
            i += 1;
        }
        None
    }

    fn literal_text(&mut self, at: usize) -> Token<'a> {
        let rest = &self.buffer[at + 1..];
        let end = rest.find('<').map_or(self.buffer.len(), |i| at + 1 + i);
        self.pos = end;
        Token::Text(at..end)
    }

    fn scan_tag(&mut self, at: usize) -> Token<'a> {
        match self.match_tag(at) {
            TagMatch::Literal => self.literal_text(at),
            TagMatch::Partial => self.stop(at),
            TagMatch::Close { name, end } => {
                self.pos = end;
                Token::CloseTag {
                    name,
                    span: at..end,
                }
            }
            TagMatch::Open { name, name_end } => match self.find_tag_end(name_end) {
                Some(gt) if gt - at <= MAX_TAG_BYTES => {
                    let buffer: &'a str = self.buffer;
                    let inner = &buffer[name_end..gt];
                    for (key, value) in parse_attributes(inner) {
                        self.queued.push_back(Token::Attribute { key, value });
                    }
                    self.queued.push_back(Token::TagEnd { end: gt + 1 });
                    self.pos = gt + 1;
                    Token::OpenTagStart {
                        name,
                        span: at..name_end,
                    }
                }
                Some(_) => self.literal_text(at),
                None if self.buffer.len() - at > MAX_TAG_BYTES => self.literal_text(at),
                None => self.stop(at),
            },
        }
    }

    fn stop(&mut self, at: usize) -> Token<'a> {
        self.stopped = true;
        Token::Incomplete { at }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.queued.pop_front() {
            return Some(token);
        }
        if self.stopped || self.pos >= self.buffer.len() {
            return None;
        }

        let at = self.pos;
        match self.buffer[at..].find('<') {
            None => {
                self.pos = self.buffer.len();
                Some(Token::Text(at..self.buffer.len()))
            }
            Some(0) => Some(self.scan_tag(at)),
            Some(i) => {
                self.pos = at + i;
                Some(Token::Text(at..at + i))
            }
        }
    }
}

enum Prefix {
    Full,
    Partial,
    None,
}

fn prefix_match(rest: &str, pattern: &str) -> Prefix {
    if rest.starts_with(pattern) {
        Prefix::Full
    } else if pattern.starts_with(rest) {
        Prefix::Partial
    } else {
        Prefix::None
    }
}

/// Parse `key="value"` pairs. Malformed attributes are dropped.
fn parse_attributes(inner: &str) -> Vec<(&str, &str)> {
    let bytes = inner.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;

    let skip_ws = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };
    let skip_token = |mut i: usize| {
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    };

    loop {
        i = skip_ws(i);
        if i >= bytes.len() {
            break;
        }

        let key_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'=' {
            i += 1;
        }
        let key = &inner[key_start..i];
        let valid_key = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':'));

        i = skip_ws(i);
        if bytes.get(i) != Some(&b'=') {
            // Bare word, no value.
            continue;
        }
        i = skip_ws(i + 1);

        match bytes.get(i) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let value_start = i + 1;
                match inner[value_start..].find(q as char) {
                    Some(len) => {
                        let value_end = value_start + len;
                        if valid_key {
                            attrs.push((key, &inner[value_start..value_end]));
                        }
                        i = value_end + 1;
                    }
                    None => break,
                }
            }
            Some(_) => {
                // Unquoted value.
                i = skip_token(i);
            }
            None => break,
        }
    }

    attrs
}
