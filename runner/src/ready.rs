//! Ready-signal detection for long-running commands.
//!
//! A dev server never exits, so its shell action completes when its output
//! says it is serving. Patterns are matched against a bounded tail of recent
//! output, so a marker split across chunks is still seen.

use regex::Regex;
use smithy_types::ReadySettings;

/// Bytes of recent output kept for matching.
pub const READY_TAIL_BYTES: usize = 4096;

/// Built-in patterns: the interactive-shell OSC marker and common dev-server
/// banners.
const DEFAULT_PATTERNS: &[&str] = &[
    r"\x1b\]654;interactive\x07",
    r"(?i)\bready in \d+(\.\d+)?\s*m?s\b",
    r"(?i)\blocal:\s+https?://",
    r"(?i)\blistening on (port \d+|https?://|\S+:\d+)",
    r"(?i)\bserver (is )?running (at|on) ",
];

#[derive(Debug, Clone)]
pub struct ReadySignal {
    patterns: Vec<Regex>,
}

impl ReadySignal {
    /// Compile configured patterns. Invalid patterns are logged and skipped.
    #[must_use]
    pub fn from_settings(settings: &ReadySettings) -> Self {
        let defaults = settings
            .include_defaults
            .then_some(DEFAULT_PATTERNS)
            .unwrap_or_default()
            .iter()
            .copied();
        let configured = settings.patterns.iter().map(String::as_str);

        let patterns = defaults
            .chain(configured)
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!(pattern, "Ignoring invalid ready pattern: {err}");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Never matches.
    #[must_use]
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    #[must_use]
    pub fn matches(&self, recent_output: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(recent_output))
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::from_settings(&ReadySettings::default())
    }
}

/// Rolling window over the most recent output.
#[derive(Debug, Clone)]
pub struct OutputTail {
    buf: String,
    cap: usize,
}

impl OutputTail {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        if self.buf.len() > self.cap {
            let mut cut = self.buf.len() - self.cap;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buf
    }
}
