//! Terminal text sanitization for process output.
//!
//! Shell commands run by the runner write arbitrary bytes, including the
//! interactive-shell OSC marker used as a ready signal, colour codes and
//! cursor movement. Everything forwarded to a transcript or terminal goes
//! through [`sanitize_terminal_text`] first.

use std::borrow::Cow;

const ESC: char = '\x1b';
const BEL: char = '\x07';
const C1_CSI: char = '\u{009b}';

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    /// Just saw ESC.
    Escape,
    /// ESC followed by an intermediate byte; one more char to drop.
    EscapeIntermediate,
    /// Inside `ESC [` parameters.
    Csi,
    /// Inside `ESC ]`; ends at BEL or ST.
    Osc,
    /// Inside DCS/PM/APC; ends at ST only.
    StringCommand,
    /// Saw ESC inside an OSC/DCS string; `\` completes ST.
    StringEscape,
}

/// Strip escape sequences and control characters, keeping `\n`, `\t`, `\r`.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
///
/// ```
/// use smithy_types::sanitize_terminal_text;
///
/// assert_eq!(sanitize_terminal_text("ok"), "ok");
/// assert_eq!(sanitize_terminal_text("\x1b]654;interactive\x07$ "), "$ ");
/// ```
#[must_use]
pub fn sanitize_terminal_text(input: &str) -> Cow<'_, str> {
    if !input.chars().any(is_unsafe) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Ground;

    for c in input.chars() {
        state = match state {
            State::Ground => {
                if c == ESC {
                    State::Escape
                } else if c == C1_CSI {
                    State::Csi
                } else {
                    if !is_unsafe(c) {
                        out.push(c);
                    }
                    State::Ground
                }
            }
            State::Escape => match c {
                '[' => State::Csi,
                ']' => State::Osc,
                'P' | '^' | '_' => State::StringCommand,
                '(' | ')' | '*' | '+' | '#' | ' ' => State::EscapeIntermediate,
                _ => State::Ground,
            },
            State::EscapeIntermediate => State::Ground,
            State::Csi => {
                if ('\x40'..='\x7e').contains(&c) {
                    State::Ground
                } else if ('\x20'..='\x3f').contains(&c) {
                    State::Csi
                } else {
                    // Malformed sequence: resume with this char as text.
                    if !is_unsafe(c) {
                        out.push(c);
                    }
                    State::Ground
                }
            }
            State::Osc => match c {
                BEL => State::Ground,
                ESC => State::StringEscape,
                _ => State::Osc,
            },
            State::StringCommand => {
                if c == ESC {
                    State::StringEscape
                } else {
                    State::StringCommand
                }
            }
            State::StringEscape => {
                if c == '\\' {
                    State::Ground
                } else {
                    State::StringCommand
                }
            }
        };
    }

    Cow::Owned(out)
}

fn is_unsafe(c: char) -> bool {
    let c0 = c <= '\x1f' && !matches!(c, '\n' | '\t' | '\r');
    let c1 = ('\u{0080}'..='\u{009f}').contains(&c);
    c0 || c1 || c == '\x7f'
}
