//! Think-section splitting for streamed text.
//!
//! The server embeds model reasoning inside the streamed text between two
//! literal markers (by default `<think>` and `</think>`). [`FragmentParser`]
//! splits every incoming fragment into visible text and thinking text while
//! [`ParserState`] remembers, across fragments, whether a think section is
//! open and any trailing bytes that might be the start of a marker.
//!
//! Nested think sections are not supported: an opening marker seen while
//! already inside a section is treated as reasoning text.

use crate::config::ClientConfig;

/// Rolling display buffer for reasoning text.
///
/// Keeps only the most recent lines and characters. Once anything has been
/// discarded the display is prefixed with `...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingBuffer {
    content: String,
    truncated: bool,
    max_lines: usize,
    max_chars: usize,
}

impl ThinkingBuffer {
    /// Marker shown in front of trimmed reasoning.
    pub const ELLIPSIS: &'static str = "...";

    /// Create an empty buffer with the given caps.
    #[must_use]
    pub const fn new(max_lines: usize, max_chars: usize) -> Self {
        Self {
            content: String::new(),
            truncated: false,
            max_lines,
            max_chars,
        }
    }

    /// Append reasoning text and trim to the caps.
    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.content.push_str(text);
        self.trim();
    }

    fn trim(&mut self) {
        let lines = self.content.matches('\n').count() + 1;
        if lines > self.max_lines {
            let excess = lines - self.max_lines;
            if let Some((idx, _)) = self.content.match_indices('\n').nth(excess - 1) {
                self.content.drain(..=idx);
                self.truncated = true;
            }
        }

        let chars = self.content.chars().count();
        if chars > self.max_chars {
            let cut = self
                .content
                .char_indices()
                .nth(chars - self.max_chars)
                .map_or(self.content.len(), |(idx, _)| idx);
            self.content.drain(..cut);
            self.truncated = true;
        }
    }

    /// Text to show in the thinking message.
    #[must_use]
    pub fn display(&self) -> String {
        if self.truncated {
            format!("{}{}", Self::ELLIPSIS, self.content)
        } else {
            self.content.clone()
        }
    }

    /// Whether nothing has been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Drop all buffered reasoning.
    pub fn clear(&mut self) {
        self.content.clear();
        self.truncated = false;
    }
}

/// Parser state carried from one fragment to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserState {
    inside_think: bool,
    carry: String,
    thinking: ThinkingBuffer,
}

impl ParserState {
    /// Fresh state with the given thinking caps.
    #[must_use]
    pub const fn new(max_lines: usize, max_chars: usize) -> Self {
        Self {
            inside_think: false,
            carry: String::new(),
            thinking: ThinkingBuffer::new(max_lines, max_chars),
        }
    }

    /// Whether an opening marker has been seen without its closing marker.
    #[must_use]
    pub const fn inside_think(&self) -> bool {
        self.inside_think
    }

    /// The rolling reasoning buffer of the current think section.
    #[must_use]
    pub const fn thinking(&self) -> &ThinkingBuffer {
        &self.thinking
    }

    /// Forget everything, e.g. when a new user turn starts.
    pub fn reset(&mut self) {
        self.inside_think = false;
        self.carry.clear();
        self.thinking.clear();
    }
}

/// Result of parsing one fragment.
///
/// Empty strings are meaningful: a fragment made only of a marker yields
/// empty `visible` and `thinking` with a transition flag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFragment {
    /// Text outside think sections.
    pub visible: String,
    /// Text inside think sections.
    pub thinking: String,
    /// An opening marker was consumed.
    pub think_opened: bool,
    /// A closing marker was consumed.
    pub think_just_closed: bool,
}

impl ParsedFragment {
    /// Fold a later result into this one.
    pub fn absorb(&mut self, later: Self) {
        self.visible.push_str(&later.visible);
        self.thinking.push_str(&later.thinking);
        self.think_opened |= later.think_opened;
        self.think_just_closed |= later.think_just_closed;
    }

    /// Whether both outputs are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty() && self.thinking.is_empty()
    }
}

/// Splits fragments on the think markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentParser {
    open: String,
    close: String,
    max_lines: usize,
    max_chars: usize,
}

impl FragmentParser {
    /// Create a parser for the given markers and thinking caps.
    pub fn new(
        open: impl Into<String>,
        close: impl Into<String>,
        max_lines: usize,
        max_chars: usize,
    ) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
            max_lines,
            max_chars,
        }
    }

    /// Create a parser from the session config.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.think_open.clone(),
            config.think_close.clone(),
            config.thinking_max_lines,
            config.thinking_max_chars,
        )
    }

    /// A state matching this parser's caps.
    #[must_use]
    pub const fn new_state(&self) -> ParserState {
        ParserState::new(self.max_lines, self.max_chars)
    }

    /// Split one fragment, left to right.
    ///
    /// A trailing partial marker is held back in `state` and re-examined
    /// with the next fragment.
    pub fn parse(&self, fragment: &str, state: &mut ParserState) -> ParsedFragment {
        let mut input = std::mem::take(&mut state.carry);
        input.push_str(fragment);

        let mut out = ParsedFragment::default();
        let mut rest = input.as_str();

        loop {
            let marker = if state.inside_think {
                self.close.as_str()
            } else {
                self.open.as_str()
            };

            if let Some(idx) = rest.find(marker) {
                Self::emit(&rest[..idx], state, &mut out);
                if state.inside_think {
                    state.inside_think = false;
                    state.thinking.clear();
                    out.think_just_closed = true;
                } else {
                    state.inside_think = true;
                    state.thinking.clear();
                    out.think_opened = true;
                }
                rest = &rest[idx + marker.len()..];
            } else {
                let keep = partial_marker_len(rest, marker);
                let (ready, held) = rest.split_at(rest.len() - keep);
                Self::emit(ready, state, &mut out);
                state.carry = held.to_string();
                break;
            }
        }

        out
    }

    /// End of the response: flush held-back bytes and reset `state`.
    pub fn finish(&self, state: &mut ParserState) -> ParsedFragment {
        let mut out = ParsedFragment::default();
        let held = std::mem::take(&mut state.carry);
        Self::emit(&held, state, &mut out);
        state.reset();
        out
    }

    fn emit(text: &str, state: &mut ParserState, out: &mut ParsedFragment) {
        if state.inside_think {
            out.thinking.push_str(text);
            state.thinking.push(text);
        } else {
            out.visible.push_str(text);
        }
    }
}

/// Length of the longest proper prefix of `marker` that `text` ends with.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .filter(|&n| marker.is_char_boundary(n))
        .find(|&n| text.ends_with(&marker[..n]))
        .unwrap_or(0)
}
