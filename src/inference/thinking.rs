//! Thinking-section handling.
//!
//! Models with thinking mode wrap their reasoning in `<thinking>` …
//! `</thinking>`. The reasoning is kept for display but never counts as answer
//! text or as a place to look for tool calls.
//!
//! [`ThinkingFilter`] is incremental so the streaming path can split deltas as
//! they arrive; [`split_thinking`] runs the same state machine over a whole
//! string, which keeps streamed and non-streamed splits identical.

pub const THINKING_OPEN: &str = "<thinking>";
pub const THINKING_CLOSE: &str = "</thinking>";

/// Answer text with the thinking sections pulled out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThinkingSplit {
    pub answer: String,
    /// `None` when the text had no thinking content.
    pub thinking: Option<String>,
}

/// Text routed by one `push`/`finish` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThinkingDelta {
    pub answer: String,
    pub thinking: String,
}

impl ThinkingDelta {
    pub fn is_empty(&self) -> bool {
        self.answer.is_empty() && self.thinking.is_empty()
    }
}

/// Incremental splitter. Tags are matched ASCII case-insensitively and may be
/// cut across deltas; a possible partial tag is carried until it resolves.
#[derive(Debug, Default)]
pub struct ThinkingFilter {
    in_thinking: bool,
    carry: String,
}

impl ThinkingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next piece of text.
    pub fn push(&mut self, text: &str) -> ThinkingDelta {
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(text);

        let mut delta = ThinkingDelta::default();
        let mut rest = input.as_str();
        loop {
            let tag = if self.in_thinking {
                THINKING_CLOSE
            } else {
                THINKING_OPEN
            };
            match find_ascii_ci(rest, tag) {
                Some(idx) => {
                    self.route(&mut delta, &rest[..idx]);
                    rest = &rest[idx + tag.len()..];
                    self.in_thinking = !self.in_thinking;
                }
                None => {
                    let keep = partial_tag_suffix(rest, tag);
                    let split_at = rest.len() - keep;
                    self.route(&mut delta, &rest[..split_at]);
                    self.carry = rest[split_at..].to_string();
                    break;
                }
            }
        }
        delta
    }

    /// Flush whatever is still carried. An unterminated section stays thinking.
    pub fn finish(&mut self) -> ThinkingDelta {
        let mut delta = ThinkingDelta::default();
        let carry = std::mem::take(&mut self.carry);
        self.route(&mut delta, &carry);
        delta
    }

    fn route(&self, delta: &mut ThinkingDelta, text: &str) {
        if self.in_thinking {
            delta.thinking.push_str(text);
        } else {
            delta.answer.push_str(text);
        }
    }
}

/// Split a complete text into answer and thinking.
pub fn split_thinking(text: &str) -> ThinkingSplit {
    let mut filter = ThinkingFilter::new();
    let mut delta = filter.push(text);
    let tail = filter.finish();
    delta.answer.push_str(&tail.answer);
    delta.thinking.push_str(&tail.thinking);

    let thinking = delta.thinking.trim();
    ThinkingSplit {
        answer: delta.answer,
        thinking: (!thinking.is_empty()).then(|| thinking.to_string()),
    }
}

/// Remove thinking sections, keeping only answer text.
pub fn strip_thinking(text: &str) -> String {
    split_thinking(text).answer
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// ASCII case-insensitive search. Lowercasing ASCII keeps byte offsets.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

/// Length of the longest proper prefix of `tag` that ends `text`.
fn partial_tag_suffix(text: &str, tag: &str) -> usize {
    let bytes = text.as_bytes();
    let tag = tag.as_bytes();
    (1..tag.len().min(bytes.len() + 1))
        .rev()
        .find(|&k| bytes[bytes.len() - k..].eq_ignore_ascii_case(&tag[..k]))
        .unwrap_or(0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
