//! Streaming aggregator: decides, chunk by chunk, whether streamed text can
//! go to the consumer now or must be held because it may be the start of a
//! tool call.
//!
//! Held chunks are queued, not dropped. They are released in arrival order
//! with the next forwardable chunk or at stream end, and discarded only when
//! they turn out to be a recognised tool call.

use std::time::Instant;

use crate::inference::config::StreamingConfig;
use crate::inference::thinking::{ThinkingDelta, ThinkingFilter};
use crate::inference::tool_call_parser::{
    contains_marker, extract_from_text, ExtractMode, TOOL_CALL_MARKERS,
};
use crate::inference::types::{Message, ToolCallRequest};

/// What to do after one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkDecision {
    /// Send these chunks, in order.
    Forward(Vec<Message>),
    /// Keep waiting.
    Hold,
    /// The text so far is a complete tool-call batch.
    ToolCalls(Vec<ToolCallRequest>),
}

/// How one streamed inference ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    ToolCalls(Vec<ToolCallRequest>),
    /// No tool call. `flush` holds chunks still queued; `raw` is the whole
    /// response text, thinking tags included.
    Answer { flush: Vec<Message>, raw: String },
}

/// Per-iteration buffers for one streamed inference.
pub struct StreamAccumulator {
    settings: StreamingConfig,
    model: String,
    thinking: ThinkingFilter,
    /// Most recent answer text, at most `rolling_window_chars` characters.
    rolling: String,
    /// Answer text (thinking removed) since the stream began.
    answer: String,
    /// Answer text not yet forwarded.
    unflushed: String,
    raw: String,
    pending: Vec<Message>,
    last_flush: Instant,
}

impl StreamAccumulator {
    pub fn new(settings: &StreamingConfig, model: impl Into<String>) -> Self {
        Self {
            settings: settings.clone(),
            model: model.into(),
            thinking: ThinkingFilter::new(),
            rolling: String::new(),
            answer: String::new(),
            unflushed: String::new(),
            raw: String::new(),
            pending: Vec::new(),
            last_flush: Instant::now(),
        }
    }

    /// Feed one text delta.
    pub fn push_text(&mut self, delta: &str) -> ChunkDecision {
        self.raw.push_str(delta);
        let split = self.thinking.push(delta);
        if split.is_empty() {
            return ChunkDecision::Hold;
        }

        self.answer.push_str(&split.answer);
        self.unflushed.push_str(&split.answer);
        self.roll(&split.answer);
        let chunk = self.chunk(split);

        if contains_marker(&self.rolling) {
            if let Some(calls) = extract_from_text(&self.answer, ExtractMode::Partial) {
                tracing::debug!(count = calls.len(), "tool calls recognised mid-stream");
                self.reset();
                return ChunkDecision::ToolCalls(calls);
            }
        }

        if self.safe_to_forward() {
            ChunkDecision::Forward(self.release(Some(chunk)))
        } else {
            tracing::trace!(held = self.pending.len() + 1, "holding chunk");
            self.pending.push(chunk);
            ChunkDecision::Hold
        }
    }

    /// Release whatever is queued, then `extra`. Used when a diagnostic ends
    /// the stream.
    pub fn flush_with(&mut self, extra: Message) -> Vec<Message> {
        self.release(Some(extra))
    }

    /// The stream ended: run a final extraction over the whole answer.
    pub fn finish(mut self) -> StreamOutcome {
        let tail = self.thinking.finish();
        if !tail.is_empty() {
            self.answer.push_str(&tail.answer);
            let chunk = self.chunk(tail);
            self.pending.push(chunk);
        }

        if let Some(calls) = extract_from_text(&self.answer, ExtractMode::Complete) {
            tracing::debug!(count = calls.len(), "tool calls recognised at stream end");
            return StreamOutcome::ToolCalls(calls);
        }

        StreamOutcome::Answer {
            flush: std::mem::take(&mut self.pending),
            raw: self.raw,
        }
    }

    fn safe_to_forward(&self) -> bool {
        if self.unflushed.chars().count() > self.settings.flush_threshold_chars {
            tracing::debug!("releasing held output past size threshold");
            return true;
        }
        if self.last_flush.elapsed() >= self.settings.flush_interval() {
            tracing::debug!("releasing held output past time window");
            return true;
        }
        !contains_marker(&self.unflushed) && !is_marker_start(&self.rolling)
    }

    fn release(&mut self, chunk: Option<Message>) -> Vec<Message> {
        let mut out = std::mem::take(&mut self.pending);
        out.extend(chunk);
        self.unflushed.clear();
        self.last_flush = Instant::now();
        out
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.rolling.clear();
        self.unflushed.clear();
    }

    fn roll(&mut self, text: &str) {
        self.rolling.push_str(text);
        let excess = self
            .rolling
            .chars()
            .count()
            .saturating_sub(self.settings.rolling_window_chars);
        if excess > 0 {
            let cut = self
                .rolling
                .char_indices()
                .nth(excess)
                .map_or(self.rolling.len(), |(i, _)| i);
            self.rolling.drain(..cut);
        }
    }

    fn chunk(&self, split: ThinkingDelta) -> Message {
        let mut msg = Message::assistant(split.answer).with_model(self.model.as_str());
        if !split.thinking.is_empty() {
            msg.thinking = Some(split.thinking);
        }
        msg
    }
}

/// Whether everything streamed so far could still grow into a marker, as in
/// a response that opens with `{"tool`.
fn is_marker_start(rolling: &str) -> bool {
    let text = rolling.trim();
    !text.is_empty() && TOOL_CALL_MARKERS.iter().any(|m| m.contains(text))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn accumulator() -> StreamAccumulator {
        StreamAccumulator::new(&StreamingConfig::default(), "m")
    }

    fn forwarded(decision: ChunkDecision) -> Vec<String> {
        match decision {
            ChunkDecision::Forward(msgs) => msgs.iter().map(Message::text).collect(),
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_prose_is_never_held() {
        let mut acc = accumulator();
        assert_eq!(forwarded(acc.push_text("Hel")), ["Hel"]);
        assert_eq!(forwarded(acc.push_text("lo wor")), ["lo wor"]);
        assert_eq!(forwarded(acc.push_text("ld")), ["ld"]);
        assert_eq!(
            acc.finish(),
            StreamOutcome::Answer {
                flush: vec![],
                raw: "Hello world".into()
            }
        );
    }

    #[test]
    fn test_tool_call_is_held_and_recognised() {
        let mut acc = accumulator();
        assert_eq!(acc.push_text("{\"tool"), ChunkDecision::Hold);
        assert_eq!(acc.push_text("_calls\": [{\"name\": \"time#now\","), ChunkDecision::Hold);
        let decision = acc.push_text(" \"args\": {}}]}");
        let ChunkDecision::ToolCalls(calls) = decision else {
            panic!("expected tool calls, got {decision:?}");
        };
        assert_eq!(calls[0].qualified_name, "time#now");
    }

    #[test]
    fn test_tool_call_found_only_at_stream_end() {
        let mut acc = accumulator();
        assert_eq!(acc.push_text("{\"tool_calls\": [{\"name\": \"t\", \"args\": {}}"), ChunkDecision::Hold);
        let StreamOutcome::ToolCalls(calls) = acc.finish() else {
            panic!("expected tool calls");
        };
        assert_eq!(calls[0].qualified_name, "t");
    }

    #[test]
    fn test_held_prose_is_released_in_order() {
        let mut acc = accumulator();
        assert_eq!(forwarded(acc.push_text("Use the ")), ["Use the "]);
        assert_eq!(acc.push_text("\"tool_calls\" key"), ChunkDecision::Hold);
        assert_eq!(acc.push_text(" when calling tools."), ChunkDecision::Hold);
        let StreamOutcome::Answer { flush, raw } = acc.finish() else {
            panic!("expected answer");
        };
        let texts: Vec<String> = flush.iter().map(Message::text).collect();
        assert_eq!(texts, ["\"tool_calls\" key", " when calling tools."]);
        assert_eq!(raw, "Use the \"tool_calls\" key when calling tools.");
    }

    #[test]
    fn test_size_threshold_releases_held_output() {
        let settings = StreamingConfig {
            flush_threshold_chars: 20,
            ..Default::default()
        };
        let mut acc = StreamAccumulator::new(&settings, "m");
        assert_eq!(acc.push_text("a 'tool_calls' b"), ChunkDecision::Hold);
        assert_eq!(
            forwarded(acc.push_text(" and more prose")),
            ["a 'tool_calls' b", " and more prose"]
        );
        assert_eq!(forwarded(acc.push_text(" x")), [" x"]);
    }

    #[test]
    fn test_time_window_releases_held_output() {
        let settings = StreamingConfig {
            flush_interval_ms: 0,
            ..Default::default()
        };
        let mut acc = StreamAccumulator::new(&settings, "m");
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(forwarded(acc.push_text("'tool_calls'")), ["'tool_calls'"]);
    }

    #[test]
    fn test_thinking_is_split_per_chunk() {
        let mut acc = accumulator();
        let ChunkDecision::Forward(msgs) = acc.push_text("<thinking>hmm</thinking>Hi") else {
            panic!("expected forward");
        };
        assert_eq!(msgs[0].text(), "Hi");
        assert_eq!(msgs[0].thinking.as_deref(), Some("hmm"));
        assert_eq!(msgs[0].model.as_deref(), Some("m"));
    }

    #[test]
    fn test_tool_call_inside_thinking_is_ignored() {
        let mut acc = accumulator();
        acc.push_text("<thinking>maybe {\"tool_calls\": [{\"name\": \"t\"}]}</thinking>");
        acc.push_text("No tools needed.");
        assert!(matches!(acc.finish(), StreamOutcome::Answer { .. }));
    }

    #[test]
    fn test_rolling_window_keeps_tail() {
        let settings = StreamingConfig {
            rolling_window_chars: 5,
            ..Default::default()
        };
        let mut acc = StreamAccumulator::new(&settings, "m");
        acc.push_text("héllo world");
        assert_eq!(acc.rolling, "world");
    }

    #[test]
    fn test_marker_start_detection() {
        assert!(is_marker_start("{\"tool"));
        assert!(is_marker_start("  tool_c"));
        assert!(!is_marker_start("Hel"));
        assert!(!is_marker_start(""));
    }
}
