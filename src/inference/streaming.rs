//! Streaming response framing.
//!
//! Reads a response body as a byte stream, splits it into lines, and feeds
//! each payload to a backend-specific [`ChunkDecoder`]. Two framings exist:
//! server-sent events (`data: …` lines, terminated by `[DONE]`) for
//! OpenAI-compatible endpoints and newline-delimited JSON for Ollama.
//!
//! Bytes are buffered until a full line is available, so multi-byte
//! characters split across network reads decode correctly.

use std::collections::VecDeque;
use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::thinking::{THINKING_CLOSE, THINKING_OPEN};
use super::types::InferenceResponse;

/// SSE sentinel marking the end of an OpenAI stream.
const SSE_DONE: &str = "[DONE]";

// ─── Framing ─────────────────────────────────────────────────────────────────

/// How payloads are delimited in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Sse,
    Ndjson,
}

impl Framing {
    fn payload<'a>(&self, line: &'a str) -> Option<&'a str> {
        let line = line.trim();
        match self {
            Framing::Sse => line
                .strip_prefix("data:")
                .map(str::trim)
                .filter(|data| !data.is_empty()),
            Framing::Ndjson => (!line.is_empty()).then_some(line),
        }
    }
}

/// Turns one payload into zero or more responses.
///
/// Text deltas come out as `Freeform`; native tool calls are accumulated and
/// emitted once as `Structured`.
pub trait ChunkDecoder: Send {
    fn decode(&mut self, payload: &str) -> Result<Vec<InferenceResponse>, InferenceError>;

    /// Called once when the body ends or the end sentinel arrives.
    fn finish(&mut self) -> Result<Vec<InferenceResponse>, InferenceError>;
}

// ─── Stream Decoding ─────────────────────────────────────────────────────────

/// Decode a byte stream into responses.
///
/// Transport errors become a single `StreamError` item, after which the
/// stream ends.
pub fn decode_stream<S, B, E, D>(
    bytes: S,
    framing: Framing,
    decoder: D,
) -> impl Stream<Item = Result<InferenceResponse, InferenceError>> + Send
where
    S: Stream<Item = Result<B, E>> + Unpin + Send,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
    D: ChunkDecoder,
{
    let state = DecodeState {
        bytes,
        decoder,
        framing,
        buffer: Vec::new(),
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                state.handle_line(&String::from_utf8_lossy(&line));
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    state.queue.push_back(Err(InferenceError::StreamError {
                        reason: format!("stream read error: {e}"),
                    }));
                    state.finished = true;
                }
                None => {
                    let rest = std::mem::take(&mut state.buffer);
                    state.handle_line(&String::from_utf8_lossy(&rest));
                    state.finish_decoder();
                }
            }
        }
    })
}

struct DecodeState<S, D> {
    bytes: S,
    decoder: D,
    framing: Framing,
    buffer: Vec<u8>,
    queue: VecDeque<Result<InferenceResponse, InferenceError>>,
    finished: bool,
}

impl<S, D: ChunkDecoder> DecodeState<S, D> {
    fn handle_line(&mut self, line: &str) {
        if self.finished {
            return;
        }
        let Some(payload) = self.framing.payload(line) else {
            return;
        };
        if self.framing == Framing::Sse && payload == SSE_DONE {
            self.finish_decoder();
            return;
        }
        match self.decoder.decode(payload) {
            Ok(items) => self.queue.extend(items.into_iter().map(Ok)),
            Err(e) => {
                self.queue.push_back(Err(e));
                self.finished = true;
            }
        }
    }

    fn finish_decoder(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.decoder.finish() {
            Ok(items) => self.queue.extend(items.into_iter().map(Ok)),
            Err(e) => self.queue.push_back(Err(e)),
        }
    }
}

// ─── Reasoning Fields ────────────────────────────────────────────────────────

/// Folds a backend's separate reasoning field into the text as a thinking
/// section, so downstream code sees one representation.
#[derive(Debug, Default)]
pub(crate) struct ReasoningTagger {
    open: bool,
}

impl ReasoningTagger {
    pub(crate) fn push(&mut self, reasoning: Option<&str>, content: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
            if !self.open {
                out.push_str(THINKING_OPEN);
                self.open = true;
            }
            out.push_str(reasoning);
        }
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            if self.open {
                out.push_str(THINKING_CLOSE);
                self.open = false;
            }
            out.push_str(content);
        }
        out
    }

    pub(crate) fn finish(&mut self) -> String {
        if std::mem::take(&mut self.open) {
            THINKING_CLOSE.to_string()
        } else {
            String::new()
        }
    }
}

/// Non-streaming form of [`ReasoningTagger`].
pub(crate) fn tag_reasoning(reasoning: Option<&str>, content: Option<&str>) -> String {
    let mut tagger = ReasoningTagger::default();
    let mut text = tagger.push(reasoning, content);
    text.push_str(&tagger.finish());
    text
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes every payload as text and reports how many it saw at the end.
    #[derive(Default)]
    struct EchoDecoder {
        seen: usize,
    }

    impl ChunkDecoder for EchoDecoder {
        fn decode(&mut self, payload: &str) -> Result<Vec<InferenceResponse>, InferenceError> {
            if payload == "bad" {
                return Err(InferenceError::StreamError {
                    reason: "bad payload".into(),
                });
            }
            self.seen += 1;
            Ok(vec![InferenceResponse::Freeform(payload.to_string())])
        }

        fn finish(&mut self) -> Result<Vec<InferenceResponse>, InferenceError> {
            Ok(vec![InferenceResponse::Freeform(format!("end:{}", self.seen))])
        }
    }

    fn body(chunks: &[&[u8]]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        stream::iter(chunks.iter().map(|c| Ok(c.to_vec())).collect::<Vec<_>>())
    }

    async fn collect_texts<S>(s: S) -> Vec<String>
    where
        S: Stream<Item = Result<InferenceResponse, InferenceError>>,
    {
        s.map(|item| match item {
            Ok(resp) => resp.text().to_string(),
            Err(e) => format!("err:{e}"),
        })
        .collect()
        .await
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_reads() {
        let bytes = body(&[b"data: he", b"llo\n\n: keep-alive\n\ndata: wor", b"ld\n\n"]);
        let out = collect_texts(decode_stream(bytes, Framing::Sse, EchoDecoder::default())).await;
        assert_eq!(out, vec!["hello", "world", "end:2"]);
    }

    #[tokio::test]
    async fn test_sse_done_finishes_once() {
        let bytes = body(&[b"data: a\n\ndata: [DONE]\n\ndata: late\n\n"]);
        let out = collect_texts(decode_stream(bytes, Framing::Sse, EchoDecoder::default())).await;
        assert_eq!(out, vec!["a", "end:1"]);
    }

    #[tokio::test]
    async fn test_ndjson_without_trailing_newline() {
        let bytes = body(&[b"{\"a\":1}\n", b"\n{\"b\":2}"]);
        let out =
            collect_texts(decode_stream(bytes, Framing::Ndjson, EchoDecoder::default())).await;
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}", "end:2"]);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_between_reads() {
        let text = "data: héllo\n";
        let bytes = text.as_bytes();
        let split = text.find('é').unwrap() + 1;
        let stream = body(&[&bytes[..split], &bytes[split..]]);
        let out = collect_texts(decode_stream(stream, Framing::Sse, EchoDecoder::default())).await;
        assert_eq!(out, vec!["héllo", "end:1"]);
    }

    #[tokio::test]
    async fn test_decoder_error_ends_stream() {
        let bytes = body(&[b"data: ok\ndata: bad\ndata: never\n"]);
        let out = collect_texts(decode_stream(bytes, Framing::Sse, EchoDecoder::default())).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "ok");
        assert!(out[1].starts_with("err:stream error"));
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let items: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: x\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "reset")),
        ];
        let out = collect_texts(decode_stream(
            stream::iter(items),
            Framing::Sse,
            EchoDecoder::default(),
        ))
        .await;
        assert_eq!(out[0], "x");
        assert!(out[1].contains("stream read error: reset"));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_reasoning_tagger_wraps_and_closes() {
        let mut tagger = ReasoningTagger::default();
        let mut text = tagger.push(Some("let me "), None);
        text.push_str(&tagger.push(Some("think"), None));
        text.push_str(&tagger.push(None, Some("Answer")));
        text.push_str(&tagger.finish());
        assert_eq!(text, "<thinking>let me think</thinking>Answer");
    }

    #[test]
    fn test_tag_reasoning_without_reasoning() {
        assert_eq!(tag_reasoning(None, Some("plain")), "plain");
        assert_eq!(tag_reasoning(Some("r"), None), "<thinking>r</thinking>");
    }
}
