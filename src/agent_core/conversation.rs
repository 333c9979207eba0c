//! Conversation: the bounded inference → extraction → execution loop for
//! one user turn.
//!
//! The message history is owned by the conversation for its whole lifetime
//! and never shared. The loop is an explicit state machine:
//!
//! ```text
//! INFER ──► EXTRACT ──► EXECUTE ──► INFER ...
//!              │            │
//!              ▼            ▼
//!             DONE ◄──── (stop)
//! ```
//!
//! Any `INFER` reached with the iteration cap spent goes straight to `DONE`
//! with [`MAX_ITERATIONS_MESSAGE`].

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::inference::config::StreamingConfig;
use crate::inference::engine::InferenceEngine;
use crate::inference::tool_call_parser::extract;
use crate::inference::types::{InferenceOptions, InferenceResponse, Message, ToolCallRequest};
use crate::tool_provider::ToolDescriptor;

use super::streaming::{ChunkDecision, StreamAccumulator, StreamOutcome};
use super::tool_router::{BatchOutcome, ToolInvoker};
use super::types::{IterationState, MAX_ITERATIONS_MESSAGE};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

enum LoopState {
    Infer,
    /// `delivered` is set when the response already reached the stream
    /// consumer chunk by chunk.
    Extract {
        response: InferenceResponse,
        delivered: bool,
    },
    Execute(Vec<ToolCallRequest>),
    Done {
        answer: Message,
        delivered: bool,
    },
}

// ─── Conversation ───────────────────────────────────────────────────────────

pub struct Conversation {
    engine: Arc<dyn InferenceEngine>,
    messages: Vec<Message>,
    tools: Vec<ToolDescriptor>,
    options: InferenceOptions,
    iteration: IterationState,
    invoker: ToolInvoker,
    streaming: StreamingConfig,
}

impl Conversation {
    /// Start from a prepared history (system prompt, context, user message).
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        messages: Vec<Message>,
        tools: Vec<ToolDescriptor>,
        invoker: ToolInvoker,
    ) -> Self {
        Self {
            engine,
            messages,
            tools,
            options: InferenceOptions::default(),
            iteration: IterationState::new(DEFAULT_MAX_ITERATIONS),
            invoker,
            streaming: StreamingConfig::default(),
        }
    }

    pub fn with_options(mut self, options: InferenceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.iteration = IterationState::new(max);
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iteration(&self) -> IterationState {
        self.iteration
    }

    /// Run to completion and return the final answer.
    pub async fn run(&mut self) -> Message {
        self.drive(None).await
    }

    /// Run to completion, sending output to `sink` as it is produced.
    pub async fn run_streaming(&mut self, sink: mpsc::Sender<Message>) {
        self.drive(Some(&sink)).await;
    }

    async fn drive(&mut self, sink: Option<&mpsc::Sender<Message>>) -> Message {
        let model = self.engine.model_name().to_string();
        let mut state = LoopState::Infer;

        loop {
            state = match state {
                LoopState::Infer if self.iteration.exhausted() => {
                    tracing::warn!(model = %model, max = self.iteration.max, "iteration cap reached");
                    LoopState::Done {
                        answer: Message::assistant(MAX_ITERATIONS_MESSAGE).with_model(model.as_str()),
                        delivered: false,
                    }
                }

                LoopState::Infer => {
                    tracing::info!(
                        model = %model,
                        iteration = self.iteration.current + 1,
                        max = self.iteration.max,
                        messages = self.messages.len(),
                        tools = self.tools.len(),
                        streaming = sink.is_some(),
                        "inference step"
                    );
                    match sink {
                        Some(sink) => self.stream_step(sink, &model).await,
                        None => LoopState::Extract {
                            response: self
                                .engine
                                .infer(&self.messages, &self.tools, &self.options)
                                .await,
                            delivered: false,
                        },
                    }
                }

                LoopState::Extract {
                    response,
                    delivered,
                } => match extract(&response) {
                    Some(calls) => {
                        tracing::info!(
                            count = calls.len(),
                            tools = ?calls.iter().map(|c| c.qualified_name.as_str()).collect::<Vec<_>>(),
                            "tool calls requested"
                        );
                        LoopState::Execute(calls)
                    }
                    None => LoopState::Done {
                        answer: response.into_message(&model),
                        delivered,
                    },
                },

                LoopState::Execute(calls) => {
                    match self.invoker.execute_batch(&calls, &mut self.messages).await {
                        BatchOutcome::Continue => {
                            self.iteration.advance();
                            LoopState::Infer
                        }
                        BatchOutcome::Stop(answer) => LoopState::Done {
                            answer: answer.with_model(model.as_str()),
                            delivered: false,
                        },
                    }
                }

                LoopState::Done { answer, delivered } => {
                    tracing::info!(
                        model = %model,
                        iterations = self.iteration.current,
                        is_error = answer.is_error,
                        "=== TASK DONE ==="
                    );
                    if let (Some(sink), false) = (sink, delivered) {
                        let _ = sink.send(answer.clone()).await;
                    }
                    return answer;
                }
            };
        }
    }

    /// One streamed inference: forward safe chunks, hold possible tool-call
    /// text, and hand the outcome to `EXTRACT`.
    async fn stream_step(&self, sink: &mpsc::Sender<Message>, model: &str) -> LoopState {
        let mut chunks = self
            .engine
            .stream(&self.messages, &self.tools, &self.options)
            .await;
        let mut acc = StreamAccumulator::new(&self.streaming, model);

        while let Some(item) = chunks.next().await {
            let decision = match item {
                InferenceResponse::Freeform(delta) => acc.push_text(&delta),
                InferenceResponse::Structured(calls) => ChunkDecision::ToolCalls(calls),
                diagnostic @ InferenceResponse::Diagnostic { .. } => {
                    let out = acc.flush_with(diagnostic.clone().into_message(model));
                    if !forward(sink, out).await {
                        return detached();
                    }
                    return LoopState::Extract {
                        response: diagnostic,
                        delivered: true,
                    };
                }
            };

            match decision {
                ChunkDecision::Forward(out) => {
                    if !forward(sink, out).await {
                        return detached();
                    }
                }
                ChunkDecision::Hold => {}
                ChunkDecision::ToolCalls(calls) => {
                    return LoopState::Extract {
                        response: InferenceResponse::Structured(calls),
                        delivered: true,
                    };
                }
            }
        }

        match acc.finish() {
            StreamOutcome::ToolCalls(calls) => LoopState::Extract {
                response: InferenceResponse::Structured(calls),
                delivered: true,
            },
            StreamOutcome::Answer { flush, raw } => {
                if !forward(sink, flush).await {
                    return detached();
                }
                LoopState::Extract {
                    response: InferenceResponse::Freeform(raw),
                    delivered: true,
                }
            }
        }
    }
}

/// Send chunks in order, skipping empty ones. `false` once the consumer is
/// gone.
async fn forward(sink: &mpsc::Sender<Message>, chunks: Vec<Message>) -> bool {
    for chunk in chunks {
        if chunk.content.is_empty() && chunk.thinking.is_none() {
            continue;
        }
        if sink.send(chunk).await.is_err() {
            return false;
        }
    }
    true
}

fn detached() -> LoopState {
    tracing::debug!("stream consumer dropped, ending conversation");
    LoopState::Done {
        answer: Message::assistant(String::new()),
        delivered: true,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
