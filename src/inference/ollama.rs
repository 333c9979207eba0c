//! Native Ollama inference engine (`/api/chat`).
//!
//! Ollama streams newline-delimited JSON objects, reports reasoning in a
//! separate `thinking` field, and delivers tool calls whole rather than as
//! fragments.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::tool_provider::ToolDescriptor;

use super::capabilities::{Capability, CapabilitySet};
use super::config::ModelConfig;
use super::engine::{
    absorb_stream_errors, diagnostic_response, flatten_tool_history, wire_tool_name,
    EffectiveOptions, InferenceEngine, ResponseStream, ToolNameMap,
};
use super::errors::InferenceError;
use super::streaming::{decode_stream, ChunkDecoder, Framing, ReasoningTagger};
use super::types::{
    Content, ContentPart, InferenceOptions, InferenceResponse, MediaKind, Message, Role,
    ToolCallRequest,
};

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Wire Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

// ─── OllamaEngine ────────────────────────────────────────────────────────────

pub struct OllamaEngine {
    config: ModelConfig,
    capabilities: CapabilitySet,
    http: HttpClient,
}

impl OllamaEngine {
    pub fn new(config: ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            capabilities: config.capability_set(),
            config,
            http,
        })
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
        stream: bool,
    ) -> ChatRequest {
        let effective = EffectiveOptions::merge(&self.config, options);
        let native = !tools.is_empty() && self.capabilities.supports(Capability::ToolCalling);

        let messages = if native {
            messages.iter().map(to_ollama_message).collect()
        } else {
            flatten_tool_history(messages)
                .iter()
                .map(to_ollama_message)
                .collect()
        };

        let tools = if native {
            tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": wire_tool_name(&t.name),
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut opts = Map::new();
        opts.insert("temperature".into(), effective.temperature.into());
        opts.insert("top_p".into(), effective.top_p.into());
        opts.insert("num_predict".into(), effective.max_tokens.into());
        opts.extend(effective.extra);

        ChatRequest {
            model: self.config.provider_model_name().to_string(),
            messages,
            tools,
            stream,
            options: opts,
        }
    }

    async fn post(&self, body: &ChatRequest) -> Result<reqwest::Response, InferenceError> {
        let url = format!("{}/api/chat", self.config.url.trim_end_matches('/'));

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.len(),
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let response = self.http.post(&url).json(body).send().await.map_err(|e| {
            InferenceError::from_transport(&e, &url, self.config.request_timeout_secs)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }
        Ok(response)
    }

    async fn try_infer(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
    ) -> Result<InferenceResponse, InferenceError> {
        let body = self.build_request(messages, tools, options, false);
        let text = self
            .post(&body)
            .await?
            .text()
            .await
            .map_err(|e| InferenceError::StreamError {
                reason: format!("failed to read response body: {e}"),
            })?;

        // A non-streaming reply is one NDJSON object; reuse the decoder.
        let mut decoder = OllamaDecoder::new(ToolNameMap::new(tools));
        let mut items = decoder.decode(&text)?;
        items.extend(decoder.finish()?);
        Ok(merge_items(items))
    }
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    fn model_config(&self) -> &ModelConfig {
        &self.config
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    async fn infer(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
    ) -> InferenceResponse {
        match self.try_infer(messages, tools, options).await {
            Ok(response) => response,
            Err(e) => diagnostic_response(&e, &self.config.name),
        }
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
    ) -> ResponseStream {
        let body = self.build_request(messages, tools, options, true);
        match self.post(&body).await {
            Ok(response) => {
                let decoder = OllamaDecoder::new(ToolNameMap::new(tools));
                let chunks =
                    decode_stream(Box::pin(response.bytes_stream()), Framing::Ndjson, decoder);
                absorb_stream_errors(chunks, self.config.name.clone())
            }
            Err(e) => {
                let diagnostic = diagnostic_response(&e, &self.config.name);
                Box::pin(stream::once(async move { diagnostic }))
            }
        }
    }
}

// ─── Conversion ──────────────────────────────────────────────────────────────

fn to_ollama_message(msg: &Message) -> OllamaMessage {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let (content, images) = match &msg.content {
        Content::Text(text) => (text.clone(), Vec::new()),
        Content::Parts(parts) => {
            let mut text = String::new();
            let mut images = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text: t } => text.push_str(t),
                    ContentPart::Media {
                        kind: MediaKind::Image,
                        data,
                        ..
                    } => images.push(data.clone()),
                    ContentPart::Media { kind, source, .. } => {
                        tracing::debug!(kind = %kind, source = %source, "ollama has no input for media kind, dropping");
                    }
                }
            }
            (text, images)
        }
    };

    OllamaMessage {
        role: role.to_string(),
        content,
        thinking: None,
        images,
        tool_calls: msg
            .tool_calls
            .iter()
            .map(|call| OllamaToolCall {
                function: OllamaFunction {
                    name: wire_tool_name(&call.qualified_name),
                    arguments: call.arguments_value(),
                },
            })
            .collect(),
    }
}

/// Fold decoder output for a single complete reply.
fn merge_items(items: Vec<InferenceResponse>) -> InferenceResponse {
    let mut text = String::new();
    for item in items {
        match item {
            InferenceResponse::Freeform(delta) => text.push_str(&delta),
            structured @ InferenceResponse::Structured(_) => return structured,
            diagnostic @ InferenceResponse::Diagnostic { .. } => return diagnostic,
        }
    }
    InferenceResponse::Freeform(text)
}

// ─── Stream Decoder ──────────────────────────────────────────────────────────

struct OllamaDecoder {
    names: ToolNameMap,
    tagger: ReasoningTagger,
    calls: Vec<ToolCallRequest>,
}

impl OllamaDecoder {
    fn new(names: ToolNameMap) -> Self {
        Self {
            names,
            tagger: ReasoningTagger::default(),
            calls: Vec::new(),
        }
    }

    fn drain(&mut self) -> Vec<InferenceResponse> {
        let mut out = Vec::new();
        let tail = self.tagger.finish();
        if !tail.is_empty() {
            out.push(InferenceResponse::Freeform(tail));
        }
        if !self.calls.is_empty() {
            out.push(InferenceResponse::Structured(std::mem::take(&mut self.calls)));
        }
        out
    }
}

impl ChunkDecoder for OllamaDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<InferenceResponse>, InferenceError> {
        let chunk: ChatResponse =
            serde_json::from_str(payload).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse chunk: {e} (data: {payload})"),
            })?;

        if let Some(error) = chunk.error {
            return Err(InferenceError::StreamError { reason: error });
        }

        let mut out = Vec::new();
        if let Some(message) = chunk.message {
            let text = self
                .tagger
                .push(message.thinking.as_deref(), Some(message.content.as_str()));
            if !text.is_empty() {
                out.push(InferenceResponse::Freeform(text));
            }

            for call in message.tool_calls {
                let arguments = match call.function.arguments {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        return Err(InferenceError::ToolCallParseError {
                            raw_response: other.to_string(),
                            reason: "arguments are not a JSON object".into(),
                        })
                    }
                };
                self.calls.push(ToolCallRequest::new(
                    format!("call_{}", Uuid::new_v4()),
                    self.names.resolve(&call.function.name),
                    arguments,
                ));
            }
        }

        if chunk.done {
            out.extend(self.drain());
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<InferenceResponse>, InferenceError> {
        Ok(self.drain())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::config::Provider;
    use serde_json::json;

    fn engine() -> OllamaEngine {
        let mut config = ModelConfig::new("local", Provider::Ollama, "http://localhost:11434");
        config.name_in_provider = Some("qwen3:8b".into());
        OllamaEngine::new(config).unwrap()
    }

    #[test]
    fn test_request_maps_options_and_tools() {
        let options = InferenceOptions {
            max_tokens: Some(256),
            ..Default::default()
        };
        let body = engine().build_request(
            &[Message::user("hi")],
            &[ToolDescriptor::new("time#now", "Current time")],
            &options,
            true,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "qwen3:8b");
        assert_eq!(json["options"]["num_predict"], 256);
        assert_eq!(json["tools"][0]["function"]["name"], "time__now");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_images_move_to_images_array() {
        let msg = Message::user(Content::Parts(vec![
            ContentPart::Text { text: "describe".into() },
            ContentPart::Media {
                kind: MediaKind::Image,
                mime: "image/jpeg".into(),
                data: "AAAA".into(),
                source: "cat.jpg".into(),
            },
        ]));
        let json = serde_json::to_value(to_ollama_message(&msg)).unwrap();
        assert_eq!(json["content"], "describe");
        assert_eq!(json["images"], json!(["AAAA"]));
    }

    #[test]
    fn test_decoder_streams_thinking_then_text() {
        let mut decoder = OllamaDecoder::new(ToolNameMap::default());
        let mut text = String::new();
        for line in [
            json!({"message": {"role": "assistant", "content": "", "thinking": "check"}, "done": false}),
            json!({"message": {"role": "assistant", "content": "It is noon."}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true}),
        ] {
            for item in decoder.decode(&line.to_string()).unwrap() {
                text.push_str(item.text());
            }
        }
        assert_eq!(text, "<thinking>check</thinking>It is noon.");
    }

    #[test]
    fn test_decoder_emits_tool_calls_on_done() {
        let tools = [ToolDescriptor::new("time#now", "")];
        let mut decoder = OllamaDecoder::new(ToolNameMap::new(&tools));
        let first = decoder
            .decode(
                &json!({"message": {"role": "assistant", "content": "",
                    "tool_calls": [{"function": {"name": "time__now", "arguments": {"tz": "UTC"}}}]},
                    "done": false})
                .to_string(),
            )
            .unwrap();
        assert!(first.is_empty());

        let last = decoder
            .decode(&json!({"message": {"role": "assistant", "content": ""}, "done": true}).to_string())
            .unwrap();
        let InferenceResponse::Structured(calls) = &last[0] else {
            panic!("expected structured response");
        };
        assert_eq!(calls[0].qualified_name, "time#now");
        assert_eq!(calls[0].arguments["tz"], "UTC");
        assert!(calls[0].id.starts_with("call_"));
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_decoder_error_line() {
        let mut decoder = OllamaDecoder::new(ToolNameMap::default());
        let err = decoder.decode(r#"{"error": "model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_merge_items_prefers_tool_calls() {
        let call = ToolCallRequest::new("c", "t", Map::new());
        let merged = merge_items(vec![
            InferenceResponse::Freeform("ignored".into()),
            InferenceResponse::Structured(vec![call.clone()]),
        ]);
        assert_eq!(merged, InferenceResponse::Structured(vec![call]));
        assert_eq!(
            merge_items(vec![
                InferenceResponse::Freeform("a".into()),
                InferenceResponse::Freeform("b".into())
            ]),
            InferenceResponse::Freeform("ab".into())
        );
    }
}
