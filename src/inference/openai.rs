//! OpenAI-compatible inference engine.
//!
//! Talks to `/chat/completions` (JSON or SSE) and `/files`. Works with the
//! hosted API and with local servers that mirror it (llama.cpp, vLLM, LM
//! Studio).

use std::path::Path;
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
use super::streaming::{decode_stream, tag_reasoning, ChunkDecoder, Framing, ReasoningTagger};
use super::tool_call_parser::{parse_lenient, ExtractMode};
use super::types::{
    Content, ContentPart, InferenceOptions, InferenceResponse, MediaKind, Message, Role,
    ToolCallRequest,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for streaming calls. Large contexts can take a long
/// time before the first token.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// `purpose` sent with file uploads.
const UPLOAD_PURPOSE: &str = "assistants";

// ─── Wire Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    /// String or array of content parts. Never `null`: several local
    /// runtimes reject null content.
    content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallOut>>,
}

#[derive(Debug, Serialize)]
struct ToolDefinition {
    r#type: &'static str,
    function: FunctionDefinition,
}

#[derive(Debug, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct ToolCallOut {
    id: String,
    r#type: &'static str,
    function: FunctionCallOut,
}

#[derive(Debug, Serialize)]
struct FunctionCallOut {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    /// Reasoning models put chain-of-thought here instead of in `content`.
    #[serde(alias = "reasoning")]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ToolCallIn>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallIn {
    id: Option<String>,
    function: FunctionCallIn,
}

#[derive(Debug, Deserialize)]
struct FunctionCallIn {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    #[serde(alias = "reasoning")]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    index: Option<u32>,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

// ─── OpenAiEngine ────────────────────────────────────────────────────────────

pub struct OpenAiEngine {
    config: ModelConfig,
    capabilities: CapabilitySet,
    /// Client for non-streaming requests (configured timeout).
    http: HttpClient,
    /// Client for streaming requests (long timeout).
    http_stream: HttpClient,
}

impl OpenAiEngine {
    pub fn new(config: ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            capabilities: config.capability_set(),
            config,
            http,
            http_stream,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.config.url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Tools are bound natively only when the model supports tool calling.
    fn binds_tools(&self, tools: &[ToolDescriptor]) -> bool {
        !tools.is_empty() && self.capabilities.supports(Capability::ToolCalling)
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &InferenceOptions,
        stream: bool,
    ) -> ChatCompletionRequest {
        let options = EffectiveOptions::merge(&self.config, options);
        let native = self.binds_tools(tools);

        let messages = if native {
            messages.iter().map(to_chat_message).collect()
        } else {
            flatten_tool_history(messages)
                .iter()
                .map(to_chat_message)
                .collect()
        };

        let tools = native.then(|| tools.iter().map(to_tool_definition).collect());

        ChatCompletionRequest {
            model: self.config.provider_model_name().to_string(),
            messages,
            tool_choice: native.then(|| "auto".to_string()),
            tools,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stream,
            extra: options.extra,
        }
    }

    async fn post(
        &self,
        client: &HttpClient,
        body: &ChatCompletionRequest,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = self.endpoint("chat/completions");

        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let mut request = self.authorize(client.post(&url)).json(body);
        if body.stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.send().await.map_err(|e| {
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
        let response = self.post(&self.http, &body).await?;
        let text = response.text().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })?;

        let parsed = parse_non_streaming_response(&text, &ToolNameMap::new(tools))?;
        tracing::info!(model = %self.config.name, kind = response_kind(&parsed), "=== LLM RESPONSE ===");
        Ok(parsed)
    }
}

#[async_trait]
impl InferenceEngine for OpenAiEngine {
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
        match self.post(&self.http_stream, &body).await {
            Ok(response) => {
                let decoder = OpenAiDecoder::new(ToolNameMap::new(tools));
                let chunks = decode_stream(Box::pin(response.bytes_stream()), Framing::Sse, decoder);
                absorb_stream_errors(chunks, self.config.name.clone())
            }
            Err(e) => {
                let diagnostic = diagnostic_response(&e, &self.config.name);
                Box::pin(stream::once(async move { diagnostic }))
            }
        }
    }

    async fn upload_file(&self, path: &Path) -> Result<Option<String>, InferenceError> {
        if !self.capabilities.supports(Capability::FileUpload) {
            return Ok(None);
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| InferenceError::FileRead {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .text("purpose", UPLOAD_PURPOSE)
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let url = self.endpoint("files");
        let response = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
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

        let file: FileObject = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("invalid file upload response: {e}"),
            })?;

        tracing::info!(path = %path.display(), file_id = %file.id, "uploaded file");
        Ok(Some(file.id))
    }
}

// ─── Request Conversion ──────────────────────────────────────────────────────

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn to_chat_message(msg: &Message) -> ChatMessage {
    let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
        msg.tool_calls
            .iter()
            .map(|call| ToolCallOut {
                id: call.id.clone(),
                r#type: "function",
                function: FunctionCallOut {
                    name: wire_tool_name(&call.qualified_name),
                    arguments: call.arguments_value().to_string(),
                },
            })
            .collect()
    });

    ChatMessage {
        role: role_name(msg.role),
        content: content_value(&msg.content),
        tool_call_id: msg.tool_call_id.clone(),
        tool_calls,
    }
}

fn content_value(content: &Content) -> Value {
    match content {
        Content::Text(text) => Value::String(text.clone()),
        Content::Parts(parts) => Value::Array(parts.iter().map(part_value).collect()),
    }
}

fn part_value(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentPart::Media {
            kind: MediaKind::Image,
            mime,
            data,
            ..
        } => serde_json::json!({
            "type": "image_url",
            "image_url": {"url": data_url(mime, data)},
        }),
        ContentPart::Media {
            kind: MediaKind::Audio,
            mime,
            data,
            ..
        } => serde_json::json!({
            "type": "input_audio",
            "input_audio": {"data": data, "format": audio_format(mime)},
        }),
        ContentPart::Media {
            kind: MediaKind::Video,
            mime,
            data,
            ..
        } => serde_json::json!({
            "type": "video_url",
            "video_url": {"url": data_url(mime, data)},
        }),
    }
}

fn data_url(mime: &str, data: &str) -> String {
    format!("data:{mime};base64,{data}")
}

fn audio_format(mime: &str) -> &str {
    match mime {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        other => other.strip_prefix("audio/").unwrap_or(other),
    }
}

fn to_tool_definition(tool: &ToolDescriptor) -> ToolDefinition {
    ToolDefinition {
        r#type: "function",
        function: FunctionDefinition {
            name: wire_tool_name(&tool.name),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

// ─── Response Parsing ────────────────────────────────────────────────────────

fn response_kind(response: &InferenceResponse) -> &'static str {
    match response {
        InferenceResponse::Structured(_) => "tool_calls",
        InferenceResponse::Freeform(_) => "text",
        InferenceResponse::Diagnostic { .. } => "diagnostic",
    }
}

/// Parse a complete `/chat/completions` body.
fn parse_non_streaming_response(
    body: &str,
    names: &ToolNameMap,
) -> Result<InferenceResponse, InferenceError> {
    let resp: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let message = choice.message;
    if let Some(calls) = message.tool_calls.filter(|c| !c.is_empty()) {
        let calls = calls
            .into_iter()
            .map(|tc| {
                let args = match tc.function.arguments {
                    Some(Value::String(raw)) => decode_arguments(&raw)?,
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                Ok(ToolCallRequest::new(
                    tc.id.unwrap_or_else(new_call_id),
                    names.resolve(&tc.function.name),
                    args,
                ))
            })
            .collect::<Result<Vec<_>, InferenceError>>()?;
        return Ok(InferenceResponse::Structured(calls));
    }

    Ok(InferenceResponse::Freeform(tag_reasoning(
        message.reasoning_content.as_deref(),
        message.content.as_deref(),
    )))
}

/// Decode a native arguments string, repairing minor damage.
fn decode_arguments(raw: &str) -> Result<Map<String, Value>, InferenceError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match parse_lenient(raw, ExtractMode::Complete) {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(InferenceError::ToolCallParseError {
            raw_response: raw.to_string(),
            reason: "arguments are not a JSON object".into(),
        }),
    }
}

fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

// ─── Stream Decoder ──────────────────────────────────────────────────────────

/// Accumulates native tool-call fragments per index across SSE deltas.
struct OpenAiDecoder {
    names: ToolNameMap,
    tagger: ReasoningTagger,
    /// `(index, id, name, arguments_buffer)` in arrival order.
    pending: Vec<(u32, Option<String>, String, String)>,
}

impl OpenAiDecoder {
    fn new(names: ToolNameMap) -> Self {
        Self {
            names,
            tagger: ReasoningTagger::default(),
            pending: Vec::new(),
        }
    }

    fn take_calls(&mut self) -> Result<Option<InferenceResponse>, InferenceError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let calls = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(_, id, name, args)| {
                Ok(ToolCallRequest::new(
                    id.unwrap_or_else(new_call_id),
                    self.names.resolve(&name),
                    decode_arguments(&args)?,
                ))
            })
            .collect::<Result<Vec<_>, InferenceError>>()?;
        Ok(Some(InferenceResponse::Structured(calls)))
    }
}

impl ChunkDecoder for OpenAiDecoder {
    fn decode(&mut self, payload: &str) -> Result<Vec<InferenceResponse>, InferenceError> {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(payload).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {payload})"),
            })?;

        if let Some(error) = chunk.error {
            return Err(InferenceError::StreamError {
                reason: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            });
        }

        let mut out = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(out);
        };

        let text = self.tagger.push(
            choice.delta.reasoning_content.as_deref(),
            choice.delta.content.as_deref(),
        );
        if !text.is_empty() {
            out.push(InferenceResponse::Freeform(text));
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let index = tc.index.unwrap_or(0);
            let (name, args) = tc
                .function
                .map(|f| (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()))
                .unwrap_or_default();

            match self.pending.iter_mut().find(|(idx, ..)| *idx == index) {
                Some((_, id, pending_name, pending_args)) => {
                    pending_name.push_str(&name);
                    pending_args.push_str(&args);
                    if tc.id.is_some() {
                        *id = tc.id;
                    }
                }
                None => self.pending.push((index, tc.id, name, args)),
            }
        }

        if choice.finish_reason.as_deref() == Some("tool_calls") {
            out.extend(self.take_calls()?);
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<InferenceResponse>, InferenceError> {
        let mut out = Vec::new();
        let tail = self.tagger.finish();
        if !tail.is_empty() {
            out.push(InferenceResponse::Freeform(tail));
        }
        out.extend(self.take_calls()?);
        Ok(out)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::config::Provider;
    use serde_json::json;

    fn engine(tool_calling: bool) -> OpenAiEngine {
        let mut config = ModelConfig::new("gpt", Provider::OpenAi, "http://localhost:8080/v1/");
        config.name_in_provider = Some("gpt-4o-mini".into());
        let mut caps = vec![Capability::Text];
        if tool_calling {
            caps.push(Capability::ToolCalling);
        }
        config.capabilities = Some(caps);
        OpenAiEngine::new(config).unwrap()
    }

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new("time#now", "Current time")]
    }

    #[test]
    fn test_request_binds_tools_with_wire_names() {
        let body = engine(true).build_request(
            &[Message::user("hi")],
            &tools(),
            &InferenceOptions::default(),
            false,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["tools"][0]["function"]["name"], "time__now");
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["max_tokens"], 4096);
    }

    #[test]
    fn test_request_without_tool_calling_flattens_history() {
        let call = ToolCallRequest::new("c1", "time#now", Map::new());
        let body = engine(false).build_request(
            &[Message::user("hi"), Message::assistant_tool_call(call)],
            &tools(),
            &InferenceOptions::default(),
            true,
        );
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("\"tool_calls\""));
        assert!(json["messages"][1].get("tool_calls").is_none());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(
            engine(true).endpoint("chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_multimodal_parts_become_data_urls() {
        let msg = Message::user(Content::Parts(vec![
            ContentPart::Text { text: "what is this?".into() },
            ContentPart::Media {
                kind: MediaKind::Image,
                mime: "image/png".into(),
                data: "cG5n".into(),
                source: "a.png".into(),
            },
            ContentPart::Media {
                kind: MediaKind::Audio,
                mime: "audio/mpeg".into(),
                data: "AAA=".into(),
                source: "a.mp3".into(),
            },
        ]));
        let json = serde_json::to_value(to_chat_message(&msg)).unwrap();
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,cG5n");
        assert_eq!(json["content"][2]["input_audio"]["format"], "mp3");
    }

    #[test]
    fn test_parse_non_streaming_with_content() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "Hello, world!"},
                       "finish_reason": "stop"}]}"#;
        let resp = parse_non_streaming_response(body, &ToolNameMap::default()).unwrap();
        assert_eq!(resp, InferenceResponse::Freeform("Hello, world!".into()));
    }

    #[test]
    fn test_parse_non_streaming_with_tool_calls() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": null,
            "tool_calls": [{"id": "call_abc", "type": "function",
                "function": {"name": "time__now", "arguments": "{\"tz\": \"UTC\"}"}}]},
            "finish_reason": "tool_calls"}]}"#;
        let resp = parse_non_streaming_response(body, &ToolNameMap::new(&tools())).unwrap();
        let InferenceResponse::Structured(calls) = resp else {
            panic!("expected structured response");
        };
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].qualified_name, "time#now");
        assert_eq!(calls[0].arguments["tz"], "UTC");
    }

    #[test]
    fn test_parse_non_streaming_reasoning_becomes_thinking() {
        let body = r#"{"choices": [{"message": {"content": "Hi!", "reasoning": "Quick one."}}]}"#;
        let resp = parse_non_streaming_response(body, &ToolNameMap::default()).unwrap();
        assert_eq!(resp.text(), "<thinking>Quick one.</thinking>Hi!");
    }

    #[test]
    fn test_parse_non_streaming_empty_choices() {
        let result = parse_non_streaming_response(r#"{"choices": []}"#, &ToolNameMap::default());
        assert!(matches!(result, Err(InferenceError::MalformedResponse { .. })));
    }

    #[test]
    fn test_decoder_accumulates_tool_call_fragments() {
        let mut decoder = OpenAiDecoder::new(ToolNameMap::new(&tools()));
        let chunks = [
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c1",
                "function": {"name": "time__", "arguments": "{\"tz\""}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0,
                "function": {"name": "now", "arguments": ": \"UTC\"}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ];
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.decode(&chunk.to_string()).unwrap());
        }
        assert_eq!(out.len(), 1);
        let InferenceResponse::Structured(calls) = &out[0] else {
            panic!("expected structured response");
        };
        assert_eq!(calls[0].qualified_name, "time#now");
        assert_eq!(calls[0].arguments["tz"], "UTC");
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_decoder_streams_text_and_reasoning() {
        let mut decoder = OpenAiDecoder::new(ToolNameMap::default());
        let mut text = String::new();
        for chunk in [
            json!({"choices": [{"delta": {"reasoning_content": "hmm"}}]}),
            json!({"choices": [{"delta": {"content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}, "finish_reason": "stop"}]}),
        ] {
            for resp in decoder.decode(&chunk.to_string()).unwrap() {
                text.push_str(resp.text());
            }
        }
        assert_eq!(text, "<thinking>hmm</thinking>Hello");
    }

    #[test]
    fn test_decoder_surfaces_error_payload() {
        let mut decoder = OpenAiDecoder::new(ToolNameMap::default());
        let err = decoder
            .decode(r#"{"error": {"message": "context length exceeded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("context length exceeded"));
    }

    #[tokio::test]
    async fn test_upload_skipped_without_capability() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "x").unwrap();
        assert_eq!(engine(true).upload_file(&path).await.unwrap(), None);
    }
}
