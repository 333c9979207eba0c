//! Scripted engine and tool fixtures shared by the agent core tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::inference::capabilities::{Capability, CapabilitySet};
use crate::inference::config::{ModelConfig, Provider};
use crate::inference::engine::{InferenceEngine, ResponseStream};
use crate::inference::types::{InferenceOptions, InferenceResponse, Message};
use crate::tool_provider::{
    LocalToolServer, ResultPart, ToolDescriptor, ToolProvider, ToolRegistry,
};

/// Engine replaying canned responses. Each script entry answers one call:
/// `stream` yields its items in order, `infer` folds them into one
/// response. The last entry repeats once the others are used up.
pub(crate) struct ScriptedEngine {
    config: ModelConfig,
    capabilities: CapabilitySet,
    script: Mutex<VecDeque<Vec<InferenceResponse>>>,
    calls: AtomicU32,
    seen: Mutex<Vec<Vec<Message>>>,
    seen_tools: Mutex<Vec<Vec<ToolDescriptor>>>,
}

impl ScriptedEngine {
    pub(crate) fn new(
        name: &str,
        capabilities: impl IntoIterator<Item = Capability>,
        script: Vec<Vec<InferenceResponse>>,
    ) -> Self {
        Self {
            config: ModelConfig::new(name, Provider::Ollama, "http://127.0.0.1:9"),
            capabilities: CapabilitySet::new(capabilities),
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
            seen_tools: Mutex::new(Vec::new()),
        }
    }

    /// Text-only model that answers with `replies` in turn.
    pub(crate) fn text_model(replies: &[&str]) -> Self {
        Self::new(
            "mock",
            [Capability::Text],
            replies.iter().map(|r| vec![text(r)]).collect(),
        )
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message history sent on each call.
    pub(crate) fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn seen_tools(&self) -> Vec<Vec<ToolDescriptor>> {
        self.seen_tools.lock().unwrap().clone()
    }

    fn next(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Vec<InferenceResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
        self.seen_tools.lock().unwrap().push(tools.to_vec());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
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
        _options: &InferenceOptions,
    ) -> InferenceResponse {
        let mut text = String::new();
        for item in self.next(messages, tools) {
            match item {
                InferenceResponse::Freeform(delta) => text.push_str(&delta),
                other => return other,
            }
        }
        InferenceResponse::Freeform(text)
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        _options: &InferenceOptions,
    ) -> ResponseStream {
        stream::iter(self.next(messages, tools)).boxed()
    }
}

pub(crate) fn text(s: &str) -> InferenceResponse {
    InferenceResponse::Freeform(s.to_string())
}

/// Wire-format tool call JSON for one call without arguments.
pub(crate) fn wire_call(name: &str) -> InferenceResponse {
    text(&format!(
        r#"{{"tool_calls": [{{"name": "{name}", "args": {{}}, "id": "call-1", "type": "tool_call"}}]}}"#
    ))
}

/// A single `time` server with `get_current_time`, counting executions.
pub(crate) fn time_tools(result: Vec<ResultPart>) -> (Arc<dyn ToolProvider>, Arc<AtomicU32>) {
    let executions = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&executions);
    let server = LocalToolServer::new("time").with_tool(
        ToolDescriptor::new("get_current_time", "Current UTC time"),
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let result = result.clone();
            async move { Ok(result) }
        },
    );
    (Arc::new(ToolRegistry::new().with_server(server)), executions)
}
