//! ToolInvoker: executes a batch of model tool calls against the tool
//! provider.
//!
//! For each call, in request order:
//! - optional human confirmation (a decline stops the batch)
//! - dispatch with bounded, fixed-delay retry
//! - a tool message correlated by `tool_call_id`
//! - error classification (a fatal result stops the batch)

use std::sync::Arc;
use std::time::Duration;

use crate::inference::config::RetryConfig;
use crate::inference::types::{Message, ToolCallRequest, ToolOutput, ToolResult};
use crate::tool_provider::{ResultPart, ToolError, ToolProvider};

use super::types::{ConfirmFn, ToolErrorCheck};

// ─── Retry ──────────────────────────────────────────────────────────────────

/// Attempts per tool call (first try included) and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

// ─── ToolInvoker ────────────────────────────────────────────────────────────

/// What the conversation loop does after a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Every call ran; infer again.
    Continue,
    /// The batch stopped early; the message is the final answer.
    Stop(Message),
}

pub struct ToolInvoker {
    provider: Arc<dyn ToolProvider>,
    retry: RetryPolicy,
    /// Present only when the caller asked for confirmation.
    confirm: Option<ConfirmFn>,
    error_check: ToolErrorCheck,
}

impl ToolInvoker {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            confirm: None,
            error_check: Arc::new(default_error_check),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirmation(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn with_error_check(mut self, check: ToolErrorCheck) -> Self {
        self.error_check = check;
        self
    }

    /// Run `calls` in order, appending the assistant request and the tool
    /// result of each one to `messages`.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCallRequest],
        messages: &mut Vec<Message>,
    ) -> BatchOutcome {
        for call in calls {
            if !self.confirmed(call).await {
                tracing::warn!(tool = %call.qualified_name, "tool execution declined");
                return BatchOutcome::Stop(Message::assistant(format!(
                    "Stopped at tool execution: {call}"
                )));
            }

            messages.push(Message::assistant_tool_call(call.clone()));

            let parts = match self.call_with_retry(call).await {
                Ok(parts) => parts,
                Err(e) => {
                    return BatchOutcome::Stop(Message::assistant(format!(
                        "Error processing tool call: {e}"
                    )));
                }
            };

            let content = render_tool_content(&parts);
            let output = if parts.iter().any(ResultPart::is_error) {
                ToolOutput::Error(content)
            } else {
                ToolOutput::Success(content)
            };
            messages.push(
                ToolResult {
                    tool_call_id: call.id.clone(),
                    output,
                }
                .into_message(),
            );

            if let Some(explanation) = (self.error_check)(call.tool_name(), &parts) {
                tracing::warn!(tool = %call.qualified_name, "tool result classified as fatal");
                let answer = Message::assistant(explanation);
                messages.push(answer.clone());
                return BatchOutcome::Stop(answer);
            }
        }

        BatchOutcome::Continue
    }

    /// Ask the confirmation hook, off the async executor since it may block
    /// on terminal input.
    async fn confirmed(&self, call: &ToolCallRequest) -> bool {
        let Some(confirm) = &self.confirm else {
            return true;
        };
        let confirm = Arc::clone(confirm);
        let description = format!(
            "This will execute tool: {} from provider: {}",
            call.tool_name(),
            call.provider().unwrap_or("default")
        );
        tokio::task::spawn_blocking(move || confirm(&description))
            .await
            .unwrap_or(false)
    }

    /// Dispatch one call, retrying after a fixed delay. Returns the last
    /// error once every attempt has failed.
    pub async fn call_with_retry(
        &self,
        call: &ToolCallRequest,
    ) -> Result<Vec<ResultPart>, ToolError> {
        let arguments = call.arguments_value();
        let mut attempt = 1;
        loop {
            match self
                .provider
                .call(call.provider(), call.tool_name(), &arguments)
                .await
            {
                Ok(parts) => return Ok(parts),
                Err(e) if attempt < self.retry.attempts => {
                    tracing::warn!(
                        tool = %call.qualified_name,
                        attempt,
                        max_attempts = self.retry.attempts,
                        error = %e,
                        "tool call failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        tool = %call.qualified_name,
                        attempts = attempt,
                        error = %e,
                        "tool call failed, giving up"
                    );
                    return Err(e);
                }
            }
        }
    }
}

// ─── Result Handling ────────────────────────────────────────────────────────

/// Stops on the first error part.
pub fn default_error_check(tool_name: &str, parts: &[ResultPart]) -> Option<String> {
    parts.iter().find_map(ResultPart::error_message).map(|err| {
        format!(
            "Error calling tool {tool_name}: {err}, you may need to check the tool arguments and run it again."
        )
    })
}

/// Tool message content: the first text part, else the whole result as JSON.
pub fn render_tool_content(parts: &[ResultPart]) -> String {
    parts
        .iter()
        .find_map(ResultPart::as_text)
        .map(str::to_string)
        .unwrap_or_else(|| serde_json::to_string(parts).unwrap_or_default())
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::Role;
    use crate::tool_provider::{LocalToolServer, ToolDescriptor, ToolRegistry};
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_delay(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }

    /// A `time` server whose tool fails `failures` times before answering.
    fn flaky_time(failures: u32, calls: Arc<AtomicU32>) -> Arc<dyn ToolProvider> {
        let server = LocalToolServer::new("time").with_tool(
            ToolDescriptor::new("get_current_time", "Current time"),
            move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        Err(ToolError::CallFailed {
                            tool: "get_current_time".into(),
                            reason: "connection reset".into(),
                        })
                    } else {
                        Ok(vec![ResultPart::text("12:00 UTC")])
                    }
                }
            },
        );
        Arc::new(ToolRegistry::new().with_server(server))
    }

    fn time_call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "time#get_current_time", Map::new())
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let invoker = ToolInvoker::new(flaky_time(2, Arc::clone(&calls))).with_retry(no_delay(3));
        let mut messages = Vec::new();

        let outcome = invoker.execute_batch(&[time_call("c1")], &mut messages).await;

        assert_eq!(outcome, BatchOutcome::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_calls[0].id, "c1");
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[1].text(), "12:00 UTC");
    }

    #[tokio::test]
    async fn test_exhausted_retries_stop_the_batch() {
        let calls = Arc::new(AtomicU32::new(0));
        let invoker = ToolInvoker::new(flaky_time(10, Arc::clone(&calls))).with_retry(no_delay(3));
        let mut messages = Vec::new();

        let outcome = invoker
            .execute_batch(&[time_call("c1"), time_call("c2")], &mut messages)
            .await;

        let BatchOutcome::Stop(answer) = outcome else {
            panic!("expected stop");
        };
        assert!(answer.text().starts_with("Error processing tool call:"));
        assert!(answer.text().contains("connection reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_decline_runs_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let prompts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&prompts);
        let invoker = ToolInvoker::new(flaky_time(0, Arc::clone(&calls))).with_confirmation(
            Arc::new(move |description: &str| {
                seen.lock().unwrap().push(description.to_string());
                false
            }),
        );
        let mut messages = Vec::new();

        let outcome = invoker
            .execute_batch(&[time_call("c1"), time_call("c2")], &mut messages)
            .await;

        let BatchOutcome::Stop(answer) = outcome else {
            panic!("expected stop");
        };
        assert!(answer.text().starts_with("Stopped at tool execution: time#get_current_time"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(messages.is_empty());
        assert_eq!(
            prompts.lock().unwrap().as_slice(),
            ["This will execute tool: get_current_time from provider: time"]
        );
    }

    #[tokio::test]
    async fn test_error_marker_stops_with_explanation() {
        let server = LocalToolServer::new("time").with_tool(
            ToolDescriptor::new("get_current_time", ""),
            |_| async { Ok(vec![ResultPart::error("unknown timezone 'Mars'")]) },
        );
        let invoker = ToolInvoker::new(Arc::new(ToolRegistry::new().with_server(server)));
        let mut messages = Vec::new();

        let outcome = invoker.execute_batch(&[time_call("c1")], &mut messages).await;

        let expected = "Error calling tool get_current_time: unknown timezone 'Mars', \
                        you may need to check the tool arguments and run it again.";
        assert_eq!(outcome, BatchOutcome::Stop(Message::assistant(expected)));
        assert_eq!(messages.len(), 3);
        assert!(messages[1].is_error);
        assert_eq!(messages[1].text(), r#"[{"error":"unknown timezone 'Mars'"}]"#);
        assert_eq!(messages[2].text(), expected);
    }

    #[tokio::test]
    async fn test_custom_check_can_continue_past_errors() {
        let server = LocalToolServer::new("time").with_tool(
            ToolDescriptor::new("get_current_time", ""),
            |_| async { Ok(vec![ResultPart::error("try again")]) },
        );
        let invoker = ToolInvoker::new(Arc::new(ToolRegistry::new().with_server(server)))
            .with_error_check(Arc::new(|_: &str, _: &[ResultPart]| -> Option<String> { None }));
        let mut messages = Vec::new();

        let outcome = invoker.execute_batch(&[time_call("c1")], &mut messages).await;
        assert_eq!(outcome, BatchOutcome::Continue);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_render_tool_content() {
        assert_eq!(
            render_tool_content(&[
                ResultPart::Other(json!({"type": "image"})),
                ResultPart::text("first"),
                ResultPart::text("second"),
            ]),
            "first"
        );
        assert_eq!(
            render_tool_content(&[ResultPart::Other(json!({"n": 1}))]),
            r#"[{"n":1}]"#
        );
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig {
            attempts: 0,
            delay_ms: 250,
        });
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }
}
