//! TaskExecutor: public entry point that turns a user request into a
//! prepared conversation and runs it, blocking or streaming.
//!
//! Responsibilities:
//! - Resolve the model and cache one engine per model name
//! - Gate multimodal attachments on model capabilities
//! - Build the initial history: system prompt, context files, tool catalog,
//!   enhancer messages, user message
//! - Wire confirmation, retry, and error-check hooks into the invoker
//! - Render every failure as a returned `Message`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::inference::capabilities::Capability;
use crate::inference::config::{load_or_default, AppConfig, ModelConfig};
use crate::inference::engine::{create_engine, InferenceEngine};
use crate::inference::errors::InferenceError;
use crate::inference::prompt::tool_catalog_prompt;
use crate::inference::types::{Content, ContentPart, MediaKind, Message};
use crate::tool_provider::ToolProvider;

use super::conversation::Conversation;
use super::errors::AgentError;
use super::tool_router::{RetryPolicy, ToolInvoker};
use super::types::{Attachments, ConfirmFn, TaskRequest};

/// Builds the engine for a model on first use.
pub type EngineFactory =
    Arc<dyn Fn(ModelConfig) -> Result<Arc<dyn InferenceEngine>, InferenceError> + Send + Sync>;

/// Chunks buffered between a streaming conversation and its consumer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

// ─── TaskExecutor ───────────────────────────────────────────────────────────

pub struct TaskExecutor {
    config: AppConfig,
    tools: Arc<dyn ToolProvider>,
    /// One engine per model name. The first engine stored for a name wins.
    engines: Mutex<HashMap<String, Arc<dyn InferenceEngine>>>,
    factory: EngineFactory,
    confirm: ConfirmFn,
    working_dir: PathBuf,
}

impl TaskExecutor {
    pub fn new(config: AppConfig, tools: Arc<dyn ToolProvider>) -> Self {
        Self {
            config,
            tools,
            engines: Mutex::new(HashMap::new()),
            factory: Arc::new(create_engine),
            confirm: Arc::new(stdin_confirm),
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Load the config file from `config_dir` (defaults when absent).
    pub fn from_config_dir(
        config_dir: &Path,
        tools: Arc<dyn ToolProvider>,
    ) -> Result<Self, AgentError> {
        Ok(Self::new(load_or_default(config_dir)?, tools))
    }

    pub fn with_engine_factory(mut self, factory: EngineFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Replace the terminal y/n prompt used when a request asks for
    /// confirmation.
    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = confirm;
        self
    }

    /// Directory holding context files and relative attachments.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Engine for `model` (or the default model), built on first use.
    pub fn engine(&self, model: Option<&str>) -> Result<Arc<dyn InferenceEngine>, AgentError> {
        let config = self.config.resolve_model(model)?;

        if let Some(engine) = self.lock_engines().get(&config.name) {
            return Ok(Arc::clone(engine));
        }

        // Built outside the lock; a concurrent builder may get there first.
        let engine = (self.factory)(config.clone()).map_err(|e| AgentError::EngineUnavailable {
            model: config.name.clone(),
            reason: e.to_string(),
        })?;
        let mut engines = self.lock_engines();
        Ok(Arc::clone(engines.entry(config.name.clone()).or_insert(engine)))
    }

    fn lock_engines(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn InferenceEngine>>> {
        self.engines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Entry Points ───────────────────────────────────────────────────

    /// Run a task to completion. Never fails: problems come back as an
    /// error-flagged assistant message.
    pub async fn process(&self, request: TaskRequest) -> Message {
        match self.prepare(&request).await {
            Ok(mut conversation) => conversation.run().await,
            Err(e) => {
                tracing::warn!(error = %e, "task could not start");
                e.into_message()
            }
        }
    }

    /// Run a task on a spawned task, yielding answer chunks as they are
    /// produced. Dropping the stream ends the conversation at its next send.
    pub fn stream(self: &Arc<Self>, request: TaskRequest) -> ReceiverStream<Message> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let executor = Arc::clone(self);

        tokio::spawn(async move {
            match executor.prepare(&request).await {
                Ok(mut conversation) => conversation.run_streaming(tx).await,
                Err(e) => {
                    tracing::warn!(error = %e, "task could not start");
                    let _ = tx.send(e.into_message()).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    // ─── Preparation ────────────────────────────────────────────────────

    async fn prepare(&self, request: &TaskRequest) -> Result<Conversation, AgentError> {
        let engine = self.engine(request.model.as_deref())?;
        check_capabilities(engine.as_ref(), &request.attachments)?;

        tracing::info!(
            model = %engine.model_name(),
            input_len = request.input.len(),
            confirm = request.confirm,
            attachments = !request.attachments.is_empty(),
            "=== TASK START ==="
        );

        let mut tools = match self.tools.list_tools(None).await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list tools, continuing without tools");
                Vec::new()
            }
        };
        if let Some(filter) = &request.hooks.tool_filter {
            let before = tools.len();
            tools = filter.filter(&request.input, tools).await;
            tracing::debug!(before, after = tools.len(), "tool filter applied");
        }

        let mut messages = vec![Message::system(
            request
                .hooks
                .system_message
                .clone()
                .unwrap_or_else(|| engine.system_prompt()),
        )];

        if let Some(context) = self.load_context().await {
            messages.push(Message::system(format!("Context information:\n{context}")));
        }

        if !tools.is_empty() && !engine.supports_capability(Capability::ToolCalling) {
            messages.push(Message::system(tool_catalog_prompt(&tools)));
        }

        if let Some(enhancer) = &request.hooks.prompt_enhancer {
            messages.extend(enhancer.enhance(&request.input).await);
        }

        messages.push(self.user_message(engine.as_ref(), request).await);

        let mut invoker = ToolInvoker::new(Arc::clone(&self.tools))
            .with_retry(RetryPolicy::from(&self.config.retry));
        if request.confirm {
            invoker = invoker.with_confirmation(Arc::clone(&self.confirm));
        }
        if let Some(check) = &request.hooks.tool_error_check {
            invoker = invoker.with_error_check(Arc::clone(check));
        }

        Ok(Conversation::new(engine, messages, tools, invoker)
            .with_options(request.options.clone())
            .with_max_iterations(request.max_iterations.unwrap_or(self.config.max_iterations))
            .with_streaming(self.config.streaming.clone()))
    }

    /// Contents of the configured context files found in the working
    /// directory, joined.
    async fn load_context(&self) -> Option<String> {
        let mut sections = Vec::new();
        for name in &self.config.context_files {
            let path = self.working_dir.join(name);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) if !content.trim().is_empty() => {
                    tracing::debug!(path = %path.display(), "loaded context file");
                    sections.push(content);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read context file");
                }
            }
        }
        (!sections.is_empty()).then(|| sections.join("\n\n"))
    }

    /// Unreadable attachments are logged and left out.
    async fn user_message(&self, engine: &dyn InferenceEngine, request: &TaskRequest) -> Message {
        let attachments = &request.attachments;
        let mut text = request.input.clone();

        let mut parts = Vec::new();
        for (paths, kind) in [
            (&attachments.images, MediaKind::Image),
            (&attachments.audio, MediaKind::Audio),
            (&attachments.video, MediaKind::Video),
        ] {
            for path in paths {
                match self.media_part(kind, path).await {
                    Ok(part) => parts.push(part),
                    Err(e) => tracing::warn!(error = %e, "skipping attachment"),
                }
            }
        }

        let mut uploaded = Vec::new();
        let mut embedded = Vec::new();
        for path in &attachments.files {
            if engine.supports_capability(Capability::FileUpload) {
                match engine.upload_file(&self.resolve(path)).await {
                    Ok(Some(id)) => {
                        uploaded.push(id);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "file upload failed, embedding instead");
                    }
                }
            }
            embedded.push(path);
        }

        let mut sections = Vec::new();
        for path in embedded {
            match read_attachment(&self.resolve(path)).await {
                Ok(content) => sections.push(format!(
                    "\n\nFile: {}\nContent:\n```\n{}\n```",
                    path.display(),
                    String::from_utf8_lossy(&content)
                )),
                Err(e) => tracing::warn!(error = %e, "skipping attachment"),
            }
        }
        if !sections.is_empty() {
            text.push_str("\n\nThe following files have been provided for context:");
            text.extend(sections);
        }
        if !uploaded.is_empty() {
            text.push_str(&format!(
                "\n\nUploaded files for reference: {}",
                uploaded.join(", ")
            ));
        }

        if parts.is_empty() {
            return Message::user(text);
        }
        parts.insert(0, ContentPart::Text { text });
        Message::user(Content::Parts(parts))
    }

    async fn media_part(&self, kind: MediaKind, path: &Path) -> Result<ContentPart, AgentError> {
        let bytes = read_attachment(&self.resolve(path)).await?;
        Ok(ContentPart::Media {
            kind,
            mime: media_mime(kind, path),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            source: path.display().to_string(),
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn check_capabilities(
    engine: &dyn InferenceEngine,
    attachments: &Attachments,
) -> Result<(), AgentError> {
    for (paths, capability, kind) in [
        (&attachments.images, Capability::ImageIn, MediaKind::Image),
        (&attachments.audio, Capability::AudioIn, MediaKind::Audio),
        (&attachments.video, Capability::VideoIn, MediaKind::Video),
    ] {
        if !paths.is_empty() && !engine.supports_capability(capability) {
            return Err(AgentError::UnsupportedInput {
                model: engine.model_name().to_string(),
                kind: kind.to_string(),
            });
        }
    }
    Ok(())
}

async fn read_attachment(path: &Path) -> Result<Vec<u8>, AgentError> {
    tokio::fs::read(path).await.map_err(|e| AgentError::Attachment {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn media_mime(kind: MediaKind, path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match (kind, ext.as_str()) {
        (_, "") => "application/octet-stream".to_string(),
        (MediaKind::Image, "jpg" | "jpeg") => "image/jpeg".to_string(),
        (MediaKind::Image, "svg") => "image/svg+xml".to_string(),
        (MediaKind::Audio, "mp3") => "audio/mpeg".to_string(),
        (MediaKind::Audio, "m4a") => "audio/mp4".to_string(),
        (MediaKind::Video, "mov") => "video/quicktime".to_string(),
        (kind, ext) => format!("{kind}/{ext}"),
    }
}

/// Default confirmation: ask on the terminal, anything but yes declines.
fn stdin_confirm(description: &str) -> bool {
    use std::io::{BufRead, Write};

    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{description}\nProceed? [y/N] ");
    let _ = stdout.flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

// ─── Tests ──────────────────────────────────────────────────────────────────
