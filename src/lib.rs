pub mod agent_core;
pub mod inference;
pub mod tool_provider;

use std::path::{Path, PathBuf};

use anyhow::Context;

pub use agent_core::{AgentError, TaskExecutor, TaskRequest};
pub use inference::{AppConfig, InferenceEngine, Message};
pub use tool_provider::{LocalToolServer, ToolProvider, ToolRegistry};

/// Environment variable that overrides the configuration directory.
pub const CONF_DIR_ENV: &str = "AGENTLOOP_CONF_DIR";

/// Return the platform-standard data directory for agentloop.
///
/// - macOS: `~/Library/Application Support/agentloop/`
/// - Windows: `{FOLDERID_RoamingAppData}\agentloop\`
/// - Linux: `$XDG_DATA_HOME/agentloop/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.agentloop/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("agentloop");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentloop")
}

/// Directory holding `config.yaml`: `$AGENTLOOP_CONF_DIR` when set, else the
/// platform config directory.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONF_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("agentloop");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentloop")
}

/// Initialize the tracing subscriber, writing to `agentloop.log` in
/// `log_dir` (default [`data_dir`]). Returns the log file path.
///
/// On each startup:
/// 1. Rotates existing logs (agentloop.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh agentloop.log with a line-flushing writer.
/// 3. Logs a startup banner with the log file path for discoverability.
pub fn init_tracing(log_dir: Option<&Path>, json: bool) -> anyhow::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = log_dir.map(Path::to_path_buf).unwrap_or_else(data_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join("agentloop.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let writer = FlushingWriter::new(log_file);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agentloop=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        log_file = %log_path.display(),
        config_dir = %config_dir().display(),
        pid = std::process::id(),
        "=== agentloop starting ==="
    );

    Ok(log_path)
}

/// Rotate log files: `agentloop.log` → `agentloop.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// each log line is on disk even if the process dies.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
