//! Per-model capability sets.
//!
//! The loop consults these before binding tools natively or embedding
//! multimodal input. A set is fixed once the model configuration is loaded.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::Provider;

/// A named ability a model backend may or may not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    #[serde(alias = "image-in", alias = "image_input")]
    ImageIn,
    #[serde(alias = "audio-in", alias = "audio_input")]
    AudioIn,
    #[serde(alias = "video-in", alias = "video_input")]
    VideoIn,
    #[serde(alias = "tool-calling", alias = "tools")]
    ToolCalling,
    #[serde(alias = "file-upload")]
    FileUpload,
    #[serde(alias = "thinking-mode", alias = "thinking")]
    ThinkingMode,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Text => "text",
            Capability::ImageIn => "image-in",
            Capability::AudioIn => "audio-in",
            Capability::VideoIn => "video-in",
            Capability::ToolCalling => "tool-calling",
            Capability::FileUpload => "file-upload",
            Capability::ThinkingMode => "thinking-mode",
        })
    }
}

/// Model-name fragments that indicate reasoning output.
const THINKING_MODELS: &[&str] = &["deepseek-r1", "qwq", "qwen3", "magistral"];

/// Model-name fragments that indicate image input.
const VISION_MODELS: &[&str] = &["llava", "vision", "-vl", "gpt-4o", "gpt-4.1", "gemma3"];

/// Immutable set of capabilities for one model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Default set when the configuration does not list capabilities.
    ///
    /// Both providers get text and native tool calling. Hosted OpenAI-style
    /// endpoints also accept file uploads. Vision and thinking are guessed
    /// from the model name.
    pub fn defaults_for(provider: Provider, model_name: &str) -> Self {
        let name = model_name.to_ascii_lowercase();
        let mut set = BTreeSet::from([Capability::Text, Capability::ToolCalling]);

        if provider == Provider::OpenAi {
            set.insert(Capability::FileUpload);
        }
        if VISION_MODELS.iter().any(|m| name.contains(m)) {
            set.insert(Capability::ImageIn);
        }
        if THINKING_MODELS.iter().any(|m| name.contains(m)) {
            set.insert(Capability::ThinkingMode);
        }

        Self(set)
    }
}
