use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::encoder::{default_codec_profiles, CodecProfile};
use crate::risk::RiskThresholds;

/// Environment prefix for overrides, e.g. `CRICKLENS_MODEL__MODEL_NAME`.
pub const ENV_PREFIX: &str = "CRICKLENS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrickLensConfig {
    pub pipeline: PipelineConfig,
    pub pose: PoseConfig,
    pub risk: RiskThresholds,
    pub encoder: EncoderConfig,
    pub model: ModelConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of frames analysed per video
    pub max_frames: usize,
    /// Directory receiving annotated videos and processed images
    pub output_dir: PathBuf,
    /// Log progress every N frames
    pub progress_log_interval: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Base URL of the pose-estimation service
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    /// JPEG quality used when uploading frames
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Output frame rate floor
    pub min_fps: f64,
    /// Codec fallback chain, tried in order
    pub profiles: Vec<CodecProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL for an OpenAI-compatible chat completions API
    pub base_url: String,
    /// API key; falls back to GROQ_API_KEY or OPENAI_API_KEY when empty
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Request timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// System prompt injected when a conversation has none
    pub system_prompt: String,
    /// Model calls allowed per user turn
    pub max_turns: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_frames: 100,
            output_dir: PathBuf::from("static/outputs"),
            progress_log_interval: 10,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8500".to_string(),
            timeout_seconds: 30,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            jpeg_quality: 85,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            min_fps: 10.0,
            profiles: default_codec_profiles(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: String::new(),
            model_name: "llama3-8b-8192".to_string(),
            temperature: Some(0.2),
            top_p: None,
            max_tokens: Some(1024),
            timeout_seconds: Some(60),
            additional_headers: None,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: include_str!("../prompts/system_prompt.txt").to_string(),
            max_turns: 8,
        }
    }
}

impl ModelConfig {
    /// The configured key, or the first non-empty provider variable.
    pub fn resolve_api_key(&mut self) {
        if !self.api_key.is_empty() {
            return;
        }
        for var in ["GROQ_API_KEY", "OPENAI_API_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    debug!("Using API key from {}", var);
                    self.api_key = key;
                    return;
                }
            }
        }
    }
}

impl CrickLensConfig {
    /// Loads `path`, writing defaults there first if it does not exist.
    /// `CRICKLENS_<SECTION>__<KEY>` variables override file values.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let default_config = Self::default();
            default_config.save(path).await?;
            info!("📝 Wrote default configuration to {}", path.display());
        }

        let content = fs::read_to_string(path).await?;
        let mut config = Self::from_toml_with_env(&content)?;
        config.model.resolve_api_key();
        config.validate()?;
        Ok(config)
    }

    fn from_toml_with_env(content: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow!("Failed to assemble configuration: {}", e))?;

        settings
            .try_deserialize()
            .map_err(|e| anyhow!("Invalid configuration: {}", e))
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_frames == 0 {
            return Err(anyhow!("pipeline.max_frames must be at least 1"));
        }
        if self.encoder.profiles.is_empty() {
            return Err(anyhow!("encoder.profiles must name at least one codec"));
        }
        if !(self.encoder.min_fps.is_finite() && self.encoder.min_fps > 0.0) {
            return Err(anyhow!("encoder.min_fps must be positive"));
        }
        if self.orchestrator.max_turns == 0 {
            return Err(anyhow!("orchestrator.max_turns must be at least 1"));
        }
        Ok(())
    }
}
