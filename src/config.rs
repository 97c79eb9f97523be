use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{BackendRegistry, ReplayBackend, StubBackend};
use crate::generate::{OllamaConfig, DEFAULT_OLLAMA_URL};
use crate::pipeline::PipelineSettings;

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_RETRIES: u32 = 0;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_VLM_MODEL: &str = "llava:latest";
const DEFAULT_LLM_MODEL: &str = "gpt-oss:20b";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    ollama: Option<OllamaConfigFile>,
    models: Option<ModelsConfigFile>,
    perception: Option<PerceptionConfigFile>,
    detector: Option<DetectorConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct OllamaConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    vlm: Option<String>,
    llm: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PerceptionConfigFile {
    use_vlm: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    replay_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    keep_metadata: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Replay,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "replay" => Ok(DetectorKind::Replay),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}' (expected stub, replay or tract)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ollama: OllamaSettings,
    pub vlm_model: String,
    pub llm_model: String,
    pub use_vlm: bool,
    pub detector: DetectorSettings,
    pub keep_metadata: bool,
}

#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `None` until a file or `SCENE_AGENT_DETECTOR` names a backend.
    pub backend: Option<DetectorKind>,
    pub replay_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl PipelineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCENE_AGENT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let ollama_file = file.ollama.unwrap_or_default();
        let ollama = OllamaSettings {
            url: ollama_file
                .url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            timeout: Duration::from_secs(ollama_file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_retries: ollama_file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_secs(
                ollama_file
                    .retry_delay_secs
                    .unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
        };
        let models = file.models.unwrap_or_default();
        let detector_file = file.detector.unwrap_or_default();
        let backend = match detector_file.backend.as_deref() {
            Some(name) => Some(name.parse()?),
            None if detector_file.replay_path.is_some() => Some(DetectorKind::Replay),
            None => None,
        };
        Ok(Self {
            ollama,
            vlm_model: models
                .vlm
                .unwrap_or_else(|| DEFAULT_VLM_MODEL.to_string()),
            llm_model: models
                .llm
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            use_vlm: file
                .perception
                .and_then(|perception| perception.use_vlm)
                .unwrap_or(true),
            detector: DetectorSettings {
                backend,
                replay_path: detector_file.replay_path,
                model_path: detector_file.model_path,
                input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            keep_metadata: file
                .output
                .and_then(|output| output.keep_metadata)
                .unwrap_or(true),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            if !url.trim().is_empty() {
                self.ollama.url = url;
            }
        }
        if let Ok(model) = std::env::var("SCENE_AGENT_VLM_MODEL") {
            if !model.trim().is_empty() {
                self.vlm_model = model;
            }
        }
        if let Ok(model) = std::env::var("SCENE_AGENT_LLM_MODEL") {
            if !model.trim().is_empty() {
                self.llm_model = model;
            }
        }
        if let Ok(path) = std::env::var("SCENE_AGENT_REPLAY_PATH") {
            if !path.trim().is_empty() {
                self.detector.replay_path = Some(PathBuf::from(path));
                self.detector.backend = Some(DetectorKind::Replay);
            }
        }
        if let Ok(backend) = std::env::var("SCENE_AGENT_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = Some(backend.parse()?);
            }
        }
        if let Ok(retries) = std::env::var("SCENE_AGENT_MAX_RETRIES") {
            self.ollama.max_retries = retries
                .trim()
                .parse()
                .map_err(|_| anyhow!("SCENE_AGENT_MAX_RETRIES must be a non-negative integer"))?;
        }
        Ok(())
    }

    /// Checks the invariants `load` guarantees. Call again after applying CLI overrides.
    pub fn validate(&self) -> Result<()> {
        let url = self.ollama.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow!("ollama url must start with http:// or https://"));
        }
        if self.vlm_model.trim().is_empty() || self.llm_model.trim().is_empty() {
            return Err(anyhow!("model names must not be empty"));
        }
        if self.ollama.timeout.as_secs() == 0 {
            return Err(anyhow!("ollama timeout must be greater than zero"));
        }
        match self.detector.backend {
            Some(DetectorKind::Replay) if self.detector.replay_path.is_none() => {
                Err(anyhow!("replay detector requires detector.replay_path"))
            }
            Some(DetectorKind::Tract) if self.detector.model_path.is_none() => {
                Err(anyhow!("tract detector requires detector.model_path"))
            }
            Some(DetectorKind::Tract) if self.detector.input_size == 0 => {
                Err(anyhow!("detector.input_size must be greater than zero"))
            }
            _ => Ok(()),
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            url: self.ollama.url.clone(),
            timeout: self.ollama.timeout,
            max_retries: self.ollama.max_retries,
            retry_delay: self.ollama.retry_delay,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            vlm_model: self.vlm_model.clone(),
            llm_model: self.llm_model.clone(),
            use_vlm: self.use_vlm,
            keep_metadata: self.keep_metadata,
        }
    }

    /// Registry holding the configured detector as its default backend.
    ///
    /// Fails when no backend was configured: the stub answers every real image
    /// with an empty scene, so it is only used when asked for by name.
    pub fn build_detectors(&self) -> Result<BackendRegistry> {
        let backend = self.detector.backend.ok_or_else(|| {
            anyhow!(
                "no detector configured; set detector.backend (replay or tract) in \
                 SCENE_AGENT_CONFIG, or SCENE_AGENT_DETECTOR=stub to run without detections"
            )
        })?;
        let mut registry = BackendRegistry::new();
        match backend {
            DetectorKind::Stub => {
                log::warn!("stub detector selected: every image will report no objects");
                registry.register(StubBackend::new());
            }
            DetectorKind::Replay => {
                let path = self
                    .detector
                    .replay_path
                    .as_deref()
                    .ok_or_else(|| anyhow!("replay detector requires detector.replay_path"))?;
                registry.register(ReplayBackend::from_file(path)?);
            }
            DetectorKind::Tract => registry.register(self.tract_backend()?),
        }
        Ok(registry)
    }

    #[cfg(feature = "backend-tract")]
    fn tract_backend(&self) -> Result<crate::detect::TractBackend> {
        let path = self
            .detector
            .model_path
            .as_deref()
            .ok_or_else(|| anyhow!("tract detector requires detector.model_path"))?;
        crate::detect::TractBackend::new(path, self.detector.input_size)
    }

    #[cfg(not(feature = "backend-tract"))]
    fn tract_backend(&self) -> Result<StubBackend> {
        Err(anyhow!(
            "tract detector requested but scene-agent was built without the backend-tract feature"
        ))
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
