use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::annotate::{Annotator, OverlayAnnotator};
use crate::detect::{BackendRegistry, SharedDetector, StubBackend};
use crate::job::JobSettings;
use crate::video::VideoBackend;

const DEFAULT_API_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;
const DEFAULT_WORK_DIR: &str = ".";
const DEFAULT_EXTENSION: &str = ".mp4";
const DEFAULT_POLL_ATTEMPTS: u32 = 10;
const DEFAULT_POLL_DELAY_MS: u64 = 200;
const DEFAULT_VIDEO_BACKEND: &str = if cfg!(feature = "video-ffmpeg") {
    "ffmpeg"
} else {
    "synthetic"
};
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    work_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    jobs: Option<JobsConfigFile>,
    video: Option<VideoConfigFile>,
    detector: Option<DetectorConfigFile>,
    annotation: Option<AnnotationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    static_dir: Option<PathBuf>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct JobsConfigFile {
    default_extension: Option<String>,
    poll_attempts: Option<u32>,
    poll_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    backend: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotationConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub static_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub work_dir: PathBuf,
    pub jobs: JobsSettings,
    pub video_backend: String,
    pub detector: DetectorSettings,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub default_extension: String,
    pub poll_attempts: u32,
    pub poll_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

impl ServiceConfig {
    /// Defaults, then the file named by `ZONED_CONFIG`, then `ZONED_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ZONED_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let jobs = file.jobs.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            static_dir: api.static_dir,
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            work_dir: file
                .work_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            jobs: JobsSettings {
                default_extension: jobs
                    .default_extension
                    .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
                poll_attempts: jobs.poll_attempts.unwrap_or(DEFAULT_POLL_ATTEMPTS),
                poll_delay: Duration::from_millis(
                    jobs.poll_delay_ms.unwrap_or(DEFAULT_POLL_DELAY_MS),
                ),
            },
            video_backend: file
                .video
                .and_then(|video| video.backend)
                .unwrap_or_else(|| DEFAULT_VIDEO_BACKEND.to_string()),
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            font_path: file.annotation.and_then(|annotation| annotation.font_path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("ZONED_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = non_empty_env("ZONED_STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(limit) = non_empty_env("ZONED_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit
                .parse()
                .map_err(|_| anyhow!("ZONED_MAX_UPLOAD_BYTES must be an integer byte count"))?;
        }
        if let Some(dir) = non_empty_env("ZONED_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(attempts) = non_empty_env("ZONED_POLL_ATTEMPTS") {
            self.jobs.poll_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("ZONED_POLL_ATTEMPTS must be an integer"))?;
        }
        if let Some(backend) = non_empty_env("ZONED_VIDEO_BACKEND") {
            self.video_backend = backend;
        }
        if let Some(backend) = non_empty_env("ZONED_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("ZONED_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("ZONED_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.jobs.poll_attempts == 0 {
            return Err(anyhow!("jobs.poll_attempts must be at least 1"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("api.max_upload_bytes must be greater than zero"));
        }
        if !self.jobs.default_extension.starts_with('.') || self.jobs.default_extension.len() < 2 {
            return Err(anyhow!(
                "jobs.default_extension must look like '.mp4', got '{}'",
                self.jobs.default_extension
            ));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract detector requires detector.model_path"));
        }
        Ok(())
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            work_dir: self.work_dir.clone(),
            default_extension: self.jobs.default_extension.clone(),
            poll_attempts: self.jobs.poll_attempts,
            poll_delay: self.jobs.poll_delay,
        }
    }

    pub fn video(&self) -> Result<Arc<dyn VideoBackend>> {
        crate::video::backend_by_name(&self.video_backend)
    }

    /// Register the available detector backends and activate the configured one.
    pub fn detector(&self) -> Result<SharedDetector> {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());

        // The model is only loaded when tract is the selected backend.
        #[cfg(feature = "backend-tract")]
        {
            if self.detector.backend == "tract" {
                if let Some(model_path) = &self.detector.model_path {
                    registry.register(crate::detect::TractBackend::new(
                        model_path,
                        self.detector.input_size,
                    )?);
                }
            }
        }

        registry.activate(&self.detector.backend)
    }

    pub fn annotator(&self) -> Result<Arc<dyn Annotator>> {
        let annotator = OverlayAnnotator::default();
        let annotator = match &self.font_path {
            Some(path) => annotator
                .with_font_file(path)
                .with_context(|| format!("failed to load annotation font {}", path.display()))?,
            None => {
                log::info!("no annotation font configured; labels and counts will not be drawn");
                annotator
            }
        };
        Ok(Arc::new(annotator))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
