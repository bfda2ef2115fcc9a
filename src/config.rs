use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "nutricam.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_READ_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_MODEL_INPUT_SIZE: u32 = 224;

#[derive(Debug, Deserialize, Default)]
struct NutricamConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    read_timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_size: Option<u32>,
    labels: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct NutricamConfig {
    pub db_path: String,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub model: ModelSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device path or a `stub://` string.
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Bound on a single device read; a hung device surfaces as "no frame"
    /// after this long instead of blocking the caller.
    pub read_timeout: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    /// ONNX model path. Absent means no tract backend.
    pub path: Option<PathBuf>,
    pub input_size: u32,
    /// Label table: model output index -> food name.
    pub labels: Vec<String>,
}

impl NutricamConfig {
    /// Load configuration: JSON file named by `NUTRICAM_CONFIG` (when set),
    /// then env-var overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("NUTRICAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NutricamConfigFile) -> Self {
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_HEIGHT),
            read_timeout: Duration::from_millis(
                file.camera
                    .as_ref()
                    .and_then(|camera| camera.read_timeout_ms)
                    .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            jpeg_quality: file
                .camera
                .as_ref()
                .and_then(|camera| camera.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        let model = ModelSettings {
            path: file.model.as_ref().and_then(|model| model.path.clone()),
            input_size: file
                .model
                .as_ref()
                .and_then(|model| model.input_size)
                .unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            labels: file
                .model
                .and_then(|model| model.labels)
                .unwrap_or_default(),
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera,
            model,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("NUTRICAM_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(db_path) = std::env::var("NUTRICAM_DB_PATH") {
            if !db_path.trim().is_empty() {
                self.db_path = db_path;
            }
        }
        if let Ok(device) = std::env::var("NUTRICAM_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(timeout) = std::env::var("NUTRICAM_READ_TIMEOUT_MS") {
            let ms: u64 = timeout.parse().map_err(|_| {
                anyhow!("NUTRICAM_READ_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.camera.read_timeout = Duration::from_millis(ms);
        }
        if let Ok(quality) = std::env::var("NUTRICAM_JPEG_QUALITY") {
            let quality: u8 = quality
                .parse()
                .map_err(|_| anyhow!("NUTRICAM_JPEG_QUALITY must be an integer 1-100"))?;
            self.camera.jpeg_quality = quality;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if self.camera.read_timeout.is_zero() {
            return Err(anyhow!("camera read timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<NutricamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
