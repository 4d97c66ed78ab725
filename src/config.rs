use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::MotionConfig;
use crate::upload::UploadConfig;
use crate::wire::DEFAULT_PACKET_CAPACITY;

const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 9000;
const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
const DEFAULT_LABELS: &[&str] = &["person", "dog", "cat"];
const DEFAULT_OVERRIDE_INTERVAL_MS: i64 = 3000;
const DEFAULT_DIFF_THRESHOLD: u8 = 40;
const DEFAULT_BLUR_SIGMA: f32 = 1.1;
const DEFAULT_MODEL_KEY: &str = "model/model.tflite";
const DEFAULT_LABELMAP_KEY: &str = "model/labelmap.txt";
const DEFAULT_RETRY_DELAY_MS: u64 = 3000;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_UPLOAD_SCALE: f32 = 0.5;
const DEFAULT_SETTINGS_POLL_SECS: u64 = 5;

/// Smallest packet that still fits a POST header with room for payload.
const MIN_PACKET_CAPACITY: usize = 256;

#[derive(Debug, Deserialize, Default)]
struct AgentConfigFile {
    server: Option<ServerConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    assets: Option<AssetsConfigFile>,
    wire: Option<WireConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    score_threshold: Option<f32>,
    labels: Option<Vec<String>>,
    override_interval_ms: Option<i64>,
    diff_threshold: Option<u8>,
    blur_sigma: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AssetsConfigFile {
    model_key: Option<String>,
    labelmap_key: Option<String>,
    retry_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct WireConfigFile {
    packet_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    jpeg_quality: Option<u8>,
    scale: Option<f32>,
    settings_poll_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server: ServerSettings,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub assets: AssetSettings,
    pub packet_capacity: usize,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub score_threshold: f32,
    pub labels: Vec<String>,
    pub override_interval_ms: i64,
    pub diff_threshold: u8,
    pub blur_sigma: f32,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    pub model_key: String,
    pub labelmap_key: String,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub jpeg_quality: u8,
    /// Downscale factor applied to frames before upload.
    pub scale: f32,
    pub settings_poll: Duration,
}

impl AgentConfig {
    /// Load from the file named by `WATCHER_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, with an explicit config file taking precedence over
    /// `WATCHER_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => match std::env::var("WATCHER_CONFIG") {
                Ok(path) if !path.trim().is_empty() => read_config_file(Path::new(&path))?,
                _ => AgentConfigFile::default(),
            },
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply command-line server and source overrides, then validate again.
    pub fn override_with(
        &mut self,
        host: Option<&str>,
        port: Option<u16>,
        source: Option<&str>,
    ) -> Result<()> {
        if let Some(host) = host {
            self.server.host = host.to_string();
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(source) = source {
            self.source.uri = source.to_string();
        }
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source URI must not be empty"));
        }
        self.validate()
    }

    fn from_file(file: AgentConfigFile) -> Self {
        let server = file.server.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let assets = file.assets.unwrap_or_default();
        let wire = file.wire.unwrap_or_default();
        let upload = file.upload.unwrap_or_default();
        Self {
            server: ServerSettings {
                host: server
                    .host
                    .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
                port: server.port.unwrap_or(DEFAULT_SERVER_PORT),
            },
            source: SourceSettings {
                uri: source.uri.unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            },
            detector: DetectorSettings {
                score_threshold: detector
                    .score_threshold
                    .unwrap_or(DEFAULT_SCORE_THRESHOLD),
                labels: detector.labels.unwrap_or_else(|| {
                    DEFAULT_LABELS.iter().map(|label| label.to_string()).collect()
                }),
                override_interval_ms: detector
                    .override_interval_ms
                    .unwrap_or(DEFAULT_OVERRIDE_INTERVAL_MS),
                diff_threshold: detector.diff_threshold.unwrap_or(DEFAULT_DIFF_THRESHOLD),
                blur_sigma: detector.blur_sigma.unwrap_or(DEFAULT_BLUR_SIGMA),
            },
            assets: AssetSettings {
                model_key: assets
                    .model_key
                    .unwrap_or_else(|| DEFAULT_MODEL_KEY.to_string()),
                labelmap_key: assets
                    .labelmap_key
                    .unwrap_or_else(|| DEFAULT_LABELMAP_KEY.to_string()),
                retry_delay: Duration::from_millis(
                    assets.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
                ),
            },
            packet_capacity: wire.packet_capacity.unwrap_or(DEFAULT_PACKET_CAPACITY),
            upload: UploadSettings {
                jpeg_quality: upload.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
                scale: upload.scale.unwrap_or(DEFAULT_UPLOAD_SCALE),
                settings_poll: Duration::from_secs(
                    upload
                        .settings_poll_secs
                        .unwrap_or(DEFAULT_SETTINGS_POLL_SECS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("WATCHER_SERVER_HOST") {
            if !host.trim().is_empty() {
                self.server.host = host;
            }
        }
        if let Ok(port) = std::env::var("WATCHER_SERVER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow!("WATCHER_SERVER_PORT must be a port number"))?;
        }
        if let Ok(uri) = std::env::var("WATCHER_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(threshold) = std::env::var("WATCHER_SCORE_THRESHOLD") {
            self.detector.score_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("WATCHER_SCORE_THRESHOLD must be a number"))?;
        }
        if let Ok(labels) = std::env::var("WATCHER_LABELS") {
            self.detector.labels = split_csv(&labels);
        }
        if let Ok(capacity) = std::env::var("WATCHER_PACKET_CAPACITY") {
            self.packet_capacity = capacity
                .trim()
                .parse()
                .map_err(|_| anyhow!("WATCHER_PACKET_CAPACITY must be a byte count"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.server.host = self.server.host.trim().to_string();
        if self.server.host.is_empty() {
            return Err(anyhow!("server host must not be empty"));
        }
        if self.server.port == 0 {
            return Err(anyhow!("server port must be non-zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(anyhow!(
                "score threshold {} is outside [0, 1]",
                self.detector.score_threshold
            ));
        }
        if self.detector.override_interval_ms <= 0 {
            return Err(anyhow!("override interval must be greater than zero"));
        }
        if self.packet_capacity < MIN_PACKET_CAPACITY {
            return Err(anyhow!(
                "packet capacity {} is below the minimum of {} bytes",
                self.packet_capacity,
                MIN_PACKET_CAPACITY
            ));
        }
        if self.assets.retry_delay.is_zero() {
            return Err(anyhow!("asset retry delay must be greater than zero"));
        }
        if !(self.upload.scale > 0.0 && self.upload.scale <= 1.0) {
            return Err(anyhow!("upload scale {} is outside (0, 1]", self.upload.scale));
        }
        if !(1..=100).contains(&self.upload.jpeg_quality) {
            return Err(anyhow!("JPEG quality must be within 1..=100"));
        }
        Ok(())
    }

    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            override_interval_ms: self.detector.override_interval_ms,
            diff_threshold: self.detector.diff_threshold,
            blur_sigma: self.detector.blur_sigma,
            score_threshold: self.detector.score_threshold,
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            jpeg_quality: self.upload.jpeg_quality,
            packet_capacity: self.packet_capacity,
            settings_poll: self.upload.settings_poll,
        }
    }
}

fn read_config_file(path: &Path) -> Result<AgentConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
