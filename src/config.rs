use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::frame::TELEMETRY_ROW_BYTES;
use crate::ingest::lepton::{FrameDecoder, DEFAULT_TELEMETRY_BYTES};
use crate::motion::MotionSettings;
use crate::recorder::RecorderSettings;
use crate::tracking::TrackingSettings;

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/lepton-frames";
const DEFAULT_DB_PATH: &str = "thermal_sessions.db";
const DEFAULT_RES_X: u32 = 160;
const DEFAULT_RES_Y: u32 = 120;
const DEFAULT_FRAME_RATE: u32 = 9;
const DEFAULT_MAX_RES: u32 = 400;
const DEFAULT_PREVIEW_SECS: u32 = 3;
const DEFAULT_MIN_SECS: u32 = 10;
const DEFAULT_MAX_SECS: u32 = 600;
const DEFAULT_IDENTIFY_EVERY: u32 = 1;
const DEFAULT_LABELS: [&str; 10] = [
    "bird",
    "cat",
    "false-positive",
    "hedgehog",
    "human",
    "leporidae",
    "mustelid",
    "possum",
    "rat",
    "rodent",
];

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    socket_path: Option<String>,
    db_path: Option<String>,
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    classify: Option<ClassifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    res_x: Option<u32>,
    res_y: Option<u32>,
    frame_rate: Option<u32>,
    telemetry_bytes: Option<usize>,
    max_width: Option<u32>,
    max_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    preview_secs: Option<u32>,
    min_secs: Option<u32>,
    max_secs: Option<u32>,
    delta_threshold: Option<u16>,
    trigger_pixels: Option<usize>,
    edge_pixels: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    hot_threshold: Option<u16>,
    min_mass: Option<u32>,
    max_jump: Option<f32>,
    remove_after: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifyConfigFile {
    identify_every: Option<u32>,
    uniform_prior: Option<bool>,
    per_track_detail: Option<bool>,
    labels: Option<Vec<String>>,
    warm_up: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub db_path: String,
    pub camera: CameraSettings,
    pub motion: MotionConfig,
    pub tracking: TrackingSettings,
    pub classify: ClassifySettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub res_x: u32,
    pub res_y: u32,
    pub frame_rate: u32,
    pub telemetry_bytes: usize,
    pub max_width: u32,
    pub max_height: u32,
}

/// Motion and session timing, in seconds where named so.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    pub preview_secs: u32,
    pub min_secs: u32,
    pub max_secs: u32,
    pub delta_threshold: u16,
    pub trigger_pixels: usize,
    pub edge_pixels: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifySettings {
    pub identify_every: u32,
    pub uniform_prior: bool,
    pub per_track_detail: bool,
    pub labels: Vec<String>,
    pub warm_up: bool,
}

impl DaemonConfig {
    /// Defaults, then the file named by `THERMAL_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("THERMAL_CONFIG").ok();
        match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Self::load_from(Some(Path::new(path))),
            _ => Self::load_from(None),
        }
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DaemonConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let tracking = file.tracking.unwrap_or_default();
        let classify = file.classify.unwrap_or_default();
        let motion_defaults = MotionSettings::default();
        let tracking_defaults = TrackingSettings::default();
        let edge_pixels = motion.edge_pixels.unwrap_or(motion_defaults.edge_pixels);

        Self {
            socket_path: file
                .socket_path
                .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string()),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            camera: CameraSettings {
                res_x: camera.res_x.unwrap_or(DEFAULT_RES_X),
                res_y: camera.res_y.unwrap_or(DEFAULT_RES_Y),
                frame_rate: camera.frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
                telemetry_bytes: camera.telemetry_bytes.unwrap_or(DEFAULT_TELEMETRY_BYTES),
                max_width: camera.max_width.unwrap_or(DEFAULT_MAX_RES),
                max_height: camera.max_height.unwrap_or(DEFAULT_MAX_RES),
            },
            motion: MotionConfig {
                preview_secs: motion.preview_secs.unwrap_or(DEFAULT_PREVIEW_SECS),
                min_secs: motion.min_secs.unwrap_or(DEFAULT_MIN_SECS),
                max_secs: motion.max_secs.unwrap_or(DEFAULT_MAX_SECS),
                delta_threshold: motion
                    .delta_threshold
                    .unwrap_or(motion_defaults.delta_threshold),
                trigger_pixels: motion
                    .trigger_pixels
                    .unwrap_or(motion_defaults.trigger_pixels),
                edge_pixels,
            },
            tracking: TrackingSettings {
                edge_pixels,
                hot_threshold: tracking
                    .hot_threshold
                    .unwrap_or(tracking_defaults.hot_threshold),
                min_mass: tracking.min_mass.unwrap_or(tracking_defaults.min_mass),
                max_jump: tracking.max_jump.unwrap_or(tracking_defaults.max_jump),
                remove_after: tracking
                    .remove_after
                    .unwrap_or(tracking_defaults.remove_after),
            },
            classify: ClassifySettings {
                identify_every: classify.identify_every.unwrap_or(DEFAULT_IDENTIFY_EVERY),
                uniform_prior: classify.uniform_prior.unwrap_or(false),
                per_track_detail: classify.per_track_detail.unwrap_or(false),
                labels: classify
                    .labels
                    .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()),
                warm_up: classify.warm_up.unwrap_or(true),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("THERMAL_SOCKET_PATH") {
            if !path.trim().is_empty() {
                self.socket_path = path;
            }
        }
        if let Ok(path) = std::env::var("THERMAL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(labels) = std::env::var("THERMAL_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.classify.labels = parsed;
            }
        }
        if let Some(secs) = env_secs("THERMAL_PREVIEW_SECS")? {
            self.motion.preview_secs = secs;
        }
        if let Some(secs) = env_secs("THERMAL_MIN_SECS")? {
            self.motion.min_secs = secs;
        }
        if let Some(secs) = env_secs("THERMAL_MAX_SECS")? {
            self.motion.max_secs = secs;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.res_x == 0 || camera.res_y == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if camera.frame_rate == 0 {
            return Err(anyhow!("camera frame_rate must be greater than zero"));
        }
        if camera.max_width < camera.res_x || camera.max_height < camera.res_y {
            return Err(anyhow!(
                "camera max resolution {}x{} is smaller than {}x{}",
                camera.max_width,
                camera.max_height,
                camera.res_x,
                camera.res_y
            ));
        }
        if camera.telemetry_bytes < TELEMETRY_ROW_BYTES {
            return Err(anyhow!(
                "telemetry_bytes must be at least {} (one telemetry row)",
                TELEMETRY_ROW_BYTES
            ));
        }
        let edge = self.motion.edge_pixels.saturating_mul(2);
        if edge >= camera.res_x || edge >= camera.res_y {
            return Err(anyhow!(
                "edge_pixels {} leaves no usable area in {}x{}",
                self.motion.edge_pixels,
                camera.res_x,
                camera.res_y
            ));
        }

        let recorder = self.recorder_settings();
        if recorder.max_frames <= recorder.min_frames {
            return Err(anyhow!("max_secs must be greater than min_secs"));
        }
        if recorder.max_frames <= recorder.preview_frames {
            return Err(anyhow!("max_secs must be greater than preview_secs"));
        }
        if recorder.identify_every == 0 {
            return Err(anyhow!("identify_every must be greater than zero"));
        }
        if self.classify.labels.is_empty() {
            return Err(anyhow!("at least one classifier label is required"));
        }
        Ok(())
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        let rate = self.camera.frame_rate;
        RecorderSettings {
            width: self.camera.res_x,
            height: self.camera.res_y,
            preview_frames: self.motion.preview_secs.saturating_mul(rate),
            min_frames: self.motion.min_secs.saturating_mul(rate),
            max_frames: self.motion.max_secs.saturating_mul(rate),
            identify_every: self.classify.identify_every,
            uniform_prior: self.classify.uniform_prior,
            per_track_detail: self.classify.per_track_detail,
        }
    }

    pub fn motion_settings(&self) -> MotionSettings {
        MotionSettings {
            delta_threshold: self.motion.delta_threshold,
            trigger_pixels: self.motion.trigger_pixels,
            edge_pixels: self.motion.edge_pixels,
            window_frames: self.motion.preview_secs.saturating_mul(self.camera.frame_rate) as usize,
        }
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        self.tracking.clone()
    }

    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.camera.telemetry_bytes, self.camera.res_x, self.camera.res_y)
            .with_max_resolution(self.camera.max_width, self.camera.max_height)
    }
}

fn env_secs(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            let secs = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of seconds", key))?;
            Ok(Some(secs))
        }
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
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
