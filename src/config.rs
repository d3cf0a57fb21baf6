use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Which side of the camera boundary this process watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::In => write!(f, "in"),
            Direction::Out => write!(f, "out"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub direction: Direction,
    pub server: ServerConfig,
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub capture_url: String,
    pub status_url: String,
    /// Seconds to back off after a failed delivery.
    #[serde(default = "default_send_cooldown")]
    pub send_cooldown_secs: u64,
    /// Seconds between empty-queue polls.
    #[serde(default = "default_poll")]
    pub poll_secs: u64,
    /// Max events bundled into one request body.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Shared tracker thresholds plus optional per-direction overrides,
/// mirrored from the deployment config layout.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    pub shared: TrackerSettings,
    #[serde(default)]
    pub per_direction: HashMap<Direction, TrackerTweaks>,
}

impl TrackingConfig {
    /// Resolve the effective settings for one direction.
    pub fn settings_for(&self, direction: Direction) -> TrackerSettings {
        let mut settings = self.shared.clone();
        if let Some(tweaks) = self.per_direction.get(&direction) {
            if let Some(v) = tweaks.min_appear {
                settings.min_appear = v;
            }
            if let Some(v) = tweaks.max_disappear {
                settings.max_disappear = v;
            }
            if let Some(v) = tweaks.max_ratio {
                settings.max_ratio = Some(v);
            }
            if let Some(v) = tweaks.skip_frame {
                settings.skip_frame = v;
            }
            if let Some(v) = tweaks.max_stack {
                settings.max_stack = v;
            }
            if let Some(v) = tweaks.max_send {
                settings.max_send = v;
            }
            if let Some(v) = tweaks.tolerance {
                settings.tolerance = v;
            }
        }
        settings
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSettings {
    /// Matched frames a track needs before its removal is worth reporting.
    pub min_appear: u32,
    /// Consecutive unmatched frames before a track is dropped.
    pub max_disappear: u32,
    /// Relative box-size change above which a candidate pair is rejected.
    /// `None` disables the gate.
    #[serde(default)]
    pub max_ratio: Option<f32>,
    /// A face crop is stacked every `skip_frame`-th match.
    #[serde(default = "default_skip_frame")]
    pub skip_frame: u32,
    /// Face stack cap per track.
    #[serde(default = "default_max_stack")]
    pub max_stack: usize,
    /// Max images attached to an UNKNOWN export.
    #[serde(default = "default_max_send")]
    pub max_send: usize,
    /// Confidence floor separating a resolved name from UNKNOWN.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    #[serde(default = "default_counter_file")]
    pub counter_file: PathBuf,
    #[serde(default = "default_unknown_ceiling")]
    pub unknown_ceiling: u64,
}

/// Optional per-direction threshold overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerTweaks {
    pub min_appear: Option<u32>,
    pub max_disappear: Option<u32>,
    pub max_ratio: Option<f32>,
    pub skip_frame: Option<u32>,
    pub max_stack: Option<usize>,
    pub max_send: Option<usize>,
    pub tolerance: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThermalConfig {
    /// Degrees Celsius above which the driver pauses.
    #[serde(default = "default_max_temp")]
    pub max_temp: u32,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_overheated_sleep")]
    pub overheated_sleep_secs: u64,
    #[serde(default = "default_thermal_zone")]
    pub zone_path: PathBuf,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        ThermalConfig {
            max_temp: default_max_temp(),
            check_interval_secs: default_check_interval(),
            overheated_sleep_secs: default_overheated_sleep(),
            zone_path: default_thermal_zone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Marker file touched once the pipeline has proven it is running.
    pub working_marker: Option<PathBuf>,
    /// Plain-text log of passage timestamps.
    pub time_log: Option<PathBuf>,
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }
}

fn default_queue_capacity() -> usize {
    128
}
fn default_spool_dir() -> PathBuf {
    PathBuf::from("spool")
}
fn default_send_cooldown() -> u64 {
    2
}
fn default_poll() -> u64 {
    1
}
fn default_batch_size() -> usize {
    10
}
fn default_skip_frame() -> u32 {
    3
}
fn default_max_stack() -> usize {
    5
}
fn default_max_send() -> usize {
    3
}
fn default_tolerance() -> f32 {
    0.5
}
fn default_counter_file() -> PathBuf {
    PathBuf::from("unknown_counter")
}
fn default_unknown_ceiling() -> u64 {
    10_000
}
fn default_max_temp() -> u32 {
    70
}
fn default_check_interval() -> u64 {
    30
}
fn default_overheated_sleep() -> u64 {
    5
}
fn default_thermal_zone() -> PathBuf {
    PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
}
