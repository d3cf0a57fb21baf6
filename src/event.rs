use crate::config::Direction;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// The record emitted when a track's observation window ends and
/// qualifies for reporting. `capture` holds base64-encoded images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEvent {
    pub timestamp: String,
    pub camera: Direction,
    pub name: String,
    pub capture: Vec<String>,
}

impl ExportEvent {
    pub fn new(camera: Direction, name: String, images: Vec<Vec<u8>>) -> Self {
        ExportEvent {
            timestamp: chrono::Local::now().format("%Y.%m.%d_%H.%M.%S").to_string(),
            camera,
            name,
            capture: images.iter().map(|img| BASE64.encode(img)).collect(),
        }
    }
}

/// Periodic device health report, fire-and-forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub temperature: u32,
    pub timestamp: i64,
    pub status: u8,
}

impl DeviceStatus {
    pub fn now(temperature: u32) -> Self {
        DeviceStatus {
            temperature,
            timestamp: chrono::Utc::now().timestamp(),
            status: 1,
        }
    }
}

/// Monotonic counter for naming unresolved identities, persisted across
/// restarts as a single-integer text file. Wraps at `ceiling`.
#[derive(Debug)]
pub struct UnknownCounter {
    path: PathBuf,
    ceiling: u64,
    value: u64,
}

impl UnknownCounter {
    pub fn open(path: PathBuf, ceiling: u64) -> Self {
        let value = fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        UnknownCounter {
            path,
            ceiling: ceiling.max(1),
            value: value % ceiling.max(1),
        }
    }

    /// Current value, then advance and persist. A write failure keeps
    /// the in-memory counter going and is only logged.
    pub fn next(&mut self) -> u64 {
        let current = self.value;
        self.value = (self.value + 1) % self.ceiling;
        if let Err(e) = fs::write(&self.path, format!("{}\n", self.value)) {
            warn!("could not persist unknown counter to {:?}: {}", self.path, e);
        }
        current
    }
}
