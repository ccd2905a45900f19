//! Persisted configuration: one pretty-printed JSON file per record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::clients::ntrip::NtripConfig;
use crate::clients::survive::SurviveConfig;
use crate::error::{GatewayError, Result};
use crate::types::OrientationOffsets;

pub const ORIENTATION_OFFSETS_FILE: &str = "orientation_offsets.json";
pub const RTK_CONFIG_FILE: &str = "rtk_config.json";
pub const SURVIVE_CONFIG_FILE: &str = "survive_config.json";

/// Robot geometry
pub const WHEEL_RADIUS_M: f64 = 0.065;
pub const WHEELBASE_M: f64 = 0.4;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load_orientation_offsets(&self) -> OrientationOffsets {
        let offsets: OrientationOffsets = self.load_or_default(ORIENTATION_OFFSETS_FILE);
        // A hand-edited file may carry out-of-range values
        match offsets.validate() {
            Ok(()) => offsets,
            Err(e) => {
                log::warn!("[CONFIG] Ignoring {}: {}", ORIENTATION_OFFSETS_FILE, e);
                OrientationOffsets::default()
            }
        }
    }

    pub fn save_orientation_offsets(&self, offsets: &OrientationOffsets) -> Result<()> {
        self.save(ORIENTATION_OFFSETS_FILE, offsets)
    }

    pub fn load_rtk_config(&self) -> NtripConfig {
        self.load_or_default(RTK_CONFIG_FILE)
    }

    pub fn save_rtk_config(&self, config: &NtripConfig) -> Result<()> {
        self.save(RTK_CONFIG_FILE, config)
    }

    pub fn load_survive_config(&self) -> SurviveConfig {
        self.load_or_default(SURVIVE_CONFIG_FILE)
    }

    pub fn save_survive_config(&self, config: &SurviveConfig) -> Result<()> {
        self.save(SURVIVE_CONFIG_FILE, config)
    }

    fn load_or_default<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        match self.load(name) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                log::warn!("[CONFIG] Failed to load {}, using defaults: {}", name, e);
                T::default()
            }
        }
    }

    /// `Ok(None)` when the file does not exist
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Write to a temp file in the same directory, then rename over the target.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            GatewayError::Config(format!("cannot create {}: {}", self.dir.display(), e))
        })?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        log::debug!("[CONFIG] Saved {}", path.display());
        Ok(())
    }
}
