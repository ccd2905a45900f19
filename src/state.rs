//! Shared vehicle state.
//!
//! Every record has its own lock. Writers replace a record wholesale and
//! readers clone it out, so no reader sees a partial write. Locks are never
//! nested and never held across an `.await`. A combined snapshot built from
//! several records is therefore consistent per record only; a GPS fix from
//! time T may be merged with an orientation sample from T + epsilon.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::clients::survive::SurvivePose;
use crate::error::{GatewayError, Result};
use crate::filters::{OdometryState, Orientation, PoseEstimate};
use crate::peripherals::{CameraStatus, LteStatus, NetworkStatus, WifiStatus};
use crate::types::{CalibrationData, GpsFix, OrientationOffsets, RawTelemetry, Stats};

/// One independently locked value
#[derive(Debug, Default)]
pub struct Record<T> {
    inner: RwLock<T>,
}

impl<T: Clone> Record<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Copy out under the read lock
    pub fn get(&self) -> T {
        // A panicking writer can only have left a whole previous value behind
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace wholesale under the write lock
    pub fn set(&self, value: T) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Read-modify-write under a single write lock; `f` must not block.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Last motion command from a client, in physical units
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandedMotion {
    pub linear: f64,
    pub angular: f64,
}

/// Process-wide telemetry records, shared by handle.
#[derive(Debug, Default)]
pub struct SharedState {
    pub telemetry: Record<Option<RawTelemetry>>,
    pub gps: Record<Option<GpsFix>>,
    pub calibration: Record<Option<CalibrationData>>,
    offsets: Record<OrientationOffsets>,
    /// Raw filter output, before offsets
    pub orientation: Record<Orientation>,
    pub odometry: Record<OdometryState>,
    pub pose: Record<PoseEstimate>,
    pub stats: Record<Stats>,
    pub commanded: Record<CommandedMotion>,
    pub wifi: Record<WifiStatus>,
    pub lte: Record<LteStatus>,
    pub camera: Record<CameraStatus>,
    pub network: Record<NetworkStatus>,
    pub survive_pose: Record<Option<SurvivePose>>,
}

pub type SharedStateHandle = Arc<SharedState>;

impl SharedState {
    pub fn new(offsets: OrientationOffsets) -> Self {
        Self {
            offsets: Record::new(offsets),
            ..Default::default()
        }
    }

    pub fn orientation_offsets(&self) -> OrientationOffsets {
        self.offsets.get()
    }

    /// Validate then replace; an invalid update keeps the stored offsets.
    pub fn set_orientation_offsets(&self, offsets: OrientationOffsets) -> Result<()> {
        offsets.validate()?;
        self.offsets.set(offsets);
        Ok(())
    }

    pub fn latest_telemetry(&self) -> Result<RawTelemetry> {
        self.telemetry
            .get()
            .ok_or_else(|| GatewayError::Unavailable("no telemetry data available".to_string()))
    }

    pub fn has_telemetry(&self) -> bool {
        self.telemetry.get().is_some()
    }
}
