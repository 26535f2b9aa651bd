//! Mount collaborator interface
//!
//! The calibration core drives whatever mount is behind this trait. The
//! actual implementation is provided by a device bridge (or the simulator);
//! the core calls these methods without knowing the transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, String>;

/// A timed guide pulse direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

impl GuideDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideDirection::North => "North",
            GuideDirection::South => "South",
            GuideDirection::East => "East",
            GuideDirection::West => "West",
        }
    }
}

/// Side of the pier the optical tube is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
    Unknown,
}

/// Guide speeds as multiples of the sidereal rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuideRates {
    pub ra_sidereal: f64,
    pub dec_sidereal: f64,
}

/// Optical train parameters needed for step sizing and travel thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticsInfo {
    pub focal_length_mm: f64,
    pub pixel_size_um: f64,
    pub binning: u32,
    /// Guide sensor height in (binned) pixels; 0 when unknown.
    pub sensor_height_px: u32,
}

/// Trait defining the mount/guider operations the calibration core needs.
///
/// `pulse` is synchronous from the state machine's point of view: the driving
/// loop waits for the next camera frame before calling back in, so the
/// implementation owns any hardware timeout.
#[async_trait]
pub trait MountOps: Send + Sync {
    /// Issue a timed guide pulse in one direction.
    async fn pulse(&self, direction: GuideDirection, duration_ms: u32) -> DeviceResult<()>;

    /// Whether the mount is connected and able to accept pulses.
    async fn is_connected(&self) -> bool;

    /// Current declination in radians, if the mount reports pointing info.
    async fn declination(&self) -> Option<f64>;

    /// Current pier side.
    async fn pier_side(&self) -> PierSide;

    /// Configured guide speeds, if the mount reports them.
    async fn guide_rates(&self) -> Option<GuideRates>;

    /// Optical train parameters of the guide camera.
    async fn optics(&self) -> DeviceResult<OpticsInfo>;

    /// The guider's ceiling for star motion from a single recenter pulse,
    /// in pixels.
    async fn max_move_px(&self) -> f64;
}
