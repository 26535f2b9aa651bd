//! Autoguiding calibration core
//!
//! Measures how a telescope mount responds to timed guide pulses and derives
//! the calibration the guiding loop needs: the camera angle and rate
//! (pixels per millisecond) of each mount axis.
//!
//! ## What lives here
//!
//! - Phased calibration state machine (West, recenter East, clear Dec
//!   backlash, North, recenter South, fine nudges)
//! - Step-size and image-scale math for picking the calibration pulse length
//! - Post-hoc sanity review of a completed calibration
//! - Abstract mount and event-sink interfaces so the core never touches a
//!   device protocol or a UI
//!
//! The driving loop supplies one star position per camera frame; the core
//! issues at most one guide pulse in response and never blocks on hardware
//! beyond that pulse.

pub mod calibration;
pub mod calstep;
pub mod error;
pub mod events;
pub mod math;
pub mod mount;
pub mod profile;
pub mod sanity;

pub use calibration::{
    Calibration, CalibrationConfig, CalibrationDetails, CalibrationState, Calibrator,
    DecGuideMode, GuideParity, MAX_CALIBRATION_DISTANCE, MAX_CALIBRATION_STEPS,
    UNCALIBRATED_RATE,
};
pub use calstep::{compute_calibration_step, image_scale, recommended_travel_px, MIN_STEPS};
pub use error::{CalResult, CalibrationError, FailureKind};
pub use events::{CalibrationEvent, EventSink, LogSink};
pub use math::{mount_coordinates, normalize, normalize_angle, Point};
pub use mount::{DeviceResult, GuideDirection, GuideRates, MountOps, OpticsInfo, PierSide};
pub use sanity::{evaluate, CalibrationIssue, IssueSuppression};
