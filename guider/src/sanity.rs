//! Post-hoc calibration review
//!
//! Classifies a completed calibration by running a fixed list of checks in
//! priority order and reporting the first one that fails. The result is
//! advisory: the calibration stays in use either way, the user just gets an
//! explanation of what looks wrong.

use serde::{Deserialize, Serialize};

use crate::calibration::{Calibration, CalibrationDetails};

/// Angle deviation from orthogonal beyond which the axes are suspect, degrees.
const MAX_AXIS_ERROR_DEG: f64 = 10.0;

/// Tolerated mismatch between expected (cos dec) and measured RA/Dec rate ratio.
const MAX_RATE_RATIO_ERROR: f64 = 0.2;

/// Relative Dec-rate change versus the previous calibration that flags drift.
const MAX_RATE_CHANGE: f64 = 0.2;

/// Declination beyond which Dec compensation breaks down, degrees.
const HARD_DEC_LIMIT_DEG: f64 = 60.0;

/// Declination beyond which calibration accuracy degrades, degrees.
const SOFT_DEC_LIMIT_DEG: f64 = 20.0;

/// Fewest steps per axis for a trustworthy rate measurement.
const MIN_GOOD_STEPS: u32 = 4;

/// Outcome of reviewing a completed calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationIssue {
    None,
    /// Too few steps on one or both axes.
    Steps,
    /// RA and Dec axes are not close to orthogonal.
    Angle,
    /// Measured RA/Dec rate ratio disagrees with cos(declination).
    Rates,
    /// Dec rate changed substantially from the previous calibration,
    /// or Dec guiding was toggled.
    Different,
    /// Calibrated too close to the pole (or well away from the equator).
    Location { hard: bool },
}

impl CalibrationIssue {
    /// Fixed explanatory message for a UI layer to display.
    pub fn message(&self) -> &'static str {
        match self {
            CalibrationIssue::None => "Calibration looks good",
            CalibrationIssue::Steps => {
                "Calibration used fewer than 4 steps on an axis; \
                 the measured rates may be inaccurate. Consider reducing the \
                 calibration step size."
            }
            CalibrationIssue::Angle => {
                "The RA and Dec axes are not close to perpendicular; check \
                 for mount or cabling problems and consider recalibrating."
            }
            CalibrationIssue::Rates => {
                "The measured RA and Dec rates are inconsistent with the \
                 current declination; guiding may be degraded."
            }
            CalibrationIssue::Different => {
                "This calibration differs substantially from the previous \
                 one; if equipment has not changed, consider recalibrating."
            }
            CalibrationIssue::Location { hard: true } => {
                "Calibration was done at a declination beyond 60 degrees; \
                 declination compensation will not be reliable. Recalibrate \
                 closer to the celestial equator."
            }
            CalibrationIssue::Location { hard: false } => {
                "Calibration was done well away from the celestial equator; \
                 accuracy is reduced."
            }
        }
    }
}

/// Per-issue "don't show again" preferences.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IssueSuppression {
    pub steps: bool,
    pub angle: bool,
    pub rates: bool,
    pub different: bool,
    pub location: bool,
}

impl IssueSuppression {
    /// Whether an alert for `issue` should be surfaced to the user.
    pub fn should_alert(&self, issue: CalibrationIssue) -> bool {
        match issue {
            CalibrationIssue::None => false,
            CalibrationIssue::Steps => !self.steps,
            CalibrationIssue::Angle => !self.angle,
            CalibrationIssue::Rates => !self.rates,
            CalibrationIssue::Different => !self.different,
            CalibrationIssue::Location { .. } => !self.location,
        }
    }
}

/// Review a completed calibration against the previous one.
///
/// Checks run in priority order and the first failure wins, so exactly one
/// issue is reported per calibration.
pub fn evaluate(
    previous: Option<&Calibration>,
    current: &Calibration,
    details: &CalibrationDetails,
    dec_compensation_enabled: bool,
) -> CalibrationIssue {
    let dec_active = current.dec_calibrated();

    // 1. Step counts
    if details.ra_step_count < MIN_GOOD_STEPS
        || (dec_active && details.dec_step_count < MIN_GOOD_STEPS)
    {
        return CalibrationIssue::Steps;
    }

    // 2. Axis orthogonality
    if dec_active {
        let sep = (current.x_angle - current.y_angle).to_degrees().abs() % 180.0;
        let nonorth = (sep - 90.0).abs();
        if nonorth > MAX_AXIS_ERROR_DEG {
            return CalibrationIssue::Angle;
        }
    }

    // 3. Rate ratio vs declination
    if dec_active && dec_compensation_enabled {
        if let Some(dec) = current.declination {
            if dec.to_degrees().abs() < HARD_DEC_LIMIT_DEG {
                let speed_ratio = match (details.ra_guide_speed, details.dec_guide_speed) {
                    (Some(ra), Some(de)) if ra > 0.0 => de / ra,
                    _ => 1.0,
                };
                let expected = dec.cos();
                let actual = current.x_rate * speed_ratio / current.y_rate;
                if (expected - actual).abs() > MAX_RATE_RATIO_ERROR {
                    return CalibrationIssue::Rates;
                }
            }
        }
    }

    // 4. Change from the previous calibration
    if let Some(prev) = previous {
        if prev.dec_calibrated() != dec_active {
            return CalibrationIssue::Different;
        }
        if dec_active && prev.y_rate > 0.0 {
            let change = ((current.y_rate - prev.y_rate) / prev.y_rate).abs();
            if change > MAX_RATE_CHANGE {
                return CalibrationIssue::Different;
            }
        }
    }

    // 5. Sky location
    if let Some(dec) = current.declination {
        let dec_deg = dec.to_degrees().abs();
        if dec_deg > HARD_DEC_LIMIT_DEG {
            return CalibrationIssue::Location { hard: true };
        }
        if dec_deg > SOFT_DEC_LIMIT_DEG {
            return CalibrationIssue::Location { hard: false };
        }
    }

    CalibrationIssue::None
}
