//! Mount calibration state machine
//!
//! Drives the mount through a phased sequence of guide pulses
//! (West, recenter East, clear Dec backlash, North, recenter South, nudge)
//! while an external guiding loop feeds in one star position per camera
//! frame. Each phase accumulates star displacement until its travel
//! threshold is met, then derives the axis angle and rate. The finished
//! product is a `Calibration` record mapping pulse durations to star motion
//! on both mount axes.
//!
//! The original fall-through phase chaining is expressed here as a bounded
//! re-dispatch loop: when a phase completes and the next phase's exit
//! condition is already satisfied for the same frame, the next phase runs
//! immediately instead of wasting a camera frame.

use std::f64::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CalResult, CalibrationError, FailureKind};
use crate::events::{CalibrationEvent, EventSink};
use crate::math::{self, Point};
use crate::mount::{GuideDirection, MountOps, PierSide};
use crate::sanity::{self, CalibrationIssue, IssueSuppression};

/// Most pulses any single phase may issue before it is declared failed.
pub const MAX_CALIBRATION_STEPS: u32 = 60;

/// Cap on the per-axis travel threshold, in pixels.
pub const MAX_CALIBRATION_DISTANCE: f64 = 25.0;

/// Dec travel that counts as backlash fully taken up, in pixels.
const DEC_BACKLASH_DISTANCE: f64 = 3.0;

/// Fine Dec pulses allowed after the South recenter.
const MAX_NUDGES: u32 = 3;

/// Residual from the starting position that ends nudging, in pixels.
const NUDGE_TOLERANCE: f64 = 2.0;

/// Same-frame phase transitions allowed in one update call.
const MAX_CHAINED_PHASES: u32 = 8;

/// Sentinel Dec rate meaning Dec was never calibrated. Deliberately absurd
/// so accidental use in pulse math is obvious.
pub const UNCALIBRATED_RATE: f64 = 123e4;

/// Declination guiding mode. Calibration only distinguishes Off from the
/// active modes; the guiding loop uses the full set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecGuideMode {
    Off,
    Auto,
    NorthOnly,
    SouthOnly,
}

impl DecGuideMode {
    pub fn active(&self) -> bool {
        !matches!(self, DecGuideMode::Off)
    }
}

/// Relationship between pulse direction and the sign of the resulting star
/// displacement along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideParity {
    Even,
    Odd,
    Unknown,
}

/// Phase of a calibration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationState {
    Cleared,
    GoWest,
    GoEast,
    ClearBacklash,
    GoNorth,
    GoSouth,
    Complete,
}

/// Completed calibration result. Angles are radians in camera space, rates
/// are pixels per millisecond of pulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub x_angle: f64,
    pub y_angle: f64,
    pub x_rate: f64,
    pub y_rate: f64,
    /// Declination at calibration time, radians, when the mount reports it.
    pub declination: Option<f64>,
    pub pier_side: PierSide,
    pub ra_parity: GuideParity,
    pub dec_parity: GuideParity,
    pub binning: u32,
}

impl Calibration {
    /// Whether the Dec axis was actually measured (vs the sentinel rate).
    pub fn dec_calibrated(&self) -> bool {
        self.y_rate != UNCALIBRATED_RATE
    }
}

/// Diagnostic record persisted alongside a `Calibration`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDetails {
    pub ra_step_count: u32,
    pub dec_step_count: u32,
    /// Guide speeds as sidereal multiples, when the mount reports them.
    pub ra_guide_speed: Option<f64>,
    pub dec_guide_speed: Option<f64>,
    pub last_issue: CalibrationIssue,
}

/// Calibration tuning. Defaults match typical mid-range mounts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Calibration pulse duration in milliseconds.
    pub step_ms: u32,
    /// Per-phase step limit before the phase is declared failed.
    pub max_steps: u32,
    pub dec_guide_mode: DecGuideMode,
    /// Derive the Dec axis by snapping to the perpendicular of the RA axis
    /// and projecting the measured travel onto it. When false the raw
    /// measured angle and rate are used directly.
    pub assume_orthogonal: bool,
    /// Recenter with the largest pulse the guider's max-move setting allows
    /// instead of repeating the calibration pulse size.
    pub fast_recenter: bool,
    pub max_ra_duration_ms: u32,
    pub max_dec_duration_ms: u32,
    /// Whether the guiding loop scales RA pulses by cos(dec); the sanity
    /// check only compares rate ratios when it does.
    pub dec_compensation: bool,
    pub suppression: IssueSuppression,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            step_ms: 750,
            max_steps: MAX_CALIBRATION_STEPS,
            dec_guide_mode: DecGuideMode::Auto,
            assume_orthogonal: true,
            fast_recenter: true,
            max_ra_duration_ms: 2500,
            max_dec_duration_ms: 2500,
            dec_compensation: true,
            suppression: IssueSuppression::default(),
        }
    }
}

/// Mutable per-session bookkeeping, reset on every `begin_calibration`.
#[derive(Debug, Clone, Copy)]
struct Session {
    state: CalibrationState,
    steps: u32,
    start: Point,
    initial: Point,
    last: Point,
    x_angle: f64,
    x_rate: f64,
    y_angle: f64,
    y_rate: f64,
    ra_steps: u32,
    dec_steps: u32,
    recenter_remaining_ms: u32,
    recenter_duration_ms: u32,
    nudges: u32,
    /// Sign of the previous nudge residual; 0 when no nudge has run yet.
    nudge_sign: f64,
    ra_parity: GuideParity,
    dec_parity: GuideParity,
}

impl Session {
    fn cleared() -> Self {
        Self::starting_at(Point::new(0.0, 0.0), CalibrationState::Cleared)
    }

    fn starting_at(location: Point, state: CalibrationState) -> Self {
        Self {
            state,
            steps: 0,
            start: location,
            initial: location,
            last: location,
            x_angle: 0.0,
            x_rate: 0.0,
            y_angle: 0.0,
            y_rate: 0.0,
            ra_steps: 0,
            dec_steps: 0,
            recenter_remaining_ms: 0,
            recenter_duration_ms: 0,
            nudges: 0,
            nudge_sign: 0.0,
            ra_parity: GuideParity::Unknown,
            dec_parity: GuideParity::Unknown,
        }
    }
}

/// What a phase handler wants done after inspecting the current frame.
enum Step {
    /// Issue one pulse and wait for the next frame.
    Pulse(GuideDirection, u32),
    /// The phase transitioned; re-evaluate the new phase on this frame.
    Chain,
    /// Nothing further this frame.
    Done,
}

/// The calibration driver. Owns one session at a time; one
/// `update_calibration_state` call per acquired guide frame.
pub struct Calibrator {
    mount: Arc<dyn MountOps>,
    sink: Arc<dyn EventSink>,
    config: CalibrationConfig,
    session: Session,
    dist_crit: f64,
    binning: u32,
    calibration: Option<Calibration>,
    details: Option<CalibrationDetails>,
}

impl Calibrator {
    pub fn new(
        mount: Arc<dyn MountOps>,
        sink: Arc<dyn EventSink>,
        config: CalibrationConfig,
    ) -> Self {
        Self {
            mount,
            sink,
            config,
            session: Session::cleared(),
            dist_crit: MAX_CALIBRATION_DISTANCE,
            binning: 1,
            calibration: None,
            details: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.session.state
    }

    pub fn is_complete(&self) -> bool {
        self.session.state == CalibrationState::Complete
    }

    /// The last completed calibration, if any.
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn details(&self) -> Option<&CalibrationDetails> {
        self.details.as_ref()
    }

    /// Start a new calibration session at the given star position.
    pub async fn begin_calibration(&mut self, current: Point) -> CalResult<()> {
        if !self.mount.is_connected().await {
            return Err(CalibrationError::NotConnected);
        }
        if !current.is_valid() {
            return Err(CalibrationError::InvalidStarPosition);
        }

        let optics = self.mount.optics().await.map_err(CalibrationError::Mount)?;
        self.binning = optics.binning.max(1);
        self.dist_crit = if optics.sensor_height_px > 0 {
            (optics.sensor_height_px as f64 * 0.05).min(MAX_CALIBRATION_DISTANCE)
        } else {
            MAX_CALIBRATION_DISTANCE
        };

        self.session = Session::starting_at(current, CalibrationState::GoWest);

        tracing::info!(
            "calibration started at ({:.1}, {:.1}), dist_crit {:.1} px, step {} ms",
            current.x,
            current.y,
            self.dist_crit,
            self.config.step_ms
        );
        self.sink.status("Calibration started");
        self.sink
            .guide_log(&format!("Calibration begins at ({:.2}, {:.2})", current.x, current.y));
        self.sink.notify(&CalibrationEvent::Started);
        Ok(())
    }

    /// Abort any in-progress session. A previously completed calibration
    /// stays active.
    pub fn clear_calibration(&mut self) {
        if self.session.state != CalibrationState::Cleared {
            tracing::info!("calibration cleared in state {:?}", self.session.state);
        }
        self.session = Session::cleared();
    }

    /// Advance the state machine with the star position from a new frame.
    pub async fn update_calibration_state(&mut self, current: Point) -> CalResult<()> {
        if !current.is_valid() {
            return Err(CalibrationError::InvalidStarPosition);
        }
        match self.session.state {
            CalibrationState::Cleared => return Err(CalibrationError::NotCalibrating),
            CalibrationState::Complete => return Ok(()),
            _ => {}
        }

        let frame_delta = self.session.last.delta(&current);
        self.session.last = current;
        tracing::debug!(
            "calibration frame: ({:.2}, {:.2}), moved ({:.2}, {:.2})",
            current.x,
            current.y,
            frame_delta.x,
            frame_delta.y
        );

        for _ in 0..MAX_CHAINED_PHASES {
            let d = self.session.start.delta(&current);
            let dist = d.length();

            let step = match self.session.state {
                CalibrationState::GoWest => self.go_west(current, d, dist).await?,
                CalibrationState::GoEast => self.go_east(current).await?,
                CalibrationState::ClearBacklash => self.clear_backlash(current, d, dist)?,
                CalibrationState::GoNorth => self.go_north(current, d, dist).await?,
                CalibrationState::GoSouth => self.go_south(current).await?,
                CalibrationState::Cleared | CalibrationState::Complete => Step::Done,
            };

            match step {
                Step::Pulse(direction, ms) => {
                    self.mount
                        .pulse(direction, ms)
                        .await
                        .map_err(CalibrationError::Mount)?;
                    return Ok(());
                }
                Step::Chain => continue,
                Step::Done => return Ok(()),
            }
        }

        // A phase chain this long means an exit condition is trivially true
        // on every re-entry; stop rather than loop forever.
        tracing::warn!("calibration phase chain exceeded {} transitions", MAX_CHAINED_PHASES);
        Ok(())
    }

    async fn go_west(&mut self, current: Point, d: Point, dist: f64) -> CalResult<Step> {
        if dist < self.dist_crit || self.session.steps == 0 {
            if self.session.steps >= self.config.max_steps {
                return Err(self.fail(
                    FailureKind::RaMovement,
                    "RA calibration failed: star did not move enough",
                ));
            }
            self.session.steps += 1;
            self.step_report("West", self.session.steps, d, dist);
            return Ok(Step::Pulse(GuideDirection::West, self.config.step_ms));
        }

        let steps = self.session.steps;
        self.session.x_angle = math::normalize_angle(self.session.start.angle_to(&current));
        self.session.x_rate = dist / (steps * self.config.step_ms) as f64;
        self.session.ra_steps = steps;
        self.session.ra_parity = if d.x <= 0.0 {
            GuideParity::Even
        } else {
            GuideParity::Odd
        };
        self.axis_report("West", self.session.x_angle, self.session.x_rate, steps);

        let plan = self
            .recenter_plan(self.session.x_rate, self.config.max_ra_duration_ms)
            .await;
        self.session.recenter_duration_ms = plan;
        self.session.recenter_remaining_ms = steps * self.config.step_ms;
        self.session.steps = div_ceil(self.session.recenter_remaining_ms, plan);
        self.session.state = CalibrationState::GoEast;
        Ok(Step::Chain)
    }

    async fn go_east(&mut self, current: Point) -> CalResult<Step> {
        if self.session.recenter_remaining_ms > 0 {
            let amount = self
                .session
                .recenter_duration_ms
                .min(self.session.recenter_remaining_ms);
            self.sink
                .status(&format!("East step {}", self.session.steps));
            self.sink.detail(&format!(
                "recentering, {} ms remaining",
                self.session.recenter_remaining_ms
            ));
            self.session.recenter_remaining_ms -= amount;
            self.session.steps = self.session.steps.saturating_sub(1);
            return Ok(Step::Pulse(GuideDirection::East, amount));
        }

        self.session.steps = 0;
        self.session.start = current;

        if !self.config.dec_guide_mode.active() {
            // Dec guiding is off: synthesize a perpendicular Dec axis and
            // mark its rate as uncalibrated.
            self.session.y_angle = math::normalize_angle(self.session.x_angle + PI / 2.0);
            self.session.y_rate = UNCALIBRATED_RATE;
            self.session.dec_parity = GuideParity::Unknown;
            return self.finish(current).await;
        }

        self.session.state = CalibrationState::ClearBacklash;
        Ok(Step::Chain)
    }

    fn clear_backlash(&mut self, current: Point, d: Point, dist: f64) -> CalResult<Step> {
        if dist < DEC_BACKLASH_DISTANCE {
            if self.session.steps >= self.config.max_steps {
                return Err(self.fail(
                    FailureKind::BacklashClearing,
                    "backlash clearing failed: star did not move enough",
                ));
            }
            self.session.steps += 1;
            self.step_report("Clearing backlash", self.session.steps, d, dist);
            return Ok(Step::Pulse(GuideDirection::North, self.config.step_ms));
        }

        self.session.steps = 0;
        self.session.start = current;
        self.session.state = CalibrationState::GoNorth;
        Ok(Step::Chain)
    }

    async fn go_north(&mut self, current: Point, d: Point, dist: f64) -> CalResult<Step> {
        if dist < self.dist_crit || self.session.steps == 0 {
            if self.session.steps >= self.config.max_steps {
                return Err(self.fail(
                    FailureKind::DecMovement,
                    "Dec calibration failed: star did not move enough",
                ));
            }
            self.session.steps += 1;
            self.step_report("North", self.session.steps, d, dist);
            return Ok(Step::Pulse(GuideDirection::North, self.config.step_ms));
        }

        let steps = self.session.steps;
        let elapsed_ms = (steps * self.config.step_ms) as f64;
        let measured = math::normalize_angle(self.session.start.angle_to(&current));

        if self.config.assume_orthogonal {
            // Snap the Dec axis to whichever perpendicular of the RA axis is
            // closer to the measured angle, then project the measured travel
            // onto it.
            let plus = math::normalize_angle(self.session.x_angle + PI / 2.0);
            let minus = math::normalize_angle(self.session.x_angle - PI / 2.0);
            let to_plus = math::normalize_angle(measured - plus).abs();
            let to_minus = math::normalize_angle(measured - minus).abs();
            let axis = if to_plus <= to_minus { plus } else { minus };
            let dec_dist = dist * math::normalize_angle(measured - axis).cos();
            self.session.y_angle = axis;
            self.session.y_rate = dec_dist.abs() / elapsed_ms;
        } else {
            self.session.y_angle = measured;
            self.session.y_rate = dist / elapsed_ms;
        }
        self.session.dec_steps = steps;
        self.session.dec_parity = if d.y <= 0.0 {
            GuideParity::Even
        } else {
            GuideParity::Odd
        };
        self.axis_report("North", self.session.y_angle, self.session.y_rate, steps);

        let plan = self
            .recenter_plan(self.session.y_rate, self.config.max_dec_duration_ms)
            .await;
        self.session.recenter_duration_ms = plan;
        self.session.recenter_remaining_ms = steps * self.config.step_ms;
        self.session.steps = div_ceil(self.session.recenter_remaining_ms, plan);
        self.session.state = CalibrationState::GoSouth;
        Ok(Step::Chain)
    }

    async fn go_south(&mut self, current: Point) -> CalResult<Step> {
        if self.session.recenter_remaining_ms > 0 {
            let amount = self
                .session
                .recenter_duration_ms
                .min(self.session.recenter_remaining_ms);
            self.sink
                .status(&format!("South step {}", self.session.steps));
            self.sink.detail(&format!(
                "recentering, {} ms remaining",
                self.session.recenter_remaining_ms
            ));
            self.session.recenter_remaining_ms -= amount;
            self.session.steps = self.session.steps.saturating_sub(1);
            return Ok(Step::Pulse(GuideDirection::South, amount));
        }

        // Fine nudges back toward the session's starting position, as long
        // as successive residuals keep the same sign (still converging).
        if self.session.nudges < MAX_NUDGES {
            let residual = self.session.initial.distance(&current);
            if residual > NUDGE_TOLERANCE {
                let camera_vec = self.session.initial.delta(&current);
                let mount_vec =
                    math::mount_coordinates(camera_vec, self.session.x_angle, self.session.y_angle);
                let dec_amount = mount_vec.y;
                let sign = if dec_amount >= 0.0 { 1.0 } else { -1.0 };
                if self.session.nudge_sign == 0.0 || sign == self.session.nudge_sign {
                    let pulse_ms = ((dec_amount.abs() / self.session.y_rate) as u32)
                        .min(self.config.max_dec_duration_ms);
                    if pulse_ms > 0 {
                        self.session.nudge_sign = sign;
                        self.session.nudges += 1;
                        self.sink
                            .status(&format!("Nudge South {}", self.session.nudges));
                        self.sink.detail(&format!(
                            "residual {:.2} px from start, pulse {} ms",
                            residual, pulse_ms
                        ));
                        return Ok(Step::Pulse(GuideDirection::South, pulse_ms));
                    }
                }
            }
        }

        self.finish(current).await
    }

    /// Build and record the final `Calibration`, run the sanity review, and
    /// notify all listeners.
    async fn finish(&mut self, current: Point) -> CalResult<Step> {
        let declination = self.mount.declination().await;
        let pier_side = self.mount.pier_side().await;
        let rates = self.mount.guide_rates().await;

        let result = Calibration {
            x_angle: self.session.x_angle,
            y_angle: self.session.y_angle,
            x_rate: self.session.x_rate,
            y_rate: self.session.y_rate,
            declination,
            pier_side,
            ra_parity: self.session.ra_parity,
            dec_parity: self.session.dec_parity,
            binning: self.binning,
        };
        let mut details = CalibrationDetails {
            ra_step_count: self.session.ra_steps,
            dec_step_count: self.session.dec_steps,
            ra_guide_speed: rates.map(|r| r.ra_sidereal),
            dec_guide_speed: rates.map(|r| r.dec_sidereal),
            last_issue: CalibrationIssue::None,
        };

        let issue = sanity::evaluate(
            self.calibration.as_ref(),
            &result,
            &details,
            self.config.dec_compensation,
        );
        details.last_issue = issue;
        if self.config.suppression.should_alert(issue) {
            self.sink.alert(issue.message());
        }

        tracing::info!(
            "calibration complete: x_angle {:.1} deg, x_rate {:.4} px/ms, y_angle {:.1} deg, y_rate {:.4} px/ms, issue {:?}",
            result.x_angle.to_degrees(),
            result.x_rate,
            result.y_angle.to_degrees(),
            result.y_rate,
            issue
        );
        self.sink.status("Calibration complete");
        self.sink.guide_log(&format!(
            "Calibration complete at ({:.2}, {:.2}), ra {} steps, dec {} steps",
            current.x, current.y, details.ra_step_count, details.dec_step_count
        ));
        self.sink.notify(&CalibrationEvent::Complete {
            calibration: result,
        });

        self.calibration = Some(result);
        self.details = Some(details);
        self.session.state = CalibrationState::Complete;
        Ok(Step::Done)
    }

    /// Pick the recenter pulse size: the calibration pulse, or with fast
    /// recenter the largest pulse whose star motion stays within the
    /// guider's max-move ceiling, clamped to [step, axis max].
    async fn recenter_plan(&self, rate: f64, axis_max_ms: u32) -> u32 {
        if self.config.fast_recenter && rate > 0.0 {
            let by_move = (self.mount.max_move_px().await / rate) as u32;
            by_move.min(axis_max_ms).max(self.config.step_ms)
        } else {
            self.config.step_ms
        }
    }

    fn step_report(&self, phase: &str, step: u32, d: Point, dist: f64) {
        self.sink.status(&format!("{} step {}", phase, step));
        self.sink.detail(&format!(
            "dx={:.2} dy={:.2} dist={:.2}",
            d.x, d.y, dist
        ));
        self.sink.notify(&CalibrationEvent::Step {
            phase: phase.to_string(),
            step,
            dx: d.x,
            dy: d.y,
            dist,
        });
    }

    fn axis_report(&self, phase: &str, angle: f64, rate: f64, steps: u32) {
        let line = format!(
            "{} calibration done in {} steps: angle={:.1} deg rate={:.4} px/ms",
            phase,
            steps,
            angle.to_degrees(),
            rate
        );
        tracing::info!("{}", line);
        self.sink.detail(&format!("angle={:.1} rate={:.4}", angle.to_degrees(), rate));
        self.sink.guide_log(&line);
    }

    /// Abort the session: report to all three sinks and reset to Cleared.
    fn fail(&mut self, kind: FailureKind, message: &str) -> CalibrationError {
        tracing::warn!("calibration failed: {}", message);
        self.sink.alert(message);
        self.sink
            .guide_log(&format!("Calibration failed: {}", message));
        self.sink.notify(&CalibrationEvent::failed(kind, message));
        self.session = Session::cleared();
        CalibrationError::failed(kind, message)
    }
}

fn div_ceil(value: u32, divisor: u32) -> u32 {
    let divisor = divisor.max(1);
    (value + divisor - 1) / divisor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::{DeviceResult, GuideRates, OpticsInfo};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records pulses; the test moves the star itself.
    struct ScriptedMount {
        connected: bool,
        pulses: Mutex<Vec<(GuideDirection, u32)>>,
    }

    impl ScriptedMount {
        fn new() -> Self {
            Self {
                connected: true,
                pulses: Mutex::new(Vec::new()),
            }
        }

        fn last_pulse(&self) -> Option<(GuideDirection, u32)> {
            self.pulses.lock().unwrap().last().copied()
        }

        fn count(&self, dir: GuideDirection) -> usize {
            self.pulses
                .lock()
                .unwrap()
                .iter()
                .filter(|(d, _)| *d == dir)
                .count()
        }
    }

    #[async_trait]
    impl MountOps for ScriptedMount {
        async fn pulse(&self, direction: GuideDirection, duration_ms: u32) -> DeviceResult<()> {
            self.pulses.lock().unwrap().push((direction, duration_ms));
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected
        }

        async fn declination(&self) -> Option<f64> {
            Some(0.0)
        }

        async fn pier_side(&self) -> PierSide {
            PierSide::West
        }

        async fn guide_rates(&self) -> Option<GuideRates> {
            Some(GuideRates {
                ra_sidereal: 0.5,
                dec_sidereal: 0.5,
            })
        }

        async fn optics(&self) -> DeviceResult<OpticsInfo> {
            Ok(OpticsInfo {
                focal_length_mm: 600.0,
                pixel_size_um: 3.8,
                binning: 1,
                sensor_height_px: 0, // dist_crit falls back to 25 px
            })
        }

        async fn max_move_px(&self) -> f64 {
            5.0
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        statuses: Mutex<Vec<String>>,
        alerts: Mutex<Vec<String>>,
        log_lines: Mutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn status(&self, line: &str) {
            self.statuses.lock().unwrap().push(line.to_string());
        }
        fn detail(&self, _line: &str) {}
        fn alert(&self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
        fn guide_log(&self, line: &str) {
            self.log_lines.lock().unwrap().push(line.to_string());
        }
        fn notify(&self, _event: &CalibrationEvent) {}
    }

    fn config(dec_mode: DecGuideMode) -> CalibrationConfig {
        CalibrationConfig {
            step_ms: 500,
            dec_guide_mode: dec_mode,
            ..CalibrationConfig::default()
        }
    }

    fn calibrator(
        mount: &Arc<ScriptedMount>,
        sink: &Arc<RecordingSink>,
        cfg: CalibrationConfig,
    ) -> Calibrator {
        Calibrator::new(mount.clone() as Arc<dyn MountOps>, sink.clone() as Arc<dyn EventSink>, cfg)
    }

    /// Move the star in response to the most recent pulse: west pulses move
    /// it -x, east +x, north -y, south +y, `rate` px per ms.
    fn apply_pulse(star: &mut Point, pulse: (GuideDirection, u32), rate: f64) {
        let amt = rate * pulse.1 as f64;
        match pulse.0 {
            GuideDirection::West => star.x -= amt,
            GuideDirection::East => star.x += amt,
            GuideDirection::North => star.y -= amt,
            GuideDirection::South => star.y += amt,
        }
    }

    #[tokio::test]
    async fn test_begin_requires_connection_and_valid_star() {
        let mut mount = ScriptedMount::new();
        mount.connected = false;
        let mount = Arc::new(mount);
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Auto));

        let err = cal.begin_calibration(Point::new(100.0, 100.0)).await;
        assert!(matches!(err, Err(CalibrationError::NotConnected)));

        let mount = Arc::new(ScriptedMount::new());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Auto));
        let err = cal.begin_calibration(Point::new(f64::NAN, 0.0)).await;
        assert!(matches!(err, Err(CalibrationError::InvalidStarPosition)));
        assert_eq!(cal.state(), CalibrationState::Cleared);
    }

    #[tokio::test]
    async fn test_update_without_session_is_rejected() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Auto));
        let err = cal.update_calibration_state(Point::new(0.0, 0.0)).await;
        assert!(matches!(err, Err(CalibrationError::NotCalibrating)));
    }

    #[tokio::test]
    async fn test_west_phase_measures_angle_and_rate() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Auto));

        // 2 px per 500 ms pulse: rate 0.004 px/ms, 13 pulses to cross 25 px.
        let mut star = Point::new(100.0, 100.0);
        cal.begin_calibration(star).await.unwrap();

        let mut west_pulses = 0;
        loop {
            cal.update_calibration_state(star).await.unwrap();
            let pulse = mount.last_pulse().unwrap();
            if pulse.0 != GuideDirection::West {
                break;
            }
            west_pulses += 1;
            apply_pulse(&mut star, pulse, 0.004);
        }

        assert_eq!(west_pulses, 13);
        assert_eq!(cal.state(), CalibrationState::GoEast);
        // Star moved straight -x: angle is pi, normalized to -pi.
        let s = &cal.session;
        approx::assert_relative_eq!(s.x_angle.abs(), std::f64::consts::PI, epsilon = 1e-9);
        approx::assert_relative_eq!(s.x_rate, 26.0 / (13.0 * 500.0), epsilon = 1e-9);
        assert_eq!(s.ra_steps, 13);
        assert_eq!(s.ra_parity, GuideParity::Even);
        // Fast recenter: max_move 5 px / 0.004 px/ms = 1250 ms per pulse.
        assert_eq!(s.recenter_duration_ms, 1250);
        assert!(sink.statuses.lock().unwrap().iter().any(|s| s == "West step 13"));
    }

    #[tokio::test]
    async fn test_no_movement_fails_ra_calibration() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Auto));

        let star = Point::new(100.0, 100.0);
        cal.begin_calibration(star).await.unwrap();

        let mut result = Ok(());
        for _ in 0..=MAX_CALIBRATION_STEPS {
            result = cal.update_calibration_state(star).await;
            if result.is_err() {
                break;
            }
        }

        match result {
            Err(CalibrationError::Failed { kind, .. }) => {
                assert_eq!(kind, FailureKind::RaMovement)
            }
            other => panic!("expected RA failure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(cal.state(), CalibrationState::Cleared);
        assert!(cal.calibration().is_none());
        assert_eq!(sink.alerts.lock().unwrap().len(), 1);
        assert!(!sink.log_lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dec_none_completes_after_east_recenter() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Off));

        let mut star = Point::new(100.0, 100.0);
        cal.begin_calibration(star).await.unwrap();

        for _ in 0..200 {
            cal.update_calibration_state(star).await.unwrap();
            if cal.is_complete() {
                break;
            }
            if let Some(pulse) = mount.last_pulse() {
                apply_pulse(&mut star, pulse, 0.004);
            }
        }

        assert!(cal.is_complete());
        assert_eq!(mount.count(GuideDirection::North), 0);
        assert_eq!(mount.count(GuideDirection::South), 0);

        let result = cal.calibration().unwrap();
        assert_eq!(result.y_rate, UNCALIBRATED_RATE);
        assert!(!result.dec_calibrated());
        approx::assert_relative_eq!(
            math::normalize_angle(result.y_angle - result.x_angle).abs(),
            std::f64::consts::PI / 2.0,
            epsilon = 1e-9
        );
        assert_eq!(result.dec_parity, GuideParity::Unknown);
    }

    #[tokio::test]
    async fn test_east_recenter_truncates_final_pulse() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Off));

        let mut star = Point::new(100.0, 100.0);
        cal.begin_calibration(star).await.unwrap();

        for _ in 0..200 {
            cal.update_calibration_state(star).await.unwrap();
            if cal.is_complete() {
                break;
            }
            if let Some(pulse) = mount.last_pulse() {
                apply_pulse(&mut star, pulse, 0.004);
            }
        }
        assert!(cal.is_complete());

        // 13 x 500 ms west = 6500 ms to reverse, in 1250 ms fast-recenter
        // pulses: five full pulses plus a 250 ms remainder.
        let pulses = mount.pulses.lock().unwrap();
        let east: Vec<u32> = pulses
            .iter()
            .filter(|(d, _)| *d == GuideDirection::East)
            .map(|(_, ms)| *ms)
            .collect();
        assert_eq!(east, vec![1250, 1250, 1250, 1250, 1250, 250]);
    }

    #[tokio::test]
    async fn test_full_calibration_with_dec_axis() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Auto));

        let mut star = Point::new(100.0, 100.0);
        cal.begin_calibration(star).await.unwrap();

        for _ in 0..400 {
            cal.update_calibration_state(star).await.unwrap();
            if cal.is_complete() {
                break;
            }
            if let Some(pulse) = mount.last_pulse() {
                apply_pulse(&mut star, pulse, 0.004);
            }
        }

        assert!(cal.is_complete());
        assert!(mount.count(GuideDirection::North) > 0);
        assert!(mount.count(GuideDirection::South) > 0);

        let result = cal.calibration().unwrap();
        assert!(result.dec_calibrated());
        approx::assert_relative_eq!(result.x_rate, 0.004, epsilon = 1e-4);
        approx::assert_relative_eq!(result.y_rate, 0.004, epsilon = 1e-4);
        // Axes perpendicular: -x for RA, -y for Dec.
        approx::assert_relative_eq!(
            math::normalize_angle(result.x_angle - result.y_angle).abs(),
            std::f64::consts::PI / 2.0,
            epsilon = 1e-6
        );

        let details = cal.details().unwrap();
        assert_eq!(details.ra_step_count, 13);
        assert_eq!(details.dec_step_count, 13);
        assert_eq!(details.last_issue, CalibrationIssue::None);
        // Clean run: begin alert-free.
        assert!(sink.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_calibration_resets_session_keeps_result() {
        let mount = Arc::new(ScriptedMount::new());
        let sink = Arc::new(RecordingSink::default());
        let mut cal = calibrator(&mount, &sink, config(DecGuideMode::Off));

        let mut star = Point::new(100.0, 100.0);
        cal.begin_calibration(star).await.unwrap();
        for _ in 0..200 {
            cal.update_calibration_state(star).await.unwrap();
            if cal.is_complete() {
                break;
            }
            if let Some(pulse) = mount.last_pulse() {
                apply_pulse(&mut star, pulse, 0.004);
            }
        }
        assert!(cal.is_complete());

        // Start and abort another session: the completed result stays.
        cal.begin_calibration(star).await.unwrap();
        assert_eq!(cal.state(), CalibrationState::GoWest);
        cal.clear_calibration();
        assert_eq!(cal.state(), CalibrationState::Cleared);
        assert!(cal.calibration().is_some());
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil(6500, 1250), 6);
        assert_eq!(div_ceil(6250, 1250), 5);
        assert_eq!(div_ceil(1, 500), 1);
    }
}
