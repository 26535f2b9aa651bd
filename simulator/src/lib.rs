//! Simulated mount for the calibration core
//!
//! Models a guide star whose camera position responds to guide pulses: RA
//! pulses move it along a configurable camera angle, Dec pulses along the
//! (near-)perpendicular axis after a backlash dead band is consumed, with
//! optional positional noise. Implements `MountOps` so tests and demos can
//! run complete calibration sessions without hardware.

use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use starkeeper_guider::{
    DeviceResult, GuideDirection, GuideRates, MountOps, OpticsInfo, PierSide, Point,
};

/// Simulated mount behavior.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Camera angle of westward star motion, radians.
    pub ra_angle: f64,
    /// Star motion per millisecond of RA pulse, pixels.
    pub ra_rate: f64,
    /// Star motion per millisecond of Dec pulse, pixels.
    pub dec_rate: f64,
    /// Angular error of the Dec axis from perpendicular, radians.
    pub dec_axis_error: f64,
    /// Dec gear slack: pulse time consumed before the star moves when the
    /// Dec direction reverses, in pixels of commanded travel.
    pub dec_backlash_px: f64,
    /// Uniform positional jitter amplitude, pixels. 0 disables noise.
    pub noise_px: f64,
    /// When false, Dec pulses never move the star (a mount with Dec motor
    /// problems); used to exercise calibration failure paths.
    pub dec_responds: bool,
    pub declination_rad: f64,
    pub pier_side: PierSide,
    pub guide_speed: f64,
    pub optics: OpticsInfo,
    pub max_move_px: f64,
    pub rng_seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ra_angle: std::f64::consts::PI, // west is -x on the sensor
            ra_rate: 0.004,
            dec_rate: 0.004,
            dec_axis_error: 0.0,
            dec_backlash_px: 0.0,
            noise_px: 0.0,
            dec_responds: true,
            declination_rad: 0.0,
            pier_side: PierSide::West,
            guide_speed: 0.5,
            optics: OpticsInfo {
                focal_length_mm: 600.0,
                pixel_size_um: 3.8,
                binning: 1,
                sensor_height_px: 0,
            },
            max_move_px: 5.0,
            rng_seed: 7,
        }
    }
}

struct SimState {
    star: Point,
    /// Remaining Dec dead band, pixels of commanded travel.
    backlash_remaining: f64,
    /// Last Dec direction, for backlash reversal. None until the first
    /// Dec pulse.
    last_dec_dir: Option<GuideDirection>,
    connected: bool,
    pulses: Vec<(GuideDirection, u32)>,
    rng: StdRng,
}

/// A mount whose guide star lives on a simulated sensor.
pub struct SimMount {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimMount {
    pub fn new(config: SimConfig, star: Point) -> Self {
        let rng = StdRng::seed_from_u64(config.rng_seed);
        Self {
            state: Mutex::new(SimState {
                star,
                backlash_remaining: config.dec_backlash_px,
                last_dec_dir: None,
                connected: true,
                pulses: Vec::new(),
                rng,
            }),
            config,
        }
    }

    /// Current star position, as the guide camera would report it.
    pub fn star_position(&self) -> Point {
        let mut state = self.state.lock().unwrap();
        if self.config.noise_px > 0.0 {
            let amp = self.config.noise_px;
            let jx = state.rng.gen_range(-amp..amp);
            let jy = state.rng.gen_range(-amp..amp);
            state.star.translated(jx, jy)
        } else {
            state.star
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    /// Every pulse received so far.
    pub fn pulse_log(&self) -> Vec<(GuideDirection, u32)> {
        self.state.lock().unwrap().pulses.clone()
    }

    fn apply_ra(&self, state: &mut SimState, duration_ms: u32, sign: f64) {
        let travel = sign * self.config.ra_rate * duration_ms as f64;
        state.star = state
            .star
            .translated(travel * self.config.ra_angle.cos(), travel * self.config.ra_angle.sin());
    }

    fn apply_dec(&self, state: &mut SimState, duration_ms: u32, dir: GuideDirection) {
        if !self.config.dec_responds {
            return;
        }

        let mut travel = self.config.dec_rate * duration_ms as f64;

        // Reversing direction re-engages the gear slack.
        if state.last_dec_dir.is_some() && state.last_dec_dir != Some(dir) {
            state.backlash_remaining = self.config.dec_backlash_px;
        }
        state.last_dec_dir = Some(dir);

        if state.backlash_remaining > 0.0 {
            let eaten = travel.min(state.backlash_remaining);
            state.backlash_remaining -= eaten;
            travel -= eaten;
        }
        if travel <= 0.0 {
            return;
        }

        let sign = if dir == GuideDirection::North { 1.0 } else { -1.0 };
        let axis = self.config.ra_angle + std::f64::consts::FRAC_PI_2 + self.config.dec_axis_error;
        state.star = state
            .star
            .translated(sign * travel * axis.cos(), sign * travel * axis.sin());
    }
}

#[async_trait]
impl MountOps for SimMount {
    async fn pulse(&self, direction: GuideDirection, duration_ms: u32) -> DeviceResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err("simulated mount is not connected".to_string());
        }
        tracing::debug!("sim pulse {} {} ms", direction.as_str(), duration_ms);
        state.pulses.push((direction, duration_ms));
        match direction {
            GuideDirection::West => self.apply_ra(&mut state, duration_ms, 1.0),
            GuideDirection::East => self.apply_ra(&mut state, duration_ms, -1.0),
            GuideDirection::North | GuideDirection::South => {
                self.apply_dec(&mut state, duration_ms, direction)
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn declination(&self) -> Option<f64> {
        Some(self.config.declination_rad)
    }

    async fn pier_side(&self) -> PierSide {
        self.config.pier_side
    }

    async fn guide_rates(&self) -> Option<GuideRates> {
        Some(GuideRates {
            ra_sidereal: self.config.guide_speed,
            dec_sidereal: self.config.guide_speed,
        })
    }

    async fn optics(&self) -> DeviceResult<OpticsInfo> {
        Ok(self.config.optics)
    }

    async fn max_move_px(&self) -> f64 {
        self.config.max_move_px
    }
}
