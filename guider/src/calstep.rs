//! Calibration step sizing
//!
//! Computes the guide-pulse duration for calibration from the optical train
//! and guide speed: long enough to cross the requested travel distance in the
//! desired number of steps, widened toward the pole where apparent RA motion
//! shrinks, and rounded up to a 50 ms grid.

use crate::error::{CalResult, CalibrationError};

/// Sidereal rate in arcseconds per second.
pub const SIDEREAL_ARCSEC_PER_SEC: f64 = 15.0;

/// Fewest calibration steps a pulse size may produce.
pub const MIN_STEPS: u32 = 6;

/// Pulse durations are rounded up to this grid.
const PULSE_GRANULARITY_MS: f64 = 50.0;

/// Image scale in arcseconds per (binned) pixel.
pub fn image_scale(focal_length_mm: f64, pixel_size_um: f64, binning: u32) -> f64 {
    206.265 * pixel_size_um / focal_length_mm / binning as f64
}

/// Travel distance large enough to be measurable regardless of image scale:
/// at least 25 px, or whatever covers 20 arcsec.
pub fn recommended_travel_px(image_scale_arcsec: f64) -> f64 {
    (20.0 / image_scale_arcsec).max(25.0)
}

/// Compute the calibration pulse duration.
///
/// Returns the image scale (arcsec/px) and the pulse length in milliseconds.
/// `guide_speed` is a multiple of sidereal; `declination_deg` must already be
/// clamped to |dec| <= 60 by the caller.
pub fn compute_calibration_step(
    focal_length_mm: f64,
    pixel_size_um: f64,
    binning: u32,
    guide_speed: f64,
    desired_steps: u32,
    declination_deg: f64,
    travel_px: f64,
) -> CalResult<(f64, u32)> {
    if focal_length_mm < 50.0 {
        return Err(CalibrationError::InvalidInput(format!(
            "focal length {:.0} mm is below the 50 mm minimum",
            focal_length_mm
        )));
    }
    if pixel_size_um <= 0.0 {
        return Err(CalibrationError::InvalidInput(format!(
            "pixel size {:.2} um must be positive",
            pixel_size_um
        )));
    }
    if binning == 0 || desired_steps == 0 {
        return Err(CalibrationError::InvalidInput(
            "binning and step count must be positive".to_string(),
        ));
    }
    if guide_speed <= 0.0 || travel_px <= 0.0 {
        return Err(CalibrationError::InvalidInput(
            "guide speed and travel distance must be positive".to_string(),
        ));
    }

    let scale = image_scale(focal_length_mm, pixel_size_um, binning);
    let total_ms = travel_px * scale / (SIDEREAL_ARCSEC_PER_SEC * guide_speed) * 1000.0;

    let pulse = total_ms / desired_steps as f64;
    // Largest pulse that still yields the minimum step count.
    let max_pulse = total_ms / MIN_STEPS as f64;
    let pulse = max_pulse.min(pulse / declination_deg.to_radians().cos());

    let step_ms = ((pulse / PULSE_GRANULARITY_MS).ceil() * PULSE_GRANULARITY_MS) as u32;
    Ok((scale, step_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_image_scale() {
        // 600 mm, 3.8 um, bin 1
        assert_relative_eq!(image_scale(600.0, 3.8, 1), 1.3063, epsilon = 1e-3);
        // Binning halves the scale denominator
        assert_relative_eq!(image_scale(600.0, 3.8, 2), 1.3063 / 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_step_is_positive_multiple_of_50() {
        for fl in [100.0, 400.0, 600.0, 1200.0, 2800.0] {
            for px in [2.4, 3.8, 5.4, 9.0] {
                for bin in [1u32, 2, 4] {
                    let (_, step) =
                        compute_calibration_step(fl, px, bin, 0.5, 12, 0.0, 25.0).unwrap();
                    assert!(step > 0, "fl={} px={} bin={}", fl, px, bin);
                    assert_eq!(step % 50, 0, "fl={} px={} bin={}", fl, px, bin);
                }
            }
        }
    }

    #[test]
    fn test_monotonic_in_declination() {
        let mut last = 0;
        for dec in [0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            let (_, step) =
                compute_calibration_step(600.0, 3.8, 1, 0.5, 12, dec, 25.0).unwrap();
            assert!(
                step >= last,
                "step {} at dec {} shrank from {}",
                step,
                dec,
                last
            );
            last = step;
        }
    }

    #[test]
    fn test_min_steps_bound() {
        // Near the pole limit the declination widening is capped so at least
        // MIN_STEPS steps remain.
        let (scale, step) = compute_calibration_step(600.0, 3.8, 1, 0.5, 12, 60.0, 25.0).unwrap();
        let total_ms = 25.0 * scale / 7.5 * 1000.0;
        let max_pulse = total_ms / MIN_STEPS as f64;
        assert!((step as f64) <= max_pulse + PULSE_GRANULARITY_MS);
    }

    #[test]
    fn test_reference_scenario_is_deterministic() {
        let a = compute_calibration_step(600.0, 3.8, 1, 0.5, 12, 0.0, 25.0).unwrap();
        let b = compute_calibration_step(600.0, 3.8, 1, 0.5, 12, 0.0, 25.0).unwrap();
        assert_eq!(a, b);
        assert_relative_eq!(a.0, 1.307, epsilon = 1e-3);
        assert_eq!(a.1 % 50, 0);
        assert!(a.1 >= 250 && a.1 <= 450, "step {} out of expected band", a.1);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(compute_calibration_step(49.0, 3.8, 1, 0.5, 12, 0.0, 25.0).is_err());
        assert!(compute_calibration_step(600.0, 0.0, 1, 0.5, 12, 0.0, 25.0).is_err());
        assert!(compute_calibration_step(600.0, 3.8, 0, 0.5, 12, 0.0, 25.0).is_err());
        assert!(compute_calibration_step(600.0, 3.8, 1, 0.0, 12, 0.0, 25.0).is_err());
        assert!(compute_calibration_step(600.0, 3.8, 1, 0.5, 0, 0.0, 25.0).is_err());
        assert!(compute_calibration_step(600.0, 3.8, 1, 0.5, 12, 0.0, -1.0).is_err());
    }

    #[test]
    fn test_recommended_travel() {
        // Coarse image scale: the 25 px floor wins.
        assert_relative_eq!(recommended_travel_px(4.0), 25.0);
        // Fine image scale: need more pixels to cover 20 arcsec.
        assert_relative_eq!(recommended_travel_px(0.5), 40.0);
    }
}
