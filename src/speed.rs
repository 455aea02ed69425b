//! Speed Controller.
//!
//! Maps a per-frame tension value onto an instantaneous time-scale factor,
//! folds in a duration-feedback correction so cumulative output length
//! tracks the nominal target over long streams, and optionally blends
//! toward a pure constant-speed behavior via a nonlinear factor.

use crate::config::{validate_duration_feedback, validate_nonlinear_factor, validate_target_speed};
use crate::error::TsmResult;
use log::trace;

const MIN_SPEED: f32 = 0.5;

/// Feedback corrections beyond this magnitude are logged, as a "noticeable"
/// adjustment worth tracing.
const NOTICEABLE_FEEDBACK_MARGIN: f32 = 0.05;

fn max_speed_for(target_speed: f32) -> f32 {
    (target_speed * 4.0).max(4.0)
}

/// Computes the effective speed for each analysis frame and records an
/// append-only log of (frame_index, speed) pairs for observers.
pub struct SpeedController {
    target_speed: f32,
    nonlinear_factor: f32,
    duration_feedback: f32,
    max_speed: f32,

    /// Input samples represented by one analysis frame (the frame-slicer
    /// hop size), used to integrate 1/s into `expected_output_samples`.
    hop_samples: f64,
    expected_output_samples: f64,
    actual_output_samples: f64,

    profile: Vec<(u64, f32)>,
}

impl SpeedController {
    pub fn new(target_speed: f32, nonlinear_factor: f32, duration_feedback: f32, hop_samples: f64) -> Self {
        Self {
            target_speed,
            nonlinear_factor,
            duration_feedback,
            max_speed: max_speed_for(target_speed),
            hop_samples,
            expected_output_samples: 0.0,
            actual_output_samples: 0.0,
            profile: Vec::new(),
        }
    }

    pub fn target_speed(&self) -> f32 {
        self.target_speed
    }

    pub fn set_target_speed(&mut self, rg: f32) -> TsmResult<()> {
        validate_target_speed(rg)?;
        self.target_speed = rg;
        self.max_speed = max_speed_for(rg);
        Ok(())
    }

    pub fn set_nonlinear_factor(&mut self, lambda: f32) -> TsmResult<()> {
        validate_nonlinear_factor(lambda)?;
        self.nonlinear_factor = lambda;
        Ok(())
    }

    pub fn set_duration_feedback(&mut self, feedback: f32) -> TsmResult<()> {
        validate_duration_feedback(feedback)?;
        self.duration_feedback = feedback;
        Ok(())
    }

    /// Record the actual cumulative output sample count produced so far.
    pub fn record_io(&mut self, output_samples: usize) {
        self.actual_output_samples = output_samples as f64;
    }

    /// `(expected_output_samples - actual_output_samples) / expected_output_samples`,
    /// clamped to [-1, 1]. Positive when the stream is running ahead of the
    /// nominal target-speed schedule (less output produced than expected),
    /// negative when it has fallen behind (more output produced than expected).
    fn drift_normalized(&self) -> f32 {
        if self.expected_output_samples.abs() < 1e-9 {
            0.0
        } else {
            (((self.expected_output_samples - self.actual_output_samples) / self.expected_output_samples) as f32)
                .clamp(-1.0, 1.0)
        }
    }

    /// Current drift in samples (actual output minus nominal expected), for
    /// telemetry.
    pub fn drift_samples(&self) -> f64 {
        self.actual_output_samples - self.expected_output_samples
    }

    /// Computes the effective speed for a frame at the given tension and
    /// appends it to the speed profile.
    pub fn speed_for(&mut self, tension: f32, frame_index: u64) -> f32 {
        let s_linear = self.target_speed * (0.5 + tension);
        let clamped = s_linear.clamp(MIN_SPEED, self.max_speed);

        let drift_normalized = self.drift_normalized();
        // Behind schedule (drift_normalized negative) needs a speed-up, not
        // a further slow-down, so the correction subtracts the drift term.
        let feedback_delta = self.duration_feedback * drift_normalized;
        let with_feedback = (clamped * (1.0 - feedback_delta)).clamp(MIN_SPEED, self.max_speed);
        if feedback_delta.abs() > NOTICEABLE_FEEDBACK_MARGIN {
            trace!(
                "duration feedback adjusting speed by {:.1}% at frame {frame_index} (drift {:.2})",
                -feedback_delta * 100.0,
                drift_normalized
            );
        }

        let s_eff = self.nonlinear_factor * with_feedback
            + (1.0 - self.nonlinear_factor) * self.target_speed;

        self.expected_output_samples += self.hop_samples / s_eff as f64;
        self.profile.push((frame_index, s_eff));
        s_eff
    }

    /// Drain the speed profile accumulated so far, leaving it empty.
    pub fn drain_speed_profile(&mut self) -> Vec<(u64, f32)> {
        std::mem::take(&mut self.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_tension_tracks_target_speed_when_linear() {
        let mut ctl = SpeedController::new(2.0, 1.0, 0.0, 500.0);
        // tension=0.5 -> s_linear = Rg*(0.5+0.5) = Rg exactly
        let s = ctl.speed_for(0.5, 0);
        assert!((s - 2.0).abs() < 1e-5);
    }

    #[test]
    fn high_tension_speeds_up_low_tension_slows_down() {
        let mut fast = SpeedController::new(2.0, 1.0, 0.0, 500.0);
        let mut slow = SpeedController::new(2.0, 1.0, 0.0, 500.0);
        let s_fast = fast.speed_for(1.0, 0);
        let s_slow = slow.speed_for(0.0, 0);
        assert!(s_fast > 2.0);
        assert!(s_slow < 2.0);
    }

    #[test]
    fn nonlinear_factor_zero_pins_speed_to_target() {
        let mut ctl = SpeedController::new(2.0, 0.0, 0.0, 500.0);
        let s = ctl.speed_for(1.0, 0);
        assert!((s - 2.0).abs() < 1e-5);
    }

    #[test]
    fn speed_is_clamped_to_valid_range() {
        let mut ctl = SpeedController::new(4.0, 1.0, 0.0, 500.0);
        let s = ctl.speed_for(1.0, 0);
        assert!(s <= max_speed_for(4.0));
        let mut ctl2 = SpeedController::new(0.5, 1.0, 0.0, 500.0);
        let s2 = ctl2.speed_for(0.0, 0);
        assert!(s2 >= MIN_SPEED);
    }

    /// If the stream has produced more output than the target-speed
    /// schedule expected so far (it fell behind), the feedback term should
    /// speed the stream up to catch back up, not slow it down further.
    #[test]
    fn output_running_ahead_of_schedule_speeds_up_to_catch_back_up() {
        let mut ctl = SpeedController::new(2.0, 1.0, 0.4, 500.0);
        let _ = ctl.speed_for(0.5, 0); // seeds expected_output_samples to 250.0
        ctl.record_io(1_000); // far more output produced than the 250 expected
        let s = ctl.speed_for(0.5, 1);
        assert!(s > 2.0, "expected a corrective speed-up, got {s}");
    }

    #[test]
    fn extreme_drift_is_clamped_before_feedback_is_applied() {
        let mut ctl = SpeedController::new(2.0, 1.0, 0.4, 500.0);
        let _ = ctl.speed_for(0.5, 0); // seeds expected_output_samples to 250.0
        ctl.record_io(1_000_000); // drift_normalized would be enormous unclamped
        let s = ctl.speed_for(0.5, 1);
        // with drift clamped to -1.0: with_feedback = 2.0 * (1 + 0.4) = 2.8
        assert!((s - 2.8).abs() < 1e-3, "got {s}");
    }

    #[test]
    fn speed_profile_is_append_only_and_drains() {
        let mut ctl = SpeedController::new(2.0, 1.0, 0.0, 500.0);
        ctl.speed_for(0.5, 0);
        ctl.speed_for(0.6, 1);
        let profile = ctl.drain_speed_profile();
        assert_eq!(profile.len(), 2);
        assert_eq!(profile[0].0, 0);
        assert_eq!(profile[1].0, 1);
        assert!(ctl.drain_speed_profile().is_empty());
    }
}
