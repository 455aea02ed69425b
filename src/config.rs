//! Stream configuration.
//!
//! Groups every tunable from the external interface into a single immutable
//! record, constructed once and validated synchronously at [`crate::Stream::new`].
//! After construction only the handful of values that matter for live control
//! (target speed, nonlinear factor, duration feedback, pitch rate) have
//! setters on the stream itself; everything else here is frozen for the
//! life of the stream.

use crate::error::TsmError;
use log::warn;
use serde::{Deserialize, Serialize};

/// Default first-order pre-emphasis coefficient applied in the frame slicer.
pub const DEFAULT_PREEMPHASIS: f32 = 0.97;
/// Default denominator floor used to normalize the energy-change component.
pub const DEFAULT_LOW_ENERGY_SCALE: f32 = 0.04;
/// Default divisor used to derive the per-frame active-bin threshold.
pub const DEFAULT_BIN_THRESHOLD_DIVISOR: f32 = 100.0;
/// Default tension weights (w_E, w_P).
pub const DEFAULT_TENSION_WEIGHTS: (f32, f32) = (0.5, 0.25);
/// Default tension offsets (o_E, o_P).
pub const DEFAULT_TENSION_OFFSETS: (f32, f32) = (0.7, 1.0);
/// Default cap, in multiples of the local standard deviation, on the speech-change component.
pub const DEFAULT_SPEECH_CHANGE_CAP_MULTIPLIER: f32 = 4.0;
/// Default duration-feedback strength.
pub const DEFAULT_DURATION_FEEDBACK: f32 = 0.1;

/// Ordering of the tension estimator's hysteresis window.
///
/// The source toggled between two orderings of the same pair of constants.
/// This implementation defaults to hindsight-dominant (see DESIGN.md); the
/// lookahead-dominant ordering is kept as a compatibility toggle for bit-matching
/// a reference that used the other order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HysteresisOrder {
    /// K_past = 12, K_future = 8.
    HindsightDominant,
    /// K_past = 8, K_future = 12.
    LookaheadDominant,
}

impl HysteresisOrder {
    pub fn frame_counts(self) -> (usize, usize) {
        match self {
            HysteresisOrder::HindsightDominant => (12, 8),
            HysteresisOrder::LookaheadDominant => (8, 12),
        }
    }
}

/// Immutable configuration for one [`crate::Stream`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sample_rate: f32,
    pub num_channels: u16,

    /// Initial global target speedup ratio, Rg.
    pub target_speed: f32,
    /// Initial nonlinear blend factor, lambda, in [0, 1].
    pub nonlinear_factor: f32,
    /// Initial duration-feedback strength, in [0, 0.5].
    pub duration_feedback: f32,

    pub preemphasis_factor: f32,
    pub low_energy_threshold_scale: f32,
    pub bin_threshold_divisor: f32,
    pub tension_weights: (f32, f32),
    pub tension_offsets: (f32, f32),
    pub speech_change_cap_multiplier: f32,
    pub hysteresis: HysteresisOrder,
}

impl StreamConfig {
    /// A config with every tunable at its documented default, for the given
    /// sample rate and channel count.
    pub fn new(sample_rate: f32, num_channels: u16, target_speed: f32) -> Self {
        Self {
            sample_rate,
            num_channels,
            target_speed,
            nonlinear_factor: 1.0,
            duration_feedback: DEFAULT_DURATION_FEEDBACK,
            preemphasis_factor: DEFAULT_PREEMPHASIS,
            low_energy_threshold_scale: DEFAULT_LOW_ENERGY_SCALE,
            bin_threshold_divisor: DEFAULT_BIN_THRESHOLD_DIVISOR,
            tension_weights: DEFAULT_TENSION_WEIGHTS,
            tension_offsets: DEFAULT_TENSION_OFFSETS,
            speech_change_cap_multiplier: DEFAULT_SPEECH_CHANGE_CAP_MULTIPLIER,
            hysteresis: HysteresisOrder::HindsightDominant,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), TsmError> {
        if !(self.sample_rate > 0.0) {
            warn!("invalid configuration: sample_rate must be > 0, got {}", self.sample_rate);
            return Err(TsmError::InvalidConfiguration {
                field: "sample_rate",
                reason: format!("must be > 0, got {}", self.sample_rate),
            });
        }
        if self.num_channels == 0 {
            warn!("invalid configuration: num_channels must be >= 1, got 0");
            return Err(TsmError::InvalidConfiguration {
                field: "num_channels",
                reason: "must be >= 1".into(),
            });
        }
        validate_target_speed(self.target_speed)?;
        validate_nonlinear_factor(self.nonlinear_factor)?;
        validate_duration_feedback(self.duration_feedback)?;
        Ok(())
    }

    /// Analysis frame size in samples: N = 2*round(1.5*SR/100).
    pub fn fft_size(&self) -> usize {
        fft_size(self.sample_rate)
    }

    /// Analysis frame step in samples: S = SR/100.
    pub fn frame_step(&self) -> usize {
        (self.sample_rate / FRAME_RATE_HZ).round() as usize
    }

    /// Serializes this configuration to JSON, for callers that want to
    /// persist a chosen configuration alongside their own settings.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("StreamConfig fields are all JSON-representable")
    }

    /// Parses a configuration previously produced by [`Self::to_json`].
    pub fn from_json(json: &str) -> Result<StreamConfig, TsmError> {
        serde_json::from_str(json).map_err(|e| TsmError::InvalidConfiguration {
            field: "json",
            reason: e.to_string(),
        })
    }
}

/// Fixed analysis rate.
pub const FRAME_RATE_HZ: f32 = 100.0;

/// `fft_size(sample_rate) = 2*round(1.5*sample_rate/100)`.
pub fn fft_size(sample_rate: f32) -> usize {
    let step = 1.5 * sample_rate / FRAME_RATE_HZ;
    2 * step.round() as usize
}

pub(crate) fn validate_target_speed(rg: f32) -> Result<(), TsmError> {
    if !(0.5..=4.0).contains(&rg) {
        warn!("invalid configuration: target_speed must be in [0.5, 4.0], got {rg}");
        return Err(TsmError::InvalidConfiguration {
            field: "target_speed",
            reason: format!("must be in [0.5, 4.0], got {rg}"),
        });
    }
    Ok(())
}

pub(crate) fn validate_nonlinear_factor(lambda: f32) -> Result<(), TsmError> {
    if !(0.0..=1.0).contains(&lambda) {
        warn!("invalid configuration: nonlinear_factor must be in [0, 1], got {lambda}");
        return Err(TsmError::InvalidConfiguration {
            field: "nonlinear_factor",
            reason: format!("must be in [0, 1], got {lambda}"),
        });
    }
    Ok(())
}

pub(crate) fn validate_duration_feedback(feedback: f32) -> Result<(), TsmError> {
    if !(0.0..=0.5).contains(&feedback) {
        warn!("invalid configuration: duration_feedback must be in [0, 0.5], got {feedback}");
        return Err(TsmError::InvalidConfiguration {
            field: "duration_feedback",
            reason: format!("must be in [0, 0.5], got {feedback}"),
        });
    }
    Ok(())
}

/// Named starting points for [`StreamConfig`], in the spirit of a factory preset:
/// a complete parameter set under one name, rather than every field spelled
/// out at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigPreset {
    /// Every tunable at its documented default (hindsight-dominant hysteresis).
    Default,
    /// Lookahead-dominant hysteresis ordering, for bit-matching a legacy reference.
    LegacyHysteresis,
}

impl ConfigPreset {
    pub fn to_config(self, sample_rate: f32, num_channels: u16, target_speed: f32) -> StreamConfig {
        let mut cfg = StreamConfig::new(sample_rate, num_channels, target_speed);
        if self == ConfigPreset::LegacyHysteresis {
            cfg.hysteresis = HysteresisOrder::LookaheadDominant;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = StreamConfig::new(22050.0, 1, 2.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let cfg = StreamConfig::new(0.0, 1, 2.0);
        assert!(matches!(
            cfg.validate(),
            Err(TsmError::InvalidConfiguration { field: "sample_rate", .. })
        ));
    }

    #[test]
    fn rejects_zero_channels() {
        let cfg = StreamConfig::new(22050.0, 0, 2.0);
        assert!(matches!(
            cfg.validate(),
            Err(TsmError::InvalidConfiguration { field: "num_channels", .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_speed() {
        assert!(validate_target_speed(0.1).is_err());
        assert!(validate_target_speed(5.0).is_err());
        assert!(validate_target_speed(2.0).is_ok());
    }

    #[test]
    fn rejects_out_of_range_lambda_and_feedback() {
        assert!(validate_nonlinear_factor(-0.1).is_err());
        assert!(validate_nonlinear_factor(1.1).is_err());
        assert!(validate_duration_feedback(0.6).is_err());
        assert!(validate_duration_feedback(0.5).is_ok());
    }

    #[test]
    fn fft_size_matches_formula() {
        // 2*round(1.5*22050/100) = 2*round(330.75) = 2*331 = 662
        assert_eq!(fft_size(22050.0), 662);
    }

    #[test]
    fn json_round_trips() {
        let cfg = StreamConfig::new(22050.0, 2, 2.0);
        let json = cfg.to_json();
        let parsed = StreamConfig::from_json(&json).unwrap();
        assert_eq!(parsed.sample_rate, cfg.sample_rate);
        assert_eq!(parsed.num_channels, cfg.num_channels);
        assert_eq!(parsed.hysteresis, cfg.hysteresis);
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(StreamConfig::from_json("not json").is_err());
    }

    #[test]
    fn legacy_preset_swaps_hysteresis() {
        let cfg = ConfigPreset::LegacyHysteresis.to_config(22050.0, 1, 2.0);
        assert_eq!(cfg.hysteresis.frame_counts(), (8, 12));
        let default_cfg = ConfigPreset::Default.to_config(22050.0, 1, 2.0);
        assert_eq!(default_cfg.hysteresis.frame_counts(), (12, 8));
    }
}
