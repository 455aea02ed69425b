//! Pitch period estimation for the TSM engine's overlap-add synthesis.
//!
//! Independent of the Tension Estimator's speech-likeness features: this
//! module only cares about finding a usable period to cross-fade on, not
//! about whether the signal is "speech" in any semantic sense.
//!
//! Uses the average magnitude difference function (AMDF): for each
//! candidate lag, the mean absolute difference between the window and
//! itself shifted by that lag. A true period produces a pronounced dip;
//! the depth of that dip relative to the function's range is the voicing
//! decision.

/// A lag whose AMDF dip is shallower than this fraction of the function's
/// range is treated as unvoiced.
const VOICING_DIP_RATIO: f32 = 0.6;

/// Estimates a per-block pitch period in samples, in the 60-400 Hz range,
/// falling back to a fixed ~100 Hz period when the block is not clearly
/// periodic.
pub struct PitchEstimator {
    min_period: usize,
    max_period: usize,
    fallback_period: usize,
    amdf: Vec<f32>,
}

impl PitchEstimator {
    pub fn new(sample_rate: f32) -> Self {
        let min_period = (sample_rate / 400.0).round().max(1.0) as usize;
        let max_period = (sample_rate / 60.0).round().max(min_period as f32 + 1.0) as usize;
        let fallback_period = (sample_rate / 100.0).round().max(1.0) as usize;
        Self {
            min_period,
            max_period,
            fallback_period,
            amdf: vec![0.0; max_period - min_period + 1],
        }
    }

    /// Fixed period used when a block is unvoiced (~100 Hz).
    pub fn fallback_period(&self) -> usize {
        self.fallback_period
    }

    /// Lowest period this estimator will report as voiced (~400 Hz).
    pub fn min_period(&self) -> usize {
        self.min_period
    }

    /// Highest period this estimator will report as voiced (~60 Hz).
    pub fn max_period(&self) -> usize {
        self.max_period
    }

    /// Estimate the pitch period of `samples`, in samples. `samples` should
    /// span at least `max_period` beyond the analysis window used for the
    /// comparison; shorter input falls back immediately.
    pub fn estimate(&mut self, samples: &[f32]) -> usize {
        if samples.len() <= self.max_period + self.min_period {
            return self.fallback_period;
        }
        let usable = samples.len() - self.max_period;
        for (i, lag) in (self.min_period..=self.max_period).enumerate() {
            let mut sum = 0.0f32;
            for t in 0..usable {
                sum += (samples[t] - samples[t + lag]).abs();
            }
            self.amdf[i] = sum / usable as f32;
        }

        let (min_idx, &min_val) = self
            .amdf
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .expect("amdf is non-empty by construction");
        let max_val = self.amdf.iter().cloned().fold(0.0f32, f32::max);

        let voiced = max_val > 1e-6 && (min_val / max_val) < VOICING_DIP_RATIO;
        if voiced {
            self.min_period + min_idx
        } else {
            log::trace!("pitch: no periodicity found, falling back to {}", self.fallback_period);
            self.fallback_period
        }
    }
}
