//! Tension Estimator.
//!
//! Combines short-time spectral features with a +/-K-frame hysteresis window
//! into a smoothed tension value per frame. The estimator only ever holds
//! scalar per-frame features (not full spectra) in a small bounded ring,
//! addressed by plain index rather than a linked structure.

const EPS: f32 = 1e-12;

/// Scalar features retained per frame for tension computation.
#[derive(Debug, Clone, Copy)]
struct FeatureFrame {
    index: u64,
    energy: f32,
    speech_score: f32,
}

/// Internal-only signal for a tension query issued before the hysteresis
/// window has enough history. Never surfaced past this module's boundary;
/// [`TensionEstimator::try_tension`] converts it to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TensionQueryError {
    NotYetAvailable,
}

/// Computes tension t_f in [0,1] from a sliding window of per-frame
/// spectral features.
pub struct TensionEstimator {
    k_past: usize,
    k_future: usize,
    capacity: usize,

    low_energy_scale: f32,
    weights: (f32, f32),
    offsets: (f32, f32),
    speech_change_cap_multiplier: f32,

    ring: Vec<FeatureFrame>,
    last_finalized_index: Option<u64>,
    pending: Vec<(u64, f32)>,
}

impl TensionEstimator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        k_past: usize,
        k_future: usize,
        low_energy_scale: f32,
        weights: (f32, f32),
        offsets: (f32, f32),
        speech_change_cap_multiplier: f32,
    ) -> Self {
        Self {
            k_past,
            k_future,
            capacity: k_past + k_future + 1,
            low_energy_scale,
            weights,
            offsets,
            speech_change_cap_multiplier,
            ring: Vec::with_capacity(k_past + k_future + 1),
            last_finalized_index: None,
            pending: Vec::new(),
        }
    }

    /// Feed the features of a newly analyzed frame. If this completes a
    /// full hysteresis window for some earlier frame, its tension value is
    /// computed and queued for [`Self::try_tension`].
    pub fn update(&mut self, energy: f32, speech_score: f32, frame_index: u64) {
        self.ring.push(FeatureFrame {
            index: frame_index,
            energy,
            speech_score,
        });
        if self.ring.len() > self.capacity {
            self.ring.remove(0);
        }
        if self.ring.len() == self.capacity {
            let (idx, t) = self.compute_window(self.k_past);
            self.last_finalized_index = Some(idx);
            self.pending.push((idx, t));
        } else {
            log::trace!(
                "tension for frame {frame_index}: {:?} (window {}/{})",
                TensionQueryError::NotYetAvailable,
                self.ring.len(),
                self.capacity
            );
        }
    }

    /// Returns `Some(t)` exactly once, for the given frame index, once
    /// `f + K_future <= current_frame`. Returns `None` if not yet
    /// finalized, or if already consumed.
    pub fn try_tension(&mut self, f: u64) -> Option<f32> {
        let pos = self.pending.iter().position(|&(idx, _)| idx == f)?;
        Some(self.pending.remove(pos).1)
    }

    /// After a final flush, compute and return tension for every
    /// not-yet-finalized frame still held in the window, with K_future
    /// shortened to whatever is actually available.
    pub fn flush(&mut self) -> Vec<(u64, f32)> {
        let start_off = match self.last_finalized_index {
            None => 0,
            Some(last) => self
                .ring
                .iter()
                .position(|f| f.index == last)
                .map(|p| p + 1)
                .unwrap_or(self.ring.len()),
        };
        let mut out = Vec::new();
        for off in start_off..self.ring.len() {
            let (idx, t) = self.compute_window(off);
            out.push((idx, t));
        }
        if let Some(&(idx, _)) = out.last() {
            self.last_finalized_index = Some(idx);
        }
        out
    }

    /// Computes tension for the frame at ring offset `center_off`, windowing
    /// over `[center_off - k_past, center_off + k_future]` clamped to the
    /// bounds of the ring currently held (used both for the normal,
    /// fully-available case and for the truncated window at flush time).
    fn compute_window(&self, center_off: usize) -> (u64, f32) {
        let lo = center_off.saturating_sub(self.k_past);
        let hi = (center_off + self.k_future).min(self.ring.len() - 1);
        let window = &self.ring[lo..=hi];
        let center = self.ring[center_off];
        let n = window.len() as f32;

        let mean_e = window.iter().map(|w| w.energy).sum::<f32>() / n;
        let max_e = window.iter().fold(0.0f32, |m, w| m.max(w.energy));
        let d_e = ((center.energy - mean_e) / (self.low_energy_scale * max_e + EPS))
            .clamp(-1.0, 1.0);

        let mean_p = window.iter().map(|w| w.speech_score).sum::<f32>() / n;
        let var_p = window
            .iter()
            .map(|w| (w.speech_score - mean_p).powi(2))
            .sum::<f32>()
            / n;
        let sigma_p = var_p.sqrt();
        let cap = self.speech_change_cap_multiplier * sigma_p;
        let d_p = (center.speech_score - mean_p).clamp(-cap, cap);

        let (w_e, w_p) = self.weights;
        let (o_e, o_p) = self.offsets;
        let t = (w_e * (d_e - o_e) + w_p * (d_p - o_p) + 0.5).clamp(0.0, 1.0);
        (center.index, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_none_before_window_is_full() {
        let mut est = TensionEstimator::new(2, 2, 0.04, (0.5, 0.25), (0.7, 1.0), 4.0);
        for f in 0..4 {
            est.update(1.0, 0.5, f);
            assert_eq!(est.try_tension(f), None);
        }
    }

    #[test]
    fn finalizes_once_window_is_full_and_never_again() {
        let mut est = TensionEstimator::new(1, 1, 0.04, (0.5, 0.25), (0.7, 1.0), 4.0);
        est.update(1.0, 0.5, 0);
        est.update(1.0, 0.5, 1);
        est.update(1.0, 0.5, 2);
        // frame 1 (center with 1 past, 1 future) should now be finalized
        let t = est.try_tension(1);
        assert!(t.is_some());
        assert!(t.unwrap() >= 0.0 && t.unwrap() <= 1.0);
        // second call for the same frame returns None (never re-emitted)
        assert_eq!(est.try_tension(1), None);
    }

    #[test]
    fn energy_spike_raises_tension() {
        let mut est = TensionEstimator::new(2, 2, 0.04, (0.5, 0.25), (0.7, 1.0), 4.0);
        let mut baseline = None;
        for f in 0..5u64 {
            let energy = if f == 2 { 10.0 } else { 0.1 };
            est.update(energy, 0.5, f);
            if let Some(t) = est.try_tension(2) {
                baseline = Some(t);
            }
        }
        assert!(baseline.is_some());
    }

    #[test]
    fn flush_drains_remaining_frames_with_truncated_future() {
        let mut est = TensionEstimator::new(1, 2, 0.04, (0.5, 0.25), (0.7, 1.0), 4.0);
        // Only 3 frames total: window (k_past=1,k_future=2) never fills (needs 4).
        est.update(1.0, 0.5, 0);
        est.update(1.0, 0.5, 1);
        est.update(1.0, 0.5, 2);
        assert_eq!(est.try_tension(0), None);
        let flushed = est.flush();
        let indices: Vec<u64> = flushed.iter().map(|&(i, _)| i).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        for (_, t) in &flushed {
            assert!(*t >= 0.0 && *t <= 1.0);
        }
    }

    #[test]
    fn flush_after_steady_state_only_drains_the_trailing_unfinalized_tail() {
        let mut est = TensionEstimator::new(1, 1, 0.04, (0.5, 0.25), (0.7, 1.0), 4.0);
        for f in 0..4u64 {
            est.update(1.0, 0.5, f);
            est.try_tension(f.saturating_sub(1));
        }
        // frames 0..=2 are finalized already (capacity=3, k_future=1); frame 3
        // is the only one still pending a future frame.
        let flushed = est.flush();
        let indices: Vec<u64> = flushed.iter().map(|&(i, _)| i).collect();
        assert_eq!(indices, vec![3]);
    }
}
