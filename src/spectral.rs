//! Spectral Front-End.
//!
//! Performs a real-valued FFT of each frame and derives the per-frame scalar
//! features the Tension Estimator needs: total energy, low-band energy, and
//! a speech-likeness score. No state persists across frames here; all state
//! lives in the Tension Estimator.
//!
//! The FFT itself is the one extension point in this module: it sits behind
//! the [`RealSpectrumTransform`] trait so any real FFT implementation can be
//! substituted without touching the feature derivation below.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Speech-relevant band used to weight the speech-likeness score (Hz).
const SPEECH_BAND_LOW_HZ: f32 = 250.0;
const SPEECH_BAND_HIGH_HZ: f32 = 4000.0;
/// Low-band cutoff used for `energy_lo` (~1 kHz).
const LOW_BAND_HZ: f32 = 1000.0;

/// Per-frame derived spectral features.
#[derive(Debug, Clone)]
pub struct Spectrum {
    /// Non-negative magnitudes, N/2 bins.
    pub magnitudes: Vec<f32>,
    /// Total energy E_f = sum(m_k^2).
    pub energy: f32,
    /// Low-band energy E_lo,f (below ~1 kHz).
    pub energy_lo: f32,
    /// Speech-likeness score P_f in [0, 1].
    pub speech_score: f32,
}

/// Minimal interface a real FFT implementation must provide: given N real
/// samples, produce N/2 magnitudes (bins 0..N/2, DC through just-below-Nyquist).
pub trait RealSpectrumTransform {
    fn forward_real(&mut self, frame: &[f32], magnitudes_out: &mut [f32]);
}

/// `RealSpectrumTransform` backed by `rustfft`, padding real input into the
/// imaginary-zero complex plane (single precision throughout).
pub struct RustFftTransform {
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    size: usize,
}

impl RustFftTransform {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        Self {
            fft,
            scratch: vec![Complex::new(0.0, 0.0); size],
            size,
        }
    }
}

impl RealSpectrumTransform for RustFftTransform {
    fn forward_real(&mut self, frame: &[f32], magnitudes_out: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.size);
        debug_assert_eq!(magnitudes_out.len(), self.size / 2);
        for (i, &s) in frame.iter().enumerate() {
            self.scratch[i] = Complex::new(s, 0.0);
        }
        self.fft.process(&mut self.scratch);
        for (k, out) in magnitudes_out.iter_mut().enumerate() {
            *out = self.scratch[k].norm();
        }
    }
}

/// Analyzes windowed frames into [`Spectrum`]s.
pub struct SpectralFrontEnd {
    transform: Box<dyn RealSpectrumTransform + Send>,
    frame_size: usize,
    bin_lo_low: usize,
    bin_lo_high: usize,
    speech_bin_lo: usize,
    speech_bin_hi: usize,
    bin_threshold_divisor: f32,
    scratch_mag: Vec<f32>,
}

impl SpectralFrontEnd {
    pub fn new(frame_size: usize, sample_rate: f32, bin_threshold_divisor: f32) -> Self {
        let bins = frame_size / 2;
        let hz_per_bin = sample_rate / frame_size as f32;
        let bin_lo_high = ((LOW_BAND_HZ / hz_per_bin).round() as usize).min(bins);
        let speech_bin_lo = ((SPEECH_BAND_LOW_HZ / hz_per_bin).round() as usize).min(bins);
        let speech_bin_hi = ((SPEECH_BAND_HIGH_HZ / hz_per_bin).round() as usize).min(bins);
        Self {
            transform: Box::new(RustFftTransform::new(frame_size)),
            frame_size,
            bin_lo_low: 0,
            bin_lo_high,
            speech_bin_lo,
            speech_bin_hi: speech_bin_hi.max(speech_bin_lo),
            bin_threshold_divisor: bin_threshold_divisor.max(1.0),
            scratch_mag: vec![0.0; bins],
        }
    }

    /// Swap in a different real FFT implementation (the one extension point
    /// of this module - see SS9's "Dynamic dispatch" note).
    pub fn with_transform(mut self, transform: Box<dyn RealSpectrumTransform + Send>) -> Self {
        self.transform = transform;
        self
    }

    pub fn analyze(&mut self, frame: &[f32]) -> Spectrum {
        debug_assert_eq!(frame.len(), self.frame_size);
        self.transform.forward_real(frame, &mut self.scratch_mag);

        let mut energy = 0.0f32;
        let mut energy_lo = 0.0f32;
        for (k, &m) in self.scratch_mag.iter().enumerate() {
            let p = m * m;
            energy += p;
            if k >= self.bin_lo_low && k < self.bin_lo_high {
                energy_lo += p;
            }
        }

        let theta = energy / self.bin_threshold_divisor;
        let mut speech_energy = 0.0f32;
        for k in self.speech_bin_lo..self.speech_bin_hi {
            let p = self.scratch_mag[k] * self.scratch_mag[k];
            if p > theta {
                speech_energy += p;
            }
        }
        let speech_score = (speech_energy / (energy + 1e-12)).clamp(0.0, 1.0);

        Spectrum {
            magnitudes: self.scratch_mag.clone(),
            energy,
            energy_lo,
            speech_score,
        }
    }
}
