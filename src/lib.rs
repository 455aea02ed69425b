//! Nonlinear speech time-scale modification.
//!
//! Speeds up or slows down speech-like audio by a target factor while
//! stretching vowels and quiet stretches more aggressively than consonants
//! and transient onsets, instead of resampling uniformly. An Analyzer
//! (frame slicer, spectral front-end, tension estimator) drives a Speed
//! Controller, which in turn steers a SOLA-based overlap-add engine.
//!
//! ```no_run
//! use speedy_tsm::{ConfigPreset, Stream};
//!
//! let config = ConfigPreset::Default.to_config(22050.0, 1, 2.0);
//! let (mut stream, telemetry) = Stream::new(config).unwrap();
//! stream.write_float(&[0.0f32; 4410]).unwrap();
//! stream.flush();
//! let mut out = vec![0.0f32; 4410];
//! let produced = stream.read_float(&mut out, out.len());
//! assert!(telemetry.current_speed() > 0.0);
//! let _ = produced;
//! ```

mod config;
mod error;
mod frame;
mod pitch;
mod speed;
mod spectral;
mod stream;
mod telemetry;
mod tension;
mod tsm;

pub use config::{ConfigPreset, HysteresisOrder, StreamConfig, FRAME_RATE_HZ};
pub use error::{TsmError, TsmResult};
pub use stream::Stream;
pub use telemetry::StreamTelemetry;
pub use tsm::EngineState;

/// Fixed analysis rate: 100 Hz.
pub fn frame_rate() -> f32 {
    FRAME_RATE_HZ
}

/// Analysis frame size in samples for a given sample rate:
/// `2 * round(1.5 * sample_rate / 100)`.
pub fn fft_size(sample_rate: f32) -> usize {
    config::fft_size(sample_rate)
}
