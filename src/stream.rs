//! The public streaming API: wires the Analyzer (frame slicer, spectral
//! front-end, tension estimator) to the Speed Controller and SOLA engine.

use crate::config::StreamConfig;
use crate::error::{TsmError, TsmResult};
use crate::frame::{mixdown_mono, FrameSlicer};
use crate::speed::SpeedController;
use crate::spectral::SpectralFrontEnd;
use crate::telemetry::StreamTelemetry;
use crate::tension::TensionEstimator;
use crate::tsm::{EngineState, TsmEngine};
use log::{debug, info, warn};

const INT16_SCALE: f32 = 32768.0;

/// A one-way audio stream: feed it interleaved PCM, read back time-scaled
/// PCM. Owns every buffer it touches; dropping it releases everything.
pub struct Stream {
    config: StreamConfig,
    frame_slicer: FrameSlicer,
    spectral: SpectralFrontEnd,
    tension: TensionEstimator,
    speed: SpeedController,
    tsm: TsmEngine,
    telemetry: StreamTelemetry,

    mono_scratch: Vec<f32>,
    int16_scratch: Vec<f32>,

    speed_callback_enabled: bool,
    speed_observer: Option<Box<dyn FnMut(u64, f32) + Send>>,

    /// Documented no-op: incidental pitch shift independent of speed is a
    /// non-goal. Stored only so `set_rate`/`get_rate` round-trip.
    pitch_rate: f32,
}

impl Stream {
    pub fn new(config: StreamConfig) -> TsmResult<(Stream, StreamTelemetry)> {
        config.validate()?;

        let frame_size = config.fft_size();
        let step = config.frame_step();
        let (k_past, k_future) = config.hysteresis.frame_counts();

        let frame_slicer = FrameSlicer::new(frame_size, step, config.preemphasis_factor);
        let spectral = SpectralFrontEnd::new(frame_size, config.sample_rate, config.bin_threshold_divisor);
        let tension = TensionEstimator::new(
            k_past,
            k_future,
            config.low_energy_threshold_scale,
            config.tension_weights,
            config.tension_offsets,
            config.speech_change_cap_multiplier,
        );
        let speed = SpeedController::new(
            config.target_speed,
            config.nonlinear_factor,
            config.duration_feedback,
            config.frame_step() as f64,
        );
        let tsm = TsmEngine::new(config.num_channels as usize, config.sample_rate, config.target_speed);
        let telemetry = StreamTelemetry::new();
        telemetry.set_current_speed(config.target_speed);

        let stream = Stream {
            config,
            frame_slicer,
            spectral,
            tension,
            speed,
            tsm,
            telemetry: telemetry.clone(),
            mono_scratch: Vec::new(),
            int16_scratch: Vec::new(),
            speed_callback_enabled: false,
            speed_observer: None,
            pitch_rate: 1.0,
        };
        debug!(
            "stream opened: {} Hz, {} channel(s), target speed {:.2}x, hysteresis {:?}",
            stream.config.sample_rate, stream.config.num_channels, stream.config.target_speed, stream.config.hysteresis
        );
        Ok((stream, telemetry))
    }

    pub fn telemetry(&self) -> StreamTelemetry {
        self.telemetry.clone()
    }

    fn state(&self) -> EngineState {
        self.tsm.state()
    }

    /// Runs the Analyzer over every fully available frame, feeding finalized
    /// tension values to the Speed Controller and the resulting speed into
    /// the TSM engine.
    fn drive_analysis(&mut self) {
        while let Some(frame) = self.frame_slicer.try_frame() {
            self.analyze_and_steer(frame.index, &frame.samples);
        }
    }

    fn analyze_and_steer(&mut self, frame_index: u64, samples: &[f32]) {
        let spectrum = self.spectral.analyze(samples);
        self.tension.update(spectrum.energy, spectrum.speech_score, frame_index);
        let (_, k_future) = self.config.hysteresis.frame_counts();
        let finalized = frame_index.saturating_sub(k_future as u64);
        if let Some(t) = self.tension.try_tension(finalized) {
            self.apply_tension(finalized, t);
        }
    }

    fn apply_tension(&mut self, frame_index: u64, tension: f32) {
        let s = self.speed.speed_for(tension, frame_index);
        self.tsm.set_speed(s);
        self.telemetry.set_last_tension(tension);
        self.telemetry.set_current_speed(s);
        if self.speed_callback_enabled {
            if let Some(observer) = self.speed_observer.as_mut() {
                observer(frame_index, s);
            }
        }
    }

    fn sync_telemetry(&mut self) {
        self.telemetry.set_pitch_period(self.tsm.last_period());
        self.telemetry.set_state(self.tsm.state());
        self.speed.record_io(self.tsm.output_samples_produced() as usize);
        self.telemetry.set_drift_samples(self.speed.drift_samples());
    }

    /// Writes interleaved float samples, `samples_per_channel` frames' worth.
    /// Returns the number of frames actually accepted (a short-write means
    /// the internal rings are full; drain with `read_float` and resubmit).
    pub fn write_float(&mut self, interleaved: &[f32]) -> TsmResult<usize> {
        if self.state() != EngineState::Open {
            warn!("write_float called in state {:?}", self.state());
            return Err(TsmError::InvalidState {
                reason: "write_float called after flush",
            });
        }
        let n = self.config.num_channels as usize;
        let frames = interleaved.len() / n;
        let accepted = self.tsm.write_float(interleaved, frames);
        if accepted < frames {
            warn!("short write: accepted {accepted} of {frames} frames, rings are full");
        }

        mixdown_mono(&interleaved[..accepted * n], n, &mut self.mono_scratch);
        let pushed = self.frame_slicer.push(&self.mono_scratch);
        if pushed < self.mono_scratch.len() {
            warn!(
                "analyzer dropped {} of {} mono samples, frame slicer ring is full",
                self.mono_scratch.len() - pushed,
                self.mono_scratch.len()
            );
        }
        self.drive_analysis();
        self.sync_telemetry();
        Ok(accepted)
    }

    /// Reads up to `max_samples_per_channel` frames of time-scaled output,
    /// interleaved. Returns 0 when dry.
    pub fn read_float(&mut self, out: &mut [f32], max_samples_per_channel: usize) -> usize {
        let n = self.tsm.read_float(out, max_samples_per_channel);
        self.sync_telemetry();
        n
    }

    /// Int16-affine variant of `write_float`, scaled by 2^15 at the boundary.
    pub fn write_int16(&mut self, interleaved: &[i16]) -> TsmResult<usize> {
        self.int16_scratch.clear();
        self.int16_scratch
            .extend(interleaved.iter().map(|&s| s as f32 / INT16_SCALE));
        let samples = std::mem::take(&mut self.int16_scratch);
        let result = self.write_float(&samples);
        self.int16_scratch = samples;
        result
    }

    /// Int16-affine variant of `read_float`, scaled by 2^15 at the boundary.
    pub fn read_int16(&mut self, out: &mut [i16], max_samples_per_channel: usize) -> usize {
        let n = self.config.num_channels as usize;
        let mut float_buf = vec![0.0f32; out.len()];
        let produced = self.read_float(&mut float_buf, max_samples_per_channel);
        for i in 0..produced * n {
            out[i] = (float_buf[i] * INT16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
        produced
    }

    /// Stop accepting writes and drain whatever the Analyzer and TSM engine
    /// can still finalize from already-buffered input.
    pub fn flush(&mut self) {
        if self.state() == EngineState::Drained {
            return;
        }
        info!("stream flushing, {} samples still buffered", self.tsm.samples_available());
        if let Some(tail) = self.frame_slicer.flush() {
            self.analyze_and_steer(tail.index, &tail.samples);
        }
        for (frame_index, t) in self.tension.flush() {
            self.apply_tension(frame_index, t);
        }
        self.tsm.flush();
        self.sync_telemetry();
    }

    pub fn samples_available(&self) -> usize {
        self.tsm.samples_available()
    }

    pub fn set_speed(&mut self, rg: f32) -> TsmResult<()> {
        self.speed.set_target_speed(rg)
    }

    pub fn get_speed(&self) -> f32 {
        self.speed.target_speed()
    }

    /// Incidental pitch-rate knob; a documented no-op pass-through (see
    /// Non-goals: pitch shifting independent of speed).
    pub fn set_rate(&mut self, pitch_rate: f32) {
        self.pitch_rate = pitch_rate;
    }

    pub fn get_rate(&self) -> f32 {
        self.pitch_rate
    }

    pub fn enable_nonlinear(&mut self, lambda: f32) -> TsmResult<()> {
        self.speed.set_nonlinear_factor(lambda)
    }

    pub fn set_duration_feedback(&mut self, feedback: f32) -> TsmResult<()> {
        self.speed.set_duration_feedback(feedback)
    }

    pub fn enable_speed_callback(&mut self) {
        self.speed_callback_enabled = true;
    }

    pub fn drain_speed_profile(&mut self) -> Vec<(u64, f32)> {
        self.speed.drain_speed_profile()
    }

    /// Registers a callback invoked inline, from `write_float`/`flush`, as
    /// each speed value finalizes. Must not re-enter the stream.
    pub fn set_speed_observer(&mut self, observer: Box<dyn FnMut(u64, f32) + Send>) {
        self.speed_observer = Some(observer);
        self.speed_callback_enabled = true;
    }
}
