//! SOLA-based time-scale modification engine.
//!
//! Reads pitch-period-sized blocks from a per-channel input ring, cross-fades
//! each block against the previous one with a raised-cosine weight, and
//! writes the result to a per-channel output ring. The ratio of input
//! samples consumed to output samples produced per synthesis step is what
//! actually changes the playback speed: at steady state, advancing by `p`
//! input samples per `p`-sample output block is unity speed; advancing by
//! more (skipping periods) speeds up, advancing by less (repeating a period)
//! slows down.
//!
//! # Audio Thread Safety
//! - Ring buffers and scratch space are allocated once, in `new()`.
//! - `write_float` / `read_float` / the internal synthesis step never allocate.

use crate::pitch::PitchEstimator;
use log::debug;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::f32::consts::PI;

const RING_CAP_MULT: usize = 16;

/// Lifecycle of a [`TsmEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepts writes, opportunistically synthesizes.
    Open,
    /// No more writes accepted; draining remaining partial periods.
    Flushing,
    /// Terminal: no more output will ever be produced.
    Drained,
}

struct Channel {
    input_producer: Producer<f32>,
    input_consumer: Consumer<f32>,
    input_capacity: usize,
    output_producer: Producer<f32>,
    output_consumer: Consumer<f32>,
    output_capacity: usize,
    prev_block: Vec<f32>,
    peek_scratch: Vec<f32>,
}

/// Raised-cosine fade-in weight for a block of length `n`, index `i`.
fn raised_cosine_weight(i: usize, n: usize) -> f32 {
    if n <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * (PI * i as f32 / (n - 1) as f32).cos()
}

/// Per-channel SOLA time-scale modifier, driven by a shared pitch estimate.
pub struct TsmEngine {
    num_channels: usize,
    speed: f32,
    period_advance_acc: f32,
    pitch: PitchEstimator,
    pitch_scratch: Vec<f32>,
    pitch_window: usize,
    channels: Vec<Channel>,
    state: EngineState,
    last_period: usize,
    input_samples_consumed: u64,
    output_samples_produced: u64,
}

impl TsmEngine {
    pub fn new(num_channels: usize, sample_rate: f32, initial_speed: f32) -> Self {
        let pitch = PitchEstimator::new(sample_rate);
        let pitch_window = (pitch.max_period() * 3).max(256);
        let input_cap = (pitch.max_period() * RING_CAP_MULT).max(pitch_window + 1);
        let output_cap = pitch.max_period() * RING_CAP_MULT;

        let channels = (0..num_channels.max(1))
            .map(|_| {
                let (input_producer, input_consumer) = RingBuffer::<f32>::new(input_cap).split();
                let (output_producer, output_consumer) = RingBuffer::<f32>::new(output_cap).split();
                Channel {
                    input_producer,
                    input_consumer,
                    input_capacity: input_cap,
                    output_producer,
                    output_consumer,
                    output_capacity: output_cap,
                    prev_block: Vec::new(),
                    peek_scratch: vec![0.0; pitch.max_period()],
                }
            })
            .collect();

        Self {
            num_channels: num_channels.max(1),
            speed: initial_speed,
            period_advance_acc: 0.0,
            pitch,
            pitch_scratch: vec![0.0; pitch_window],
            pitch_window,
            channels,
            state: EngineState::Open,
            last_period: 0,
            input_samples_consumed: 0,
            output_samples_produced: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn last_period(&self) -> usize {
        self.last_period
    }

    pub fn input_samples_consumed(&self) -> u64 {
        self.input_samples_consumed
    }

    pub fn output_samples_produced(&self) -> u64 {
        self.output_samples_produced
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    /// Writes interleaved samples, `samples_per_channel` frames' worth, into
    /// the per-channel input rings and opportunistically runs synthesis
    /// steps. Returns the number of frames actually accepted.
    pub fn write_float(&mut self, interleaved: &[f32], samples_per_channel: usize) -> usize {
        if self.state != EngineState::Open {
            return 0;
        }
        let n = self.num_channels;
        let free_frames = self
            .channels
            .iter()
            .map(|c| c.input_capacity - c.input_consumer.len())
            .min()
            .unwrap_or(0);
        let accepted = samples_per_channel.min(free_frames);
        for frame in 0..accepted {
            for (c, channel) in self.channels.iter_mut().enumerate() {
                let sample = interleaved[frame * n + c];
                let _ = channel.input_producer.push(sample);
            }
        }
        self.run_steps();
        accepted
    }

    /// Drains up to `max_samples_per_channel` frames of synthesized output
    /// into `out` (interleaved), returning the number of frames produced.
    pub fn read_float(&mut self, out: &mut [f32], max_samples_per_channel: usize) -> usize {
        let available = self.samples_available().min(max_samples_per_channel);
        let n = self.num_channels;
        for (c, channel) in self.channels.iter_mut().enumerate() {
            for (i, v) in channel.output_consumer.iter().take(available).enumerate() {
                out[i * n + c] = *v;
            }
            channel.output_consumer.discard(available);
        }
        self.maybe_finish_draining();
        available
    }

    pub fn samples_available(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.output_consumer.len())
            .min()
            .unwrap_or(0)
    }

    /// Stop accepting writes and drain whatever partial periods remain.
    pub fn flush(&mut self) {
        if self.state == EngineState::Open {
            self.state = EngineState::Flushing;
            debug!("engine state transition: Open -> Flushing");
        }
        self.run_steps();
    }

    fn min_channel_input_len(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.input_consumer.len())
            .min()
            .unwrap_or(0)
    }

    /// Runs synthesis steps until input is exhausted (relative to the
    /// lookahead required by the current mode) or the output ring has no
    /// more room.
    fn run_steps(&mut self) {
        while self.try_step() {}
        self.maybe_finish_draining();
    }

    /// Re-checks the Flushing -> Drained condition. Called both after a
    /// batch of synthesis steps and from `read_float`, since a drain loop
    /// may keep pulling output long after the last step ran.
    fn maybe_finish_draining(&mut self) {
        if self.state == EngineState::Flushing
            && self.min_channel_input_len() < self.pitch.min_period().max(1)
            && self.samples_available() == 0
        {
            self.state = EngineState::Drained;
            debug!("engine state transition: Flushing -> Drained");
        }
    }

    fn try_step(&mut self) -> bool {
        let available = self.min_channel_input_len();
        if available == 0 {
            return false;
        }

        let peek_len = available.min(self.pitch_window);
        for (i, v) in self.channels[0].input_consumer.iter().take(peek_len).enumerate() {
            self.pitch_scratch[i] = *v;
        }
        let p_raw = self.pitch.estimate(&self.pitch_scratch[..peek_len]);
        let p = p_raw.max(1).min(available);

        let flushing = self.state == EngineState::Flushing;
        if !flushing && available < 2 * p {
            return false;
        }
        if available < p {
            return false;
        }

        let output_room = self
            .channels
            .iter()
            .map(|c| c.output_capacity - c.output_consumer.len())
            .min()
            .unwrap_or(0);
        if output_room < p {
            return false;
        }

        for channel in &mut self.channels {
            for (i, v) in channel.input_consumer.iter().take(p).enumerate() {
                channel.peek_scratch[i] = *v;
            }
            let curr = &channel.peek_scratch[..p];

            let mut block = vec![0.0f32; p];
            if channel.prev_block.len() == p {
                for i in 0..p {
                    let w = raised_cosine_weight(i, p);
                    block[i] = channel.prev_block[i] * (1.0 - w) + curr[i] * w;
                }
            } else {
                block.copy_from_slice(curr);
            }
            for &s in &block {
                let _ = channel.output_producer.push(s);
            }
            channel.prev_block = curr.to_vec();
        }

        self.period_advance_acc += self.speed;
        let whole_periods = self.period_advance_acc.floor().max(0.0) as usize;
        self.period_advance_acc -= whole_periods as f32;
        let advance = (whole_periods * p).min(available);

        for channel in &mut self.channels {
            channel.input_consumer.discard(advance);
        }

        self.last_period = p;
        self.input_samples_consumed += advance as u64;
        self.output_samples_produced += p as u64;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI as PIF;

    fn sine(n: usize, freq: f32, sr: f32) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PIF * freq * i as f32 / sr).sin())
            .collect()
    }

    /// Writes `input` through `engine` in bounded chunks, draining whatever
    /// output is available after each chunk so the rings never have to hold
    /// more than a chunk's worth at once. Mirrors the documented short-write
    /// contract: a partial accept means "drain, then resubmit the rest".
    fn write_all_chunked(
        engine: &mut TsmEngine,
        channels: usize,
        input: &[f32],
        chunk_frames: usize,
        drain_into: &mut Vec<f32>,
    ) {
        let total_frames = input.len() / channels;
        let mut offset = 0;
        let mut buf = vec![0.0f32; 4096 * channels];
        while offset < total_frames {
            let end = (offset + chunk_frames).min(total_frames);
            let accepted = engine.write_float(&input[offset * channels..], end - offset);
            offset += accepted;
            loop {
                let buf_frames = buf.len() / channels;
                let got = engine.read_float(&mut buf, buf_frames);
                if got == 0 {
                    break;
                }
                drain_into.extend_from_slice(&buf[..got * channels]);
            }
            if accepted == 0 {
                break;
            }
        }
    }

    #[test]
    fn unity_speed_roughly_preserves_duration() {
        let sr = 22050.0;
        let mut engine = TsmEngine::new(1, sr, 1.0);
        let input = sine(8000, 150.0, sr);
        let mut out = Vec::new();
        write_all_chunked(&mut engine, 1, &input, 1024, &mut out);
        engine.flush();
        let mut buf = vec![0.0f32; 4096];
        loop {
            let buf_len = buf.len();
            let n = engine.read_float(&mut buf, buf_len);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        let ratio = out.len() as f32 / input.len() as f32;
        assert!((ratio - 1.0).abs() < 0.2, "ratio {ratio} not close to 1.0");
    }

    #[test]
    fn speedup_shortens_output() {
        let sr = 22050.0;
        let mut engine = TsmEngine::new(1, sr, 2.0);
        let input = sine(8000, 150.0, sr);
        let mut out = Vec::new();
        write_all_chunked(&mut engine, 1, &input, 1024, &mut out);
        engine.flush();
        let mut buf = vec![0.0f32; 4096];
        loop {
            let buf_len = buf.len();
            let n = engine.read_float(&mut buf, buf_len);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert!((out.len() as f32) < input.len() as f32 * 0.75);
    }

    #[test]
    fn slowdown_lengthens_output() {
        let sr = 22050.0;
        let mut engine = TsmEngine::new(1, sr, 0.5);
        let input = sine(8000, 150.0, sr);
        let mut out = Vec::new();
        write_all_chunked(&mut engine, 1, &input, 1024, &mut out);
        engine.flush();
        let mut buf = vec![0.0f32; 4096];
        loop {
            let buf_len = buf.len();
            let n = engine.read_float(&mut buf, buf_len);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert!((out.len() as f32) > input.len() as f32 * 1.25);
    }

    #[test]
    fn flush_eventually_drains_to_empty() {
        let sr = 22050.0;
        let mut engine = TsmEngine::new(1, sr, 1.5);
        let input = sine(4000, 150.0, sr);
        engine.write_float(&input, input.len());
        engine.flush();
        let mut out = vec![0.0f32; 1];
        let mut iterations = 0;
        while engine.read_float(&mut out, 1) > 0 {
            iterations += 1;
            assert!(iterations < 1_000_000, "flush never drained");
        }
        assert_eq!(engine.state(), EngineState::Drained);
    }

    #[test]
    fn stereo_channels_stay_in_lockstep() {
        let sr = 22050.0;
        let mut engine = TsmEngine::new(2, sr, 1.3);
        let mono = sine(6000, 150.0, sr);
        let interleaved: Vec<f32> = mono.iter().flat_map(|&s| [s, -s]).collect();
        let mut out = Vec::new();
        write_all_chunked(&mut engine, 2, &interleaved, 1024, &mut out);
        engine.flush();
        let mut buf = vec![0.0f32; 4096];
        loop {
            let buf_frames = buf.len() / 2;
            let n = engine.read_float(&mut buf, buf_frames);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n * 2]);
        }
        let total = out.len() / 2;
        for i in 0..total {
            assert!((out[i * 2] + out[i * 2 + 1]).abs() < 1e-4);
        }
    }
}
