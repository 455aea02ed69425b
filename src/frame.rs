//! Frame Slicer.
//!
//! Maintains a sliding window over a mono mixdown of the input and emits
//! pre-emphasized, Hann-windowed frames of size N at a stride of S = SR/100
//! samples (not N) - i.e. frames overlap.
//!
//! # Audio Thread Safety
//! - All buffers are pre-allocated in `new()`
//! - No allocations during `push()` / `try_frame()`

use ringbuf::{Consumer, Producer, RingBuffer};
use std::f32::consts::PI;

/// Ring buffer capacity multiplier relative to frame size; gives enough
/// headroom that `push` essentially never short-writes during normal use.
const RINGBUF_CAP_MULT: usize = 4;

/// An immutable, pre-emphasized and windowed frame of N samples, tagged
/// with the frame index it corresponds to.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub samples: Vec<f32>,
}

fn hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (n - 1) as f32).cos())
        .collect()
}

/// Slices a mono stream into overlapping analysis frames.
pub struct FrameSlicer {
    frame_size: usize,
    step: usize,
    window: Vec<f32>,
    preemphasis_alpha: f32,

    producer: Producer<f32>,
    consumer: Consumer<f32>,

    /// Pre-emphasis filter state: the previous raw sample, persists across frames.
    preemphasis_prev: f32,
    next_frame_index: u64,
    scratch: Vec<f32>,

    flushed: bool,
}

impl FrameSlicer {
    pub fn new(frame_size: usize, step: usize, preemphasis_alpha: f32) -> Self {
        let cap = (frame_size * RINGBUF_CAP_MULT).max(frame_size + 1);
        let (producer, consumer) = RingBuffer::<f32>::new(cap).split();
        Self {
            frame_size,
            step,
            window: hann_window(frame_size),
            preemphasis_alpha,
            producer,
            consumer,
            preemphasis_prev: 0.0,
            next_frame_index: 0,
            scratch: vec![0.0; frame_size],
            flushed: false,
        }
    }

    /// Push mono samples into the slicer's ring buffer. Returns the number
    /// of samples actually accepted (short-writes if the ring is full).
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let mut written = 0;
        for &s in samples {
            if self.producer.push(s).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Produce the next frame if enough samples have accumulated past the
    /// read cursor, advancing the cursor by `step` (not `frame_size`).
    pub fn try_frame(&mut self) -> Option<Frame> {
        if self.consumer.len() < self.frame_size {
            return None;
        }
        for (i, v) in self.consumer.iter().take(self.frame_size).enumerate() {
            self.scratch[i] = *v;
        }
        let raw = self.scratch.clone();
        let frame = self.finalize_frame(&raw);
        self.consumer.discard(self.step.min(self.consumer.len()));
        Some(frame)
    }

    /// Drain the final, zero-padded tail frame (if any real samples remain)
    /// and mark the slicer as flushed; subsequent `try_frame` calls return None.
    pub fn flush(&mut self) -> Option<Frame> {
        if self.flushed {
            return None;
        }
        self.flushed = true;
        let remaining = self.consumer.len();
        if remaining == 0 {
            return None;
        }
        let mut tail = vec![0.0f32; self.frame_size];
        for (i, v) in self.consumer.iter().take(self.frame_size).enumerate() {
            tail[i] = *v;
        }
        self.consumer.discard(remaining);
        Some(self.finalize_frame(&tail))
    }

    fn finalize_frame(&mut self, raw: &[f32]) -> Frame {
        let mut samples = vec![0.0f32; self.frame_size];
        for i in 0..self.frame_size {
            let emphasized = raw[i] - self.preemphasis_alpha * self.preemphasis_prev;
            self.preemphasis_prev = raw[i];
            samples[i] = emphasized * self.window[i];
        }
        let index = self.next_frame_index;
        self.next_frame_index += 1;
        Frame { index, samples }
    }
}

/// Mixes down an interleaved multi-channel block to mono by averaging channels.
pub fn mixdown_mono(interleaved: &[f32], num_channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if num_channels == 0 {
        return;
    }
    out.reserve(interleaved.len() / num_channels);
    for frame in interleaved.chunks_exact(num_channels) {
        let sum: f32 = frame.iter().sum();
        out.push(sum / num_channels as f32);
    }
}
