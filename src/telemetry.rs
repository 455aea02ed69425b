//! Lock-free telemetry snapshot for a running stream.
//!
//! Mirrors the corpus's atomic-meter pattern: a cheaply clonable handle of
//! plain atomics, written only by the thread driving the stream and safe to
//! poll from anywhere else without blocking either side.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::tsm::EngineState;

fn state_to_u8(state: EngineState) -> u8 {
    match state {
        EngineState::Open => 0,
        EngineState::Flushing => 1,
        EngineState::Drained => 2,
    }
}

fn state_from_u8(v: u8) -> EngineState {
    match v {
        1 => EngineState::Flushing,
        2 => EngineState::Drained,
        _ => EngineState::Open,
    }
}

struct TelemetryInner {
    current_speed: AtomicU32,
    drift_samples: AtomicU64,
    last_tension: AtomicU32,
    pitch_period: AtomicU32,
    state: AtomicU8,
}

/// `Send + Sync` handle onto a stream's live state. Reads never block and
/// never allocate.
#[derive(Clone)]
pub struct StreamTelemetry {
    inner: Arc<TelemetryInner>,
}

impl StreamTelemetry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                current_speed: AtomicU32::new(1.0f32.to_bits()),
                drift_samples: AtomicU64::new(0),
                last_tension: AtomicU32::new(0.5f32.to_bits()),
                pitch_period: AtomicU32::new(0),
                state: AtomicU8::new(state_to_u8(EngineState::Open)),
            }),
        }
    }

    pub fn current_speed(&self) -> f32 {
        f32::from_bits(self.inner.current_speed.load(Ordering::Relaxed))
    }

    pub fn drift_samples(&self) -> f64 {
        f64::from_bits(self.inner.drift_samples.load(Ordering::Relaxed))
    }

    pub fn last_tension(&self) -> f32 {
        f32::from_bits(self.inner.last_tension.load(Ordering::Relaxed))
    }

    pub fn pitch_period(&self) -> u32 {
        self.inner.pitch_period.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> EngineState {
        state_from_u8(self.inner.state.load(Ordering::Relaxed))
    }

    pub(crate) fn set_current_speed(&self, speed: f32) {
        self.inner.current_speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_drift_samples(&self, drift: f64) {
        self.inner.drift_samples.store(drift.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_last_tension(&self, tension: f32) {
        self.inner.last_tension.store(tension.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_pitch_period(&self, period: usize) {
        self.inner.pitch_period.store(period as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        self.inner.state.store(state_to_u8(state), Ordering::Relaxed);
    }
}
