//! Typed append surface over the per-kind ring buffers.
//!
//! Recording happens synchronously on whatever thread the host polls input
//! from and must never block on the worker threads, so this type only ever
//! touches the slot-locked rings. Deduplication of stored samples happens at
//! query time; the one write-side filter is the resolution change check.

use crate::clock::Clock;
use crate::events::{
    KeyAction, KeySample, LifecycleKind, LifecycleSample, MotionKind, MotionSample,
    ResolutionSample, Sample,
};
use crate::ring::RingBuffer;
use std::sync::Arc;

pub(crate) const MOTION_CAPACITY: usize = 20_000;
pub(crate) const KEY_CAPACITY: usize = 10_000;
pub(crate) const LIFECYCLE_CAPACITY: usize = 100;
pub(crate) const RESOLUTION_CAPACITY: usize = 100;

/// Records host input events into per-kind ring buffers.
pub struct EventRecorder {
    clock: Arc<Clock>,
    motion: RingBuffer<MotionSample>,
    key: RingBuffer<KeySample>,
    lifecycle: RingBuffer<LifecycleSample>,
    resolution: RingBuffer<ResolutionSample>,
}

impl EventRecorder {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            motion: RingBuffer::new(MOTION_CAPACITY),
            key: RingBuffer::new(KEY_CAPACITY),
            lifecycle: RingBuffer::new(LIFECYCLE_CAPACITY),
            resolution: RingBuffer::new(RESOLUTION_CAPACITY),
        }
    }

    /// Record a pointer sample at the host-supplied event time. Times below
    /// one millisecond are clamped: zero marks an unwritten ring slot and
    /// would truncate backward scans.
    pub fn record_motion(&self, event_time: i64, kind: MotionKind, x: f32, y: f32, button: i32) {
        self.motion
            .append(MotionSample::new(event_time.max(1), kind, x, y, button));
    }

    /// Record a key sample at the host-supplied event time, clamped like
    /// [`EventRecorder::record_motion`].
    pub fn record_key(&self, event_time: i64, action: KeyAction, key_code: i32) {
        self.key
            .append(KeySample::new(event_time.max(1), action, key_code));
    }

    /// Record a lifecycle transition, timestamped now.
    pub fn record_lifecycle(&self, kind: LifecycleKind) {
        self.lifecycle
            .append(LifecycleSample::new(self.clock.uptime_millis(), kind));
    }

    /// Record the current geometry if it differs from the last stored
    /// resolution sample. Returns whether a sample was written.
    pub fn record_resolution_if_changed(&self, mut current: ResolutionSample) -> bool {
        if let Some(last) = self.resolution.latest() {
            if last.is_similar(&current) {
                return false;
            }
        }
        current.event_time = self.clock.uptime_millis();
        log::debug!(
            "resolution changed: {}x{} app {}x{} fullscreen={}",
            current.screen_width,
            current.screen_height,
            current.app_width,
            current.app_height,
            current.fullscreen
        );
        self.resolution.append(current);
        true
    }

    /// Most recent resolution sample, for the per-segment meta snapshot.
    pub fn last_resolution(&self) -> Option<ResolutionSample> {
        self.resolution.latest()
    }

    /// Motion samples recorded in `[from, to]`, counted backward from the
    /// newest write and capped at `cap`.
    pub fn count_motion_in(&self, from: i64, to: i64, cap: usize) -> usize {
        self.motion.count_in_range(from, to, cap)
    }

    pub(crate) fn motion_ring(&self) -> &RingBuffer<MotionSample> {
        &self.motion
    }

    pub(crate) fn key_ring(&self) -> &RingBuffer<KeySample> {
        &self.key
    }

    pub(crate) fn lifecycle_ring(&self) -> &RingBuffer<LifecycleSample> {
        &self.lifecycle
    }

    pub(crate) fn resolution_ring(&self) -> &RingBuffer<ResolutionSample> {
        &self.resolution
    }
}
