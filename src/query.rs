//! Segment window queries over the ring buffers.
//!
//! Pulls the motion stream first, tightens the window to the observed motion
//! activity, then bounds the key, lifecycle and resolution queries by that
//! tightened window so the exported streams correlate. Consecutive
//! structurally-identical samples collapse to the earliest occurrence, and
//! timestamps are rebased onto the segment start.

use crate::config::QueryLimits;
use crate::events::Sample;
use crate::recorder::EventRecorder;

/// Exported event sequences for one segment window, as positional numeric
/// tuples ready for serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventExport {
    pub motion: Vec<Vec<f64>>,
    pub key: Vec<Vec<f64>>,
    pub lifecycle: Vec<Vec<f64>>,
    pub resolution: Vec<Vec<f64>>,
}

/// Query all event kinds over `[from, to]` and assemble the export
/// sequences for a finalized segment.
pub fn query_events(
    recorder: &EventRecorder,
    from: i64,
    to: i64,
    limits: &QueryLimits,
) -> EventExport {
    let mut motion = recorder.motion_ring().snapshot_backward(from, to, limits.motion);
    motion.reverse();

    // Tighten the window to the observed motion activity; fall back to the
    // full window when no motion was recorded.
    let (first_motion, last_motion) = match (motion.first(), motion.last()) {
        (Some(first), Some(last)) => (first.event_time(), last.event_time()),
        _ => (from, to),
    };

    let mut key = recorder
        .key_ring()
        .snapshot_backward(first_motion, to, limits.key);
    key.reverse();

    let mut lifecycle = recorder
        .lifecycle_ring()
        .snapshot_backward(first_motion, last_motion, limits.lifecycle);
    lifecycle.reverse();

    let mut resolution = recorder
        .resolution_ring()
        .snapshot_backward(from, last_motion, limits.resolution);
    resolution.reverse();

    EventExport {
        motion: export_sequence(motion, from),
        key: export_sequence(key, from),
        lifecycle: export_sequence(lifecycle, from),
        resolution: export_sequence(resolution, from),
    }
}

/// Drop consecutive duplicates (keeping the earliest of each run), rebase
/// event times onto `from` and floor at zero, and flatten to wire tuples.
fn export_sequence<T: Sample>(samples: Vec<T>, from: i64) -> Vec<Vec<f64>> {
    let mut out: Vec<Vec<f64>> = Vec::with_capacity(samples.len());
    let mut previous: Option<T> = None;
    for sample in samples {
        if let Some(ref prev) = previous {
            if prev.is_similar(&sample) {
                continue;
            }
        }
        let mut tuple = sample.export();
        tuple[0] = ((sample.event_time() - from).max(0)) as f64;
        out.push(tuple);
        previous = Some(sample);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::events::{KeyAction, MotionKind};
    use std::sync::Arc;

    fn recorder() -> EventRecorder {
        EventRecorder::new(Arc::new(Clock::new()))
    }

    #[test]
    fn test_empty_buffers_yield_empty_export() {
        let rec = recorder();
        let export = query_events(&rec, 0, 1000, &QueryLimits::default());
        assert!(export.motion.is_empty());
        assert!(export.key.is_empty());
        assert!(export.lifecycle.is_empty());
        assert!(export.resolution.is_empty());
    }

    #[test]
    fn test_motion_chronological_and_normalized() {
        let rec = recorder();
        rec.record_motion(110, MotionKind::Move, 1.0, 0.0, 0);
        rec.record_motion(120, MotionKind::Move, 2.0, 0.0, 0);
        rec.record_motion(130, MotionKind::Move, 3.0, 0.0, 0);
        let export = query_events(&rec, 100, 200, &QueryLimits::default());
        let times: Vec<f64> = export.motion.iter().map(|t| t[0]).collect();
        assert_eq!(times, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_consecutive_duplicates_keep_earliest() {
        let rec = recorder();
        for t in [10, 20, 30] {
            rec.record_motion(t, MotionKind::Move, 5.0, 5.0, 0);
        }
        rec.record_motion(40, MotionKind::Move, 6.0, 5.0, 0);
        let export = query_events(&rec, 0, 100, &QueryLimits::default());
        assert_eq!(export.motion.len(), 2);
        // The run of identical samples collapses to its earliest timestamp.
        assert_eq!(export.motion[0][0], 10.0);
        assert_eq!(export.motion[1][0], 40.0);
    }

    #[test]
    fn test_key_window_starts_at_first_motion() {
        let rec = recorder();
        rec.record_key(50, KeyAction::Down, 1);
        rec.record_key(150, KeyAction::Down, 2);
        rec.record_motion(100, MotionKind::Move, 1.0, 1.0, 0);
        rec.record_motion(200, MotionKind::Move, 2.0, 1.0, 0);
        let export = query_events(&rec, 0, 300, &QueryLimits::default());
        // The key at t=50 precedes the first motion sample and is excluded.
        assert_eq!(export.key.len(), 1);
        assert_eq!(export.key[0], vec![150.0, 1.0, 2.0]);
    }

    #[test]
    fn test_no_motion_uses_full_window() {
        let rec = recorder();
        rec.record_key(50, KeyAction::Up, 7);
        let export = query_events(&rec, 0, 100, &QueryLimits::default());
        assert_eq!(export.key.len(), 1);
    }

    #[test]
    fn test_negative_normalized_times_clamp_to_zero() {
        let rec = recorder();
        rec.record_motion(100, MotionKind::Move, 1.0, 1.0, 0);
        rec.record_motion(300, MotionKind::Move, 2.0, 1.0, 0);
        // A resolution sample written before the window start can surface
        // through the [from, lastMotion] resolution query.
        let export = query_events(&rec, 150, 400, &QueryLimits::default());
        for tuple in export
            .motion
            .iter()
            .chain(export.key.iter())
            .chain(export.resolution.iter())
        {
            assert!(tuple[0] >= 0.0);
        }
    }

    #[test]
    fn test_sequence_clamps_times_before_window() {
        use crate::events::MotionSample;
        let samples = vec![
            MotionSample::new(90, MotionKind::Move, 1.0, 0.0, 0),
            MotionSample::new(120, MotionKind::Move, 2.0, 0.0, 0),
        ];
        let tuples = export_sequence(samples, 100);
        assert_eq!(tuples[0][0], 0.0);
        assert_eq!(tuples[1][0], 20.0);
    }

    #[test]
    fn test_query_is_idempotent_without_new_writes() {
        let rec = recorder();
        for t in 1..=50 {
            rec.record_motion(t * 10, MotionKind::Move, t as f32, 0.0, 0);
        }
        let limits = QueryLimits::default();
        let a = query_events(&rec, 0, 1000, &limits);
        let b = query_events(&rec, 0, 1000, &limits);
        assert_eq!(a, b);
    }

    #[test]
    fn test_motion_cap_applies() {
        let rec = recorder();
        for t in 1..=100 {
            rec.record_motion(t, MotionKind::Move, t as f32, 0.0, 0);
        }
        let limits = QueryLimits {
            motion: 10,
            ..Default::default()
        };
        let export = query_events(&rec, 0, 1000, &limits);
        // Backward scan keeps the 10 newest samples.
        assert_eq!(export.motion.len(), 10);
        assert_eq!(export.motion[0][0], 91.0);
        assert_eq!(export.motion[9][0], 100.0);
    }
}
