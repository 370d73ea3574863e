//! Segment lifecycle state machine on its own command loop.
//!
//! The host calls the public methods from any thread; each call enqueues a
//! command and returns immediately. All segment state (open slots, the
//! session counter, the ceiling latches) lives inside the loop closure and
//! is touched only by the worker thread, so transitions are serialized by
//! construction.

use crate::clock::Clock;
use crate::config::TelemetrySettings;
use crate::delivery::DeliveryQueue;
use crate::events::LifecycleKind;
use crate::export::SegmentExport;
use crate::ident::IdGenerator;
use crate::query::query_events;
use crate::recorder::EventRecorder;
use crate::segment::{CloseReason, Segment, SegmentMode, INIT_SEGMENT_NAME};
use crate::worker::{Scheduler, Worker};
use std::collections::HashMap;
use std::sync::Arc;

/// Where finalized segments go: an in-process callback receiving the header
/// map and JSON body, or the retrying network delivery queue.
pub enum SegmentSink {
    Callback(Box<dyn Fn(HashMap<String, String>, String) + Send>),
    Delivery(DeliveryQueue),
}

impl SegmentSink {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(HashMap<String, String>, String) + Send + 'static,
    {
        SegmentSink::Callback(Box::new(f))
    }

    pub fn delivery(queue: DeliveryQueue) -> Self {
        SegmentSink::Delivery(queue)
    }
}

enum Command {
    Begin(Segment),
    End,
    BeginTracking(Segment),
    TrackingCheck { epoch: u64 },
    EndTracking,
    SetKeyValue(String, String),
    SetUserId(String),
    SetAdditionalId(String),
}

/// Owns the session: the event recorder, the segment state machine and the
/// delivery sink. One per host application context.
pub struct SessionSegmentManager {
    session_id: String,
    clock: Arc<Clock>,
    recorder: Arc<EventRecorder>,
    ids: IdGenerator,
    worker: Worker<Command>,
}

impl SessionSegmentManager {
    pub fn new(settings: TelemetrySettings, sink: SegmentSink) -> Self {
        let clock = Arc::new(Clock::new());
        let recorder = Arc::new(EventRecorder::new(Arc::clone(&clock)));
        let ids = IdGenerator::alphanumeric();
        let session_id = ids.generate();

        let mut state = ManagerState {
            settings,
            clock: Arc::clone(&clock),
            recorder: Arc::clone(&recorder),
            sink,
            session_id: session_id.clone(),
            ids: ids.clone(),
            manual: None,
            tracking: None,
            counter: 0,
            manual_latch: false,
            tracking_latch: false,
            tracking_epoch: 0,
        };
        let emit_init = state.settings.init_segment_enabled();
        let init_segment = Segment::new(
            Some(INIT_SEGMENT_NAME.to_owned()),
            ids.generate(),
            SegmentMode::Manual,
        );
        let worker = Worker::spawn("telemetry-segments", move |command, scheduler| {
            state.handle(command, scheduler)
        });
        let manager = Self {
            session_id,
            clock,
            recorder,
            ids,
            worker,
        };
        if emit_init {
            manager.worker.scheduler().send(Command::Begin(init_segment));
            manager.worker.scheduler().send(Command::End);
        }
        manager
    }

    /// Random identifier for this context, stamped on every export.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The recorder the host feeds input events into.
    pub fn recorder(&self) -> Arc<EventRecorder> {
        Arc::clone(&self.recorder)
    }

    /// Open a named segment, implicitly closing any open one. The reserved
    /// `INIT` name is rejected.
    pub fn begin_segment(&self, name: &str) {
        if name == INIT_SEGMENT_NAME {
            log::error!("segment name {INIT_SEGMENT_NAME:?} is reserved, begin ignored");
            return;
        }
        let mut segment = Segment::new(
            Some(name.to_owned()),
            self.ids.generate(),
            SegmentMode::Manual,
        );
        segment.resolution = self.recorder.last_resolution();
        self.worker.scheduler().send(Command::Begin(segment));
    }

    /// Close and dispatch the open manual segment.
    pub fn end_segment(&self) {
        self.worker.scheduler().send(Command::End);
    }

    /// Start tracking mode: automatic rollover by duration or motion amount.
    pub fn begin_tracking(&self, user_id: Option<&str>) {
        let mut segment = Segment::new(None, self.ids.generate(), SegmentMode::Tracking);
        segment.user_id = user_id.map(str::to_owned);
        segment.resolution = self.recorder.last_resolution();
        self.worker.scheduler().send(Command::BeginTracking(segment));
    }

    /// Stop tracking mode, dispatching the open tracking segment.
    pub fn end_tracking(&self) {
        self.worker.scheduler().send(Command::EndTracking);
    }

    /// Attach a metadata entry to whichever segments are open.
    pub fn set_key_value(&self, key: &str, value: &str) {
        self.worker
            .scheduler()
            .send(Command::SetKeyValue(key.to_owned(), value.to_owned()));
    }

    pub fn set_user_id(&self, user_id: &str) {
        self.worker
            .scheduler()
            .send(Command::SetUserId(user_id.to_owned()));
    }

    pub fn set_additional_id(&self, additional_id: &str) {
        self.worker
            .scheduler()
            .send(Command::SetAdditionalId(additional_id.to_owned()));
    }

    /// Host lifecycle hooks, recorded into the lifecycle stream.
    pub fn on_resume(&self) {
        self.recorder.record_lifecycle(LifecycleKind::Resume);
    }

    pub fn on_pause(&self) {
        self.recorder.record_lifecycle(LifecycleKind::Pause);
    }

    pub fn on_stop(&self) {
        self.recorder.record_lifecycle(LifecycleKind::Stop);
    }

    /// Milliseconds since this context was created, the time axis the host
    /// should stamp motion and key events with.
    pub fn uptime_millis(&self) -> i64 {
        self.clock.uptime_millis()
    }

    /// Stop the command loop. Open segments are abandoned, not dispatched.
    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }
}

struct ManagerState {
    settings: TelemetrySettings,
    clock: Arc<Clock>,
    recorder: Arc<EventRecorder>,
    sink: SegmentSink,
    session_id: String,
    ids: IdGenerator,
    manual: Option<Segment>,
    tracking: Option<Segment>,
    counter: u32,
    manual_latch: bool,
    tracking_latch: bool,
    tracking_epoch: u64,
}

impl ManagerState {
    fn handle(&mut self, command: Command, scheduler: &Scheduler<Command>) {
        match command {
            Command::Begin(segment) => self.begin_manual(segment),
            Command::End => self.end_manual(),
            Command::BeginTracking(segment) => self.begin_tracking(segment, scheduler),
            Command::TrackingCheck { epoch } => self.tracking_check(epoch, scheduler),
            Command::EndTracking => self.end_tracking(),
            Command::SetKeyValue(key, value) => {
                self.mutate_open("set_key_value", |segment| {
                    segment.key_values.insert(key.clone(), value.clone());
                });
            }
            Command::SetUserId(user_id) => {
                self.mutate_open("set_user_id", |segment| {
                    segment.user_id = Some(user_id.clone());
                });
            }
            Command::SetAdditionalId(additional_id) => {
                self.mutate_open("set_additional_id", |segment| {
                    segment.additional_id = Some(additional_id.clone());
                });
            }
        }
    }

    fn begin_manual(&mut self, segment: Segment) {
        if self.manual_latch {
            log::warn!("segment ceiling reached, begin ignored");
            return;
        }
        self.counter += 1;
        if let Some(max) = self.settings.max_segments() {
            if self.counter > max {
                if let Some(open) = self.manual.take() {
                    self.close_and_dispatch(open, CloseReason::MaxSegmentsReached);
                }
                self.manual_latch = true;
                log::warn!("segment ceiling of {max} reached, no further segments");
                return;
            }
        }
        if let Some(open) = self.manual.take() {
            self.close_and_dispatch(open, CloseReason::DeveloperRequested);
        }
        self.open(segment, SegmentSlot::Manual);
    }

    fn end_manual(&mut self) {
        let Some(open) = self.manual.take() else {
            log::warn!("no open segment to end");
            return;
        };
        let reason = self.ceiling_aware_reason(open.counter);
        self.close_and_dispatch(open, reason);
    }

    fn begin_tracking(&mut self, segment: Segment, scheduler: &Scheduler<Command>) {
        if self.tracking_latch {
            log::warn!("segment ceiling reached, tracking not started");
            return;
        }
        if self.tracking.is_some() {
            log::warn!("tracking already running, begin ignored");
            return;
        }
        self.counter += 1;
        if let Some(max) = self.settings.max_segments() {
            if self.counter > max {
                self.tracking_latch = true;
                log::warn!("segment ceiling of {max} reached, tracking not started");
                return;
            }
        }
        self.open(segment, SegmentSlot::Tracking);
        self.tracking_epoch += 1;
        scheduler.send_delayed(
            Command::TrackingCheck {
                epoch: self.tracking_epoch,
            },
            self.settings.auto_check_interval(),
        );
    }

    fn tracking_check(&mut self, epoch: u64, scheduler: &Scheduler<Command>) {
        // A stale epoch means tracking was ended (or restarted) after this
        // check was scheduled.
        if epoch != self.tracking_epoch {
            return;
        }
        let Some(begin) = self.tracking.as_ref().map(|s| s.begin_uptime_millis) else {
            return;
        };
        let now = self.clock.uptime_millis();
        let elapsed = now - begin;
        let amount = self.settings.auto_motion_amount();
        if elapsed >= self.settings.auto_max_duration().as_millis() as i64 {
            self.rollover(CloseReason::DurationLimit);
        } else {
            let count = self.recorder.count_motion_in(begin, now, amount);
            if count >= amount {
                self.rollover(CloseReason::AmountLimit);
            }
        }
        scheduler.send_delayed(
            Command::TrackingCheck {
                epoch: self.tracking_epoch,
            },
            self.settings.auto_check_interval(),
        );
    }

    /// Close the tracking segment and continue tracking in a fresh one,
    /// keeping the identity fields.
    fn rollover(&mut self, reason: CloseReason) {
        let Some(open) = self.tracking.take() else {
            return;
        };
        let mut next = Segment::new(open.name.clone(), self.ids.generate(), SegmentMode::Tracking);
        next.user_id = open.user_id.clone();
        next.additional_id = open.additional_id.clone();
        next.resolution = self.recorder.last_resolution();
        self.close_and_dispatch(open, reason);
        self.counter += 1;
        self.open(next, SegmentSlot::Tracking);
    }

    fn end_tracking(&mut self) {
        // Bumping the epoch cancels any scheduled check.
        self.tracking_epoch += 1;
        let Some(open) = self.tracking.take() else {
            log::warn!("tracking not running, end ignored");
            return;
        };
        let reason = self.ceiling_aware_reason(open.counter);
        self.close_and_dispatch(open, reason);
    }

    fn mutate_open<F: FnMut(&mut Segment)>(&mut self, what: &str, mut apply: F) {
        let mut touched = false;
        if let Some(segment) = self.manual.as_mut() {
            apply(segment);
            touched = true;
        }
        if let Some(segment) = self.tracking.as_mut() {
            apply(segment);
            touched = true;
        }
        if !touched {
            log::error!("{what}: no open segment");
        }
    }

    /// Closing the last segment the ceiling allows reports the ceiling, not
    /// a developer request. Compares the ending segment's own counter, so a
    /// segment opened below the ceiling keeps its developer-requested reason
    /// even if the other slot has consumed the remaining counters since.
    fn ceiling_aware_reason(&self, segment_counter: u32) -> CloseReason {
        match self.settings.max_segments() {
            Some(max) if segment_counter >= max => CloseReason::MaxSegmentsReached,
            _ => CloseReason::DeveloperRequested,
        }
    }

    fn open(&mut self, mut segment: Segment, slot: SegmentSlot) {
        segment.counter = self.counter;
        segment.begin_uptime_millis = self.clock.uptime_millis();
        segment.begin_wall_millis = self.clock.wall_millis();
        log::info!(
            "segment #{} ({}) opened",
            segment.counter,
            segment.name.as_deref().unwrap_or("tracking")
        );
        match slot {
            SegmentSlot::Manual => self.manual = Some(segment),
            SegmentSlot::Tracking => self.tracking = Some(segment),
        }
    }

    fn close_and_dispatch(&mut self, mut segment: Segment, reason: CloseReason) {
        segment.end_uptime_millis = self.clock.uptime_millis();
        segment.end_wall_millis = self.clock.wall_millis();
        log::info!(
            "segment #{} ({}) closed, reason {:?}",
            segment.counter,
            segment.name.as_deref().unwrap_or("tracking"),
            reason
        );
        let events = query_events(
            &self.recorder,
            segment.begin_uptime_millis,
            segment.end_uptime_millis,
            &self.settings.query_limits(),
        );
        let export = SegmentExport::new(
            &segment,
            &self.session_id,
            reason,
            events,
            self.settings.meta().clone(),
            self.clock.origin_wall_millis(),
        );
        match &self.sink {
            SegmentSink::Callback(callback) => match export.to_json() {
                Ok(json) => callback(export.callback_headers(self.settings.app_token()), json),
                Err(e) => log::error!("segment export failed: {e}"),
            },
            SegmentSink::Delivery(queue) => {
                match export.to_envelope(self.settings.app_token(), self.settings.env()) {
                    Ok(body) => queue.enqueue(body),
                    Err(e) => log::error!("segment export failed: {e}"),
                }
            }
        }
    }
}

enum SegmentSlot {
    Manual,
    Tracking,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Env;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn settings() -> TelemetrySettings {
        TelemetrySettings::builder("token", Env::Stage)
            .build()
            .unwrap()
    }

    fn collecting_sink() -> (Arc<Mutex<Vec<HashMap<String, String>>>>, SegmentSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sink = SegmentSink::callback(move |headers, _json| {
            sink.lock().unwrap().push(headers);
        });
        (seen, sink)
    }

    fn drain(manager: &mut SessionSegmentManager) {
        // Command loops are asynchronous; give them a moment to settle.
        thread::sleep(Duration::from_millis(100));
        manager.shutdown();
    }

    #[test]
    fn test_init_segment_emitted_first() {
        let (seen, sink) = collecting_sink();
        let mut manager = SessionSegmentManager::new(settings(), sink);
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["seg_name"], INIT_SEGMENT_NAME);
        assert_eq!(seen[0]["seg_count"], "1");
    }

    #[test]
    fn test_init_segment_can_be_disabled() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        drain(&mut manager);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_begin_rejects_reserved_name() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        manager.begin_segment(INIT_SEGMENT_NAME);
        manager.end_segment();
        drain(&mut manager);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_begin_implicitly_closes_previous() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        manager.begin_segment("one");
        manager.begin_segment("two");
        manager.end_segment();
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["seg_name"], "one");
        assert_eq!(seen[0]["prompt"], "1");
        assert_eq!(seen[1]["seg_name"], "two");
    }

    #[test]
    fn test_counters_strictly_increase() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        manager.begin_segment("a");
        manager.end_segment();
        manager.begin_tracking(Some("user-1"));
        manager.end_tracking();
        manager.begin_segment("b");
        manager.end_segment();
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        let counters: Vec<u32> = seen
            .iter()
            .map(|h| h["seg_count"].parse().unwrap())
            .collect();
        assert_eq!(counters, vec![1, 2, 3]);
    }

    #[test]
    fn test_max_segment_ceiling_latches() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .max_segments(2)
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        manager.begin_segment("a");
        manager.end_segment();
        manager.begin_segment("b");
        // Third begin crosses the ceiling: closes "b" with the max reason
        // and latches; the fourth is ignored outright.
        manager.begin_segment("c");
        manager.begin_segment("d");
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1]["seg_name"], "b");
        assert_eq!(seen[1]["prompt"], "2");
    }

    #[test]
    fn test_end_reason_follows_the_ending_segments_counter() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .max_segments(2)
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        // Manual "a" takes counter 1, tracking takes counter 2 (the ceiling).
        manager.begin_segment("a");
        manager.begin_tracking(None);
        manager.end_segment();
        manager.end_tracking();
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // "a" was opened below the ceiling; only the tracking segment that
        // consumed the last counter closes with the ceiling reason.
        assert_eq!(seen[0]["seg_name"], "a");
        assert_eq!(seen[0]["prompt"], "1");
        assert_eq!(seen[1]["mode"], "1");
        assert_eq!(seen[1]["prompt"], "2");
    }

    #[test]
    fn test_tracking_begin_is_idempotent() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        manager.begin_tracking(Some("user-1"));
        manager.begin_tracking(Some("user-2"));
        manager.end_tracking();
        manager.end_tracking();
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["seg_count"], "1");
    }

    #[test]
    fn test_manual_and_tracking_slots_coexist() {
        let (seen, sink) = collecting_sink();
        let settings = TelemetrySettings::builder("token", Env::Stage)
            .disable_init_segment()
            .build()
            .unwrap();
        let mut manager = SessionSegmentManager::new(settings, sink);
        manager.begin_segment("manual");
        manager.begin_tracking(None);
        manager.end_tracking();
        manager.end_segment();
        drain(&mut manager);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["mode"], "1");
        assert_eq!(seen[1]["mode"], "2");
        assert_eq!(seen[1]["seg_name"], "manual");
    }
}
