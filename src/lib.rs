//! Behavior Telemetry - segment-based behavioral input telemetry.
//!
//! This library records host input events (pointer, keyboard, lifecycle,
//! resolution) into fixed-capacity ring buffers, slices them into segments
//! (manual begin/end or automatic tracking-mode rollover), and ships each
//! finalized segment either to an in-process callback or through a retrying
//! HTTP delivery queue.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Behavior Telemetry                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐    ┌───────────────┐    ┌────────────────┐    │
//! │  │ Recorder  │───▶│ SegmentQuery  │───▶│ SegmentExport  │    │
//! │  │ (rings)   │    │ (windowing)   │    │ (gzip+base64)  │    │
//! │  └───────────┘    └───────────────┘    └────────────────┘    │
//! │        ▲                  ▲                     │            │
//! │   host input      ┌───────────────┐    ┌────────────────┐    │
//! │   (any thread)    │SegmentManager │    │ DeliveryQueue  │    │
//! │                   │ (command loop)│    │ (command loop) │    │
//! │                   └───────────────┘    └────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use behavior_telemetry::{
//!     DeliveryConfig, DeliveryQueue, Env, HttpTransport, MotionKind,
//!     SegmentSink, SessionSegmentManager, TelemetrySettings,
//! };
//! use std::sync::Arc;
//!
//! let settings = TelemetrySettings::builder("my-app-token", Env::Prod)
//!     .build()
//!     .expect("valid settings");
//! let delivery = DeliveryConfig::builder("https://collect.example.com/v1/record")
//!     .build()
//!     .expect("valid delivery config");
//! let transport = Arc::new(HttpTransport::new().expect("http transport"));
//! let queue = DeliveryQueue::new(delivery, "my-app-token".into(), transport);
//!
//! let manager = SessionSegmentManager::new(settings, SegmentSink::delivery(queue));
//! let recorder = manager.recorder();
//!
//! manager.begin_segment("level-1");
//! recorder.record_motion(manager.uptime_millis(), MotionKind::Move, 10.0, 20.0, 0);
//! manager.end_segment();
//! ```

pub mod clock;
pub mod config;
pub mod delivery;
pub mod events;
pub mod export;
pub mod ident;
pub mod manager;
pub mod query;
pub mod recorder;
pub mod ring;
pub mod segment;
pub mod worker;

// Re-export key types at crate root for convenience
pub use config::{ConfigError, DeliveryConfig, Env, MetaInfo, QueryLimits, TelemetrySettings};
pub use delivery::{DeliveryError, DeliveryQueue, Disposition, HttpTransport, Transport};
pub use events::{
    KeyAction, KeySample, LifecycleKind, LifecycleSample, MotionKind, MotionSample,
    ResolutionSample,
};
pub use export::{ExportError, SegmentExport};
pub use manager::{SegmentSink, SessionSegmentManager};
pub use recorder::EventRecorder;
pub use segment::{CloseReason, Segment, SegmentMode, INIT_SEGMENT_NAME};

/// Library version, reported as `sdk_version` in every delivery envelope.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
